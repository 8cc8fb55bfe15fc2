//! RustyZRTP secures RTP media streams with ZRTP (RFC 6189) key agreement
//! and SRTP (RFC 3711) encryption.
//!
//! A [`ZrtpTransformEngine`](transform::ZrtpTransformEngine) sits in the
//! packet path of one media stream. It multiplexes ZRTP control packets
//! with media on the same flow, drives the ZRTP state machine and, once
//! keys are agreed, encrypts and decrypts media in place.
//!
//! It provides one binary:
//! - `rustyzrtp`: a loopback demo that negotiates between two local
//!   endpoints and exchanges SRTP packets.
//!
//! The crate is structured into several modules, each responsible for one
//! layer of the media path.

/// Handles configuration loading and management.
pub mod config;
/// Persistent ZRTP identity and retained-secret cache.
pub mod identity;
/// Installed SRTP/SRTCP transforms per direction and the start-muted window.
pub mod keyring;
/// Logging utilities for the library and the demo binary.
pub mod log;
/// Seam between the media path and a ZRTP state machine.
pub mod protocol;
/// Byte-level access to RTP/RTCP datagrams.
pub mod rtp;
/// Security event fan-out to the application.
pub mod security_events;
/// SRTP and SRTCP packet protection.
pub mod srtp;
/// Single-slot timer thread driving protocol retransmissions.
pub mod timeout;
/// The per-stream transform engine and its RTCP counterpart.
pub mod transform;
/// ZRTP packet framing on the RTP flow.
pub mod zrtp;
/// Reference ZRTP state machine: Hello through Confirm, SAS and key derivation.
pub mod zrtp_core;
