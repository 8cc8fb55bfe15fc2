//! The media-path side of ZRTP: classifies every RTP/RTCP packet, feeds
//! ZRTP control packets to the protocol engine and runs media through the
//! installed SRTP transforms.
mod engine_callbacks;
pub mod engine_error;
pub mod engine_state;
pub mod media_path_state;
pub mod packet_transformer;
pub mod zrtcp_transformer;
pub mod zrtp_context;
pub mod zrtp_transform_engine;
pub mod zrtp_transport;

pub use engine_error::EngineError;
pub use engine_state::EngineState;
pub use media_path_state::MediaPathState;
pub use packet_transformer::PacketTransformer;
pub use zrtcp_transformer::ZrtcpTransformer;
pub use zrtp_context::ZrtpContext;
pub use zrtp_transform_engine::{START_MUTED_WINDOW, ZrtpTransformEngine};
pub use zrtp_transport::{UdpZrtpTransport, ZrtpTransport};
