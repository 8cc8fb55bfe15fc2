use std::sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicBool, Ordering},
};

use crate::keyring::{
    direction_transform::DirectionTransform, mute_window::MuteWindow,
    session_key_material::SessionKeyMaterial,
};
use crate::log::log_sink::LogSink;
use crate::protocol::{Direction, SrtpSecrets};
use crate::srtp::SrtpError;
use crate::{sink_debug, sink_info};

type Slot = Mutex<Option<Arc<DirectionTransform>>>;

/// Owner of the active sender and receiver transforms.
///
/// Installing is a pointer swap under a short lock; the replaced transform
/// is closed (keys zeroed) only after the swap, so there is never a moment
/// with no transform while keys are being replaced.
pub struct SecretsKeyring {
    logger: Arc<dyn LogSink>,
    sender: Slot,
    receiver: Slot,
    receiver_seen: AtomicBool,
    mute: MuteWindow,
}

impl SecretsKeyring {
    #[must_use]
    pub fn new(logger: Arc<dyn LogSink>) -> Self {
        Self {
            logger,
            sender: Mutex::new(None),
            receiver: Mutex::new(None),
            receiver_seen: AtomicBool::new(false),
            mute: MuteWindow::new(),
        }
    }

    /// Resolves the keys for `direction` from `secrets` and installs them.
    pub fn install(&self, secrets: &SrtpSecrets, direction: Direction) -> Result<(), SrtpError> {
        let material = SessionKeyMaterial::for_direction(secrets, direction);
        match direction {
            Direction::Sender => self.install_sender(&material),
            Direction::Receiver => self.install_receiver(&material),
        }
    }

    pub fn install_sender(&self, material: &SessionKeyMaterial) -> Result<(), SrtpError> {
        let transform = Arc::new(DirectionTransform::new(Arc::clone(&self.logger), material)?);
        self.swap(Direction::Sender, Some(transform));
        sink_info!(self.logger, "[Keyring] sender keys installed ({:?})", material.policy.cipher);
        Ok(())
    }

    /// Also ends any mute window: receiver keys mean the handshake confirmed.
    pub fn install_receiver(&self, material: &SessionKeyMaterial) -> Result<(), SrtpError> {
        let transform = Arc::new(DirectionTransform::new(Arc::clone(&self.logger), material)?);
        self.swap(Direction::Receiver, Some(transform));
        self.receiver_seen.store(true, Ordering::SeqCst);
        self.mute.clear();
        sink_info!(self.logger, "[Keyring] receiver keys installed ({:?})", material.policy.cipher);
        Ok(())
    }

    /// Closes and removes the transform for `direction`; that direction
    /// becomes pass-through.
    pub fn teardown(&self, direction: Direction) {
        if self.swap(direction, None) {
            sink_debug!(self.logger, "[Keyring] {:?} transform torn down", direction);
        }
    }

    pub fn teardown_all(&self) {
        for direction in Direction::BOTH {
            self.teardown(direction);
        }
    }

    #[must_use]
    pub fn sender(&self) -> Option<Arc<DirectionTransform>> {
        self.slot(Direction::Sender)
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn receiver(&self) -> Option<Arc<DirectionTransform>> {
        self.slot(Direction::Receiver)
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn has(&self, direction: Direction) -> bool {
        self.slot(direction)
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Whether receiver keys were installed at any point in this session.
    #[must_use]
    pub fn receiver_ever_installed(&self) -> bool {
        self.receiver_seen.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn mute_window(&self) -> &MuteWindow {
        &self.mute
    }

    fn slot(&self, direction: Direction) -> &Slot {
        match direction {
            Direction::Sender => &self.sender,
            Direction::Receiver => &self.receiver,
        }
    }

    /// Swaps the slot and closes the previous transform after the lock is
    /// released. Returns whether something was replaced.
    fn swap(&self, direction: Direction, next: Option<Arc<DirectionTransform>>) -> bool {
        let previous = {
            let mut slot = self.slot(direction).lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *slot, next)
        };
        match previous {
            Some(old) => {
                old.close();
                true
            }
            None => false,
        }
    }
}

impl Drop for SecretsKeyring {
    fn drop(&mut self) {
        self.teardown_all();
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;
    use crate::log::NoopLogSink;
    use crate::protocol::Role;
    use crate::srtp::{SrtpContext, SrtpEndpointKeys, SrtpPolicy};
    use std::{
        sync::atomic::AtomicBool,
        thread,
        time::Duration,
    };

    fn keyring() -> SecretsKeyring {
        SecretsKeyring::new(Arc::new(NoopLogSink))
    }

    fn secrets(role: Role, seed: u8) -> SrtpSecrets {
        SrtpSecrets {
            cipher: crate::srtp::SrtpCipher::AesCm128,
            auth_tag_len: 10,
            key_initiator: vec![seed; 16],
            salt_initiator: vec![seed + 1; 14],
            key_responder: vec![seed + 2; 16],
            salt_responder: vec![seed + 3; 14],
            role,
        }
    }

    fn rtp(seq: u16, ssrc: u32) -> Vec<u8> {
        let mut p = vec![0x80, 0x00];
        p.extend_from_slice(&seq.to_be_bytes());
        p.extend_from_slice(&[0, 0, 0, 0]);
        p.extend_from_slice(&ssrc.to_be_bytes());
        p.extend_from_slice(b"media payload");
        p
    }

    #[test]
    fn four_directional_combinations_interoperate() {
        let initiator = keyring();
        let responder = keyring();
        for d in Direction::BOTH {
            initiator.install(&secrets(Role::Initiator, 10), d).unwrap();
            responder.install(&secrets(Role::Responder, 10), d).unwrap();
        }

        // initiator -> responder
        let plain = rtp(1, 0x1111);
        let mut p = plain.clone();
        initiator.sender().unwrap().protect_rtp(&mut p).unwrap();
        responder.receiver().unwrap().unprotect_rtp(&mut p).unwrap();
        assert_eq!(p, plain);

        // responder -> initiator
        let plain = rtp(1, 0x2222);
        let mut p = plain.clone();
        responder.sender().unwrap().protect_rtp(&mut p).unwrap();
        initiator.receiver().unwrap().unprotect_rtp(&mut p).unwrap();
        assert_eq!(p, plain);

        // own sender output is not readable with own receiver keys
        let mut p = rtp(2, 0x3333);
        initiator.sender().unwrap().protect_rtp(&mut p).unwrap();
        assert!(initiator.receiver().unwrap().unprotect_rtp(&mut p).is_err());
    }

    #[test]
    fn teardown_zeroes_previous_keys_and_passes_through() {
        let k = keyring();
        k.install(&secrets(Role::Initiator, 1), Direction::Sender).unwrap();
        let old = k.sender().unwrap();
        k.teardown(Direction::Sender);
        assert!(k.sender().is_none());
        assert!(old.keys_zeroed());
        let mut p = rtp(1, 1);
        assert_eq!(old.protect_rtp(&mut p), Err(SrtpError::Closed));
    }

    #[test]
    fn reinstall_closes_replaced_transform() {
        let k = keyring();
        k.install(&secrets(Role::Responder, 1), Direction::Receiver).unwrap();
        let first = k.receiver().unwrap();
        k.install(&secrets(Role::Responder, 50), Direction::Receiver).unwrap();
        assert!(first.is_closed());
        assert!(!k.receiver().unwrap().is_closed());
    }

    #[test]
    fn receiver_install_clears_mute_window() {
        let k = keyring();
        k.mute_window().arm(Duration::from_secs(30));
        assert!(k.mute_window().is_active());
        k.install(&secrets(Role::Initiator, 1), Direction::Receiver).unwrap();
        assert!(!k.mute_window().is_active());
        assert!(k.receiver_ever_installed());
    }

    #[test]
    fn concurrent_install_never_mixes_keys() {
        let k = Arc::new(keyring());
        let a = secrets(Role::Initiator, 20);
        let b = secrets(Role::Initiator, 90);
        k.install(&a, Direction::Sender).unwrap();

        let done = Arc::new(AtomicBool::new(false));
        let worker = {
            let k = Arc::clone(&k);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                let mut out = Vec::new();
                let mut seq = 0u16;
                while !done.load(Ordering::SeqCst) && seq < 2_000 {
                    let mut p = rtp(seq, 0xABCD);
                    if let Some(tx) = k.sender() {
                        if tx.protect_rtp(&mut p).is_ok() {
                            out.push(p);
                        }
                    }
                    seq += 1;
                }
                out
            })
        };
        for round in 0..20 {
            let next = if round % 2 == 0 { &b } else { &a };
            k.install(next, Direction::Sender).unwrap();
            thread::sleep(Duration::from_millis(1));
        }
        done.store(true, Ordering::SeqCst);
        let produced = worker.join().unwrap();
        assert!(!produced.is_empty());

        let decrypts_with = |s: &SrtpSecrets, pkt: &[u8]| {
            let keys = SrtpEndpointKeys::new(&s.key_initiator, &s.salt_initiator);
            let mut ctx =
                SrtpContext::new(Arc::new(NoopLogSink), SrtpPolicy::AES128_CM_HMAC_SHA1_80, &keys)
                    .unwrap();
            let mut copy = pkt.to_vec();
            ctx.unprotect(&mut copy).is_ok() && copy.ends_with(b"media payload")
        };
        for pkt in &produced {
            assert!(
                decrypts_with(&a, pkt) ^ decrypts_with(&b, pkt),
                "packet must belong to exactly one key set"
            );
        }
    }
}
