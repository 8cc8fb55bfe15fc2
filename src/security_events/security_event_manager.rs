use std::collections::VecDeque;
use std::sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicBool, Ordering},
};

use crate::log::log_sink::LogSink;
use crate::protocol::{Direction, MessageCode, MessageSeverity};
use crate::security_events::security_event_listener::SecurityEventListener;
use crate::{sink_debug, sink_info, sink_warn};

/// One listener call, queued until the caller has released its locks.
#[derive(Debug, Clone, PartialEq, Eq)]
enum SecurityEvent {
    CipherNegotiated(String),
    SasComputed(String, bool),
    Established(Direction, String),
    Disabled(Direction),
    Message(MessageSeverity, MessageCode),
    NegotiationFailed(MessageCode),
    NotSupported,
    GoClearRequested,
}

/// Single-listener fan-out (the last registered listener wins).
///
/// Info messages are logged but not forwarded, except `SecureStateOn`,
/// which becomes one `security_established` per secured direction.
///
/// Reporting methods only queue; nothing reaches the listener until
/// [`dispatch_pending`](Self::dispatch_pending). The engine dispatches after
/// releasing the protocol lock, so a listener may call back into it.
pub struct SecurityEventManager {
    logger: Arc<dyn LogSink>,
    listener: Mutex<Option<Arc<dyn SecurityEventListener>>>,
    pending: Mutex<VecDeque<SecurityEvent>>,
    cipher: Mutex<Option<String>>,
    sender_secured: AtomicBool,
    receiver_secured: AtomicBool,
}

impl SecurityEventManager {
    #[must_use]
    pub fn new(logger: Arc<dyn LogSink>) -> Self {
        Self {
            logger,
            listener: Mutex::new(None),
            pending: Mutex::new(VecDeque::new()),
            cipher: Mutex::new(None),
            sender_secured: AtomicBool::new(false),
            receiver_secured: AtomicBool::new(false),
        }
    }

    pub fn set_listener(&self, listener: Option<Arc<dyn SecurityEventListener>>) {
        *self.listener.lock().unwrap_or_else(PoisonError::into_inner) = listener;
    }

    #[must_use]
    pub fn cipher(&self) -> Option<String> {
        self.cipher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn direction_secured(&self, direction: Direction) {
        self.flag(direction).store(true, Ordering::SeqCst);
    }

    pub fn secure_on(&self, cipher: &str) {
        *self.cipher.lock().unwrap_or_else(PoisonError::into_inner) = Some(cipher.to_string());
        sink_info!(self.logger, "[Security] cipher negotiated: {}", cipher);
        self.queue(SecurityEvent::CipherNegotiated(cipher.to_string()));
    }

    pub fn show_sas(&self, sas: &str, verified: bool) {
        sink_info!(self.logger, "[Security] SAS available (verified={})", verified);
        self.queue(SecurityEvent::SasComputed(sas.to_string(), verified));
    }

    /// Reports `direction` as unprotected if it was secured before.
    pub fn secure_off(&self, direction: Direction) {
        if self.flag(direction).swap(false, Ordering::SeqCst) {
            sink_info!(self.logger, "[Security] {:?} direction back to clear", direction);
            self.queue(SecurityEvent::Disabled(direction));
        }
    }

    pub fn show_message(&self, severity: MessageSeverity, code: MessageCode) {
        if severity == MessageSeverity::Info {
            sink_debug!(self.logger, "[Security] info: {}", code);
            if code == MessageCode::SecureStateOn {
                self.announce_established();
            }
            return;
        }
        sink_warn!(self.logger, "[Security] {:?}: {}", severity, code);
        self.queue(SecurityEvent::Message(severity, code));
    }

    pub fn negotiation_failed(&self, severity: MessageSeverity, code: MessageCode) {
        sink_warn!(self.logger, "[Security] negotiation failed ({:?}): {}", severity, code);
        self.queue(SecurityEvent::NegotiationFailed(code));
    }

    pub fn not_supported_by_other(&self) {
        sink_info!(self.logger, "[Security] peer does not support ZRTP");
        self.queue(SecurityEvent::NotSupported);
    }

    pub fn confirm_go_clear(&self) {
        self.queue(SecurityEvent::GoClearRequested);
    }

    /// Delivers queued events in order. Must be called without holding any
    /// lock a listener might need. Events queued by a listener while this
    /// runs are delivered by the same call.
    pub fn dispatch_pending(&self) {
        loop {
            let Some(event) = self
                .pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .pop_front()
            else {
                return;
            };
            if let Some(l) = self.listener() {
                deliver(&*l, event);
            }
        }
    }

    fn queue(&self, event: SecurityEvent) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(event);
    }

    fn announce_established(&self) {
        let cipher = self.cipher().unwrap_or_default();
        for direction in Direction::BOTH {
            if self.flag(direction).load(Ordering::SeqCst) {
                self.queue(SecurityEvent::Established(direction, cipher.clone()));
            }
        }
    }

    fn flag(&self, direction: Direction) -> &AtomicBool {
        match direction {
            Direction::Sender => &self.sender_secured,
            Direction::Receiver => &self.receiver_secured,
        }
    }

    fn listener(&self) -> Option<Arc<dyn SecurityEventListener>> {
        self.listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

fn deliver(l: &dyn SecurityEventListener, event: SecurityEvent) {
    match event {
        SecurityEvent::CipherNegotiated(cipher) => l.cipher_negotiated(&cipher),
        SecurityEvent::SasComputed(sas, verified) => l.sas_computed(&sas, verified),
        SecurityEvent::Established(direction, cipher) => l.security_established(direction, &cipher),
        SecurityEvent::Disabled(direction) => l.security_disabled(direction),
        SecurityEvent::Message(severity, code) => l.message(severity, code),
        SecurityEvent::NegotiationFailed(code) => l.negotiation_failed(code),
        SecurityEvent::NotSupported => l.peer_does_not_support_protocol(),
        SecurityEvent::GoClearRequested => l.go_clear_confirmation_requested(),
    }
}
