//! State shared by the transform engine, its RTCP transformer and the
//! timer thread, and the [`ZrtpCallback`] bridge the protocol engine
//! reports through.

use std::sync::{
    Arc, Mutex, MutexGuard, PoisonError,
    atomic::{AtomicBool, AtomicU32, Ordering},
};
use std::time::Duration;

use crate::keyring::SecretsKeyring;
use crate::log::log_sink::LogSink;
use crate::protocol::{
    Direction, MessageCode, MessageSeverity, ProtocolState, SrtpSecrets, ZrtpCallback,
    ZrtpProtocolEngine,
};
use crate::security_events::SecurityEventManager;
use crate::timeout::TimeoutScheduler;
use crate::transform::{engine_state::EngineState, zrtp_context::ZrtpContext, zrtp_transport::ZrtpTransport};
use crate::zrtp::{self, ZrtpSequence};
use crate::{sink_debug, sink_info, sink_trace, sink_warn};

pub(crate) struct EngineShared {
    pub(crate) context: ZrtpContext,
    pub(crate) logger: Arc<dyn LogSink>,
    pub(crate) keyring: Arc<SecretsKeyring>,
    pub(crate) events: SecurityEventManager,
    pub(crate) timer: TimeoutScheduler,
    transport: Mutex<Option<Arc<dyn ZrtpTransport>>>,
    sequence: Mutex<ZrtpSequence>,
    core: Mutex<Option<Box<dyn ZrtpProtocolEngine>>>,
    state: Mutex<EngineState>,
    sas: Mutex<Option<String>>,
    client_id: Mutex<Option<String>>,
    pub(crate) own_ssrc: AtomicU32,
    pub(crate) started: AtomicBool,
    pub(crate) enabled: AtomicBool,
    pub(crate) auto_sense: AtomicBool,
    pub(crate) closed: AtomicBool,
    /// Mirrors `core.state() == WaitConfAck` as of the last core call.
    awaiting_conf_ack: AtomicBool,
}

impl EngineShared {
    pub(crate) fn new(context: ZrtpContext) -> Self {
        let logger = Arc::clone(&context.logger);
        Self {
            keyring: Arc::new(SecretsKeyring::new(Arc::clone(&logger))),
            events: SecurityEventManager::new(Arc::clone(&logger)),
            timer: TimeoutScheduler::new("zrtp-timer", Arc::clone(&logger)),
            transport: Mutex::new(None),
            sequence: Mutex::new(ZrtpSequence::new()),
            core: Mutex::new(None),
            state: Mutex::new(EngineState::Idle),
            sas: Mutex::new(None),
            client_id: Mutex::new(None),
            own_ssrc: AtomicU32::new(0),
            started: AtomicBool::new(false),
            enabled: AtomicBool::new(true),
            auto_sense: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            awaiting_conf_ack: AtomicBool::new(false),
            logger,
            context,
        }
    }

    /// The protocol engine slot. [`ZrtpCallback`] methods run while this lock
    /// is held, so nothing reachable from them may take it.
    pub(crate) fn core(&self) -> MutexGuard<'_, Option<Box<dyn ZrtpProtocolEngine>>> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs `f` on the protocol engine, then hands the security events it
    /// queued to the listener once the lock is released. `None` when no
    /// engine is installed.
    pub(crate) fn with_core<R>(
        &self,
        f: impl FnOnce(&mut Box<dyn ZrtpProtocolEngine>, &EngineShared) -> R,
    ) -> Option<R> {
        let out = {
            let mut slot = self.core();
            let core = slot.as_mut()?;
            let out = f(core, self);
            self.awaiting_conf_ack
                .store(core.state() == ProtocolState::WaitConfAck, Ordering::SeqCst);
            out
        };
        self.events.dispatch_pending();
        Some(out)
    }

    pub(crate) fn awaiting_conf_ack(&self) -> bool {
        self.awaiting_conf_ack.load(Ordering::SeqCst)
    }

    pub(crate) fn state(&self) -> EngineState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Moves to `next` unless the engine is closed; `Closed` is final.
    pub(crate) fn set_state(&self, next: EngineState) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state == EngineState::Closed || *state == next {
            return;
        }
        sink_debug!(self.logger, "[Engine] {:?} -> {:?}", *state, next);
        *state = next;
    }

    pub(crate) fn set_transport(&self, transport: Option<Arc<dyn ZrtpTransport>>) {
        *self.transport.lock().unwrap_or_else(PoisonError::into_inner) = transport;
    }

    fn transport(&self) -> Option<Arc<dyn ZrtpTransport>> {
        self.transport
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn sas(&self) -> Option<String> {
        self.sas.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub(crate) fn set_client_id(&self, id: &str) {
        *self.client_id.lock().unwrap_or_else(PoisonError::into_inner) = Some(id.to_string());
    }

    pub(crate) fn client_id(&self) -> Option<String> {
        self.client_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Timer thread entry point.
    pub(crate) fn on_timeout(&self) {
        if self.closed.load(Ordering::SeqCst) || !self.started.load(Ordering::SeqCst) {
            return;
        }
        self.with_core(|core, sh| {
            // Re-checked under the lock: stop_zrtp may have won the race.
            if sh.started.load(Ordering::SeqCst) {
                core.process_timeout(sh);
            }
        });
    }
}

impl ZrtpCallback for EngineShared {
    fn send_data_zrtp(&self, message: &[u8]) -> bool {
        let Some(transport) = self.transport() else {
            sink_warn!(self.logger, "[ZRTP] no connector set, dropping {} bytes", message.len());
            return false;
        };
        let seq = self
            .sequence
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .next_seq();
        let packet = zrtp::encode(message, seq, self.own_ssrc.load(Ordering::SeqCst));
        sink_trace!(self.logger, "[ZRTP] send seq={} len={}", seq, packet.len());
        transport.send_raw_bytes(packet.as_slice())
    }

    fn srtp_secrets_ready(&self, secrets: &SrtpSecrets, direction: Direction) -> bool {
        match self.keyring.install(secrets, direction) {
            Ok(()) => {
                self.events.direction_secured(direction);
                true
            }
            Err(e) => {
                sink_warn!(self.logger, "[ZRTP] cannot install {:?} keys: {}", direction, e);
                false
            }
        }
    }

    fn srtp_secrets_on(&self, cipher: &str, sas: Option<&str>, verified: bool) {
        self.set_state(EngineState::Secure);
        *self.sas.lock().unwrap_or_else(PoisonError::into_inner) = sas.map(str::to_string);
        self.events.secure_on(cipher);
        if let Some(sas) = sas {
            self.events.show_sas(sas, verified);
        }
    }

    fn srtp_secrets_off(&self, direction: Direction) {
        self.keyring.teardown(direction);
        self.events.secure_off(direction);
        if !self.keyring.has(Direction::Sender) && !self.keyring.has(Direction::Receiver) {
            *self.sas.lock().unwrap_or_else(PoisonError::into_inner) = None;
            if matches!(self.state(), EngineState::Secure | EngineState::GoClearRequested) {
                self.set_state(EngineState::Idle);
            }
        }
    }

    fn activate_timer(&self, delay: Duration) {
        self.timer.request_timeout(delay);
    }

    fn cancel_timer(&self) {
        self.timer.cancel();
    }

    fn send_info(&self, severity: MessageSeverity, code: MessageCode) {
        self.events.show_message(severity, code);
    }

    fn negotiation_failed(&self, severity: MessageSeverity, code: MessageCode) {
        if self.state() == EngineState::Negotiating {
            self.set_state(EngineState::Idle);
        }
        self.events.negotiation_failed(severity, code);
    }

    fn not_supported_by_other(&self) {
        sink_info!(self.logger, "[ZRTP] peer never answered, media stays in clear");
        self.set_state(EngineState::Idle);
        self.events.not_supported_by_other();
    }

    fn handle_go_clear(&self) {
        self.set_state(EngineState::GoClearRequested);
        self.events.confirm_go_clear();
    }
}
