use std::{
    io,
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use crate::log::log_sink::LogSink;
use crate::{sink_debug, sink_trace};

/// One armed deadline at most, serviced by one dedicated thread.
///
/// Re-arming replaces the previous deadline instead of queuing another one.
/// [`cancel`](Self::cancel) disarms without firing. Once
/// [`stop`](Self::stop) returns no handler invocation is running or will
/// start, unless `stop` was called from the handler itself.
pub struct TimeoutScheduler {
    name: String,
    logger: Arc<dyn LogSink>,
    shared: Arc<Slot>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

struct Slot {
    state: Mutex<SlotState>,
    cond: Condvar,
}

#[derive(Default)]
struct SlotState {
    deadline: Option<Instant>,
    stopped: bool,
}

impl Slot {
    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl TimeoutScheduler {
    #[must_use]
    pub fn new(name: &str, logger: Arc<dyn LogSink>) -> Self {
        Self {
            name: name.to_string(),
            logger,
            shared: Arc::new(Slot {
                state: Mutex::new(SlotState::default()),
                cond: Condvar::new(),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Spawns the timer thread. A second call while running is a no-op.
    pub fn start<F>(&self, on_timeout: F) -> io::Result<()>
    where
        F: Fn() + Send + 'static,
    {
        let mut worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
        if worker.is_some() {
            return Ok(());
        }
        {
            let mut st = self.shared.lock();
            st.stopped = false;
            st.deadline = None;
        }
        let slot = Arc::clone(&self.shared);
        let logger = Arc::clone(&self.logger);
        let handle = thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || run(&slot, &*logger, on_timeout))?;
        *worker = Some(handle);
        sink_debug!(self.logger, "[Timer] {} started", self.name);
        Ok(())
    }

    /// Arms the slot to fire once after `delay`, replacing any armed deadline.
    pub fn request_timeout(&self, delay: Duration) {
        let mut st = self.shared.lock();
        if st.stopped {
            return;
        }
        st.deadline = Some(Instant::now() + delay);
        self.shared.cond.notify_all();
    }

    /// Disarms the slot. A handler that is already running is not interrupted.
    pub fn cancel(&self) {
        let mut st = self.shared.lock();
        st.deadline = None;
        self.shared.cond.notify_all();
    }

    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.shared.lock().deadline.is_some()
    }

    /// Stops the thread and waits for it, except when called from the timer
    /// thread itself, where the loop exits after the handler returns.
    pub fn stop(&self) {
        {
            let mut st = self.shared.lock();
            st.stopped = true;
            st.deadline = None;
            self.shared.cond.notify_all();
        }
        let handle = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
            sink_debug!(self.logger, "[Timer] {} stopped", self.name);
        }
    }
}

impl Drop for TimeoutScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run<F: Fn()>(slot: &Slot, logger: &dyn LogSink, on_timeout: F) {
    let mut st = slot.lock();
    loop {
        if st.stopped {
            return;
        }
        match st.deadline {
            None => {
                st = slot.cond.wait(st).unwrap_or_else(PoisonError::into_inner);
            }
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    st.deadline = None;
                    drop(st);
                    sink_trace!(logger, "[Timer] fired");
                    on_timeout();
                    st = slot.lock();
                } else {
                    st = slot
                        .cond
                        .wait_timeout(st, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                }
            }
        }
    }
}
