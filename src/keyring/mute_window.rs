use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Drop-incoming-media flag with a hard expiry.
///
/// Expiry is evaluated when the flag is read, so no timer thread is needed.
/// [`clear`](Self::clear) ends the window early.
#[derive(Debug, Default)]
pub struct MuteWindow {
    deadline: Mutex<Option<Instant>>,
}

impl MuteWindow {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arm(&self, duration: Duration) {
        *self.deadline.lock().unwrap_or_else(PoisonError::into_inner) =
            Some(Instant::now() + duration);
    }

    pub fn clear(&self) {
        *self.deadline.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        let mut deadline = self.deadline.lock().unwrap_or_else(PoisonError::into_inner);
        match *deadline {
            Some(d) if Instant::now() < d => true,
            Some(_) => {
                *deadline = None;
                false
            }
            None => false,
        }
    }
}
