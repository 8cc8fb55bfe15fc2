//! Single-slot retransmission timer.
pub mod timeout_scheduler;

pub use timeout_scheduler::TimeoutScheduler;
