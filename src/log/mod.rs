//! Leveled logging through an injected [`LogSink`](log_sink::LogSink).
//!
//! Every component receives an `Arc<dyn LogSink>` at construction time; the
//! `sink_*!` macros format lazily and compile to nothing when the matching
//! `log-*` cargo feature is off.
pub mod log_level;
pub mod log_macros;
pub mod log_msg;
pub mod log_sink;
pub mod logger;
pub mod logger_handle;
pub mod noop_log_sink;
pub mod tracing_log_sink;
pub use log_level::LogLevel;
pub use log_sink::LogSink;
pub use noop_log_sink::NoopLogSink;
pub use tracing_log_sink::TracingLogSink;
