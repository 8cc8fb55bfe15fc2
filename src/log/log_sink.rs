use crate::log::log_level::LogLevel;

/// Destination for log lines. Implementations must never block the caller
/// for long: sinks are invoked from media I/O and timer threads.
pub trait LogSink: Send + Sync {
    fn log(&self, level: LogLevel, msg: &str, target: &'static str);
}
