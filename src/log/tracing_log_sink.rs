use crate::log::{log_level::LogLevel, log_sink::LogSink};

/// Forwards every line into the `tracing` ecosystem.
///
/// The originating module path is attached as the `module` field, so a
/// `tracing-subscriber` `EnvFilter` such as `rustyzrtp=debug` keeps working.
#[derive(Debug, Clone, Default)]
pub struct TracingLogSink;

impl LogSink for TracingLogSink {
    fn log(&self, level: LogLevel, msg: &str, target: &'static str) {
        match level {
            LogLevel::Trace => tracing::trace!(target: "rustyzrtp", module = target, "{msg}"),
            LogLevel::Debug => tracing::debug!(target: "rustyzrtp", module = target, "{msg}"),
            LogLevel::Info => tracing::info!(target: "rustyzrtp", module = target, "{msg}"),
            LogLevel::Warn => tracing::warn!(target: "rustyzrtp", module = target, "{msg}"),
            LogLevel::Error => tracing::error!(target: "rustyzrtp", module = target, "{msg}"),
        }
    }
}
