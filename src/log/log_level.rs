/// Defines the severity levels for log messages.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    /// Per-packet detail (SRTP index, ZRTP message types on the wire).
    Trace,
    /// State machine transitions and key installation milestones.
    Debug,
    /// Coarse session progress: engine started, secure state reached.
    Info,
    /// Recoverable faults: dropped packets, failed sends, CRC mismatches.
    Warn,
    /// Faults that end negotiation or make the engine unavailable.
    Error,
}

impl LogLevel {
    /// Fixed-width label used by the file logger.
    pub fn label(self) -> &'static str {
        match self {
            LogLevel::Trace => "TRACE",
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO ",
            LogLevel::Warn => "WARN ",
            LogLevel::Error => "ERROR",
        }
    }
}
