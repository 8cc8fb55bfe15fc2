use crate::{
    config::{Config, expand_path},
    log::{log_level::LogLevel, log_msg::LogMsg, logger_handle::LoggerHandle},
};

use std::{
    fs::{self, OpenOptions},
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
    sync::mpsc::{self, TrySendError},
    thread,
    time::{SystemTime, UNIX_EPOCH},
};

/// Flush to disk every 100 lines when debugging, so a crash mid-handshake
/// still leaves the trace on disk.
#[cfg(feature = "log-debug")]
const FLUSH_BATCH_SIZE: u32 = 100;

#[cfg(not(feature = "log-debug"))]
const FLUSH_BATCH_SIZE: u32 = 1_000;

/// Default queue depth used by [`Logger::start`].
pub const DEFAULT_QUEUE_CAP: usize = 4_096;

/// Bounded, non-blocking logger writing to a per-process log file.
///
/// Producers enqueue through [`LoggerHandle`]; a dedicated `zrtp-logger`
/// thread drains the queue, formats each line and flushes in batches.
/// When every handle has been dropped the worker flushes and exits.
pub struct Logger {
    handle: LoggerHandle,
    _thread: Option<thread::JoinHandle<()>>,
    file_path: PathBuf,
}

impl Logger {
    /// Starts the logger using the `[Logging]` section of `config`.
    ///
    /// Recognised keys: `log_path` (directory, `~` expanded) and
    /// `log_filename` (file name prefix). Without `log_path` the file goes
    /// to a `logs/` directory next to the executable.
    #[must_use]
    pub fn start(config: &Config) -> Self {
        let app_name = config.get_non_empty("Logging", "log_filename");
        let cap = config
            .get_u64("Logging", "queue_capacity")
            .ok()
            .flatten()
            .and_then(|v| usize::try_from(v).ok())
            .unwrap_or(DEFAULT_QUEUE_CAP);

        match config.get_non_empty("Logging", "log_path") {
            Some(dir) => Self::start_in_dir(expand_path(dir), app_name, cap),
            None => Self::start_default(app_name, cap),
        }
    }

    /// Creates `logs/` next to the executable and starts the logger there.
    #[must_use]
    pub fn start_default(app_name: Option<&str>, cap: usize) -> Self {
        let base = exe_dir_fallback_cwd().join("logs");
        Self::start_in_dir(base, app_name, cap)
    }

    /// Starts the logger in a specific directory.
    ///
    /// The file name is `<app>-<YYYYMMDD_HHMMSS>-pid<N>.log`. If the file
    /// cannot be opened the worker falls back to a temp-dir file and then to
    /// `io::sink()`; it never panics.
    pub fn start_in_dir<D: AsRef<Path>>(dir: D, app_name: Option<&str>, cap: usize) -> Self {
        let dir = dir.as_ref().to_path_buf();
        let _ = fs::create_dir_all(&dir);

        let ts = timestamp_for_filename();
        let pid = std::process::id();
        let fname = match app_name {
            Some(name) => format!("{name}-{ts}-pid{pid}.log"),
            None => format!("rustyzrtp-{ts}-pid{pid}.log"),
        };
        let file_path = dir.join(fname);

        let (tx, rx) = mpsc::sync_channel::<LogMsg>(cap.max(1));
        let handle = LoggerHandle { tx };

        let worker_path = file_path.clone();
        let _thread = thread::Builder::new()
            .name("zrtp-logger".into())
            .spawn(move || {
                let writer: Box<dyn Write + Send> = match OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&worker_path)
                {
                    Ok(f) => Box::new(f),
                    Err(_) => {
                        let fallback = std::env::temp_dir().join("rustyzrtp-fallback.log");
                        match OpenOptions::new().create(true).append(true).open(&fallback) {
                            Ok(f) => Box::new(f),
                            Err(_) => Box::new(io::sink()),
                        }
                    }
                };
                let mut out = BufWriter::new(writer);
                let mut lines_written: u32 = 0;

                while let Ok(m) = rx.recv() {
                    let _ = writeln!(&mut out, "{}", format_line(&m));
                    lines_written = lines_written.wrapping_add(1);
                    if lines_written.is_multiple_of(FLUSH_BATCH_SIZE)
                        || matches!(m.level, LogLevel::Error)
                    {
                        let _ = out.flush();
                    }
                }
                let _ = out.flush();
            })
            .ok();

        Self {
            handle,
            _thread,
            file_path,
        }
    }

    /// Enqueues a message without blocking; drops it when the queue is full.
    pub fn try_log<S: Into<String>>(
        &self,
        level: LogLevel,
        text: S,
        target: &'static str,
    ) -> Result<(), TrySendError<LogMsg>> {
        self.handle.try_log(level, text, target)
    }

    /// Returns a cloneable handle usable as `Arc<dyn LogSink>`.
    #[must_use]
    pub fn handle(&self) -> LoggerHandle {
        self.handle.clone()
    }

    #[must_use]
    pub fn file_path(&self) -> &Path {
        &self.file_path
    }
}

fn format_line(m: &LogMsg) -> String {
    let secs = u64::try_from(m.ts_ms / 1000).unwrap_or(u64::MAX);
    let millis = m.ts_ms % 1000;
    let when = unix_to_utc(secs).map_or_else(
        |_| format!("unix_{secs}"),
        |tm| {
            format!(
                "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}.{millis:03}Z",
                tm.year, tm.mon, tm.day, tm.hour, tm.min, tm.sec
            )
        },
    );
    format!("{when} {:<5} {} | {}", m.level.label(), m.target, m.text)
}

fn exe_dir_fallback_cwd() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
}

/// `YYYYMMDD_HHMMSS` in UTC.
fn timestamp_for_filename() -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();

    unix_to_utc(secs).map_or_else(
        |_| format!("unix_{secs}"),
        |tm| {
            format!(
                "{:04}{:02}{:02}_{:02}{:02}{:02}",
                tm.year, tm.mon, tm.day, tm.hour, tm.min, tm.sec
            )
        },
    )
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct SimpleUtc {
    year: i32,
    mon: u32,
    day: u32,
    hour: u32,
    min: u32,
    sec: u32,
}

#[derive(Debug)]
enum UtcConvError {
    Year,
    Month,
    Day,
}

/// Civil-from-days conversion, avoiding a calendar dependency for one use.
#[allow(clippy::many_single_char_names)]
fn unix_to_utc(mut s: u64) -> Result<SimpleUtc, UtcConvError> {
    let sec = (s % 60) as u32;
    s /= 60;
    let min = (s % 60) as u32;
    s /= 60;
    let hour = (s % 24) as u32;
    s /= 24;

    let z: i128 = i128::from(s) + 719_468;
    let era = (if z >= 0 { z } else { z - 146_096 }) / 146_097;
    let doe = z - era * 146_097;
    let yoe = (doe - doe / 1_460 + doe / 36_524 - doe / 146_096) / 365;
    let y = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = doy - (153 * mp + 2) / 5 + 1;
    let m = mp + if mp < 10 { 3 } else { -9 };

    let year = i32::try_from(y + i128::from(m <= 2)).map_err(|_| UtcConvError::Year)?;
    let mon = u32::try_from(m).map_err(|_| UtcConvError::Month)?;
    let day = u32::try_from(d).map_err(|_| UtcConvError::Day)?;

    Ok(SimpleUtc {
        year,
        mon,
        day,
        hour,
        min,
        sec,
    })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;
    use std::time::Duration;

    #[test]
    fn unix_epoch_and_known_date() {
        let epoch = unix_to_utc(0).unwrap();
        assert_eq!((epoch.year, epoch.mon, epoch.day), (1970, 1, 1));

        // 2024-02-29T12:34:56Z
        let leap = unix_to_utc(1_709_210_096).unwrap();
        assert_eq!(
            leap,
            SimpleUtc {
                year: 2024,
                mon: 2,
                day: 29,
                hour: 12,
                min: 34,
                sec: 56
            }
        );
    }

    #[test]
    fn writes_lines_to_dir() {
        let dir = tempfile::tempdir().unwrap();
        let logger = Logger::start_in_dir(dir.path(), Some("unit"), 16);
        let path = logger.file_path().to_path_buf();
        logger
            .try_log(LogLevel::Error, "handshake failed", "rustyzrtp::test")
            .unwrap();
        drop(logger);

        // The worker exits once every sender is gone; poll briefly for the flush.
        let mut content = String::new();
        for _ in 0..50 {
            content = fs::read_to_string(&path).unwrap_or_default();
            if content.contains("handshake failed") {
                break;
            }
            thread::sleep(Duration::from_millis(20));
        }
        assert!(content.contains("ERROR"));
        assert!(content.contains("rustyzrtp::test | handshake failed"));
    }
}
