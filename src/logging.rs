//! Logging facility (C14): a `tracing` subscriber selected by `logfacility`, wrapping whichever
//! sink is chosen in a wall-clock-minute message-deduplication writer.

use crate::config::LogFacility;
use crate::context::RunContext;
use std::fs::{File, OpenOptions};
use std::hash::{Hash, Hasher};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("failed to open log file {path}: {source}")]
    OpenLogFile {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to connect to syslog: {0}")]
    Syslog(String),
}

fn current_minute() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| (d.as_secs() / 60) as i64)
        .unwrap_or(0)
}

fn hash_line(buf: &[u8]) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    buf.hash(&mut hasher);
    hasher.finish()
}

struct DedupState<W: Write + Send> {
    inner: W,
    last_hash: u64,
    last_minute: i64,
    repeat_count: u64,
}

/// Wraps a sink so that a line identical to the immediately preceding one, emitted within the
/// same wall-clock minute, is suppressed; the next differing line (or minute rollover) is
/// preceded by a single "Last message repeated N times" summary.
#[derive(Clone)]
struct DedupMakeWriter<W: Write + Send> {
    state: Arc<Mutex<DedupState<W>>>,
}

impl<W: Write + Send> DedupMakeWriter<W> {
    fn new(inner: W) -> Self {
        Self {
            state: Arc::new(Mutex::new(DedupState {
                inner,
                last_hash: 0,
                last_minute: i64::MIN,
                repeat_count: 0,
            })),
        }
    }

    fn replace_inner(&self, inner: W) {
        let mut state = self.state.lock().unwrap();
        state.inner = inner;
        state.last_hash = 0;
        state.last_minute = i64::MIN;
        state.repeat_count = 0;
    }
}

struct DedupHandle<W: Write + Send> {
    state: Arc<Mutex<DedupState<W>>>,
}

impl<W: Write + Send> Write for DedupHandle<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let len = buf.len();
        let mut state = self.state.lock().unwrap();
        let hash = hash_line(buf);
        let minute = current_minute();
        if hash == state.last_hash && minute == state.last_minute {
            state.repeat_count += 1;
            return Ok(len);
        }
        if state.repeat_count > 0 {
            let summary = format!("Last message repeated {} times\n", state.repeat_count);
            state.inner.write_all(summary.as_bytes())?;
        }
        state.inner.write_all(buf)?;
        state.last_hash = hash;
        state.last_minute = minute;
        state.repeat_count = 0;
        Ok(len)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.state.lock().unwrap().inner.flush()
    }
}

impl<'a, W: Write + Send + 'static> MakeWriter<'a> for DedupMakeWriter<W> {
    type Writer = DedupHandle<W>;

    fn make_writer(&'a self) -> Self::Writer {
        DedupHandle {
            state: Arc::clone(&self.state),
        }
    }
}

type SyslogLogger = syslog::Logger<syslog::LoggerBackend, syslog::Formatter3164>;

struct SyslogWriter {
    logger: Arc<Mutex<SyslogLogger>>,
}

impl Write for SyslogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let message = String::from_utf8_lossy(buf);
        let mut logger = self.logger.lock().unwrap();
        let _ = logger.info(message.trim_end());
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Clone for SyslogWriter {
    fn clone(&self) -> Self {
        Self {
            logger: Arc::clone(&self.logger),
        }
    }
}

impl<'a> MakeWriter<'a> for SyslogWriter {
    type Writer = SyslogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Handle returned by `init`, letting the signal thread reopen a file sink on `SIGHUP`.
pub enum LoggingHandle {
    File {
        path: PathBuf,
        writer: DedupMakeWriter<File>,
    },
    Other,
}

impl LoggingHandle {
    pub fn reopen_on_sighup(&self) {
        let LoggingHandle::File { path, writer } = self else {
            return;
        };
        match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => writer.replace_inner(file),
            Err(err) => tracing::error!(path = %path.display(), error = %err, "failed to reopen log file"),
        }
    }
}

fn open_log_file(path: &Path) -> Result<File, LoggingError> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| LoggingError::OpenLogFile {
            path: path.display().to_string(),
            source,
        })
}

fn timer() -> ChronoLocal {
    ChronoLocal::new("%Y-%m-%d %H:%M:%S%.3f".to_string())
}

pub fn init(ctx: &RunContext, verbose: bool) -> Result<LoggingHandle, LoggingError> {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    match &ctx.logfacility {
        LogFacility::Stdout => {
            let writer = DedupMakeWriter::new(io::stdout());
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_timer(timer())
                .with_writer(writer)
                .init();
            Ok(LoggingHandle::Other)
        }
        LogFacility::File => {
            let file = open_log_file(&ctx.logfile)?;
            let writer = DedupMakeWriter::new(file);
            let handle = LoggingHandle::File {
                path: ctx.logfile.clone(),
                writer: writer.clone(),
            };
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_timer(timer())
                .with_writer(writer)
                .init();
            Ok(handle)
        }
        LogFacility::System => {
            let formatter = syslog::Formatter3164 {
                facility: syslog::Facility::LOG_DAEMON,
                hostname: None,
                process: ctx.program_name.clone(),
                pid: std::process::id(),
            };
            let logger = syslog::unix(formatter)
                .map_err(|err| LoggingError::Syslog(err.to_string()))?;
            let writer = SyslogWriter {
                logger: Arc::new(Mutex::new(logger)),
            };
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .without_time()
                .init();
            Ok(LoggingHandle::Other)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_identical_lines_are_suppressed() {
        let buf: Vec<u8> = Vec::new();
        let writer = DedupMakeWriter::new(buf);
        {
            let mut handle = writer.make_writer();
            handle.write_all(b"same line\n").unwrap();
            handle.write_all(b"same line\n").unwrap();
            handle.write_all(b"same line\n").unwrap();
            handle.write_all(b"different\n").unwrap();
        }
        let state = writer.state.lock().unwrap();
        let output = String::from_utf8_lossy(&state.inner);
        assert_eq!(
            output,
            "same line\nLast message repeated 2 times\ndifferent\n"
        );
    }
}
