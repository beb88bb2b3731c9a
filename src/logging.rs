//! Tracing setup.
//!
//! Lines go to stderr by default. With `--syslog` they are formatted the
//! same way and handed to the local syslog daemon, one `syslog(3)` call per
//! event, with the priority taken from the event level.

use std::ffi::CString;
use std::io::{self, Write};
use std::os::raw::{c_char, c_int};
use std::path::Path;
use thiserror::Error;
use tracing::{info, Level, Metadata};
use tracing_subscriber::fmt::MakeWriter;

pub const SYSLOG_IDENT: &str = "do-agent";
const SYSLOG_SOCKET: &str = "/dev/log";

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("invalid log level {0:?}")]
    InvalidLevel(String),

    #[error("syslog is unavailable: {0}")]
    Syslog(String),

    #[error("failed to install tracing subscriber: {0}")]
    Init(#[from] tracing::subscriber::SetGlobalDefaultError),
}

impl LoggingError {
    pub fn kind(&self) -> &'static str {
        "fatal_config"
    }
}

pub fn parse_level(level: &str) -> Result<Level, LoggingError> {
    level
        .parse::<Level>()
        .map_err(|_| LoggingError::InvalidLevel(level.to_string()))
}

/// Initializes tracing logging subsystem with the configured log level.
pub fn setup_logging(level: &str, syslog: bool) -> Result<(), LoggingError> {
    let log_level = parse_level(level)?;

    if syslog {
        let writer = Syslog::open(SYSLOG_IDENT)?;
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(log_level)
            .with_target(true)
            .with_ansi(false)
            .without_time()
            .with_writer(writer)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(log_level)
            .with_target(true)
            .with_thread_ids(false)
            .with_file(true)
            .with_line_number(true)
            .with_writer(io::stderr)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }

    info!("Logging initialized with level: {} (syslog: {})", log_level, syslog);
    Ok(())
}

/// Syslog priority for a tracing level.
pub fn priority(level: &Level) -> c_int {
    match *level {
        Level::ERROR => libc::LOG_ERR,
        Level::WARN => libc::LOG_WARNING,
        Level::INFO => libc::LOG_INFO,
        Level::DEBUG | Level::TRACE => libc::LOG_DEBUG,
    }
}

/// A `MakeWriter` that forwards formatted events to syslog under the
/// `LOG_DAEMON` facility.
pub struct Syslog {
    // openlog keeps the pointer, so the ident must outlive every syslog call
    _ident: CString,
}

impl Syslog {
    pub fn open(ident: &str) -> Result<Self, LoggingError> {
        if !Path::new(SYSLOG_SOCKET).exists() {
            return Err(LoggingError::Syslog(format!("{} does not exist", SYSLOG_SOCKET)));
        }
        let ident = CString::new(ident).map_err(|e| LoggingError::Syslog(e.to_string()))?;

        // SAFETY: ident is a valid C string kept alive for the lifetime of
        // the process-wide subscriber that owns this writer.
        unsafe {
            libc::openlog(ident.as_ptr(), libc::LOG_PID | libc::LOG_NDELAY, libc::LOG_DAEMON);
        }
        Ok(Self { _ident: ident })
    }
}

impl<'a> MakeWriter<'a> for Syslog {
    type Writer = SyslogLine;

    fn make_writer(&'a self) -> Self::Writer {
        SyslogLine::new(libc::LOG_INFO)
    }

    fn make_writer_for(&'a self, meta: &Metadata<'_>) -> Self::Writer {
        SyslogLine::new(priority(meta.level()))
    }
}

/// Buffers one formatted event and sends it when dropped.
pub struct SyslogLine {
    priority: c_int,
    buf: Vec<u8>,
}

impl SyslogLine {
    fn new(priority: c_int) -> Self {
        Self {
            priority,
            buf: Vec::with_capacity(256),
        }
    }

    fn message(&self) -> Option<CString> {
        let line: Vec<u8> = self
            .buf
            .iter()
            .copied()
            .filter(|b| *b != 0)
            .collect();
        let end = line.iter().rposition(|b| !b.is_ascii_whitespace())? + 1;
        CString::new(&line[..end]).ok()
    }
}

impl Write for SyslogLine {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for SyslogLine {
    fn drop(&mut self) {
        let Some(msg) = self.message() else {
            return;
        };
        // SAFETY: both pointers are NUL-terminated and the format string
        // consumes exactly one string argument.
        unsafe {
            libc::syslog(
                self.priority,
                b"%s\0".as_ptr() as *const c_char,
                msg.as_ptr(),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("debug").unwrap(), Level::DEBUG);
        assert_eq!(parse_level("WARN").unwrap(), Level::WARN);
        assert!(matches!(parse_level("loud"), Err(LoggingError::InvalidLevel(_))));
    }

    #[test]
    fn test_priority_mapping() {
        assert_eq!(priority(&Level::ERROR), libc::LOG_ERR);
        assert_eq!(priority(&Level::WARN), libc::LOG_WARNING);
        assert_eq!(priority(&Level::TRACE), libc::LOG_DEBUG);
    }

    #[test]
    fn test_line_message_strips_newline_and_nul() {
        let mut line = SyslogLine::new(libc::LOG_INFO);
        line.write_all(b"hello\0 world\n").unwrap();
        assert_eq!(line.message().unwrap().to_str().unwrap(), "hello world");
        // nothing buffered, nothing sent
        line.buf.clear();
        assert!(line.message().is_none());
    }
}
