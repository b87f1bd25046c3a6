//! Optional JSON-lines audit log of every completed request.
//!
//! The sink is opened once at startup and held until the logger is dropped.
//! Each record is serialized before the sink lock is taken and written with a
//! single `write_all` + `flush` under the lock, so concurrent writers never
//! interleave partial lines.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Mutex;

use serde::Serialize;
use tracing::{debug, warn};

use crate::error::AuditError;
use crate::types::{ChatCompletionRequest, ChatCompletionResponse};
use crate::usage::{UsageRecord, round_rate};

/// Where audit lines go.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum AuditSink {
    #[default]
    Disabled,
    /// Append to this file, creating it if needed.
    File(PathBuf),
    /// Write to the process's standard output.
    Stdout,
}

impl AuditSink {
    /// Resolve the command-line options; a file path wins over `--log-stdout`.
    pub fn from_options(logfile: Option<PathBuf>, stdout: bool) -> Self {
        match (logfile, stdout) {
            (Some(path), _) => AuditSink::File(path),
            (None, true) => AuditSink::Stdout,
            (None, false) => AuditSink::Disabled,
        }
    }
}

/// One audit record.
#[derive(Debug, Serialize)]
pub struct AuditLine<'a> {
    pub request: &'a ChatCompletionRequest,
    pub response: &'a ChatCompletionResponse,
    /// Seconds, unrounded.
    pub generation_time: f64,
    /// Rounded to two decimals.
    pub tokens_per_second: f64,
}

impl<'a> AuditLine<'a> {
    pub fn new(
        request: &'a ChatCompletionRequest,
        response: &'a ChatCompletionResponse,
        usage: &UsageRecord,
    ) -> Self {
        Self {
            request,
            response,
            generation_time: usage.generation_time_seconds,
            tokens_per_second: round_rate(usage.tokens_per_second),
        }
    }
}

type Writer = Box<dyn Write + Send>;

/// Process-wide audit logger. Disabled loggers never touch the filesystem.
pub struct AuditLogger {
    writer: Option<Mutex<Writer>>,
}

impl std::fmt::Debug for AuditLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLogger")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

impl AuditLogger {
    /// Open `sink`. Only [`AuditSink::File`] can fail.
    pub fn open(sink: &AuditSink) -> Result<Self, AuditError> {
        let writer: Option<Writer> = match sink {
            AuditSink::Disabled => None,
            AuditSink::Stdout => Some(Box::new(io::stdout())),
            AuditSink::File(path) => {
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .map_err(|source| AuditError::Open {
                        path: path.clone(),
                        source,
                    })?;
                Some(Box::new(file))
            }
        };
        Ok(Self {
            writer: writer.map(Mutex::new),
        })
    }

    pub fn disabled() -> Self {
        Self { writer: None }
    }

    /// Log into an arbitrary writer.
    pub fn from_writer(writer: impl Write + Send + 'static) -> Self {
        Self {
            writer: Some(Mutex::new(Box::new(writer))),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.writer.is_some()
    }

    /// Append `line`. Failures are reported on the diagnostic log and dropped.
    pub fn record(&self, line: &AuditLine<'_>) {
        if let Err(e) = self.try_record(line) {
            warn!(error = %e, response_id = %line.response.id, "failed to write audit line");
        }
    }

    /// Append `line`, returning any serialization or I/O failure.
    pub fn try_record(&self, line: &AuditLine<'_>) -> Result<(), AuditError> {
        let Some(writer) = &self.writer else {
            return Ok(());
        };

        let mut buf = serde_json::to_vec(line)?;
        buf.push(b'\n');

        let mut writer = writer.lock().map_err(|_| AuditError::LockPoisoned)?;
        writer.write_all(&buf)?;
        writer.flush()?;
        debug!(bytes = buf.len(), response_id = %line.response.id, "audit line written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use tracing_test::traced_test;

    use super::*;
    use crate::response::ResponseBuilder;
    use crate::types::Message;

    fn fixture() -> (ChatCompletionRequest, ChatCompletionResponse, UsageRecord) {
        let request = ChatCompletionRequest::new(vec![Message::new("user", "Hi")]).with_max_tokens(10);
        let usage = UsageRecord::measure(3, 2, Duration::from_millis(300));
        let response = ResponseBuilder::new("m").build("hello".into(), &usage);
        (request, response, usage)
    }

    /// A writer whose every call fails.
    struct BrokenWriter;

    impl Write for BrokenWriter {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::Error::other("disk full"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Err(io::Error::other("disk full"))
        }
    }

    #[test]
    fn file_path_wins_over_stdout() {
        assert_eq!(
            AuditSink::from_options(Some("a.jsonl".into()), true),
            AuditSink::File("a.jsonl".into())
        );
        assert_eq!(AuditSink::from_options(None, true), AuditSink::Stdout);
        assert_eq!(AuditSink::from_options(None, false), AuditSink::Disabled);
    }

    #[test]
    fn writes_one_parseable_line_per_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let logger = AuditLogger::open(&AuditSink::File(path.clone())).unwrap();
        let (request, response, usage) = fixture();

        logger.record(&AuditLine::new(&request, &response, &usage));
        logger.record(&AuditLine::new(&request, &response, &usage));

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        let value: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(value["request"]["max_tokens"], 10);
        assert_eq!(value["request"]["messages"][0]["content"], "Hi");
        assert_eq!(value["response"]["id"], response.id.as_str());
        assert_eq!(value["generation_time"], usage.generation_time_seconds);
        assert_eq!(value["tokens_per_second"], 6.67);
    }

    #[test]
    fn appends_to_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        std::fs::write(&path, "{\"previous\":true}\n").unwrap();

        let logger = AuditLogger::open(&AuditSink::File(path.clone())).unwrap();
        let (request, response, usage) = fixture();
        logger.record(&AuditLine::new(&request, &response, &usage));

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.starts_with("{\"previous\":true}\n"));
        assert_eq!(contents.lines().count(), 2);
    }

    #[test]
    fn disabled_logger_is_a_no_op() {
        let logger = AuditLogger::open(&AuditSink::Disabled).unwrap();
        assert!(!logger.is_enabled());
        let (request, response, usage) = fixture();
        assert!(logger.try_record(&AuditLine::new(&request, &response, &usage)).is_ok());
    }

    #[test]
    fn open_fails_for_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("audit.jsonl");
        let err = AuditLogger::open(&AuditSink::File(path)).unwrap_err();
        assert!(matches!(err, AuditError::Open { .. }));
    }

    #[test]
    #[traced_test]
    fn write_failures_are_swallowed_and_reported() {
        let logger = AuditLogger::from_writer(BrokenWriter);
        let (request, response, usage) = fixture();

        logger.record(&AuditLine::new(&request, &response, &usage));

        assert!(logs_contain("failed to write audit line"));
    }

    #[test]
    fn concurrent_records_never_interleave() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let logger = Arc::new(AuditLogger::open(&AuditSink::File(path.clone())).unwrap());

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let logger = Arc::clone(&logger);
                std::thread::spawn(move || {
                    let request = ChatCompletionRequest::new(vec![Message::new(
                        "user",
                        "x".repeat(4096 + i),
                    )]);
                    let usage = UsageRecord::measure(1, 1, Duration::from_millis(1));
                    let response = ResponseBuilder::new("m").build("y".repeat(4096), &usage);
                    for _ in 0..25 {
                        logger.record(&AuditLine::new(&request, &response, &usage));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 200);
        for line in contents.lines() {
            serde_json::from_str::<serde_json::Value>(line).expect("each line is valid JSON");
        }
    }
}
