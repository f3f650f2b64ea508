//! Synthetic log events and the optional JSON-lines file sink.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use parking_lot::Mutex;
use rand::Rng;
use serde::Serialize;

use crate::correlation::CorrelationContext;
use crate::error::{EmitterError, Result};
use crate::identity::ResourceIdentity;

/// Field holding the cycle's trace ID.
pub const TRACE_ID_FIELD: &str = "trace_id";
/// Field holding the cycle's root span ID.
pub const SPAN_ID_FIELD: &str = "span_id";

/// Fixed vocabulary of log phrases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogMessage {
    StartingProcess,
    FetchingData,
    ProcessingRequest,
    SendingResponse,
    OperationCompleted,
}

impl LogMessage {
    pub const ALL: [LogMessage; 5] = [
        LogMessage::StartingProcess,
        LogMessage::FetchingData,
        LogMessage::ProcessingRequest,
        LogMessage::SendingResponse,
        LogMessage::OperationCompleted,
    ];

    /// Get the human-readable phrase.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StartingProcess => "Starting process",
            Self::FetchingData => "Fetching data",
            Self::ProcessingRequest => "Processing request",
            Self::SendingResponse => "Sending response",
            Self::OperationCompleted => "Operation completed",
        }
    }

    /// Pick a phrase uniformly at random.
    pub fn choose<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self::ALL[rng.gen_range(0..Self::ALL.len())]
    }
}

impl std::fmt::Display for LogMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One structured log record produced by a cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticLogEvent {
    pub message: LogMessage,
    pub fields: BTreeMap<String, String>,
    pub timestamp: SystemTime,
}

impl SyntheticLogEvent {
    /// Build an event carrying the cycle's correlation IDs and the service identity.
    pub fn new(
        message: LogMessage,
        context: &CorrelationContext,
        identity: &ResourceIdentity,
        environment: &str,
    ) -> Self {
        let mut fields = BTreeMap::new();
        fields.insert(TRACE_ID_FIELD.to_string(), context.trace_id().to_string());
        fields.insert(SPAN_ID_FIELD.to_string(), context.span_id().to_string());
        fields.insert("environment".to_string(), environment.to_string());
        fields.insert("service".to_string(), identity.service_name().to_string());
        fields.insert("version".to_string(), identity.service_version().to_string());

        Self {
            message,
            fields,
            timestamp: SystemTime::now(),
        }
    }

    pub fn trace_id(&self) -> Option<&str> {
        self.fields.get(TRACE_ID_FIELD).map(String::as_str)
    }

    pub fn span_id(&self) -> Option<&str> {
        self.fields.get(SPAN_ID_FIELD).map(String::as_str)
    }
}

#[derive(Serialize)]
struct FileRecord<'a> {
    timestamp: i64,
    message: &'a str,
    fields: &'a BTreeMap<String, String>,
}

/// Appends one JSON object per log event to a file.
#[derive(Debug)]
pub struct FileLogSink {
    path: PathBuf,
    file: Mutex<File>,
}

impl FileLogSink {
    /// Open `path` for appending, creating it and its parent directory if
    /// needed. Existing content is never truncated.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let sink_error = |source| EmitterError::LogSink {
            path: path.display().to_string(),
            source,
        };

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(sink_error)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(sink_error)?;

        tracing::debug!(path = %path.display(), "Opened log file sink");

        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one event as a JSON line.
    pub fn write(&self, event: &SyntheticLogEvent) -> Result<()> {
        let record = FileRecord {
            timestamp: emitter_common::system_time_millis(event.timestamp),
            message: event.message.as_str(),
            fields: &event.fields,
        };
        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');

        let mut file = self.file.lock();
        file.write_all(&line)
            .and_then(|_| file.flush())
            .map_err(|source| EmitterError::LogSink {
                path: self.path.display().to_string(),
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServiceConfig;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn identity() -> ResourceIdentity {
        let mut rng = StdRng::seed_from_u64(7);
        ResourceIdentity::resolve_with(&ServiceConfig::default(), &mut rng).unwrap()
    }

    fn context() -> CorrelationContext {
        let mut rng = StdRng::seed_from_u64(1);
        CorrelationContext::detached(&mut rng)
    }

    #[test]
    fn test_event_fields() {
        let ctx = context();
        let identity = identity();
        let event = SyntheticLogEvent::new(LogMessage::FetchingData, &ctx, &identity, "production");

        assert_eq!(event.trace_id(), Some(ctx.trace_id()));
        assert_eq!(event.span_id(), Some(ctx.span_id()));
        assert_eq!(event.fields.get("environment").unwrap(), "production");
        assert_eq!(event.fields.get("service").unwrap(), identity.service_name());
        assert_eq!(event.fields.get("version").unwrap(), identity.service_version());
        assert_eq!(event.fields.len(), 5);
    }

    #[test]
    fn test_choose_covers_vocabulary() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut seen = std::collections::HashSet::new();
        for _ in 0..200 {
            seen.insert(LogMessage::choose(&mut rng));
        }
        assert_eq!(seen.len(), LogMessage::ALL.len());
    }

    #[test]
    fn test_file_sink_creates_directory_and_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("logs").join("emitter.jsonl");
        let event = SyntheticLogEvent::new(LogMessage::SendingResponse, &context(), &identity(), "staging");

        let sink = FileLogSink::open(&path).unwrap();
        sink.write(&event).unwrap();
        drop(sink);

        let sink = FileLogSink::open(&path).unwrap();
        sink.write(&event).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 2);

        let value: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(value["message"], "Sending response");
        assert_eq!(value["fields"]["environment"], "staging");
        assert_eq!(value["fields"]["trace_id"], event.trace_id().unwrap());
        assert!(value["timestamp"].as_i64().unwrap() > 0);
    }

    #[test]
    fn test_file_sink_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"x").unwrap();

        let err = FileLogSink::open(blocker.join("emitter.jsonl")).unwrap_err();
        assert!(matches!(err, EmitterError::LogSink { .. }));
        assert!(err.is_fatal());
    }
}
