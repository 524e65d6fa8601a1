//! Streaming result callbacks.
//!
//! One callback instance per command invocation. Records are classified and
//! routed to a [`LogSink`] as they arrive; there is no buffered result list.

use crate::depot::{Record, RecordClassifier, RecordStatus};
use std::fmt;
use std::sync::Arc;

/// Receiver side of a streaming command.
pub trait StreamCallback {
    fn start_results(&mut self, _key: i32) -> bool {
        true
    }

    /// Handle one record. Returning false asks the executor to stop.
    fn handle_result(&mut self, key: i32, record: &Record) -> bool;

    fn end_results(&mut self, _key: i32) -> bool {
        true
    }
}

// =============================================================================
// Log sink
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warn,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Info => "INFO",
            Severity::Warn => "WARN",
            Severity::Error => "ERROR",
        })
    }
}

/// Destination for per-record messages.
pub trait LogSink: Send + Sync {
    fn log(&self, severity: Severity, message: &str);
}

/// Default sink: forwards to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn log(&self, severity: Severity, message: &str) {
        match severity {
            Severity::Info => tracing::info!("{}", message),
            Severity::Warn => tracing::warn!("{}", message),
            Severity::Error => tracing::error!("{}", message),
        }
    }
}

// =============================================================================
// Tasks
// =============================================================================

/// Per-command behavior plugged into [`ResultCallback`].
pub trait CallbackTask: Send {
    /// Used only to prefix log lines.
    fn task_name(&self) -> &str;

    /// Called once per successful file record.
    fn success(&mut self, _record: &Record) {}

    /// Substrings marking error text as expected noise.
    fn normal_messages(&self) -> &[&'static str] {
        &[]
    }
}

#[derive(Debug, Default)]
pub struct SyncTask {
    pub files_synced: u64,
}

impl CallbackTask for SyncTask {
    fn task_name(&self) -> &str {
        "sync"
    }

    fn success(&mut self, _record: &Record) {
        self.files_synced += 1;
    }

    fn normal_messages(&self) -> &[&'static str] {
        &["file(s) up-to-date"]
    }
}

#[derive(Debug, Default)]
pub struct UnshelveTask;

impl CallbackTask for UnshelveTask {
    fn task_name(&self) -> &str {
        "unshelve"
    }
}

#[derive(Debug, Default)]
pub struct ReconcileTask;

impl CallbackTask for ReconcileTask {
    fn task_name(&self) -> &str {
        "reconcile"
    }

    fn normal_messages(&self) -> &[&'static str] {
        &["no file(s) to reconcile"]
    }
}

// =============================================================================
// Result callback
// =============================================================================

/// Record counts for one command invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallbackStats {
    pub valid: u64,
    pub info: u64,
    pub errors: u64,
    /// Error records downgraded through the benign list.
    pub suppressed: u64,
    pub other: u64,
}

impl CallbackStats {
    pub fn total(&self) -> u64 {
        self.valid + self.info + self.errors + self.suppressed + self.other
    }
}

pub struct ResultCallback<T> {
    task: T,
    classifier: Arc<dyn RecordClassifier>,
    sink: Arc<dyn LogSink>,
    stats: CallbackStats,
}

impl<T: CallbackTask> ResultCallback<T> {
    pub fn new(task: T, classifier: Arc<dyn RecordClassifier>, sink: Arc<dyn LogSink>) -> Self {
        Self {
            task,
            classifier,
            sink,
            stats: CallbackStats::default(),
        }
    }

    pub fn prefix(&self) -> String {
        format!("Task {}:", self.task.task_name())
    }

    pub fn stats(&self) -> CallbackStats {
        self.stats
    }

    pub fn task(&self) -> &T {
        &self.task
    }

    pub fn into_task(self) -> T {
        self.task
    }

    fn log(&self, severity: Severity, message: &str) {
        self.sink
            .log(severity, &format!("{} {}", self.prefix(), message));
    }

    fn is_normal(&self, message: &str) -> bool {
        self.task
            .normal_messages()
            .iter()
            .any(|pattern| message.contains(pattern))
    }
}

/// `<depotFile>#<rev> - <action> as <clientFile>`
pub fn file_message(record: &Record) -> String {
    let field = |key: &str| {
        record
            .get(key)
            .map(|v| v.to_string())
            .unwrap_or_else(|| "null".to_string())
    };
    format!(
        "{}#{} - {} as {}",
        field("depotFile"),
        field("rev"),
        field("action"),
        field("clientFile")
    )
}

impl<T: CallbackTask> StreamCallback for ResultCallback<T> {
    fn handle_result(&mut self, _key: i32, record: &Record) -> bool {
        match self.classifier.classify(record) {
            RecordStatus::Valid => {
                let msg = file_message(record);
                self.task.success(record);
                self.stats.valid += 1;
                self.log(Severity::Info, &msg);
            }
            RecordStatus::Info(msg) => {
                self.stats.info += 1;
                self.log(Severity::Info, &msg);
            }
            RecordStatus::Error(msg) | RecordStatus::ClientError(msg) => {
                if self.is_normal(&msg) {
                    self.stats.suppressed += 1;
                    self.log(Severity::Info, &msg);
                } else {
                    self.stats.errors += 1;
                    self.log(Severity::Error, &msg);
                }
            }
            RecordStatus::Other => {
                self.stats.other += 1;
                self.log(Severity::Warn, &record.flatten());
            }
        }
        true
    }
}
