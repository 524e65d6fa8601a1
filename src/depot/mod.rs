//! Depot executor interface.
//!
//! The session layer never speaks the depot protocol itself. It drives an
//! executor that accepts a command name, an argument list and a per-record
//! callback, and pushes key-value records into the callback as they arrive.
//!
//! ```text
//! Session --exec_streaming(cmd, args)--> DepotExecutor --records--> StreamCallback
//! ```

pub mod cli;
pub mod marshal;

pub use cli::P4CliExecutor;

use crate::callback::StreamCallback;
use crate::error::Result;
use async_trait::async_trait;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

// =============================================================================
// Records
// =============================================================================

/// A single field value inside a result record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Str(String),
    Int(i64),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            Value::Int(_) => None,
        }
    }

    /// Integer view. String values holding a number are parsed, since the
    /// depot sends most counters as text.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Str(s) => s.trim().parse().ok(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => f.write_str(s),
            Value::Int(i) => write!(f, "{}", i),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}

/// Ordered field map pushed by the executor. Field order is arrival order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record {
    fields: Vec<(String, Value)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a field. Replacing keeps the original position.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((key, value)),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(Value::as_int)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// `key=value key=value ...` rendering used for unclassified records.
    pub fn flatten(&self) -> String {
        let mut out = String::new();
        for (k, v) in &self.fields {
            out.push_str(k);
            out.push('=');
            out.push_str(&v.to_string());
            out.push(' ');
        }
        out
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut record = Record::new();
        for (k, v) in iter {
            record.insert(k, v);
        }
        record
    }
}

// =============================================================================
// Classification
// =============================================================================

/// Generic code the depot attaches to errors raised by the client side of a
/// transfer (clobber refusals, local write failures).
pub const GENERIC_CLIENT: i64 = 0x22;

/// Severity at or below which an `error` envelope is informational.
pub const SEVERITY_INFO: i64 = 1;

/// File-operation status of a single record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordStatus {
    Valid,
    Info(String),
    Error(String),
    ClientError(String),
    Other,
}

impl RecordStatus {
    pub fn message(&self) -> Option<&str> {
        match self {
            RecordStatus::Info(m) | RecordStatus::Error(m) | RecordStatus::ClientError(m) => {
                Some(m)
            }
            RecordStatus::Valid | RecordStatus::Other => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, RecordStatus::Error(_) | RecordStatus::ClientError(_))
    }
}

/// Derives a [`RecordStatus`] from a raw record. Provided by the executor.
pub trait RecordClassifier: Send + Sync {
    fn classify(&self, record: &Record) -> RecordStatus;
}

/// Classifier for the `-G` envelope: every record carries a `code` field
/// (`stat`, `info` or `error`), errors add `severity`, `generic` and `data`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TaggedClassifier;

impl RecordClassifier for TaggedClassifier {
    fn classify(&self, record: &Record) -> RecordStatus {
        let data = || {
            record
                .get_str("data")
                .map(|d| d.trim_end().to_string())
                .unwrap_or_default()
        };
        match record.get_str("code") {
            Some("stat") => RecordStatus::Valid,
            Some("info") => RecordStatus::Info(data()),
            Some("error") => {
                let severity = record.get_int("severity").unwrap_or(0);
                let generic = record.get_int("generic").unwrap_or(0);
                if severity <= SEVERITY_INFO {
                    RecordStatus::Info(data())
                } else if generic == GENERIC_CLIENT {
                    RecordStatus::ClientError(data())
                } else {
                    RecordStatus::Error(data())
                }
            }
            _ => RecordStatus::Other,
        }
    }
}

// =============================================================================
// Executor
// =============================================================================

/// How to treat the server fingerprint on encrypted transports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrustOptions {
    /// Accept the fingerprint without prompting.
    pub auto_accept: bool,
    /// Replace a previously stored fingerprint.
    pub force: bool,
}

impl TrustOptions {
    pub fn auto_accept() -> Self {
        Self {
            auto_accept: true,
            force: false,
        }
    }
}

/// Streaming command executor for a depot server.
///
/// Implementations own the connection state (port, user, client, ticket).
/// Records must be delivered to the callback in arrival order, on the task
/// that awaits the call.
#[async_trait]
pub trait DepotExecutor: Send {
    /// Open the connection. `trust` is set only for encrypted transports.
    async fn connect(&mut self, uri: &str, trust: Option<TrustOptions>) -> Result<()>;

    async fn disconnect(&mut self) -> Result<()>;

    fn set_user(&mut self, user: &str);

    fn set_charset(&mut self, charset: &str);

    /// Whether the server runs in Unicode mode. Valid after `connect`.
    fn supports_unicode(&self) -> bool;

    /// Password-style login. Rejected credentials fail with
    /// [`DepotError::Authentication`](crate::error::DepotError::Authentication).
    async fn login(&mut self, credential: &str) -> Result<()>;

    /// Human-readable login status, e.g. `User bob ticket expires in 12 hours`.
    /// Rejections are reported in the text, not as errors.
    async fn login_status(&mut self) -> Result<String>;

    /// Use `ticket` for subsequent commands. No network round trip.
    fn set_auth_ticket(&mut self, ticket: &str);

    fn set_client(&mut self, name: Option<&str>);

    fn set_working_dir(&mut self, dir: &Path);

    /// Run `cmd` and push each result record into `callback`.
    ///
    /// `worker_hint` is the worker count for the executor's own fallback
    /// workers when the server requests parallel transfer.
    async fn exec_streaming(
        &mut self,
        cmd: &str,
        args: &[String],
        callback: &mut (dyn StreamCallback + Send),
        worker_hint: Option<u32>,
    ) -> Result<()>;

    /// Run `cmd` and collect all result records. `input` is sent as the form
    /// for `-i` style commands.
    async fn exec_map(
        &mut self,
        cmd: &str,
        args: &[String],
        input: Option<&Record>,
    ) -> Result<Vec<Record>>;

    fn classifier(&self) -> Arc<dyn RecordClassifier> {
        Arc::new(TaggedClassifier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_insert_replaces_in_place() {
        let mut record = Record::new();
        record.insert("depotFile", "//depot/a");
        record.insert("rev", 3);
        record.insert("depotFile", "//depot/b");

        assert_eq!(record.len(), 2);
        assert_eq!(record.get_str("depotFile"), Some("//depot/b"));
        assert_eq!(record.flatten(), "depotFile=//depot/b rev=3 ");
    }

    #[test]
    fn test_value_as_int_parses_text() {
        assert_eq!(Value::from("42").as_int(), Some(42));
        assert_eq!(Value::from(7).as_int(), Some(7));
        assert_eq!(Value::from("abc").as_int(), None);
    }

    #[test]
    fn test_classify_stat_is_valid() {
        let record = Record::new().with("code", "stat").with("depotFile", "//d/f");
        assert_eq!(TaggedClassifier.classify(&record), RecordStatus::Valid);
    }

    #[test]
    fn test_classify_info() {
        let record = Record::new()
            .with("code", "info")
            .with("data", "Client ws saved.\n");
        assert_eq!(
            TaggedClassifier.classify(&record),
            RecordStatus::Info("Client ws saved.".to_string())
        );
    }

    #[test]
    fn test_classify_warning_is_error() {
        // Up-to-date warnings arrive as severity 2 and are routed as errors;
        // callbacks downgrade them through their benign list.
        let record = Record::new()
            .with("code", "error")
            .with("data", "//ws/... - file(s) up-to-date.\n")
            .with("severity", 2)
            .with("generic", 17);
        assert_eq!(
            TaggedClassifier.classify(&record),
            RecordStatus::Error("//ws/... - file(s) up-to-date.".to_string())
        );
    }

    #[test]
    fn test_classify_client_error() {
        let record = Record::new()
            .with("code", "error")
            .with("data", "Can't clobber writable file /ws/a")
            .with("severity", 3)
            .with("generic", GENERIC_CLIENT);
        assert!(matches!(
            TaggedClassifier.classify(&record),
            RecordStatus::ClientError(_)
        ));
    }

    #[test]
    fn test_classify_low_severity_error_is_info() {
        let record = Record::new()
            .with("code", "error")
            .with("data", "note")
            .with("severity", 1);
        assert_eq!(
            TaggedClassifier.classify(&record),
            RecordStatus::Info("note".to_string())
        );
    }

    #[test]
    fn test_classify_unknown_is_other() {
        let record = Record::new().with("totalFileCount", "12");
        assert_eq!(TaggedClassifier.classify(&record), RecordStatus::Other);
        let record = Record::new().with("code", "binary");
        assert_eq!(TaggedClassifier.classify(&record), RecordStatus::Other);
    }
}
