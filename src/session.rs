//! Depot session - connection, trust, charset and login.
//!
//! A session is authenticated once at construction. The current workspace is
//! an explicit field; per-workspace commands check it before issuing anything.

use crate::callback::{CallbackTask, LogSink, ResultCallback, StreamCallback, TracingSink};
use crate::depot::{DepotExecutor, Record, RecordClassifier, RecordStatus, TrustOptions};
use crate::error::{DepotError, Result};
use crate::workspace::ServerWorkspace;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Charset value meaning "use the server default".
pub const CHARSET_NONE: &str = "none";

/// Port prefixes that select an encrypted transport.
const SSL_PREFIXES: [&str; 6] = ["ssl:", "ssl4:", "ssl6:", "ssl46:", "ssl64:", "p4javassl://"];

/// Whether `uri` selects an encrypted transport.
pub fn is_encrypted(uri: &str) -> bool {
    SSL_PREFIXES.iter().any(|p| uri.starts_with(p))
}

/// Whether a login status text means commands will be accepted.
pub fn is_valid_login_status(status: &str) -> bool {
    status.contains("ticket expires") || status.contains("not necessary") || status.is_empty()
}

#[derive(Debug, Clone)]
pub struct ConnectParams {
    pub uri: String,
    pub user: String,
    /// Password or pre-issued ticket; which one is not known up front.
    pub password: Option<String>,
    pub charset: Option<String>,
}

impl ConnectParams {
    pub fn new(uri: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            user: user.into(),
            password: None,
            charset: None,
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_charset(mut self, charset: impl Into<String>) -> Self {
        self.charset = Some(charset.into());
        self
    }
}

/// Workspace the session's commands run against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentWorkspace {
    pub name: String,
    pub root: PathBuf,
}

/// Login fallback: password first, then the same credential as a ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AuthState {
    Unauthenticated,
    PasswordLogin,
    PasswordRejected,
    Verify,
}

/// Submitted changelist as listed by `changes`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangelistSummary {
    pub id: i64,
    pub user: String,
    pub client: String,
    pub time: Option<DateTime<Utc>>,
    pub status: String,
    pub description: String,
}

impl ChangelistSummary {
    fn from_record(record: &Record) -> Option<Self> {
        let id = record.get_int("change")?;
        let text = |key: &str| record.get_str(key).unwrap_or_default().to_string();
        Some(Self {
            id,
            user: text("user"),
            client: text("client"),
            time: record
                .get_int("time")
                .and_then(|t| DateTime::<Utc>::from_timestamp(t, 0)),
            status: text("status"),
            description: text("desc").trim_end().to_string(),
        })
    }
}

pub struct Session<E> {
    executor: E,
    user: String,
    credential: Option<String>,
    current: Option<CurrentWorkspace>,
    sink: Arc<dyn LogSink>,
}

impl<E> fmt::Debug for Session<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("user", &self.user)
            .field("current", &self.current)
            .finish_non_exhaustive()
    }
}

impl<E: DepotExecutor> Session<E> {
    /// Connect and authenticate, logging records through `tracing`.
    pub async fn connect(executor: E, params: ConnectParams) -> Result<Self> {
        Self::connect_with_sink(executor, params, Arc::new(TracingSink)).await
    }

    pub async fn connect_with_sink(
        mut executor: E,
        params: ConnectParams,
        sink: Arc<dyn LogSink>,
    ) -> Result<Self> {
        executor.set_user(&params.user);

        // Encrypted ports accept the server fingerprint without prompting.
        let trust = is_encrypted(&params.uri).then(TrustOptions::auto_accept);
        executor.connect(&params.uri, trust).await?;

        let mut session = Self {
            executor,
            user: params.user,
            credential: params.password,
            current: None,
            sink,
        };
        session.apply_charset(params.charset.as_deref().unwrap_or(CHARSET_NONE));
        session.authenticate().await?;
        Ok(session)
    }

    fn apply_charset(&mut self, charset: &str) {
        if self.executor.supports_unicode() && charset != CHARSET_NONE {
            tracing::info!("Connection uses charset {}", charset);
            self.executor.set_charset(charset);
        } else {
            tracing::info!(
                "Server does not support unicode, charset {} was ignored",
                charset
            );
        }
    }

    /// Log in unless the current login state is already valid.
    pub async fn authenticate(&mut self) -> Result<()> {
        let mut state = AuthState::Unauthenticated;
        loop {
            state = match state {
                AuthState::Unauthenticated => {
                    let status = self.executor.login_status().await?;
                    if is_valid_login_status(&status) {
                        tracing::info!("Already logged in: {}", status);
                        return Ok(());
                    }
                    AuthState::PasswordLogin
                }
                AuthState::PasswordLogin => match &self.credential {
                    Some(credential) => match self.executor.login(credential).await {
                        Ok(()) => AuthState::Verify,
                        Err(e) if e.is_authentication() => {
                            tracing::debug!("Password login rejected, trying ticket: {}", e);
                            AuthState::PasswordRejected
                        }
                        Err(e) => return Err(e),
                    },
                    None => AuthState::Verify,
                },
                AuthState::PasswordRejected => {
                    // Binds the server id; tickets are looked up by it later.
                    self.executor.login_status().await?;
                    if let Some(ticket) = &self.credential {
                        self.executor.set_auth_ticket(ticket);
                    }
                    AuthState::Verify
                }
                AuthState::Verify => {
                    let status = self.executor.login_status().await?;
                    if !is_valid_login_status(&status) {
                        return Err(DepotError::Authentication(
                            "invalid credentials".to_string(),
                        ));
                    }
                    tracing::info!("Login succeeded: {}", status);
                    return Ok(());
                }
            };
        }
    }

    pub async fn is_logged_in(&mut self) -> Result<bool> {
        let status = self.executor.login_status().await?;
        Ok(is_valid_login_status(&status))
    }

    /// Make `workspace` current and move the working directory to its root.
    pub fn select_workspace(&mut self, workspace: &ServerWorkspace) {
        self.executor.set_client(Some(&workspace.name));
        self.executor.set_working_dir(&workspace.root);
        self.current = Some(CurrentWorkspace {
            name: workspace.name.clone(),
            root: workspace.root.clone(),
        });
    }

    /// Fail unless `name` is the current workspace (case-insensitive).
    pub fn require_current(&self, name: &str) -> Result<()> {
        match &self.current {
            Some(current) if current.name.eq_ignore_ascii_case(name) => Ok(()),
            _ => Err(DepotError::Request("client not current".to_string())),
        }
    }

    pub fn current_workspace(&self) -> Option<&CurrentWorkspace> {
        self.current.as_ref()
    }

    pub fn working_dir(&self) -> Option<&Path> {
        self.current.as_ref().map(|c| c.root.as_path())
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    pub fn executor_mut(&mut self) -> &mut E {
        &mut self.executor
    }

    pub fn classifier(&self) -> Arc<dyn RecordClassifier> {
        self.executor.classifier()
    }

    pub fn sink(&self) -> Arc<dyn LogSink> {
        self.sink.clone()
    }

    /// Fresh callback for one command invocation.
    pub fn callback<T: CallbackTask>(&self, task: T) -> ResultCallback<T> {
        ResultCallback::new(task, self.classifier(), self.sink())
    }

    /// Run a streaming command against `workspace`, which must be current.
    pub async fn run_streaming(
        &mut self,
        workspace: &str,
        cmd: &str,
        args: &[String],
        callback: &mut (dyn StreamCallback + Send),
        worker_hint: Option<u32>,
    ) -> Result<()> {
        self.require_current(workspace)?;
        self.executor
            .exec_streaming(cmd, args, callback, worker_hint)
            .await
    }

    /// Run a collecting command; the first error record fails it.
    pub async fn run_map(
        &mut self,
        cmd: &str,
        args: &[String],
        input: Option<&Record>,
    ) -> Result<Vec<Record>> {
        let records = self.executor.exec_map(cmd, args, input).await?;
        let classifier = self.classifier();
        for record in &records {
            if let RecordStatus::Error(msg) | RecordStatus::ClientError(msg) =
                classifier.classify(record)
            {
                return Err(DepotError::command(cmd, msg));
            }
        }
        Ok(records)
    }

    /// Look up a workspace. `None` when the server only returns a template.
    pub async fn get_workspace(&mut self, name: &str) -> Result<Option<ServerWorkspace>> {
        let args = vec!["-o".to_string(), name.to_string()];
        let records = self.run_map("client", &args, None).await?;
        let form = records.iter().find(|r| r.contains_key("Client"));
        match form {
            Some(record) if record.contains_key("Access") || record.contains_key("Update") => {
                ServerWorkspace::from_form(record).map(Some)
            }
            _ => Ok(None),
        }
    }

    /// Most recent submitted changelists, newest first. `max <= 0` lists all.
    pub async fn submitted_changes(&mut self, max: i32) -> Result<Vec<ChangelistSummary>> {
        let mut args = Vec::new();
        if max > 0 {
            args.push(format!("-m{}", max));
        }
        args.push("-s".to_string());
        args.push("submitted".to_string());

        let records = self.run_map("changes", &args, None).await?;
        Ok(records
            .iter()
            .filter_map(ChangelistSummary::from_record)
            .collect())
    }

    /// Best-effort disconnect. Never fails.
    pub async fn close(&mut self) {
        self.current = None;
        if let Err(e) = self.executor.disconnect().await {
            tracing::debug!("Ignoring disconnect failure: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypted_prefixes() {
        assert!(is_encrypted("ssl:perforce:1666"));
        assert!(is_encrypted("ssl64:perforce:1666"));
        assert!(is_encrypted("p4javassl://perforce:1666"));
        assert!(!is_encrypted("p4java://perforce:1666"));
        assert!(!is_encrypted("tcp:perforce:1666"));
        assert!(!is_encrypted("perforce:1666"));
    }

    #[test]
    fn test_valid_login_status() {
        assert!(is_valid_login_status(
            "User builder ticket expires in 11 hours 59 minutes."
        ));
        assert!(is_valid_login_status(
            "'login' not necessary, no password set for this user."
        ));
        assert!(is_valid_login_status(""));
        assert!(!is_valid_login_status(
            "Perforce password (P4PASSWD) invalid or unset."
        ));
    }

    #[test]
    fn test_changelist_from_record() {
        let record = Record::new()
            .with("code", "stat")
            .with("change", "1042")
            .with("time", "1700000000")
            .with("user", "alice")
            .with("client", "alice-ws")
            .with("status", "submitted")
            .with("desc", "Fix build\n");
        let change = ChangelistSummary::from_record(&record).unwrap();
        assert_eq!(change.id, 1042);
        assert_eq!(change.description, "Fix build");
        assert_eq!(change.time.unwrap().timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_changelist_requires_id() {
        let record = Record::new().with("code", "stat").with("user", "alice");
        assert!(ChangelistSummary::from_record(&record).is_none());
    }
}
