//! Scripted depot executor and in-memory log sink shared by integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use p4sync::{
    ConnectParams, DepotError, DepotExecutor, LogSink, Record, Result, Session, Severity,
    StreamCallback, TrustOptions,
};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

pub const VALID_STATUS: &str = "User builder ticket expires in 12 hours 0 minutes.";
pub const INVALID_STATUS: &str = "Perforce password (P4PASSWD) invalid or unset.";
pub const NOT_NECESSARY_STATUS: &str = "'login' not necessary, no password set for this user.";

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Connect {
        uri: String,
        trust: Option<TrustOptions>,
    },
    Login(String),
    LoginStatus,
    SetTicket(String),
    Exec {
        cmd: String,
        args: Vec<String>,
        client: Option<String>,
        worker_hint: Option<u32>,
    },
    Map {
        cmd: String,
        args: Vec<String>,
        input: Option<Record>,
    },
    Disconnect,
}

/// How the fake answers a password login.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginOutcome {
    Accept,
    Reject,
    Unreachable,
}

pub struct FakeExecutor {
    pub calls: Vec<Call>,
    /// Login status answers, in order. `default_status` once drained.
    pub statuses: VecDeque<String>,
    pub default_status: String,
    pub login_outcome: LoginOutcome,
    pub connect_error: Option<String>,
    pub disconnect_fails: bool,
    pub unicode: bool,
    pub user: Option<String>,
    pub charset: Option<String>,
    pub ticket: Option<String>,
    pub client: Option<String>,
    pub cwd: Option<PathBuf>,
    /// Records for successive streaming commands.
    pub streams: VecDeque<Vec<Record>>,
    /// Records for successive collecting commands.
    pub maps: VecDeque<Vec<Record>>,
    /// Streaming command name that fails at the transport level.
    pub fail_command: Option<String>,
}

impl FakeExecutor {
    /// Executor whose login status is already valid.
    pub fn logged_in() -> Self {
        Self::with_statuses(&[], VALID_STATUS)
    }

    pub fn with_statuses(statuses: &[&str], default_status: &str) -> Self {
        Self {
            calls: Vec::new(),
            statuses: statuses.iter().map(|s| s.to_string()).collect(),
            default_status: default_status.to_string(),
            login_outcome: LoginOutcome::Accept,
            connect_error: None,
            disconnect_fails: false,
            unicode: false,
            user: None,
            charset: None,
            ticket: None,
            client: None,
            cwd: None,
            streams: VecDeque::new(),
            maps: VecDeque::new(),
            fail_command: None,
        }
    }

    pub fn stream(mut self, records: Vec<Record>) -> Self {
        self.streams.push_back(records);
        self
    }

    pub fn map(mut self, records: Vec<Record>) -> Self {
        self.maps.push_back(records);
        self
    }

    pub fn logins(&self) -> usize {
        self.calls
            .iter()
            .filter(|c| matches!(c, Call::Login(_)))
            .count()
    }

    pub fn status_queries(&self) -> usize {
        self.calls
            .iter()
            .filter(|c| matches!(c, Call::LoginStatus))
            .count()
    }

    /// (cmd, args, worker hint) of every streaming command, in order.
    pub fn execs(&self) -> Vec<(String, Vec<String>, Option<u32>)> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                Call::Exec {
                    cmd,
                    args,
                    worker_hint,
                    ..
                } => Some((cmd.clone(), args.clone(), *worker_hint)),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl DepotExecutor for FakeExecutor {
    async fn connect(&mut self, uri: &str, trust: Option<TrustOptions>) -> Result<()> {
        self.calls.push(Call::Connect {
            uri: uri.to_string(),
            trust,
        });
        match &self.connect_error {
            Some(msg) => Err(DepotError::Connection(msg.clone())),
            None => Ok(()),
        }
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.calls.push(Call::Disconnect);
        if self.disconnect_fails {
            Err(DepotError::Connection("socket already closed".to_string()))
        } else {
            Ok(())
        }
    }

    fn set_user(&mut self, user: &str) {
        self.user = Some(user.to_string());
    }

    fn set_charset(&mut self, charset: &str) {
        self.charset = Some(charset.to_string());
    }

    fn supports_unicode(&self) -> bool {
        self.unicode
    }

    async fn login(&mut self, credential: &str) -> Result<()> {
        self.calls.push(Call::Login(credential.to_string()));
        match self.login_outcome {
            LoginOutcome::Accept => Ok(()),
            LoginOutcome::Reject => Err(DepotError::Authentication(
                "Password invalid.".to_string(),
            )),
            LoginOutcome::Unreachable => Err(DepotError::Connection(
                "Connect to server failed".to_string(),
            )),
        }
    }

    async fn login_status(&mut self) -> Result<String> {
        self.calls.push(Call::LoginStatus);
        Ok(self
            .statuses
            .pop_front()
            .unwrap_or_else(|| self.default_status.clone()))
    }

    fn set_auth_ticket(&mut self, ticket: &str) {
        self.calls.push(Call::SetTicket(ticket.to_string()));
        self.ticket = Some(ticket.to_string());
    }

    fn set_client(&mut self, name: Option<&str>) {
        self.client = name.map(str::to_string);
    }

    fn set_working_dir(&mut self, dir: &Path) {
        self.cwd = Some(dir.to_path_buf());
    }

    async fn exec_streaming(
        &mut self,
        cmd: &str,
        args: &[String],
        callback: &mut (dyn StreamCallback + Send),
        worker_hint: Option<u32>,
    ) -> Result<()> {
        self.calls.push(Call::Exec {
            cmd: cmd.to_string(),
            args: args.to_vec(),
            client: self.client.clone(),
            worker_hint,
        });
        if self.fail_command.as_deref() == Some(cmd) {
            return Err(DepotError::command(cmd, "connection reset by peer"));
        }

        let records = self.streams.pop_front().unwrap_or_default();
        callback.start_results(0);
        for record in &records {
            if !callback.handle_result(0, record) {
                break;
            }
        }
        callback.end_results(0);
        Ok(())
    }

    async fn exec_map(
        &mut self,
        cmd: &str,
        args: &[String],
        input: Option<&Record>,
    ) -> Result<Vec<Record>> {
        self.calls.push(Call::Map {
            cmd: cmd.to_string(),
            args: args.to_vec(),
            input: input.cloned(),
        });
        Ok(self.maps.pop_front().unwrap_or_default())
    }
}

#[derive(Default)]
pub struct MemorySink {
    lines: Mutex<Vec<(Severity, String)>>,
}

impl MemorySink {
    pub fn lines(&self) -> Vec<(Severity, String)> {
        self.lines.lock().unwrap().clone()
    }

    pub fn at(&self, severity: Severity) -> Vec<String> {
        self.lines()
            .into_iter()
            .filter(|(s, _)| *s == severity)
            .map(|(_, m)| m)
            .collect()
    }
}

impl LogSink for MemorySink {
    fn log(&self, severity: Severity, message: &str) {
        self.lines
            .lock()
            .unwrap()
            .push((severity, message.to_string()));
    }
}

pub fn params() -> ConnectParams {
    ConnectParams::new("perforce:1666", "builder").with_password("secret")
}

/// Connected session over `executor` with a memory sink.
pub async fn session(executor: FakeExecutor) -> (Session<FakeExecutor>, Arc<MemorySink>) {
    let sink = Arc::new(MemorySink::default());
    let session = Session::connect_with_sink(executor, params(), sink.clone())
        .await
        .expect("session should connect");
    (session, sink)
}

pub fn stat(depot: &str, rev: &str, action: &str, client: &str) -> Record {
    Record::new()
        .with("code", "stat")
        .with("depotFile", depot)
        .with("rev", rev)
        .with("action", action)
        .with("clientFile", client)
}

pub fn info(msg: &str) -> Record {
    Record::new().with("code", "info").with("data", msg).with("level", 0)
}

pub fn warning(msg: &str) -> Record {
    Record::new()
        .with("code", "error")
        .with("data", msg)
        .with("severity", 2)
        .with("generic", 17)
}

pub fn failure(msg: &str) -> Record {
    Record::new()
        .with("code", "error")
        .with("data", msg)
        .with("severity", 3)
        .with("generic", 1)
}
