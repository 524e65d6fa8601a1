//! Executor backed by the stock `p4` command-line client.
//!
//! Every command runs as one `p4 -G` subprocess. Records are decoded from
//! stdout as they arrive and pushed into the callback before the next read.

use crate::callback::StreamCallback;
use crate::depot::marshal::{self, RecordDecoder};
use crate::depot::{DepotExecutor, Record, RecordClassifier, TaggedClassifier, TrustOptions};
use crate::error::{DepotError, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;

/// Read size for streaming stdout
const READ_CHUNK_SIZE: usize = 64 * 1024;

/// Text the client prints when the server cannot be reached
const CONNECT_FAILED: &str = "Connect to server failed";

/// Translate `p4java://` style URIs into a P4PORT value.
pub fn normalize_port(uri: &str) -> String {
    if let Some(rest) = uri.strip_prefix("p4javassl://") {
        format!("ssl:{}", rest)
    } else if let Some(rest) = uri.strip_prefix("p4java://") {
        rest.to_string()
    } else {
        uri.to_string()
    }
}

/// Depot executor driving `p4` as a subprocess.
pub struct P4CliExecutor {
    program: PathBuf,
    port: Option<String>,
    user: Option<String>,
    client: Option<String>,
    cwd: Option<PathBuf>,
    charset: Option<String>,
    ticket: Option<String>,
    unicode: bool,
}

impl Default for P4CliExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl P4CliExecutor {
    pub fn new() -> Self {
        Self::with_program("p4")
    }

    /// Use a specific client binary instead of `p4` from PATH.
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            port: None,
            user: None,
            client: None,
            cwd: None,
            charset: None,
            ticket: None,
            unicode: false,
        }
    }

    pub fn port(&self) -> Option<&str> {
        self.port.as_deref()
    }

    /// Global flags in the order the client expects them.
    fn global_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(port) = &self.port {
            args.push("-p".to_string());
            args.push(port.clone());
        }
        if let Some(user) = &self.user {
            args.push("-u".to_string());
            args.push(user.clone());
        }
        if let Some(client) = &self.client {
            args.push("-c".to_string());
            args.push(client.clone());
        }
        if let Some(cwd) = &self.cwd {
            args.push("-d".to_string());
            args.push(cwd.to_string_lossy().into_owned());
        }
        if let Some(charset) = &self.charset {
            args.push("-C".to_string());
            args.push(charset.clone());
        }
        if let Some(ticket) = &self.ticket {
            args.push("-P".to_string());
            args.push(ticket.clone());
        }
        args
    }

    fn command(&self, tagged: bool, cmd: &str, args: &[String]) -> Command {
        let globals = self.global_args();
        let args = order_args(args);

        let mut shown: Vec<&str> = Vec::with_capacity(globals.len() + args.len() + 2);
        let mut redact = false;
        for g in &globals {
            shown.push(if redact { "********" } else { g.as_str() });
            redact = g == "-P";
        }
        tracing::debug!(
            "exec: {} {}{} {} {}",
            self.program.display(),
            if tagged { "-G " } else { "" },
            shown.join(" "),
            cmd,
            args.join(" ")
        );

        let mut command = Command::new(&self.program);
        if tagged {
            command.arg("-G");
        }
        command.args(&globals);
        command.arg(cmd);
        command.args(&args);
        command.stdin(Stdio::null());
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());
        command.kill_on_drop(true);
        command
    }

    /// Run a plain (untagged) command, returning exit status and combined output.
    async fn run_text(
        &self,
        cmd: &str,
        args: &[String],
        input: Option<&str>,
    ) -> Result<(ExitStatus, String)> {
        let mut command = self.command(false, cmd, args);
        if input.is_some() {
            command.stdin(Stdio::piped());
        }
        let mut child = command.spawn()?;

        if let Some(text) = input {
            if let Some(mut stdin) = child.stdin.take() {
                stdin.write_all(text.as_bytes()).await?;
                stdin.write_all(b"\n").await?;
                stdin.shutdown().await?;
            }
        }

        let output = child.wait_with_output().await?;
        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok((output.status, text.trim().to_string()))
    }

    /// Run a `-G` command and collect every record.
    async fn run_tagged(
        &self,
        cmd: &str,
        args: &[String],
        input: Option<&Record>,
    ) -> Result<(ExitStatus, Vec<Record>, String)> {
        let mut command = self.command(true, cmd, args);
        if input.is_some() {
            command.stdin(Stdio::piped());
        }
        let mut child = command.spawn()?;

        if let Some(form) = input {
            if let Some(mut stdin) = child.stdin.take() {
                stdin.write_all(&marshal::encode_record(form)).await?;
                stdin.shutdown().await?;
            }
        }

        let output = child.wait_with_output().await?;
        let mut decoder = RecordDecoder::new();
        decoder.feed(&output.stdout);
        let mut records = Vec::new();
        while let Some(record) = decoder.next_record()? {
            records.push(record);
        }
        if decoder.pending() > 0 {
            return Err(DepotError::Marshal(format!(
                "Truncated output from '{}': {} trailing bytes",
                cmd,
                decoder.pending()
            )));
        }
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        Ok((output.status, records, stderr))
    }
}

/// Bracket [`read_records`] with `start_results` / `end_results`. The end
/// call happens on every exit path, errors included.
async fn stream_records<R: AsyncRead + Unpin>(
    reader: &mut R,
    callback: &mut (dyn StreamCallback + Send),
    cmd: &str,
) -> Result<(u64, bool)> {
    callback.start_results(0);
    let result = read_records(reader, callback, cmd).await;
    callback.end_results(0);
    result
}

/// Decode records from `reader` into `callback` until end of stream or the
/// callback asks to stop. Returns (records delivered, stopped early).
async fn read_records<R: AsyncRead + Unpin>(
    reader: &mut R,
    callback: &mut (dyn StreamCallback + Send),
    cmd: &str,
) -> Result<(u64, bool)> {
    let mut decoder = RecordDecoder::new();
    let mut chunk = vec![0u8; READ_CHUNK_SIZE];
    let mut count = 0u64;

    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        decoder.feed(&chunk[..n]);
        while let Some(record) = decoder.next_record()? {
            count += 1;
            if !callback.handle_result(0, &record) {
                return Ok((count, true));
            }
        }
    }

    if decoder.pending() > 0 {
        return Err(DepotError::Marshal(format!(
            "Truncated output from '{}': {} trailing bytes",
            cmd,
            decoder.pending()
        )));
    }
    Ok((count, false))
}

/// Move `--long=value` options ahead of the first positional argument.
/// The client stops option parsing at the first file argument.
fn order_args(args: &[String]) -> Vec<String> {
    let (long, rest): (Vec<&String>, Vec<&String>) =
        args.iter().partition(|a| a.starts_with("--"));
    let first_positional = rest
        .iter()
        .position(|a| !a.starts_with('-'))
        .unwrap_or(rest.len());

    let mut ordered = Vec::with_capacity(args.len());
    ordered.extend(rest[..first_positional].iter().map(|a| a.to_string()));
    ordered.extend(long.into_iter().cloned());
    ordered.extend(rest[first_positional..].iter().map(|a| a.to_string()));
    ordered
}

fn failure_message(status: ExitStatus, stderr: &str) -> String {
    if stderr.is_empty() {
        format!("p4 exited with {}", status)
    } else {
        stderr.to_string()
    }
}

#[async_trait]
impl DepotExecutor for P4CliExecutor {
    async fn connect(&mut self, uri: &str, trust: Option<TrustOptions>) -> Result<()> {
        self.port = Some(normalize_port(uri));

        if let Some(trust) = trust.filter(|t| t.auto_accept) {
            let mut args = vec!["-y".to_string()];
            if trust.force {
                args.push("-f".to_string());
            }
            let (status, text) = self.run_text("trust", &args, None).await?;
            if !status.success() {
                return Err(DepotError::Connection(format!("trust failed: {}", text)));
            }
        }

        let (status, records, stderr) = self
            .run_tagged("info", &[], None)
            .await
            .map_err(|e| DepotError::Connection(e.to_string()))?;

        let classifier = TaggedClassifier;
        let info = records
            .iter()
            .find(|r| r.contains_key("serverAddress") || r.contains_key("serverVersion"));
        match info {
            Some(record) => {
                self.unicode = record.get_str("unicode") == Some("enabled");
                tracing::debug!(
                    "connected to {} ({})",
                    self.port.as_deref().unwrap_or_default(),
                    record.get_str("serverVersion").unwrap_or("unknown version")
                );
                Ok(())
            }
            None => {
                let message = records
                    .iter()
                    .filter_map(|r| classifier.classify(r).message().map(str::to_string))
                    .next()
                    .unwrap_or_else(|| failure_message(status, &stderr));
                Err(DepotError::Connection(message))
            }
        }
    }

    async fn disconnect(&mut self) -> Result<()> {
        // Each command is its own process; nothing stays open.
        self.unicode = false;
        Ok(())
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
        let (status, text) = self.run_text("login", &[], Some(credential)).await?;
        if status.success() {
            return Ok(());
        }
        if text.contains(CONNECT_FAILED) {
            Err(DepotError::Connection(text))
        } else {
            Err(DepotError::Authentication(text))
        }
    }

    async fn login_status(&mut self) -> Result<String> {
        let (_, text) = self.run_text("login", &["-s".to_string()], None).await?;
        Ok(text)
    }

    fn set_auth_ticket(&mut self, ticket: &str) {
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
        if let Some(workers) = worker_hint {
            // The client forks its own transfer workers for --parallel.
            tracing::debug!("{}: parallel transfer with {} workers", cmd, workers);
        }

        let mut child = self.command(true, cmd, args).spawn()?;
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| DepotError::command(cmd, "failed to open stdout"))?;
        let stderr = child.stderr.take();

        let records_task = stream_records(&mut stdout, callback, cmd);

        let read_stderr = async {
            let mut buf = Vec::new();
            if let Some(mut err) = stderr {
                err.read_to_end(&mut buf).await?;
            }
            Ok::<_, std::io::Error>(buf)
        };

        let (records, stderr) = tokio::join!(records_task, read_stderr);
        let (count, stopped) = records?;
        let stderr = String::from_utf8_lossy(&stderr?).trim().to_string();

        if stopped {
            child.kill().await?;
            return Ok(());
        }

        let status = child.wait().await?;
        if !status.success() && count == 0 {
            return Err(DepotError::command(cmd, failure_message(status, &stderr)));
        }
        if !stderr.is_empty() {
            tracing::debug!("{} stderr: {}", cmd, stderr);
        }
        Ok(())
    }

    async fn exec_map(
        &mut self,
        cmd: &str,
        args: &[String],
        input: Option<&Record>,
    ) -> Result<Vec<Record>> {
        let (status, records, stderr) = self.run_tagged(cmd, args, input).await?;
        if !status.success() && records.is_empty() {
            return Err(DepotError::command(cmd, failure_message(status, &stderr)));
        }
        Ok(records)
    }

    fn classifier(&self) -> Arc<dyn RecordClassifier> {
        Arc::new(TaggedClassifier)
    }
}
