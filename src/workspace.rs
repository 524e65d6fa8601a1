//! Workspace (client) definitions and their server-side records.
//!
//! A [`WorkspaceSpec`] is the caller's declarative description. [`build`]
//! turns it into a [`ServerWorkspace`], which travels to the server as a
//! `client -i` form:
//!
//! ```text
//! Client, Owner, Host, Description, Root, Options, LineEnd, [Stream], View0..ViewN
//! ```

use crate::depot::{DepotExecutor, Record, RecordClassifier};
use crate::error::{DepotError, Result};
use crate::session::Session;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

// =============================================================================
// Line endings
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineEnd {
    #[default]
    Local,
    Unix,
    Mac,
    Win,
    Share,
}

impl LineEnd {
    pub fn as_str(&self) -> &'static str {
        match self {
            LineEnd::Local => "local",
            LineEnd::Unix => "unix",
            LineEnd::Mac => "mac",
            LineEnd::Win => "win",
            LineEnd::Share => "share",
        }
    }
}

impl fmt::Display for LineEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LineEnd {
    type Err = DepotError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(LineEnd::Local),
            "unix" => Ok(LineEnd::Unix),
            "mac" => Ok(LineEnd::Mac),
            "win" => Ok(LineEnd::Win),
            "share" => Ok(LineEnd::Share),
            other => Err(DepotError::Config(format!("unknown line ending '{}'", other))),
        }
    }
}

// =============================================================================
// Options
// =============================================================================

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct WorkspaceOptions: u8 {
        const ALLWRITE = 1 << 0;
        const CLOBBER = 1 << 1;
        const COMPRESS = 1 << 2;
        const LOCKED = 1 << 3;
        const MODTIME = 1 << 4;
        const RMDIR = 1 << 5;
    }
}

/// (flag, set word, unset word) in form order.
const OPTION_WORDS: [(WorkspaceOptions, &str, &str); 6] = [
    (WorkspaceOptions::ALLWRITE, "allwrite", "noallwrite"),
    (WorkspaceOptions::CLOBBER, "clobber", "noclobber"),
    (WorkspaceOptions::COMPRESS, "compress", "nocompress"),
    (WorkspaceOptions::LOCKED, "locked", "unlocked"),
    (WorkspaceOptions::MODTIME, "modtime", "nomodtime"),
    (WorkspaceOptions::RMDIR, "rmdir", "normdir"),
];

impl WorkspaceOptions {
    /// Form rendering, e.g. `noallwrite clobber nocompress unlocked nomodtime rmdir`.
    pub fn to_form(&self) -> String {
        OPTION_WORDS
            .iter()
            .map(|(flag, on, off)| if self.contains(*flag) { *on } else { *off })
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Parse whitespace-separated option words. Words may appear in any order
    /// and absent words leave the flag unset. Words this crate does not model
    /// (newer servers add `altsync`/`noaltsync`) are skipped.
    pub fn parse(s: &str) -> Self {
        let mut options = WorkspaceOptions::empty();
        for word in s.split_whitespace() {
            match OPTION_WORDS
                .iter()
                .find(|(_, on, off)| *on == word || *off == word)
            {
                Some((flag, on, _)) => options.set(*flag, *on == word),
                None => tracing::debug!("Skipping unknown workspace option '{}'", word),
            }
        }
        options
    }
}

impl Serialize for WorkspaceOptions {
    fn serialize<S: serde::Serializer>(
        &self,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_form())
    }
}

impl<'de> Deserialize<'de> for WorkspaceOptions {
    fn deserialize<D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(WorkspaceOptions::parse(&s))
    }
}

// =============================================================================
// View
// =============================================================================

/// Depot pattern to client pattern, e.g. `//depot/main/...` -> `//ws/...`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewMapping {
    pub depot: String,
    pub client: String,
}

impl ViewMapping {
    pub fn new(depot: impl Into<String>, client: impl Into<String>) -> Self {
        Self {
            depot: depot.into(),
            client: client.into(),
        }
    }
}

/// A view mapping with its position. Later entries override earlier ones,
/// so the position must match the order the caller gave.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewEntry {
    pub position: usize,
    pub depot: String,
    pub client: String,
}

impl ViewEntry {
    /// `<depot> <client>`, each side quoted when it contains whitespace.
    pub fn to_line(&self) -> String {
        format!("{} {}", quote(&self.depot), quote(&self.client))
    }

    pub fn parse_line(position: usize, line: &str) -> Result<Self> {
        let tokens = split_view_line(line);
        match tokens.as_slice() {
            [depot, client] => Ok(Self {
                position,
                depot: depot.clone(),
                client: client.clone(),
            }),
            _ => Err(DepotError::Config(format!("malformed view line '{}'", line))),
        }
    }
}

fn quote(pattern: &str) -> String {
    if pattern.chars().any(char::is_whitespace) {
        format!("\"{}\"", pattern)
    } else {
        pattern.to_string()
    }
}

fn split_view_line(line: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut started = false;

    for c in line.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                started = true;
            }
            c if c.is_whitespace() && !in_quotes => {
                if started {
                    tokens.push(std::mem::take(&mut current));
                    started = false;
                }
            }
            c => {
                current.push(c);
                started = true;
            }
        }
    }
    if started {
        tokens.push(current);
    }
    tokens
}

/// Assign positions in list order.
pub fn build_view(mappings: Vec<ViewMapping>) -> Vec<ViewEntry> {
    mappings
        .into_iter()
        .enumerate()
        .map(|(position, m)| ViewEntry {
            position,
            depot: m.depot,
            client: m.client,
        })
        .collect()
}

// =============================================================================
// Spec and record
// =============================================================================

/// Caller-side workspace definition.
///
/// Stream workspaces derive their view from the stream, so `mappings` is only
/// used when `stream` is unset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub root: PathBuf,
    #[serde(default)]
    pub line_end: LineEnd,
    #[serde(default)]
    pub options: WorkspaceOptions,
    #[serde(default)]
    pub stream: Option<String>,
    #[serde(default)]
    pub mappings: Option<Vec<ViewMapping>>,
}

impl WorkspaceSpec {
    pub fn new(name: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            root: root.into(),
            line_end: LineEnd::default(),
            options: WorkspaceOptions::default(),
            stream: None,
            mappings: None,
        }
    }
}

/// Server-side workspace record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerWorkspace {
    pub name: String,
    pub owner: String,
    pub host: String,
    pub description: String,
    pub root: PathBuf,
    pub options: WorkspaceOptions,
    pub line_end: LineEnd,
    pub stream: Option<String>,
    pub view: Option<Vec<ViewEntry>>,
}

impl ServerWorkspace {
    /// Form dictionary for `client -i`.
    pub fn to_form(&self) -> Record {
        let mut form = Record::new()
            .with("Client", self.name.as_str())
            .with("Owner", self.owner.as_str())
            .with("Host", self.host.as_str())
            .with("Description", self.description.as_str())
            .with("Root", self.root.to_string_lossy().into_owned())
            .with("Options", self.options.to_form())
            .with("LineEnd", self.line_end.as_str());
        if let Some(stream) = &self.stream {
            form.insert("Stream", stream.as_str());
        }
        if let Some(view) = &self.view {
            let mut entries: Vec<&ViewEntry> = view.iter().collect();
            entries.sort_by_key(|e| e.position);
            for entry in entries {
                form.insert(format!("View{}", entry.position), entry.to_line());
            }
        }
        form
    }

    /// Parse a `client -o` form.
    pub fn from_form(form: &Record) -> Result<Self> {
        let text = |key: &str| form.get_str(key).unwrap_or_default().to_string();
        let name = form
            .get_str("Client")
            .ok_or_else(|| DepotError::Config("workspace form has no Client field".to_string()))?
            .to_string();

        let mut view = Vec::new();
        while let Some(line) = form.get_str(&format!("View{}", view.len())) {
            view.push(ViewEntry::parse_line(view.len(), line)?);
        }

        Ok(Self {
            name,
            owner: text("Owner"),
            host: text("Host"),
            description: text("Description").trim_end().to_string(),
            root: PathBuf::from(text("Root")),
            options: WorkspaceOptions::parse(&text("Options")),
            line_end: match form.get_str("LineEnd") {
                Some(s) => s.parse()?,
                None => LineEnd::default(),
            },
            stream: form.get_str("Stream").map(str::to_string),
            view: if view.is_empty() { None } else { Some(view) },
        })
    }
}

/// Local machine name for the Host field.
pub fn local_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string())
}

// =============================================================================
// Builder
// =============================================================================

/// Translate `spec` into the record the session will register.
pub fn build<E: DepotExecutor>(session: &Session<E>, spec: WorkspaceSpec) -> ServerWorkspace {
    let view = match (&spec.stream, spec.mappings) {
        (None, Some(mappings)) => Some(build_view(mappings)),
        (Some(stream), Some(_)) => {
            tracing::warn!(
                "Workspace {} uses stream {}, ignoring configured view",
                spec.name,
                stream
            );
            None
        }
        (_, None) => None,
    };

    ServerWorkspace {
        name: spec.name,
        owner: session.user().to_string(),
        host: local_hostname(),
        description: spec.description,
        root: spec.root,
        options: spec.options,
        line_end: spec.line_end,
        stream: spec.stream,
        view,
    }
}

/// Server messages carried by informational records, one per line.
fn messages(records: &[Record], classifier: &dyn RecordClassifier) -> String {
    records
        .iter()
        .filter_map(|r| classifier.classify(r).message().map(str::to_string))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Create or update `workspace` on the server. Returns the server's message.
pub async fn register<E: DepotExecutor>(
    session: &mut Session<E>,
    workspace: &ServerWorkspace,
) -> Result<String> {
    let form = workspace.to_form();
    let records = session
        .run_map("client", &["-i".to_string()], Some(&form))
        .await?;
    let result = messages(&records, session.classifier().as_ref());
    tracing::info!("{}", result);
    Ok(result)
}

/// Build and register in one step.
pub async fn create<E: DepotExecutor>(
    session: &mut Session<E>,
    spec: WorkspaceSpec,
) -> Result<ServerWorkspace> {
    let workspace = build(session, spec);
    register(session, &workspace).await?;
    Ok(workspace)
}

/// Delete a workspace. `force` also deletes workspaces owned by others or
/// with opened files.
pub async fn delete<E: DepotExecutor>(
    session: &mut Session<E>,
    name: &str,
    force: bool,
) -> Result<String> {
    let mut args = vec!["-d".to_string()];
    if force {
        args.push("-f".to_string());
    }
    args.push(name.to_string());

    let records = session.run_map("client", &args, None).await?;
    Ok(messages(&records, session.classifier().as_ref()))
}
