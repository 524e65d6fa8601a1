//! Configuration file and environment overrides.
//!
//! ```toml
//! [server]
//! port = "ssl:perforce:1666"
//! user = "builder"
//! password = "..."        # password or ticket
//! charset = "utf8"
//!
//! [workspace]
//! name = "build-ws"
//! root = "/data/build-ws"
//! options = "allwrite clobber"
//! mappings = [{ depot = "//depot/main/...", client = "//build-ws/..." }]
//!
//! [sync]
//! force_update = false
//!
//! [parallel]
//! threads = 4
//! ```
//!
//! `P4PORT`, `P4USER`, `P4PASSWD`, `P4CHARSET` and `P4CLIENT` override the
//! file.

use crate::error::{DepotError, Result};
use crate::session::ConnectParams;
use crate::sync::{ParallelOptions, SyncOptions};
use crate::workspace::WorkspaceSpec;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: String,
    pub user: String,
    pub password: Option<String>,
    pub charset: Option<String>,
    /// Depot client binary, `p4` from PATH when unset
    pub program: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub workspace: Option<WorkspaceSpec>,
    pub sync: SyncOptions,
    pub parallel: ParallelOptions,
}

impl Config {
    /// `<config dir>/p4sync/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("p4sync").join("config.toml"))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            DepotError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| DepotError::Config(e.to_string()))
    }

    /// Load `path`, or the default file when it exists, then apply the
    /// environment and validate.
    pub fn resolve(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::load(path)?,
            None => match Self::default_path().filter(|p| p.exists()) {
                Some(path) => Self::load(&path)?,
                None => Self::default(),
            },
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env(&mut self) {
        self.apply_env_with(|key| std::env::var(key).ok().filter(|v| !v.is_empty()));
    }

    fn apply_env_with(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(port) = var("P4PORT") {
            self.server.port = port;
        }
        if let Some(user) = var("P4USER") {
            self.server.user = user;
        }
        if let Some(password) = var("P4PASSWD") {
            self.server.password = Some(password);
        }
        if let Some(charset) = var("P4CHARSET") {
            self.server.charset = Some(charset);
        }
        if let (Some(client), Some(workspace)) = (var("P4CLIENT"), self.workspace.as_mut()) {
            workspace.name = client;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.port.trim().is_empty() {
            return Err(DepotError::Config(
                "server port is not set (config [server].port or P4PORT)".to_string(),
            ));
        }
        if self.server.user.trim().is_empty() {
            return Err(DepotError::Config(
                "server user is not set (config [server].user or P4USER)".to_string(),
            ));
        }
        if let Some(ws) = &self.workspace {
            if ws.name.trim().is_empty() {
                return Err(DepotError::Config("workspace name is empty".to_string()));
            }
        }
        Ok(())
    }

    pub fn connect_params(&self) -> ConnectParams {
        ConnectParams {
            uri: self.server.port.clone(),
            user: self.server.user.clone(),
            password: self.server.password.clone(),
            charset: self.server.charset.clone(),
        }
    }

    pub fn workspace(&self) -> Result<&WorkspaceSpec> {
        self.workspace
            .as_ref()
            .ok_or_else(|| DepotError::Config("no [workspace] section configured".to_string()))
    }
}
