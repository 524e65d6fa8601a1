//! Error taxonomy for depot sessions and commands.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DepotError {
    /// Transport-level failure. Fatal to the session.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Credentials rejected after every login strategy was tried.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Precondition violated before any command was issued.
    #[error("Request rejected: {0}")]
    Request(String),

    /// A command failed at the transport or protocol level.
    #[error("Command '{command}' failed: {message}")]
    Command { command: String, message: String },

    /// Malformed `-G` output from the depot client.
    #[error("Marshal error: {0}")]
    Marshal(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DepotError {
    pub fn command(command: impl Into<String>, message: impl Into<String>) -> Self {
        DepotError::Command {
            command: command.into(),
            message: message.into(),
        }
    }

    pub fn is_authentication(&self) -> bool {
        matches!(self, DepotError::Authentication(_))
    }

    pub fn is_request(&self) -> bool {
        matches!(self, DepotError::Request(_))
    }
}

pub type Result<T> = std::result::Result<T, DepotError>;
