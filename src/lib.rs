//! p4sync - session manager and command driver for Perforce depot workspaces.
//!
//! # Architecture
//!
//! ```text
//! Session::connect --> workspace::create --> sync / unshelve / cleanup
//!        |                                          |
//!   DepotExecutor  <------- exec_streaming ---------+
//!        |
//!        +--records--> ResultCallback --> LogSink
//! ```
//!
//! The session authenticates once (password first, then the same credential
//! as a ticket), tracks the current workspace, and hands each command a fresh
//! callback that classifies and logs records as they stream in.

pub mod callback;
pub mod config;
pub mod depot;
pub mod error;
pub mod reconcile;
pub mod session;
pub mod sync;
pub mod unshelve;
pub mod workspace;

pub use callback::{
    CallbackStats, CallbackTask, LogSink, ReconcileTask, ResultCallback, Severity,
    StreamCallback, SyncTask, TracingSink, UnshelveTask,
};
pub use config::Config;
pub use depot::{
    DepotExecutor, P4CliExecutor, Record, RecordClassifier, RecordStatus, TaggedClassifier,
    TrustOptions, Value,
};
pub use error::{DepotError, Result};
pub use reconcile::cleanup;
pub use session::{ChangelistSummary, ConnectParams, Session};
pub use sync::{sync, ParallelOptions, SyncOptions};
pub use unshelve::{unshelve, UnshelveOptions, DEFAULT_CHANGELIST, UNKNOWN_CHANGELIST};
pub use workspace::{LineEnd, ServerWorkspace, ViewMapping, WorkspaceOptions, WorkspaceSpec};
