//! Workspace cleanup through a full reconcile.
//!
//! Cleanup always runs every detector and writes the depot's state back over
//! the workspace, so there is no partial mode.

use crate::callback::{CallbackStats, ReconcileTask};
use crate::depot::DepotExecutor;
use crate::error::Result;
use crate::session::Session;
use crate::workspace::ServerWorkspace;
use std::path::Path;

/// `reconcile` flags in the order they are sent.
struct ReconcileOptions {
    /// `-a` files added outside the depot
    outside_add: bool,
    /// `-e` files edited outside the depot
    outside_edit: bool,
    /// `-d` files removed from the workspace
    removed: bool,
    /// `-f` allow wildcard characters in file names
    use_wildcards: bool,
    /// `-w` update the workspace to match the depot instead of opening files
    update_workspace: bool,
}

impl ReconcileOptions {
    fn full_cleanup() -> Self {
        Self {
            outside_add: true,
            outside_edit: true,
            removed: true,
            use_wildcards: true,
            update_workspace: true,
        }
    }

    fn to_args(&self) -> Vec<String> {
        [
            (self.outside_add, "-a"),
            (self.outside_edit, "-e"),
            (self.removed, "-d"),
            (self.use_wildcards, "-f"),
            (self.update_workspace, "-w"),
        ]
        .iter()
        .filter(|(on, _)| *on)
        .map(|(_, flag)| flag.to_string())
        .collect()
    }
}

/// `<root>/...` - every file under the workspace root.
pub fn workspace_path(root: &Path) -> String {
    let root = root.to_string_lossy();
    format!("{}/...", root.trim_end_matches(['/', '\\']))
}

pub fn cleanup_args(root: &Path) -> Vec<String> {
    let mut args = ReconcileOptions::full_cleanup().to_args();
    args.push(workspace_path(root));
    args
}

/// Revert `workspace` to the depot's view of it.
pub async fn cleanup<E: DepotExecutor>(
    session: &mut Session<E>,
    workspace: &ServerWorkspace,
) -> Result<CallbackStats> {
    let args = cleanup_args(&workspace.root);
    session.select_workspace(workspace);

    let mut callback = session.callback(ReconcileTask);
    session
        .run_streaming(&workspace.name, "reconcile", &args, &mut callback, None)
        .await?;
    Ok(callback.stats())
}
