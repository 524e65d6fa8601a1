//! Restore a shelved changelist into a workspace.

use crate::callback::{CallbackStats, UnshelveTask};
use crate::depot::DepotExecutor;
use crate::error::{DepotError, Result};
use crate::session::Session;
use crate::workspace::ServerWorkspace;

/// Target changelist id meaning "the workspace's default changelist".
pub const DEFAULT_CHANGELIST: i32 = 0;

/// Target changelist id meaning "let the server decide".
pub const UNKNOWN_CHANGELIST: i32 = -1;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnshelveOptions {
    /// `-f` overwrite writable files
    pub force: bool,
    /// `-n` preview only
    pub preview: bool,
}

impl UnshelveOptions {
    pub fn to_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if self.force {
            args.push("-f".to_string());
        }
        if self.preview {
            args.push("-n".to_string());
        }
        args
    }
}

/// `-cdefault`, `-c<id>`, or nothing for any other value.
pub fn target_changelist_arg(target: i32) -> Option<String> {
    if target == DEFAULT_CHANGELIST {
        Some("-cdefault".to_string())
    } else if target > 0 {
        Some(format!("-c{}", target))
    } else {
        None
    }
}

pub fn unshelve_args(source: i32, target: i32, options: &UnshelveOptions) -> Result<Vec<String>> {
    if source <= 0 {
        return Err(DepotError::Request("invalid source changelist".to_string()));
    }
    let mut args = options.to_args();
    args.push(format!("-s{}", source));
    args.extend(target_changelist_arg(target));
    Ok(args)
}

/// Unshelve changelist `source` into `target` in `workspace`.
///
/// Logs in again first when the ticket has expired, since long jobs can
/// outlive it.
pub async fn unshelve<E: DepotExecutor>(
    session: &mut Session<E>,
    workspace: &ServerWorkspace,
    source: i32,
    target: i32,
    options: &UnshelveOptions,
) -> Result<CallbackStats> {
    let args = unshelve_args(source, target, options)?;

    if !session.is_logged_in().await? {
        session.authenticate().await?;
    }

    session.select_workspace(workspace);
    let mut callback = session.callback(UnshelveTask);
    session
        .run_streaming(&workspace.name, "unshelve", &args, &mut callback, None)
        .await?;
    Ok(callback.stats())
}
