//! Workspace sync - serial, or parallel followed by serial.
//!
//! Parallel transfer only moves file content. The plain sync that always
//! follows it brings the workspace have-list in line with the depot, so a
//! parallel sync is two command executions sharing one callback:
//!
//! ```text
//! sync <opts> <files> --parallel=threads=T,...   (only if requested)
//! sync <opts> <files>                            (always)
//! ```

use crate::callback::{CallbackStats, SyncTask};
use crate::depot::DepotExecutor;
use crate::error::Result;
use crate::session::Session;
use crate::workspace::ServerWorkspace;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncOptions {
    /// `-f` resync files even when the have-list says they are current
    pub force_update: bool,
    /// `-n` preview only
    pub no_update: bool,
    /// `-k` update the have-list without touching files
    pub bypass_client: bool,
    /// `-p` write files without updating the have-list
    pub bypass_server: bool,
    /// `-q` suppress informational messages
    pub quiet: bool,
    /// `-s` refuse to overwrite files changed outside the depot
    pub safety_check: bool,
    /// `-m<N>`, 0 for no limit
    pub max_files: i32,
}

impl SyncOptions {
    pub fn to_args(&self) -> Vec<String> {
        let flags = [
            (self.force_update, "-f"),
            (self.no_update, "-n"),
            (self.bypass_client, "-k"),
            (self.bypass_server, "-p"),
            (self.quiet, "-q"),
            (self.safety_check, "-s"),
        ];
        let mut args: Vec<String> = flags
            .iter()
            .filter(|(on, _)| *on)
            .map(|(_, flag)| flag.to_string())
            .collect();
        if self.max_files > 0 {
            args.push(format!("-m{}", self.max_files));
        }
        args
    }
}

/// Server-side parallel transfer tuning. All zero means serial.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParallelOptions {
    pub threads: i64,
    /// Minimum file count before going parallel
    pub min_files: i64,
    /// Minimum total size before going parallel
    pub min_size: i64,
    /// Files per batch
    pub batch: i64,
    /// Bytes per batch
    pub batch_size: i64,
}

impl ParallelOptions {
    /// Parallel transfer is requested when the fields sum above zero. Any
    /// single positive field is enough.
    pub fn is_requested(&self) -> bool {
        let sum = [
            self.threads,
            self.min_files,
            self.min_size,
            self.batch,
            self.batch_size,
        ]
        .iter()
        .fold(0i64, |acc, v| acc.saturating_add(*v));
        sum > 0
    }

    /// `--parallel=threads=T[,min=M][,minsize=S][,batch=B][,batchsize=Z]`
    pub fn to_arg(&self) -> String {
        let mut arg = format!("--parallel=threads={}", self.threads.max(0));
        let optional = [
            ("min", self.min_files),
            ("minsize", self.min_size),
            ("batch", self.batch),
            ("batchsize", self.batch_size),
        ];
        for (key, value) in optional {
            if value > 0 {
                arg.push_str(&format!(",{}={}", key, value));
            }
        }
        arg
    }

    /// Worker count handed to the executor for its own transfer workers.
    pub fn worker_hint(&self) -> u32 {
        u32::try_from(self.threads.max(0)).unwrap_or(u32::MAX)
    }
}

/// Option tokens followed by file specs.
pub fn sync_args(options: &SyncOptions, file_specs: Option<&[String]>) -> Vec<String> {
    let mut args = options.to_args();
    if let Some(specs) = file_specs {
        args.extend(specs.iter().cloned());
    }
    args
}

/// [`sync_args`] with the parallel token appended last. [`P4CliExecutor`]
/// moves it ahead of the file specs when building the command line.
///
/// [`P4CliExecutor`]: crate::depot::P4CliExecutor
pub fn parallel_sync_args(
    options: &SyncOptions,
    parallel: &ParallelOptions,
    file_specs: Option<&[String]>,
) -> Vec<String> {
    let mut args = sync_args(options, file_specs);
    args.push(parallel.to_arg());
    args
}

/// Sync `workspace` to the depot.
///
/// Per-record errors are logged through the session's sink and never abort
/// the call; only command failures are returned.
pub async fn sync<E: DepotExecutor>(
    session: &mut Session<E>,
    workspace: &ServerWorkspace,
    file_specs: Option<&[String]>,
    options: &SyncOptions,
    parallel: &ParallelOptions,
) -> Result<CallbackStats> {
    session.select_workspace(workspace);
    let mut callback = session.callback(SyncTask::default());

    if parallel.is_requested() {
        let args = parallel_sync_args(options, parallel, file_specs);
        session
            .run_streaming(
                &workspace.name,
                "sync",
                &args,
                &mut callback,
                Some(parallel.worker_hint()),
            )
            .await?;
    }

    let args = sync_args(options, file_specs);
    session
        .run_streaming(&workspace.name, "sync", &args, &mut callback, None)
        .await?;

    tracing::info!(
        "Synced {} files in workspace {}",
        callback.task().files_synced,
        workspace.name
    );
    Ok(callback.stats())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_sync_options_order() {
        let options = SyncOptions {
            force_update: true,
            no_update: true,
            bypass_client: true,
            bypass_server: true,
            quiet: true,
            safety_check: true,
            max_files: 50,
        };
        assert_eq!(
            options.to_args(),
            vec!["-f", "-n", "-k", "-p", "-q", "-s", "-m50"]
        );
        assert!(SyncOptions::default().to_args().is_empty());
    }

    #[test]
    fn test_parallel_not_requested_when_zero() {
        assert!(!ParallelOptions::default().is_requested());
    }

    #[test]
    fn test_parallel_threads_and_batch() {
        let parallel = ParallelOptions {
            threads: 4,
            batch: 10,
            ..Default::default()
        };
        assert!(parallel.is_requested());
        assert_eq!(parallel.to_arg(), "--parallel=threads=4,batch=10");
    }

    #[test]
    fn test_parallel_without_threads_uses_zero() {
        let parallel = ParallelOptions {
            min_files: 20,
            min_size: 1024,
            batch_size: 4096,
            ..Default::default()
        };
        assert_eq!(
            parallel.to_arg(),
            "--parallel=threads=0,min=20,minsize=1024,batchsize=4096"
        );
        assert_eq!(parallel.worker_hint(), 0);
    }

    #[test]
    fn test_parallel_sum_is_additive() {
        // A negative field can cancel a positive one.
        let parallel = ParallelOptions {
            threads: -2,
            batch: 2,
            ..Default::default()
        };
        assert!(!parallel.is_requested());
    }

    #[test]
    fn test_parallel_token_is_last() {
        let specs = vec!["//depot/main/...#head".to_string()];
        let parallel = ParallelOptions {
            threads: 8,
            ..Default::default()
        };
        let options = SyncOptions {
            force_update: true,
            ..Default::default()
        };
        assert_eq!(
            parallel_sync_args(&options, &parallel, Some(&specs)),
            vec!["-f", "//depot/main/...#head", "--parallel=threads=8"]
        );
    }

    proptest! {
        #[test]
        fn prop_parallel_fields_in_fixed_order(
            threads in 0i64..64,
            min in 0i64..1000,
            minsize in 0i64..1_000_000,
            batch in 0i64..100,
            batchsize in 0i64..1_000_000,
        ) {
            let parallel = ParallelOptions {
                threads,
                min_files: min,
                min_size: minsize,
                batch,
                batch_size: batchsize,
            };
            let arg = parallel.to_arg();
            let body = arg.strip_prefix("--parallel=").unwrap();
            let keys: Vec<&str> = body
                .split(',')
                .map(|kv| kv.split('=').next().unwrap())
                .collect();

            prop_assert_eq!(keys[0], "threads");
            let expected: Vec<&str> = [
                ("min", min),
                ("minsize", minsize),
                ("batch", batch),
                ("batchsize", batchsize),
            ]
            .iter()
            .filter(|(_, v)| *v > 0)
            .map(|(k, _)| *k)
            .collect();
            prop_assert_eq!(&keys[1..], expected.as_slice());
            prop_assert_eq!(
                parallel.is_requested(),
                threads + min + minsize + batch + batchsize > 0
            );
        }
    }
}
