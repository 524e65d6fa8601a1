mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Command};
use p4sync::{
    cleanup, sync, unshelve, workspace, CallbackStats, Config, P4CliExecutor, Session,
    UnshelveOptions,
};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();
}

fn print_stats(action: &str, stats: &CallbackStats) {
    println!(
        "{}: {} files, {} info, {} errors ({} suppressed), {} other",
        action, stats.valid, stats.info, stats.errors, stats.suppressed, stats.other
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = Config::resolve(cli.config.as_deref()).context("Failed to load config")?;

    let executor = match &config.server.program {
        Some(program) => P4CliExecutor::with_program(program),
        None => P4CliExecutor::new(),
    };
    let mut session = Session::connect(executor, config.connect_params())
        .await
        .with_context(|| format!("Failed to connect to {}", config.server.port))?;

    let result = run(&mut session, &mut config, cli.command).await;
    session.close().await;
    result
}

async fn run(
    session: &mut Session<P4CliExecutor>,
    config: &mut Config,
    command: Command,
) -> Result<()> {
    match command {
        Command::Sync {
            files,
            no_create,
            force,
            preview,
            threads,
        } => {
            let spec = config.workspace()?.clone();
            let ws = if no_create {
                session
                    .get_workspace(&spec.name)
                    .await?
                    .with_context(|| format!("Workspace {} does not exist", spec.name))?
            } else {
                workspace::create(session, spec).await?
            };

            config.sync.force_update |= force;
            config.sync.no_update |= preview;
            if let Some(threads) = threads {
                config.parallel.threads = threads;
            }

            let file_specs = (!files.is_empty()).then_some(files.as_slice());
            let stats = sync(session, &ws, file_specs, &config.sync, &config.parallel)
                .await
                .context("Sync failed")?;
            print_stats("sync", &stats);
        }
        Command::Unshelve {
            source,
            target,
            force,
        } => {
            let spec = config.workspace()?.clone();
            let ws = workspace::build(session, spec);
            let options = UnshelveOptions {
                force,
                preview: false,
            };
            let stats = unshelve(session, &ws, source, target, &options)
                .await
                .with_context(|| format!("Unshelve of {} failed", source))?;
            print_stats("unshelve", &stats);
        }
        Command::Cleanup => {
            let spec = config.workspace()?.clone();
            let ws = workspace::build(session, spec);
            let stats = cleanup(session, &ws).await.context("Cleanup failed")?;
            print_stats("cleanup", &stats);
        }
        Command::CreateWorkspace => {
            let spec = config.workspace()?.clone();
            let ws = workspace::build(session, spec);
            let result = workspace::register(session, &ws).await?;
            println!("{}", result);
        }
        Command::DeleteWorkspace { name, force } => {
            let name = match name {
                Some(name) => name,
                None => config.workspace()?.name.clone(),
            };
            let result = workspace::delete(session, &name, force).await?;
            println!("{}", result);
        }
        Command::Changes { max, json } => {
            let changes = session.submitted_changes(max).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&changes)?);
            } else {
                for change in changes {
                    let time = change
                        .time
                        .map(|t| t.format("%Y/%m/%d %H:%M:%S").to_string())
                        .unwrap_or_default();
                    println!(
                        "Change {} on {} by {}@{} '{}'",
                        change.id,
                        time,
                        change.user,
                        change.client,
                        change.description.lines().next().unwrap_or_default()
                    );
                }
            }
        }
    }
    Ok(())
}
