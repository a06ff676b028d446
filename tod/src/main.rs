//! todod - Markdown todo task daemon
//!
//! CLI entry point: load configuration, assemble the engine, and serve.

use std::sync::Arc;

use clap::Parser;
use eyre::{Context, Result};
use tokio::sync::{RwLock, mpsc};
use tracing::{info, warn};

use todod::cli::{Cli, Command};
use todod::config::Config;
use todod::dispatch::DispatchServer;
use todod::engine::{EngineExecutor, PathLocks, TaskEngine};
use todod::llm::create_client;
use todod::watcher::{TodoWatcher, WatcherConfig, WriteIgnoreMap};

use knowstore::RootSet;

fn setup_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    match cli.command {
        Some(Command::CheckConfig) => {
            print!("{}", serde_yaml::to_string(&config)?);
            Ok(())
        }
        Some(Command::Serve) | None => {
            let runtime = tokio::runtime::Runtime::new().context("Failed to start runtime")?;
            runtime.block_on(serve(config))
        }
    }
}

async fn serve(config: Config) -> Result<()> {
    let roots = RootSet::new(config.roots.clone()).context("Failed to resolve configured roots")?;
    info!(roots = ?roots.roots(), addr = %config.listen_addr(), "todod starting");

    let roots = Arc::new(RwLock::new(roots));
    let write_ignore = WriteIgnoreMap::default();
    let path_locks = PathLocks::default();

    let llm = create_client(&config.llm, config.task_timeout()).context("Failed to create LLM client")?;
    info!(model = llm.model(), "LLM client ready");

    let engine = Arc::new(TaskEngine::new(
        config.clone(),
        roots.clone(),
        llm,
        write_ignore.clone(),
        path_locks.clone(),
    ));
    let executor = EngineExecutor::spawn(engine);

    // Watcher feeds engine runs through the same serializing executor
    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let watcher = TodoWatcher::new(
        WatcherConfig {
            poll_interval: config.poll_interval(),
            exclude_dirs: config.exclude_dirs.clone(),
            ..Default::default()
        },
        roots.clone(),
        write_ignore,
        events_tx,
    );
    tokio::spawn(watcher.run());

    let pump_executor = executor.clone();
    tokio::spawn(async move {
        while let Some(path) = events_rx.recv().await {
            info!(todo = %path.display(), "todo changed, running next task");
            match pump_executor.run_next(Some(path)).await {
                Ok(outcome) => info!(?outcome, "watcher-triggered run finished"),
                Err(e) => warn!(error = %e, kind = e.kind(), "watcher-triggered run failed"),
            }
        }
    });

    let server = DispatchServer::bind(config, roots, executor, path_locks).await?;
    server.run().await
}
