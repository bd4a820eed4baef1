use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

use remotelist::{
    checkpoint::{CheckpointOutcome, Checkpointer, spawn_checkpoint_worker},
    config::{Cli, Command, Config},
    recovery::recover,
    rpc::server::RemoteListService,
    store::ListStore,
};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let cmd = cli.command.clone().unwrap_or(Command::Run);

    match cmd {
        Command::Run => run_server(cli.config).await,
        Command::Recover => print_recovered(&cli.config),
        Command::Checkpoint => checkpoint_once(&cli.config).await,
    }
}

async fn run_server(config: Config) -> Result<()> {
    let (store, _report) = ListStore::open(config.store_paths()).context("recover list store")?;
    let store = Arc::new(store);

    let checkpointer = Arc::new(Checkpointer::new(
        store.clone(),
        config.history_max_lines(),
    ));
    let worker = spawn_checkpoint_worker(checkpointer.clone(), config.snapshot_interval());

    info!(
        bind = %config.bind,
        log_file = %config.log_file.display(),
        snapshot_file = %config.snapshot_file.display(),
        snapshot_interval_secs = config.snapshot_interval_secs,
        "starting remotelist"
    );
    let served = tonic::transport::Server::builder()
        .add_service(RemoteListService::new(store.clone()).into_server())
        .serve_with_shutdown(config.bind, shutdown_signal())
        .await
        .context("serve list rpc");

    worker.shutdown().await;
    match checkpointer.run_once().await {
        Ok(CheckpointOutcome::Completed(report)) => {
            info!(last_seq = report.last_seq, "final checkpoint saved")
        }
        Ok(CheckpointOutcome::Unchanged) => {}
        Err(err) => warn!(%err, "final checkpoint failed"),
    }
    served
}

fn print_recovered(config: &Config) -> Result<()> {
    let recovered = recover(&config.store_paths()).context("recover list state")?;
    let out = serde_json::json!({
        "lists": recovered.lists,
        "report": recovered.report,
    });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

async fn checkpoint_once(config: &Config) -> Result<()> {
    let (store, _report) = ListStore::open(config.store_paths()).context("recover list store")?;
    let checkpointer = Checkpointer::new(Arc::new(store), config.history_max_lines());
    match checkpointer.run_once().await.context("checkpoint")? {
        CheckpointOutcome::Completed(report) => info!(
            last_seq = report.last_seq,
            lists = report.lists,
            rotated_records = report.rotated_records,
            history_lines = ?report.history_lines,
            "checkpoint saved"
        ),
        CheckpointOutcome::Unchanged => info!("nothing to checkpoint"),
    }
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).compact().init();
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown requested");
}
