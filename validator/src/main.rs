use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tokio::time::MissedTickBehavior;
use tracing_subscriber::EnvFilter;

use subnet_protocol::{NetworkId, PeerId};
use subnet_validator::{
    config::{load_topology, Config, FetchConfig},
    spawn_manager, CommitmentFetcher, HttpLedgerClient, HttpNetworkClient, HttpSnapshotSink,
    InfoGatherer, NetworkProber, PersistenceReporter, ReconcileReport, StakeWeightedAllocator,
};

#[derive(Parser)]
#[command(name = "subnet-validator", about = "Peer state and scoring coordinator")]
struct Cli {
    /// Network the peer commitments are registered under
    #[arg(long, default_value = "23", env = "SUBNET_NETWORK_ID")]
    network_id: NetworkId,

    /// This validator's node id
    #[arg(long, env = "SUBNET_VALIDATOR_ID")]
    validator_id: PeerId,

    /// JSON file listing every node with its stake and address
    #[arg(long, default_value = "./topology.json", env = "SUBNET_TOPOLOGY")]
    topology: String,

    /// Ledger gateway URL
    #[arg(long, env = "SUBNET_LEDGER_URL")]
    ledger_url: String,

    /// Storage service URL; peer snapshots are not pushed when unset
    #[arg(long, env = "SUBNET_STORAGE_URL")]
    storage_url: Option<String>,

    /// Bearer token sent to the ledger, peers and storage
    #[arg(long, env = "SUBNET_TOKEN")]
    token: Option<String>,

    /// Seconds between reconcile cycles
    #[arg(long, default_value = "600")]
    interval: u64,

    /// Timeout of a single ledger read in milliseconds
    #[arg(long, default_value = "10000")]
    ledger_timeout_ms: u64,

    /// Deadline for the whole ledger batch in milliseconds
    #[arg(long, default_value = "10000")]
    ledger_deadline_ms: u64,

    /// Timeout of the peer info probe in milliseconds
    #[arg(long, default_value = "10000")]
    probe_timeout_ms: u64,

    /// Ledger reads in flight at once
    #[arg(long, default_value = "16")]
    fetch_concurrency: usize,

    /// Snapshots waiting to be pushed before new ones are dropped
    #[arg(long, default_value = "4")]
    persist_queue: usize,

    /// Timeout of a single snapshot push in milliseconds
    #[arg(long, default_value = "10000")]
    storage_timeout_ms: u64,

    /// How long shutdown waits for queued snapshots in milliseconds
    #[arg(long, default_value = "10000")]
    persist_drain_timeout_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let cfg = Config {
        network_id: cli.network_id,
        validator_id: cli.validator_id,
        topology_path: cli.topology,
        ledger_url: cli.ledger_url,
        storage_url: cli.storage_url,
        auth_token: cli.token,
        reconcile_interval_secs: cli.interval,
        fetch: FetchConfig {
            concurrency: cli.fetch_concurrency,
            read_timeout: std::time::Duration::from_millis(cli.ledger_timeout_ms),
            deadline: std::time::Duration::from_millis(cli.ledger_deadline_ms),
        },
        probe_timeout_ms: cli.probe_timeout_ms,
        persist_queue_capacity: cli.persist_queue,
        storage_timeout_ms: cli.storage_timeout_ms,
        persist_drain_timeout_ms: cli.persist_drain_timeout_ms,
    };

    tracing::info!(
        validator = cfg.validator_id,
        network = cfg.network_id,
        ledger = %cfg.ledger_url,
        version = subnet_protocol::PROTOCOL_VERSION,
        "Starting subnet validator"
    );

    let topology = Arc::new(load_topology(&cfg.topology_path).await?);
    if topology.network_id != cfg.network_id {
        tracing::warn!(
            topology = topology.network_id,
            configured = cfg.network_id,
            "Topology was written for another network"
        );
    }
    if topology.node(cfg.validator_id).is_none() {
        tracing::warn!(validator = cfg.validator_id, "Validator is not part of the topology");
    }

    let ledger = Arc::new(HttpLedgerClient::new(&cfg.ledger_url, cfg.auth_token.clone()));
    let fetcher = CommitmentFetcher::new(ledger, cfg.network_id, cfg.fetch.clone());
    let prober = NetworkProber::new(
        Arc::new(HttpNetworkClient::new(cfg.auth_token.clone())),
        topology.clone(),
        cfg.probe_timeout(),
    );
    let reporter = match &cfg.storage_url {
        Some(url) => Some(PersistenceReporter::spawn(
            Arc::new(HttpSnapshotSink::new(
                url,
                cfg.auth_token.clone(),
                cfg.storage_timeout(),
            )),
            cfg.persist_queue_capacity,
            cfg.persist_drain_timeout(),
        )),
        None => {
            tracing::info!("No storage URL configured, peer snapshots stay local");
            None
        }
    };

    let (manager, manager_task) = spawn_manager(
        cfg.validator_id,
        topology,
        InfoGatherer::new(fetcher, prober),
        Arc::new(StakeWeightedAllocator),
        reporter,
    );

    let mut timer = tokio::time::interval(cfg.reconcile_interval());
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = timer.tick() => {
                match manager.reconcile().await {
                    Ok(ReconcileReport::Applied { updated, .. }) => {
                        tracing::info!(updated, "Reconcile cycle complete");
                    }
                    Ok(ReconcileReport::Skipped) => {
                        tracing::warn!("Reconcile cycle skipped, keeping stale peer state");
                    }
                    Err(e) => {
                        tracing::error!("Reconcile failed: {e}");
                        break;
                    }
                }
            }
            _ = &mut shutdown => break,
        }
    }

    drop(manager);
    manager_task.await.context("Peer state manager panicked")?;
    tracing::info!("Validator shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async { tokio::signal::ctrl_c().await.ok(); };
    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();
    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }
}
