use anyhow::{Context, Result};
use std::time::Duration;

use subnet_protocol::{NetworkId, PeerId, Topology};

/// Stake margin handed to the capacity allocator
pub const STAKE_MARGIN: f64 = 1.03;

#[derive(Debug, Clone)]
pub struct Config {
    pub network_id: NetworkId,
    /// This validator's own node id
    pub validator_id: PeerId,
    pub topology_path: String,
    pub ledger_url: String,
    /// Storage service base URL; persistence is off when unset
    pub storage_url: Option<String>,
    pub auth_token: Option<String>,
    pub reconcile_interval_secs: u64,
    pub fetch: FetchConfig,
    pub probe_timeout_ms: u64,
    pub persist_queue_capacity: usize,
    /// Timeout of a single push to the storage service
    pub storage_timeout_ms: u64,
    /// How long shutdown waits for queued snapshots before dropping them
    pub persist_drain_timeout_ms: u64,
}

impl Config {
    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs.max(1))
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn storage_timeout(&self) -> Duration {
        Duration::from_millis(self.storage_timeout_ms)
    }

    pub fn persist_drain_timeout(&self) -> Duration {
        Duration::from_millis(self.persist_drain_timeout_ms)
    }
}

/// Limits for the parallel ledger reads of one cycle
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Reads in flight at once, independent of the number of peers
    pub concurrency: usize,
    pub read_timeout: Duration,
    /// Bound on the whole batch; reads still pending afterwards count as empty
    pub deadline: Duration,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            concurrency: 16,
            read_timeout: Duration::from_secs(10),
            deadline: Duration::from_secs(10),
        }
    }
}

/// Parse a topology document. Every node id must appear exactly once, since the
/// allocator sums stake per node.
pub fn parse_topology(data: &str) -> Result<Topology> {
    let topology: Topology = serde_json::from_str(data).context("Malformed topology file")?;
    if topology.nodes.is_empty() {
        anyhow::bail!("Topology lists no nodes");
    }
    let duplicates = topology.duplicate_ids();
    if !duplicates.is_empty() {
        anyhow::bail!("Topology lists node ids more than once: {duplicates:?}");
    }
    Ok(topology)
}

pub async fn load_topology(path: &str) -> Result<Topology> {
    let data = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read topology from {path}"))?;
    let topology = parse_topology(&data).with_context(|| format!("Invalid topology {path}"))?;
    tracing::info!(nodes = topology.nodes.len(), "Loaded topology");
    Ok(topology)
}
