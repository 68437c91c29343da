//! Peer state manager.
//!
//! The [`PeerStateTable`] is owned by a single task. Everything else talks to it
//! through a cloneable [`ManagerHandle`], so reconcile cycles and score updates are
//! applied one at a time in arrival order.
//!
//! A reconcile cycle gathers info outside the task (ledger fetch, probe, merge) and
//! only the resulting mutation goes through the mailbox; score recording and weight
//! queries are never stuck behind slow ledger reads.

use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use subnet_protocol::{PeerId, PeerInfo, PeerRecord, StoreSnapshot, Topology};

use crate::allocator::CapacityAllocator;
use crate::error::ManagerError;
use crate::ledger::CommitmentFetcher;
use crate::merge::{merge_info, uncommitted};
use crate::probe::NetworkProber;
use crate::reporter::PersistenceReporter;
use crate::state::{PeerStateTable, ReconcileReport, Weights};

const MAILBOX_CAPACITY: usize = 64;

/// Fetch → probe → merge, producing one info per peer
pub struct InfoGatherer {
    fetcher: CommitmentFetcher,
    prober: NetworkProber,
}

impl InfoGatherer {
    pub fn new(fetcher: CommitmentFetcher, prober: NetworkProber) -> Self {
        Self { fetcher, prober }
    }

    pub async fn gather(&self, peer_ids: &[PeerId]) -> BTreeMap<PeerId, PeerInfo> {
        let ledger = self.fetcher.fetch(peer_ids).await;
        let missing = uncommitted(&ledger);
        tracing::debug!(
            committed = ledger.len() - missing.len(),
            missing = missing.len(),
            "Ledger commitments collected"
        );
        let probed = if missing.is_empty() {
            BTreeMap::new()
        } else {
            self.prober.probe(&missing).await
        };
        merge_info(ledger, probed)
    }
}

enum Command {
    Apply {
        merged: BTreeMap<PeerId, PeerInfo>,
        reply: oneshot::Sender<ReconcileReport>,
    },
    RecordScores {
        peer_ids: Vec<PeerId>,
        rewards: Vec<f64>,
        reply: oneshot::Sender<usize>,
    },
    ComputeWeights {
        model_name: String,
        normalize: bool,
        reply: oneshot::Sender<Weights>,
    },
    PeersServing {
        model_name: String,
        reply: oneshot::Sender<Vec<PeerId>>,
    },
    Snapshot {
        reply: oneshot::Sender<BTreeMap<PeerId, PeerRecord>>,
    },
}

struct Manager {
    table: PeerStateTable,
    topology: Arc<Topology>,
    allocator: Arc<dyn CapacityAllocator>,
    reporter: Option<PersistenceReporter>,
    rx: mpsc::Receiver<Command>,
}

impl Manager {
    async fn run(mut self) {
        while let Some(command) = self.rx.recv().await {
            self.handle(command);
        }
        if let Some(reporter) = self.reporter.take() {
            reporter.shutdown().await;
        }
        tracing::info!("Peer state manager stopped");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Apply { merged, reply } => {
                let report = self
                    .table
                    .reconcile(&merged, &self.topology, self.allocator.as_ref());
                if matches!(report, ReconcileReport::Applied { .. }) {
                    if let Some(reporter) = &self.reporter {
                        reporter.submit(StoreSnapshot::new(
                            self.table.validator_id(),
                            self.table.snapshot(),
                        ));
                    }
                }
                let _ = reply.send(report);
            }
            Command::RecordScores {
                peer_ids,
                rewards,
                reply,
            } => {
                let _ = reply.send(self.table.record_scores(&peer_ids, &rewards));
            }
            Command::ComputeWeights {
                model_name,
                normalize,
                reply,
            } => {
                let _ = reply.send(self.table.compute_weights(&model_name, normalize));
            }
            Command::PeersServing { model_name, reply } => {
                let _ = reply.send(self.table.peers_serving(&model_name));
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.table.snapshot());
            }
        }
    }
}

/// Start the manager task for the peers in `topology`.
///
/// The task stops once every [`ManagerHandle`] is dropped, after draining the
/// persistence reporter; await the returned join handle to wait for that.
pub fn spawn_manager(
    validator_id: PeerId,
    topology: Arc<Topology>,
    gatherer: InfoGatherer,
    allocator: Arc<dyn CapacityAllocator>,
    reporter: Option<PersistenceReporter>,
) -> (ManagerHandle, JoinHandle<()>) {
    let peer_ids = topology.peer_ids();
    let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
    let manager = Manager {
        table: PeerStateTable::new(validator_id, peer_ids.iter().copied()),
        topology,
        allocator,
        reporter,
        rx,
    };
    tracing::info!(peers = peer_ids.len(), validator = validator_id, "Peer state manager started");
    let task = tokio::spawn(manager.run());
    let handle = ManagerHandle {
        tx,
        gatherer: Arc::new(gatherer),
        peer_ids: peer_ids.into(),
    };
    (handle, task)
}

#[derive(Clone)]
pub struct ManagerHandle {
    tx: mpsc::Sender<Command>,
    gatherer: Arc<InfoGatherer>,
    peer_ids: Arc<[PeerId]>,
}

impl ManagerHandle {
    /// Run one full reconcile cycle against the ledger and the network.
    ///
    /// Callers should not start a new cycle before the previous one returned.
    pub async fn reconcile(&self) -> Result<ReconcileReport, ManagerError> {
        let merged = self.gatherer.gather(&self.peer_ids).await;
        self.apply(merged).await
    }

    /// Apply already merged peer info to the table.
    pub async fn apply(
        &self,
        merged: BTreeMap<PeerId, PeerInfo>,
    ) -> Result<ReconcileReport, ManagerError> {
        self.request(|reply| Command::Apply { merged, reply }).await
    }

    /// Record rewards for finished jobs; `peer_ids` and `rewards` are aligned.
    pub async fn record_scores(
        &self,
        peer_ids: Vec<PeerId>,
        rewards: Vec<f64>,
    ) -> Result<usize, ManagerError> {
        self.request(|reply| Command::RecordScores {
            peer_ids,
            rewards,
            reply,
        })
        .await
    }

    pub async fn record_score(&self, peer_id: PeerId, reward: f64) -> Result<bool, ManagerError> {
        Ok(self.record_scores(vec![peer_id], vec![reward]).await? == 1)
    }

    pub async fn compute_weights(
        &self,
        model_name: &str,
        normalize: bool,
    ) -> Result<Weights, ManagerError> {
        let model_name = model_name.to_string();
        self.request(|reply| Command::ComputeWeights {
            model_name,
            normalize,
            reply,
        })
        .await
    }

    pub async fn peers_serving(&self, model_name: &str) -> Result<Vec<PeerId>, ManagerError> {
        let model_name = model_name.to_string();
        self.request(|reply| Command::PeersServing { model_name, reply })
            .await
    }

    pub async fn snapshot(&self) -> Result<BTreeMap<PeerId, PeerRecord>, ManagerError> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, ManagerError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(command(reply))
            .await
            .map_err(|_| ManagerError::Stopped)?;
        rx.await.map_err(|_| ManagerError::Stopped)
    }
}
