use std::collections::BTreeMap;

use subnet_protocol::{PeerId, PeerInfo, PeerRecord, Topology};

use crate::allocator::CapacityAllocator;
use crate::config::STAKE_MARGIN;

/// Outcome of applying one reconcile cycle to the table
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileReport {
    Applied {
        updated: usize,
        /// Number of peers per model name, over the whole table
        distribution: BTreeMap<String, usize>,
    },
    /// No peer yielded any info; the previous state was kept.
    Skipped,
}

/// Dense weight vector, one entry per known peer in ascending id order
#[derive(Debug, Clone, PartialEq)]
pub struct Weights {
    peer_ids: Vec<PeerId>,
    values: Vec<f64>,
}

impl Weights {
    pub fn peer_ids(&self) -> &[PeerId] {
        &self.peer_ids
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn get(&self, peer_id: PeerId) -> Option<f64> {
        self.peer_ids
            .binary_search(&peer_id)
            .ok()
            .map(|i| self.values[i])
    }

    pub fn sum(&self) -> f64 {
        self.values.iter().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (PeerId, f64)> + '_ {
        self.peer_ids.iter().copied().zip(self.values.iter().copied())
    }
}

/// One record per known peer. The set of peers is fixed at construction.
#[derive(Debug, Clone)]
pub struct PeerStateTable {
    validator_id: PeerId,
    peers: BTreeMap<PeerId, PeerRecord>,
}

impl PeerStateTable {
    pub fn new(validator_id: PeerId, peer_ids: impl IntoIterator<Item = PeerId>) -> Self {
        let peers = peer_ids
            .into_iter()
            .map(|id| (id, PeerRecord::new(id)))
            .collect();
        Self {
            validator_id,
            peers,
        }
    }

    pub fn validator_id(&self) -> PeerId {
        self.validator_id
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn get(&self, peer_id: PeerId) -> Option<&PeerRecord> {
        self.peers.get(&peer_id)
    }

    pub fn peer_ids(&self) -> Vec<PeerId> {
        self.peers.keys().copied().collect()
    }

    /// Apply merged peer info.
    ///
    /// Capacity fields and the rate limit are overwritten for every peer in `merged`,
    /// with defaults where the info is silent. Scores are reset only for peers whose
    /// model changed.
    pub fn reconcile(
        &mut self,
        merged: &BTreeMap<PeerId, PeerInfo>,
        topology: &Topology,
        allocator: &dyn CapacityAllocator,
    ) -> ReconcileReport {
        if merged.values().all(PeerInfo::is_empty) {
            tracing::warn!("No active peer available, keeping previous peer state");
            return ReconcileReport::Skipped;
        }

        let mut updated = 0;
        for (peer_id, info) in merged {
            let Some(record) = self.peers.get_mut(peer_id) else {
                tracing::warn!(peer = peer_id, "Info for unknown peer ignored");
                continue;
            };
            record.apply_capacity(info);
            let shares = allocator.allocate(
                topology,
                record.total_volume,
                STAKE_MARGIN,
                record.min_stake,
                false,
            );
            record.rate_limit = shares.get(&self.validator_id).copied().unwrap_or(0.0);
            tracing::debug!(peer = peer_id, rate_limit = record.rate_limit, "Rate limit assigned");

            let previous = record.model_name.clone();
            if record.assign_model(info.model_name()) {
                tracing::info!(
                    peer = peer_id,
                    from = %previous,
                    to = %record.model_name,
                    "Peer changed model, scores reset"
                );
            }
            updated += 1;
        }

        let distribution = self.model_distribution();
        tracing::info!(updated, ?distribution, "Updated peer identities");
        ReconcileReport::Applied {
            updated,
            distribution,
        }
    }

    /// Record one reward per peer; `peer_ids` and `rewards` are aligned.
    ///
    /// Returns how many rewards were recorded.
    pub fn record_scores(&mut self, peer_ids: &[PeerId], rewards: &[f64]) -> usize {
        if peer_ids.len() != rewards.len() {
            tracing::warn!(
                peers = peer_ids.len(),
                rewards = rewards.len(),
                "Score batch length mismatch, extra entries ignored"
            );
        }
        let mut recorded = 0;
        for (peer_id, reward) in peer_ids.iter().zip(rewards) {
            if !reward.is_finite() {
                tracing::warn!(peer = peer_id, reward, "Non-finite reward dropped");
                continue;
            }
            match self.peers.get_mut(peer_id) {
                Some(record) => {
                    record.record_score(*reward);
                    recorded += 1;
                }
                None => tracing::warn!(peer = peer_id, "Reward for unknown peer dropped"),
            }
        }
        recorded
    }

    /// Ids of all peers currently serving `model_name`, ascending
    pub fn peers_serving(&self, model_name: &str) -> Vec<PeerId> {
        self.peers
            .values()
            .filter(|r| r.model_name == model_name)
            .map(|r| r.id)
            .collect()
    }

    /// Per-peer weights for `model_name`, each in `[0, 1]`.
    ///
    /// Peers on other models weigh 0. With `normalize` the vector is scaled to sum to 1,
    /// unless it is all zero.
    pub fn compute_weights(&self, model_name: &str, normalize: bool) -> Weights {
        let peer_ids = self.peer_ids();
        let mut values: Vec<f64> = self
            .peers
            .values()
            .map(|r| {
                if r.model_name == model_name {
                    r.average_score().clamp(0.0, 1.0)
                } else {
                    0.0
                }
            })
            .collect();

        if normalize {
            let sum: f64 = values.iter().sum();
            if sum > 0.0 {
                values.iter_mut().for_each(|v| *v /= sum);
            }
        }
        Weights { peer_ids, values }
    }

    pub fn model_distribution(&self) -> BTreeMap<String, usize> {
        let mut distribution = BTreeMap::new();
        for record in self.peers.values() {
            *distribution.entry(record.model_name.clone()).or_insert(0) += 1;
        }
        distribution
    }

    pub fn snapshot(&self) -> BTreeMap<PeerId, PeerRecord> {
        self.peers.clone()
    }
}
