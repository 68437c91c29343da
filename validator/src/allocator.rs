use std::collections::HashMap;

use subnet_protocol::{PeerId, Topology};

/// Partitions a peer's declared volume across validators.
///
/// Every validator in the topology gets an entry, ineligible ones with 0.
pub trait CapacityAllocator: Send + Sync {
    fn allocate(
        &self,
        topology: &Topology,
        total_volume: f64,
        stake_margin: f64,
        min_stake: f64,
        exclusive: bool,
    ) -> HashMap<PeerId, f64>;
}

/// Splits volume among validators holding at least `min_stake`, proportionally to stake.
///
/// In exclusive mode the largest eligible validator takes the whole volume.
#[derive(Debug, Clone, Copy, Default)]
pub struct StakeWeightedAllocator;

impl CapacityAllocator for StakeWeightedAllocator {
    fn allocate(
        &self,
        topology: &Topology,
        total_volume: f64,
        stake_margin: f64,
        min_stake: f64,
        exclusive: bool,
    ) -> HashMap<PeerId, f64> {
        let mut shares: HashMap<PeerId, f64> = topology.nodes.iter().map(|n| (n.id, 0.0)).collect();
        let eligible: Vec<_> = topology
            .nodes
            .iter()
            .filter(|n| n.stake > 0.0 && n.stake >= min_stake)
            .collect();
        if eligible.is_empty() || total_volume <= 0.0 {
            return shares;
        }

        if exclusive {
            let top = eligible
                .iter()
                .max_by(|a, b| a.stake.total_cmp(&b.stake).then(b.id.cmp(&a.id)));
            if let Some(top) = top {
                shares.insert(top.id, total_volume);
            }
            return shares;
        }

        let eligible_stake: f64 = eligible.iter().map(|n| n.stake).sum();
        for node in eligible {
            shares.insert(node.id, total_volume * node.stake / eligible_stake * stake_margin);
        }
        shares
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use subnet_protocol::NodeInfo;

    fn topology(stakes: &[(PeerId, f64)]) -> Topology {
        Topology {
            network_id: 23,
            nodes: stakes
                .iter()
                .map(|&(id, stake)| NodeInfo {
                    id,
                    stake,
                    address: format!("10.0.0.{id}:8091"),
                })
                .collect(),
        }
    }

    #[test]
    fn splits_by_stake_with_margin() {
        let shares = StakeWeightedAllocator.allocate(
            &topology(&[(0, 30_000.0), (1, 10_000.0), (2, 5.0)]),
            100.0,
            1.03,
            10_000.0,
            false,
        );
        assert!((shares[&0] - 77.25).abs() < 1e-9);
        assert!((shares[&1] - 25.75).abs() < 1e-9);
        assert_eq!(shares[&2], 0.0);
    }

    #[test]
    fn under_staked_validator_gets_explicit_zero() {
        let shares = StakeWeightedAllocator.allocate(
            &topology(&[(0, 500.0), (1, 900.0)]),
            40.0,
            1.03,
            10_000.0,
            false,
        );
        assert_eq!(shares.get(&0), Some(&0.0));
        assert_eq!(shares.get(&1), Some(&0.0));
    }

    #[test]
    fn exclusive_goes_to_the_largest_stake() {
        let shares = StakeWeightedAllocator.allocate(
            &topology(&[(0, 20_000.0), (1, 50_000.0), (2, 50_000.0)]),
            40.0,
            1.03,
            10_000.0,
            true,
        );
        assert_eq!(shares[&1], 40.0);
        assert_eq!(shares[&0], 0.0);
        assert_eq!(shares[&2], 0.0);
    }
}
