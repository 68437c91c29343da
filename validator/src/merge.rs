use std::collections::BTreeMap;

use subnet_protocol::{PeerId, PeerInfo};

/// Peers whose ledger commitment came back empty; these are the ones worth probing.
pub fn uncommitted(ledger: &BTreeMap<PeerId, PeerInfo>) -> Vec<PeerId> {
    ledger
        .iter()
        .filter(|(_, info)| info.is_empty())
        .map(|(peer_id, _)| *peer_id)
        .collect()
}

/// Combine ledger and probe results into one info per peer.
///
/// A non-empty ledger commitment always wins. Otherwise the probe answer is used,
/// and a peer neither source knows anything about maps to an empty info.
pub fn merge_info(
    ledger: BTreeMap<PeerId, PeerInfo>,
    mut probed: BTreeMap<PeerId, PeerInfo>,
) -> BTreeMap<PeerId, PeerInfo> {
    let mut merged = BTreeMap::new();
    for (peer_id, info) in ledger {
        let info = if info.is_empty() {
            probed.remove(&peer_id).unwrap_or_default()
        } else {
            probed.remove(&peer_id);
            info
        };
        merged.insert(peer_id, info);
    }
    merged.extend(probed);
    merged
}
