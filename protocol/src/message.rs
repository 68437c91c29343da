use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::peer::PeerRecord;
use crate::types::PeerId;

/// Version stamped on every snapshot pushed to storage
pub const PROTOCOL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// "Describe yourself", sent to peers that have no ledger commitment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeRequest {
    pub get_miner_info: bool,
}

impl ProbeRequest {
    pub fn describe() -> Self {
        Self { get_miner_info: true }
    }
}

/// A peer's answer to a [`ProbeRequest`].
///
/// `info` is kept raw so each response can be decoded on its own.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeResponse {
    #[serde(default)]
    pub info: Value,
}

/// Full peer table of one validator, as archived by the storage service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSnapshot {
    #[serde(rename = "uid")]
    pub validator_id: PeerId,
    #[serde(rename = "info")]
    pub peers: BTreeMap<PeerId, PeerRecord>,
    pub version: String,
    pub taken_at: DateTime<Utc>,
}

impl StoreSnapshot {
    pub fn new(validator_id: PeerId, peers: BTreeMap<PeerId, PeerRecord>) -> Self {
        Self {
            validator_id,
            peers,
            version: PROTOCOL_VERSION.to_string(),
            taken_at: Utc::now(),
        }
    }
}
