use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Stable integer identity of a node on the network
pub type PeerId = u16;

/// Identifier of the network commitments are registered under
pub type NetworkId = u16;

/// Capacity assumed for a peer that does not declare one
pub const DEFAULT_TOTAL_VOLUME: f64 = 40.0;

/// Stake a validator needs to use a peer that does not declare a threshold
pub const DEFAULT_MIN_STAKE: f64 = 10_000.0;

#[derive(Debug, Error)]
pub enum InfoError {
    #[error("malformed peer info: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("peer info must be a JSON object, got {0}")]
    NotAnObject(&'static str),
    #[error("field `{field}` must be a finite non-negative number, got {value}")]
    OutOfRange { field: &'static str, value: f64 },
}

/// Capability record a peer publishes about itself, either as a ledger commitment
/// or in answer to a probe.
///
/// Only the known field set is accepted. Anything else is a decode error, and
/// callers treat a decode error as if the peer had published nothing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PeerInfo {
    /// Model the peer serves
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
    /// Declared job capacity per epoch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_volume: Option<f64>,
    /// Minimum stake a validator needs before it may use this peer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_stake: Option<f64>,
    /// Free-form hardware description, passed through as is
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_info: Option<Map<String, Value>>,
}

impl PeerInfo {
    /// Decode an encoded commitment. Blank input is an empty record, not an error.
    pub fn parse(encoded: &str) -> Result<Self, InfoError> {
        let encoded = encoded.trim();
        if encoded.is_empty() {
            return Ok(Self::default());
        }
        Self::from_value(serde_json::from_str(encoded)?)
    }

    /// Decode a structured value, e.g. the body of a probe response.
    pub fn from_value(value: Value) -> Result<Self, InfoError> {
        match value {
            Value::Null => Ok(Self::default()),
            Value::Object(_) => {
                let info: Self = serde_json::from_value(value)?;
                info.validated()
            }
            Value::Array(_) => Err(InfoError::NotAnObject("array")),
            Value::Bool(_) => Err(InfoError::NotAnObject("boolean")),
            Value::Number(_) => Err(InfoError::NotAnObject("number")),
            Value::String(_) => Err(InfoError::NotAnObject("string")),
        }
    }

    fn validated(self) -> Result<Self, InfoError> {
        for (field, value) in [("total_volume", self.total_volume), ("min_stake", self.min_stake)] {
            if let Some(value) = value {
                if !value.is_finite() || value < 0.0 {
                    return Err(InfoError::OutOfRange { field, value });
                }
            }
        }
        Ok(self)
    }

    pub fn is_empty(&self) -> bool {
        self.model_name.is_none()
            && self.total_volume.is_none()
            && self.min_stake.is_none()
            && self.device_info.is_none()
    }

    pub fn model_name(&self) -> &str {
        self.model_name.as_deref().unwrap_or("")
    }

    pub fn total_volume(&self) -> f64 {
        self.total_volume.unwrap_or(DEFAULT_TOTAL_VOLUME)
    }

    pub fn min_stake(&self) -> f64 {
        self.min_stake.unwrap_or(DEFAULT_MIN_STAKE)
    }

    pub fn device_info(&self) -> Map<String, Value> {
        self.device_info.clone().unwrap_or_default()
    }
}

/// A node registered on the network
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeInfo {
    pub id: PeerId,
    /// Stake backing this node when it acts as a validator
    #[serde(default)]
    pub stake: f64,
    /// Address where the node answers probes (e.g. "10.0.0.4:8091")
    pub address: String,
}

/// The node universe a validator works against.
///
/// Node ids are the known peer universe; stakes feed the capacity allocator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Topology {
    pub network_id: NetworkId,
    pub nodes: Vec<NodeInfo>,
}

impl Topology {
    /// All node ids, ascending and deduplicated
    pub fn peer_ids(&self) -> Vec<PeerId> {
        let mut ids: Vec<PeerId> = self.nodes.iter().map(|n| n.id).collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    /// Ids registered more than once, ascending
    pub fn duplicate_ids(&self) -> Vec<PeerId> {
        let mut ids: Vec<PeerId> = self.nodes.iter().map(|n| n.id).collect();
        ids.sort_unstable();
        let mut dups: Vec<PeerId> = ids.windows(2).filter(|w| w[0] == w[1]).map(|w| w[0]).collect();
        dups.dedup();
        dups
    }

    pub fn node(&self, id: PeerId) -> Option<&NodeInfo> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn address_of(&self, id: PeerId) -> Option<&str> {
        self.node(id).map(|n| n.address.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_known_fields() {
        let info = PeerInfo::parse(
            r#"{"model_name": "sdxl", "total_volume": 250, "min_stake": 500, "device_info": {"gpu": "A100"}}"#,
        )
        .unwrap();
        assert_eq!(info.model_name(), "sdxl");
        assert_eq!(info.total_volume(), 250.0);
        assert_eq!(info.min_stake(), 500.0);
        assert_eq!(info.device_info()["gpu"], json!("A100"));
    }

    #[test]
    fn blank_commitment_is_empty() {
        assert!(PeerInfo::parse("").unwrap().is_empty());
        assert!(PeerInfo::parse("   ").unwrap().is_empty());
        assert!(PeerInfo::from_value(Value::Null).unwrap().is_empty());
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let info = PeerInfo::parse(r#"{"model_name": "supir"}"#).unwrap();
        assert_eq!(info.total_volume(), DEFAULT_TOTAL_VOLUME);
        assert_eq!(info.min_stake(), DEFAULT_MIN_STAKE);
        assert!(info.device_info().is_empty());
    }

    #[test]
    fn rejects_unknown_fields() {
        let err = PeerInfo::parse(r#"{"model_name": "sdxl", "__import__": "os"}"#).unwrap_err();
        assert!(matches!(err, InfoError::Malformed(_)));
    }

    #[test]
    fn rejects_non_json_payloads() {
        assert!(PeerInfo::parse("{'model_name': 'sdxl'}").is_err());
        assert!(PeerInfo::parse("__import__('os').system('true')").is_err());
        assert!(PeerInfo::from_value(json!(["sdxl"])).is_err());
    }

    #[test]
    fn rejects_positional_arrays() {
        let err = PeerInfo::parse(r#"["sdxl", 5000, 0, {"gpu": "x"}]"#).unwrap_err();
        assert!(matches!(err, InfoError::NotAnObject("array")));
        let err = PeerInfo::from_value(json!(["sdxl", 5000, 0, {"gpu": "x"}])).unwrap_err();
        assert!(matches!(err, InfoError::NotAnObject("array")));
        assert!(PeerInfo::parse(r#""sdxl""#).is_err());
        assert!(PeerInfo::parse("5000").is_err());
    }

    #[test]
    fn rejects_negative_volume() {
        let err = PeerInfo::from_value(json!({"total_volume": -1.0})).unwrap_err();
        assert!(matches!(err, InfoError::OutOfRange { field: "total_volume", .. }));
    }

    #[test]
    fn topology_ids_are_sorted_and_unique() {
        let topology: Topology = serde_json::from_value(json!({
            "network_id": 23,
            "nodes": [
                {"id": 2, "stake": 10.0, "address": "b:1"},
                {"id": 0, "address": "a:1"},
                {"id": 2, "stake": 10.0, "address": "b:1"},
            ]
        }))
        .unwrap();
        assert_eq!(topology.peer_ids(), vec![0, 2]);
        assert_eq!(topology.address_of(0), Some("a:1"));
        assert_eq!(topology.node(0).unwrap().stake, 0.0);
        assert!(topology.address_of(1).is_none());
        assert_eq!(topology.duplicate_ids(), vec![2]);
    }

    #[test]
    fn distinct_topology_has_no_duplicates() {
        let topology: Topology = serde_json::from_value(json!({
            "network_id": 23,
            "nodes": [
                {"id": 3, "address": "c:1"},
                {"id": 1, "address": "a:1"},
            ]
        }))
        .unwrap();
        assert!(topology.duplicate_ids().is_empty());
    }
}
