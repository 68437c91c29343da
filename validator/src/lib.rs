//! Peer state and scoring coordinator for subnet validators.
//!
//! Each cycle the validator reads peer commitments from the ledger, probes the peers
//! that have none, merges both into one info per peer and updates its
//! [`PeerStateTable`]. Rewards for finished jobs feed a bounded score window per peer,
//! from which per-model weight vectors are derived.

pub mod allocator;
pub mod config;
pub mod error;
pub mod ledger;
pub mod manager;
pub mod merge;
pub mod probe;
pub mod reporter;
pub mod state;

pub use allocator::{CapacityAllocator, StakeWeightedAllocator};
pub use config::{Config, FetchConfig, STAKE_MARGIN};
pub use error::{LedgerError, ManagerError, ProbeError, SinkError};
pub use ledger::{decode_commitment, CommitmentFetcher, HttpLedgerClient, LedgerClient};
pub use manager::{spawn_manager, InfoGatherer, ManagerHandle};
pub use probe::{HttpNetworkClient, NetworkClient, NetworkProber, PeerDirectory};
pub use reporter::{HttpSnapshotSink, PersistenceReporter, SnapshotSink};
pub use state::{PeerStateTable, ReconcileReport, Weights};
