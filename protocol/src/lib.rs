//! Subnet validator protocol types
//!
//! Shared between validators, the peers they score and the storage service that
//! archives validator state.
//!
//! # Architecture
//!
//! ```text
//!  ┌────────┐ commitment  ┌────────┐   describe   ┌──────┐
//!  │ Ledger │────────────►│Validator│◄────────────►│ Peer │
//!  └────────┘             └────────┘              └──────┘
//!                              │ snapshot
//!                              ▼
//!                         ┌─────────┐
//!                         │ Storage │
//!                         └─────────┘
//! ```
//!
//! ## Peer info
//! - Peers publish a commitment on the ledger describing the model they serve
//! - Peers without a commitment are asked directly with a [`ProbeRequest`]
//! - Both sources decode into the same strict [`PeerInfo`] record
//!
//! ## Peer records
//! - Validators keep one [`PeerRecord`] per peer with a bounded score window
//! - Records are pushed to storage as a [`StoreSnapshot`]

pub mod message;
pub mod peer;
pub mod types;

pub use message::{ProbeRequest, ProbeResponse, StoreSnapshot, PROTOCOL_VERSION};
pub use peer::{reward_scale, PeerRecord, SCORE_WINDOW};
pub use types::*;
