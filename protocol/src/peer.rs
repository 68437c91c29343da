use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::VecDeque;

use crate::types::*;

/// Number of most recent rewards kept per peer
pub const SCORE_WINDOW: usize = 10;

/// Volume at which a peer reaches full reward scale
const FULL_SCALE_VOLUME: f64 = 1000.0;

/// Damping factor for a declared volume: `sqrt(volume / 1000)` clamped to `[0, 1]`.
pub fn reward_scale(total_volume: f64) -> f64 {
    if total_volume.is_nan() || total_volume <= 0.0 {
        return 0.0;
    }
    (total_volume / FULL_SCALE_VOLUME).sqrt().clamp(0.0, 1.0)
}

/// A validator's view of one peer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerRecord {
    pub id: PeerId,
    /// Model the peer currently serves; empty when unidentified
    pub model_name: String,
    /// Most recent rewards, oldest first, at most [`SCORE_WINDOW`] long
    pub scores: VecDeque<f64>,
    pub total_volume: f64,
    pub min_stake: f64,
    pub reward_scale: f64,
    #[serde(default)]
    pub device_info: Map<String, Value>,
    /// Share of the peer's volume allotted to this validator
    pub rate_limit: f64,
}

impl PeerRecord {
    pub fn new(id: PeerId) -> Self {
        Self {
            id,
            model_name: String::new(),
            scores: VecDeque::with_capacity(SCORE_WINDOW + 1),
            total_volume: DEFAULT_TOTAL_VOLUME,
            min_stake: DEFAULT_MIN_STAKE,
            reward_scale: reward_scale(DEFAULT_TOTAL_VOLUME),
            device_info: Map::new(),
            rate_limit: 0.0,
        }
    }

    /// Append a reward, evicting the oldest ones beyond the window.
    pub fn record_score(&mut self, reward: f64) {
        self.scores.push_back(reward);
        while self.scores.len() > SCORE_WINDOW {
            self.scores.pop_front();
        }
    }

    /// Sum of the window divided by the full window size.
    ///
    /// A peer with fewer than [`SCORE_WINDOW`] rewards is averaged as if the
    /// missing ones were zero.
    pub fn average_score(&self) -> f64 {
        self.scores.iter().rev().take(SCORE_WINDOW).sum::<f64>() / SCORE_WINDOW as f64
    }

    /// Switch to `model_name`. Returns `true` and clears the score window when the
    /// model changed; scores earned on another model do not carry over.
    pub fn assign_model(&mut self, model_name: &str) -> bool {
        if self.model_name == model_name {
            return false;
        }
        self.model_name = model_name.to_string();
        self.scores.clear();
        true
    }

    /// Overwrite the capacity fields from `info`, applying defaults for missing ones.
    pub fn apply_capacity(&mut self, info: &PeerInfo) {
        self.total_volume = info.total_volume();
        self.min_stake = info.min_stake();
        self.reward_scale = reward_scale(self.total_volume);
        self.device_info = info.device_info();
    }
}
