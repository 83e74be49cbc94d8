//! Per-round experiment log for convergence analysis.

use serde::{Deserialize, Serialize};

use crate::error::FedError;

/// What happened in one communication round.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoundRecord {
    /// Round number (1-indexed)
    pub round: usize,
    /// Strategy that drove the round
    pub strategy: String,
    /// Clients dispatched
    pub n_clients: usize,
    /// Clients training on corrupted labels
    pub n_dishonest: usize,
    /// Global test accuracy after the round, in percent
    pub accuracy: f32,
    /// Mean of the clients' (or server's) final training loss
    pub mean_loss: Option<f32>,
    /// Symmetric KL between consensus and global soft labels (FedAF only)
    pub lgkm_loss: Option<f32>,
    /// L2 distance the global state moved this round
    pub update_norm: f32,
    /// The server kept the previous global model
    pub skipped: bool,
}

/// Append-only log of rounds.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RunHistory {
    records: Vec<RoundRecord>,
}

impl RunHistory {
    /// Create an empty history.
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
        }
    }

    /// Append a round.
    pub fn push(&mut self, record: RoundRecord) {
        self.records.push(record);
    }

    /// All rounds in order.
    pub fn records(&self) -> &[RoundRecord] {
        &self.records
    }

    /// Number of recorded rounds.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether no round was recorded.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Test accuracy curve.
    pub fn accuracies(&self) -> Vec<f32> {
        self.records.iter().map(|r| r.accuracy).collect()
    }

    /// Accuracy after the last round.
    pub fn final_accuracy(&self) -> Option<f32> {
        self.records.last().map(|r| r.accuracy)
    }

    /// Earliest round reaching the highest accuracy.
    pub fn best_round(&self) -> Option<&RoundRecord> {
        self.records.iter().fold(None, |best: Option<&RoundRecord>, r| match best {
            Some(b) if b.accuracy >= r.accuracy => Some(b),
            _ => Some(r),
        })
    }

    /// Pretty JSON rendering.
    pub fn to_json(&self) -> Result<String, FedError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
