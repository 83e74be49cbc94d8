//! The seam between the simulator and the training framework.
//!
//! Everything numerical about a model (layers, autograd, optimizer) stays
//! behind [`Learner`]. The simulator owns only the loops around it: local
//! epochs over shuffled mini-batches and accuracy evaluation.

pub mod softmax;

pub use softmax::SoftmaxClassifier;

use ndarray::{Array2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::data::Dataset;
use crate::error::FedError;
use crate::state::ModelState;

/// A trainable classifier provided by the ML framework.
///
/// Implementations are cloned once per client per round, so cloning should
/// produce an independent copy of the parameters.
pub trait Learner: Clone + Send + Sync {
    /// Number of output classes.
    fn num_classes(&self) -> usize;

    /// Snapshot of all parameters.
    fn state(&self) -> ModelState;

    /// Replace all parameters. The state must match this model's layout.
    fn load_state(&mut self, state: &ModelState) -> Result<(), FedError>;

    /// Logits for a batch of feature rows, shape `(n, num_classes)`.
    fn forward(&self, features: &Array2<f32>) -> Result<Array2<f32>, FedError>;

    /// One optimizer step on a mini-batch with cross-entropy loss.
    ///
    /// Returns the batch's mean loss before the step.
    fn step(&mut self, features: &Array2<f32>, labels: &[usize], lr: f32) -> Result<f32, FedError>;
}

/// Local training hyper-parameters.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TrainConfig {
    /// Passes over the local data
    pub epochs: usize,
    /// Mini-batch size
    pub batch_size: usize,
    /// Learning rate
    pub lr: f32,
}

/// Summary of a local training run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainStats {
    /// Mean batch loss of the final epoch
    pub final_loss: f32,
    /// Optimizer steps taken
    pub steps: usize,
}

/// Shuffled mini-batch SGD over `data`.
pub fn train_local<L: Learner>(
    learner: &mut L,
    data: &Dataset,
    cfg: &TrainConfig,
    rng: &mut StdRng,
) -> Result<TrainStats, FedError> {
    if data.is_empty() {
        return Err(FedError::EmptyDataset);
    }

    let mut order: Vec<usize> = (0..data.len()).collect();
    let mut stats = TrainStats::default();

    for epoch in 0..cfg.epochs {
        order.shuffle(rng);
        let mut epoch_loss = 0.0;
        let mut batches = 0;

        for chunk in order.chunks(cfg.batch_size.max(1)) {
            let features = data.features().select(Axis(0), chunk);
            let labels: Vec<usize> = chunk.iter().map(|&i| data.labels()[i]).collect();
            epoch_loss += learner.step(&features, &labels, cfg.lr)?;
            batches += 1;
        }

        stats.final_loss = epoch_loss / batches as f32;
        stats.steps += batches;
        debug!(epoch = epoch + 1, loss = stats.final_loss, "local epoch done");
    }

    Ok(stats)
}

/// Arg-max class per logit row.
pub fn predict(logits: &Array2<f32>) -> Vec<usize> {
    logits
        .axis_iter(Axis(0))
        .map(|row| {
            row.iter()
                .enumerate()
                .fold((0, f32::NEG_INFINITY), |best, (i, &v)| if v > best.1 { (i, v) } else { best })
                .0
        })
        .collect()
}

/// Percentage of `data` the learner classifies correctly.
pub fn evaluate<L: Learner>(learner: &L, data: &Dataset) -> Result<f32, FedError> {
    if data.is_empty() {
        return Err(FedError::EmptyDataset);
    }
    let predicted = predict(&learner.forward(data.features())?);
    let correct = predicted
        .iter()
        .zip(data.labels())
        .filter(|(p, l)| p == l)
        .count();
    Ok(100.0 * correct as f32 / data.len() as f32)
}
