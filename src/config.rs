//! Experiment configuration.
//!
//! Every field has a default matching the reference MNIST FedAvg run, so a
//! JSON config only needs to list what it changes.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::aggregators::AggregationMethod;
use crate::error::FedError;

/// Datasets the simulator can shape its inputs after.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DatasetKind {
    /// 1×28×28 grayscale digits, 10 classes
    #[default]
    #[serde(rename = "MNIST")]
    Mnist,
    /// 3×32×32 colour images, 10 classes
    #[serde(rename = "CIFAR10")]
    Cifar10,
    /// 3×64×64 faces, 2 classes
    #[serde(rename = "CelebA")]
    CelebA,
}

impl DatasetKind {
    /// Number of image channels.
    pub fn channels(&self) -> usize {
        match self {
            DatasetKind::Mnist => 1,
            DatasetKind::Cifar10 | DatasetKind::CelebA => 3,
        }
    }

    /// Image height and width.
    pub fn image_size(&self) -> (usize, usize) {
        match self {
            DatasetKind::Mnist => (28, 28),
            DatasetKind::Cifar10 => (32, 32),
            DatasetKind::CelebA => (64, 64),
        }
    }

    /// Number of label classes.
    pub fn num_classes(&self) -> usize {
        match self {
            DatasetKind::Mnist | DatasetKind::Cifar10 => 10,
            DatasetKind::CelebA => 2,
        }
    }

    /// Flattened feature width (`channels * height * width`).
    pub fn feature_dim(&self) -> usize {
        let (h, w) = self.image_size();
        self.channels() * h * w
    }

    /// Name used in file paths and logs.
    pub fn name(&self) -> &'static str {
        match self {
            DatasetKind::Mnist => "MNIST",
            DatasetKind::Cifar10 => "CIFAR10",
            DatasetKind::CelebA => "CelebA",
        }
    }
}

/// Which server-side algorithm drives the rounds.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub enum Strategy {
    /// Clients train locally, server averages parameters
    #[default]
    #[serde(rename = "fedavg")]
    FedAvg,
    /// Clients distill synthetic data and soft labels, server trains on them
    #[serde(rename = "fedaf")]
    FedAf,
}

impl Strategy {
    /// Short name used in logs and file names.
    pub fn name(&self) -> &'static str {
        match self {
            Strategy::FedAvg => "fedavg",
            Strategy::FedAf => "fedaf",
        }
    }
}

/// Knobs for FedAF distillation rounds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DistillConfig {
    /// Synthetic instances per class each client produces
    pub ipc: usize,
    /// Softmax temperature for soft labels
    pub temperature: f32,
    /// Distribution-matching iterations per client
    pub iterations: usize,
    /// Step size for synthetic sample updates
    pub distill_lr: f32,
    /// Width of the random embedding used for distribution matching
    pub embed_dim: usize,
    /// Real samples drawn per class per matching iteration
    pub real_batch: usize,
    /// Server training epochs on the pooled synthetic data
    pub server_epochs: usize,
    /// Server learning rate
    pub server_lr: f32,
    /// Server mini-batch size
    pub server_batch_size: usize,
    /// Directory holding synthetic data, consensus labels and models
    pub store_dir: PathBuf,
}

impl Default for DistillConfig {
    fn default() -> Self {
        Self {
            ipc: 10,
            temperature: 2.0,
            iterations: 100,
            distill_lr: 1.0,
            embed_dim: 64,
            real_batch: 256,
            server_epochs: 10,
            server_lr: 0.001,
            server_batch_size: 256,
            store_dir: PathBuf::from("fedaf_store"),
        }
    }
}

/// Full description of one simulated experiment.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    /// Dataset shape to simulate
    pub dataset: DatasetKind,
    /// Number of simulated clients
    pub num_clients: usize,
    /// Dirichlet concentration for the non-IID split (smaller = more skewed)
    pub alpha: f64,
    /// Minimum samples every client must receive
    pub min_partition_size: usize,
    /// Local training epochs per round
    pub local_epochs: usize,
    /// Client learning rate
    pub lr: f32,
    /// Client mini-batch size
    pub batch_size: usize,
    /// Communication rounds
    pub num_rounds: usize,
    /// Fraction of clients that keep their true labels
    pub honesty_ratio: f64,
    /// Seed for every random draw in the run
    pub seed: u64,
    /// Round driver
    pub strategy: Strategy,
    /// Aggregation rule for FedAvg rounds
    pub aggregation: AggregationMethod,
    /// Training samples generated per class
    pub train_per_class: usize,
    /// Test samples generated per class
    pub test_per_class: usize,
    /// FedAF settings
    pub distill: DistillConfig,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            dataset: DatasetKind::Mnist,
            num_clients: 5,
            alpha: 0.1,
            min_partition_size: 10,
            local_epochs: 10,
            lr: 0.01,
            batch_size: 64,
            num_rounds: 20,
            honesty_ratio: 1.0,
            seed: 42,
            strategy: Strategy::FedAvg,
            aggregation: AggregationMethod::FedAvg,
            train_per_class: 600,
            test_per_class: 100,
            distill: DistillConfig::default(),
        }
    }
}

impl ExperimentConfig {
    /// Load and validate a JSON config file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, FedError> {
        let text = fs::read_to_string(path)?;
        let config: ExperimentConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the simulation cannot run with.
    pub fn validate(&self) -> Result<(), FedError> {
        let fail = |msg: &str| Err(FedError::InvalidConfig(msg.to_string()));

        if self.num_clients == 0 {
            return fail("num_clients must be positive");
        }
        if self.num_rounds == 0 {
            return fail("num_rounds must be positive");
        }
        if self.batch_size == 0 || self.distill.server_batch_size == 0 {
            return fail("batch sizes must be positive");
        }
        if !(self.alpha > 0.0) {
            return fail("alpha must be positive");
        }
        if !(self.lr > 0.0) || !(self.distill.server_lr > 0.0) {
            return fail("learning rates must be positive");
        }
        if !(0.0..=1.0).contains(&self.honesty_ratio) {
            return fail("honesty_ratio must lie in [0, 1]");
        }
        if self.train_per_class == 0 || self.test_per_class == 0 {
            return fail("train_per_class and test_per_class must be positive");
        }
        if let AggregationMethod::TrimmedMean(fraction) = self.aggregation {
            if !(0.0..=0.5).contains(&fraction) {
                return fail("trim fraction must lie in [0, 0.5]");
            }
        }
        if !(self.distill.temperature > 0.0) {
            return fail("temperature must be positive");
        }
        if self.strategy == Strategy::FedAf && (self.distill.ipc == 0 || self.distill.embed_dim == 0) {
            return fail("ipc and embed_dim must be positive");
        }
        Ok(())
    }

    /// Number of clients that keep their true labels.
    pub fn num_honest(&self) -> usize {
        (self.honesty_ratio * self.num_clients as f64).floor() as usize
    }
}
