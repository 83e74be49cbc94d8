//! # fedaf-sim: Federated Learning Simulation
//!
//! Simulates federated learning over non-IID client partitions with two
//! server strategies:
//!
//! - **FedAvg**: clients train locally from the global model and the server
//!   averages their parameters, weighted by sample count (or with a robust
//!   rule, see [`AggregationMethod`]).
//! - **FedAF**: clients ship distilled synthetic data and class-wise soft
//!   labels instead of parameters; the server trains on the pooled synthetic
//!   data and tracks agreement with the consensus soft labels.
//!
//! Clients are split with a Dirichlet(α) label distribution and a fraction of
//! them can be made dishonest by randomizing their labels.
//!
//! ## Usage
//!
//! ```no_run
//! use fedaf_sim::{ExperimentConfig, Simulation, SoftmaxClassifier};
//!
//! let cfg = ExperimentConfig::default();
//! let model = SoftmaxClassifier::new(cfg.dataset.feature_dim(), cfg.dataset.num_classes(), cfg.seed);
//! let report = Simulation::new(cfg)?.run(model)?;
//! println!("{}", report.history.to_json()?);
//! # Ok::<(), fedaf_sim::FedError>(())
//! ```
//!
//! Models plug in through the [`Learner`] trait.

#![deny(missing_docs)]

pub mod aggregators;
pub mod client;
pub mod config;
pub mod data;
pub mod distill;
pub mod error;
pub mod history;
pub mod math;
pub mod model;
pub mod orchestrator;
pub mod server;
pub mod state;

// Re-exports
pub use aggregators::{aggregate, fedavg, fedavg_states, median, trimmed_mean, AggregationMethod};
pub use client::{Client, ClientUpdate};
pub use config::{DatasetKind, DistillConfig, ExperimentConfig, Strategy};
pub use data::{ClientPartition, Dataset, HonestyFlag};
pub use distill::{Augmenter, ClassSoftLabels, DistillStore, Replicate, SyntheticDataset};
pub use error::FedError;
pub use history::{RoundRecord, RunHistory};
pub use model::{Learner, SoftmaxClassifier, TrainConfig};
pub use orchestrator::{Simulation, SimulationReport};
pub use server::{DistillReport, Server};
pub use state::ModelState;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
