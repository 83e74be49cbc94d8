//! Round-based simulation driver.
//!
//! Owns the experiment's data, the fixed client partitions and honesty flags,
//! and runs `num_rounds` communication rounds with either FedAvg or FedAF.
//! Clients of a round run in parallel on the rayon pool; each gets its own RNG
//! derived from `(seed, round, client_id)`, so a run is reproducible no matter
//! how threads are scheduled.

use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::client::{Client, ClientUpdate};
use crate::config::{ExperimentConfig, Strategy};
use crate::data::{assign_honesty, dirichlet_partition, ClientPartition, Dataset, HonestyFlag};
use crate::distill::{consensus, Augmenter, ClassSoftLabels, DistillParams, DistillStore, Replicate, SyntheticDataset};
use crate::error::FedError;
use crate::history::{RoundRecord, RunHistory};
use crate::model::{Learner, TrainConfig};
use crate::server::Server;
use crate::state::ModelState;

/// RNG stream reserved for the server within a round.
const SERVER_STREAM: u64 = u64::MAX;

/// Result of a full run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimulationReport {
    /// One record per round that ran
    pub history: RunHistory,
    /// Global parameters after the last round
    pub final_state: ModelState,
}

/// What a single round produced besides the new global model.
struct RoundOutcome {
    mean_loss: Option<f32>,
    lgkm_loss: Option<f32>,
    skipped: bool,
}

/// A configured federated learning experiment.
pub struct Simulation {
    cfg: ExperimentConfig,
    train: Dataset,
    test: Dataset,
    partitions: Vec<ClientPartition>,
    honesty: Vec<HonestyFlag>,
    augmenter: Box<dyn Augmenter>,
}

impl Simulation {
    /// Generate data shaped after `cfg.dataset`, then partition it.
    pub fn new(cfg: ExperimentConfig) -> Result<Self, FedError> {
        cfg.validate()?;
        let (train, test) =
            Dataset::gaussian_clusters(cfg.dataset, cfg.train_per_class, cfg.test_per_class, cfg.seed)?;
        Self::with_data(cfg, train, test)
    }

    /// Run on caller-supplied train and test sets.
    ///
    /// Partitions and honesty flags are drawn once here from `cfg.seed`.
    pub fn with_data(cfg: ExperimentConfig, train: Dataset, test: Dataset) -> Result<Self, FedError> {
        cfg.validate()?;
        if train.is_empty() || test.is_empty() {
            return Err(FedError::EmptyDataset);
        }
        if train.feature_dim() != test.feature_dim() || train.num_classes() != test.num_classes() {
            return Err(FedError::DimensionMismatch);
        }

        let mut rng = StdRng::seed_from_u64(cfg.seed);
        let partitions = dirichlet_partition(
            train.labels(),
            train.num_classes(),
            cfg.num_clients,
            cfg.alpha,
            cfg.min_partition_size,
            &mut rng,
        )?;
        let honesty = assign_honesty(cfg.num_clients, cfg.honesty_ratio, &mut rng);

        let sizes: Vec<usize> = partitions.iter().map(ClientPartition::len).collect();
        info!(
            dataset = cfg.dataset.name(),
            clients = cfg.num_clients,
            honest = cfg.num_honest(),
            ?sizes,
            "simulation prepared"
        );

        Ok(Self {
            cfg,
            train,
            test,
            partitions,
            honesty,
            augmenter: Box::new(Replicate),
        })
    }

    /// Use `augmenter` when the FedAF server balances classes.
    pub fn with_augmenter(mut self, augmenter: Box<dyn Augmenter>) -> Self {
        self.augmenter = augmenter;
        self
    }

    /// Experiment settings.
    pub fn config(&self) -> &ExperimentConfig {
        &self.cfg
    }

    /// Full training set.
    pub fn train_data(&self) -> &Dataset {
        &self.train
    }

    /// Held-out test set.
    pub fn test_data(&self) -> &Dataset {
        &self.test
    }

    /// Client partitions, indexed by client id.
    pub fn partitions(&self) -> &[ClientPartition] {
        &self.partitions
    }

    /// Honesty flags, indexed by client id.
    pub fn honesty(&self) -> &[HonestyFlag] {
        &self.honesty
    }

    /// Number of clients with corrupted labels.
    pub fn num_dishonest(&self) -> usize {
        self.honesty.iter().filter(|h| h.is_dishonest()).count()
    }

    /// Artifact store for FedAF runs.
    pub fn store(&self) -> DistillStore {
        DistillStore::new(&self.cfg.distill.store_dir, &self.cfg)
    }

    /// Run every round, starting from `template`'s parameters.
    ///
    /// In FedAF mode the latest model in the store, if any, replaces the
    /// template's parameters and the run continues with the following round.
    pub fn run<L: Learner>(&self, template: L) -> Result<SimulationReport, FedError> {
        let strategy = self.cfg.strategy.clone();
        let mut server = Server::new(template.clone(), self.cfg.aggregation.clone());
        let store = self.store();

        let mut first_round = 1;
        if strategy == Strategy::FedAf {
            if let Some((round, state)) = store.load_latest_model()? {
                server.load_state(&state)?;
                first_round = round + 1;
                info!(round, "resuming from saved global model");
            }
        }

        let mut history = RunHistory::new();
        for round in first_round..=self.cfg.num_rounds {
            info!(round, total = self.cfg.num_rounds, strategy = strategy.name(), "round started");
            let before = server.global_state();

            let outcome = match strategy {
                Strategy::FedAvg => self.fedavg_round(round, &mut server, &template)?,
                Strategy::FedAf => self.fedaf_round(round, &mut server, &template, &store)?,
            };

            let accuracy = server.evaluate(&self.test)?;
            let after = server.global_state();
            let update_norm = after.distance(&before);
            info!(
                round,
                accuracy = %format!("{:.2}", accuracy),
                update_norm,
                global_norm = after.norm(),
                "round finished"
            );

            history.push(RoundRecord {
                round,
                strategy: strategy.name().to_string(),
                n_clients: self.cfg.num_clients,
                n_dishonest: self.num_dishonest(),
                accuracy,
                mean_loss: outcome.mean_loss,
                lgkm_loss: outcome.lgkm_loss,
                update_norm,
                skipped: outcome.skipped,
            });
        }

        if let Some(best) = history.best_round() {
            info!(round = best.round, accuracy = best.accuracy, "best round");
        }
        Ok(SimulationReport {
            history,
            final_state: server.global_state(),
        })
    }

    fn client<L: Learner>(
        &self,
        partition: &ClientPartition,
        template: &L,
        global: &ModelState,
        rng: &mut StdRng,
    ) -> Result<Client<L>, FedError> {
        let id = partition.client_id();
        let mut client = Client::from_partition(&self.train, partition, self.honesty[id], template.clone(), rng)?;
        client.set_model(global)?;
        Ok(client)
    }

    fn fedavg_round<L: Learner>(
        &self,
        round: usize,
        server: &mut Server<L>,
        template: &L,
    ) -> Result<RoundOutcome, FedError> {
        let global = server.global_state();
        let train_cfg = TrainConfig {
            epochs: self.cfg.local_epochs,
            batch_size: self.cfg.batch_size,
            lr: self.cfg.lr,
        };

        let updates = self
            .partitions
            .par_iter()
            .map(|partition| -> Result<ClientUpdate, FedError> {
                let mut rng = client_rng(self.cfg.seed, round, partition.client_id() as u64);
                let mut client = self.client(partition, template, &global, &mut rng)?;
                client.train(&train_cfg, &mut rng)
            })
            .collect::<Result<Vec<ClientUpdate>, FedError>>()?;

        let losses: Vec<f32> = updates.iter().filter_map(|u| u.loss).collect();
        let mean_loss = (!losses.is_empty()).then(|| losses.iter().sum::<f32>() / losses.len() as f32);

        if updates.iter().all(|u| u.num_samples == 0) {
            warn!(round, "no client trained on any data, keeping previous global model");
            return Ok(RoundOutcome {
                mean_loss,
                lgkm_loss: None,
                skipped: true,
            });
        }

        server.aggregate(&updates)?;
        Ok(RoundOutcome {
            mean_loss,
            lgkm_loss: None,
            skipped: false,
        })
    }

    fn fedaf_round<L: Learner>(
        &self,
        round: usize,
        server: &mut Server<L>,
        template: &L,
        store: &DistillStore,
    ) -> Result<RoundOutcome, FedError> {
        let global = server.global_state();
        let params = DistillParams::from(&self.cfg.distill);
        let temperature = self.cfg.distill.temperature;

        let results = self
            .partitions
            .par_iter()
            .map(|partition| -> Result<Option<(SyntheticDataset, ClassSoftLabels)>, FedError> {
                let mut rng = client_rng(self.cfg.seed, round, partition.client_id() as u64);
                let client = self.client(partition, template, &global, &mut rng)?;
                if client.data().is_empty() {
                    warn!(client = client.id(), "no local data, nothing to distill");
                    return Ok(None);
                }
                let labels = client.soft_labels(temperature)?;
                let synthetic = client.distill(round, &params, &mut rng)?;
                Ok(Some((synthetic, labels)))
            })
            .collect::<Result<Vec<Option<(SyntheticDataset, ClassSoftLabels)>>, FedError>>()?;

        let mut client_labels = Vec::new();
        for (synthetic, labels) in results.into_iter().flatten() {
            store.save_synthetic(&synthetic)?;
            client_labels.push(labels);
        }

        if client_labels.is_empty() {
            warn!(round, "no client produced soft labels");
        } else {
            let rc = consensus(&client_labels)?;
            store.save_consensus(round, &rc)?;
            info!(round, classes = rc.present_classes().len(), "consensus soft labels saved");
        }

        let mut rng = client_rng(self.cfg.seed, round, SERVER_STREAM);
        let report = server.distill_update(
            round,
            store,
            self.cfg.num_clients,
            &self.cfg.distill,
            &*self.augmenter,
            &mut rng,
        )?;

        Ok(match report {
            Some(report) => RoundOutcome {
                mean_loss: report.ce_loss,
                lgkm_loss: report.lgkm_loss,
                skipped: false,
            },
            None => RoundOutcome {
                mean_loss: None,
                lgkm_loss: None,
                skipped: true,
            },
        })
    }
}

/// Independent RNG for one participant of one round.
pub fn client_rng(seed: u64, round: usize, stream: u64) -> StdRng {
    let mixed = seed
        ^ (round as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15)
        ^ stream.wrapping_add(1).wrapping_mul(0xC2B2_AE3D_27D4_EB4F);
    StdRng::seed_from_u64(mixed)
}
