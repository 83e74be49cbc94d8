//! Central server: owns the global model, aggregates, evaluates.

use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::aggregators::{aggregate, AggregationMethod};
use crate::client::ClientUpdate;
use crate::config::DistillConfig;
use crate::data::Dataset;
use crate::distill::{
    balance_classes, class_soft_labels, lambda_schedule, matched_classes, Augmenter, ClassSoftLabels,
    DistillStore,
};
use crate::error::FedError;
use crate::math::symmetric_kl;
use crate::model::{evaluate, train_local, Learner, TrainConfig};
use crate::state::ModelState;

/// Summary of a FedAF server update.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DistillReport {
    /// Clients whose synthetic data was used
    pub contributing_clients: usize,
    /// Per-class sample counts after balancing
    pub class_counts: Vec<usize>,
    /// Cross-entropy of the final server epoch
    pub ce_loss: Option<f32>,
    /// Consensus divergence measured in the final server epoch
    pub lgkm_loss: Option<f32>,
    /// Consensus weight of the final server epoch
    pub lambda: Option<f32>,
}

impl DistillReport {
    /// `CE + λ · LGKM` of the final epoch.
    pub fn combined_loss(&self) -> Option<f32> {
        match (self.ce_loss, self.lgkm_loss, self.lambda) {
            (Some(ce), Some(kl), Some(lambda)) => Some(ce + lambda * kl),
            (Some(ce), _, _) => Some(ce),
            _ => None,
        }
    }
}

/// The FL server.
pub struct Server<L: Learner> {
    global: L,
    method: AggregationMethod,
}

impl<L: Learner> Server<L> {
    /// Server around an initialized global model.
    pub fn new(global: L, method: AggregationMethod) -> Self {
        info!(method = method.name(), "global model initialized");
        Self { global, method }
    }

    /// Current global parameters, as distributed to clients.
    pub fn global_state(&self) -> ModelState {
        self.global.state()
    }

    /// Borrow the global model.
    pub fn global(&self) -> &L {
        &self.global
    }

    /// Replace the global parameters (e.g. when resuming).
    pub fn load_state(&mut self, state: &ModelState) -> Result<(), FedError> {
        self.global.load_state(state)
    }

    /// Aggregate client updates into the new global model.
    ///
    /// FedAvg weights each client by its sample count. Updates from clients
    /// without data echo the global state and are left out of every rule.
    pub fn aggregate(&mut self, updates: &[ClientUpdate]) -> Result<(), FedError> {
        let trained: Vec<&ClientUpdate> = updates.iter().filter(|u| u.num_samples > 0).collect();
        if trained.is_empty() {
            return Err(FedError::InsufficientQuorum {
                needed: 1,
                actual: 0,
            });
        }
        if trained.len() < updates.len() {
            debug!(dropped = updates.len() - trained.len(), "ignoring clients without data");
        }

        let states: Vec<ModelState> = trained.iter().map(|u| u.state.clone()).collect();
        let weights: Vec<f32> = trained.iter().map(|u| u.num_samples as f32).collect();

        let merged = aggregate(&self.method, &states, &weights)?;
        self.global.load_state(&merged)?;
        info!(clients = trained.len(), method = self.method.name(), "global model aggregated");
        Ok(())
    }

    /// Test accuracy of the global model, in percent.
    pub fn evaluate(&self, test: &Dataset) -> Result<f32, FedError> {
        let accuracy = evaluate(&self.global, test)?;
        info!(accuracy = %format!("{:.2}", accuracy), "accuracy on test data");
        Ok(accuracy)
    }

    /// FedAF server step for `round`.
    ///
    /// Pools every client's synthetic data from `store`, rebalances classes,
    /// and trains the global model on it while tracking the symmetric KL
    /// between the consensus soft labels `Rc` and the model's own class-wise
    /// soft labels `T`. `T` is measured without gradient, so only the
    /// cross-entropy term moves parameters; the consensus term is reported.
    ///
    /// Returns `None` (model unchanged) when no client produced usable data or
    /// no consensus labels exist for the round.
    pub fn distill_update(
        &mut self,
        round: usize,
        store: &DistillStore,
        num_clients: usize,
        cfg: &DistillConfig,
        augmenter: &dyn Augmenter,
        rng: &mut StdRng,
    ) -> Result<Option<DistillReport>, FedError> {
        let num_classes = self.global.num_classes();

        let rc = match store.load_consensus(round)? {
            Some(rc) => rc,
            None => {
                warn!(round, "no aggregated class-wise soft labels found");
                ClassSoftLabels::empty(num_classes)
            }
        };

        let mut parts = Vec::new();
        for client_id in 0..num_clients {
            match store.load_synthetic(client_id, round) {
                Ok(Some(syn)) if !syn.is_empty() => match syn.to_dataset() {
                    Ok(data) => parts.push(data),
                    Err(e) => warn!(client = client_id, error = %e, "invalid synthetic data, skipping"),
                },
                Ok(Some(_)) => warn!(client = client_id, "empty synthetic data, skipping"),
                Ok(None) => warn!(client = client_id, "no synthetic data found, skipping"),
                Err(e) => warn!(client = client_id, error = %e, "failed to load synthetic data, skipping"),
            }
        }

        if parts.is_empty() {
            warn!(round, "no synthetic data aggregated from clients, skipping model update");
            return Ok(None);
        }
        if rc.is_empty() {
            warn!(round, "no valid consensus soft labels, skipping model update");
            return Ok(None);
        }

        let contributing_clients = parts.len();
        let pooled = Dataset::concat(&parts)?;
        let balanced = balance_classes(&pooled, augmenter, rng)?;
        let class_counts = balanced.class_counts();
        info!(?class_counts, "class counts after augmentation");

        let train_cfg = TrainConfig {
            epochs: 1,
            batch_size: cfg.server_batch_size,
            lr: cfg.server_lr,
        };
        let mut report = DistillReport {
            contributing_clients,
            class_counts,
            ce_loss: None,
            lgkm_loss: None,
            lambda: None,
        };

        for epoch in 0..cfg.server_epochs {
            let lambda = lambda_schedule(epoch, cfg.server_epochs);

            let logits = self.global.forward(balanced.features())?;
            let t = class_soft_labels(&logits, balanced.labels(), num_classes, cfg.temperature)?;
            let (rc_valid, t_valid) = matched_classes(&rc, &t);
            let lgkm = if rc_valid.is_empty() {
                None
            } else {
                Some(symmetric_kl(&rc_valid, &t_valid)?)
            };

            let stats = train_local(&mut self.global, &balanced, &train_cfg, rng)?;
            report.ce_loss = Some(stats.final_loss);
            report.lgkm_loss = lgkm;
            report.lambda = Some(lambda);

            info!(
                epoch = epoch + 1,
                ce = stats.final_loss,
                lambda,
                lgkm = lgkm.unwrap_or(0.0),
                total = report.combined_loss().unwrap_or(stats.final_loss),
                "server epoch done"
            );
        }

        let path = store.save_model(round, &self.global.state())?;
        info!(path = %path.display(), "global model updated and saved");
        Ok(Some(report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExperimentConfig;
    use crate::distill::{Replicate, SyntheticDataset};
    use crate::model::SoftmaxClassifier;
    use ndarray::array;
    use rand::SeedableRng;

    fn update(id: usize, value: f32, n: usize) -> ClientUpdate {
        let mut state = ModelState::new();
        state.insert("weight", array![[value, value]]);
        state.insert("bias", array![[0.0, 0.0]]);
        ClientUpdate {
            client_id: id,
            state,
            num_samples: n,
            loss: Some(0.1),
        }
    }

    #[test]
    fn test_aggregate_weights_by_samples() {
        let mut server = Server::new(SoftmaxClassifier::new(1, 2, 0), AggregationMethod::FedAvg);
        server
            .aggregate(&[update(0, 1.0, 10), update(1, 3.0, 30)])
            .unwrap();
        let w = server.global_state().get("weight").unwrap().clone();
        assert!((w[[0, 0]] - 2.5).abs() < 1e-6);
    }

    #[test]
    fn test_aggregate_rejects_all_empty_clients() {
        let mut server = Server::new(SoftmaxClassifier::new(1, 2, 0), AggregationMethod::FedAvg);
        assert!(server.aggregate(&[update(0, 1.0, 0)]).is_err());
        assert!(server.aggregate(&[]).is_err());
    }

    #[test]
    fn test_median_ignores_clients_without_data() {
        let mut server = Server::new(SoftmaxClassifier::new(1, 2, 0), AggregationMethod::Median);
        let mut echo = update(0, 0.0, 0);
        echo.state = server.global_state();

        server.aggregate(&[echo, update(1, 4.0, 25)]).unwrap();
        let w = server.global_state().get("weight").unwrap().clone();
        assert_eq!(w[[0, 0]], 4.0);
        assert_eq!(w[[0, 1]], 4.0);
    }

    #[test]
    fn test_trimmed_mean_needs_a_trained_client() {
        let mut server = Server::new(SoftmaxClassifier::new(1, 2, 0), AggregationMethod::TrimmedMean(0.2));
        assert!(matches!(
            server.aggregate(&[update(0, 1.0, 0), update(1, 2.0, 0)]),
            Err(FedError::InsufficientQuorum { needed: 1, actual: 0 })
        ));
    }

    #[test]
    fn test_evaluate_percent() {
        let server = Server::new(SoftmaxClassifier::new(2, 2, 0), AggregationMethod::FedAvg);
        let test = Dataset::new(array![[1.0, 0.0], [0.0, 1.0]], vec![0, 1], 2).unwrap();
        let acc = server.evaluate(&test).unwrap();
        assert!((0.0..=100.0).contains(&acc));
    }

    fn distill_cfg() -> DistillConfig {
        DistillConfig {
            server_epochs: 3,
            server_lr: 0.5,
            server_batch_size: 4,
            ..DistillConfig::default()
        }
    }

    #[test]
    fn test_distill_update_skips_without_synthetic_data() {
        let dir = tempfile::tempdir().unwrap();
        let store = DistillStore::new(dir.path(), &ExperimentConfig::default());
        let mut server = Server::new(SoftmaxClassifier::new(2, 2, 0), AggregationMethod::FedAvg);
        let before = server.global_state();
        let mut rng = StdRng::seed_from_u64(0);

        let report = server
            .distill_update(1, &store, 3, &distill_cfg(), &Replicate, &mut rng)
            .unwrap();
        assert!(report.is_none());
        assert_eq!(server.global_state(), before);
    }

    fn two_class_synthetic() -> Dataset {
        Dataset::new(
            array![[1.0, 0.0], [0.9, 0.1], [0.8, 0.0], [0.0, 1.0]],
            vec![0, 0, 0, 1],
            2,
        )
        .unwrap()
    }

    fn consensus_labels() -> ClassSoftLabels {
        ClassSoftLabels {
            probs: vec![Some(array![0.8, 0.2]), Some(array![0.3, 0.7])],
            counts: vec![3, 1],
        }
    }

    #[test]
    fn test_distill_update_skips_without_consensus() {
        let dir = tempfile::tempdir().unwrap();
        let store = DistillStore::new(dir.path(), &ExperimentConfig::default());
        store
            .save_synthetic(&SyntheticDataset::from_dataset(0, 1, &two_class_synthetic()))
            .unwrap();

        let mut server = Server::new(SoftmaxClassifier::new(2, 2, 0), AggregationMethod::FedAvg);
        let before = server.global_state();
        let mut rng = StdRng::seed_from_u64(0);
        let report = server
            .distill_update(1, &store, 1, &distill_cfg(), &Replicate, &mut rng)
            .unwrap();

        assert!(report.is_none());
        assert_eq!(server.global_state(), before);
        assert!(store.load_latest_model().unwrap().is_none());
    }

    #[test]
    fn test_distill_update_skips_unreadable_client_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = DistillStore::new(dir.path(), &ExperimentConfig::default());
        store
            .save_synthetic(&SyntheticDataset::from_dataset(0, 1, &two_class_synthetic()))
            .unwrap();
        let corrupt = store.synthetic_path(1, 1);
        std::fs::create_dir_all(corrupt.parent().unwrap()).unwrap();
        std::fs::write(&corrupt, "{ truncated").unwrap();
        store.save_consensus(1, &consensus_labels()).unwrap();

        let mut server = Server::new(SoftmaxClassifier::new(2, 2, 0), AggregationMethod::FedAvg);
        let mut rng = StdRng::seed_from_u64(0);
        let report = server
            .distill_update(1, &store, 2, &distill_cfg(), &Replicate, &mut rng)
            .unwrap()
            .expect("valid client data should still train");

        assert_eq!(report.contributing_clients, 1);
        assert_eq!(report.class_counts, vec![3, 3]);
    }

    #[test]
    fn test_distill_update_trains_and_saves() {
        let dir = tempfile::tempdir().unwrap();
        let store = DistillStore::new(dir.path(), &ExperimentConfig::default());
        let data = Dataset::new(
            array![[1.0, 0.0], [0.9, 0.1], [0.8, 0.0], [0.0, 1.0]],
            vec![0, 0, 0, 1],
            2,
        )
        .unwrap();
        store
            .save_synthetic(&SyntheticDataset::from_dataset(0, 1, &data))
            .unwrap();
        store
            .save_consensus(
                1,
                &ClassSoftLabels {
                    probs: vec![Some(array![0.8, 0.2]), Some(array![0.3, 0.7])],
                    counts: vec![3, 1],
                },
            )
            .unwrap();

        let mut server = Server::new(SoftmaxClassifier::new(2, 2, 0), AggregationMethod::FedAvg);
        let before = server.global_state();
        let mut rng = StdRng::seed_from_u64(0);
        let report = server
            .distill_update(1, &store, 2, &distill_cfg(), &Replicate, &mut rng)
            .unwrap()
            .expect("round should train");

        // Client 1 had no file and is skipped; class 1 is topped up 3/1 - 1 = 2 times.
        assert_eq!(report.contributing_clients, 1);
        assert_eq!(report.class_counts, vec![3, 3]);
        assert!(report.lgkm_loss.unwrap() >= 0.0);
        assert!((report.lambda.unwrap() - lambda_schedule(2, 3)).abs() < 1e-6);
        assert_ne!(server.global_state(), before);

        let (round, saved) = store.load_latest_model().unwrap().unwrap();
        assert_eq!(round, 1);
        assert_eq!(saved, server.global_state());
    }
}
