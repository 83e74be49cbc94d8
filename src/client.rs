//! Simulated FL client: a private data partition and a local model copy.

use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::data::{randomize_labels, ClientPartition, Dataset, HonestyFlag};
use crate::distill::{class_soft_labels, distribution_matching, ClassSoftLabels, DistillParams, SyntheticDataset};
use crate::error::FedError;
use crate::model::{train_local, Learner, TrainConfig};
use crate::state::ModelState;

/// What a client sends back after a FedAvg training pass.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClientUpdate {
    /// Sending client
    pub client_id: usize,
    /// Locally trained parameters
    pub state: ModelState,
    /// Local sample count, used as the aggregation weight
    pub num_samples: usize,
    /// Mean loss of the last local epoch (`None` if nothing was trained)
    pub loss: Option<f32>,
}

/// One simulated participant.
pub struct Client<L: Learner> {
    id: usize,
    data: Dataset,
    learner: L,
}

impl<L: Learner> Client<L> {
    /// Create a client over already prepared local data.
    pub fn new(id: usize, data: Dataset, learner: L) -> Self {
        debug!(client = id, samples = data.len(), "client initialized");
        Self { id, data, learner }
    }

    /// Load a client's partition from the full training set.
    ///
    /// Dishonest clients get their labels randomized on every call.
    pub fn from_partition(
        full: &Dataset,
        partition: &ClientPartition,
        honesty: HonestyFlag,
        learner: L,
        rng: &mut StdRng,
    ) -> Result<Self, FedError> {
        let mut data = full.subset(partition.indices());
        if honesty.is_dishonest() {
            data = randomize_labels(&data, rng)?;
            debug!(client = partition.client_id(), "labels randomized");
        }
        Ok(Self::new(partition.client_id(), data, learner))
    }

    /// Client identifier.
    pub fn id(&self) -> usize {
        self.id
    }

    /// Local training data (labels possibly corrupted).
    pub fn data(&self) -> &Dataset {
        &self.data
    }

    /// Overwrite the local model with the global state.
    pub fn set_model(&mut self, state: &ModelState) -> Result<(), FedError> {
        self.learner.load_state(state)?;
        debug!(client = self.id, "global model loaded");
        Ok(())
    }

    /// Train the local copy and report the new parameters.
    pub fn train(&mut self, cfg: &TrainConfig, rng: &mut StdRng) -> Result<ClientUpdate, FedError> {
        if self.data.is_empty() {
            warn!(client = self.id, "no local data, returning global state unchanged");
            return Ok(ClientUpdate {
                client_id: self.id,
                state: self.learner.state(),
                num_samples: 0,
                loss: None,
            });
        }

        let stats = train_local(&mut self.learner, &self.data, cfg, rng)?;
        debug!(client = self.id, loss = stats.final_loss, "local training done");
        Ok(ClientUpdate {
            client_id: self.id,
            state: self.learner.state(),
            num_samples: self.data.len(),
            loss: Some(stats.final_loss),
        })
    }

    /// Class-wise soft labels of the current model over the local data.
    pub fn soft_labels(&self, temperature: f32) -> Result<ClassSoftLabels, FedError> {
        if self.data.is_empty() {
            return Ok(ClassSoftLabels::empty(self.data.num_classes()));
        }
        let logits = self.learner.forward(self.data.features())?;
        class_soft_labels(&logits, self.data.labels(), self.data.num_classes(), temperature)
    }

    /// Distill the local data into a small synthetic set for `round`.
    pub fn distill(
        &self,
        round: usize,
        params: &DistillParams,
        rng: &mut StdRng,
    ) -> Result<SyntheticDataset, FedError> {
        let distilled = distribution_matching(&self.data, params, rng)?;
        debug!(client = self.id, round, samples = distilled.len(), "distilled synthetic data");
        Ok(SyntheticDataset::from_dataset(self.id, round, &distilled))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::dirichlet_partition;
    use crate::model::SoftmaxClassifier;
    use ndarray::array;
    use rand::SeedableRng;

    fn data() -> Dataset {
        Dataset::new(
            array![[1.0, 0.0], [0.0, 1.0], [0.9, 0.1], [0.1, 0.9]],
            vec![0, 1, 0, 1],
            2,
        )
        .unwrap()
    }

    fn cfg() -> TrainConfig {
        TrainConfig {
            epochs: 5,
            batch_size: 2,
            lr: 0.5,
        }
    }

    #[test]
    fn test_train_reports_sample_count() {
        let mut client = Client::new(0, data(), SoftmaxClassifier::new(2, 2, 0));
        let before = client.learner.state();
        let mut rng = StdRng::seed_from_u64(0);

        let update = client.train(&cfg(), &mut rng).unwrap();
        assert_eq!(update.num_samples, 4);
        assert!(update.loss.is_some());
        assert_ne!(update.state, before);
    }

    #[test]
    fn test_empty_client_returns_global_state() {
        let model = SoftmaxClassifier::new(2, 2, 0);
        let mut client = Client::new(1, Dataset::empty(2, 2), model.clone());
        let mut rng = StdRng::seed_from_u64(0);

        let update = client.train(&cfg(), &mut rng).unwrap();
        assert_eq!(update.num_samples, 0);
        assert_eq!(update.loss, None);
        assert_eq!(update.state, model.state());
        assert!(client.soft_labels(1.0).unwrap().is_empty());
    }

    #[test]
    fn test_set_model_replaces_parameters() {
        let global = SoftmaxClassifier::new(2, 2, 7);
        let mut client = Client::new(0, data(), SoftmaxClassifier::new(2, 2, 0));
        client.set_model(&global.state()).unwrap();
        assert_eq!(client.learner.state(), global.state());
    }

    #[test]
    fn test_dishonest_partition_gets_new_labels() {
        let full = Dataset::new(ndarray::Array2::zeros((200, 2)), vec![0; 200], 5).unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        let parts = dirichlet_partition(full.labels(), 5, 2, 1.0, 50, &mut rng).unwrap();

        let honest = Client::from_partition(&full, &parts[0], HonestyFlag::Honest, SoftmaxClassifier::new(2, 5, 0), &mut rng).unwrap();
        assert!(honest.data().labels().iter().all(|&l| l == 0));

        let dishonest = Client::from_partition(&full, &parts[1], HonestyFlag::Dishonest, SoftmaxClassifier::new(2, 5, 0), &mut rng).unwrap();
        assert_eq!(dishonest.data().len(), parts[1].len());
        assert!(dishonest.data().labels().iter().any(|&l| l != 0));
    }

    #[test]
    fn test_soft_labels_and_distill() {
        let client = Client::new(4, data(), SoftmaxClassifier::new(2, 2, 0));
        let labels = client.soft_labels(2.0).unwrap();
        assert_eq!(labels.counts, vec![2, 2]);

        let params = DistillParams {
            ipc: 1,
            iterations: 2,
            lr: 1.0,
            embed_dim: 4,
            real_batch: 8,
        };
        let mut rng = StdRng::seed_from_u64(0);
        let syn = client.distill(3, &params, &mut rng).unwrap();
        assert_eq!((syn.client_id, syn.round, syn.len()), (4, 3, 2));
    }
}
