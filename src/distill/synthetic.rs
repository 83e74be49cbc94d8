//! Client-side dataset distillation by distribution matching.

use ndarray::{concatenate, Array2, Axis};
use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use crate::config::DistillConfig;
use crate::data::Dataset;
use crate::error::FedError;

/// A client's distilled samples for one round, as persisted on disk.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SyntheticDataset {
    /// Producing client
    pub client_id: usize,
    /// Round the data was distilled in
    pub round: usize,
    /// Number of label classes
    pub num_classes: usize,
    /// Synthetic feature rows
    pub features: Array2<f32>,
    /// One label per synthetic row
    pub labels: Vec<usize>,
}

impl SyntheticDataset {
    /// Wrap a distilled dataset with its provenance.
    pub fn from_dataset(client_id: usize, round: usize, data: &Dataset) -> Self {
        Self {
            client_id,
            round,
            num_classes: data.num_classes(),
            features: data.features().clone(),
            labels: data.labels().to_vec(),
        }
    }

    /// Validate and convert back to a [`Dataset`].
    pub fn to_dataset(&self) -> Result<Dataset, FedError> {
        Dataset::new(self.features.clone(), self.labels.clone(), self.num_classes)
    }

    /// Number of synthetic samples.
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Whether the client produced nothing.
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Distribution-matching hyper-parameters.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DistillParams {
    /// Synthetic samples per class
    pub ipc: usize,
    /// Matching iterations
    pub iterations: usize,
    /// Step size on synthetic features
    pub lr: f32,
    /// Random embedding width
    pub embed_dim: usize,
    /// Real samples per class per iteration
    pub real_batch: usize,
}

impl From<&DistillConfig> for DistillParams {
    fn from(cfg: &DistillConfig) -> Self {
        Self {
            ipc: cfg.ipc,
            iterations: cfg.iterations,
            lr: cfg.distill_lr,
            embed_dim: cfg.embed_dim,
            real_batch: cfg.real_batch,
        }
    }
}

/// Distill `ipc` samples per present class from `data`.
///
/// Synthetic rows start as copies of random real rows of their class. Each
/// iteration draws a random linear embedding `P` and takes a normalized
/// gradient step on `‖mean(S·P) − mean(R·P)‖²`, pulling the synthetic rows'
/// mean embedding toward that of a real batch `R`. Classes absent from `data`
/// produce no rows.
pub fn distribution_matching(
    data: &Dataset,
    params: &DistillParams,
    rng: &mut StdRng,
) -> Result<Dataset, FedError> {
    let dim = data.feature_dim();
    if data.is_empty() || params.ipc == 0 {
        return Ok(Dataset::empty(dim, data.num_classes()));
    }
    let embed = Normal::new(0.0f32, 1.0 / (dim as f32).sqrt())
        .map_err(|e| FedError::InvalidConfig(e.to_string()))?;

    let class_indices: Vec<(usize, Vec<usize>)> = (0..data.num_classes())
        .map(|c| (c, data.indices_of_class(c)))
        .filter(|(_, idx)| !idx.is_empty())
        .collect();

    let mut synthetic: Vec<Array2<f32>> = class_indices
        .iter()
        .map(|(_, idx)| {
            let picks = draw(idx, params.ipc, rng);
            data.features().select(Axis(0), &picks)
        })
        .collect();

    for _ in 0..params.iterations {
        let projection =
            Array2::from_shape_fn((dim, params.embed_dim.max(1)), |_| embed.sample(rng));
        // ‖P‖²_F bounds the largest eigenvalue of P·Pᵀ, so lr <= 1 never overshoots.
        let step = params.lr / projection.iter().map(|x| x * x).sum::<f32>().max(f32::EPSILON);

        for ((_, idx), syn) in class_indices.iter().zip(synthetic.iter_mut()) {
            let batch = draw(idx, params.real_batch.max(1).min(idx.len()), rng);
            let real = data.features().select(Axis(0), &batch);

            let real_mean = real.dot(&projection).mean_axis(Axis(0)).ok_or(FedError::EmptyDataset)?;
            let syn_mean = syn.dot(&projection).mean_axis(Axis(0)).ok_or(FedError::EmptyDataset)?;
            let gap = syn_mean - real_mean;

            // The gradient w.r.t. each synthetic row is proportional to P · gap.
            let grad = projection.dot(&gap);
            for mut row in syn.axis_iter_mut(Axis(0)) {
                row.scaled_add(-step, &grad);
            }
        }
    }

    let labels: Vec<usize> = class_indices
        .iter()
        .flat_map(|(c, _)| std::iter::repeat(*c).take(params.ipc))
        .collect();
    let views: Vec<_> = synthetic.iter().map(|s| s.view()).collect();
    let features = concatenate(Axis(0), &views)?;
    Dataset::new(features, labels, data.num_classes())
}

/// `k` positions from `pool`: without replacement when possible.
fn draw(pool: &[usize], k: usize, rng: &mut StdRng) -> Vec<usize> {
    if k <= pool.len() {
        sample(rng, pool.len(), k).into_iter().map(|i| pool[i]).collect()
    } else {
        (0..k).map(|_| pool[rng.gen_range(0..pool.len())]).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array1;
    use rand::SeedableRng;

    fn params(ipc: usize, iterations: usize) -> DistillParams {
        DistillParams {
            ipc,
            iterations,
            lr: 1.0,
            embed_dim: 16,
            real_batch: 64,
        }
    }

    fn two_class_data() -> Dataset {
        let n = 40;
        let labels: Vec<usize> = (0..n).map(|i| i % 2).collect();
        let features = Array2::from_shape_fn((n, 8), |(row, col)| {
            let base = if labels[row] == 0 { -1.0 } else { 1.0 };
            base + 0.1 * ((row * 8 + col) as f32).sin()
        });
        Dataset::new(features, labels, 3).unwrap()
    }

    fn class_mean(data: &Dataset, class: usize) -> Array1<f32> {
        data.subset(&data.indices_of_class(class))
            .features()
            .mean_axis(Axis(0))
            .unwrap()
    }

    #[test]
    fn test_ipc_per_present_class() {
        let data = two_class_data();
        let mut rng = StdRng::seed_from_u64(42);
        let syn = distribution_matching(&data, &params(5, 3), &mut rng).unwrap();

        assert_eq!(syn.len(), 10);
        // Class 2 has no real samples, so it gets no synthetic rows.
        assert_eq!(syn.class_counts(), vec![5, 5, 0]);
        assert_eq!(syn.feature_dim(), 8);
    }

    #[test]
    fn test_synthetic_mean_tracks_real_mean() {
        let data = two_class_data();
        let mut rng = StdRng::seed_from_u64(7);
        let syn = distribution_matching(&data, &params(3, 200), &mut rng).unwrap();

        for class in 0..2 {
            let gap = &class_mean(&syn, class) - &class_mean(&data, class);
            let norm = gap.iter().map(|x| x * x).sum::<f32>().sqrt();
            assert!(norm < 0.1, "class {} mean gap {}", class, norm);
        }
    }

    #[test]
    fn test_more_ipc_than_samples_draws_with_replacement() {
        let data = two_class_data().subset(&[0, 1]);
        let mut rng = StdRng::seed_from_u64(1);
        let syn = distribution_matching(&data, &params(4, 1), &mut rng).unwrap();
        assert_eq!(syn.class_counts(), vec![4, 4, 0]);
    }

    #[test]
    fn test_empty_input_gives_empty_output() {
        let mut rng = StdRng::seed_from_u64(1);
        let syn = distribution_matching(&Dataset::empty(4, 2), &params(4, 1), &mut rng).unwrap();
        assert!(syn.is_empty());
        assert_eq!(syn.feature_dim(), 4);
    }

    #[test]
    fn test_synthetic_dataset_provenance() {
        let data = two_class_data();
        let wrapped = SyntheticDataset::from_dataset(3, 7, &data);
        assert_eq!((wrapped.client_id, wrapped.round), (3, 7));
        assert_eq!(wrapped.to_dataset().unwrap(), data);
        assert_eq!(wrapped.len(), 40);
    }
}
