//! Class rebalancing of pooled synthetic data on the server.

use ndarray::{concatenate, Array2, Axis};
use rand::rngs::StdRng;

use crate::data::Dataset;
use crate::error::FedError;

/// Produces extra samples for under-represented classes.
///
/// Image transforms (crops, flips, colour jitter) belong to the training
/// framework; plug them in through this trait.
pub trait Augmenter: Send + Sync {
    /// Return `copies` augmented versions of every row of `samples`,
    /// stacked row-wise (`copies * samples.nrows()` rows).
    fn augment(&self, samples: &Array2<f32>, copies: usize, rng: &mut StdRng) -> Array2<f32>;
}

/// Repeats samples unchanged, which amounts to oversampling.
#[derive(Clone, Copy, Debug, Default)]
pub struct Replicate;

impl Augmenter for Replicate {
    fn augment(&self, samples: &Array2<f32>, copies: usize, _rng: &mut StdRng) -> Array2<f32> {
        let views = vec![samples.view(); copies];
        concatenate(Axis(0), &views).unwrap_or_else(|_| Array2::zeros((0, samples.ncols())))
    }
}

/// Top up every present class towards the largest class count.
///
/// A class with `n` samples, where the largest class has `max`, gains
/// `max / n - 1` augmented copies of all its samples (integer division, so
/// classes may stay somewhat short of `max`). Output is grouped by class.
pub fn balance_classes(
    data: &Dataset,
    augmenter: &dyn Augmenter,
    rng: &mut StdRng,
) -> Result<Dataset, FedError> {
    if data.is_empty() {
        return Err(FedError::EmptyDataset);
    }
    let counts = data.class_counts();
    let max = counts.iter().copied().max().unwrap_or(0);

    let mut parts = Vec::new();
    for (class, &count) in counts.iter().enumerate() {
        if count == 0 {
            continue;
        }
        let members = data.subset(&data.indices_of_class(class));
        let copies = max / count - 1;
        if copies > 0 {
            let extra = augmenter.augment(members.features(), copies, rng);
            let n_extra = extra.nrows();
            parts.push(members);
            parts.push(Dataset::new(extra, vec![class; n_extra], data.num_classes())?);
        } else {
            parts.push(members);
        }
    }
    Dataset::concat(&parts)
}
