//! FedAF-style aggregation-free distillation.
//!
//! Instead of parameters, clients ship two things each round:
//!
//! - a small synthetic dataset distilled from their private data
//!   ([`SyntheticDataset`]), and
//! - class-wise soft labels: for every class, the softmax of the model's mean
//!   logit over that class's samples ([`ClassSoftLabels`]).
//!
//! The server merges the soft labels into a consensus `Rc`, trains the global
//! model on the pooled synthetic data and tracks how far the model's own
//! class-wise soft labels `T` drift from `Rc` via a symmetric KL term.

pub mod balance;
pub mod store;
pub mod synthetic;

pub use balance::{balance_classes, Augmenter, Replicate};
pub use store::DistillStore;
pub use synthetic::{distribution_matching, DistillParams, SyntheticDataset};

use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

use crate::error::FedError;
use crate::math::softmax;

/// Lower end of the consensus-loss weight schedule.
const MIN_LAMBDA: f32 = 0.5;
/// Upper end of the consensus-loss weight schedule.
const MAX_LAMBDA: f32 = 1.0;

/// One probability vector per class, `None` for classes without samples.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClassSoftLabels {
    /// Per-class distribution over all classes
    pub probs: Vec<Option<Array1<f32>>>,
    /// Samples that contributed to each class's distribution
    pub counts: Vec<usize>,
}

impl ClassSoftLabels {
    /// Soft labels with no class present.
    pub fn empty(num_classes: usize) -> Self {
        Self {
            probs: vec![None; num_classes],
            counts: vec![0; num_classes],
        }
    }

    /// Number of classes covered (present or not).
    pub fn num_classes(&self) -> usize {
        self.probs.len()
    }

    /// Classes that have a distribution.
    pub fn present_classes(&self) -> Vec<usize> {
        self.probs
            .iter()
            .enumerate()
            .filter(|(_, p)| p.is_some())
            .map(|(c, _)| c)
            .collect()
    }

    /// Whether no class has a distribution.
    pub fn is_empty(&self) -> bool {
        self.probs.iter().all(Option::is_none)
    }
}

/// Class-wise soft labels from a batch of logits (`T` on the server side).
///
/// For each class, average the logits of its samples and apply a
/// temperature softmax to the average.
pub fn class_soft_labels(
    logits: &Array2<f32>,
    labels: &[usize],
    num_classes: usize,
    temperature: f32,
) -> Result<ClassSoftLabels, FedError> {
    if logits.nrows() != labels.len() || logits.ncols() != num_classes {
        return Err(FedError::DimensionMismatch);
    }

    let mut sums = Array2::<f32>::zeros((num_classes, num_classes));
    let mut counts = vec![0usize; num_classes];
    for (row, &label) in logits.axis_iter(Axis(0)).zip(labels) {
        if label >= num_classes {
            return Err(FedError::Shape(format!("label {} out of range", label)));
        }
        let mut acc = sums.row_mut(label);
        acc += &row;
        counts[label] += 1;
    }

    let probs = counts
        .iter()
        .enumerate()
        .map(|(c, &n)| {
            (n > 0).then(|| {
                let mean = sums.row(c).mapv(|x| x / n as f32);
                softmax(mean.view(), temperature)
            })
        })
        .collect();

    Ok(ClassSoftLabels { probs, counts })
}

/// Merge client soft labels into the consensus `Rc`.
///
/// Per class, the sample-count weighted mean of the clients' distributions,
/// renormalized to sum to one. Classes no client holds stay `None`.
pub fn consensus(client_labels: &[ClassSoftLabels]) -> Result<ClassSoftLabels, FedError> {
    let first = client_labels.first().ok_or(FedError::EmptyUpdates)?;
    let num_classes = first.num_classes();
    if client_labels.iter().any(|l| l.num_classes() != num_classes) {
        return Err(FedError::DimensionMismatch);
    }

    let mut merged = ClassSoftLabels::empty(num_classes);
    for class in 0..num_classes {
        let mut acc = Array1::<f32>::zeros(num_classes);
        let mut total = 0usize;
        for labels in client_labels {
            if let (Some(p), n) = (&labels.probs[class], labels.counts[class]) {
                if n == 0 || p.len() != num_classes {
                    continue;
                }
                acc.scaled_add(n as f32, p);
                total += n;
            }
        }
        if total > 0 {
            let sum = acc.sum();
            merged.probs[class] = Some(acc / sum);
            merged.counts[class] = total;
        }
    }
    Ok(merged)
}

/// Distributions of the classes present in both `rc` and `t`, in class order.
pub fn matched_classes(
    rc: &ClassSoftLabels,
    t: &ClassSoftLabels,
) -> (Vec<Array1<f32>>, Vec<Array1<f32>>) {
    rc.probs
        .iter()
        .zip(t.probs.iter())
        .filter_map(|(r, q)| match (r, q) {
            (Some(r), Some(q)) => Some((r.clone(), q.clone())),
            _ => None,
        })
        .unzip()
}

/// Weight of the consensus term at epoch `r` of `total`.
///
/// Ramps linearly from 0.5 to 1.0 so early epochs lean on cross-entropy.
pub fn lambda_schedule(r: usize, total: usize) -> f32 {
    if total == 0 {
        return MAX_LAMBDA;
    }
    MIN_LAMBDA + (MAX_LAMBDA - MIN_LAMBDA) * (r as f32 / total as f32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_class_soft_labels_averages_logits() {
        let logits = array![[2.0, 0.0, 0.0], [0.0, 0.0, 0.0], [0.0, 3.0, 0.0]];
        let t = class_soft_labels(&logits, &[0, 0, 1], 3, 1.0).unwrap();

        assert_eq!(t.counts, vec![2, 1, 0]);
        assert!(t.probs[2].is_none());
        let expected = softmax(array![1.0, 0.0, 0.0].view(), 1.0);
        let p0 = t.probs[0].as_ref().unwrap();
        assert!((p0[0] - expected[0]).abs() < 1e-6);
        assert_eq!(t.present_classes(), vec![0, 1]);
    }

    #[test]
    fn test_class_soft_labels_shape_errors() {
        let logits = array![[1.0, 0.0]];
        assert!(class_soft_labels(&logits, &[0, 1], 2, 1.0).is_err());
        assert!(class_soft_labels(&logits, &[0], 3, 1.0).is_err());
        assert!(class_soft_labels(&logits, &[5], 2, 1.0).is_err());
    }

    #[test]
    fn test_consensus_weights_by_count() {
        let a = ClassSoftLabels {
            probs: vec![Some(array![1.0, 0.0]), None],
            counts: vec![3, 0],
        };
        let b = ClassSoftLabels {
            probs: vec![Some(array![0.0, 1.0]), Some(array![0.2, 0.8])],
            counts: vec![1, 4],
        };
        let rc = consensus(&[a, b]).unwrap();

        let c0 = rc.probs[0].as_ref().unwrap();
        assert!((c0[0] - 0.75).abs() < 1e-6);
        assert!((c0[1] - 0.25).abs() < 1e-6);
        assert_eq!(rc.counts, vec![4, 4]);
        assert!((rc.probs[1].as_ref().unwrap()[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_consensus_absent_class_stays_none() {
        let a = ClassSoftLabels::empty(3);
        let rc = consensus(&[a.clone(), a]).unwrap();
        assert!(rc.is_empty());
        assert!(consensus(&[]).is_err());
        assert!(consensus(&[ClassSoftLabels::empty(2), ClassSoftLabels::empty(3)]).is_err());
    }

    #[test]
    fn test_matched_classes() {
        let rc = ClassSoftLabels {
            probs: vec![Some(array![0.5, 0.5]), None, Some(array![0.1, 0.9])],
            counts: vec![1, 0, 1],
        };
        let t = ClassSoftLabels {
            probs: vec![None, Some(array![0.5, 0.5]), Some(array![0.3, 0.7])],
            counts: vec![0, 1, 1],
        };
        let (r, q) = matched_classes(&rc, &t);
        assert_eq!(r.len(), 1);
        assert_eq!(q[0], array![0.3, 0.7]);
    }

    #[test]
    fn test_lambda_schedule() {
        assert_eq!(lambda_schedule(0, 10), 0.5);
        assert!((lambda_schedule(5, 10) - 0.75).abs() < 1e-6);
        assert_eq!(lambda_schedule(10, 10), 1.0);
        assert_eq!(lambda_schedule(3, 0), 1.0);
    }
}
