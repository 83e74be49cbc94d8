//! In-memory datasets, client partitions and honesty simulation.
//!
//! Real image loading belongs to the training framework; the simulator works
//! on flattened feature matrices. [`Dataset::gaussian_clusters`] produces a
//! seeded stand-in with the requested dataset's shape.

pub mod honesty;
pub mod partition;

pub use honesty::{assign_honesty, randomize_labels, HonestyFlag};
pub use partition::{dirichlet_partition, ClientPartition};

use ndarray::{concatenate, Array2, ArrayView1, Axis};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

use crate::config::DatasetKind;
use crate::error::FedError;

/// Spread of class centres around the origin.
const CENTER_SCALE: f32 = 0.05;

/// Per-feature noise around a class centre.
const SAMPLE_NOISE: f32 = 0.3;

/// Feature matrix with one integer label per row.
#[derive(Clone, Debug, PartialEq)]
pub struct Dataset {
    features: Array2<f32>,
    labels: Vec<usize>,
    num_classes: usize,
}

impl Dataset {
    /// Build a dataset, checking row/label counts and label range.
    pub fn new(features: Array2<f32>, labels: Vec<usize>, num_classes: usize) -> Result<Self, FedError> {
        if features.nrows() != labels.len() {
            return Err(FedError::Shape(format!(
                "{} feature rows but {} labels",
                features.nrows(),
                labels.len()
            )));
        }
        if let Some(bad) = labels.iter().find(|&&l| l >= num_classes) {
            return Err(FedError::Shape(format!(
                "label {} out of range for {} classes",
                bad, num_classes
            )));
        }
        Ok(Self {
            features,
            labels,
            num_classes,
        })
    }

    /// An empty dataset with the given feature width.
    pub fn empty(feature_dim: usize, num_classes: usize) -> Self {
        Self {
            features: Array2::zeros((0, feature_dim)),
            labels: Vec::new(),
            num_classes,
        }
    }

    /// Seeded Gaussian class clusters shaped like `kind`.
    ///
    /// Returns `(train, test)`; both splits share the same class centres.
    pub fn gaussian_clusters(
        kind: DatasetKind,
        train_per_class: usize,
        test_per_class: usize,
        seed: u64,
    ) -> Result<(Dataset, Dataset), FedError> {
        let mut rng = StdRng::seed_from_u64(seed);
        let num_classes = kind.num_classes();
        let dim = kind.feature_dim();

        let center_dist =
            Normal::new(0.0f32, CENTER_SCALE).map_err(|e| FedError::InvalidConfig(e.to_string()))?;
        let noise =
            Normal::new(0.0f32, SAMPLE_NOISE).map_err(|e| FedError::InvalidConfig(e.to_string()))?;

        let centers = Array2::from_shape_fn((num_classes, dim), |_| center_dist.sample(&mut rng));

        let mut draw = |per_class: usize| -> Result<Dataset, FedError> {
            let n = per_class * num_classes;
            let labels: Vec<usize> = (0..n).map(|i| i % num_classes).collect();
            let features = Array2::from_shape_fn((n, dim), |(row, col)| {
                centers[[labels[row], col]] + noise.sample(&mut rng)
            });
            Dataset::new(features, labels, num_classes)
        };

        let train = draw(train_per_class)?;
        let test = draw(test_per_class)?;
        Ok((train, test))
    }

    /// Feature matrix, one row per sample.
    pub fn features(&self) -> &Array2<f32> {
        &self.features
    }

    /// Labels, aligned with feature rows.
    pub fn labels(&self) -> &[usize] {
        &self.labels
    }

    /// Number of label classes.
    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// Width of a feature row.
    pub fn feature_dim(&self) -> usize {
        self.features.ncols()
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Whether the dataset has no samples.
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// One sample's features.
    pub fn row(&self, index: usize) -> ArrayView1<'_, f32> {
        self.features.row(index)
    }

    /// Rows at `indices`, in the given order.
    pub fn subset(&self, indices: &[usize]) -> Dataset {
        Dataset {
            features: self.features.select(Axis(0), indices),
            labels: indices.iter().map(|&i| self.labels[i]).collect(),
            num_classes: self.num_classes,
        }
    }

    /// Same features with replacement labels.
    pub fn with_labels(&self, labels: Vec<usize>) -> Result<Dataset, FedError> {
        Dataset::new(self.features.clone(), labels, self.num_classes)
    }

    /// Sample count per class.
    pub fn class_counts(&self) -> Vec<usize> {
        let mut counts = vec![0; self.num_classes];
        for &label in &self.labels {
            counts[label] += 1;
        }
        counts
    }

    /// Positions of every sample labelled `class`.
    pub fn indices_of_class(&self, class: usize) -> Vec<usize> {
        self.labels
            .iter()
            .enumerate()
            .filter(|(_, &l)| l == class)
            .map(|(i, _)| i)
            .collect()
    }

    /// Stack datasets row-wise. All parts must agree on width and classes.
    pub fn concat(parts: &[Dataset]) -> Result<Dataset, FedError> {
        let first = parts.first().ok_or(FedError::EmptyDataset)?;
        if parts
            .iter()
            .any(|p| p.feature_dim() != first.feature_dim() || p.num_classes != first.num_classes)
        {
            return Err(FedError::DimensionMismatch);
        }

        let views: Vec<_> = parts.iter().map(|p| p.features.view()).collect();
        let features = concatenate(Axis(0), &views)?;
        let labels = parts.iter().flat_map(|p| p.labels.iter().copied()).collect();
        Ok(Dataset {
            features,
            labels,
            num_classes: first.num_classes,
        })
    }
}
