//! Linear softmax classifier: the reference [`Learner`].

use ndarray::{Array2, Axis};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

use super::Learner;
use crate::error::FedError;
use crate::math::softmax_rows;
use crate::state::ModelState;

const WEIGHT: &str = "weight";
const BIAS: &str = "bias";

/// Standard deviation of the initial weights.
const INIT_STD: f32 = 0.01;

/// `logits = x · W + b`, trained with cross-entropy and plain SGD.
#[derive(Clone, Debug, PartialEq)]
pub struct SoftmaxClassifier {
    weight: Array2<f32>,
    bias: Array2<f32>,
}

impl SoftmaxClassifier {
    /// Seeded small-random weights, zero bias.
    pub fn new(feature_dim: usize, num_classes: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let weight = match Normal::new(0.0f32, INIT_STD) {
            Ok(init) => Array2::from_shape_fn((feature_dim, num_classes), |_| init.sample(&mut rng)),
            Err(_) => Array2::zeros((feature_dim, num_classes)),
        };
        Self {
            weight,
            bias: Array2::zeros((1, num_classes)),
        }
    }

    /// Input width the model expects.
    pub fn feature_dim(&self) -> usize {
        self.weight.nrows()
    }
}

impl Learner for SoftmaxClassifier {
    fn num_classes(&self) -> usize {
        self.weight.ncols()
    }

    fn state(&self) -> ModelState {
        let mut state = ModelState::new();
        state.insert(WEIGHT, self.weight.clone());
        state.insert(BIAS, self.bias.clone());
        state
    }

    fn load_state(&mut self, state: &ModelState) -> Result<(), FedError> {
        let weight = state
            .get(WEIGHT)
            .ok_or_else(|| FedError::MissingParameter(WEIGHT.into()))?;
        let bias = state
            .get(BIAS)
            .ok_or_else(|| FedError::MissingParameter(BIAS.into()))?;
        if weight.dim() != self.weight.dim() || bias.dim() != self.bias.dim() {
            return Err(FedError::DimensionMismatch);
        }
        self.weight.assign(weight);
        self.bias.assign(bias);
        Ok(())
    }

    fn forward(&self, features: &Array2<f32>) -> Result<Array2<f32>, FedError> {
        if features.ncols() != self.weight.nrows() {
            return Err(FedError::DimensionMismatch);
        }
        Ok(features.dot(&self.weight) + &self.bias)
    }

    fn step(&mut self, features: &Array2<f32>, labels: &[usize], lr: f32) -> Result<f32, FedError> {
        let n = labels.len();
        if n == 0 {
            return Err(FedError::EmptyDataset);
        }
        if features.nrows() != n {
            return Err(FedError::DimensionMismatch);
        }

        let mut grad = softmax_rows(&self.forward(features)?, 1.0);
        let mut loss = 0.0;
        for (i, &label) in labels.iter().enumerate() {
            if label >= self.num_classes() {
                return Err(FedError::Shape(format!("label {} out of range", label)));
            }
            loss -= grad[[i, label]].max(1e-12).ln();
            grad[[i, label]] -= 1.0;
        }
        grad /= n as f32;

        let grad_w = features.t().dot(&grad);
        let grad_b = grad.sum_axis(Axis(0)).insert_axis(Axis(0));
        self.weight.scaled_add(-lr, &grad_w);
        self.bias.scaled_add(-lr, &grad_b);

        Ok(loss / n as f32)
    }
}
