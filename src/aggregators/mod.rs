//! Server-side aggregation of client model states.
//!
//! | Method | Weighted | Tolerates dishonest clients |
//! |--------|----------|-----------------------------|
//! | [`fedavg`] | yes (sample counts) | no |
//! | [`trimmed_mean`] | no | up to the trim fraction |
//! | [`median`] | no | a minority |

pub mod fedavg;
pub mod robust;

pub use fedavg::{fedavg, fedavg_states};
pub use robust::{median, trimmed_mean};

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::error::FedError;
use crate::state::ModelState;

/// Aggregation rule applied by the server in FedAvg-style rounds.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationMethod {
    /// Sample-count weighted mean (default)
    #[default]
    #[serde(rename = "fedavg")]
    FedAvg,
    /// Coordinate-wise trimmed mean with the given per-side trim fraction
    TrimmedMean(f32),
    /// Coordinate-wise median
    Median,
}

impl AggregationMethod {
    /// Short name used in logs and round records.
    pub fn name(&self) -> &'static str {
        match self {
            AggregationMethod::FedAvg => "fedavg",
            AggregationMethod::TrimmedMean(_) => "trimmed_mean",
            AggregationMethod::Median => "median",
        }
    }
}

/// Aggregate client states with `method`.
///
/// `weights` are the clients' sample counts; only [`AggregationMethod::FedAvg`]
/// uses them.
pub fn aggregate(
    method: &AggregationMethod,
    states: &[ModelState],
    weights: &[f32],
) -> Result<ModelState, FedError> {
    match method {
        AggregationMethod::FedAvg => fedavg_states(states, Some(weights)),
        AggregationMethod::TrimmedMean(fraction) => trimmed_mean(states, *fraction),
        AggregationMethod::Median => median(states),
    }
}

/// Check that `states` is non-empty and every state matches the first's layout.
pub(crate) fn check_layouts(states: &[ModelState]) -> Result<(), FedError> {
    let first = states.first().ok_or(FedError::EmptyUpdates)?;
    for state in &states[1..] {
        if let Some(missing) = first.keys().find(|k| state.get(k).is_none()) {
            return Err(FedError::MissingParameter(missing.clone()));
        }
        if !first.same_layout(state) {
            return Err(FedError::DimensionMismatch);
        }
    }
    Ok(())
}

/// Borrow parameter `key` from every state.
pub(crate) fn tensors_for<'a>(
    states: &'a [ModelState],
    key: &str,
) -> Result<Vec<&'a Array2<f32>>, FedError> {
    states
        .iter()
        .map(|s| s.get(key).ok_or_else(|| FedError::MissingParameter(key.to_string())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn single(v: f32) -> ModelState {
        let mut s = ModelState::new();
        s.insert("weight", array![[v]]);
        s
    }

    #[test]
    fn test_dispatch_fedavg_uses_weights() {
        let states = vec![single(1.0), single(3.0)];
        let result = aggregate(&AggregationMethod::FedAvg, &states, &[1.0, 3.0]).unwrap();
        assert!((result.get("weight").unwrap()[[0, 0]] - 2.5).abs() < 1e-6);
    }

    #[test]
    fn test_dispatch_robust_ignores_weights() {
        let states = vec![single(1.0), single(2.0), single(100.0)];
        let med = aggregate(&AggregationMethod::Median, &states, &[1.0, 1.0, 50.0]).unwrap();
        assert_eq!(med.get("weight").unwrap()[[0, 0]], 2.0);

        let tm = aggregate(&AggregationMethod::TrimmedMean(0.2), &states, &[]).unwrap();
        assert_eq!(tm.get("weight").unwrap()[[0, 0]], 2.0);
    }

    #[test]
    fn test_check_layouts_reports_missing_key() {
        let mut other = ModelState::new();
        other.insert("bias", array![[1.0]]);
        assert!(matches!(
            check_layouts(&[single(1.0), other]),
            Err(FedError::MissingParameter(k)) if k == "weight"
        ));
    }

    #[test]
    fn test_method_serde_names() {
        let json = serde_json::to_string(&AggregationMethod::FedAvg).unwrap();
        assert_eq!(json, format!("\"{}\"", AggregationMethod::FedAvg.name()));
        let tm: AggregationMethod = serde_json::from_str("{\"trimmed_mean\":0.2}").unwrap();
        assert_eq!(tm, AggregationMethod::TrimmedMean(0.2));
    }
}
