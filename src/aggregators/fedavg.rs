//! FedAvg aggregation (McMahan et al., 2017).
//!
//! The server's default rule: a weighted arithmetic mean of client
//! parameters, where each client's weight is its local sample count.

use ndarray::Array2;

use super::check_layouts;
use crate::error::FedError;
use crate::state::ModelState;

/// Weighted (or plain) mean of a set of equally shaped tensors.
///
/// # Arguments
///
/// * `updates` - One tensor per client
/// * `weights` - Optional client weights (e.g., local dataset sizes)
pub fn fedavg(updates: &[&Array2<f32>], weights: Option<&[f32]>) -> Result<Array2<f32>, FedError> {
    if updates.is_empty() {
        return Err(FedError::EmptyUpdates);
    }

    let dim = updates[0].dim();
    if updates[1..].iter().any(|u| u.dim() != dim) {
        return Err(FedError::DimensionMismatch);
    }

    match weights {
        Some(w) => {
            if w.len() != updates.len() {
                return Err(FedError::DimensionMismatch);
            }
            let weight_sum: f32 = w.iter().sum();
            if weight_sum <= 0.0 {
                return Err(FedError::InsufficientQuorum {
                    needed: 1,
                    actual: 0,
                });
            }
            let weighted_sum = updates
                .iter()
                .zip(w.iter())
                .fold(Array2::<f32>::zeros(dim), |acc, (update, &weight)| {
                    acc + &(*update * weight)
                });
            Ok(weighted_sum / weight_sum)
        }
        None => {
            let n = updates.len() as f32;
            let sum = updates
                .iter()
                .fold(Array2::<f32>::zeros(dim), |acc, update| acc + *update);
            Ok(sum / n)
        }
    }
}

/// FedAvg over whole model states, parameter by parameter.
///
/// Every state must carry the same parameter names and shapes.
pub fn fedavg_states(states: &[ModelState], weights: Option<&[f32]>) -> Result<ModelState, FedError> {
    check_layouts(states)?;

    states[0]
        .keys()
        .map(|key| {
            let tensors = super::tensors_for(states, key)?;
            Ok::<_, FedError>((key.clone(), fedavg(&tensors, weights)?))
        })
        .collect()
}
