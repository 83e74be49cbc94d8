//! Coordinate-wise robust aggregation for runs with dishonest clients.
//!
//! Both rules sort the values of one parameter coordinate across clients and
//! reduce them independently, so a minority of label-corrupted clients cannot
//! drag an individual weight arbitrarily far. Sample-count weights are not
//! supported since sorting destroys the value-to-client correspondence.

use ndarray::Array2;
use rayon::prelude::*;

use super::{check_layouts, tensors_for};
use crate::error::FedError;
use crate::state::ModelState;

/// Coordinate-wise trimmed mean over client states.
///
/// Drops `ceil(n * trim_fraction)` values from each end of every coordinate
/// and averages the rest.
pub fn trimmed_mean(states: &[ModelState], trim_fraction: f32) -> Result<ModelState, FedError> {
    if !(0.0..=0.5).contains(&trim_fraction) {
        return Err(FedError::InvalidTrimFraction(trim_fraction));
    }
    check_layouts(states)?;

    let n_clients = states.len();
    let n_trim = (n_clients as f32 * trim_fraction).ceil() as usize;
    let n_keep = n_clients.saturating_sub(2 * n_trim);
    if n_keep < 1 {
        return Err(FedError::InsufficientQuorum {
            needed: 1,
            actual: n_keep,
        });
    }

    reduce_states(states, |values| {
        let kept = &values[n_trim..n_clients - n_trim];
        kept.iter().sum::<f32>() / kept.len() as f32
    })
}

/// Coordinate-wise median over client states.
pub fn median(states: &[ModelState]) -> Result<ModelState, FedError> {
    check_layouts(states)?;

    reduce_states(states, |values| {
        let mid = values.len() / 2;
        if values.len() % 2 == 0 {
            (values[mid - 1] + values[mid]) / 2.0
        } else {
            values[mid]
        }
    })
}

/// Apply `reduce` to the sorted client values of every coordinate.
fn reduce_states<F>(states: &[ModelState], reduce: F) -> Result<ModelState, FedError>
where
    F: Fn(&[f32]) -> f32 + Sync,
{
    states[0]
        .keys()
        .map(|key| {
            let tensors = tensors_for(states, key)?;
            Ok::<_, FedError>((key.clone(), reduce_tensor(&tensors, &reduce)?))
        })
        .collect()
}

fn reduce_tensor<F>(tensors: &[&Array2<f32>], reduce: &F) -> Result<Array2<f32>, FedError>
where
    F: Fn(&[f32]) -> f32 + Sync,
{
    let dim = tensors[0].dim();
    let ncols = dim.1;

    let reduced: Vec<f32> = (0..dim.0 * ncols)
        .into_par_iter()
        .map(|idx| {
            let (row, col) = (idx / ncols, idx % ncols);
            let mut values: Vec<f32> = tensors.iter().map(|t| t[[row, col]]).collect();
            values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            reduce(&values)
        })
        .collect();

    Ok(Array2::from_shape_vec(dim, reduced)?)
}
