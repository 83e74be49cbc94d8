//! Softmax and KL-divergence matching for soft-label consensus.
//!
//! Distributions here are small per-class vectors (one entry per class),
//! so everything works on `ndarray` 1-D views without allocation tricks.

use ndarray::{Array1, Array2, ArrayView1, Axis};

use crate::error::FedError;

/// Smoothing added to probabilities before taking logarithms.
pub const EPSILON: f32 = 1e-6;

/// Temperature-scaled softmax of a single logit vector.
pub fn softmax(logits: ArrayView1<f32>, temperature: f32) -> Array1<f32> {
    let scaled = logits.mapv(|x| x / temperature);
    let max = scaled.fold(f32::NEG_INFINITY, |m, &x| m.max(x));
    let exp = scaled.mapv(|x| (x - max).exp());
    let sum = exp.sum();
    exp / sum
}

/// Row-wise temperature softmax of an `(n, classes)` logit matrix.
pub fn softmax_rows(logits: &Array2<f32>, temperature: f32) -> Array2<f32> {
    let mut out = logits.clone();
    for mut row in out.axis_iter_mut(Axis(0)) {
        let probs = softmax(row.view(), temperature);
        row.assign(&probs);
    }
    out
}

/// KL(p ‖ q) = Σ p · (ln p − ln q), with both sides smoothed by [`EPSILON`].
pub fn kl_div(p: ArrayView1<f32>, q: ArrayView1<f32>) -> f32 {
    p.iter()
        .zip(q.iter())
        .map(|(&pi, &qi)| {
            let pi = pi + EPSILON;
            let qi = qi + EPSILON;
            pi * (pi.ln() - qi.ln())
        })
        .sum()
}

/// Symmetric class-wise KL between the consensus `rc` and the model's `t`.
///
/// Each argument holds one distribution per class (same class order).
/// Returns `(KL(t‖rc) + KL(rc‖t)) / 2`, each KL averaged over classes.
pub fn symmetric_kl(rc: &[Array1<f32>], t: &[Array1<f32>]) -> Result<f32, FedError> {
    if rc.is_empty() {
        return Err(FedError::EmptyUpdates);
    }
    if rc.len() != t.len() {
        return Err(FedError::DimensionMismatch);
    }

    let n = rc.len() as f32;
    let mut forward = 0.0;
    let mut backward = 0.0;
    for (r, q) in rc.iter().zip(t.iter()) {
        if r.len() != q.len() {
            return Err(FedError::DimensionMismatch);
        }
        forward += kl_div(q.view(), r.view());
        backward += kl_div(r.view(), q.view());
    }
    Ok((forward / n + backward / n) / 2.0)
}
