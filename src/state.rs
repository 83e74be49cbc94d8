//! Serialized model parameters exchanged between server and clients.

use std::collections::BTreeMap;

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::math::norms::{l2_distance, l2_norm};

/// Ordered mapping from parameter name to a 2-D parameter tensor.
///
/// This is the global model state the server owns and replaces every round.
/// Keys are kept sorted so flattening and aggregation are deterministic.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelState {
    params: BTreeMap<String, Array2<f32>>,
}

impl ModelState {
    /// Create an empty state.
    pub fn new() -> Self {
        Self {
            params: BTreeMap::new(),
        }
    }

    /// Insert or replace a parameter tensor.
    pub fn insert(&mut self, name: impl Into<String>, value: Array2<f32>) {
        self.params.insert(name.into(), value);
    }

    /// Look up a parameter by name.
    pub fn get(&self, name: &str) -> Option<&Array2<f32>> {
        self.params.get(name)
    }

    /// Parameter names in sorted order.
    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.params.keys()
    }

    /// Iterate over `(name, tensor)` pairs in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Array2<f32>)> {
        self.params.iter()
    }

    /// Number of parameter tensors.
    pub fn len(&self) -> usize {
        self.params.len()
    }

    /// Whether the state holds no parameters.
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Total number of scalar parameters.
    pub fn num_scalars(&self) -> usize {
        self.params.values().map(|p| p.len()).sum()
    }

    /// Whether `other` has exactly the same parameter names and shapes.
    pub fn same_layout(&self, other: &ModelState) -> bool {
        self.params.len() == other.params.len()
            && self
                .params
                .iter()
                .all(|(k, v)| other.params.get(k).map(|o| o.dim()) == Some(v.dim()))
    }

    /// All parameters concatenated in key order.
    pub fn flatten(&self) -> Vec<f32> {
        let mut flat = Vec::with_capacity(self.num_scalars());
        for tensor in self.params.values() {
            flat.extend(tensor.iter().copied());
        }
        flat
    }

    /// L2 distance between two states with the same layout.
    pub fn distance(&self, other: &ModelState) -> f32 {
        l2_distance(&self.flatten(), &other.flatten())
    }

    /// L2 norm over all parameters.
    pub fn norm(&self) -> f32 {
        l2_norm(&self.flatten())
    }
}

impl FromIterator<(String, Array2<f32>)> for ModelState {
    fn from_iter<I: IntoIterator<Item = (String, Array2<f32>)>>(iter: I) -> Self {
        Self {
            params: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn sample() -> ModelState {
        let mut s = ModelState::new();
        s.insert("weight", array![[1.0, 2.0], [3.0, 4.0]]);
        s.insert("bias", array![[0.5, 0.5]]);
        s
    }

    #[test]
    fn test_flatten_is_key_ordered() {
        // "bias" sorts before "weight"
        assert_eq!(sample().flatten(), vec![0.5, 0.5, 1.0, 2.0, 3.0, 4.0]);
        assert_eq!(sample().num_scalars(), 6);
    }

    #[test]
    fn test_same_layout() {
        let a = sample();
        let mut b = sample();
        assert!(a.same_layout(&b));
        b.insert("bias", array![[0.5, 0.5, 0.5]]);
        assert!(!a.same_layout(&b));
        b.insert("extra", array![[1.0]]);
        assert!(!a.same_layout(&b));
    }

    #[test]
    fn test_distance() {
        let a = sample();
        let mut b = sample();
        b.insert("bias", array![[3.5, 4.5]]);
        assert!((a.distance(&b) - 5.0).abs() < 1e-6);
        assert!((ModelState::new().norm()).abs() < 1e-6);
        assert!((sample().norm() - 30.5f32.sqrt()).abs() < 1e-5);
    }

    #[test]
    fn test_serde_keeps_values() {
        let json = serde_json::to_string(&sample()).unwrap();
        let restored: ModelState = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, sample());
    }
}
