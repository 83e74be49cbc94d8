//! Non-IID client partitioning via per-class Dirichlet proportions.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;
use rand_distr::{Distribution, Gamma};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::FedError;

/// Redraws allowed before giving up on the minimum-size requirement.
const MAX_ATTEMPTS: usize = 1000;

/// The fixed set of training-set indices one client owns.
///
/// Assigned once at startup; there is no way to mutate it afterwards.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientPartition {
    client_id: usize,
    indices: Vec<usize>,
}

impl ClientPartition {
    /// Owning client.
    pub fn client_id(&self) -> usize {
        self.client_id
    }

    /// Indices into the full training set, ascending.
    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    /// Number of samples the client holds.
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    /// Whether the client holds no samples.
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

/// Split sample indices across clients with Dirichlet(α) class proportions.
///
/// For each class the class's indices are shuffled and cut according to a
/// fresh Dir(α) draw over clients. Whole splits are redrawn until every
/// client holds at least `min_size` samples.
pub fn dirichlet_partition(
    labels: &[usize],
    num_classes: usize,
    num_clients: usize,
    alpha: f64,
    min_size: usize,
    rng: &mut StdRng,
) -> Result<Vec<ClientPartition>, FedError> {
    if num_clients == 0 {
        return Err(FedError::Partition("no clients to partition across".into()));
    }
    if labels.len() < num_clients * min_size {
        return Err(FedError::Partition(format!(
            "{} samples cannot give {} clients {} each",
            labels.len(),
            num_clients,
            min_size
        )));
    }
    let gamma = Gamma::new(alpha, 1.0).map_err(|e| FedError::Partition(e.to_string()))?;

    let mut by_class: Vec<Vec<usize>> = vec![Vec::new(); num_classes];
    for (i, &label) in labels.iter().enumerate() {
        by_class[label].push(i);
    }

    for attempt in 1..=MAX_ATTEMPTS {
        let mut buckets: Vec<Vec<usize>> = vec![Vec::new(); num_clients];

        for class_indices in &by_class {
            let mut shuffled = class_indices.clone();
            shuffled.shuffle(rng);
            let props: Vec<f64> = (0..num_clients).map(|_| gamma.sample(rng)).collect();
            split_by_proportions(&shuffled, &props, &mut buckets, rng);
        }

        let smallest = buckets.iter().map(Vec::len).min().unwrap_or(0);
        if smallest >= min_size {
            debug!(attempt, smallest, "dirichlet partition accepted");
            return Ok(buckets
                .into_iter()
                .enumerate()
                .map(|(client_id, mut indices)| {
                    indices.sort_unstable();
                    ClientPartition { client_id, indices }
                })
                .collect());
        }
    }

    Err(FedError::Partition(format!(
        "no split gave every client {} samples after {} attempts (alpha={})",
        min_size, MAX_ATTEMPTS, alpha
    )))
}

/// Cut `indices` at the cumulative proportion boundaries.
fn split_by_proportions(
    indices: &[usize],
    props: &[f64],
    buckets: &mut [Vec<usize>],
    rng: &mut StdRng,
) {
    let total: f64 = props.iter().sum();
    if !(total > 0.0) {
        // Every draw underflowed (tiny alpha): hand the class to one client.
        let k = rng.gen_range(0..buckets.len());
        buckets[k].extend_from_slice(indices);
        return;
    }

    let n = indices.len();
    let mut start = 0;
    let mut cumulative = 0.0;
    for (k, p) in props.iter().enumerate() {
        cumulative += p;
        let cut = if k + 1 == props.len() {
            n
        } else {
            ((cumulative / total) * n as f64).round() as usize
        };
        let end = cut.clamp(start, n);
        buckets[k].extend_from_slice(&indices[start..end]);
        start = end;
    }
}
