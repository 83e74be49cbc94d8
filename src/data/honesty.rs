//! Adversarial client simulation through label corruption.

use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::Dataset;
use crate::error::FedError;

/// Whether a client trains on true labels. Fixed for the whole run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum HonestyFlag {
    /// Trains on its real labels
    Honest,
    /// Has its labels randomized before every training pass
    Dishonest,
}

impl HonestyFlag {
    /// Whether labels get corrupted before training.
    pub fn is_dishonest(&self) -> bool {
        matches!(self, HonestyFlag::Dishonest)
    }
}

/// Pick `floor(ratio * num_clients)` honest clients uniformly at random.
///
/// Index `i` of the result is client `i`'s flag.
pub fn assign_honesty(num_clients: usize, ratio: f64, rng: &mut StdRng) -> Vec<HonestyFlag> {
    let num_honest = ((ratio.clamp(0.0, 1.0) * num_clients as f64).floor() as usize).min(num_clients);
    let mut flags = vec![HonestyFlag::Dishonest; num_clients];
    for id in sample(rng, num_clients, num_honest) {
        flags[id] = HonestyFlag::Honest;
    }
    flags
}

/// Replace every label with a uniformly drawn class.
pub fn randomize_labels(data: &Dataset, rng: &mut StdRng) -> Result<Dataset, FedError> {
    let classes = data.num_classes();
    if classes == 0 {
        return Err(FedError::EmptyDataset);
    }
    let labels = (0..data.len()).map(|_| rng.gen_range(0..classes)).collect();
    data.with_labels(labels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;
    use rand::SeedableRng;

    #[test]
    fn test_all_honest_at_ratio_one() {
        let mut rng = StdRng::seed_from_u64(42);
        let flags = assign_honesty(5, 1.0, &mut rng);
        assert!(flags.iter().all(|f| !f.is_dishonest()));
    }

    #[test]
    fn test_honest_count_floors() {
        let mut rng = StdRng::seed_from_u64(42);
        let flags = assign_honesty(10, 0.75, &mut rng);
        let honest = flags.iter().filter(|f| !f.is_dishonest()).count();
        assert_eq!(honest, 7);
        assert_eq!(flags.len(), 10);
    }

    #[test]
    fn test_zero_ratio_all_dishonest() {
        let mut rng = StdRng::seed_from_u64(1);
        assert!(assign_honesty(4, 0.0, &mut rng).iter().all(HonestyFlag::is_dishonest));
    }

    #[test]
    fn test_randomize_labels_keeps_features() {
        let labels: Vec<usize> = vec![0; 200];
        let data = Dataset::new(Array2::ones((200, 3)), labels, 4).unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        let corrupted = randomize_labels(&data, &mut rng).unwrap();

        assert_eq!(corrupted.features(), data.features());
        assert!(corrupted.labels().iter().all(|&l| l < 4));
        // With 4 classes, roughly three quarters of the labels must change.
        let changed = corrupted.labels().iter().filter(|&&l| l != 0).count();
        assert!(changed > 100, "only {} labels changed", changed);
    }
}
