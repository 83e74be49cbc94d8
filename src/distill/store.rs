//! On-disk exchange of distillation artifacts between rounds.
//!
//! Layout under the store root:
//!
//! ```text
//! clients/client_{id}/fedaf_{dataset}_{ipc}ipc_round{r}.json   synthetic data
//! global/round{r}_rc.json                                      consensus soft labels
//! models/{dataset}/{clients}c_{honesty}h/global_model_{r}.json global model states
//! ```

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use super::{ClassSoftLabels, SyntheticDataset};
use crate::config::ExperimentConfig;
use crate::error::FedError;
use crate::state::ModelState;

const MODEL_PREFIX: &str = "global_model_";

/// Filesystem store for synthetic datasets, consensus labels and models.
#[derive(Clone, Debug)]
pub struct DistillStore {
    root: PathBuf,
    dataset: String,
    ipc: usize,
    model_dir: PathBuf,
}

impl DistillStore {
    /// Store rooted at `root`, namespaced by the experiment's settings.
    pub fn new(root: impl Into<PathBuf>, cfg: &ExperimentConfig) -> Self {
        let root = root.into();
        let dataset = cfg.dataset.name().to_string();
        let model_dir = root
            .join("models")
            .join(&dataset)
            .join(format!("{}c_{}h", cfg.num_clients, cfg.honesty_ratio));
        Self {
            root,
            dataset,
            ipc: cfg.distill.ipc,
            model_dir,
        }
    }

    /// Root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where a client's synthetic data for `round` lives.
    pub fn synthetic_path(&self, client_id: usize, round: usize) -> PathBuf {
        self.root
            .join("clients")
            .join(format!("client_{}", client_id))
            .join(format!("fedaf_{}_{}ipc_round{}.json", self.dataset, self.ipc, round))
    }

    /// Where the consensus soft labels for `round` live.
    pub fn consensus_path(&self, round: usize) -> PathBuf {
        self.root.join("global").join(format!("round{}_rc.json", round))
    }

    /// Where the global model after `round` lives.
    pub fn model_path(&self, round: usize) -> PathBuf {
        self.model_dir.join(format!("{}{}.json", MODEL_PREFIX, round))
    }

    /// Persist a client's synthetic data under its client id and round.
    pub fn save_synthetic(&self, data: &SyntheticDataset) -> Result<PathBuf, FedError> {
        let path = self.synthetic_path(data.client_id, data.round);
        write_json(&path, data)?;
        Ok(path)
    }

    /// Load a client's synthetic data; `None` when nothing was saved.
    pub fn load_synthetic(&self, client_id: usize, round: usize) -> Result<Option<SyntheticDataset>, FedError> {
        read_json(&self.synthetic_path(client_id, round))
    }

    /// Persist the consensus soft labels of a round.
    pub fn save_consensus(&self, round: usize, rc: &ClassSoftLabels) -> Result<PathBuf, FedError> {
        let path = self.consensus_path(round);
        write_json(&path, rc)?;
        Ok(path)
    }

    /// Load the consensus soft labels of a round, if present.
    pub fn load_consensus(&self, round: usize) -> Result<Option<ClassSoftLabels>, FedError> {
        read_json(&self.consensus_path(round))
    }

    /// Persist the global model state after a round.
    pub fn save_model(&self, round: usize, state: &ModelState) -> Result<PathBuf, FedError> {
        let path = self.model_path(round);
        write_json(&path, state)?;
        Ok(path)
    }

    /// The most recent saved global model and its round.
    pub fn load_latest_model(&self) -> Result<Option<(usize, ModelState)>, FedError> {
        if !self.model_dir.is_dir() {
            return Ok(None);
        }

        let mut latest: Option<usize> = None;
        for entry in fs::read_dir(&self.model_dir)? {
            let name = entry?.file_name();
            let round = name
                .to_str()
                .and_then(|n| n.strip_prefix(MODEL_PREFIX))
                .and_then(|n| n.strip_suffix(".json"))
                .and_then(|n| n.parse::<usize>().ok());
            if let Some(r) = round {
                latest = Some(latest.map_or(r, |l| l.max(r)));
            }
        }

        match latest {
            Some(round) => Ok(read_json::<ModelState>(&self.model_path(round))?.map(|state| (round, state))),
            None => Ok(None),
        }
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), FedError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer(&mut writer, value)?;
    writer.flush()?;
    debug!(path = %path.display(), "wrote artifact");
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, FedError> {
    if !path.exists() {
        return Ok(None);
    }
    let reader = BufReader::new(File::open(path)?);
    Ok(Some(serde_json::from_reader(reader)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Dataset;
    use ndarray::array;

    fn store(dir: &Path) -> DistillStore {
        DistillStore::new(dir, &ExperimentConfig::default())
    }

    #[test]
    fn test_synthetic_round_trip_and_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let data = Dataset::new(array![[1.0, 2.0]], vec![1], 3).unwrap();
        let syn = SyntheticDataset::from_dataset(2, 4, &data);

        let path = store.save_synthetic(&syn).unwrap();
        assert!(path.ends_with("clients/client_2/fedaf_MNIST_10ipc_round4.json"));
        assert_eq!(store.load_synthetic(2, 4).unwrap(), Some(syn));
        assert_eq!(store.load_synthetic(2, 5).unwrap(), None);
    }

    #[test]
    fn test_consensus_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let rc = ClassSoftLabels {
            probs: vec![Some(array![0.7, 0.3]), None],
            counts: vec![5, 0],
        };
        store.save_consensus(1, &rc).unwrap();
        assert_eq!(store.load_consensus(1).unwrap(), Some(rc));
        assert!(store.load_consensus(2).unwrap().is_none());
    }

    #[test]
    fn test_latest_model_picks_highest_round() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        assert!(store.load_latest_model().unwrap().is_none());

        for round in [1, 10, 2] {
            let mut state = ModelState::new();
            state.insert("weight", array![[round as f32]]);
            store.save_model(round, &state).unwrap();
        }
        let (round, state) = store.load_latest_model().unwrap().unwrap();
        assert_eq!(round, 10);
        assert_eq!(state.get("weight").unwrap()[[0, 0]], 10.0);
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let path = store.synthetic_path(0, 1);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "not json").unwrap();
        assert!(matches!(
            store.load_synthetic(0, 1),
            Err(FedError::Serialization(_))
        ));
    }
}
