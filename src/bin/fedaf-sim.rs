//! Run one experiment and print its round history as JSON.
//!
//! ```text
//! fedaf-sim [config.json]
//! ```
//!
//! Without a config file the default MNIST FedAvg run is used. Log verbosity
//! follows `RUST_LOG` (default `info`).

use std::env;
use std::process::ExitCode;

use fedaf_sim::{ExperimentConfig, FedError, Simulation, SoftmaxClassifier};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn run() -> Result<(), FedError> {
    let cfg = match env::args().nth(1) {
        Some(path) => {
            info!(path = %path, "loading config");
            ExperimentConfig::from_json_file(path)?
        }
        None => ExperimentConfig::default(),
    };

    let model = SoftmaxClassifier::new(cfg.dataset.feature_dim(), cfg.dataset.num_classes(), cfg.seed);
    let report = Simulation::new(cfg)?.run(model)?;

    if let Some(accuracy) = report.history.final_accuracy() {
        info!(accuracy = %format!("{:.2}", accuracy), "final accuracy");
    }
    println!("{}", report.history.to_json()?);
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "simulation failed");
            ExitCode::FAILURE
        }
    }
}
