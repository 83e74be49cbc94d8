//! Quickstart: a short FedAvg run followed by a FedAF run

use fedaf_sim::{DistillConfig, ExperimentConfig, Simulation, SoftmaxClassifier, Strategy};

fn main() {
    println!("fedaf-sim Quickstart Demo\n");

    let fedavg = ExperimentConfig {
        num_rounds: 3,
        train_per_class: 100,
        test_per_class: 30,
        lr: 0.05,
        ..ExperimentConfig::default()
    };
    let model = SoftmaxClassifier::new(fedavg.dataset.feature_dim(), fedavg.dataset.num_classes(), fedavg.seed);
    let report = Simulation::new(fedavg.clone()).unwrap().run(model.clone()).unwrap();
    println!("FedAvg accuracy per round: {:?}", report.history.accuracies());

    let store = std::env::temp_dir().join("fedaf_quickstart");
    let _ = std::fs::remove_dir_all(&store);
    let fedaf = ExperimentConfig {
        strategy: Strategy::FedAf,
        distill: DistillConfig {
            iterations: 20,
            server_lr: 0.05,
            store_dir: store.clone(),
            ..DistillConfig::default()
        },
        ..fedavg
    };
    let report = Simulation::new(fedaf).unwrap().run(model).unwrap();
    println!("FedAF accuracy per round:  {:?}", report.history.accuracies());
    println!("\nArtifacts written under {}", store.display());
}
