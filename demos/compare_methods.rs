//! Compare aggregation rules when some clients train on randomized labels

use fedaf_sim::{AggregationMethod, DatasetKind, ExperimentConfig, Simulation, SoftmaxClassifier};

fn main() {
    println!("Comparing Aggregation Methods\n");
    println!("Scenario: 10 clients on MNIST-shaped data, 4 with randomized labels\n");

    let base = ExperimentConfig {
        dataset: DatasetKind::Mnist,
        num_clients: 10,
        alpha: 0.5,
        min_partition_size: 20,
        local_epochs: 2,
        lr: 0.05,
        batch_size: 32,
        num_rounds: 5,
        honesty_ratio: 0.6,
        train_per_class: 100,
        test_per_class: 30,
        ..ExperimentConfig::default()
    };

    let methods: Vec<(&str, AggregationMethod)> = vec![
        ("FedAvg (no defense)", AggregationMethod::FedAvg),
        ("Trimmed Mean (20%)", AggregationMethod::TrimmedMean(0.2)),
        ("Median", AggregationMethod::Median),
    ];

    for (name, method) in methods {
        let cfg = ExperimentConfig {
            aggregation: method,
            ..base.clone()
        };
        let model = SoftmaxClassifier::new(cfg.dataset.feature_dim(), cfg.dataset.num_classes(), cfg.seed);
        let report = Simulation::new(cfg).unwrap().run(model).unwrap();

        let final_acc = report.history.final_accuracy().unwrap();
        let best = report.history.best_round().unwrap();
        println!(
            "{:<22} Final: {:>6.2}%  Best: {:>6.2}% (round {})",
            name, final_acc, best.accuracy, best.round
        );
    }
}
