//! Multi-objective Search Integration Tests
//!
//! 分類器・密度モデルを実際に評価する探索の流れを検証します。

use ndarray::Array2;
use nids_tuner::classifier::knn_factory;
use nids_tuner::dataset::Dataset;
use nids_tuner::optimization::evaluator::{ACCURACY, DENSITY_DETECTION_RATE};
use nids_tuner::optimization::space::{default_classifier_axes, default_density_axes};
use nids_tuner::optimization::{
    CandidateEvaluator, ClassifierObjectiveEvaluator, DensityObjectiveEvaluator,
    EvaluationFailure, EvaluationOutcome, FnEvaluator, HybridEvaluator,
    MultiObjectiveSearchEngine, Objective, ObjectiveSet, ParameterSet, SearchConfig,
};
use nids_tuner::DensityConfig;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// 2クラスの通信特徴量（ラベル1は高バイト数・高レート）
fn labelled_traffic(rows_per_class: usize, seed: u64) -> Arc<Dataset> {
    let mut rng = StdRng::seed_from_u64(seed);
    let n = rows_per_class * 2;
    let features = Array2::from_shape_fn((n, 3), |(i, j)| {
        let class_offset = if i < rows_per_class { 0.0 } else { 3.0 };
        class_offset + j as f64 * 0.2 + rng.gen_range(-1.0..1.0)
    });
    let labels = (0..n).map(|i| usize::from(i >= rows_per_class)).collect();
    let names = vec![
        "src_bytes".to_string(),
        "dst_bytes".to_string(),
        "packet_rate".to_string(),
    ];
    Arc::new(Dataset::new(names, features, Some(labels)).unwrap())
}

fn knn_config() -> SearchConfig {
    SearchConfig {
        population_size: 10,
        max_iterations: 15,
        seed: Some(11),
        cv_folds: 3,
        objectives: vec![Objective::maximize(ACCURACY, 1.0)],
        bounds: default_classifier_axes(),
        ..Default::default()
    }
}

fn knn_evaluator(config: &SearchConfig) -> Arc<dyn CandidateEvaluator> {
    Arc::new(ClassifierObjectiveEvaluator::new(
        knn_factory(),
        labelled_traffic(40, 3),
        config.cv_folds,
        config.min_samples,
    ))
}

fn tiny_config(objectives: Vec<Objective>) -> SearchConfig {
    SearchConfig {
        population_size: 4,
        max_iterations: 3,
        seed: Some(5),
        objectives,
        bounds: default_classifier_axes(),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_knn_accuracy_search() {
    let config = knn_config();
    let engine = MultiObjectiveSearchEngine::new(config.clone()).unwrap();
    let result = engine.optimize(knn_evaluator(&config)).await.unwrap();

    assert_eq!(result.convergence.len(), 15);
    assert_eq!(result.iterations_completed, 15);
    assert!((0.0..=1.0).contains(&result.best_fitness));
    assert!(result.best_fitness > 0.8, "best fitness {}", result.best_fitness);

    let neighbors = result.best_parameters["knn_neighbors"].as_usize();
    assert!((1..=25).contains(&neighbors));
    assert_eq!(result.best_scores.get(ACCURACY), Some(&result.best_fitness));
}

#[tokio::test]
async fn test_classifier_search_over_default_bounds() {
    let config = SearchConfig {
        population_size: 8,
        max_iterations: 5,
        seed: Some(4),
        cv_folds: 3,
        ..Default::default()
    };
    let engine = MultiObjectiveSearchEngine::new(config.clone()).unwrap();
    let evaluator = ClassifierObjectiveEvaluator::new(
        knn_factory(),
        labelled_traffic(40, 9),
        config.cv_folds,
        config.min_samples,
    )
    .with_space(engine.space());

    let result = engine.optimize(Arc::new(evaluator)).await.unwrap();
    assert!(result.best_fitness > 0.8, "best fitness {}", result.best_fitness);
    assert!(result.best_scores[ACCURACY] > 0.8);
    assert!(result.best_parameters.contains_key("density_window_size"));
}

#[tokio::test]
async fn test_best_fitness_never_decreases() {
    let config = knn_config();
    let engine = MultiObjectiveSearchEngine::new(config.clone()).unwrap();
    let result = engine.optimize(knn_evaluator(&config)).await.unwrap();

    for pair in result.convergence.windows(2) {
        assert!(pair[1].best_fitness >= pair[0].best_fitness);
        assert_eq!(pair[1].iteration, pair[0].iteration + 1);
    }
    let last = result.convergence.last().unwrap();
    assert_eq!(last.best_fitness, result.best_fitness);
    assert_eq!(last.pareto_size, result.pareto_front.len());
}

#[tokio::test]
async fn test_same_seed_same_result() {
    let config = knn_config();
    let first = MultiObjectiveSearchEngine::new(config.clone())
        .unwrap()
        .optimize(knn_evaluator(&config))
        .await
        .unwrap();
    let second = MultiObjectiveSearchEngine::new(config.clone())
        .unwrap()
        .optimize(knn_evaluator(&config))
        .await
        .unwrap();

    assert_eq!(first.seed, 11);
    assert_eq!(first.best_parameters, second.best_parameters);
    assert_eq!(first.best_fitness, second.best_fitness);
    assert_ne!(first.run_id, second.run_id);
}

#[tokio::test]
async fn test_weighted_minimize_and_maximize() {
    let objectives = vec![
        Objective::minimize("false_positive_rate", 0.5),
        Objective::maximize("detection_rate", 0.5),
    ];
    let set = ObjectiveSet::new(objectives.clone()).unwrap();
    let scores = [
        ("false_positive_rate".to_string(), 0.2),
        ("detection_rate".to_string(), 0.8),
    ]
    .into_iter()
    .collect();
    assert!((set.aggregate(&scores) - 0.8).abs() < 1e-12);

    let engine = MultiObjectiveSearchEngine::new(tiny_config(objectives)).unwrap();
    let evaluator: Arc<dyn CandidateEvaluator> = Arc::new(FnEvaluator::new(move |_: &ParameterSet| {
        EvaluationOutcome::Scored(scores.clone())
    }));
    let result = engine.optimize(evaluator).await.unwrap();
    assert!((result.best_fitness - 0.8).abs() < 1e-12);
}

#[tokio::test]
async fn test_always_failing_evaluator_completes() {
    let engine =
        MultiObjectiveSearchEngine::new(tiny_config(vec![Objective::maximize(ACCURACY, 1.0)])).unwrap();
    let evaluator: Arc<dyn CandidateEvaluator> = Arc::new(FnEvaluator::new(|_: &ParameterSet| {
        EvaluationOutcome::Failed(EvaluationFailure::Error("classifier crashed".to_string()))
    }));

    let result = engine.optimize(evaluator).await.unwrap();
    assert_eq!(result.iterations_completed, 3);
    assert_eq!(result.best_fitness, f64::NEG_INFINITY);
    assert!(result
        .convergence
        .iter()
        .all(|record| record.best_fitness == f64::NEG_INFINITY));
    assert!(!result.found_solution());
}

#[tokio::test]
async fn test_slow_units_time_out() {
    let config = SearchConfig {
        unit_timeout_secs: 0.05,
        max_iterations: 2,
        ..tiny_config(vec![Objective::maximize(ACCURACY, 1.0)])
    };
    let engine = MultiObjectiveSearchEngine::new(config).unwrap();
    let evaluator: Arc<dyn CandidateEvaluator> = Arc::new(FnEvaluator::new(|_: &ParameterSet| {
        std::thread::sleep(Duration::from_millis(300));
        EvaluationOutcome::Scored([(ACCURACY.to_string(), 1.0)].into_iter().collect())
    }));

    let result = engine.optimize(evaluator).await.unwrap();
    assert_eq!(result.iterations_completed, 2);
    assert_eq!(result.best_fitness, f64::NEG_INFINITY);
}

#[tokio::test]
async fn test_timed_out_units_keep_their_worker_slot() {
    let config = SearchConfig {
        population_size: 6,
        max_iterations: 1,
        parallel: true,
        workers: 2,
        unit_timeout_secs: 0.05,
        ..tiny_config(vec![Objective::maximize(ACCURACY, 1.0)])
    };
    let engine = MultiObjectiveSearchEngine::new(config).unwrap();

    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let evaluator: Arc<dyn CandidateEvaluator> = {
        let running = Arc::clone(&running);
        let peak = Arc::clone(&peak);
        Arc::new(FnEvaluator::new(move |_: &ParameterSet| {
            let now = running.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(200));
            running.fetch_sub(1, Ordering::SeqCst);
            EvaluationOutcome::Scored([(ACCURACY.to_string(), 1.0)].into_iter().collect())
        }))
    };

    let result = engine.optimize(evaluator).await.unwrap();
    assert_eq!(result.best_fitness, f64::NEG_INFINITY);
    assert!(
        peak.load(Ordering::SeqCst) <= 2,
        "peak concurrent evaluations {}",
        peak.load(Ordering::SeqCst)
    );
}

#[tokio::test]
async fn test_hybrid_classifier_and_density_search() {
    let data = labelled_traffic(60, 21);
    let mut bounds = default_classifier_axes();
    bounds.extend(default_density_axes());
    let config = SearchConfig {
        population_size: 4,
        max_iterations: 2,
        seed: Some(8),
        cv_folds: 3,
        density_subsample: 100,
        objectives: vec![
            Objective::maximize(ACCURACY, 0.5),
            Objective::maximize(DENSITY_DETECTION_RATE, 0.5),
        ],
        bounds,
        ..Default::default()
    };
    let engine = MultiObjectiveSearchEngine::new(config.clone()).unwrap();

    let density_base = DensityConfig::default().with_min_samples(20);
    let evaluator = HybridEvaluator::new(engine.space(), engine.objectives().clone())
        .with_classifier(ClassifierObjectiveEvaluator::new(
            knn_factory(),
            Arc::clone(&data),
            config.cv_folds,
            config.min_samples,
        ))
        .with_density(DensityObjectiveEvaluator::new(
            density_base,
            Arc::clone(&data),
            config.density_subsample,
            config.min_samples,
        ));

    let result = engine.optimize(Arc::new(evaluator)).await.unwrap();
    assert_eq!(result.iterations_completed, 2);
    assert!(result.found_solution());
    assert!(result.best_scores.contains_key(ACCURACY));
    assert!(result.best_scores.contains_key(DENSITY_DETECTION_RATE));
    assert!(result.best_parameters.contains_key("density_n_components"));
    assert!(!result.pareto_front.is_empty());

    let report = result.report();
    assert_eq!(report.pareto_front_size, result.pareto_front.len());
    assert_eq!(report.best_fitness, Some(result.best_fitness));
}

#[tokio::test]
async fn test_hybrid_without_sub_evaluators_is_rejected() {
    let engine =
        MultiObjectiveSearchEngine::new(tiny_config(vec![Objective::maximize(ACCURACY, 1.0)])).unwrap();
    let evaluator = HybridEvaluator::new(engine.space(), engine.objectives().clone());
    assert!(engine.optimize(Arc::new(evaluator)).await.is_err());
}
