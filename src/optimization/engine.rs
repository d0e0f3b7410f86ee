//! Multi-objective Search Engine
//!
//! カラス探索を多目的に拡張したエンジン。
//!
//! ## 1反復の流れ
//!
//! 1. 全個体をデコードし、有界ワーカープールで並行評価（単位ごとにタイムアウト）
//! 2. コーディネータ側で結果を集約し、フィットネス・記憶・全体最良・パレート前線を更新
//! 3. 個体群を移動し、適応スケジュールで移動パラメータを減衰
//! 4. 多様性と経過時間を収束記録に追加

use super::crow_search::{CrowSearch, CrowSearchParams};
use super::evaluator::{CandidateEvaluator, EvaluationFailure, EvaluationOutcome};
use super::objective::{default_objectives, Objective, ObjectiveScores, ObjectiveSet};
use super::pareto::{ParetoFront, ParetoSolution, DEFAULT_PARETO_CAPACITY};
use super::schedule::AdaptiveSchedule;
use super::space::{default_classifier_axes, default_density_axes, ParameterAxis, ParameterSet, ParameterSpace};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// 探索設定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// 個体数
    pub population_size: usize,
    /// 反復数
    pub max_iterations: usize,
    /// 初期認識確率
    pub awareness_probability: f64,
    /// 初期飛行距離
    pub flight_length: f64,
    /// 並行評価するか（false なら1ワーカー）
    pub parallel: bool,
    /// 適応スケジュールを使うか
    pub adaptive: bool,
    /// ワーカー数（0ならCPU数）
    pub workers: usize,
    /// 評価単位のタイムアウト（秒）
    pub unit_timeout_secs: f64,
    /// 乱数シード（未指定ならランダム）
    pub seed: Option<u64>,
    /// パレート前線の容量
    pub pareto_capacity: usize,
    /// 交差検証の分割数
    pub cv_folds: usize,
    /// 密度評価のサブサンプル上限
    pub density_subsample: usize,
    /// 評価に必要な最小サンプル数
    pub min_samples: usize,
    /// 目的
    pub objectives: Vec<Objective>,
    /// 探索軸
    pub bounds: Vec<ParameterAxis>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        let mut bounds = default_classifier_axes();
        bounds.extend(default_density_axes());
        Self {
            population_size: 20,
            max_iterations: 50,
            awareness_probability: 0.1,
            flight_length: 2.0,
            parallel: true,
            adaptive: true,
            workers: 4,
            unit_timeout_secs: 300.0,
            seed: None,
            pareto_capacity: DEFAULT_PARETO_CAPACITY,
            cv_folds: 5,
            density_subsample: 1000,
            min_samples: 10,
            objectives: default_objectives(),
            bounds,
        }
    }
}

impl SearchConfig {
    /// CSAの基本パラメータ
    pub fn crow_params(&self) -> CrowSearchParams {
        CrowSearchParams {
            population_size: self.population_size,
            max_iterations: self.max_iterations,
            awareness_probability: self.awareness_probability,
            flight_length: self.flight_length,
        }
    }

    /// 評価単位のタイムアウト
    pub fn unit_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.unit_timeout_secs)
    }

    /// 実際に使うワーカー数
    pub fn effective_workers(&self) -> usize {
        if !self.parallel {
            1
        } else if self.workers == 0 {
            num_cpus::get().max(1)
        } else {
            self.workers
        }
    }

    /// 設定を検証
    pub fn validate(&self) -> Result<()> {
        self.crow_params().validate()?;
        if !(self.unit_timeout_secs.is_finite() && self.unit_timeout_secs > 0.0) {
            return Err(Error::InvalidConfiguration(format!(
                "unit_timeout_secs must be positive, got {}",
                self.unit_timeout_secs
            )));
        }
        if self.cv_folds < 2 {
            return Err(Error::InvalidConfiguration(format!(
                "cv_folds must be at least 2, got {}",
                self.cv_folds
            )));
        }
        Ok(())
    }
}

/// 1反復分の収束記録
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvergenceRecord {
    /// 反復番号（1始まり）
    pub iteration: usize,
    /// その時点の最良フィットネス
    pub best_fitness: f64,
    /// 個体群の多様性
    pub diversity: f64,
    /// 反復の所要時間
    pub duration: Duration,
    /// パレート前線のサイズ
    pub pareto_size: usize,
}

/// 探索結果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationResult {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub seed: u64,
    /// 最良パラメータ（有効な解がなければ空）
    pub best_parameters: ParameterSet,
    /// 最良フィットネス（有効な解がなければ -∞）
    pub best_fitness: f64,
    /// 最良解の目的スコア
    pub best_scores: ObjectiveScores,
    pub convergence: Vec<ConvergenceRecord>,
    pub pareto_front: Vec<ParetoSolution>,
    pub elapsed: Duration,
    pub iterations_completed: usize,
}

/// 報告用の平坦な記録
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub best_parameters: ParameterSet,
    /// 有効な解がなければ `None`
    pub best_fitness: Option<f64>,
    pub objective_scores: ObjectiveScores,
    pub elapsed_secs: f64,
    pub iterations_completed: usize,
    pub pareto_front_size: usize,
}

impl OptimizationResult {
    /// 有効な解が見つかったか
    pub fn found_solution(&self) -> bool {
        self.best_fitness.is_finite()
    }

    /// 報告用の記録に変換
    pub fn report(&self) -> OptimizationReport {
        OptimizationReport {
            run_id: self.run_id,
            started_at: self.started_at,
            best_parameters: self.best_parameters.clone(),
            best_fitness: self.found_solution().then_some(self.best_fitness),
            objective_scores: self.best_scores.clone(),
            elapsed_secs: self.elapsed.as_secs_f64(),
            iterations_completed: self.iterations_completed,
            pareto_front_size: self.pareto_front.len(),
        }
    }
}

/// 多目的探索エンジン
pub struct MultiObjectiveSearchEngine {
    config: SearchConfig,
    space: Arc<ParameterSpace>,
    objectives: ObjectiveSet,
}

impl MultiObjectiveSearchEngine {
    /// 設定からエンジンを作成（境界・目的・設定の不備は致命的エラー）
    pub fn new(config: SearchConfig) -> Result<Self> {
        config.validate()?;
        let space = Arc::new(ParameterSpace::new(config.bounds.clone())?);
        let objectives = ObjectiveSet::new(config.objectives.clone())?;
        Ok(Self {
            config,
            space,
            objectives,
        })
    }

    /// 設定
    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// パラメータ空間
    pub fn space(&self) -> Arc<ParameterSpace> {
        Arc::clone(&self.space)
    }

    /// 目的集合
    pub fn objectives(&self) -> &ObjectiveSet {
        &self.objectives
    }

    /// 探索を実行
    ///
    /// 評価器の `validate` が失敗した場合だけエラーを返す。候補ごとの失敗は
    /// -∞ のフィットネスとして扱い、探索は常に全反復を完了する。
    pub async fn optimize(
        &self,
        evaluator: Arc<dyn CandidateEvaluator>,
    ) -> Result<OptimizationResult> {
        evaluator.validate()?;

        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let start = Instant::now();
        let seed = self.config.seed.unwrap_or_else(rand::random);
        let params = self.config.crow_params();

        let mut search = CrowSearch::new(Arc::clone(&self.space), params, seed)?;
        let schedule = AdaptiveSchedule::new(params.movement(), params.max_iterations);
        let mut front = ParetoFront::new(self.config.pareto_capacity);
        let mut best_scores = ObjectiveScores::new();
        let mut convergence = Vec::with_capacity(params.max_iterations);
        let semaphore = Arc::new(Semaphore::new(self.config.effective_workers()));

        info!(
            run_id = %run_id,
            seed,
            population_size = params.population_size,
            max_iterations = params.max_iterations,
            workers = self.config.effective_workers(),
            objectives = self.objectives.objectives().len(),
            "Starting multi-objective CSA optimization"
        );

        for iteration in 0..params.max_iterations {
            let iteration_start = Instant::now();
            let candidates = search.decode_all()?;
            let outcomes = self
                .evaluate_population(&evaluator, &semaphore, &candidates)
                .await;

            for (index, (parameters, outcome)) in candidates.into_iter().zip(outcomes).enumerate() {
                let (fitness, scores) = match outcome {
                    EvaluationOutcome::Scored(mut scores) => {
                        self.objectives.fill_missing(&mut scores);
                        (self.objectives.aggregate(&scores), scores)
                    }
                    EvaluationOutcome::Failed(failure) => {
                        warn!(iteration = iteration + 1, candidate = index, %failure, "Candidate evaluation failed");
                        (f64::NEG_INFINITY, self.objectives.zero_scores())
                    }
                };

                let update = search.record_fitness(index, fitness)?;
                if update.global_improved {
                    best_scores = scores.clone();
                }
                if update.memory_improved {
                    front.insert(
                        ParetoSolution {
                            parameters,
                            objectives: scores,
                            fitness,
                        },
                        &self.objectives,
                    );
                }
            }

            search.step();
            if self.config.adaptive {
                search.set_movement(schedule.at(iteration));
            }

            let record = ConvergenceRecord {
                iteration: iteration + 1,
                best_fitness: search.best_fitness(),
                diversity: search.population().diversity(),
                duration: iteration_start.elapsed(),
                pareto_size: front.len(),
            };
            debug!(
                iteration = record.iteration,
                best_fitness = record.best_fitness,
                diversity = record.diversity,
                pareto_size = record.pareto_size,
                "Iteration completed"
            );
            if record.iteration % 10 == 0 {
                info!(
                    "Iteration {}/{}, best fitness: {:.6}, Pareto front: {}",
                    record.iteration, params.max_iterations, record.best_fitness, record.pareto_size
                );
            }
            convergence.push(record);
        }

        let best = search.best();
        let result = OptimizationResult {
            run_id,
            started_at,
            seed,
            best_parameters: best.map(|b| b.parameters.clone()).unwrap_or_default(),
            best_fitness: search.best_fitness(),
            best_scores,
            iterations_completed: convergence.len(),
            convergence,
            pareto_front: front.solutions().to_vec(),
            elapsed: start.elapsed(),
        };

        if result.found_solution() {
            info!(
                run_id = %run_id,
                best_fitness = result.best_fitness,
                pareto_size = result.pareto_front.len(),
                elapsed_secs = result.elapsed.as_secs_f64(),
                "Multi-objective optimization completed"
            );
        } else {
            warn!(run_id = %run_id, "Multi-objective optimization found no valid solutions");
        }

        Ok(result)
    }

    /// 有界ワーカープールで全候補を評価（結果は候補の順序どおり）
    async fn evaluate_population(
        &self,
        evaluator: &Arc<dyn CandidateEvaluator>,
        semaphore: &Arc<Semaphore>,
        candidates: &[ParameterSet],
    ) -> Vec<EvaluationOutcome> {
        let timeout = self.config.unit_timeout();

        let handles: Vec<_> = candidates
            .iter()
            .cloned()
            .map(|params| {
                let evaluator = Arc::clone(evaluator);
                let semaphore = Arc::clone(semaphore);
                tokio::spawn(async move {
                    let Ok(permit) = semaphore.acquire_owned().await else {
                        return EvaluationOutcome::Failed(EvaluationFailure::Error(
                            "worker pool closed".to_string(),
                        ));
                    };

                    // タイムアウト後も評価が終わるまで枠を返さない
                    let task = tokio::task::spawn_blocking(move || {
                        let _permit = permit;
                        evaluator.evaluate(&params)
                    });
                    match tokio::time::timeout(timeout, task).await {
                        Ok(Ok(outcome)) => outcome,
                        Ok(Err(join_error)) => {
                            EvaluationOutcome::Failed(EvaluationFailure::Panicked(panic_message(join_error)))
                        }
                        Err(_) => EvaluationOutcome::Failed(EvaluationFailure::Timeout(timeout)),
                    }
                })
            })
            .collect();

        join_all(handles)
            .await
            .into_iter()
            .map(|joined| {
                joined.unwrap_or_else(|e| {
                    EvaluationOutcome::Failed(EvaluationFailure::Panicked(e.to_string()))
                })
            })
            .collect()
    }
}

fn panic_message(error: tokio::task::JoinError) -> String {
    if !error.is_panic() {
        return error.to_string();
    }
    let payload = error.into_panic();
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimization::evaluator::FnEvaluator;
    use crate::optimization::space::ParamRole;

    fn quadratic_config() -> SearchConfig {
        SearchConfig {
            population_size: 8,
            max_iterations: 12,
            seed: Some(21),
            objectives: vec![Objective::maximize("score", 1.0)],
            bounds: vec![
                ParameterAxis::continuous("x", 0.0, 1.0, ParamRole::Classifier),
                ParameterAxis::integer("k", 1, 9, ParamRole::Classifier),
            ],
            ..Default::default()
        }
    }

    fn quadratic() -> Arc<dyn CandidateEvaluator> {
        Arc::new(FnEvaluator::new(|params: &ParameterSet| {
            let x = params["x"].as_f64();
            let k = params["k"].as_f64();
            let score = 1.0 - (x - 0.3).powi(2) - ((k - 5.0) / 10.0).powi(2);
            EvaluationOutcome::Scored([("score".to_string(), score)].into_iter().collect())
        }))
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = SearchConfig::default();
        assert!(config.validate().is_ok());
        assert!(MultiObjectiveSearchEngine::new(config).is_ok());
    }

    #[test]
    fn test_effective_workers() {
        let config = SearchConfig::default();
        assert_eq!(config.effective_workers(), 4);

        let auto = SearchConfig {
            workers: 0,
            ..Default::default()
        };
        assert_eq!(auto.effective_workers(), num_cpus::get().max(1));

        let sequential = SearchConfig {
            parallel: false,
            workers: 8,
            ..Default::default()
        };
        assert_eq!(sequential.effective_workers(), 1);
    }

    #[test]
    fn test_malformed_bounds_are_fatal() {
        let config = SearchConfig {
            bounds: vec![ParameterAxis::continuous("x", 2.0, 1.0, ParamRole::Classifier)],
            ..quadratic_config()
        };
        let err = MultiObjectiveSearchEngine::new(config).err().unwrap();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_optimize_records_every_iteration() {
        let engine = MultiObjectiveSearchEngine::new(quadratic_config()).unwrap();
        let result = engine.optimize(quadratic()).await.unwrap();

        assert_eq!(result.iterations_completed, 12);
        assert_eq!(result.convergence.len(), 12);
        assert_eq!(result.convergence[0].iteration, 1);
        assert!(result.found_solution());
        assert!(result.best_fitness > 0.9);
        assert!(result.best_scores.contains_key("score"));
        assert!(!result.pareto_front.is_empty());
    }

    #[tokio::test]
    async fn test_sequential_matches_parallel() {
        let parallel = MultiObjectiveSearchEngine::new(quadratic_config()).unwrap();
        let sequential = MultiObjectiveSearchEngine::new(SearchConfig {
            parallel: false,
            ..quadratic_config()
        })
        .unwrap();

        let a = parallel.optimize(quadratic()).await.unwrap();
        let b = sequential.optimize(quadratic()).await.unwrap();
        assert_eq!(a.best_parameters, b.best_parameters);
        assert_eq!(a.best_fitness, b.best_fitness);
    }

    #[tokio::test]
    async fn test_panicking_evaluator_is_absorbed() {
        let engine = MultiObjectiveSearchEngine::new(quadratic_config()).unwrap();
        let evaluator: Arc<dyn CandidateEvaluator> =
            Arc::new(FnEvaluator::new(|_: &ParameterSet| -> EvaluationOutcome {
                panic!("evaluator exploded")
            }));
        let result = engine.optimize(evaluator).await.unwrap();

        assert_eq!(result.iterations_completed, 12);
        assert_eq!(result.best_fitness, f64::NEG_INFINITY);
        assert!(result.best_parameters.is_empty());
        assert!(result.pareto_front.is_empty());
        assert_eq!(result.report().best_fitness, None);
    }

    #[test]
    fn test_report_is_flat() {
        let result = OptimizationResult {
            run_id: Uuid::nil(),
            started_at: Utc::now(),
            seed: 1,
            best_parameters: ParameterSet::new(),
            best_fitness: 0.5,
            best_scores: ObjectiveScores::new(),
            convergence: Vec::new(),
            pareto_front: Vec::new(),
            elapsed: Duration::from_millis(1500),
            iterations_completed: 0,
        };
        let report = result.report();
        assert_eq!(report.best_fitness, Some(0.5));
        assert_eq!(report.elapsed_secs, 1.5);
        assert!(serde_json::to_string(&report).is_ok());
    }
}
