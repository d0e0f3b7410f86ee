//! Objective Evaluators
//!
//! 候補パラメータ集合を目的スコアに変換する評価器。
//!
//! 評価器自身の失敗（学習エラーなど）は全目的0のスコアとして吸収し、
//! タイムアウトやパニックのように評価単位そのものが完了しなかった場合だけ
//! [`EvaluationOutcome::Failed`] になる。

use super::objective::{ObjectiveScores, ObjectiveSet};
use super::space::{ParamRole, ParameterSet, ParameterSpace};
use crate::classifier::{cross_validate, ClassifierFactory};
use crate::dataset::Dataset;
use crate::density::{CovarianceKind, DensityAnomalyModel, DensityConfig, DensityEstimator};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// 分類器の正解率
pub const ACCURACY: &str = "accuracy";
/// 分類器の重み付きF1
pub const F1_SCORE: &str = "f1_score";
/// 分類器の重み付き適合率
pub const PRECISION: &str = "precision";
/// 分類器の重み付き再現率
pub const RECALL: &str = "recall";
/// 密度モデルの検知率
pub const DENSITY_DETECTION_RATE: &str = "density_detection_rate";
/// 密度モデルの閾値安定性
pub const DENSITY_STABILITY: &str = "density_stability";
/// 密度モデルの適応効率
pub const DENSITY_ADAPTATION: &str = "density_adaptation";

/// 分類器評価器が返す目的名
pub const CLASSIFIER_OBJECTIVES: [&str; 4] = [ACCURACY, F1_SCORE, PRECISION, RECALL];
/// 密度評価器が返す目的名
pub const DENSITY_OBJECTIVES: [&str; 3] =
    [DENSITY_DETECTION_RATE, DENSITY_STABILITY, DENSITY_ADAPTATION];

/// 評価単位が完了しなかった理由
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
pub enum EvaluationFailure {
    /// 評価器がエラーを返した
    #[error("evaluation error: {0}")]
    Error(String),
    /// 時間切れ
    #[error("evaluation timed out after {0:?}")]
    Timeout(Duration),
    /// パニック
    #[error("evaluation panicked: {0}")]
    Panicked(String),
}

/// 評価結果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EvaluationOutcome {
    /// スコア
    Scored(ObjectiveScores),
    /// 失敗
    Failed(EvaluationFailure),
}

/// 候補評価器
pub trait CandidateEvaluator: Send + Sync + 'static {
    /// 候補を評価
    fn evaluate(&self, params: &ParameterSet) -> EvaluationOutcome;

    /// 探索開始前の検証（データ不足などの致命的エラー）
    fn validate(&self) -> Result<()> {
        Ok(())
    }
}

/// クロージャを評価器として扱う
pub struct FnEvaluator<F> {
    f: F,
}

impl<F> FnEvaluator<F>
where
    F: Fn(&ParameterSet) -> EvaluationOutcome + Send + Sync + 'static,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> CandidateEvaluator for FnEvaluator<F>
where
    F: Fn(&ParameterSet) -> EvaluationOutcome + Send + Sync + 'static,
{
    fn evaluate(&self, params: &ParameterSet) -> EvaluationOutcome {
        (self.f)(params)
    }
}

fn zero_scores(names: &[&str]) -> ObjectiveScores {
    names.iter().map(|name| (name.to_string(), 0.0)).collect()
}

fn require_samples(dataset: &Dataset, min_samples: usize) -> Result<()> {
    if dataset.n_samples() < min_samples {
        return Err(Error::InsufficientSamples {
            required: min_samples,
            actual: dataset.n_samples(),
        });
    }
    Ok(())
}

/// 分類器の交差検証スコアを返す評価器
pub struct ClassifierObjectiveEvaluator {
    factory: ClassifierFactory,
    data: Arc<Dataset>,
    folds: usize,
    min_samples: usize,
    space: Option<Arc<ParameterSpace>>,
}

impl ClassifierObjectiveEvaluator {
    /// 新しい評価器を作成
    pub fn new(factory: ClassifierFactory, data: Arc<Dataset>, folds: usize, min_samples: usize) -> Self {
        Self {
            factory,
            data,
            folds,
            min_samples,
            space: None,
        }
    }

    /// 分類器ロールの軸だけを分類器に渡すようにする
    ///
    /// 密度軸を含む空間で単独利用するときに使う。
    pub fn with_space(mut self, space: Arc<ParameterSpace>) -> Self {
        self.space = Some(space);
        self
    }

    /// 交差検証の平均指標
    pub fn scores(&self, params: &ParameterSet) -> Result<ObjectiveScores> {
        let labels = self
            .data
            .labels()
            .ok_or_else(|| Error::Evaluation("classifier objectives need labels".to_string()))?;
        let classifier_params;
        let params = match &self.space {
            Some(space) => {
                classifier_params = space.split(params).0;
                &classifier_params
            }
            None => params,
        };
        let metrics = cross_validate(&self.factory, params, self.data.features(), labels, self.folds)?;

        Ok([
            (ACCURACY.to_string(), metrics.accuracy),
            (F1_SCORE.to_string(), metrics.f1_score),
            (PRECISION.to_string(), metrics.precision),
            (RECALL.to_string(), metrics.recall),
        ]
        .into_iter()
        .collect())
    }
}

impl CandidateEvaluator for ClassifierObjectiveEvaluator {
    fn evaluate(&self, params: &ParameterSet) -> EvaluationOutcome {
        match self.scores(params) {
            Ok(scores) => EvaluationOutcome::Scored(scores),
            Err(e) => {
                warn!(error = %e, "Classifier evaluation failed, scoring zero");
                EvaluationOutcome::Scored(zero_scores(&CLASSIFIER_OBJECTIVES))
            }
        }
    }

    fn validate(&self) -> Result<()> {
        require_samples(&self.data, self.min_samples.max(self.folds))?;
        if self.data.labels().is_none() {
            return Err(Error::InvalidConfiguration(
                "classifier objectives need labelled data".to_string(),
            ));
        }
        if self.folds < 2 {
            return Err(Error::InvalidConfiguration(format!(
                "cross validation needs at least 2 folds, got {}",
                self.folds
            )));
        }
        if let Some(space) = &self.space {
            if !space.has_role(ParamRole::Classifier) {
                warn!("Classifier evaluator bound to a space without classifier parameters");
            }
        }
        Ok(())
    }
}

/// 一時的な密度異常モデルを学習して評価する評価器
pub struct DensityObjectiveEvaluator {
    base_config: DensityConfig,
    data: Arc<Dataset>,
    subsample_cap: usize,
    min_samples: usize,
    reference_threshold: Option<f64>,
}

impl DensityObjectiveEvaluator {
    /// 新しい評価器を作成
    pub fn new(base_config: DensityConfig, data: Arc<Dataset>, subsample_cap: usize, min_samples: usize) -> Self {
        Self {
            base_config,
            data,
            subsample_cap,
            min_samples,
            reference_threshold: None,
        }
    }

    /// 安定性の基準にするモデルを指定（未学習なら基準なし）
    pub fn with_reference<E: DensityEstimator>(mut self, reference: &DensityAnomalyModel<E>) -> Self {
        self.reference_threshold = reference.threshold();
        self
    }

    /// 候補パラメータを反映した設定
    pub fn config_for(&self, params: &ParameterSet) -> Result<DensityConfig> {
        let mut config = self.base_config.clone();
        for (name, value) in params {
            match name.as_str() {
                "density_n_components" => config.n_components = value.as_usize(),
                "density_covariance_kind" => {
                    config.covariance_kind = CovarianceKind::from_index(value.as_usize())
                }
                "density_anomaly_threshold" => config.anomaly_threshold = value.as_f64(),
                "density_adaptation_rate" => config.adaptation_rate = value.as_f64(),
                "density_window_size" => config.window_size = value.as_usize(),
                other => {
                    return Err(Error::InvalidParams(format!(
                        "unknown density parameter '{}'",
                        other
                    )))
                }
            }
        }
        config.validate()?;
        Ok(config)
    }

    /// 検知率・安定性・適応効率
    pub fn scores(&self, params: &ParameterSet) -> Result<ObjectiveScores> {
        let config = self.config_for(params)?;
        let window_size = config.window_size;
        let sample = self.data.subsample(self.subsample_cap, config.random_state);

        let mut model = DensityAnomalyModel::new(config)?;
        model.fit(sample.features(), sample.feature_names())?;
        let report = model.predict_anomaly(sample.features())?;

        let detection_rate = if sample.n_samples() > 0 {
            report.anomaly_count as f64 / sample.n_samples() as f64
        } else {
            0.0
        };
        let stability = match (self.reference_threshold, model.threshold()) {
            (Some(reference), Some(threshold)) => 1.0 / (1.0 + (threshold - reference).abs()),
            _ => 0.0,
        };
        let adaptation = (model.buffer().len() as f64 / window_size as f64).min(1.0);

        debug!(detection_rate, stability, adaptation, "Density candidate evaluated");

        Ok([
            (DENSITY_DETECTION_RATE.to_string(), detection_rate),
            (DENSITY_STABILITY.to_string(), stability),
            (DENSITY_ADAPTATION.to_string(), adaptation),
        ]
        .into_iter()
        .collect())
    }
}

impl CandidateEvaluator for DensityObjectiveEvaluator {
    fn evaluate(&self, params: &ParameterSet) -> EvaluationOutcome {
        match self.scores(params) {
            Ok(scores) => EvaluationOutcome::Scored(scores),
            Err(e) => {
                warn!(error = %e, "Density evaluation failed, scoring zero");
                EvaluationOutcome::Scored(zero_scores(&DENSITY_OBJECTIVES))
            }
        }
    }

    fn validate(&self) -> Result<()> {
        require_samples(&self.data, self.min_samples.max(self.base_config.min_samples))?;
        self.base_config.validate()
    }
}

/// パラメータをロール別に分け、分類器・密度の両評価器に振り分ける評価器
pub struct HybridEvaluator {
    space: Arc<ParameterSpace>,
    objectives: ObjectiveSet,
    classifier: Option<ClassifierObjectiveEvaluator>,
    density: Option<DensityObjectiveEvaluator>,
}

impl HybridEvaluator {
    /// 新しい評価器を作成
    pub fn new(space: Arc<ParameterSpace>, objectives: ObjectiveSet) -> Self {
        Self {
            space,
            objectives,
            classifier: None,
            density: None,
        }
    }

    /// 分類器評価器を設定
    pub fn with_classifier(mut self, evaluator: ClassifierObjectiveEvaluator) -> Self {
        self.classifier = Some(evaluator);
        self
    }

    /// 密度評価器を設定
    pub fn with_density(mut self, evaluator: DensityObjectiveEvaluator) -> Self {
        self.density = Some(evaluator);
        self
    }

    fn wants(&self, names: &[&str]) -> bool {
        self.objectives.names().any(|name| names.contains(&name))
    }
}

impl CandidateEvaluator for HybridEvaluator {
    fn evaluate(&self, params: &ParameterSet) -> EvaluationOutcome {
        let (classifier_params, density_params) = self.space.split(params);
        let mut scores = ObjectiveScores::new();

        if let Some(evaluator) = &self.classifier {
            if self.wants(&CLASSIFIER_OBJECTIVES) {
                if let EvaluationOutcome::Scored(s) = evaluator.evaluate(&classifier_params) {
                    scores.extend(s);
                }
            }
        }
        if let Some(evaluator) = &self.density {
            if self.wants(&DENSITY_OBJECTIVES) {
                if let EvaluationOutcome::Scored(s) = evaluator.evaluate(&density_params) {
                    scores.extend(s);
                }
            }
        }

        self.objectives.fill_missing(&mut scores);
        EvaluationOutcome::Scored(scores)
    }

    fn validate(&self) -> Result<()> {
        if self.classifier.is_none() && self.density.is_none() {
            return Err(Error::InvalidConfiguration(
                "hybrid evaluator needs at least one sub-evaluator".to_string(),
            ));
        }
        if self.wants(&CLASSIFIER_OBJECTIVES) && !self.space.has_role(ParamRole::Classifier) {
            warn!("Classifier objectives configured without classifier parameters");
        }
        if let Some(evaluator) = &self.classifier {
            evaluator.validate()?;
        }
        if let Some(evaluator) = &self.density {
            evaluator.validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::knn_factory;
    use crate::optimization::objective::{default_objectives, Objective};
    use crate::optimization::space::{default_classifier_axes, default_density_axes, ParamValue};
    use ndarray::Array2;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn labelled(rows: usize) -> Arc<Dataset> {
        let mut rng = StdRng::seed_from_u64(17);
        let features = Array2::from_shape_fn((rows, 2), |(i, _)| {
            let base = if i % 2 == 0 { 0.0 } else { 6.0 };
            base + rng.gen_range(0.0..1.0)
        });
        let labels = (0..rows).map(|i| i % 2).collect();
        Arc::new(Dataset::unnamed(features, Some(labels)).unwrap())
    }

    fn knn_params(k: i64) -> ParameterSet {
        let mut params = ParameterSet::new();
        params.insert("knn_neighbors".to_string(), ParamValue::Integer(k));
        params
    }

    #[test]
    fn test_classifier_scores_separable_data() {
        let evaluator = ClassifierObjectiveEvaluator::new(knn_factory(), labelled(60), 5, 10);
        evaluator.validate().unwrap();
        let EvaluationOutcome::Scored(scores) = evaluator.evaluate(&knn_params(3)) else {
            panic!("expected scores");
        };
        assert_eq!(scores[ACCURACY], 1.0);
        assert_eq!(scores.len(), 4);
    }

    #[test]
    fn test_classifier_failure_scores_zero() {
        let evaluator = ClassifierObjectiveEvaluator::new(knn_factory(), labelled(60), 5, 10);
        let mut params = knn_params(3);
        params.insert("bogus".to_string(), ParamValue::Integer(1));
        let outcome = evaluator.evaluate(&params);
        assert_eq!(
            outcome,
            EvaluationOutcome::Scored(zero_scores(&CLASSIFIER_OBJECTIVES))
        );
    }

    #[test]
    fn test_classifier_ignores_density_axes_when_bound_to_space() {
        let mut axes = default_classifier_axes();
        axes.extend(default_density_axes());
        let space = Arc::new(ParameterSpace::new(axes).unwrap());
        let params = space.decode(&[3.0, 1.0, 2.0, 0.0, 0.05, 0.1, 100.0]).unwrap();

        let unbound = ClassifierObjectiveEvaluator::new(knn_factory(), labelled(60), 5, 10);
        assert_eq!(
            unbound.evaluate(&params),
            EvaluationOutcome::Scored(zero_scores(&CLASSIFIER_OBJECTIVES))
        );

        let bound = ClassifierObjectiveEvaluator::new(knn_factory(), labelled(60), 5, 10)
            .with_space(Arc::clone(&space));
        let EvaluationOutcome::Scored(scores) = bound.evaluate(&params) else {
            panic!("expected scores");
        };
        assert_eq!(scores[ACCURACY], 1.0);
    }

    #[test]
    fn test_validate_rejects_small_data() {
        let evaluator = ClassifierObjectiveEvaluator::new(knn_factory(), labelled(6), 5, 10);
        let err = evaluator.validate().unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_density_scores_without_reference() {
        let evaluator =
            DensityObjectiveEvaluator::new(DensityConfig::default(), labelled(120), 1000, 10);
        let mut params = ParameterSet::new();
        params.insert("density_n_components".to_string(), ParamValue::Integer(2));
        params.insert("density_anomaly_threshold".to_string(), ParamValue::Continuous(0.1));
        params.insert("density_window_size".to_string(), ParamValue::Integer(100));

        let scores = evaluator.scores(&params).unwrap();
        assert!(scores[DENSITY_DETECTION_RATE] > 0.0 && scores[DENSITY_DETECTION_RATE] < 0.3);
        assert_eq!(scores[DENSITY_STABILITY], 0.0);
        assert_eq!(scores[DENSITY_ADAPTATION], 1.0);
    }

    #[test]
    fn test_density_stability_uses_fitted_reference() {
        let data = labelled(120);
        let mut reference = DensityAnomalyModel::new(DensityConfig::default().with_components(2)).unwrap();
        reference
            .fit(data.features(), data.feature_names())
            .unwrap();

        let evaluator = DensityObjectiveEvaluator::new(DensityConfig::default(), data, 1000, 10)
            .with_reference(&reference);
        let mut params = ParameterSet::new();
        params.insert("density_n_components".to_string(), ParamValue::Integer(2));
        let scores = evaluator.scores(&params).unwrap();
        assert!((scores[DENSITY_STABILITY] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_hybrid_routes_by_role_and_fills_missing() {
        let mut axes = default_classifier_axes();
        axes.extend(default_density_axes());
        let space = Arc::new(ParameterSpace::new(axes).unwrap());

        let mut objectives = default_objectives();
        objectives.push(Objective::maximize(DENSITY_DETECTION_RATE, 0.2));
        objectives.push(Objective::minimize("latency", 0.1));
        let objectives = ObjectiveSet::new(objectives).unwrap();

        let data = labelled(80);
        let evaluator = HybridEvaluator::new(Arc::clone(&space), objectives)
            .with_classifier(ClassifierObjectiveEvaluator::new(
                knn_factory(),
                Arc::clone(&data),
                4,
                10,
            ))
            .with_density(DensityObjectiveEvaluator::new(
                DensityConfig::default(),
                data,
                1000,
                10,
            ));
        evaluator.validate().unwrap();

        let params = space.decode(&[3.0, 1.0, 2.0, 0.0, 0.05, 0.1, 100.0]).unwrap();
        let EvaluationOutcome::Scored(scores) = evaluator.evaluate(&params) else {
            panic!("expected scores");
        };
        assert_eq!(scores[ACCURACY], 1.0);
        assert!(scores.contains_key(DENSITY_STABILITY));
        assert_eq!(scores["latency"], 0.0);
    }
}
