//! Density Anomaly Model
//!
//! `unfitted → fitted → (scoring | adapting) → fitted` の状態機械。
//!
//! - `fit` は前処理・混合密度・閾値・基準統計をすべて置き換える
//! - `predict_anomaly` はスコアリングした行をリプレイバッファに追加する
//! - `score_samples` は状態を変更しない（並行スコアリング用）
//! - `adapt` はバッファ中の正常サンプルで一時モデルを学習し、現行パラメータにブレンドする

use super::mixture::{DensityEstimator, GaussianMixture, MixtureParameters};
use super::preprocess::{clean_non_finite, Pca, StandardScaler};
use super::replay::{ReplayBuffer, ReplayEntry};
use super::types::{
    exceeds_threshold, AdaptationOutcome, AnomalyReport, BaselineStatistics, FeatureDeviation,
    ModelInfo, PatternSummary, Severity, SkipReason,
};
use super::DensityConfig;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use ndarray::{Array1, Array2, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use tracing::{debug, info, warn};

/// 適応に必要な正常サンプル数
pub const MIN_NORMAL_SAMPLES: usize = 10;
/// 閾値再較正で各成分から生成するサンプル数
pub const RECALIBRATION_SAMPLES_PER_COMPONENT: usize = 100;
/// パターン要約に含める特徴量数
const TOP_DEVIATING_FEATURES: usize = 5;

/// 線形補間パーセンタイル（`q` は 0〜100）
///
/// 値をソートし、`q/100·(n−1)` の位置を前後の値で補間する。空なら NaN。
pub fn percentile(values: &[f64], q: f64) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let position = (q / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    sorted[lower] + (sorted[upper] - sorted[lower]) * (position - lower as f64)
}

/// 学習で確定する状態
#[derive(Debug, Clone, Serialize, Deserialize)]
struct FittedState {
    /// 入力の全特徴量名
    feature_names: Vec<String>,
    /// 使用する列のインデックス
    selected: Vec<usize>,
    scaler: StandardScaler,
    pca: Pca,
    threshold: f64,
    /// 使用列ごとの重要度（合計1）
    feature_importance: Vec<f64>,
    baseline: BaselineStatistics,
}

impl FittedState {
    fn selected_names(&self) -> impl Iterator<Item = &str> {
        self.selected
            .iter()
            .map(|&i| self.feature_names[i].as_str())
    }
}

/// 密度異常モデル
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "E: DensityEstimator")]
pub struct DensityAnomalyModel<E = GaussianMixture> {
    config: DensityConfig,
    estimator: E,
    state: Option<FittedState>,
    buffer: ReplayBuffer,
    last_update: Option<DateTime<Utc>>,
}

impl DensityAnomalyModel {
    /// 設定に従ったガウス混合モデルで作成
    pub fn new(config: DensityConfig) -> Result<Self> {
        let estimator = GaussianMixture::new(config.n_components, config.covariance_kind)
            .with_em_settings(config.max_iter, config.tol, config.reg_covar)
            .with_random_state(config.random_state);
        Self::with_estimator(config, estimator)
    }
}

impl<E: DensityEstimator> DensityAnomalyModel<E> {
    /// 任意の密度推定器で作成
    pub fn with_estimator(config: DensityConfig, estimator: E) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            buffer: ReplayBuffer::new(config.window_size),
            config,
            estimator,
            state: None,
            last_update: None,
        })
    }

    /// 設定
    pub fn config(&self) -> &DensityConfig {
        &self.config
    }

    /// 学習済みか
    pub fn is_fitted(&self) -> bool {
        self.state.is_some()
    }

    /// 較正済み閾値
    pub fn threshold(&self) -> Option<f64> {
        self.state.as_ref().map(|s| s.threshold)
    }

    /// 入力の特徴量名
    pub fn feature_names(&self) -> &[String] {
        self.state
            .as_ref()
            .map(|s| s.feature_names.as_slice())
            .unwrap_or(&[])
    }

    /// 基準統計
    pub fn baseline(&self) -> Option<&BaselineStatistics> {
        self.state.as_ref().map(|s| &s.baseline)
    }

    /// 使用特徴量ごとの重要度
    pub fn feature_importance(&self) -> Vec<(String, f64)> {
        self.state
            .as_ref()
            .map(|s| {
                s.selected_names()
                    .map(str::to_string)
                    .zip(s.feature_importance.iter().copied())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// リプレイバッファ
    pub fn buffer(&self) -> &ReplayBuffer {
        &self.buffer
    }

    /// 最終更新時刻
    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        self.last_update
    }

    /// 密度推定器
    pub fn estimator(&self) -> &E {
        &self.estimator
    }

    fn fitted_state(&self) -> Result<&FittedState> {
        self.state
            .as_ref()
            .ok_or_else(|| Error::NotFitted("density anomaly model".to_string()))
    }

    /// 学習
    ///
    /// 既存の状態（バッファを含む）はすべて置き換えられる。
    pub fn fit(&mut self, data: ArrayView2<f64>, feature_names: &[String]) -> Result<&mut Self> {
        let (n_samples, n_features) = data.dim();
        if feature_names.len() != n_features {
            return Err(Error::DimensionMismatch {
                expected: feature_names.len(),
                actual: n_features,
            });
        }
        if n_samples < self.config.min_samples {
            return Err(Error::InsufficientSamples {
                required: self.config.min_samples,
                actual: n_samples,
            });
        }

        info!(
            samples = n_samples,
            features = n_features,
            n_components = self.config.n_components,
            covariance = %self.config.covariance_kind,
            "Training density anomaly model"
        );

        let selected = self.select_features(feature_names)?;
        let cleaned = clean_non_finite(data.select(Axis(1), &selected).view());

        let scaler = StandardScaler::fit(cleaned.view())?;
        let scaled = scaler.transform(cleaned.view())?;
        let pca = Pca::fit(scaled.view(), self.config.variance_retained)?;
        let reduced = pca.transform(scaled.view())?;

        let mut estimator = self.estimator.clone();
        estimator.fit(reduced.view())?;

        let scores: Vec<f64> = estimator
            .score_samples(reduced.view())?
            .iter()
            .map(|log_density| -log_density)
            .collect();
        let threshold = percentile(&scores, self.threshold_percentile());

        let baseline = baseline_statistics(cleaned.view(), &scores);
        let feature_importance = estimator
            .parameters()
            .and_then(|params| project_importance(params, &pca))
            .unwrap_or_else(|| vec![1.0 / selected.len() as f64; selected.len()]);

        debug!(
            pca_components = pca.n_components(),
            threshold, "Density anomaly model calibrated"
        );

        self.estimator = estimator;
        self.state = Some(FittedState {
            feature_names: feature_names.to_vec(),
            selected,
            scaler,
            pca,
            threshold,
            feature_importance,
            baseline,
        });
        self.buffer = ReplayBuffer::new(self.config.window_size);
        self.last_update = Some(Utc::now());

        info!(threshold, "Density anomaly model training completed");
        Ok(self)
    }

    fn threshold_percentile(&self) -> f64 {
        (1.0 - self.config.anomaly_threshold) * 100.0
    }

    fn select_features(&self, feature_names: &[String]) -> Result<Vec<usize>> {
        match &self.config.feature_subset {
            None => Ok((0..feature_names.len()).collect()),
            Some(subset) if subset.is_empty() => Err(Error::InvalidConfiguration(
                "feature_subset must not be empty".to_string(),
            )),
            Some(subset) => subset
                .iter()
                .map(|name| {
                    feature_names
                        .iter()
                        .position(|candidate| candidate == name)
                        .ok_or_else(|| {
                            Error::InvalidParams(format!("unknown feature '{}'", name))
                        })
                })
                .collect(),
        }
    }

    /// 入力行列を縮約空間へ変換（列選択 → クリーニング → 標準化 → PCA）
    fn reduce(&self, state: &FittedState, data: ArrayView2<f64>) -> Result<Array2<f64>> {
        if data.ncols() != state.feature_names.len() {
            return Err(Error::DimensionMismatch {
                expected: state.feature_names.len(),
                actual: data.ncols(),
            });
        }
        let cleaned = clean_non_finite(data.select(Axis(1), &state.selected).view());
        let scaled = state.scaler.transform(cleaned.view())?;
        state.pca.transform(scaled.view())
    }

    /// 行ごとの異常スコア（負の対数密度）。状態は変更しない。
    pub fn score_samples(&self, data: ArrayView2<f64>) -> Result<Array1<f64>> {
        let state = self.fitted_state()?;
        let reduced = self.reduce(state, data)?;
        Ok(self.estimator.score_samples(reduced.view())?.mapv(|v| -v))
    }

    /// スコアリングして異常を判定し、各行をリプレイバッファに追加
    pub fn predict_anomaly(&mut self, data: ArrayView2<f64>) -> Result<AnomalyReport> {
        let state = self.fitted_state()?;
        let reduced = self.reduce(state, data)?;

        let scores = self.estimator.score_samples(reduced.view())?.mapv(|v| -v);
        let probabilities = self.estimator.predict_proba(reduced.view())?;
        let threshold = state.threshold;

        let is_anomaly: Vec<bool> = scores
            .iter()
            .map(|s| exceeds_threshold(*s, threshold))
            .collect();
        let severity: Vec<Severity> = scores
            .iter()
            .map(|s| Severity::grade(*s, threshold))
            .collect();
        let anomaly_count = is_anomaly.iter().filter(|a| **a).count();
        let anomaly_percentage = if scores.is_empty() {
            0.0
        } else {
            anomaly_count as f64 / scores.len() as f64 * 100.0
        };
        let pattern_summary = pattern_summary(state, data, scores.as_slice().unwrap_or(&[]), &is_anomaly);

        let cleaned = clean_non_finite(data);
        let now = Utc::now();
        for ((row, score), flagged) in cleaned.outer_iter().zip(scores.iter()).zip(&is_anomaly) {
            self.buffer.push(ReplayEntry {
                features: row.to_vec(),
                score: *score,
                is_anomaly: *flagged,
                timestamp: now,
            });
        }

        debug!(
            rows = scores.len(),
            anomaly_count,
            buffer = self.buffer.len(),
            "Scored samples"
        );

        Ok(AnomalyReport {
            anomaly_scores: scores.to_vec(),
            is_anomaly,
            severity,
            component_probabilities: probabilities
                .outer_iter()
                .map(|row| row.to_vec())
                .collect(),
            anomaly_count,
            anomaly_percentage,
            threshold,
            pattern_summary,
        })
    }

    /// バッファ中の正常サンプルでモデルを部分更新
    ///
    /// 前提条件を満たさない場合や一時モデルの学習に失敗した場合は
    /// `AdaptationOutcome::Skipped` を返し、状態は変更しない。
    pub fn adapt(&mut self, force: bool) -> Result<AdaptationOutcome> {
        let state = self.fitted_state()?;

        if !force && !self.buffer.is_window_full() {
            return Ok(AdaptationOutcome::Skipped(SkipReason::InsufficientData {
                buffered: self.buffer.len(),
                required: self.buffer.window_size(),
            }));
        }

        let normal: Vec<&ReplayEntry> = self.buffer.normal_entries().collect();
        if normal.len() < MIN_NORMAL_SAMPLES {
            debug!(normal = normal.len(), "Not enough normal samples for adaptation");
            return Ok(AdaptationOutcome::Skipped(
                SkipReason::InsufficientNormalSamples {
                    normal: normal.len(),
                    required: MIN_NORMAL_SAMPLES,
                },
            ));
        }

        let width = state.feature_names.len();
        let rows = Array2::from_shape_vec(
            (normal.len(), width),
            normal.iter().flat_map(|e| e.features.iter().copied()).collect(),
        )
        .map_err(|e| Error::InvalidParams(format!("replay buffer rows are ragged: {}", e)))?;
        let normal_samples = normal.len();

        let (estimator, scores) = match self.blend_from(state, rows.view()) {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "Density model adaptation failed");
                return Ok(AdaptationOutcome::Skipped(SkipReason::AdaptationError {
                    message: e.to_string(),
                }));
            }
        };

        let new_threshold = percentile(&scores, self.threshold_percentile());
        let updated_at = Utc::now();
        let previous_threshold = state.threshold;

        self.estimator = estimator;
        if let Some(state) = self.state.as_mut() {
            state.threshold = new_threshold;
            let (score_mean, score_std, p95, p99, p999) = score_statistics(&scores);
            state.baseline.score_mean = score_mean;
            state.baseline.score_std = score_std;
            state.baseline.score_p95 = p95;
            state.baseline.score_p99 = p99;
            state.baseline.score_p999 = p999;
        }
        self.buffer.clear();
        self.last_update = Some(updated_at);

        info!(
            normal_samples,
            previous_threshold, new_threshold, "Density model adapted"
        );

        Ok(AdaptationOutcome::Adapted {
            normal_samples,
            previous_threshold,
            new_threshold,
            updated_at,
        })
    }

    /// 一時モデルを学習してブレンドし、合成サンプルで基準スコアを再計算
    fn blend_from(&self, state: &FittedState, rows: ArrayView2<f64>) -> Result<(E, Vec<f64>)> {
        let reduced = self.reduce(state, rows)?;

        let current = self
            .estimator
            .parameters()
            .ok_or_else(|| Error::NotFitted("density estimator".to_string()))?;

        let mut temporary = self.estimator.clone();
        temporary.fit(reduced.view())?;
        let fresh = temporary
            .parameters()
            .ok_or_else(|| Error::NotFitted("temporary density estimator".to_string()))?;

        let blended = current.blend(fresh, self.config.adaptation_rate)?;

        let mut rng = StdRng::seed_from_u64(self.config.random_state);
        let synthetic = blended.sample(RECALIBRATION_SAMPLES_PER_COMPONENT, &mut rng)?;

        let mut estimator = self.estimator.clone();
        estimator.set_parameters(blended)?;
        let scores = estimator
            .score_samples(synthetic.view())?
            .iter()
            .map(|log_density| -log_density)
            .collect();

        Ok((estimator, scores))
    }

    /// モデルの構造情報
    pub fn model_info(&self) -> ModelInfo {
        ModelInfo {
            fitted: self.is_fitted(),
            n_components: self
                .estimator
                .parameters()
                .map_or(self.config.n_components, MixtureParameters::n_components),
            covariance_kind: self.config.covariance_kind,
            anomaly_threshold: self.config.anomaly_threshold,
            adaptation_rate: self.config.adaptation_rate,
            window_size: self.config.window_size,
            feature_names: self.feature_names().to_vec(),
            threshold: self.threshold(),
            baseline: self.baseline().cloned(),
            feature_importance: self.feature_importance(),
            buffer_size: self.buffer.len(),
            pca_components: self.state.as_ref().map(|s| s.pca.n_components()),
            last_update: self.last_update,
        }
    }
}

fn score_statistics(scores: &[f64]) -> (f64, f64, f64, f64, f64) {
    (
        scores.iter().mean(),
        scores.iter().population_std_dev(),
        percentile(scores, 95.0),
        percentile(scores, 99.0),
        percentile(scores, 99.9),
    )
}

fn baseline_statistics(data: ArrayView2<f64>, scores: &[f64]) -> BaselineStatistics {
    let (score_mean, score_std, score_p95, score_p99, score_p999) = score_statistics(scores);
    BaselineStatistics {
        feature_means: data.columns().into_iter().map(|c| c.iter().mean()).collect(),
        feature_stds: data
            .columns()
            .into_iter()
            .map(|c| c.iter().population_std_dev())
            .collect(),
        score_mean,
        score_std,
        score_p95,
        score_p99,
        score_p999,
    }
}

/// 各成分の重み付き平均をPCA成分経由で元の特徴量空間へ射影した重要度
fn project_importance(params: &MixtureParameters, pca: &Pca) -> Option<Vec<f64>> {
    let loadings = pca.components().mapv(f64::abs);
    if loadings.nrows() != params.n_features() {
        return None;
    }

    let mut importance = Array1::<f64>::zeros(loadings.ncols());
    for (mean, weight) in params.means.outer_iter().zip(params.weights.iter()) {
        let contribution = mean.mapv(f64::abs) * *weight;
        importance += &loadings.t().dot(&contribution);
    }

    let total = importance.sum();
    if total > 0.0 && total.is_finite() {
        Some((importance / total).to_vec())
    } else {
        None
    }
}

fn pattern_summary(
    state: &FittedState,
    data: ArrayView2<f64>,
    scores: &[f64],
    is_anomaly: &[bool],
) -> Option<PatternSummary> {
    let anomalous: Vec<usize> = is_anomaly
        .iter()
        .enumerate()
        .filter_map(|(i, a)| a.then_some(i))
        .collect();
    if anomalous.is_empty() {
        return None;
    }

    let rows = clean_non_finite(data.select(Axis(0), &anomalous).view());
    let mut top_features: Vec<FeatureDeviation> = state
        .selected
        .iter()
        .enumerate()
        .filter_map(|(j, &column)| {
            let mean = state.baseline.feature_means[j];
            let std = state.baseline.feature_stds[j];
            (std > 0.0).then(|| FeatureDeviation {
                feature: state.feature_names[column].clone(),
                mean_abs_z_score: rows
                    .column(column)
                    .iter()
                    .map(|v| ((v - mean) / std).abs())
                    .mean(),
            })
        })
        .collect();
    top_features.sort_by(|a, b| b.mean_abs_z_score.total_cmp(&a.mean_abs_z_score));
    top_features.truncate(TOP_DEVIATING_FEATURES);

    let anomalous_scores: Vec<f64> = anomalous.iter().map(|&i| scores[i]).collect();
    Some(PatternSummary {
        top_features,
        mean_score: anomalous_scores.iter().mean(),
        max_score: anomalous_scores.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        score_std: anomalous_scores.iter().population_std_dev(),
    })
}
