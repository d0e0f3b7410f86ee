//! Density Model Types
//!
//! 密度異常モデルの入出力型。

use super::CovarianceKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// スコアが閾値を超えて異常とみなされるか
pub fn exceeds_threshold(score: f64, threshold: f64) -> bool {
    score > threshold
}

/// 異常の深刻度
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// 正常
    Normal,
    /// 低
    Low,
    /// 中
    Medium,
    /// 高
    High,
}

impl Severity {
    /// スコアと閾値から深刻度を決定
    ///
    /// `score < t` → Normal、`< 2t` → Low、`< 3t` → Medium、それ以外 → High。
    /// 異常判定は [`exceeds_threshold`]（`score > t`）なので、閾値ちょうどのスコアは
    /// 異常ではないが Low になる。
    pub fn grade(score: f64, threshold: f64) -> Self {
        if score < threshold {
            Severity::Normal
        } else if score < 2.0 * threshold {
            Severity::Low
        } else if score < 3.0 * threshold {
            Severity::Medium
        } else {
            Severity::High
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Severity::Normal => "normal",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        };
        f.write_str(name)
    }
}

/// 特徴量の逸脱度
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureDeviation {
    /// 特徴量名
    pub feature: String,
    /// 異常行における平均絶対Zスコア
    pub mean_abs_z_score: f64,
}

/// 異常行のパターン要約
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternSummary {
    /// 逸脱の大きい特徴量（上位5件）
    pub top_features: Vec<FeatureDeviation>,
    /// 異常スコアの平均
    pub mean_score: f64,
    /// 異常スコアの最大
    pub max_score: f64,
    /// 異常スコアの標準偏差
    pub score_std: f64,
}

/// スコアリング結果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyReport {
    /// 行ごとの異常スコア（負の対数密度）
    pub anomaly_scores: Vec<f64>,
    /// 行ごとの判定
    pub is_anomaly: Vec<bool>,
    /// 行ごとの深刻度
    pub severity: Vec<Severity>,
    /// 行ごとの成分所属確率
    pub component_probabilities: Vec<Vec<f64>>,
    /// 異常件数
    pub anomaly_count: usize,
    /// 異常割合（%）
    pub anomaly_percentage: f64,
    /// 判定に使った閾値
    pub threshold: f64,
    /// 異常行のパターン要約（異常がなければ `None`）
    pub pattern_summary: Option<PatternSummary>,
}

impl AnomalyReport {
    /// 指定深刻度の件数
    pub fn count_severity(&self, severity: Severity) -> usize {
        self.severity.iter().filter(|s| **s == severity).count()
    }
}

/// 適応をスキップした理由
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    /// バッファがウィンドウに達していない
    InsufficientData { buffered: usize, required: usize },
    /// 正常サンプルが足りない
    InsufficientNormalSamples { normal: usize, required: usize },
    /// 一時モデルの学習やブレンドに失敗
    AdaptationError { message: String },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::InsufficientData { buffered, required } => {
                write!(f, "insufficient data ({} of {} buffered)", buffered, required)
            }
            SkipReason::InsufficientNormalSamples { normal, required } => write!(
                f,
                "insufficient normal samples ({} of {} required)",
                normal, required
            ),
            SkipReason::AdaptationError { message } => write!(f, "adaptation error: {}", message),
        }
    }
}

/// 適応の結果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AdaptationOutcome {
    /// 適応した
    Adapted {
        /// 使用した正常サンプル数
        normal_samples: usize,
        /// 旧閾値
        previous_threshold: f64,
        /// 新閾値
        new_threshold: f64,
        /// 更新時刻
        updated_at: DateTime<Utc>,
    },
    /// スキップした
    Skipped(SkipReason),
}

impl AdaptationOutcome {
    /// 適応したか
    pub fn adapted(&self) -> bool {
        matches!(self, AdaptationOutcome::Adapted { .. })
    }
}

/// 学習時の基準統計
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineStatistics {
    /// 特徴量ごとの平均
    pub feature_means: Vec<f64>,
    /// 特徴量ごとの標準偏差
    pub feature_stds: Vec<f64>,
    /// 基準スコアの平均
    pub score_mean: f64,
    /// 基準スコアの標準偏差
    pub score_std: f64,
    /// 95パーセンタイル
    pub score_p95: f64,
    /// 99パーセンタイル
    pub score_p99: f64,
    /// 99.9パーセンタイル
    pub score_p999: f64,
}

/// モデルの構造情報
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub fitted: bool,
    pub n_components: usize,
    pub covariance_kind: CovarianceKind,
    pub anomaly_threshold: f64,
    pub adaptation_rate: f64,
    pub window_size: usize,
    pub feature_names: Vec<String>,
    pub threshold: Option<f64>,
    pub baseline: Option<BaselineStatistics>,
    pub feature_importance: Vec<(String, f64)>,
    pub buffer_size: usize,
    pub pca_components: Option<usize>,
    pub last_update: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_grading() {
        assert_eq!(Severity::grade(0.5, 1.0), Severity::Normal);
        assert_eq!(Severity::grade(1.0, 1.0), Severity::Low);
        assert_eq!(Severity::grade(2.5, 1.0), Severity::Medium);
        assert_eq!(Severity::grade(3.0, 1.0), Severity::High);
    }

    #[test]
    fn test_score_at_threshold_is_low_but_not_anomalous() {
        let threshold = 4.2;
        let score = threshold;
        assert_eq!(Severity::grade(score, threshold), Severity::Low);
        assert!(!exceeds_threshold(score, threshold));
        assert!(exceeds_threshold(score + 1e-9, threshold));
        assert_eq!(Severity::grade(threshold - 1e-9, threshold), Severity::Normal);
    }

    #[test]
    fn test_adaptation_outcome_flag() {
        let skipped = AdaptationOutcome::Skipped(SkipReason::InsufficientData {
            buffered: 3,
            required: 10,
        });
        assert!(!skipped.adapted());
        assert!(skipped_to_json_has_reason(&skipped));
    }

    fn skipped_to_json_has_reason(outcome: &AdaptationOutcome) -> bool {
        let json = serde_json::to_value(outcome).unwrap();
        json["status"] == "skipped" && json["reason"] == "insufficient_data"
    }
}
