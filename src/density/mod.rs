//! Density-based Anomaly Detection
//!
//! ガウス混合モデルによる密度推定型の異常検知。
//!
//! ## パイプライン
//!
//! 1. 非有限値の置換 → 標準化 → 分散保持PCA
//! 2. 縮約空間で混合密度を学習
//! 3. 負の対数密度を異常スコアとし、学習データのパーセンタイルで閾値を較正
//! 4. スコアリングした行をリプレイバッファに蓄積し、`adapt` で部分的に再較正

pub mod linalg;
pub mod mixture;
pub mod model;
pub mod persistence;
pub mod preprocess;
pub mod replay;
pub mod threat;
pub mod types;

pub use mixture::{Covariances, DensityEstimator, GaussianMixture, MixtureParameters};
pub use model::DensityAnomalyModel;
pub use persistence::ModelStore;
pub use replay::{ReplayBuffer, ReplayEntry};
pub use threat::{RecommendationPolicy, ThreatAssessment, ThreatDetector, ThreatReport};
pub use types::{
    AdaptationOutcome, AnomalyReport, BaselineStatistics, FeatureDeviation, ModelInfo,
    PatternSummary, Severity, SkipReason,
};

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// 共分散行列の形
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CovarianceKind {
    /// 成分ごとの完全共分散
    Full,
    /// 全成分で共有する共分散
    Tied,
    /// 成分ごとの対角共分散
    Diag,
    /// 成分ごとの等方分散
    Spherical,
}

impl CovarianceKind {
    /// 探索空間上のインデックスから変換（3以上は `Spherical`）
    pub fn from_index(index: usize) -> Self {
        match index {
            0 => CovarianceKind::Full,
            1 => CovarianceKind::Tied,
            2 => CovarianceKind::Diag,
            _ => CovarianceKind::Spherical,
        }
    }

    /// 名前
    pub fn as_str(&self) -> &'static str {
        match self {
            CovarianceKind::Full => "full",
            CovarianceKind::Tied => "tied",
            CovarianceKind::Diag => "diag",
            CovarianceKind::Spherical => "spherical",
        }
    }
}

impl std::fmt::Display for CovarianceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 密度異常モデルの設定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DensityConfig {
    /// 混合成分数
    pub n_components: usize,
    /// 共分散の形
    pub covariance_kind: CovarianceKind,
    /// 異常とみなす学習データの割合（閾値パーセンタイル = 1 − この値）
    pub anomaly_threshold: f64,
    /// 適応時のブレンド率
    pub adaptation_rate: f64,
    /// リプレイバッファのウィンドウサイズ
    pub window_size: usize,
    /// PCAで保持する累積寄与率
    pub variance_retained: f64,
    /// EMの最大反復数
    pub max_iter: usize,
    /// EMの収束判定
    pub tol: f64,
    /// 共分散の対角に加える正則化
    pub reg_covar: f64,
    /// 初期化の乱数シード
    pub random_state: u64,
    /// 学習に必要な最小サンプル数
    pub min_samples: usize,
    /// 使用する特徴量名（未指定なら全特徴量）
    pub feature_subset: Option<Vec<String>>,
}

impl Default for DensityConfig {
    fn default() -> Self {
        Self {
            n_components: 5,
            covariance_kind: CovarianceKind::Full,
            anomaly_threshold: 0.05,
            adaptation_rate: 0.1,
            window_size: 1000,
            variance_retained: 0.95,
            max_iter: 200,
            tol: 1e-4,
            reg_covar: 1e-6,
            random_state: 42,
            min_samples: 20,
            feature_subset: None,
        }
    }
}

impl DensityConfig {
    /// 設定を検証
    pub fn validate(&self) -> Result<()> {
        if self.n_components == 0 {
            return Err(Error::InvalidConfiguration(
                "n_components must be at least 1".to_string(),
            ));
        }
        if !(self.anomaly_threshold > 0.0 && self.anomaly_threshold < 1.0) {
            return Err(Error::InvalidConfiguration(format!(
                "anomaly_threshold must be within (0, 1), got {}",
                self.anomaly_threshold
            )));
        }
        if !(0.0..=1.0).contains(&self.adaptation_rate) {
            return Err(Error::InvalidConfiguration(format!(
                "adaptation_rate must be within [0, 1], got {}",
                self.adaptation_rate
            )));
        }
        if self.window_size == 0 {
            return Err(Error::InvalidConfiguration(
                "window_size must be at least 1".to_string(),
            ));
        }
        if !(self.variance_retained > 0.0 && self.variance_retained <= 1.0) {
            return Err(Error::InvalidConfiguration(format!(
                "variance_retained must be within (0, 1], got {}",
                self.variance_retained
            )));
        }
        if self.reg_covar < 0.0 || self.tol <= 0.0 || self.max_iter == 0 {
            return Err(Error::InvalidConfiguration(
                "EM settings must have max_iter > 0, tol > 0 and reg_covar >= 0".to_string(),
            ));
        }
        Ok(())
    }

    /// 成分数を設定
    pub fn with_components(mut self, n_components: usize) -> Self {
        self.n_components = n_components;
        self
    }

    /// 共分散の形を設定
    pub fn with_covariance_kind(mut self, kind: CovarianceKind) -> Self {
        self.covariance_kind = kind;
        self
    }

    /// 異常割合を設定
    pub fn with_anomaly_threshold(mut self, anomaly_threshold: f64) -> Self {
        self.anomaly_threshold = anomaly_threshold;
        self
    }

    /// ブレンド率を設定
    pub fn with_adaptation_rate(mut self, adaptation_rate: f64) -> Self {
        self.adaptation_rate = adaptation_rate;
        self
    }

    /// ウィンドウサイズを設定
    pub fn with_window_size(mut self, window_size: usize) -> Self {
        self.window_size = window_size;
        self
    }

    /// 最小サンプル数を設定
    pub fn with_min_samples(mut self, min_samples: usize) -> Self {
        self.min_samples = min_samples;
        self
    }

    /// 特徴量サブセットを設定
    pub fn with_feature_subset(mut self, features: Vec<String>) -> Self {
        self.feature_subset = Some(features);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(DensityConfig::default().validate().is_ok());
    }

    #[test]
    fn test_invalid_threshold() {
        let config = DensityConfig::default().with_anomaly_threshold(1.5);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_covariance_kind_from_index() {
        assert_eq!(CovarianceKind::from_index(0), CovarianceKind::Full);
        assert_eq!(CovarianceKind::from_index(2), CovarianceKind::Diag);
        assert_eq!(CovarianceKind::from_index(9), CovarianceKind::Spherical);
    }
}
