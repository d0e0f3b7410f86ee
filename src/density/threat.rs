//! Multi-category Threat Detector
//!
//! トラフィックカテゴリごとに密度異常モデルを持ち、検知結果を横断的に集約する。

use super::model::DensityAnomalyModel;
use super::types::{AnomalyReport, Severity};
use super::DensityConfig;
use crate::error::Result;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{info, warn};

/// カテゴリごとのモデル作成に必要な行数（これを超える必要がある）
pub const MIN_CATEGORY_ROWS: usize = 50;
/// カテゴリモデルの成分数の上限
const MAX_CATEGORY_COMPONENTS: usize = 5;

/// 横断集約
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreatAssessment {
    /// 異常の総数
    pub total_anomalies: usize,
    /// 深刻度 High の件数
    pub high_severity_count: usize,
    /// 異常が検出されたカテゴリ数
    pub categories_affected: usize,
}

/// 検知結果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreatReport {
    /// 何らかの異常が検出されたか
    pub threat_detected: bool,
    /// カテゴリごとの結果
    pub categories: BTreeMap<String, AnomalyReport>,
    /// 横断集約
    pub assessment: ThreatAssessment,
    /// 推奨対応
    pub recommendations: Vec<String>,
}

/// 推奨対応のルール
///
/// 集約値の閾値ルールと、カテゴリ名に含まれるキーワードごとのヒントからなる。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendationPolicy {
    /// 影響カテゴリ数がこれを超えたら多経路攻撃とみなす
    pub multi_vector_categories: usize,
    /// 異常総数がこれを超えたら大量検知とみなす
    pub high_volume_anomalies: usize,
    /// (カテゴリ名キーワード, 推奨) の列。最初に一致したものを使う
    pub category_hints: Vec<(String, String)>,
}

impl Default for RecommendationPolicy {
    fn default() -> Self {
        let hint = |keyword: &str, advice: &str| (keyword.to_string(), advice.to_string());
        Self {
            multi_vector_categories: 2,
            high_volume_anomalies: 10,
            category_hints: vec![
                hint("dos", "Implement rate limiting and DDoS protection"),
                hint("probe", "Enhance network monitoring and access controls"),
                hint("u2r", "Review privilege escalation controls"),
                hint("r2l", "Strengthen authentication mechanisms"),
            ],
        }
    }
}

impl RecommendationPolicy {
    /// 推奨対応を生成
    pub fn recommend(
        &self,
        assessment: &ThreatAssessment,
        categories: &BTreeMap<String, AnomalyReport>,
    ) -> Vec<String> {
        let mut recommendations = Vec::new();

        if assessment.high_severity_count > 0 {
            recommendations
                .push("Immediate investigation required for high-severity anomalies".to_string());
            recommendations.push("Consider implementing automated response measures".to_string());
        }
        if assessment.categories_affected > self.multi_vector_categories {
            recommendations.push("Multi-vector attack detected - review security posture".to_string());
            recommendations.push("Activate incident response procedures".to_string());
        }
        if assessment.total_anomalies > self.high_volume_anomalies {
            recommendations
                .push("High anomaly volume detected - potential coordinated attack".to_string());
            recommendations.push("Review and update anomaly detection thresholds".to_string());
        }

        for (category, report) in categories {
            if report.anomaly_count == 0 {
                continue;
            }
            let category = category.to_lowercase();
            if let Some((_, advice)) = self
                .category_hints
                .iter()
                .find(|(keyword, _)| category.contains(keyword.as_str()))
            {
                recommendations.push(advice.clone());
            }
        }

        recommendations
    }
}

/// カテゴリ別の脅威検知器
#[derive(Debug, Default)]
pub struct ThreatDetector {
    base_config: DensityConfig,
    models: BTreeMap<String, DensityAnomalyModel>,
    policy: RecommendationPolicy,
}

impl ThreatDetector {
    /// 新しい検知器を作成
    pub fn new(base_config: DensityConfig) -> Self {
        Self {
            base_config,
            models: BTreeMap::new(),
            policy: RecommendationPolicy::default(),
        }
    }

    /// 推奨ルールを差し替え
    pub fn with_policy(mut self, policy: RecommendationPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// カテゴリごとにモデルを学習
    ///
    /// 行数が [`MIN_CATEGORY_ROWS`] 以下のカテゴリはスキップする。学習済みのカテゴリ名を返す。
    pub fn initialize(&mut self, data: &BTreeMap<String, Array2<f64>>) -> Result<Vec<String>> {
        let mut initialized = Vec::new();

        for (category, rows) in data {
            if rows.nrows() <= MIN_CATEGORY_ROWS {
                warn!(
                    category = %category,
                    rows = rows.nrows(),
                    "Skipping category with too few samples"
                );
                continue;
            }

            let config = self
                .base_config
                .clone()
                .with_components(MAX_CATEGORY_COMPONENTS.min(rows.nrows() / 20));
            let feature_names: Vec<String> = (0..rows.ncols())
                .map(|i| format!("{}_feature_{}", category, i))
                .collect();

            let mut model = DensityAnomalyModel::new(config)?;
            model.fit(rows.view(), &feature_names)?;
            self.models.insert(category.clone(), model);
            initialized.push(category.clone());

            info!(category = %category, rows = rows.nrows(), "Category model initialized");
        }

        Ok(initialized)
    }

    /// 学習済みカテゴリ
    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.models.keys().map(String::as_str)
    }

    /// カテゴリのモデル
    pub fn model(&self, category: &str) -> Option<&DensityAnomalyModel> {
        self.models.get(category)
    }

    /// カテゴリのモデル（可変）
    pub fn model_mut(&mut self, category: &str) -> Option<&mut DensityAnomalyModel> {
        self.models.get_mut(category)
    }

    /// 各カテゴリのデータをスコアリングして集約
    ///
    /// モデルのないカテゴリは無視する。
    pub fn detect(&mut self, data: &BTreeMap<String, Array2<f64>>) -> Result<ThreatReport> {
        let mut categories = BTreeMap::new();
        let mut assessment = ThreatAssessment::default();

        for (category, rows) in data {
            let Some(model) = self.models.get_mut(category) else {
                continue;
            };
            let report = model.predict_anomaly(rows.view())?;

            if report.anomaly_count > 0 {
                assessment.total_anomalies += report.anomaly_count;
                assessment.high_severity_count += report.count_severity(Severity::High);
                assessment.categories_affected += 1;
            }
            categories.insert(category.clone(), report);
        }

        let recommendations = self.policy.recommend(&assessment, &categories);
        if assessment.total_anomalies > 0 {
            warn!(
                total_anomalies = assessment.total_anomalies,
                high_severity = assessment.high_severity_count,
                categories_affected = assessment.categories_affected,
                "Threats detected"
            );
        }

        Ok(ThreatReport {
            threat_detected: assessment.total_anomalies > 0,
            categories,
            assessment,
            recommendations,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn traffic(rows: usize, offset: f64, seed: u64) -> Array2<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        Array2::from_shape_fn((rows, 2), |_| offset + rng.gen_range(-1.0..1.0))
    }

    #[test]
    fn test_small_categories_are_skipped() {
        let mut detector = ThreatDetector::new(DensityConfig::default());
        let mut data = BTreeMap::new();
        data.insert("dos_attacks".to_string(), traffic(120, 0.0, 1));
        data.insert("probe_attacks".to_string(), traffic(50, 0.0, 2));

        let initialized = detector.initialize(&data).unwrap();
        assert_eq!(initialized, vec!["dos_attacks".to_string()]);
        assert_eq!(detector.model("dos_attacks").unwrap().model_info().n_components, 5);
    }

    #[test]
    fn test_detect_aggregates_and_recommends() {
        let mut detector = ThreatDetector::new(DensityConfig::default());
        let mut training = BTreeMap::new();
        training.insert("dos_attacks".to_string(), traffic(100, 0.0, 3));
        detector.initialize(&training).unwrap();

        let mut live = BTreeMap::new();
        live.insert("dos_attacks".to_string(), traffic(20, 50.0, 4));
        live.insert("unknown".to_string(), traffic(20, 0.0, 5));
        let report = detector.detect(&live).unwrap();

        assert!(report.threat_detected);
        assert_eq!(report.categories.len(), 1);
        assert_eq!(report.assessment.categories_affected, 1);
        assert!(report.assessment.total_anomalies > 10);
        assert!(report
            .recommendations
            .iter()
            .any(|r| r.contains("rate limiting")));
        assert!(report
            .recommendations
            .iter()
            .any(|r| r.contains("High anomaly volume")));
    }

    #[test]
    fn test_policy_thresholds() {
        let policy = RecommendationPolicy::default();
        let quiet = ThreatAssessment::default();
        assert!(policy.recommend(&quiet, &BTreeMap::new()).is_empty());

        let widespread = ThreatAssessment {
            total_anomalies: 3,
            high_severity_count: 0,
            categories_affected: 3,
        };
        let recommendations = policy.recommend(&widespread, &BTreeMap::new());
        assert_eq!(recommendations.len(), 2);
        assert!(recommendations[0].contains("Multi-vector"));
    }
}
