//! Optimization Objectives
//!
//! 重み付き多目的フィットネスの集約とパレート支配関係。

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 目的名 → 生スコア
pub type ObjectiveScores = BTreeMap<String, f64>;

/// 単一の最適化目的
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Objective {
    /// 目的名（評価器が返すスコア名と一致させる）
    pub name: String,
    /// 重み（0以上）
    pub weight: f64,
    /// 最小化する目的か
    #[serde(default)]
    pub minimize: bool,
    /// 正規化に使う目標範囲 (lo, hi)
    #[serde(default)]
    pub target_range: Option<(f64, f64)>,
}

impl Objective {
    /// 最大化目的を作成
    pub fn maximize(name: impl Into<String>, weight: f64) -> Self {
        Self {
            name: name.into(),
            weight,
            minimize: false,
            target_range: None,
        }
    }

    /// 最小化目的を作成
    pub fn minimize(name: impl Into<String>, weight: f64) -> Self {
        Self {
            name: name.into(),
            weight,
            minimize: true,
            target_range: None,
        }
    }

    /// 目標範囲を設定
    pub fn with_target_range(mut self, lo: f64, hi: f64) -> Self {
        self.target_range = Some((lo, hi));
        self
    }

    /// 生スコアを最大化方向の調整済みスコアに変換
    pub fn adjust(&self, raw: f64) -> f64 {
        let mut score = if self.minimize { 1.0 - raw } else { raw };
        if let Some((lo, hi)) = self.target_range {
            score = ((score - lo) / (hi - lo)).clamp(0.0, 1.0);
        }
        score
    }

    /// `a` が `b` より厳密に良いか / 悪いか（向きを考慮）
    fn compare(&self, a: f64, b: f64) -> std::cmp::Ordering {
        let ordering = a.partial_cmp(&b).unwrap_or(std::cmp::Ordering::Equal);
        if self.minimize {
            ordering.reverse()
        } else {
            ordering
        }
    }
}

/// 探索で使う目的の順序付き集合（空でない）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Objective>", into = "Vec<Objective>")]
pub struct ObjectiveSet {
    objectives: Vec<Objective>,
}

impl ObjectiveSet {
    /// 新しい目的集合を作成
    pub fn new(objectives: Vec<Objective>) -> Result<Self> {
        if objectives.is_empty() {
            return Err(Error::InvalidConfiguration(
                "at least one objective is required".to_string(),
            ));
        }
        for objective in &objectives {
            if !objective.weight.is_finite() || objective.weight < 0.0 {
                return Err(Error::InvalidConfiguration(format!(
                    "objective '{}' has invalid weight {}",
                    objective.name, objective.weight
                )));
            }
            if let Some((lo, hi)) = objective.target_range {
                if !(lo.is_finite() && hi.is_finite() && lo < hi) {
                    return Err(Error::InvalidConfiguration(format!(
                        "objective '{}' has invalid target range ({}, {})",
                        objective.name, lo, hi
                    )));
                }
            }
        }
        Ok(Self { objectives })
    }

    /// 目的一覧
    pub fn objectives(&self) -> &[Objective] {
        &self.objectives
    }

    /// 目的名一覧
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.objectives.iter().map(|o| o.name.as_str())
    }

    /// 全目的がゼロのスコアベクトル
    pub fn zero_scores(&self) -> ObjectiveScores {
        self.names().map(|name| (name.to_string(), 0.0)).collect()
    }

    /// 欠けている目的名を0で埋める
    pub fn fill_missing(&self, scores: &mut ObjectiveScores) {
        for name in self.names() {
            scores.entry(name.to_string()).or_insert(0.0);
        }
    }

    /// 重み付きフィットネスを計算
    ///
    /// `Σ(weight · adjusted) / Σ(weight)`。重みの合計が0なら0を返す。
    pub fn aggregate(&self, scores: &ObjectiveScores) -> f64 {
        let mut total_fitness = 0.0;
        let mut total_weight = 0.0;

        for objective in &self.objectives {
            let raw = scores.get(&objective.name).copied().unwrap_or(0.0);
            total_fitness += objective.weight * objective.adjust(raw);
            total_weight += objective.weight;
        }

        if total_weight > 0.0 {
            total_fitness / total_weight
        } else {
            0.0
        }
    }

    /// `a` が `b` をパレート支配するか
    ///
    /// 両方に存在する目的すべてで劣らず、少なくとも1つで厳密に優れている場合に真。
    pub fn dominates(&self, a: &ObjectiveScores, b: &ObjectiveScores) -> bool {
        let mut better_in_any = false;

        for objective in &self.objectives {
            let (Some(&sa), Some(&sb)) = (a.get(&objective.name), b.get(&objective.name)) else {
                continue;
            };
            match objective.compare(sa, sb) {
                std::cmp::Ordering::Less => return false,
                std::cmp::Ordering::Greater => better_in_any = true,
                std::cmp::Ordering::Equal => {}
            }
        }

        better_in_any
    }
}

impl TryFrom<Vec<Objective>> for ObjectiveSet {
    type Error = Error;

    fn try_from(objectives: Vec<Objective>) -> Result<Self> {
        Self::new(objectives)
    }
}

impl From<ObjectiveSet> for Vec<Objective> {
    fn from(set: ObjectiveSet) -> Self {
        set.objectives
    }
}

/// 分類器目的のデフォルト構成
pub fn default_objectives() -> Vec<Objective> {
    vec![
        Objective::maximize("accuracy", 0.4),
        Objective::maximize("f1_score", 0.3),
        Objective::maximize("precision", 0.15),
        Objective::maximize("recall", 0.15),
    ]
}
