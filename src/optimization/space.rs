//! Bounded Parameter Space
//!
//! 名前付きパラメータ軸（上下限・整数/連続）と、位置ベクトル⇔パラメータ集合の変換。

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// パラメータ軸の種類
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AxisKind {
    /// 連続値
    Continuous,
    /// 整数値（デコード時に偶数丸め）
    Integer,
}

/// パラメータの行き先（どの評価器に渡すか）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamRole {
    /// 教師あり分類器のハイパーパラメータ
    Classifier,
    /// 密度モデルのハイパーパラメータ
    Density,
}

/// パラメータ軸
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterAxis {
    /// パラメータ名
    pub name: String,
    /// 下限
    pub min: f64,
    /// 上限
    pub max: f64,
    /// 種類
    pub kind: AxisKind,
    /// 行き先
    pub role: ParamRole,
}

impl ParameterAxis {
    /// 連続値の軸を作成
    pub fn continuous(name: impl Into<String>, min: f64, max: f64, role: ParamRole) -> Self {
        Self {
            name: name.into(),
            min,
            max,
            kind: AxisKind::Continuous,
            role,
        }
    }

    /// 整数値の軸を作成
    pub fn integer(name: impl Into<String>, min: i64, max: i64, role: ParamRole) -> Self {
        Self {
            name: name.into(),
            min: min as f64,
            max: max as f64,
            kind: AxisKind::Integer,
            role,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::InvalidBounds("axis name must not be empty".to_string()));
        }
        if !self.min.is_finite() || !self.max.is_finite() {
            return Err(Error::InvalidBounds(format!(
                "axis '{}' has non-finite bounds [{}, {}]",
                self.name, self.min, self.max
            )));
        }
        if self.min > self.max {
            return Err(Error::InvalidBounds(format!(
                "axis '{}' has min {} > max {}",
                self.name, self.min, self.max
            )));
        }
        if self.kind == AxisKind::Integer
            && (self.min.fract() != 0.0 || self.max.fract() != 0.0)
        {
            return Err(Error::InvalidBounds(format!(
                "integer axis '{}' must have integral bounds, got [{}, {}]",
                self.name, self.min, self.max
            )));
        }
        Ok(())
    }

    /// 軸の範囲内に値を射影
    pub fn clamp(&self, value: f64) -> f64 {
        if value.is_nan() {
            return self.min;
        }
        value.clamp(self.min, self.max)
    }

    /// 位置座標をパラメータ値に変換
    pub fn decode(&self, value: f64) -> ParamValue {
        match self.kind {
            AxisKind::Continuous => ParamValue::Continuous(self.clamp(value)),
            AxisKind::Integer => {
                let rounded = if value.is_nan() {
                    self.min
                } else {
                    value.round_ties_even()
                };
                ParamValue::Integer(self.clamp(rounded) as i64)
            }
        }
    }

    /// 軸の幅
    pub fn span(&self) -> f64 {
        self.max - self.min
    }
}

/// パラメータ値
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    /// 整数
    Integer(i64),
    /// 実数
    Continuous(f64),
}

impl ParamValue {
    /// f64として取得
    pub fn as_f64(&self) -> f64 {
        match *self {
            ParamValue::Integer(v) => v as f64,
            ParamValue::Continuous(v) => v,
        }
    }

    /// 非負整数として取得（実数は偶数丸め）
    pub fn as_usize(&self) -> usize {
        match *self {
            ParamValue::Integer(v) => v.max(0) as usize,
            ParamValue::Continuous(v) => v.round_ties_even().max(0.0) as usize,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Integer(v) => write!(f, "{}", v),
            ParamValue::Continuous(v) => write!(f, "{:.6}", v),
        }
    }
}

/// デコード済みパラメータ集合（名前 → 値）
pub type ParameterSet = BTreeMap<String, ParamValue>;

/// 境界付きパラメータ空間
///
/// 軸の順序が位置ベクトルのインデックスに対応します。探索開始後は不変です。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpace {
    axes: Vec<ParameterAxis>,
}

impl ParameterSpace {
    /// 新しいパラメータ空間を作成
    pub fn new(axes: Vec<ParameterAxis>) -> Result<Self> {
        if axes.is_empty() {
            return Err(Error::InvalidBounds(
                "parameter space needs at least one axis".to_string(),
            ));
        }
        for (i, axis) in axes.iter().enumerate() {
            axis.validate()?;
            if axes[..i].iter().any(|other| other.name == axis.name) {
                return Err(Error::InvalidBounds(format!(
                    "duplicate axis name '{}'",
                    axis.name
                )));
            }
        }
        Ok(Self { axes })
    }

    /// 軸一覧
    pub fn axes(&self) -> &[ParameterAxis] {
        &self.axes
    }

    /// 次元数
    pub fn dimensions(&self) -> usize {
        self.axes.len()
    }

    /// 指定ロールの軸が存在するか
    pub fn has_role(&self, role: ParamRole) -> bool {
        self.axes.iter().any(|axis| axis.role == role)
    }

    /// 各軸ごとにクランプして範囲内へ射影
    pub fn project(&self, position: &mut [f64]) {
        for (value, axis) in position.iter_mut().zip(&self.axes) {
            *value = axis.clamp(*value);
        }
    }

    /// 位置ベクトルが全軸の範囲内か
    pub fn contains(&self, position: &[f64]) -> bool {
        position.len() == self.axes.len()
            && position
                .iter()
                .zip(&self.axes)
                .all(|(v, axis)| *v >= axis.min && *v <= axis.max)
    }

    /// 位置ベクトルをパラメータ集合に変換
    pub fn decode(&self, position: &[f64]) -> Result<ParameterSet> {
        if position.len() != self.axes.len() {
            return Err(Error::DimensionMismatch {
                expected: self.axes.len(),
                actual: position.len(),
            });
        }
        Ok(self
            .axes
            .iter()
            .zip(position)
            .map(|(axis, &value)| (axis.name.clone(), axis.decode(value)))
            .collect())
    }

    /// パラメータ集合を位置ベクトルに変換（欠けている軸はエラー）
    pub fn encode(&self, params: &ParameterSet) -> Result<Vec<f64>> {
        self.axes
            .iter()
            .map(|axis| {
                params
                    .get(&axis.name)
                    .map(|value| axis.clamp(value.as_f64()))
                    .ok_or_else(|| {
                        Error::InvalidParams(format!("missing parameter '{}'", axis.name))
                    })
            })
            .collect()
    }

    /// パラメータ集合をロール別に分割
    pub fn split(&self, params: &ParameterSet) -> (ParameterSet, ParameterSet) {
        let mut classifier = ParameterSet::new();
        let mut density = ParameterSet::new();
        for axis in &self.axes {
            if let Some(value) = params.get(&axis.name) {
                match axis.role {
                    ParamRole::Classifier => classifier.insert(axis.name.clone(), *value),
                    ParamRole::Density => density.insert(axis.name.clone(), *value),
                };
            }
        }
        (classifier, density)
    }

    /// 一様乱数で範囲内の位置を生成
    pub fn sample<R: rand::Rng + ?Sized>(&self, rng: &mut R) -> Vec<f64> {
        self.axes
            .iter()
            .map(|axis| axis.min + rng.gen::<f64>() * axis.span())
            .collect()
    }
}

/// 分類器側のデフォルト探索軸（k近傍分類器）
pub fn default_classifier_axes() -> Vec<ParameterAxis> {
    vec![
        ParameterAxis::integer("knn_neighbors", 1, 25, ParamRole::Classifier),
        ParameterAxis::continuous("knn_distance_power", 0.0, 2.0, ParamRole::Classifier),
    ]
}

/// 密度モデル側のデフォルト探索軸
pub fn default_density_axes() -> Vec<ParameterAxis> {
    vec![
        ParameterAxis::integer("density_n_components", 2, 20, ParamRole::Density),
        ParameterAxis::integer("density_covariance_kind", 0, 3, ParamRole::Density),
        ParameterAxis::continuous("density_anomaly_threshold", 0.01, 0.2, ParamRole::Density),
        ParameterAxis::continuous("density_adaptation_rate", 0.01, 0.5, ParamRole::Density),
        ParameterAxis::integer("density_window_size", 100, 2000, ParamRole::Density),
    ]
}
