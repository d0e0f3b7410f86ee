//! Feature Matrices
//!
//! 名前付き特徴量行列と任意のクラスラベル。JSON ファイル
//! `{ "feature_names": [..], "rows": [[..]], "labels": [..] }` から読み込める。

use crate::error::{Error, Result};
use ndarray::{Array2, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// 特徴量行列
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    feature_names: Vec<String>,
    features: Array2<f64>,
    labels: Option<Vec<usize>>,
}

/// JSON 表現
#[derive(Debug, Serialize, Deserialize)]
struct RawDataset {
    feature_names: Vec<String>,
    rows: Vec<Vec<f64>>,
    #[serde(default)]
    labels: Option<Vec<usize>>,
}

impl Dataset {
    /// 新しいデータセットを作成
    pub fn new(
        feature_names: Vec<String>,
        features: Array2<f64>,
        labels: Option<Vec<usize>>,
    ) -> Result<Self> {
        if feature_names.len() != features.ncols() {
            return Err(Error::DimensionMismatch {
                expected: feature_names.len(),
                actual: features.ncols(),
            });
        }
        if let Some(labels) = &labels {
            if labels.len() != features.nrows() {
                return Err(Error::DimensionMismatch {
                    expected: features.nrows(),
                    actual: labels.len(),
                });
            }
        }
        Ok(Self {
            feature_names,
            features,
            labels,
        })
    }

    /// 名前を `f0, f1, ..` として作成
    pub fn unnamed(features: Array2<f64>, labels: Option<Vec<usize>>) -> Result<Self> {
        let names = (0..features.ncols()).map(|i| format!("f{}", i)).collect();
        Self::new(names, features, labels)
    }

    /// JSON 文字列から読み込む
    pub fn from_json(json: &str) -> Result<Self> {
        let raw: RawDataset = serde_json::from_str(json)?;
        let width = raw.feature_names.len();
        if let Some(row) = raw.rows.iter().find(|row| row.len() != width) {
            return Err(Error::DimensionMismatch {
                expected: width,
                actual: row.len(),
            });
        }

        let n_rows = raw.rows.len();
        let flat: Vec<f64> = raw.rows.into_iter().flatten().collect();
        let features = Array2::from_shape_vec((n_rows, width), flat)
            .map_err(|e| Error::InvalidParams(format!("malformed feature rows: {}", e)))?;
        Self::new(raw.feature_names, features, raw.labels)
    }

    /// JSON ファイルから読み込む
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// JSON 文字列に変換
    pub fn to_json(&self) -> Result<String> {
        let raw = RawDataset {
            feature_names: self.feature_names.clone(),
            rows: self.features.outer_iter().map(|row| row.to_vec()).collect(),
            labels: self.labels.clone(),
        };
        Ok(serde_json::to_string(&raw)?)
    }

    /// 特徴量名
    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    /// 特徴量行列
    pub fn features(&self) -> ArrayView2<'_, f64> {
        self.features.view()
    }

    /// ラベル
    pub fn labels(&self) -> Option<&[usize]> {
        self.labels.as_deref()
    }

    /// 行数
    pub fn n_samples(&self) -> usize {
        self.features.nrows()
    }

    /// 最大 `cap` 行を非復元抽出（行数が `cap` 以下ならそのまま）
    ///
    /// 抽出した行は元の順序を保つ。
    pub fn subsample(&self, cap: usize, seed: u64) -> Dataset {
        if self.n_samples() <= cap {
            return self.clone();
        }

        let mut rng = StdRng::seed_from_u64(seed);
        let mut indices = rand::seq::index::sample(&mut rng, self.n_samples(), cap).into_vec();
        indices.sort_unstable();

        Dataset {
            feature_names: self.feature_names.clone(),
            features: self.features.select(Axis(0), &indices),
            labels: self
                .labels
                .as_ref()
                .map(|labels| indices.iter().map(|&i| labels[i]).collect()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_json() {
        let json = r#"{"feature_names": ["bytes", "packets"], "rows": [[1.0, 2.0], [3.0, 4.0]], "labels": [0, 1]}"#;
        let dataset = Dataset::from_json(json).unwrap();
        assert_eq!(dataset.n_samples(), 2);
        assert_eq!(dataset.features()[[1, 0]], 3.0);
        assert_eq!(dataset.labels(), Some(&[0, 1][..]));

        let reparsed = Dataset::from_json(&dataset.to_json().unwrap()).unwrap();
        assert_eq!(reparsed, dataset);
    }

    #[test]
    fn test_ragged_rows_rejected() {
        let json = r#"{"feature_names": ["a", "b"], "rows": [[1.0, 2.0], [3.0]]}"#;
        assert!(matches!(
            Dataset::from_json(json),
            Err(Error::DimensionMismatch { expected: 2, actual: 1 })
        ));
    }

    #[test]
    fn test_subsample_is_deterministic() {
        let features = Array2::from_shape_fn((100, 1), |(i, _)| i as f64);
        let labels = Some((0..100).map(|i| i % 3).collect());
        let dataset = Dataset::unnamed(features, labels).unwrap();

        let a = dataset.subsample(10, 42);
        let b = dataset.subsample(10, 42);
        assert_eq!(a, b);
        assert_eq!(a.n_samples(), 10);
        for (row, label) in a.features().outer_iter().zip(a.labels().unwrap()) {
            assert_eq!(row[0] as usize % 3, *label);
        }
        assert_eq!(dataset.subsample(500, 1).n_samples(), 100);
    }
}
