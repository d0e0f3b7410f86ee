//! k-Nearest Neighbour Classifier
//!
//! 距離の `p` 乗の逆数で重み付けした多数決。

use super::Classifier;
use crate::error::{Error, Result};
use crate::optimization::space::ParameterSet;
use ndarray::{Array2, ArrayView1, ArrayView2};
use std::collections::BTreeMap;

/// k近傍分類器
#[derive(Debug, Clone)]
pub struct KNearestClassifier {
    neighbors: usize,
    distance_power: f64,
    features: Option<Array2<f64>>,
    labels: Vec<usize>,
}

impl Default for KNearestClassifier {
    fn default() -> Self {
        Self::new(5, 1.0)
    }
}

impl KNearestClassifier {
    /// 近傍数と距離の重み指数を指定して作成
    pub fn new(neighbors: usize, distance_power: f64) -> Self {
        Self {
            neighbors,
            distance_power,
            features: None,
            labels: Vec::new(),
        }
    }

    /// 近傍数
    pub fn neighbors(&self) -> usize {
        self.neighbors
    }

    /// 距離の重み指数
    pub fn distance_power(&self) -> f64 {
        self.distance_power
    }

    fn vote(&self, train: &Array2<f64>, row: ArrayView1<f64>) -> usize {
        let mut distances: Vec<(f64, usize)> = train
            .outer_iter()
            .zip(&self.labels)
            .map(|(sample, &label)| {
                let d = sample
                    .iter()
                    .zip(row.iter())
                    .map(|(a, b)| (a - b).powi(2))
                    .sum::<f64>()
                    .sqrt();
                (d, label)
            })
            .collect();
        distances.sort_by(|a, b| a.0.total_cmp(&b.0));
        let nearest = &distances[..self.neighbors.min(distances.len())];

        let mut votes: BTreeMap<usize, f64> = BTreeMap::new();
        if nearest.iter().any(|(d, _)| *d == 0.0) {
            // 完全一致があればそれだけで決める
            for (_, label) in nearest.iter().filter(|(d, _)| *d == 0.0) {
                *votes.entry(*label).or_insert(0.0) += 1.0;
            }
        } else {
            for (d, label) in nearest {
                *votes.entry(*label).or_insert(0.0) += 1.0 / d.powf(self.distance_power);
            }
        }

        votes
            .into_iter()
            .fold((0usize, f64::NEG_INFINITY), |best, (label, weight)| {
                if weight > best.1 {
                    (label, weight)
                } else {
                    best
                }
            })
            .0
    }
}

impl Classifier for KNearestClassifier {
    fn set_params(&mut self, params: &ParameterSet) -> Result<()> {
        for (name, value) in params {
            match name.as_str() {
                "knn_neighbors" => {
                    let neighbors = value.as_usize();
                    if neighbors == 0 {
                        return Err(Error::InvalidParams(
                            "knn_neighbors must be at least 1".to_string(),
                        ));
                    }
                    self.neighbors = neighbors;
                }
                "knn_distance_power" => {
                    let power = value.as_f64();
                    if !power.is_finite() || power < 0.0 {
                        return Err(Error::InvalidParams(format!(
                            "knn_distance_power must be finite and non-negative, got {}",
                            power
                        )));
                    }
                    self.distance_power = power;
                }
                other => {
                    return Err(Error::InvalidParams(format!(
                        "unknown classifier parameter '{}'",
                        other
                    )))
                }
            }
        }
        Ok(())
    }

    fn fit(&mut self, features: ArrayView2<f64>, labels: &[usize]) -> Result<()> {
        if features.nrows() != labels.len() {
            return Err(Error::DimensionMismatch {
                expected: features.nrows(),
                actual: labels.len(),
            });
        }
        if labels.is_empty() {
            return Err(Error::InsufficientSamples {
                required: 1,
                actual: 0,
            });
        }
        self.features = Some(features.to_owned());
        self.labels = labels.to_vec();
        Ok(())
    }

    fn predict(&self, features: ArrayView2<f64>) -> Result<Vec<usize>> {
        let train = self
            .features
            .as_ref()
            .ok_or_else(|| Error::NotFitted("k-nearest classifier".to_string()))?;
        if features.ncols() != train.ncols() {
            return Err(Error::DimensionMismatch {
                expected: train.ncols(),
                actual: features.ncols(),
            });
        }
        Ok(features
            .outer_iter()
            .map(|row| self.vote(train, row))
            .collect())
    }
}
