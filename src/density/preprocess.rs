//! Feature Preprocessing
//!
//! 非有限値の置換、標準化、分散保持PCA。

use super::linalg::symmetric_eigen;
use crate::error::{Error, Result};
use ndarray::{Array1, Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

/// ±∞ の置換値
pub const LARGE_FINITE: f64 = 1e6;

/// NaN を 0、±∞ を ±1e6 に置き換える
pub fn clean_non_finite(data: ArrayView2<f64>) -> Array2<f64> {
    data.mapv(|v| {
        if v.is_nan() {
            0.0
        } else if v == f64::INFINITY {
            LARGE_FINITE
        } else if v == f64::NEG_INFINITY {
            -LARGE_FINITE
        } else {
            v
        }
    })
}

/// 標準化（平均0・分散1）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    mean: Array1<f64>,
    scale: Array1<f64>,
}

impl StandardScaler {
    /// 列ごとの平均と母標準偏差を学習（分散0の列はスケール1）
    pub fn fit(data: ArrayView2<f64>) -> Result<Self> {
        let mean = data.mean_axis(Axis(0)).ok_or(Error::InsufficientSamples {
            required: 1,
            actual: 0,
        })?;
        let scale = data
            .std_axis(Axis(0), 0.0)
            .mapv(|s| if s > 0.0 && s.is_finite() { s } else { 1.0 });
        Ok(Self { mean, scale })
    }

    /// 変換
    pub fn transform(&self, data: ArrayView2<f64>) -> Result<Array2<f64>> {
        if data.ncols() != self.mean.len() {
            return Err(Error::DimensionMismatch {
                expected: self.mean.len(),
                actual: data.ncols(),
            });
        }
        Ok((&data - &self.mean) / &self.scale)
    }

    /// 入力次元
    pub fn n_features(&self) -> usize {
        self.mean.len()
    }
}

/// 分散保持主成分分析
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pca {
    mean: Array1<f64>,
    /// 主成分（行 = 成分、列 = 入力特徴量）
    components: Array2<f64>,
    explained_variance_ratio: Array1<f64>,
}

impl Pca {
    /// 累積寄与率が `variance_retained` を超える最小の成分数で学習
    pub fn fit(data: ArrayView2<f64>, variance_retained: f64) -> Result<Self> {
        let (n_samples, n_features) = data.dim();
        if n_samples < 2 {
            return Err(Error::InsufficientSamples {
                required: 2,
                actual: n_samples,
            });
        }

        let mean = data.mean_axis(Axis(0)).ok_or(Error::InsufficientSamples {
            required: 2,
            actual: n_samples,
        })?;
        let centered = &data - &mean;
        let covariance = centered.t().dot(&centered) / (n_samples - 1) as f64;

        let (eigenvalues, eigenvectors) = symmetric_eigen(covariance.view())?;
        let eigenvalues = eigenvalues.mapv(|v| v.max(0.0));
        let total: f64 = eigenvalues.sum();

        let n_components = if total > 0.0 {
            let mut cumulative = 0.0;
            let mut keep = n_features;
            for (i, value) in eigenvalues.iter().enumerate() {
                cumulative += value / total;
                if cumulative > variance_retained {
                    keep = i + 1;
                    break;
                }
            }
            keep.clamp(1, n_features)
        } else {
            1
        };

        let components = eigenvectors
            .slice(ndarray::s![.., ..n_components])
            .t()
            .to_owned();
        let explained_variance_ratio = if total > 0.0 {
            eigenvalues.slice(ndarray::s![..n_components]).mapv(|v| v / total)
        } else {
            Array1::zeros(n_components)
        };

        Ok(Self {
            mean,
            components,
            explained_variance_ratio,
        })
    }

    /// 主成分空間へ射影
    pub fn transform(&self, data: ArrayView2<f64>) -> Result<Array2<f64>> {
        if data.ncols() != self.mean.len() {
            return Err(Error::DimensionMismatch {
                expected: self.mean.len(),
                actual: data.ncols(),
            });
        }
        Ok((&data - &self.mean).dot(&self.components.t()))
    }

    /// 主成分行列
    pub fn components(&self) -> &Array2<f64> {
        &self.components
    }

    /// 保持した成分数
    pub fn n_components(&self) -> usize {
        self.components.nrows()
    }

    /// 各成分の寄与率
    pub fn explained_variance_ratio(&self) -> &Array1<f64> {
        &self.explained_variance_ratio
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_clean_non_finite() {
        let data = array![[f64::NAN, f64::INFINITY, f64::NEG_INFINITY, 2.0]];
        let cleaned = clean_non_finite(data.view());
        assert_eq!(cleaned, array![[0.0, 1e6, -1e6, 2.0]]);
    }

    #[test]
    fn test_scaler_constant_column() {
        let data = array![[1.0, 5.0], [3.0, 5.0]];
        let scaler = StandardScaler::fit(data.view()).unwrap();
        let scaled = scaler.transform(data.view()).unwrap();
        assert_eq!(scaled, array![[-1.0, 0.0], [1.0, 0.0]]);
    }

    #[test]
    fn test_pca_drops_redundant_dimension() {
        // 2列目は1列目の2倍
        let data = array![
            [1.0, 2.0, 0.0],
            [2.0, 4.0, 0.1],
            [3.0, 6.0, -0.1],
            [4.0, 8.0, 0.05],
            [5.0, 10.0, 0.0]
        ];
        let pca = Pca::fit(data.view(), 0.95).unwrap();
        assert_eq!(pca.n_components(), 1);
        assert!(pca.explained_variance_ratio()[0] > 0.95);
        assert_eq!(pca.transform(data.view()).unwrap().ncols(), 1);
    }

    #[test]
    fn test_pca_dimension_check() {
        let data = array![[1.0, 2.0], [2.0, 1.0], [0.0, 0.5]];
        let pca = Pca::fit(data.view(), 0.95).unwrap();
        assert!(pca.transform(array![[1.0]].view()).is_err());
    }
}
