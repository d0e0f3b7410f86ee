//! Dense Linear Algebra
//!
//! ndarray の行列を nalgebra に渡し、Cholesky分解と対称固有値分解を行う。
//! 混合モデルの共分散因子と PCA が使う。

use crate::error::{Error, Result};
use nalgebra::linalg::{Cholesky, SymmetricEigen};
use nalgebra::{DMatrix, DVector};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};

fn ensure_square_finite(matrix: ArrayView2<f64>) -> Result<usize> {
    let n = matrix.nrows();
    if matrix.ncols() != n {
        return Err(Error::DimensionMismatch {
            expected: n,
            actual: matrix.ncols(),
        });
    }
    if matrix.iter().any(|x| !x.is_finite()) {
        return Err(Error::Numerical("matrix has non-finite entries".to_string()));
    }
    Ok(n)
}

/// ndarray → nalgebra
pub fn to_dmatrix(matrix: ArrayView2<f64>) -> DMatrix<f64> {
    DMatrix::from_fn(matrix.nrows(), matrix.ncols(), |i, j| matrix[[i, j]])
}

/// nalgebra → ndarray
pub fn to_array2(matrix: &DMatrix<f64>) -> Array2<f64> {
    Array2::from_shape_fn((matrix.nrows(), matrix.ncols()), |(i, j)| matrix[(i, j)])
}

/// 正定値行列の Cholesky 因子 `A = L·Lᵀ`
#[derive(Debug, Clone)]
pub struct CholeskyFactor {
    lower: DMatrix<f64>,
    log_det: f64,
}

impl CholeskyFactor {
    /// 分解（正定値でなければ `Error::Numerical`）
    pub fn new(matrix: ArrayView2<f64>) -> Result<Self> {
        ensure_square_finite(matrix)?;
        let lower = Cholesky::new(to_dmatrix(matrix))
            .ok_or_else(|| Error::Numerical("matrix is not positive definite".to_string()))?
            .unpack();
        let log_det = 2.0 * lower.diagonal().iter().map(|d| d.ln()).sum::<f64>();
        Ok(Self { lower, log_det })
    }

    /// `log|A|`
    pub fn log_det(&self) -> f64 {
        self.log_det
    }

    /// `xᵀ·A⁻¹·x`（前進代入で `L·y = x` を解く）
    pub fn mahalanobis(&self, diff: ArrayView1<f64>) -> f64 {
        let rhs = DVector::from_iterator(diff.len(), diff.iter().copied());
        self.lower
            .solve_lower_triangular(&rhs)
            .map_or(f64::INFINITY, |y| y.norm_squared())
    }

    /// 標準正規ベクトル `z` を `L·z` に変換
    pub fn colour(&self, z: ArrayView1<f64>) -> Array1<f64> {
        let z = DVector::from_iterator(z.len(), z.iter().copied());
        Array1::from_iter((&self.lower * z).iter().copied())
    }

    /// 下三角因子
    pub fn lower(&self) -> Array2<f64> {
        to_array2(&self.lower)
    }
}

/// 対称行列の固有値分解
///
/// 固有値の降順に並べた `(固有値, 固有ベクトル列)` を返す。
pub fn symmetric_eigen(matrix: ArrayView2<f64>) -> Result<(Array1<f64>, Array2<f64>)> {
    let n = ensure_square_finite(matrix)?;

    // 反復上限0 = 収束するまで
    let eigen = SymmetricEigen::try_new(to_dmatrix(matrix), f64::EPSILON, 0).ok_or_else(|| {
        Error::Numerical("symmetric eigen decomposition did not converge".to_string())
    })?;

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&i, &j| eigen.eigenvalues[j].total_cmp(&eigen.eigenvalues[i]));

    let values = Array1::from_iter(order.iter().map(|&i| eigen.eigenvalues[i]));
    let vectors = Array2::from_shape_fn((n, n), |(row, col)| eigen.eigenvectors[(row, order[col])]);
    Ok((values, vectors))
}

/// 数値的に安定な log-sum-exp
pub fn logsumexp(values: ArrayView1<f64>) -> f64 {
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return max;
    }
    max + values.iter().map(|v| (v - max).exp()).sum::<f64>().ln()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_cholesky_reconstructs() {
        let a = array![[4.0, 2.0, 0.4], [2.0, 5.0, 1.0], [0.4, 1.0, 3.0]];
        let factor = CholeskyFactor::new(a.view()).unwrap();
        let l = factor.lower();
        let reconstructed = l.dot(&l.t());
        for (x, y) in reconstructed.iter().zip(a.iter()) {
            assert!((x - y).abs() < 1e-10);
        }
        assert_eq!(l[[0, 1]], 0.0);
    }

    #[test]
    fn test_cholesky_rejects_indefinite() {
        let a = array![[1.0, 2.0], [2.0, 1.0]];
        assert!(matches!(CholeskyFactor::new(a.view()), Err(Error::Numerical(_))));

        let nan = array![[f64::NAN, 0.0], [0.0, 1.0]];
        assert!(matches!(CholeskyFactor::new(nan.view()), Err(Error::Numerical(_))));
    }

    #[test]
    fn test_mahalanobis_and_log_det() {
        let a = array![[4.0, 0.0], [0.0, 9.0]];
        let factor = CholeskyFactor::new(a.view()).unwrap();
        assert!((factor.log_det() - 36f64.ln()).abs() < 1e-12);
        let m = factor.mahalanobis(array![2.0, 3.0].view());
        assert!((m - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_symmetric_eigen_sorted_descending() {
        let a = array![[2.0, 1.0], [1.0, 2.0]];
        let (values, vectors) = symmetric_eigen(a.view()).unwrap();
        assert!((values[0] - 3.0).abs() < 1e-9);
        assert!((values[1] - 1.0).abs() < 1e-9);

        let v0 = vectors.column(0);
        let av = a.dot(&v0);
        for (x, y) in av.iter().zip(v0.iter()) {
            assert!((x - 3.0 * y).abs() < 1e-9);
        }
    }

    #[test]
    fn test_logsumexp() {
        let v = array![1000.0, 1000.0];
        assert!((logsumexp(v.view()) - (1000.0 + 2f64.ln())).abs() < 1e-9);
        let empty = array![f64::NEG_INFINITY, f64::NEG_INFINITY];
        assert_eq!(logsumexp(empty.view()), f64::NEG_INFINITY);
    }
}
