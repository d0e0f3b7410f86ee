//! Gaussian Mixture Density
//!
//! 密度推定器の契約（[`DensityEstimator`]）と、EMで学習するガウス混合モデル。
//! 適応処理が使うパラメータのブレンドと成分からのサンプリングもここに置く。

use super::linalg::{logsumexp, CholeskyFactor};
use super::CovarianceKind;
use crate::error::{Error, Result};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use tracing::debug;

/// 密度推定器の契約
///
/// `fit` は状態を完全に置き換える。スコアリング系は `&self` で状態を変更しない。
pub trait DensityEstimator: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
    /// 学習
    fn fit(&mut self, data: ArrayView2<f64>) -> Result<()>;

    /// 行ごとの対数密度
    fn score_samples(&self, data: ArrayView2<f64>) -> Result<Array1<f64>>;

    /// 行ごと・成分ごとの所属確率
    fn predict_proba(&self, data: ArrayView2<f64>) -> Result<Array2<f64>>;

    /// 学習済みパラメータ
    fn parameters(&self) -> Option<&MixtureParameters>;

    /// パラメータを差し替え（適応時のブレンド結果）
    fn set_parameters(&mut self, parameters: MixtureParameters) -> Result<()>;
}

/// 共分散パラメータ
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "values", rename_all = "lowercase")]
pub enum Covariances {
    /// 成分ごとの d×d 行列
    Full(Vec<Array2<f64>>),
    /// 共有 d×d 行列
    Tied(Array2<f64>),
    /// 成分ごとの対角（k×d）
    Diag(Array2<f64>),
    /// 成分ごとの分散（k）
    Spherical(Array1<f64>),
}

impl Covariances {
    /// 共分散の形
    pub fn kind(&self) -> CovarianceKind {
        match self {
            Covariances::Full(_) => CovarianceKind::Full,
            Covariances::Tied(_) => CovarianceKind::Tied,
            Covariances::Diag(_) => CovarianceKind::Diag,
            Covariances::Spherical(_) => CovarianceKind::Spherical,
        }
    }
}

/// 成分ごとの密度評価用の因子
enum Factor {
    Cholesky(CholeskyFactor),
    Diagonal { variances: Array1<f64>, log_det: f64 },
}

impl Factor {
    fn log_density(&self, diff: ArrayView1<f64>) -> f64 {
        let d = diff.len() as f64;
        let (mahalanobis, log_det) = match self {
            Factor::Cholesky(factor) => (factor.mahalanobis(diff), factor.log_det()),
            Factor::Diagonal { variances, log_det } => (
                diff.iter()
                    .zip(variances.iter())
                    .map(|(x, v)| x * x / v)
                    .sum::<f64>(),
                *log_det,
            ),
        };
        -0.5 * (d * (2.0 * PI).ln() + log_det + mahalanobis)
    }

    /// 標準正規ベクトルを共分散に従って変換
    fn colour(&self, z: &Array1<f64>) -> Array1<f64> {
        match self {
            Factor::Cholesky(factor) => factor.colour(z.view()),
            Factor::Diagonal { variances, .. } => z * &variances.mapv(f64::sqrt),
        }
    }
}

/// 学習済み混合パラメータ
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MixtureParameters {
    /// 混合重み（k）
    pub weights: Array1<f64>,
    /// 平均（k×d）
    pub means: Array2<f64>,
    /// 共分散
    pub covariances: Covariances,
}

impl MixtureParameters {
    /// 成分数
    pub fn n_components(&self) -> usize {
        self.weights.len()
    }

    /// 次元数
    pub fn n_features(&self) -> usize {
        self.means.ncols()
    }

    fn factors(&self) -> Result<Vec<Factor>> {
        let k = self.n_components();
        let d = self.n_features();
        match &self.covariances {
            Covariances::Full(matrices) => matrices
                .iter()
                .map(|cov| CholeskyFactor::new(cov.view()).map(Factor::Cholesky))
                .collect(),
            Covariances::Tied(cov) => {
                let factor = CholeskyFactor::new(cov.view())?;
                Ok((0..k).map(|_| Factor::Cholesky(factor.clone())).collect())
            }
            Covariances::Diag(variances) => variances
                .outer_iter()
                .map(|row| diagonal_factor(row.to_owned()))
                .collect(),
            Covariances::Spherical(variances) => variances
                .iter()
                .map(|&v| diagonal_factor(Array1::from_elem(d, v)))
                .collect(),
        }
    }

    /// 行 × 成分の重み付き対数確率
    fn weighted_log_prob(&self, data: ArrayView2<f64>) -> Result<Array2<f64>> {
        if data.ncols() != self.n_features() {
            return Err(Error::DimensionMismatch {
                expected: self.n_features(),
                actual: data.ncols(),
            });
        }

        let factors = self.factors()?;
        let mut out = Array2::<f64>::zeros((data.nrows(), self.n_components()));
        for (k, factor) in factors.iter().enumerate() {
            let log_weight = self.weights[k].ln();
            let mean = self.means.row(k);
            for (i, row) in data.outer_iter().enumerate() {
                let diff = &row - &mean;
                out[[i, k]] = log_weight + factor.log_density(diff.view());
            }
        }
        Ok(out)
    }

    /// 行ごとの対数密度
    pub fn score_samples(&self, data: ArrayView2<f64>) -> Result<Array1<f64>> {
        let weighted = self.weighted_log_prob(data)?;
        Ok(Array1::from_iter(
            weighted.outer_iter().map(|row| logsumexp(row)),
        ))
    }

    /// 所属確率
    pub fn predict_proba(&self, data: ArrayView2<f64>) -> Result<Array2<f64>> {
        let mut weighted = self.weighted_log_prob(data)?;
        for mut row in weighted.outer_iter_mut() {
            let norm = logsumexp(row.view());
            row.mapv_inplace(|v| (v - norm).exp());
        }
        Ok(weighted)
    }

    /// `self·(1 − rate) + other·rate` でブレンド
    ///
    /// `other` の成分は平均が最も近いものから貪欲に対応付ける。重みは再正規化する。
    pub fn blend(&self, other: &MixtureParameters, rate: f64) -> Result<MixtureParameters> {
        if self.n_components() != other.n_components() {
            return Err(Error::DimensionMismatch {
                expected: self.n_components(),
                actual: other.n_components(),
            });
        }
        if self.n_features() != other.n_features() {
            return Err(Error::DimensionMismatch {
                expected: self.n_features(),
                actual: other.n_features(),
            });
        }
        let matching = self.match_components(other);
        let mix = |old: f64, new: f64| old * (1.0 - rate) + new * rate;

        let mut weights = Array1::from_iter(
            matching
                .iter()
                .enumerate()
                .map(|(k, &m)| mix(self.weights[k], other.weights[m])),
        );
        let total = weights.sum();
        if total > 0.0 {
            weights /= total;
        }

        let mut means = self.means.clone();
        for (k, &m) in matching.iter().enumerate() {
            let blended = &self.means.row(k) * (1.0 - rate) + &other.means.row(m) * rate;
            means.row_mut(k).assign(&blended);
        }

        let covariances = match (&self.covariances, &other.covariances) {
            (Covariances::Full(old), Covariances::Full(new)) => Covariances::Full(
                matching
                    .iter()
                    .enumerate()
                    .map(|(k, &m)| &old[k] * (1.0 - rate) + &new[m] * rate)
                    .collect(),
            ),
            (Covariances::Tied(old), Covariances::Tied(new)) => {
                Covariances::Tied(old * (1.0 - rate) + new * rate)
            }
            (Covariances::Diag(old), Covariances::Diag(new)) => {
                let mut blended = old.clone();
                for (k, &m) in matching.iter().enumerate() {
                    let row = &old.row(k) * (1.0 - rate) + &new.row(m) * rate;
                    blended.row_mut(k).assign(&row);
                }
                Covariances::Diag(blended)
            }
            (Covariances::Spherical(old), Covariances::Spherical(new)) => {
                Covariances::Spherical(Array1::from_iter(
                    matching
                        .iter()
                        .enumerate()
                        .map(|(k, &m)| mix(old[k], new[m])),
                ))
            }
            (old, new) => {
                return Err(Error::InvalidParams(format!(
                    "cannot blend {} covariances with {}",
                    old.kind(),
                    new.kind()
                )))
            }
        };

        Ok(MixtureParameters {
            weights,
            means,
            covariances,
        })
    }

    /// 各成分に最も近い未使用の `other` 成分を割り当てる
    fn match_components(&self, other: &MixtureParameters) -> Vec<usize> {
        let mut used = vec![false; other.n_components()];
        let mut matching = Vec::with_capacity(self.n_components());

        for mean in self.means.outer_iter() {
            let mut best = None;
            let mut best_distance = f64::INFINITY;
            for (m, candidate) in other.means.outer_iter().enumerate() {
                if used[m] {
                    continue;
                }
                let distance = squared_distance(mean, candidate);
                if best.is_none() || distance < best_distance {
                    best = Some(m);
                    best_distance = distance;
                }
            }
            // 成分数が等しいので必ず見つかる
            let m = best.unwrap_or(0);
            used[m] = true;
            matching.push(m);
        }

        matching
    }

    /// 各成分から `per_component` 点ずつサンプリング
    pub fn sample<R: Rng + ?Sized>(&self, per_component: usize, rng: &mut R) -> Result<Array2<f64>> {
        let factors = self.factors()?;
        let d = self.n_features();
        let mut samples = Array2::<f64>::zeros((per_component * self.n_components(), d));

        let mut row_index = 0;
        for (k, factor) in factors.iter().enumerate() {
            let mean = self.means.row(k);
            for _ in 0..per_component {
                let z = Array1::from_iter((0..d).map(|_| rng.sample::<f64, _>(StandardNormal)));
                let point = &mean + &factor.colour(&z);
                samples.row_mut(row_index).assign(&point);
                row_index += 1;
            }
        }

        Ok(samples)
    }
}

fn diagonal_factor(variances: Array1<f64>) -> Result<Factor> {
    if variances.iter().any(|v| !(*v > 0.0) || !v.is_finite()) {
        return Err(Error::Numerical(
            "diagonal covariance must be strictly positive".to_string(),
        ));
    }
    let log_det = variances.iter().map(|v| v.ln()).sum();
    Ok(Factor::Diagonal { variances, log_det })
}

fn squared_distance(a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum()
}

/// EMで学習するガウス混合モデル
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GaussianMixture {
    n_components: usize,
    covariance_kind: CovarianceKind,
    max_iter: usize,
    tol: f64,
    reg_covar: f64,
    random_state: u64,
    parameters: Option<MixtureParameters>,
    converged: bool,
    n_iter: usize,
}

impl GaussianMixture {
    /// 新しい未学習モデルを作成
    pub fn new(n_components: usize, covariance_kind: CovarianceKind) -> Self {
        Self {
            n_components,
            covariance_kind,
            max_iter: 200,
            tol: 1e-4,
            reg_covar: 1e-6,
            random_state: 42,
            parameters: None,
            converged: false,
            n_iter: 0,
        }
    }

    /// EM設定を指定
    pub fn with_em_settings(mut self, max_iter: usize, tol: f64, reg_covar: f64) -> Self {
        self.max_iter = max_iter;
        self.tol = tol;
        self.reg_covar = reg_covar;
        self
    }

    /// 乱数シードを指定
    pub fn with_random_state(mut self, random_state: u64) -> Self {
        self.random_state = random_state;
        self
    }

    /// 成分数
    pub fn n_components(&self) -> usize {
        self.n_components
    }

    /// 共分散の形
    pub fn covariance_kind(&self) -> CovarianceKind {
        self.covariance_kind
    }

    /// 最後の学習が収束したか
    pub fn converged(&self) -> bool {
        self.converged
    }

    /// 最後の学習のEM反復数
    pub fn n_iter(&self) -> usize {
        self.n_iter
    }

    fn fitted(&self) -> Result<&MixtureParameters> {
        self.parameters
            .as_ref()
            .ok_or_else(|| Error::NotFitted("gaussian mixture".to_string()))
    }

    /// k-means++ で初期中心を選び、Lloyd反復でハード割り当てを得る
    fn initial_responsibilities(&self, data: ArrayView2<f64>) -> Array2<f64> {
        const LLOYD_ITERATIONS: usize = 10;

        let (n, _) = data.dim();
        let k = self.n_components;
        let mut rng = StdRng::seed_from_u64(self.random_state);

        let mut centers: Vec<Array1<f64>> = Vec::with_capacity(k);
        centers.push(data.row(rng.gen_range(0..n)).to_owned());
        while centers.len() < k {
            let distances: Vec<f64> = data
                .outer_iter()
                .map(|row| {
                    centers
                        .iter()
                        .map(|c| squared_distance(row, c.view()))
                        .fold(f64::INFINITY, f64::min)
                })
                .collect();
            let total: f64 = distances.iter().sum();

            let index = if total > 0.0 {
                let target = rng.gen::<f64>() * total;
                let mut cumulative = 0.0;
                distances
                    .iter()
                    .position(|d| {
                        cumulative += d;
                        cumulative >= target
                    })
                    .unwrap_or(n - 1)
            } else {
                rng.gen_range(0..n)
            };
            centers.push(data.row(index).to_owned());
        }

        let mut labels = vec![usize::MAX; n];
        for _ in 0..LLOYD_ITERATIONS {
            let mut changed = false;
            for (i, row) in data.outer_iter().enumerate() {
                let nearest = centers
                    .iter()
                    .enumerate()
                    .map(|(c, center)| (c, squared_distance(row, center.view())))
                    .min_by(|a, b| a.1.total_cmp(&b.1))
                    .map_or(0, |(c, _)| c);
                if labels[i] != nearest {
                    labels[i] = nearest;
                    changed = true;
                }
            }
            if !changed {
                break;
            }

            for (c, center) in centers.iter_mut().enumerate() {
                let members: Vec<usize> = (0..n).filter(|&i| labels[i] == c).collect();
                if members.is_empty() {
                    continue;
                }
                let mut sum = Array1::<f64>::zeros(data.ncols());
                for &i in &members {
                    sum += &data.row(i);
                }
                *center = sum / members.len() as f64;
            }
        }

        let mut resp = Array2::<f64>::zeros((n, k));
        for (i, &label) in labels.iter().enumerate() {
            resp[[i, label.min(k - 1)]] = 1.0;
        }
        resp
    }

    /// Mステップ
    fn maximization(&self, data: ArrayView2<f64>, resp: &Array2<f64>) -> MixtureParameters {
        let (n, d) = data.dim();
        let k = self.n_components;

        let nk = resp.sum_axis(Axis(0)) + 10.0 * f64::EPSILON;
        let mut means = resp.t().dot(&data);
        for (mut row, &count) in means.outer_iter_mut().zip(nk.iter()) {
            row /= count;
        }

        let full_covariance = |c: usize| {
            let mut cov = Array2::<f64>::zeros((d, d));
            let mean = means.row(c);
            for (i, row) in data.outer_iter().enumerate() {
                let diff = &row - &mean;
                let r = resp[[i, c]];
                if r == 0.0 {
                    continue;
                }
                for a in 0..d {
                    for b in 0..d {
                        cov[[a, b]] += r * diff[a] * diff[b];
                    }
                }
            }
            cov
        };

        let diagonal = || {
            let mut variances = Array2::<f64>::zeros((k, d));
            for c in 0..k {
                let mean = means.row(c);
                for (i, row) in data.outer_iter().enumerate() {
                    let r = resp[[i, c]];
                    for j in 0..d {
                        variances[[c, j]] += r * (row[j] - mean[j]).powi(2);
                    }
                }
                for j in 0..d {
                    variances[[c, j]] = variances[[c, j]] / nk[c] + self.reg_covar;
                }
            }
            variances
        };

        let covariances = match self.covariance_kind {
            CovarianceKind::Full => Covariances::Full(
                (0..k)
                    .map(|c| {
                        let mut cov = full_covariance(c) / nk[c];
                        cov.diag_mut().mapv_inplace(|v| v + self.reg_covar);
                        cov
                    })
                    .collect(),
            ),
            CovarianceKind::Tied => {
                let mut cov = Array2::<f64>::zeros((d, d));
                for c in 0..k {
                    cov += &full_covariance(c);
                }
                cov /= n as f64;
                cov.diag_mut().mapv_inplace(|v| v + self.reg_covar);
                Covariances::Tied(cov)
            }
            CovarianceKind::Diag => Covariances::Diag(diagonal()),
            CovarianceKind::Spherical => Covariances::Spherical(
                diagonal()
                    .mean_axis(Axis(1))
                    .unwrap_or_else(|| Array1::from_elem(k, self.reg_covar)),
            ),
        };

        MixtureParameters {
            weights: &nk / n as f64,
            means,
            covariances,
        }
    }
}

impl DensityEstimator for GaussianMixture {
    fn fit(&mut self, data: ArrayView2<f64>) -> Result<()> {
        let (n, d) = data.dim();
        if n < self.n_components.max(2) {
            return Err(Error::InsufficientSamples {
                required: self.n_components.max(2),
                actual: n,
            });
        }
        if d == 0 || self.n_components == 0 {
            return Err(Error::InvalidParams(
                "gaussian mixture needs at least one feature and one component".to_string(),
            ));
        }

        let mut resp = self.initial_responsibilities(data);
        let mut parameters = self.maximization(data, &resp);
        let mut lower_bound = f64::NEG_INFINITY;
        self.converged = false;
        self.n_iter = 0;

        for iteration in 1..=self.max_iter {
            let weighted = parameters.weighted_log_prob(data)?;
            let mut log_norm_sum = 0.0;
            for (mut row, weighted_row) in resp.outer_iter_mut().zip(weighted.outer_iter()) {
                let norm = logsumexp(weighted_row);
                log_norm_sum += norm;
                row.assign(&weighted_row.mapv(|v| (v - norm).exp()));
            }
            let current = log_norm_sum / n as f64;
            if !current.is_finite() {
                return Err(Error::Numerical(
                    "EM produced a non-finite log-likelihood".to_string(),
                ));
            }

            parameters = self.maximization(data, &resp);
            self.n_iter = iteration;

            if (current - lower_bound).abs() < self.tol {
                self.converged = true;
                break;
            }
            lower_bound = current;
        }

        debug!(
            n_components = self.n_components,
            covariance = %self.covariance_kind,
            n_iter = self.n_iter,
            converged = self.converged,
            "Gaussian mixture fitted"
        );

        self.parameters = Some(parameters);
        Ok(())
    }

    fn score_samples(&self, data: ArrayView2<f64>) -> Result<Array1<f64>> {
        self.fitted()?.score_samples(data)
    }

    fn predict_proba(&self, data: ArrayView2<f64>) -> Result<Array2<f64>> {
        self.fitted()?.predict_proba(data)
    }

    fn parameters(&self) -> Option<&MixtureParameters> {
        self.parameters.as_ref()
    }

    fn set_parameters(&mut self, parameters: MixtureParameters) -> Result<()> {
        if parameters.covariances.kind() != self.covariance_kind {
            return Err(Error::InvalidParams(format!(
                "expected {} covariances, got {}",
                self.covariance_kind,
                parameters.covariances.kind()
            )));
        }
        parameters.factors()?;
        self.n_components = parameters.n_components();
        self.parameters = Some(parameters);
        Ok(())
    }
}
