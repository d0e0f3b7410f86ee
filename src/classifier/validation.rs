//! Cross Validation
//!
//! 層化k分割交差検証と、サポートで重み付けした分類指標。

use super::ClassifierFactory;
use crate::error::{Error, Result};
use crate::optimization::space::ParameterSet;
use ndarray::{ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 分類指標（クラスのサポートで重み付け）
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassificationMetrics {
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
}

impl ClassificationMetrics {
    /// 真のラベルと予測から計算
    ///
    /// 予測が1件もないクラスの適合率は0とする。
    pub fn compute(truth: &[usize], predicted: &[usize]) -> Self {
        if truth.is_empty() || truth.len() != predicted.len() {
            return Self::default();
        }

        #[derive(Default)]
        struct Counts {
            support: usize,
            true_positive: usize,
            predicted: usize,
        }

        let mut counts: BTreeMap<usize, Counts> = BTreeMap::new();
        let mut correct = 0usize;
        for (&t, &p) in truth.iter().zip(predicted) {
            counts.entry(t).or_default().support += 1;
            counts.entry(p).or_default().predicted += 1;
            if t == p {
                counts.entry(t).or_default().true_positive += 1;
                correct += 1;
            }
        }

        let total = truth.len() as f64;
        let mut metrics = Self {
            accuracy: correct as f64 / total,
            ..Self::default()
        };
        for c in counts.values().filter(|c| c.support > 0) {
            let weight = c.support as f64 / total;
            let precision = if c.predicted > 0 {
                c.true_positive as f64 / c.predicted as f64
            } else {
                0.0
            };
            let recall = c.true_positive as f64 / c.support as f64;
            let f1 = if precision + recall > 0.0 {
                2.0 * precision * recall / (precision + recall)
            } else {
                0.0
            };
            metrics.precision += weight * precision;
            metrics.recall += weight * recall;
            metrics.f1_score += weight * f1;
        }
        metrics
    }

    fn mean(all: &[Self]) -> Self {
        if all.is_empty() {
            return Self::default();
        }
        let n = all.len() as f64;
        Self {
            accuracy: all.iter().map(|m| m.accuracy).sum::<f64>() / n,
            precision: all.iter().map(|m| m.precision).sum::<f64>() / n,
            recall: all.iter().map(|m| m.recall).sum::<f64>() / n,
            f1_score: all.iter().map(|m| m.f1_score).sum::<f64>() / n,
        }
    }
}

/// 層化k分割（各クラスのサンプルを出現順に巡回で割り当てる）
///
/// 戻り値は分割ごとのテスト用インデックス。
pub fn stratified_folds(labels: &[usize], folds: usize) -> Result<Vec<Vec<usize>>> {
    if folds < 2 {
        return Err(Error::InvalidConfiguration(format!(
            "cross validation needs at least 2 folds, got {}",
            folds
        )));
    }
    if labels.len() < folds {
        return Err(Error::InsufficientSamples {
            required: folds,
            actual: labels.len(),
        });
    }

    let mut by_class: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (i, &label) in labels.iter().enumerate() {
        by_class.entry(label).or_default().push(i);
    }

    let mut assignment = vec![Vec::new(); folds];
    let mut next = 0usize;
    for indices in by_class.values() {
        for &i in indices {
            assignment[next % folds].push(i);
            next += 1;
        }
    }
    for fold in &mut assignment {
        fold.sort_unstable();
    }
    Ok(assignment)
}

/// 指定パラメータの分類器をk分割交差検証し、平均指標を返す
pub fn cross_validate(
    factory: &ClassifierFactory,
    params: &ParameterSet,
    features: ArrayView2<f64>,
    labels: &[usize],
    folds: usize,
) -> Result<ClassificationMetrics> {
    if features.nrows() != labels.len() {
        return Err(Error::DimensionMismatch {
            expected: features.nrows(),
            actual: labels.len(),
        });
    }

    let test_folds = stratified_folds(labels, folds)?;
    let mut results = Vec::with_capacity(folds);

    for test in &test_folds {
        let mut is_test = vec![false; labels.len()];
        for &i in test {
            is_test[i] = true;
        }
        let train: Vec<usize> = (0..labels.len()).filter(|&i| !is_test[i]).collect();

        let train_labels: Vec<usize> = train.iter().map(|&i| labels[i]).collect();
        let test_labels: Vec<usize> = test.iter().map(|&i| labels[i]).collect();

        let mut classifier = factory();
        classifier.set_params(params)?;
        classifier.fit(features.select(Axis(0), &train).view(), &train_labels)?;
        let predicted = classifier.predict(features.select(Axis(0), test).view())?;

        results.push(ClassificationMetrics::compute(&test_labels, &predicted));
    }

    Ok(ClassificationMetrics::mean(&results))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::knn_factory;
    use ndarray::Array2;

    #[test]
    fn test_weighted_metrics() {
        let truth = [0, 0, 0, 1];
        let predicted = [0, 0, 1, 1];
        let m = ClassificationMetrics::compute(&truth, &predicted);
        assert!((m.accuracy - 0.75).abs() < 1e-12);
        // class0: p=1, r=2/3; class1: p=0.5, r=1
        assert!((m.precision - (0.75 * 1.0 + 0.25 * 0.5)).abs() < 1e-12);
        assert!((m.recall - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_zero_division_is_zero() {
        let m = ClassificationMetrics::compute(&[0, 1], &[0, 0]);
        assert!((m.precision - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_stratified_folds_cover_everything_once() {
        let labels = [0, 1, 0, 1, 0, 1, 0, 1, 1, 1];
        let folds = stratified_folds(&labels, 3).unwrap();
        let mut all: Vec<usize> = folds.concat();
        all.sort_unstable();
        assert_eq!(all, (0..10).collect::<Vec<_>>());
        assert!(folds.iter().all(|f| !f.is_empty()));

        assert!(stratified_folds(&labels, 1).is_err());
        assert!(stratified_folds(&labels[..2], 3).is_err());
    }

    #[test]
    fn test_cross_validate_separable_data() {
        let features = Array2::from_shape_fn((40, 2), |(i, j)| {
            let base = if i % 2 == 0 { 0.0 } else { 10.0 };
            base + (i * (j + 1)) as f64 * 0.01
        });
        let labels: Vec<usize> = (0..40).map(|i| i % 2).collect();

        let metrics =
            cross_validate(&knn_factory(), &ParameterSet::new(), features.view(), &labels, 5)
                .unwrap();
        assert_eq!(metrics.accuracy, 1.0);
        assert_eq!(metrics.f1_score, 1.0);
    }
}
