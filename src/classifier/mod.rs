//! Supervised Classifier Contract
//!
//! 探索対象の分類器は `set_params` / `fit` / `predict` だけを通して扱い、内部には立ち入らない。

pub mod knn;
pub mod validation;

pub use knn::KNearestClassifier;
pub use validation::{cross_validate, stratified_folds, ClassificationMetrics};

use crate::error::Result;
use crate::optimization::space::ParameterSet;
use ndarray::ArrayView2;
use std::sync::Arc;

/// 分類器の契約
pub trait Classifier: Send {
    /// ハイパーパラメータを設定（未知のキーはエラー）
    fn set_params(&mut self, params: &ParameterSet) -> Result<()>;

    /// 学習
    fn fit(&mut self, features: ArrayView2<f64>, labels: &[usize]) -> Result<()>;

    /// 予測
    fn predict(&self, features: ArrayView2<f64>) -> Result<Vec<usize>>;
}

/// 新しい分類器インスタンスを作るファクトリ
pub type ClassifierFactory = Arc<dyn Fn() -> Box<dyn Classifier> + Send + Sync>;

/// k近傍分類器のファクトリ
pub fn knn_factory() -> ClassifierFactory {
    Arc::new(|| Box::new(KNearestClassifier::default()) as Box<dyn Classifier>)
}
