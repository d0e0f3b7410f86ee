//! # nids-tuner
//!
//! ネットワーク侵入検知向けの分類器チューニングと密度ベース異常検知。
//!
//! - [`optimization`]: カラス探索（CSA）による多目的ハイパーパラメータ探索
//! - [`density`]: ガウス混合モデルによるオンライン適応型の異常スコアリング
//! - [`classifier`]: 探索対象となる分類器の契約と交差検証
//!
//! ```no_run
//! use nids_tuner::classifier::knn_factory;
//! use nids_tuner::dataset::Dataset;
//! use nids_tuner::optimization::space::default_classifier_axes;
//! use nids_tuner::optimization::{
//!     ClassifierObjectiveEvaluator, MultiObjectiveSearchEngine, SearchConfig,
//! };
//! use std::sync::Arc;
//!
//! # async fn run() -> nids_tuner::Result<()> {
//! let data = Arc::new(Dataset::from_json_file("traffic.json")?);
//! // 分類器の軸だけを探索する（密度軸も含めるなら HybridEvaluator を使う）
//! let config = SearchConfig {
//!     bounds: default_classifier_axes(),
//!     ..Default::default()
//! };
//! let evaluator = ClassifierObjectiveEvaluator::new(knn_factory(), data, config.cv_folds, config.min_samples);
//! let engine = MultiObjectiveSearchEngine::new(config)?;
//! let result = engine.optimize(Arc::new(evaluator)).await?;
//! println!("best fitness: {}", result.best_fitness);
//! # Ok(())
//! # }
//! ```

pub mod classifier;
pub mod config;
pub mod dataset;
pub mod density;
pub mod error;
pub mod logging;
pub mod optimization;

pub use config::TunerConfig;
pub use dataset::Dataset;
pub use density::{DensityAnomalyModel, DensityConfig};
pub use error::{Error, Result};
pub use optimization::{MultiObjectiveSearchEngine, OptimizationResult, SearchConfig};
