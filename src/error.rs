//! Error types for the tuner and the density model.

use thiserror::Error;

/// Result type alias for tuner operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for tuner operations
///
/// 探索ループに入る前の致命的エラー（境界・設定・データ不足）と、
/// 密度モデルの状態エラーを表します。候補ごとの評価失敗はここには含まれず、
/// [`crate::optimization::EvaluationOutcome::Failed`] として吸収されます。
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed parameter bounds
    #[error("Invalid bounds: {0}")]
    InvalidBounds(String),

    /// Invalid configuration error
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Too few samples to fit or optimize against
    #[error("Insufficient samples: need at least {required}, got {actual}")]
    InsufficientSamples { required: usize, actual: usize },

    /// Model used before `fit`
    #[error("Model not fitted: {0}")]
    NotFitted(String),

    /// Input width does not match the fitted width
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Numerical failure (non positive-definite matrix, degenerate data)
    #[error("Numerical error: {0}")]
    Numerical(String),

    /// Invalid parameters handed to a collaborator
    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    /// Evaluation error
    #[error("Evaluation error: {0}")]
    Evaluation(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration loading error
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

impl Error {
    /// ループ開始前に発生する致命的エラーかどうか
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::InvalidBounds(_)
                | Error::InvalidConfiguration(_)
                | Error::InsufficientSamples { .. }
        )
    }
}
