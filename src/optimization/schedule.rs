//! Adaptive Parameter Schedule
//!
//! 進捗に応じて認識確率と飛行距離を線形減衰させる。序盤は探索、終盤は活用を優先。

use serde::{Deserialize, Serialize};

/// 認識確率の下限
pub const MIN_AWARENESS_PROBABILITY: f64 = 0.05;
/// 飛行距離の下限
pub const MIN_FLIGHT_LENGTH: f64 = 1.0;

/// 移動パラメータ
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MovementParams {
    /// 認識確率
    pub awareness_probability: f64,
    /// 飛行距離
    pub flight_length: f64,
}

/// 適応スケジュール
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdaptiveSchedule {
    initial: MovementParams,
    max_iterations: usize,
}

impl AdaptiveSchedule {
    /// 初期値と総反復数から作成
    pub fn new(initial: MovementParams, max_iterations: usize) -> Self {
        Self {
            initial,
            max_iterations,
        }
    }

    /// 反復 `iteration`（0始まり）時点のパラメータ
    ///
    /// `awareness = a₀·(1 − 0.5p)` (≥ 0.05)、`flight = f₀·(1 − 0.3p)` (≥ 1.0)、
    /// `p = iteration / max_iterations`。
    pub fn at(&self, iteration: usize) -> MovementParams {
        let progress = if self.max_iterations == 0 {
            0.0
        } else {
            iteration as f64 / self.max_iterations as f64
        };

        MovementParams {
            awareness_probability: (self.initial.awareness_probability * (1.0 - 0.5 * progress))
                .max(MIN_AWARENESS_PROBABILITY),
            flight_length: (self.initial.flight_length * (1.0 - 0.3 * progress))
                .max(MIN_FLIGHT_LENGTH),
        }
    }
}
