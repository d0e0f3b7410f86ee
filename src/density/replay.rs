//! Replay Buffer
//!
//! 直近にスコアリングしたサンプルの有界履歴。容量 `2 × window` を超えたら
//! 直近 `window` 件まで古い順に切り詰める。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// バッファのエントリ
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayEntry {
    /// 特徴量ベクトル（前処理前、モデル入力の列順）
    pub features: Vec<f64>,
    /// 異常スコア
    pub score: f64,
    /// 異常と判定されたか
    pub is_anomaly: bool,
    /// 記録時刻
    pub timestamp: DateTime<Utc>,
}

/// リプレイバッファ
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayBuffer {
    entries: VecDeque<ReplayEntry>,
    window_size: usize,
}

impl ReplayBuffer {
    /// 新しいバッファを作成
    pub fn new(window_size: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(window_size.saturating_mul(2)),
            window_size: window_size.max(1),
        }
    }

    /// エントリを追加し、必要なら切り詰める
    pub fn push(&mut self, entry: ReplayEntry) {
        self.entries.push_back(entry);
        if self.entries.len() > self.capacity() {
            let excess = self.entries.len() - self.window_size;
            self.entries.drain(..excess);
        }
    }

    /// ウィンドウサイズ
    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// 最大保持数
    pub fn capacity(&self) -> usize {
        self.window_size * 2
    }

    /// 件数
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// 空か
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// ウィンドウ分たまったか
    pub fn is_window_full(&self) -> bool {
        self.entries.len() >= self.window_size
    }

    /// 正常と判定されたエントリ
    pub fn normal_entries(&self) -> impl Iterator<Item = &ReplayEntry> {
        self.entries.iter().filter(|entry| !entry.is_anomaly)
    }

    /// 全エントリ（古い順）
    pub fn iter(&self) -> impl Iterator<Item = &ReplayEntry> {
        self.entries.iter()
    }

    /// 全消去
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(score: f64) -> ReplayEntry {
        ReplayEntry {
            features: vec![score],
            score,
            is_anomaly: score > 5.0,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_trims_to_window_when_over_capacity() {
        let mut buffer = ReplayBuffer::new(3);
        for i in 0..6 {
            buffer.push(entry(i as f64));
        }
        assert_eq!(buffer.len(), 6);

        buffer.push(entry(6.0));
        assert_eq!(buffer.len(), 3);
        let kept: Vec<f64> = buffer.iter().map(|e| e.score).collect();
        assert_eq!(kept, vec![4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_normal_entries() {
        let mut buffer = ReplayBuffer::new(10);
        for i in 0..8 {
            buffer.push(entry(i as f64));
        }
        assert_eq!(buffer.normal_entries().count(), 6);
        assert!(!buffer.is_window_full());
    }
}
