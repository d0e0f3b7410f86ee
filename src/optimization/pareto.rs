//! Pareto Front
//!
//! 相互に非支配な解の有界集合。

use super::objective::{ObjectiveScores, ObjectiveSet};
use super::space::ParameterSet;
use serde::{Deserialize, Serialize};

/// パレート前線のデフォルト容量
pub const DEFAULT_PARETO_CAPACITY: usize = 50;

/// パレート解
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParetoSolution {
    /// デコード済みパラメータ
    pub parameters: ParameterSet,
    /// 目的スコア
    pub objectives: ObjectiveScores,
    /// 集約フィットネス
    pub fitness: f64,
}

/// パレート前線
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParetoFront {
    solutions: Vec<ParetoSolution>,
    capacity: usize,
}

impl ParetoFront {
    /// 指定容量で作成（0は1として扱う）
    pub fn new(capacity: usize) -> Self {
        Self {
            solutions: Vec::new(),
            capacity: capacity.max(1),
        }
    }

    /// 解を挿入
    ///
    /// 既存メンバーに支配される場合は挿入せず `false` を返す。挿入時は新しい解が
    /// 支配するメンバーを除去し、容量超過時はフィットネスの低い順に追い出す。
    pub fn insert(&mut self, solution: ParetoSolution, objectives: &ObjectiveSet) -> bool {
        if self
            .solutions
            .iter()
            .any(|existing| objectives.dominates(&existing.objectives, &solution.objectives))
        {
            return false;
        }

        self.solutions
            .retain(|existing| !objectives.dominates(&solution.objectives, &existing.objectives));
        self.solutions.push(solution);

        if self.solutions.len() > self.capacity {
            self.solutions.sort_by(|a, b| b.fitness.total_cmp(&a.fitness));
            self.solutions.truncate(self.capacity);
        }

        true
    }

    /// 解一覧
    pub fn solutions(&self) -> &[ParetoSolution] {
        &self.solutions
    }

    /// 解の数
    pub fn len(&self) -> usize {
        self.solutions.len()
    }

    /// 空か
    pub fn is_empty(&self) -> bool {
        self.solutions.is_empty()
    }

    /// 容量
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 互いに支配関係のあるペアが存在しないか
    pub fn is_mutually_non_dominated(&self, objectives: &ObjectiveSet) -> bool {
        self.solutions.iter().enumerate().all(|(i, a)| {
            self.solutions
                .iter()
                .enumerate()
                .all(|(j, b)| i == j || !objectives.dominates(&a.objectives, &b.objectives))
        })
    }
}

impl Default for ParetoFront {
    fn default() -> Self {
        Self::new(DEFAULT_PARETO_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimization::objective::Objective;

    fn objectives() -> ObjectiveSet {
        ObjectiveSet::new(vec![
            Objective::maximize("accuracy", 0.5),
            Objective::minimize("latency", 0.5),
        ])
        .unwrap()
    }

    fn solution(accuracy: f64, latency: f64) -> ParetoSolution {
        let objectives: ObjectiveScores = [
            ("accuracy".to_string(), accuracy),
            ("latency".to_string(), latency),
        ]
        .into_iter()
        .collect();
        ParetoSolution {
            parameters: ParameterSet::new(),
            fitness: 0.5 * accuracy + 0.5 * (1.0 - latency),
            objectives,
        }
    }

    #[test]
    fn test_dominated_solution_rejected() {
        let set = objectives();
        let mut front = ParetoFront::default();
        assert!(front.insert(solution(0.9, 0.1), &set));
        assert!(!front.insert(solution(0.8, 0.2), &set));
        assert_eq!(front.len(), 1);
    }

    #[test]
    fn test_dominating_solution_evicts() {
        let set = objectives();
        let mut front = ParetoFront::default();
        front.insert(solution(0.8, 0.5), &set);
        front.insert(solution(0.6, 0.1), &set);
        assert_eq!(front.len(), 2);

        assert!(front.insert(solution(0.9, 0.05), &set));
        assert_eq!(front.len(), 1);
        assert!(front.is_mutually_non_dominated(&set));
    }

    #[test]
    fn test_capacity_keeps_highest_fitness() {
        let set = objectives();
        let mut front = ParetoFront::new(3);
        // 精度と遅延がトレードオフになる非支配解の列
        for i in 0..6 {
            let t = i as f64 / 10.0;
            front.insert(solution(0.5 + t, 0.1 + t * 0.5), &set);
        }
        assert_eq!(front.len(), 3);
        let min_kept = front
            .solutions()
            .iter()
            .map(|s| s.fitness)
            .fold(f64::INFINITY, f64::min);
        assert!(min_kept >= solution(0.5 + 0.3, 0.1 + 0.15).fitness - 1e-12);
        assert!(front.is_mutually_non_dominated(&set));
    }
}
