//! Crow Search Algorithm (CSA)
//!
//! 単一目的のカラス探索。個体群・個体ごとの記憶（最良位置）・移動規則・境界射影を保持します。
//!
//! ## 移動規則
//!
//! 個体 *i* は別の個体 *j* を一様に選んで追跡します。`r ≥ awareness` なら
//! *j* の記憶位置へ `r_fl · flight_length` の割合だけ近づき、そうでなければ
//! *j* に気付かれたものとして範囲内のランダムな位置へ移ります。

use super::evaluator::EvaluationFailure;
use super::schedule::MovementParams;
use super::space::{ParameterSet, ParameterSpace};
use crate::error::{Error, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// CSAの基本パラメータ
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CrowSearchParams {
    /// 個体数
    pub population_size: usize,
    /// 最大反復数
    pub max_iterations: usize,
    /// 認識確率
    pub awareness_probability: f64,
    /// 飛行距離
    pub flight_length: f64,
}

impl Default for CrowSearchParams {
    fn default() -> Self {
        Self {
            population_size: 20,
            max_iterations: 50,
            awareness_probability: 0.1,
            flight_length: 2.0,
        }
    }
}

impl CrowSearchParams {
    /// パラメータを検証
    pub fn validate(&self) -> Result<()> {
        if self.population_size < 2 {
            return Err(Error::InvalidConfiguration(format!(
                "population_size must be at least 2, got {}",
                self.population_size
            )));
        }
        if !(0.0..=1.0).contains(&self.awareness_probability) {
            return Err(Error::InvalidConfiguration(format!(
                "awareness_probability must be within [0, 1], got {}",
                self.awareness_probability
            )));
        }
        if !self.flight_length.is_finite() || self.flight_length < 0.0 {
            return Err(Error::InvalidConfiguration(format!(
                "flight_length must be finite and non-negative, got {}",
                self.flight_length
            )));
        }
        Ok(())
    }

    /// 初期移動パラメータ
    pub fn movement(&self) -> MovementParams {
        MovementParams {
            awareness_probability: self.awareness_probability,
            flight_length: self.flight_length,
        }
    }
}

/// 個体群
///
/// 位置・現在のフィットネス・記憶位置・記憶フィットネスの平行配列。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Population {
    positions: Vec<Vec<f64>>,
    fitness: Vec<f64>,
    memory: Vec<Vec<f64>>,
    memory_fitness: Vec<f64>,
}

impl Population {
    fn sample(space: &ParameterSpace, size: usize, rng: &mut StdRng) -> Self {
        let positions: Vec<Vec<f64>> = (0..size).map(|_| space.sample(rng)).collect();
        Self {
            memory: positions.clone(),
            positions,
            fitness: vec![f64::NEG_INFINITY; size],
            memory_fitness: vec![f64::NEG_INFINITY; size],
        }
    }

    /// 個体数
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// 空か
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// 現在位置
    pub fn positions(&self) -> &[Vec<f64>] {
        &self.positions
    }

    /// 現在のフィットネス
    pub fn fitness(&self) -> &[f64] {
        &self.fitness
    }

    /// 記憶位置
    pub fn memory(&self) -> &[Vec<f64>] {
        &self.memory
    }

    /// 記憶フィットネス
    pub fn memory_fitness(&self) -> &[f64] {
        &self.memory_fitness
    }

    /// 平均ペアワイズユークリッド距離
    pub fn diversity(&self) -> f64 {
        let n = self.positions.len();
        if n < 2 {
            return 0.0;
        }

        let mut total = 0.0;
        let mut pairs = 0usize;
        for i in 0..n {
            for j in (i + 1)..n {
                total += euclidean_distance(&self.positions[i], &self.positions[j]);
                pairs += 1;
            }
        }
        total / pairs as f64
    }
}

fn euclidean_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f64>()
        .sqrt()
}

/// 全体最良解
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalBest {
    /// 位置
    pub position: Vec<f64>,
    /// デコード済みパラメータ
    pub parameters: ParameterSet,
    /// フィットネス
    pub fitness: f64,
}

/// フィットネス記録の結果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FitnessUpdate {
    /// 個体の記憶が更新された
    pub memory_improved: bool,
    /// 全体最良が更新された
    pub global_improved: bool,
}

/// 単一目的探索の結果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchOutcome {
    /// 最良パラメータ（有効な解がなければ空）
    pub best_parameters: ParameterSet,
    /// 最良フィットネス（有効な解がなければ -∞）
    pub best_fitness: f64,
    /// 反復ごとの最良フィットネス
    pub convergence_history: Vec<f64>,
    /// 完了した反復数
    pub iterations_completed: usize,
}

/// カラス探索の本体
pub struct CrowSearch {
    space: Arc<ParameterSpace>,
    params: CrowSearchParams,
    movement: MovementParams,
    population: Population,
    best: Option<GlobalBest>,
    rng: StdRng,
}

impl CrowSearch {
    /// 個体群を一様乱数で初期化して作成
    pub fn new(space: Arc<ParameterSpace>, params: CrowSearchParams, seed: u64) -> Result<Self> {
        params.validate()?;
        let mut rng = StdRng::seed_from_u64(seed);
        let population = Population::sample(&space, params.population_size, &mut rng);

        debug!(
            population_size = params.population_size,
            dimensions = space.dimensions(),
            "Crow population initialized"
        );

        Ok(Self {
            movement: params.movement(),
            space,
            params,
            population,
            best: None,
            rng,
        })
    }

    /// パラメータ空間
    pub fn space(&self) -> &ParameterSpace {
        &self.space
    }

    /// 基本パラメータ
    pub fn params(&self) -> &CrowSearchParams {
        &self.params
    }

    /// 個体群
    pub fn population(&self) -> &Population {
        &self.population
    }

    /// 全体最良解
    pub fn best(&self) -> Option<&GlobalBest> {
        self.best.as_ref()
    }

    /// 現在の移動パラメータ
    pub fn movement(&self) -> MovementParams {
        self.movement
    }

    /// 移動パラメータを差し替え
    pub fn set_movement(&mut self, movement: MovementParams) {
        self.movement = movement;
    }

    /// 個体 `index` の現在位置をデコード
    pub fn decode(&self, index: usize) -> Result<ParameterSet> {
        let position = self
            .population
            .positions
            .get(index)
            .ok_or_else(|| Error::InvalidParams(format!("no candidate at index {}", index)))?;
        self.space.decode(position)
    }

    /// 全個体の現在位置をデコード
    pub fn decode_all(&self) -> Result<Vec<ParameterSet>> {
        (0..self.population.len()).map(|i| self.decode(i)).collect()
    }

    /// 個体 `index` のフィットネスを記録し、記憶と全体最良を更新
    ///
    /// 非有限のフィットネスは -∞ として扱い、記憶や最良には昇格させない。
    pub fn record_fitness(&mut self, index: usize, fitness: f64) -> Result<FitnessUpdate> {
        if index >= self.population.len() {
            return Err(Error::InvalidParams(format!(
                "no candidate at index {}",
                index
            )));
        }

        let fitness = if fitness.is_nan() || fitness == f64::INFINITY {
            f64::NEG_INFINITY
        } else {
            fitness
        };
        self.population.fitness[index] = fitness;

        let mut update = FitnessUpdate::default();
        if fitness > self.population.memory_fitness[index] {
            self.population.memory[index] = self.population.positions[index].clone();
            self.population.memory_fitness[index] = fitness;
            update.memory_improved = true;
        }

        let best_fitness = self
            .best
            .as_ref()
            .map_or(f64::NEG_INFINITY, |best| best.fitness);
        if fitness > best_fitness {
            let position = self.population.positions[index].clone();
            self.best = Some(GlobalBest {
                parameters: self.space.decode(&position)?,
                position,
                fitness,
            });
            update.global_improved = true;
        }

        Ok(update)
    }

    /// 個体群全体を1ステップ移動
    pub fn step(&mut self) {
        let n = self.population.len();
        let MovementParams {
            awareness_probability,
            flight_length,
        } = self.movement;

        for i in 0..n {
            // i 以外を一様に選ぶ
            let mut j = self.rng.gen_range(0..n - 1);
            if j >= i {
                j += 1;
            }

            let r: f64 = self.rng.gen();
            let mut next = if r >= awareness_probability {
                let r_fl: f64 = self.rng.gen();
                self.population.positions[i]
                    .iter()
                    .zip(&self.population.memory[j])
                    .map(|(x, m)| x + r_fl * flight_length * (m - x))
                    .collect()
            } else {
                self.space.sample(&mut self.rng)
            };

            self.space.project(&mut next);
            self.population.positions[i] = next;
        }
    }

    /// 単一目的で最大化を実行
    ///
    /// 目的関数のエラーは -∞ として扱い、探索は継続する。
    pub fn run<F>(&mut self, mut objective: F) -> Result<SearchOutcome>
    where
        F: FnMut(&ParameterSet) -> std::result::Result<f64, EvaluationFailure>,
    {
        info!(
            population_size = self.params.population_size,
            max_iterations = self.params.max_iterations,
            awareness_probability = self.params.awareness_probability,
            "Starting CSA optimization"
        );

        let mut history = Vec::with_capacity(self.params.max_iterations);
        for iteration in 0..self.params.max_iterations {
            for index in 0..self.population.len() {
                let params = self.decode(index)?;
                let fitness = match objective(&params) {
                    Ok(fitness) => fitness,
                    Err(failure) => {
                        warn!(candidate = index, %failure, "Parameter evaluation failed");
                        f64::NEG_INFINITY
                    }
                };
                self.record_fitness(index, fitness)?;
            }

            self.step();

            let best_fitness = self.best_fitness();
            history.push(best_fitness);

            if (iteration + 1) % 10 == 0 {
                info!(
                    "Iteration {}/{}, best fitness: {:.6}",
                    iteration + 1,
                    self.params.max_iterations,
                    best_fitness
                );
            }
        }

        match &self.best {
            Some(best) => info!(best_fitness = best.fitness, "CSA optimization completed"),
            None => warn!("CSA optimization found no valid solutions"),
        }

        Ok(SearchOutcome {
            best_parameters: self
                .best
                .as_ref()
                .map(|best| best.parameters.clone())
                .unwrap_or_default(),
            best_fitness: self.best_fitness(),
            iterations_completed: history.len(),
            convergence_history: history,
        })
    }

    /// 現在の最良フィットネス（未評価なら -∞）
    pub fn best_fitness(&self) -> f64 {
        self.best
            .as_ref()
            .map_or(f64::NEG_INFINITY, |best| best.fitness)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimization::space::{ParamRole, ParameterAxis};

    fn space() -> Arc<ParameterSpace> {
        Arc::new(
            ParameterSpace::new(vec![
                ParameterAxis::continuous("x", -5.0, 5.0, ParamRole::Classifier),
                ParameterAxis::continuous("y", -5.0, 5.0, ParamRole::Classifier),
            ])
            .unwrap(),
        )
    }

    fn sphere(params: &ParameterSet) -> std::result::Result<f64, EvaluationFailure> {
        let x = params["x"].as_f64();
        let y = params["y"].as_f64();
        Ok(-(x * x + y * y))
    }

    #[test]
    fn test_rejects_tiny_population() {
        let params = CrowSearchParams {
            population_size: 1,
            ..Default::default()
        };
        assert!(CrowSearch::new(space(), params, 1).is_err());
    }

    #[test]
    fn test_initial_state() {
        let search = CrowSearch::new(space(), CrowSearchParams::default(), 3).unwrap();
        let population = search.population();
        assert_eq!(population.len(), 20);
        assert!(population.fitness().iter().all(|f| *f == f64::NEG_INFINITY));
        assert_eq!(population.positions(), population.memory());
        assert!(search.best().is_none());
    }

    #[test]
    fn test_run_improves_sphere() {
        let params = CrowSearchParams {
            population_size: 15,
            max_iterations: 40,
            ..Default::default()
        };
        let mut search = CrowSearch::new(space(), params, 42).unwrap();
        let outcome = search.run(sphere).unwrap();

        assert_eq!(outcome.iterations_completed, 40);
        assert!(outcome.best_fitness > -1.0);
        assert!(outcome
            .convergence_history
            .windows(2)
            .all(|w| w[1] >= w[0]));
    }

    #[test]
    fn test_positions_stay_in_bounds() {
        let params = CrowSearchParams {
            population_size: 8,
            max_iterations: 1,
            awareness_probability: 0.3,
            flight_length: 3.0,
        };
        let mut search = CrowSearch::new(space(), params, 11).unwrap();
        for _ in 0..50 {
            for i in 0..8 {
                let fitness = sphere(&search.decode(i).unwrap()).unwrap();
                search.record_fitness(i, fitness).unwrap();
            }
            search.step();
            for position in search.population().positions() {
                assert!(search.space().contains(position));
            }
        }
    }

    #[test]
    fn test_failures_never_become_best() {
        let mut search = CrowSearch::new(space(), CrowSearchParams::default(), 5).unwrap();
        let outcome = search
            .run(|_| Err(EvaluationFailure::Error("boom".to_string())))
            .unwrap();
        assert_eq!(outcome.best_fitness, f64::NEG_INFINITY);
        assert!(outcome.best_parameters.is_empty());
        assert!(search
            .population()
            .memory_fitness()
            .iter()
            .all(|f| *f == f64::NEG_INFINITY));
    }

    #[test]
    fn test_nan_fitness_is_ignored() {
        let mut search = CrowSearch::new(space(), CrowSearchParams::default(), 5).unwrap();
        let update = search.record_fitness(0, f64::NAN).unwrap();
        assert!(!update.memory_improved);
        assert!(search.best().is_none());
    }

    #[test]
    fn test_same_seed_same_trajectory() {
        let run = |seed| {
            let mut search = CrowSearch::new(space(), CrowSearchParams::default(), seed).unwrap();
            search.run(sphere).unwrap();
            search.population().positions().to_vec()
        };
        assert_eq!(run(9), run(9));
    }
}
