//! Optimization Module
//!
//! カラス探索（CSA）によるハイパーパラメータ探索。
//!
//! - [`crow_search`]: 単一目的の個体群探索
//! - [`engine`]: 重み付き多目的・パレート前線・適応スケジュール・並行評価

pub mod crow_search;
pub mod engine;
pub mod evaluator;
pub mod objective;
pub mod pareto;
pub mod schedule;
pub mod space;

pub use crow_search::{CrowSearch, CrowSearchParams, GlobalBest, Population, SearchOutcome};
pub use engine::{
    ConvergenceRecord, MultiObjectiveSearchEngine, OptimizationReport, OptimizationResult,
    SearchConfig,
};
pub use evaluator::{
    CandidateEvaluator, ClassifierObjectiveEvaluator, DensityObjectiveEvaluator,
    EvaluationFailure, EvaluationOutcome, FnEvaluator, HybridEvaluator,
};
pub use objective::{Objective, ObjectiveScores, ObjectiveSet};
pub use pareto::{ParetoFront, ParetoSolution};
pub use schedule::{AdaptiveSchedule, MovementParams};
pub use space::{AxisKind, ParamRole, ParamValue, ParameterAxis, ParameterSet, ParameterSpace};
