mod cost;
mod data;
mod rules;
mod solver;
mod stage;
mod strategy;

pub use cost::{CostModel, CostModelError, MaterialBundle, MaterialId, PriceSource};
pub use data::{
    ENERGY_DIVISOR, ENERGY_THRESHOLD, MAX_ATTEMPTS, STREAK_BONUS_CAP, STREAK_BONUS_STEP,
    TRUNCATION_EPSILON,
};
pub use rules::{HoningRules, RulesError};
pub use solver::{
    AttemptStep, EvaluationError, EvaluationResult, HoningSolver, RankedStrategy, Ranking,
    WorstCase, enumerate_and_rank, evaluate,
};
pub use stage::{
    Booster, BoosterKind, Branch, BranchSchedule, BranchTable, StageDescriptor, StageError,
};
pub use strategy::{BoosterUse, BranchStrategy, Strategy, enumerate, enumerate_branched};
