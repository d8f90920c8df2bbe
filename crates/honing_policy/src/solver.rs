mod process;
mod ranking;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};

use rayon::prelude::*;
use thiserror::Error;

use crate::cost::{CostModel, CostModelError};
use crate::rules::{HoningRules, RulesError};
use crate::stage::{BranchTable, StageDescriptor, StageError};
use crate::strategy::{BranchStrategy, Strategy, enumerate_branched};

use process::ResolvedBranch;
pub use process::{AttemptStep, EvaluationResult, WorstCase};
pub use ranking::{RankedStrategy, Ranking};

#[derive(Debug, Error, PartialEq)]
pub enum EvaluationError {
    #[error("invalid stage: {0}")]
    InvalidStage(#[from] StageError),
    #[error("invalid rules: {0}")]
    InvalidRules(#[from] RulesError),
    #[error(transparent)]
    Price(#[from] CostModelError),
    #[error("strategy {strategy} references unknown booster {booster}")]
    UnknownBooster { strategy: String, booster: String },
    #[error("strategy {strategy} uses {booster} {count} times, max is {max_use}")]
    ExceedsMaxUse {
        strategy: String,
        booster: String,
        count: u32,
        max_use: u32,
    },
    #[error("strategy {strategy} covers {got} branches, stage has {expected}")]
    BranchCountMismatch {
        strategy: String,
        expected: usize,
        got: usize,
    },
    #[error("strategy label {label} is used more than once")]
    DuplicateStrategy { label: String },
    #[error("no strategies to rank")]
    NoStrategies,
    #[error("success not reached within {max_attempts} attempts")]
    NotConverged { max_attempts: u32 },
    #[error("ranking was cancelled")]
    Cancelled,
}

/// Evaluates and ranks booster strategies for one validated stage.
///
/// The stage, the rules and the base-cost prices are fixed at construction,
/// so every evaluation made through one solver sees the same price snapshot.
pub struct HoningSolver {
    table: BranchTable,
    rules: HoningRules,
    base_costs: Vec<f64>,
}

impl HoningSolver {
    pub fn new(
        table: BranchTable,
        cost_model: &CostModel,
        rules: HoningRules,
    ) -> Result<Self, EvaluationError> {
        rules.validate()?;
        table.validate()?;

        let base_costs = table
            .branches
            .iter()
            .map(|branch| cost_model.bundle_cost(&branch.stage.base_cost))
            .collect::<Result<Vec<f64>, CostModelError>>()?;

        Ok(Self {
            table,
            rules,
            base_costs,
        })
    }

    pub fn single(
        stage: StageDescriptor,
        cost_model: &CostModel,
        rules: HoningRules,
    ) -> Result<Self, EvaluationError> {
        Self::new(BranchTable::single(stage), cost_model, rules)
    }

    pub fn table(&self) -> &BranchTable {
        &self.table
    }

    pub fn rules(&self) -> &HoningRules {
        &self.rules
    }

    /// Gold spent on base materials by one attempt of each branch.
    pub fn base_costs(&self) -> &[f64] {
        &self.base_costs
    }

    pub fn enumerate(&self) -> Result<Vec<BranchStrategy>, EvaluationError> {
        Ok(enumerate_branched(&self.table)?)
    }

    fn resolve(&self, strategy: &BranchStrategy) -> Result<Vec<ResolvedBranch>, EvaluationError> {
        if strategy.per_branch.len() != self.table.branches.len() {
            return Err(EvaluationError::BranchCountMismatch {
                strategy: strategy.label.clone(),
                expected: self.table.branches.len(),
                got: strategy.per_branch.len(),
            });
        }

        let mut resolved = Vec::with_capacity(self.table.branches.len());
        for ((branch, local), &base_cost) in self
            .table
            .branches
            .iter()
            .zip(strategy.per_branch.iter())
            .zip(self.base_costs.iter())
        {
            let mut counts: BTreeMap<&str, u32> = BTreeMap::new();
            for booster_use in local.uses.iter() {
                *counts.entry(booster_use.booster.as_str()).or_insert(0) += booster_use.count;
            }

            let mut booster_probability = 0.0;
            let mut booster_cost = 0.0;
            for (&id, &count) in counts.iter() {
                let booster = branch.stage.booster(id).ok_or_else(|| {
                    EvaluationError::UnknownBooster {
                        strategy: strategy.label.clone(),
                        booster: id.to_string(),
                    }
                })?;
                if count > booster.max_use {
                    return Err(EvaluationError::ExceedsMaxUse {
                        strategy: strategy.label.clone(),
                        booster: id.to_string(),
                        count,
                        max_use: booster.max_use,
                    });
                }
                booster_probability += count as f64 * booster.added_probability;
                booster_cost += count as f64 * booster.unit_cost;
            }

            resolved.push(ResolvedBranch {
                base_probability: branch.stage.base_probability,
                base_cost,
                base_materials: branch.stage.base_cost.clone(),
                booster_probability,
                booster_cost,
                booster_materials: local.materials(),
            });
        }
        Ok(resolved)
    }

    pub fn evaluate(&self, strategy: &BranchStrategy) -> Result<EvaluationResult, EvaluationError> {
        let branches = self.resolve(strategy)?;
        let result = process::run(&branches, &self.table.schedule, &self.rules)?;
        log::debug!(
            "strategy {}: expected {:.3} attempts / {:.2} gold, worst case {} attempts / {:.2} gold",
            strategy.label,
            result.expected_attempts,
            result.expected_cost,
            result.worst_case.attempts,
            result.worst_case.cost
        );
        Ok(result)
    }

    /// Evaluate a strategy of a single-branch stage.
    pub fn evaluate_single(&self, strategy: &Strategy) -> Result<EvaluationResult, EvaluationError> {
        self.evaluate(&BranchStrategy::single(strategy.clone()))
    }

    pub fn rank(&self, strategies: &[BranchStrategy]) -> Result<Ranking, EvaluationError> {
        self.rank_cancellable(strategies, &AtomicBool::new(false))
    }

    /// Rank `strategies`, evaluating them in parallel.
    ///
    /// `cancel` is checked before each evaluation starts; an evaluation that
    /// is already running finishes.
    pub fn rank_cancellable(
        &self,
        strategies: &[BranchStrategy],
        cancel: &AtomicBool,
    ) -> Result<Ranking, EvaluationError> {
        self.rank_until(strategies, || cancel.load(Ordering::Relaxed))
    }

    fn rank_until<F>(
        &self,
        strategies: &[BranchStrategy],
        stopped: F,
    ) -> Result<Ranking, EvaluationError>
    where
        F: Fn() -> bool + Sync,
    {
        if strategies.is_empty() {
            return Err(EvaluationError::NoStrategies);
        }
        let mut labels: BTreeSet<&str> = BTreeSet::new();
        for strategy in strategies.iter() {
            if !labels.insert(strategy.label.as_str()) {
                return Err(EvaluationError::DuplicateStrategy {
                    label: strategy.label.clone(),
                });
            }
        }

        let evaluated = strategies
            .par_iter()
            .map(|strategy| {
                if stopped() {
                    return Err(EvaluationError::Cancelled);
                }
                self.evaluate(strategy)
                    .map(|result| (strategy.clone(), result))
            })
            .collect::<Result<Vec<_>, EvaluationError>>()?;

        let ranking = Ranking::new(evaluated);
        if let Some(best) = ranking.recommended() {
            log::debug!(
                "ranked {} strategies, recommended {} at {:.2} gold",
                ranking.len(),
                best.strategy.label,
                best.result.expected_cost
            );
        }
        Ok(ranking)
    }

    pub fn enumerate_and_rank(&self) -> Result<Ranking, EvaluationError> {
        let strategies = self.enumerate()?;
        self.rank(&strategies)
    }
}

pub fn evaluate(
    stage: &StageDescriptor,
    strategy: &Strategy,
    cost_model: &CostModel,
    rules: &HoningRules,
) -> Result<EvaluationResult, EvaluationError> {
    HoningSolver::single(stage.clone(), cost_model, rules.clone())?.evaluate_single(strategy)
}

pub fn enumerate_and_rank(
    table: &BranchTable,
    cost_model: &CostModel,
    rules: &HoningRules,
) -> Result<Ranking, EvaluationError> {
    HoningSolver::new(table.clone(), cost_model, rules.clone())?.enumerate_and_rank()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use crate::cost::MaterialBundle;
    use crate::stage::{Booster, Branch, BranchSchedule};
    use crate::strategy::BoosterUse;

    fn prices() -> CostModel {
        CostModel::new([("ore", 5.0)]).unwrap()
    }

    fn stage() -> StageDescriptor {
        StageDescriptor::new(0.1, MaterialBundle::new().with("ore", 10.0))
            .with_book(Booster::book("book", 0.1, 100.0))
            .with_breath(Booster::breath("breath", 0.01, 20.0, 10))
    }

    #[test]
    fn base_cost_is_priced_once() {
        let solver = HoningSolver::single(stage(), &prices(), HoningRules::default()).unwrap();
        assert_eq!(solver.base_costs(), &[50.0]);
    }

    #[test]
    fn missing_price_fails_construction() {
        let model = CostModel::new([("gold", 1.0)]).unwrap();
        let err = HoningSolver::single(stage(), &model, HoningRules::default())
            .err()
            .unwrap();
        assert_eq!(
            err,
            EvaluationError::Price(CostModelError::MissingPrice {
                material: "ore".to_string()
            })
        );
    }

    #[test]
    fn invalid_stage_fails_before_evaluation() {
        let mut bad = stage();
        bad.base_probability = 0.0;
        let err = evaluate(&bad, &Strategy::none(), &prices(), &HoningRules::default())
            .unwrap_err();
        assert!(matches!(
            err,
            EvaluationError::InvalidStage(StageError::Branch { .. })
        ));
    }

    #[test]
    fn unknown_booster_is_rejected() {
        let strategy = Strategy::new(
            "tears",
            vec![BoosterUse {
                booster: "tears".to_string(),
                count: 1,
            }],
        );
        let err = evaluate(&stage(), &strategy, &prices(), &HoningRules::default()).unwrap_err();
        assert_eq!(
            err,
            EvaluationError::UnknownBooster {
                strategy: "tears".to_string(),
                booster: "tears".to_string()
            }
        );
    }

    #[test]
    fn overusing_a_booster_is_rejected() {
        let strategy = Strategy::new(
            "double book",
            vec![
                BoosterUse {
                    booster: "book".to_string(),
                    count: 1,
                },
                BoosterUse {
                    booster: "book".to_string(),
                    count: 1,
                },
            ],
        );
        let err = evaluate(&stage(), &strategy, &prices(), &HoningRules::default()).unwrap_err();
        assert!(matches!(
            err,
            EvaluationError::ExceedsMaxUse {
                count: 2,
                max_use: 1,
                ..
            }
        ));
    }

    #[test]
    fn booster_terms_scale_with_count() {
        let solver = HoningSolver::single(stage(), &prices(), HoningRules::default()).unwrap();
        let strategy = Strategy::new(
            "half breath",
            vec![BoosterUse {
                booster: "breath".to_string(),
                count: 5,
            }],
        );
        let result = solver.evaluate_single(&strategy).unwrap();
        let first = &result.steps[0];
        assert!((first.booster_probability - 0.05).abs() < 1e-12);
        assert!((first.step_cost - 150.0).abs() < 1e-12);
    }

    #[test]
    fn branch_count_must_match() {
        let table = BranchTable::new(
            vec![Branch::new("normal", stage()), Branch::new("bonus", stage())],
            BranchSchedule::every_nth(2),
        )
        .unwrap();
        let solver = HoningSolver::new(table, &prices(), HoningRules::default()).unwrap();
        let err = solver.evaluate_single(&Strategy::none()).unwrap_err();
        assert!(matches!(
            err,
            EvaluationError::BranchCountMismatch {
                expected: 2,
                got: 1,
                ..
            }
        ));
        assert_eq!(solver.enumerate().unwrap().len(), 16);
    }

    #[test]
    fn rank_rejects_empty_and_duplicate_lists() {
        let solver = HoningSolver::single(stage(), &prices(), HoningRules::default()).unwrap();
        assert_eq!(solver.rank(&[]), Err(EvaluationError::NoStrategies));

        let none = BranchStrategy::single(Strategy::none());
        assert_eq!(
            solver.rank(&[none.clone(), none]),
            Err(EvaluationError::DuplicateStrategy {
                label: "none".to_string()
            })
        );
    }

    #[test]
    fn cancelled_ranking_reports_cancellation() {
        let solver = HoningSolver::single(stage(), &prices(), HoningRules::default()).unwrap();
        let strategies = solver.enumerate().unwrap();
        let cancel = AtomicBool::new(true);
        assert_eq!(
            solver.rank_cancellable(&strategies, &cancel),
            Err(EvaluationError::Cancelled)
        );
    }

    #[test]
    fn cancelling_mid_run_stops_before_the_next_evaluation() {
        let solver = HoningSolver::single(stage(), &prices(), HoningRules::default()).unwrap();
        let strategies = solver.enumerate().unwrap();
        let cancel = AtomicBool::new(false);
        let checks = AtomicUsize::new(0);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(1)
            .build()
            .unwrap();

        // The flag goes up while the first evaluation is running.
        let result = pool.install(|| {
            solver.rank_until(&strategies, || {
                if checks.fetch_add(1, Ordering::SeqCst) == 0 {
                    cancel.store(true, Ordering::SeqCst);
                    return false;
                }
                cancel.load(Ordering::SeqCst)
            })
        });
        assert_eq!(result, Err(EvaluationError::Cancelled));
        assert!(checks.load(Ordering::SeqCst) >= 2);
    }

    #[test]
    fn evaluation_in_progress_runs_to_completion() {
        let solver = HoningSolver::single(stage(), &prices(), HoningRules::default()).unwrap();
        let strategies = solver.enumerate().unwrap();
        let last = strategies.len() - 1;
        let cancel = AtomicBool::new(false);
        let checks = AtomicUsize::new(0);

        // Cancel lands after the last evaluation has already started.
        let ranking = solver
            .rank_until(&strategies, || {
                let raised = cancel.load(Ordering::SeqCst);
                if checks.fetch_add(1, Ordering::SeqCst) == last {
                    cancel.store(true, Ordering::SeqCst);
                }
                raised
            })
            .unwrap();
        assert!(cancel.load(Ordering::SeqCst));
        assert_eq!(ranking.len(), strategies.len());
        assert_eq!(ranking, solver.rank(&strategies).unwrap());
    }
}
