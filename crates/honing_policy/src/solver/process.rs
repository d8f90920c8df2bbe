use serde::Serialize;

use crate::cost::MaterialBundle;
use crate::rules::HoningRules;
use crate::stage::BranchSchedule;

use super::EvaluationError;

/// One simulated attempt of the trace.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptStep {
    pub attempt: u32,
    /// `None` when the attempt mixes several branches by frequency.
    pub branch: Option<usize>,
    pub base_probability: f64,
    pub booster_probability: f64,
    pub total_probability: f64,
    pub energy_before: f64,
    /// Artisan energy was full, so this attempt succeeds without boosters.
    pub guaranteed: bool,
    pub step_cost: f64,
    pub cumulative_cost: f64,
    /// Probability that the process is still unresolved entering this attempt.
    pub reach_probability: f64,
}

/// The path on which every attempt fails until success is forced.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorstCase {
    pub attempts: u32,
    pub cost: f64,
    pub materials: MaterialBundle,
    /// False when pity is disabled and the path was cut at the truncation point instead.
    pub guaranteed: bool,
}

/// Expected and worst-case outcome of one strategy.
///
/// Expectations are truncated series: attempts reached with probability at or
/// below the rules' truncation epsilon are left out, and the reach mass at the
/// first left-out attempt is reported as `truncated_probability`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationResult {
    pub expected_attempts: f64,
    pub expected_cost: f64,
    pub expected_materials: MaterialBundle,
    pub worst_case: WorstCase,
    pub truncated_probability: f64,
    pub steps: Vec<AttemptStep>,
}

impl EvaluationResult {
    pub fn worst_case_attempts(&self) -> u32 {
        self.worst_case.attempts
    }

    pub fn worst_case_cost(&self) -> f64 {
        self.worst_case.cost
    }
}

/// A branch with its strategy already priced into per-attempt numbers.
#[derive(Debug, Clone)]
pub(super) struct ResolvedBranch {
    pub base_probability: f64,
    pub base_cost: f64,
    pub base_materials: MaterialBundle,
    pub booster_probability: f64,
    pub booster_cost: f64,
    pub booster_materials: MaterialBundle,
}

struct StepPlan {
    branch: Option<usize>,
    base_probability: f64,
    booster_probability: f64,
    total_probability: f64,
    cost: f64,
    materials: MaterialBundle,
}

fn plan_branch(
    branch: &ResolvedBranch,
    index: usize,
    attempt: u32,
    guaranteed: bool,
    rules: &HoningRules,
) -> StepPlan {
    let base_probability = rules.base_probability_at(branch.base_probability, attempt);
    if guaranteed {
        return StepPlan {
            branch: Some(index),
            base_probability,
            booster_probability: 0.0,
            total_probability: 1.0,
            cost: branch.base_cost,
            materials: branch.base_materials.clone(),
        };
    }

    let mut materials = branch.base_materials.clone();
    materials.add_scaled(&branch.booster_materials, 1.0);
    StepPlan {
        branch: Some(index),
        base_probability,
        booster_probability: branch.booster_probability,
        total_probability: (base_probability + branch.booster_probability).clamp(0.0, 1.0),
        cost: branch.base_cost + branch.booster_cost,
        materials,
    }
}

fn plan_step(
    branches: &[ResolvedBranch],
    schedule: &BranchSchedule,
    attempt: u32,
    guaranteed: bool,
    rules: &HoningRules,
) -> StepPlan {
    match schedule {
        BranchSchedule::Cycle { pattern } => {
            let index = pattern[(attempt as usize - 1) % pattern.len()];
            plan_branch(&branches[index], index, attempt, guaranteed, rules)
        }
        BranchSchedule::Frequencies { weights } => {
            let mut mixed = StepPlan {
                branch: None,
                base_probability: 0.0,
                booster_probability: 0.0,
                total_probability: 0.0,
                cost: 0.0,
                materials: MaterialBundle::new(),
            };
            let mut all_certain = true;
            for (index, (branch, &weight)) in branches.iter().zip(weights.iter()).enumerate() {
                if weight == 0.0 {
                    continue;
                }
                let local = plan_branch(branch, index, attempt, guaranteed, rules);
                all_certain &= local.total_probability >= 1.0;
                mixed.base_probability += weight * local.base_probability;
                mixed.booster_probability += weight * local.booster_probability;
                mixed.total_probability += weight * local.total_probability;
                mixed.cost += weight * local.cost;
                mixed.materials.add_scaled(&local.materials, weight);
            }
            // Weights only sum to 1 within tolerance.
            mixed.total_probability = if all_certain {
                1.0
            } else {
                mixed.total_probability.min(1.0)
            };
            mixed
        }
    }
}

/// Attempts the walk may take: the pity bound for the least likely branch when
/// energy is on, the configured guard otherwise.
fn attempt_limit(branches: &[ResolvedBranch], rules: &HoningRules) -> u32 {
    let min_probability = branches
        .iter()
        .map(|branch| branch.base_probability)
        .fold(f64::INFINITY, f64::min);
    rules
        .pity_attempt_bound(min_probability)
        .unwrap_or(rules.max_attempts)
}

/// Walk the attempt process until success is certain.
///
/// With pity enabled the walk always reaches the guaranteed attempt, so the
/// trace covers the whole worst case; expectation terms stop accumulating once
/// the reach probability drops to the truncation epsilon. Without pity there
/// is no forced success and the walk ends at the truncation point.
pub(super) fn run(
    branches: &[ResolvedBranch],
    schedule: &BranchSchedule,
    rules: &HoningRules,
) -> Result<EvaluationResult, EvaluationError> {
    let epsilon = rules.truncation_epsilon;
    let limit = attempt_limit(branches, rules);

    let mut energy = 0.0f64;
    let mut reach = 1.0f64;
    let mut expected_attempts = 0.0f64;
    let mut expected_cost = 0.0f64;
    let mut expected_materials = MaterialBundle::new();
    let mut cumulative_cost = 0.0f64;
    let mut cumulative_materials = MaterialBundle::new();
    let mut truncated_probability: Option<f64> = None;
    let mut steps: Vec<AttemptStep> = Vec::new();

    for attempt in 1..=limit {
        let guaranteed = rules.is_guaranteed(energy);
        let plan = plan_step(branches, schedule, attempt, guaranteed, rules);

        cumulative_cost += plan.cost;
        cumulative_materials.add_scaled(&plan.materials, 1.0);

        if reach > epsilon {
            expected_attempts += reach;
            expected_cost += reach * plan.cost;
            expected_materials.add_scaled(&plan.materials, reach);
        } else if truncated_probability.is_none() {
            truncated_probability = Some(reach);
        }

        steps.push(AttemptStep {
            attempt,
            branch: plan.branch,
            base_probability: plan.base_probability,
            booster_probability: plan.booster_probability,
            total_probability: plan.total_probability,
            energy_before: energy,
            guaranteed,
            step_cost: plan.cost,
            cumulative_cost,
            reach_probability: reach,
        });

        let certain = plan.total_probability >= 1.0;
        if !certain {
            energy += rules.energy_gain(plan.total_probability);
            reach *= 1.0 - plan.total_probability;
        }

        let cut_off = !rules.has_pity() && reach <= epsilon;
        if certain || cut_off {
            if cut_off && !certain {
                truncated_probability.get_or_insert(reach);
                log::warn!(
                    "no artisan energy: series truncated after {attempt} attempts with {reach:.3e} probability unresolved"
                );
            }
            return Ok(EvaluationResult {
                expected_attempts,
                expected_cost,
                expected_materials,
                worst_case: WorstCase {
                    attempts: attempt,
                    cost: cumulative_cost,
                    materials: cumulative_materials,
                    guaranteed: certain,
                },
                truncated_probability: truncated_probability.unwrap_or(0.0),
                steps,
            });
        }
    }

    Err(EvaluationError::NotConverged {
        max_attempts: limit,
    })
}
