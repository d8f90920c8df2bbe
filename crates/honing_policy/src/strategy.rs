use serde::{Deserialize, Serialize};

use crate::cost::MaterialBundle;
use crate::stage::{BranchTable, StageDescriptor, StageError};

pub const LABEL_NONE: &str = "none";
pub const LABEL_BOOKS: &str = "books";
pub const LABEL_BREATHS: &str = "breaths";
pub const LABEL_BOOKS_AND_BREATHS: &str = "books+breaths";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoosterUse {
    pub booster: String,
    pub count: u32,
}

/// Which boosters go into every attempt taken before artisan energy is full.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Strategy {
    pub label: String,
    #[serde(default)]
    pub uses: Vec<BoosterUse>,
}

impl Strategy {
    pub fn new(label: impl Into<String>, uses: Vec<BoosterUse>) -> Self {
        Self {
            label: label.into(),
            uses,
        }
    }

    pub fn none() -> Self {
        Self::new(LABEL_NONE, Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        self.uses.iter().all(|u| u.count == 0)
    }

    pub fn count_of(&self, booster: &str) -> u32 {
        self.uses
            .iter()
            .filter(|u| u.booster == booster)
            .map(|u| u.count)
            .sum()
    }

    /// Booster quantities spent on one boosted attempt.
    pub fn materials(&self) -> MaterialBundle {
        self.uses
            .iter()
            .filter(|u| u.count > 0)
            .map(|u| (u.booster.clone(), u.count as f64))
            .collect()
    }
}

/// One local strategy per branch, in branch order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchStrategy {
    pub label: String,
    pub per_branch: Vec<Strategy>,
}

impl BranchStrategy {
    pub fn single(strategy: Strategy) -> Self {
        Self {
            label: strategy.label.clone(),
            per_branch: vec![strategy],
        }
    }
}

/// Admissible strategies of a single-branch stage.
///
/// Each booster category is all-or-nothing: every book once, every breath at
/// its max use. Order is none, books, breaths, books+breaths, skipping
/// categories the stage does not have.
pub fn enumerate(stage: &StageDescriptor) -> Vec<Strategy> {
    let book_uses: Vec<BoosterUse> = stage
        .books
        .iter()
        .map(|book| BoosterUse {
            booster: book.id.clone(),
            count: 1,
        })
        .collect();
    let breath_uses: Vec<BoosterUse> = stage
        .breaths
        .iter()
        .map(|breath| BoosterUse {
            booster: breath.id.clone(),
            count: breath.max_use,
        })
        .collect();

    let mut strategies = vec![Strategy::none()];
    if stage.has_books() {
        strategies.push(Strategy::new(LABEL_BOOKS, book_uses.clone()));
    }
    if stage.has_breaths() {
        strategies.push(Strategy::new(LABEL_BREATHS, breath_uses.clone()));
    }
    if stage.has_books() && stage.has_breaths() {
        let mut uses = book_uses;
        uses.extend(breath_uses);
        strategies.push(Strategy::new(LABEL_BOOKS_AND_BREATHS, uses));
    }
    strategies
}

/// Cartesian product of every branch's local strategies, first branch slowest.
pub fn enumerate_branched(table: &BranchTable) -> Result<Vec<BranchStrategy>, StageError> {
    if table.branches.is_empty() {
        return Err(StageError::EmptyStage);
    }

    if table.is_single_branch() {
        return Ok(enumerate(&table.branches[0].stage)
            .into_iter()
            .map(BranchStrategy::single)
            .collect());
    }

    let combos = table
        .branches
        .iter()
        .fold(vec![Vec::<Strategy>::new()], |combos, branch| {
            let local = enumerate(&branch.stage);
            combos
                .iter()
                .flat_map(|prefix| {
                    local.iter().map(move |strategy| {
                        let mut combo = prefix.clone();
                        combo.push(strategy.clone());
                        combo
                    })
                })
                .collect()
        });

    Ok(combos
        .into_iter()
        .map(|per_branch| BranchStrategy {
            label: branched_label(table, &per_branch),
            per_branch,
        })
        .collect())
}

fn branched_label(table: &BranchTable, per_branch: &[Strategy]) -> String {
    table
        .branches
        .iter()
        .zip(per_branch.iter())
        .map(|(branch, strategy)| format!("{}={}", branch.name, strategy.label))
        .collect::<Vec<_>>()
        .join(", ")
}
