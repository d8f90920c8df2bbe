use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cost::{CostModel, CostModelError, MaterialBundle};
use crate::data::{DEFAULT_BRANCH_NAME, PROBABILITY_SUM_TOL};

#[derive(Debug, Error, PartialEq)]
pub enum StageError {
    #[error("base probability must be in (0, 1] (got {value})")]
    InvalidBaseProbability { value: f64 },
    #[error("base cost of {material} must be finite and non-negative (got {value})")]
    InvalidBaseCost { material: String, value: f64 },
    #[error("booster {id}: {field} must be finite and non-negative (got {value})")]
    InvalidBoosterValue {
        id: String,
        field: &'static str,
        value: f64,
    },
    #[error("booster {id} must allow at least one use")]
    ZeroMaxUse { id: String },
    #[error("book {id} can be used once per attempt (max use {max_use})")]
    BookMaxUse { id: String, max_use: u32 },
    #[error("booster {id} is listed more than once")]
    DuplicateBooster { id: String },
    #[error("stage has no branches")]
    EmptyStage,
    #[error("branch {name} is listed more than once")]
    DuplicateBranch { name: String },
    #[error("branch cycle must not be empty")]
    EmptyCycle,
    #[error("branch cycle refers to branch {index}, stage has {count}")]
    UnknownBranchIndex { index: usize, count: usize },
    #[error("expected {expected} branch frequencies, got {got}")]
    FrequencyCountMismatch { expected: usize, got: usize },
    #[error("frequency of branch {index} must be finite and non-negative (got {value})")]
    InvalidFrequency { index: usize, value: f64 },
    #[error("branch frequencies must sum to 1 (got {sum})")]
    FrequenciesNotNormalized { sum: f64 },
    #[error("branch {name}: {source}")]
    Branch {
        name: String,
        source: Box<StageError>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BoosterKind {
    Book,
    Breath,
}

fn default_max_use() -> u32 {
    1
}

/// An optional consumable that raises the chance of an attempt.
///
/// The id is also the material id the booster is bought and counted as.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Booster {
    pub id: String,
    pub added_probability: f64,
    pub unit_cost: f64,
    #[serde(default = "default_max_use")]
    pub max_use: u32,
}

impl Booster {
    pub fn book(id: impl Into<String>, added_probability: f64, unit_cost: f64) -> Self {
        Self {
            id: id.into(),
            added_probability,
            unit_cost,
            max_use: 1,
        }
    }

    pub fn breath(
        id: impl Into<String>,
        added_probability: f64,
        unit_cost: f64,
        max_use: u32,
    ) -> Self {
        Self {
            id: id.into(),
            added_probability,
            unit_cost,
            max_use,
        }
    }

    /// A book whose unit cost is the current price of the material `id`.
    pub fn priced_book(
        id: impl Into<String>,
        added_probability: f64,
        cost_model: &CostModel,
    ) -> Result<Self, CostModelError> {
        let id = id.into();
        let unit_cost = cost_model.price(&id)?;
        Ok(Self::book(id, added_probability, unit_cost))
    }

    pub fn priced_breath(
        id: impl Into<String>,
        added_probability: f64,
        max_use: u32,
        cost_model: &CostModel,
    ) -> Result<Self, CostModelError> {
        let id = id.into();
        let unit_cost = cost_model.price(&id)?;
        Ok(Self::breath(id, added_probability, unit_cost, max_use))
    }

    fn validate(&self, kind: BoosterKind) -> Result<(), StageError> {
        if !self.added_probability.is_finite() || self.added_probability < 0.0 {
            return Err(StageError::InvalidBoosterValue {
                id: self.id.clone(),
                field: "added_probability",
                value: self.added_probability,
            });
        }
        if !self.unit_cost.is_finite() || self.unit_cost < 0.0 {
            return Err(StageError::InvalidBoosterValue {
                id: self.id.clone(),
                field: "unit_cost",
                value: self.unit_cost,
            });
        }
        if self.max_use == 0 {
            return Err(StageError::ZeroMaxUse {
                id: self.id.clone(),
            });
        }
        if kind == BoosterKind::Book && self.max_use != 1 {
            return Err(StageError::BookMaxUse {
                id: self.id.clone(),
                max_use: self.max_use,
            });
        }
        Ok(())
    }
}

/// Parameters of one honing step: the base chance, what every attempt
/// consumes, and the boosters that may be added on top.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageDescriptor {
    pub base_probability: f64,
    #[serde(default)]
    pub base_cost: MaterialBundle,
    #[serde(default)]
    pub books: Vec<Booster>,
    #[serde(default)]
    pub breaths: Vec<Booster>,
}

impl StageDescriptor {
    pub fn new(base_probability: f64, base_cost: MaterialBundle) -> Self {
        Self {
            base_probability,
            base_cost,
            books: Vec::new(),
            breaths: Vec::new(),
        }
    }

    pub fn with_book(mut self, book: Booster) -> Self {
        self.books.push(book);
        self
    }

    pub fn with_breath(mut self, breath: Booster) -> Self {
        self.breaths.push(breath);
        self
    }

    pub fn has_books(&self) -> bool {
        !self.books.is_empty()
    }

    pub fn has_breaths(&self) -> bool {
        !self.breaths.is_empty()
    }

    pub fn booster(&self, id: &str) -> Option<&Booster> {
        self.books
            .iter()
            .chain(self.breaths.iter())
            .find(|booster| booster.id == id)
    }

    /// Validate the stage
    ///
    /// Constraints enforced:
    /// - base_probability is finite and in (0, 1]
    /// - base cost quantities are finite and >= 0
    /// - booster probabilities and unit costs are finite and >= 0
    /// - every booster allows at least one use, books exactly one
    /// - booster ids are unique across books and breaths
    pub fn validate(&self) -> Result<(), StageError> {
        let p = self.base_probability;
        if !p.is_finite() || p <= 0.0 || p > 1.0 {
            return Err(StageError::InvalidBaseProbability { value: p });
        }

        for (material, quantity) in self.base_cost.iter() {
            if !quantity.is_finite() || quantity < 0.0 {
                return Err(StageError::InvalidBaseCost {
                    material: material.to_string(),
                    value: quantity,
                });
            }
        }

        let mut seen: BTreeSet<&str> = BTreeSet::new();
        let boosters = self
            .books
            .iter()
            .map(|book| (BoosterKind::Book, book))
            .chain(
                self.breaths
                    .iter()
                    .map(|breath| (BoosterKind::Breath, breath)),
            );
        for (kind, booster) in boosters {
            booster.validate(kind)?;
            if !seen.insert(booster.id.as_str()) {
                return Err(StageError::DuplicateBooster {
                    id: booster.id.clone(),
                });
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Branch {
    pub name: String,
    pub stage: StageDescriptor,
}

impl Branch {
    pub fn new(name: impl Into<String>, stage: StageDescriptor) -> Self {
        Self {
            name: name.into(),
            stage,
        }
    }
}

/// Which branch an attempt meets.
///
/// `Cycle` is a fixed repeating schedule; attempt `t` meets
/// `pattern[(t - 1) % pattern.len()]`. `Frequencies` draws the branch
/// independently on every attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum BranchSchedule {
    Cycle { pattern: Vec<usize> },
    Frequencies { weights: Vec<f64> },
}

impl BranchSchedule {
    /// Branch 0 on every attempt except each `period`-th, which meets branch 1.
    pub fn every_nth(period: usize) -> Self {
        let mut pattern = vec![0; period.saturating_sub(1)];
        pattern.push(1);
        Self::Cycle { pattern }
    }

    fn validate(&self, branch_count: usize) -> Result<(), StageError> {
        match self {
            Self::Cycle { pattern } => {
                if pattern.is_empty() {
                    return Err(StageError::EmptyCycle);
                }
                if let Some(&index) = pattern.iter().find(|&&index| index >= branch_count) {
                    return Err(StageError::UnknownBranchIndex {
                        index,
                        count: branch_count,
                    });
                }
            }
            Self::Frequencies { weights } => {
                if weights.len() != branch_count {
                    return Err(StageError::FrequencyCountMismatch {
                        expected: branch_count,
                        got: weights.len(),
                    });
                }
                let mut sum = 0.0;
                for (index, &value) in weights.iter().enumerate() {
                    if !value.is_finite() || value < 0.0 {
                        return Err(StageError::InvalidFrequency { index, value });
                    }
                    sum += value;
                }
                if (sum - 1.0).abs() > PROBABILITY_SUM_TOL {
                    return Err(StageError::FrequenciesNotNormalized { sum });
                }
            }
        }
        Ok(())
    }
}

/// The branches of an upgrade range and the rule deciding which one each
/// attempt meets. A plain honing step is a table with a single branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchTable {
    pub branches: Vec<Branch>,
    pub schedule: BranchSchedule,
}

impl BranchTable {
    pub fn single(stage: StageDescriptor) -> Self {
        Self {
            branches: vec![Branch::new(DEFAULT_BRANCH_NAME, stage)],
            schedule: BranchSchedule::Cycle { pattern: vec![0] },
        }
    }

    pub fn new(branches: Vec<Branch>, schedule: BranchSchedule) -> Result<Self, StageError> {
        let table = Self { branches, schedule };
        table.validate()?;
        Ok(table)
    }

    pub fn is_single_branch(&self) -> bool {
        self.branches.len() == 1
    }

    pub fn validate(&self) -> Result<(), StageError> {
        if self.branches.is_empty() {
            return Err(StageError::EmptyStage);
        }

        let mut names: BTreeSet<&str> = BTreeSet::new();
        for branch in self.branches.iter() {
            if !names.insert(branch.name.as_str()) {
                return Err(StageError::DuplicateBranch {
                    name: branch.name.clone(),
                });
            }
            branch.stage.validate().map_err(|err| StageError::Branch {
                name: branch.name.clone(),
                source: Box::new(err),
            })?;
        }

        self.schedule.validate(self.branches.len())
    }
}
