use std::cmp::Ordering;

use serde::Serialize;

use crate::strategy::BranchStrategy;

use super::EvaluationResult;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedStrategy {
    /// 1-based position; rank 1 is the recommended strategy.
    pub rank: usize,
    pub strategy: BranchStrategy,
    pub result: EvaluationResult,
    /// Expected gold above the recommended strategy.
    pub regret: f64,
}

/// Evaluated strategies, cheapest expected cost first.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Ranking {
    entries: Vec<RankedStrategy>,
}

fn compare(
    lhs: &(BranchStrategy, EvaluationResult),
    rhs: &(BranchStrategy, EvaluationResult),
) -> Ordering {
    lhs.1
        .expected_cost
        .total_cmp(&rhs.1.expected_cost)
        .then_with(|| lhs.1.expected_attempts.total_cmp(&rhs.1.expected_attempts))
        .then_with(|| lhs.0.label.cmp(&rhs.0.label))
}

impl Ranking {
    pub(super) fn new(mut evaluated: Vec<(BranchStrategy, EvaluationResult)>) -> Self {
        evaluated.sort_by(compare);
        let best = evaluated
            .first()
            .map_or(0.0, |(_, result)| result.expected_cost);

        let entries = evaluated
            .into_iter()
            .enumerate()
            .map(|(index, (strategy, result))| {
                let regret = result.expected_cost - best;
                RankedStrategy {
                    rank: index + 1,
                    strategy,
                    result,
                    regret,
                }
            })
            .collect();

        Self { entries }
    }

    pub fn recommended(&self) -> Option<&RankedStrategy> {
        self.entries.first()
    }

    pub fn worst(&self) -> Option<&RankedStrategy> {
        self.entries.last()
    }

    pub fn entries(&self) -> &[RankedStrategy] {
        &self.entries
    }

    pub fn get(&self, label: &str) -> Option<&RankedStrategy> {
        self.entries
            .iter()
            .find(|entry| entry.strategy.label == label)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RankedStrategy> {
        self.entries.iter()
    }

    pub fn into_entries(self) -> Vec<RankedStrategy> {
        self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cost::MaterialBundle;
    use crate::solver::WorstCase;
    use crate::strategy::Strategy;

    fn evaluated(label: &str, cost: f64, attempts: f64) -> (BranchStrategy, EvaluationResult) {
        (
            BranchStrategy::single(Strategy::new(label, Vec::new())),
            EvaluationResult {
                expected_attempts: attempts,
                expected_cost: cost,
                expected_materials: MaterialBundle::new(),
                worst_case: WorstCase {
                    attempts: 10,
                    cost: 1000.0,
                    materials: MaterialBundle::new(),
                    guaranteed: true,
                },
                truncated_probability: 0.0,
                steps: Vec::new(),
            },
        )
    }

    #[test]
    fn orders_by_cost_then_attempts_then_label() {
        let ranking = Ranking::new(vec![
            evaluated("c", 300.0, 2.0),
            evaluated("b", 200.0, 5.0),
            evaluated("a", 200.0, 5.0),
            evaluated("d", 200.0, 4.0),
        ]);
        let labels: Vec<&str> = ranking
            .iter()
            .map(|entry| entry.strategy.label.as_str())
            .collect();
        assert_eq!(labels, vec!["d", "a", "b", "c"]);
        assert_eq!(ranking.recommended().map(|e| e.rank), Some(1));
        assert_eq!(ranking.worst().map(|e| e.rank), Some(4));
    }

    #[test]
    fn regret_is_gap_to_recommended() {
        let ranking = Ranking::new(vec![evaluated("x", 450.0, 3.0), evaluated("y", 400.0, 3.0)]);
        assert_eq!(ranking.get("y").map(|e| e.regret), Some(0.0));
        assert_eq!(ranking.get("x").map(|e| e.regret), Some(50.0));
        assert!(ranking.get("z").is_none());
    }
}
