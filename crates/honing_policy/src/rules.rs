use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::data::{
    ENERGY_DIVISOR, ENERGY_THRESHOLD, MAX_ATTEMPTS, STREAK_BONUS_CAP, STREAK_BONUS_STEP,
    TRUNCATION_EPSILON,
};

#[derive(Debug, Error, PartialEq)]
pub enum RulesError {
    #[error("{field} must be finite and non-negative (got {value})")]
    NegativeValue { field: &'static str, value: f64 },
    #[error("energy divisor must be finite and positive (got {value})")]
    InvalidEnergyDivisor { value: f64 },
    #[error("truncation epsilon must be in (0, 1) (got {value})")]
    InvalidTruncationEpsilon { value: f64 },
    #[error("max attempts must be at least 1")]
    ZeroMaxAttempts,
}

/// Game-mechanic parameters of the attempt process.
///
/// `energy_divisor = None` turns artisan energy off entirely, and a zero
/// `streak_bonus_step` removes the failure-streak bonus. Together they reduce
/// the process to a plain geometric trial, which is what the synthetic test
/// stages use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HoningRules {
    pub streak_bonus_step: f64,
    pub streak_bonus_cap: f64,
    pub energy_divisor: Option<f64>,
    pub truncation_epsilon: f64,
    /// Loop guard for rules without artisan energy. With energy the walk is
    /// bounded by [`HoningRules::pity_attempt_bound`] instead.
    pub max_attempts: u32,
}

impl Default for HoningRules {
    fn default() -> Self {
        Self {
            streak_bonus_step: STREAK_BONUS_STEP,
            streak_bonus_cap: STREAK_BONUS_CAP,
            energy_divisor: Some(ENERGY_DIVISOR),
            truncation_epsilon: TRUNCATION_EPSILON,
            max_attempts: MAX_ATTEMPTS,
        }
    }
}

impl HoningRules {
    pub fn without_streak_or_pity() -> Self {
        Self {
            streak_bonus_step: 0.0,
            streak_bonus_cap: 0.0,
            energy_divisor: None,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), RulesError> {
        if !self.streak_bonus_step.is_finite() || self.streak_bonus_step < 0.0 {
            return Err(RulesError::NegativeValue {
                field: "streak_bonus_step",
                value: self.streak_bonus_step,
            });
        }
        if !self.streak_bonus_cap.is_finite() || self.streak_bonus_cap < 0.0 {
            return Err(RulesError::NegativeValue {
                field: "streak_bonus_cap",
                value: self.streak_bonus_cap,
            });
        }
        if let Some(divisor) = self.energy_divisor {
            if !divisor.is_finite() || divisor <= 0.0 {
                return Err(RulesError::InvalidEnergyDivisor { value: divisor });
            }
        }
        if !self.truncation_epsilon.is_finite()
            || self.truncation_epsilon <= 0.0
            || self.truncation_epsilon >= 1.0
        {
            return Err(RulesError::InvalidTruncationEpsilon {
                value: self.truncation_epsilon,
            });
        }
        if self.max_attempts == 0 {
            return Err(RulesError::ZeroMaxAttempts);
        }
        Ok(())
    }

    pub fn has_pity(&self) -> bool {
        self.energy_divisor.is_some()
    }

    /// Base chance on attempt `attempt` (1-based) after the failure-streak bonus.
    pub fn base_probability_at(&self, base_probability: f64, attempt: u32) -> f64 {
        let failures = attempt.saturating_sub(1) as f64;
        let bonus = (failures * self.streak_bonus_step * base_probability)
            .min(self.streak_bonus_cap * base_probability);
        base_probability + bonus
    }

    pub fn energy_gain(&self, total_probability: f64) -> f64 {
        self.energy_divisor
            .map_or(0.0, |divisor| total_probability / divisor)
    }

    pub fn is_guaranteed(&self, energy: f64) -> bool {
        self.has_pity() && energy >= ENERGY_THRESHOLD
    }

    /// Upper bound on the attempts needed to reach the guaranteed attempt when
    /// no attempt succeeds with less than `min_probability`.
    ///
    /// Every failed attempt adds at least `min_probability / divisor` energy,
    /// so the threshold is crossed after `ceil(threshold * divisor / min)`
    /// failures. One more attempt is the guaranteed one and one more absorbs
    /// rounding in the energy sum.
    pub fn pity_attempt_bound(&self, min_probability: f64) -> Option<u32> {
        let divisor = self.energy_divisor?;
        if min_probability.is_nan() || min_probability <= 0.0 {
            return None;
        }
        let failures = (ENERGY_THRESHOLD * divisor / min_probability).ceil() + 2.0;
        if failures >= u32::MAX as f64 {
            Some(u32::MAX)
        } else {
            Some(failures as u32)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn streak_bonus_caps_at_double_base() {
        let rules = HoningRules::default();
        assert_eq!(rules.base_probability_at(0.1, 1), 0.1);
        assert!((rules.base_probability_at(0.1, 2) - 0.11).abs() < 1e-12);
        assert!((rules.base_probability_at(0.1, 11) - 0.2).abs() < 1e-12);
        assert!((rules.base_probability_at(0.1, 40) - 0.2).abs() < 1e-12);
    }

    #[test]
    fn synthetic_rules_have_no_bonus_or_energy() {
        let rules = HoningRules::without_streak_or_pity();
        assert_eq!(rules.base_probability_at(0.3, 25), 0.3);
        assert_eq!(rules.energy_gain(0.5), 0.0);
        assert!(!rules.is_guaranteed(5.0));
        assert!(rules.validate().is_ok());
    }

    #[test]
    fn energy_accrues_proportionally() {
        let rules = HoningRules::default();
        assert!((rules.energy_gain(2.15) - 1.0).abs() < 1e-12);
        assert!(rules.is_guaranteed(1.0));
        assert!(!rules.is_guaranteed(0.999));
    }

    #[test]
    fn pity_bound_follows_slowest_energy_gain() {
        let rules = HoningRules::default();
        assert_eq!(rules.pity_attempt_bound(1.0), Some(5));
        assert_eq!(rules.pity_attempt_bound(0.1), Some(24));
        assert_eq!(rules.pity_attempt_bound(1e-5), Some(215_002));
        assert_eq!(rules.pity_attempt_bound(0.0), None);
        assert_eq!(
            HoningRules::without_streak_or_pity().pity_attempt_bound(0.1),
            None
        );
    }

    #[test]
    fn rejects_bad_parameters() {
        let rules = HoningRules {
            energy_divisor: Some(0.0),
            ..HoningRules::default()
        };
        assert_eq!(
            rules.validate(),
            Err(RulesError::InvalidEnergyDivisor { value: 0.0 })
        );

        let rules = HoningRules {
            truncation_epsilon: 1.0,
            ..HoningRules::default()
        };
        assert!(matches!(
            rules.validate(),
            Err(RulesError::InvalidTruncationEpsilon { .. })
        ));

        let rules = HoningRules {
            streak_bonus_step: -0.1,
            ..HoningRules::default()
        };
        assert!(matches!(
            rules.validate(),
            Err(RulesError::NegativeValue {
                field: "streak_bonus_step",
                ..
            })
        ));

        let rules = HoningRules {
            max_attempts: 0,
            ..HoningRules::default()
        };
        assert_eq!(rules.validate(), Err(RulesError::ZeroMaxAttempts));
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let rules: HoningRules = serde_json::from_str(r#"{"streakBonusStep": 0.05}"#).unwrap();
        assert_eq!(rules.streak_bonus_step, 0.05);
        assert_eq!(rules.energy_divisor, Some(ENERGY_DIVISOR));
        assert_eq!(rules.max_attempts, MAX_ATTEMPTS);
    }
}
