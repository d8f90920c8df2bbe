// Artisan energy gained by an attempt is its success chance divided by this.
pub const ENERGY_DIVISOR: f64 = 2.15;
// Reaching this much energy guarantees the next attempt.
pub const ENERGY_THRESHOLD: f64 = 1.0;

// Every failed attempt raises the base chance by this fraction of the original chance.
pub const STREAK_BONUS_STEP: f64 = 0.1;
// The accumulated streak bonus is capped at this fraction of the original chance (1.0 = doubling).
pub const STREAK_BONUS_CAP: f64 = 1.0;

// Attempts reached with less probability mass than this are dropped from the expectations.
pub const TRUNCATION_EPSILON: f64 = 1e-7;
pub const MAX_ATTEMPTS: u32 = 100_000;

pub const PROBABILITY_SUM_TOL: f64 = 1e-9;

pub const DEFAULT_BRANCH_NAME: &str = "normal";
