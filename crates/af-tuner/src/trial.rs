//! Tuner configuration and trial history records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use af_types::{config_error, TunerError, TunerResult};

use crate::estimator::{DEFAULT_COMPOSITE_PENALTY, DEFAULT_WEIGHT_FLOOR};
use crate::sampler::{DEFAULT_FEATURE_PERCENT, DEFAULT_MAX_SAMPLE};

/// Whether the external evaluator's reward should be maximized or minimized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimizeDirection {
    Maximize,
    Minimize,
}

impl Default for OptimizeDirection {
    fn default() -> Self {
        Self::Maximize
    }
}

impl OptimizeDirection {
    /// Reward oriented so that larger is always better.
    pub fn signed(&self, reward: f64) -> f64 {
        match self {
            Self::Maximize => reward,
            Self::Minimize => -reward,
        }
    }
}

impl FromStr for OptimizeDirection {
    type Err = TunerError;

    fn from_str(s: &str) -> TunerResult<Self> {
        match s.to_ascii_lowercase().as_str() {
            "maximize" => Ok(Self::Maximize),
            "minimize" => Ok(Self::Minimize),
            other => Err(config_error!(
                "optimize mode must be 'maximize' or 'minimize', got '{other}'"
            )),
        }
    }
}

impl fmt::Display for OptimizeDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Maximize => f.write_str("maximize"),
            Self::Minimize => f.write_str("minimize"),
        }
    }
}

/// Top-level configuration for a tuner session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TunerConfig {
    pub optimize_direction: OptimizeDirection,

    /// Share of the candidate universe proposed per trial, in (0, 1].
    pub feature_percent: f64,

    /// Hard cap on candidates proposed per trial.
    pub max_sample: usize,

    /// Multiplier for candidates seeded from several scored columns.
    pub composite_penalty: f64,

    /// Minimum weight of any candidate once reported on.
    pub weight_floor: f64,

    /// Fixed sampler seed for reproducible runs.
    pub seed: Option<u64>,
}

impl Default for TunerConfig {
    fn default() -> Self {
        Self {
            optimize_direction: OptimizeDirection::Maximize,
            feature_percent: DEFAULT_FEATURE_PERCENT,
            max_sample: DEFAULT_MAX_SAMPLE,
            composite_penalty: DEFAULT_COMPOSITE_PENALTY,
            weight_floor: DEFAULT_WEIGHT_FLOOR,
            seed: None,
        }
    }
}

impl TunerConfig {
    pub fn new(direction: OptimizeDirection) -> Self {
        Self {
            optimize_direction: direction,
            ..Self::default()
        }
    }

    pub fn with_feature_percent(mut self, fraction: f64) -> Self {
        self.feature_percent = fraction;
        self
    }

    pub fn with_max_sample(mut self, cap: usize) -> Self {
        self.max_sample = cap;
        self
    }

    pub fn with_composite_penalty(mut self, penalty: f64) -> Self {
        self.composite_penalty = penalty;
        self
    }

    pub fn with_weight_floor(mut self, floor: f64) -> Self {
        self.weight_floor = floor;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn validate(&self) -> TunerResult<()> {
        if !(self.feature_percent > 0.0 && self.feature_percent <= 1.0) {
            return Err(config_error!(
                "feature_percent must be in (0, 1], got {}",
                self.feature_percent
            ));
        }
        if self.max_sample == 0 {
            return Err(config_error!("max_sample must be at least 1"));
        }
        if !(self.composite_penalty > 0.0 && self.composite_penalty <= 1.0) {
            return Err(config_error!(
                "composite_penalty must be in (0, 1], got {}",
                self.composite_penalty
            ));
        }
        if !(self.weight_floor > 0.0 && self.weight_floor.is_finite()) {
            return Err(config_error!(
                "weight_floor must be positive, got {}",
                self.weight_floor
            ));
        }
        Ok(())
    }
}

/// One evaluated trial after the baseline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialRecord {
    /// Position in the session history, starting at 1.
    pub trial_index: usize,
    /// Identifier the orchestrator used for this trial.
    pub parameter_id: u64,
    pub sampled: Vec<String>,
    /// Reward with the optimize direction applied; larger is better.
    pub reward: f64,
    pub received_at: DateTime<Utc>,
}
