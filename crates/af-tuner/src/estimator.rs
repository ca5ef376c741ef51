//! Per-candidate sampling weights learned from feature importance reports.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use af_types::{degenerate_error, CandidateFeature, FeatureImportanceReport, TunerResult};

/// Multiplier applied to candidates built from more than one scored column.
pub const DEFAULT_COMPOSITE_PENALTY: f64 = 0.9;

/// Weight given to candidates no report has said anything about yet.
pub const DEFAULT_WEIGHT_FLOOR: f64 = 1e-6;

/// Non-negative weight per candidate, aligned with the compiled universe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbabilityTable {
    weights: Vec<f64>,
}

impl ProbabilityTable {
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    /// Weights scaled to sum to one.
    pub fn normalize(&self) -> TunerResult<Vec<f64>> {
        let total: f64 = self.weights.iter().sum();
        if !total.is_finite() || total <= 0.0 {
            return Err(degenerate_error!(
                "weights over {} candidates sum to {total}",
                self.weights.len()
            ));
        }
        Ok(self.weights.iter().map(|w| w / total).collect())
    }
}

/// Bandit-style value estimate for every candidate in a universe.
///
/// The first report (on raw columns) seeds each candidate from the scores of
/// its operand columns; later reports overwrite the weight of each candidate
/// they mention and leave the rest untouched.
#[derive(Debug, Clone)]
pub struct ProbabilityEstimator {
    universe: Arc<[CandidateFeature]>,
    index: HashMap<String, usize>,
    composite_penalty: f64,
    floor: f64,
    table: Option<ProbabilityTable>,
}

impl ProbabilityEstimator {
    pub fn new(universe: Arc<[CandidateFeature]>) -> Self {
        let index = universe
            .iter()
            .enumerate()
            .map(|(i, c)| (c.id().to_string(), i))
            .collect();
        Self {
            universe,
            index,
            composite_penalty: DEFAULT_COMPOSITE_PENALTY,
            floor: DEFAULT_WEIGHT_FLOOR,
            table: None,
        }
    }

    pub fn with_composite_penalty(mut self, penalty: f64) -> Self {
        self.composite_penalty = penalty;
        self
    }

    pub fn with_floor(mut self, floor: f64) -> Self {
        self.floor = floor;
        self
    }

    pub fn universe(&self) -> &Arc<[CandidateFeature]> {
        &self.universe
    }

    pub fn table(&self) -> Option<&ProbabilityTable> {
        self.table.as_ref()
    }

    pub fn is_initialized(&self) -> bool {
        self.table.is_some()
    }

    /// Seed every candidate from a report on raw columns.
    ///
    /// One scored operand gives its score; several give their mean times the
    /// composite penalty; none gives the floor. Replaces any existing table.
    pub fn initialize(&mut self, report: &FeatureImportanceReport) {
        let weights = self
            .universe
            .iter()
            .map(|candidate| {
                let scores: Vec<f64> = candidate
                    .operands()
                    .iter()
                    .filter_map(|operand| report.get(operand))
                    .collect();
                match scores.len() {
                    0 => self.floor,
                    1 => scores[0],
                    n => scores.iter().sum::<f64>() / n as f64 * self.composite_penalty,
                }
            })
            .collect();

        self.table = Some(ProbabilityTable { weights });
        debug!(
            "Initialized probability table for {} candidates from {} scored columns",
            self.universe.len(),
            report.len()
        );
    }

    /// Overwrite the weight of every candidate the report names, floored at
    /// the minimum weight. Returns how many candidates moved.
    ///
    /// Called before [`initialize`](Self::initialize), it starts from a table
    /// of floor weights.
    pub fn update(&mut self, report: &FeatureImportanceReport) -> usize {
        let floor = self.floor;
        let len = self.universe.len();
        let table = self.table.get_or_insert_with(|| ProbabilityTable {
            weights: vec![floor; len],
        });

        let mut updated = 0;
        for (name, score) in report.iter() {
            if let Some(&idx) = self.index.get(name) {
                table.weights[idx] = score.max(floor);
                updated += 1;
            }
        }
        debug!("Updated {updated} of {len} candidate weights");
        updated
    }

    /// Current sampling distribution. Before any report it is uniform over
    /// the universe.
    pub fn normalize(&self) -> TunerResult<Vec<f64>> {
        match &self.table {
            Some(table) => table.normalize(),
            None if self.universe.is_empty() => {
                Err(degenerate_error!("no candidates to build a distribution over"))
            }
            None => {
                let p = 1.0 / self.universe.len() as f64;
                Ok(vec![p; self.universe.len()])
            }
        }
    }

    pub fn weight(&self, id: &str) -> Option<f64> {
        let idx = *self.index.get(id)?;
        self.table.as_ref().map(|t| t.weights[idx])
    }

    /// Highest-weight candidates, ties kept in universe order.
    pub fn top(&self, k: usize) -> Vec<(&CandidateFeature, f64)> {
        let Some(table) = &self.table else {
            return Vec::new();
        };
        let mut ranked: Vec<(&CandidateFeature, f64)> =
            self.universe.iter().zip(table.weights.iter().copied()).collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        ranked.truncate(k);
        ranked
    }
}
