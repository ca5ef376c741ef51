//! Static operator → materializer dispatch.
//!
//! Trial workers register one handler per operator they can compute and
//! hand the registry the sampled ids; nothing is looked up by string
//! evaluation.

use std::collections::HashMap;
use tracing::debug;

use af_types::{config_error, CandidateFeature, Operator, TrialParameters, TunerResult};

/// Computes one candidate feature into `T` (a frame, a column store, ...).
pub type MaterializeFn<T> = fn(&mut T, &CandidateFeature) -> TunerResult<()>;

pub struct MaterializerRegistry<T> {
    handlers: HashMap<Operator, MaterializeFn<T>>,
}

impl<T> MaterializerRegistry<T> {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    pub fn register(mut self, operator: Operator, handler: MaterializeFn<T>) -> Self {
        self.handlers.insert(operator, handler);
        self
    }

    pub fn supports(&self, operator: Operator) -> bool {
        self.handlers.contains_key(&operator)
    }

    /// Parse every id and resolve its handler. Fails on the first id that is
    /// malformed or has no handler.
    pub fn plan(&self, ids: &[String]) -> TunerResult<Vec<(MaterializeFn<T>, CandidateFeature)>> {
        ids.iter()
            .map(|id| {
                let candidate = CandidateFeature::parse(id)?;
                let handler = self
                    .handlers
                    .get(&candidate.operator())
                    .copied()
                    .ok_or_else(|| {
                        config_error!("no materializer registered for '{}'", candidate.operator())
                    })?;
                Ok((handler, candidate))
            })
            .collect()
    }

    /// Materialize a trial's selection into `target`. The whole selection is
    /// resolved before any handler runs. Returns the number of features built.
    pub fn apply(&self, target: &mut T, parameters: &TrialParameters) -> TunerResult<usize> {
        let plan = self.plan(&parameters.sample_feature)?;
        for (handler, candidate) in &plan {
            handler(target, candidate)?;
        }
        debug!("Materialized {} candidate features", plan.len());
        Ok(plan.len())
    }
}

impl<T> Default for MaterializerRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}
