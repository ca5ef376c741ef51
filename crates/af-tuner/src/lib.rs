//! # af-tuner
//!
//! Adaptive feature-subset search for autofe.
//!
//! Compiles an operator-keyed search space into a universe of candidate
//! features, keeps a sampling weight per candidate driven by the feature
//! importance reports of past trials, and proposes a bounded subset of
//! candidates for each new trial.

mod estimator;
mod registry;
mod sampler;
mod search;
mod session;
mod trial;

pub use estimator::{
    ProbabilityEstimator, ProbabilityTable, DEFAULT_COMPOSITE_PENALTY, DEFAULT_WEIGHT_FLOOR,
};
pub use registry::{MaterializeFn, MaterializerRegistry};
pub use sampler::{sample_size, SubsetSampler, DEFAULT_FEATURE_PERCENT, DEFAULT_MAX_SAMPLE};
pub use search::{compile, SearchSpaceSpec};
pub use session::{SessionPhase, SessionSnapshot, TunerSession};
pub use trial::{OptimizeDirection, TrialRecord, TunerConfig};
