//! Shared types for the feature tuner: candidate ids, trial reports and errors.

pub mod candidate;
pub mod report;
pub mod errors;

pub use candidate::*;
pub use report::*;
pub use errors::*;
