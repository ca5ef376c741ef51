//! Weighted subset sampling without replacement.

use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::fmt;

use af_types::{degenerate_error, CandidateFeature, TunerError, TunerResult};

/// Upper bound on candidates materialized per trial.
pub const DEFAULT_MAX_SAMPLE: usize = 128;

/// Share of the universe proposed per trial, before the cap.
pub const DEFAULT_FEATURE_PERCENT: f64 = 0.6;

/// `min(cap, floor(universe_len * fraction))`
pub fn sample_size(universe_len: usize, fraction: f64, cap: usize) -> usize {
    ((universe_len as f64 * fraction).floor() as usize).min(cap)
}

/// Draws distinct candidates with probability proportional to their weight.
///
/// Uses the Efraimidis–Spirakis reservoir: each candidate gets the key
/// `ln(u) / w` for a uniform `u` in (0, 1] and the `k` largest keys win. The
/// result is ordered as sequential draws would be. Zero-weight candidates
/// only appear once every positive-weight candidate has been drawn, in
/// uniformly random order.
#[derive(Clone)]
pub struct SubsetSampler {
    rng: ChaCha8Rng,
    seed: Option<u64>,
}

impl SubsetSampler {
    /// Sampler seeded from the thread-local generator.
    pub fn new() -> Self {
        Self {
            rng: ChaCha8Rng::from_rng(&mut rand::rng()),
            seed: None,
        }
    }

    /// Reproducible sampler.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            seed: Some(seed),
        }
    }

    pub fn seed(&self) -> Option<u64> {
        self.seed
    }

    /// Pick `k` distinct indices into `weights`.
    ///
    /// Weights need not be normalized but must be finite and non-negative,
    /// with a positive sum.
    pub fn sample_indices(&mut self, weights: &[f64], k: usize) -> TunerResult<Vec<usize>> {
        if k > weights.len() {
            return Err(TunerError::InsufficientCandidates {
                requested: k,
                available: weights.len(),
            });
        }
        if let Some((i, w)) = weights
            .iter()
            .enumerate()
            .find(|(_, w)| !w.is_finite() || **w < 0.0)
        {
            return Err(degenerate_error!("weight {w} at position {i} is not a valid probability"));
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let total: f64 = weights.iter().sum();
        if total <= 0.0 {
            return Err(degenerate_error!("all {} weights are zero", weights.len()));
        }
        let mut keyed: Vec<(f64, usize)> = weights
            .iter()
            .enumerate()
            .filter(|(_, w)| **w > 0.0)
            .map(|(i, w)| {
                let u = 1.0 - self.rng.random::<f64>();
                (u.ln() / w, i)
            })
            .collect();
        keyed.sort_by(|a, b| b.0.total_cmp(&a.0));
        let mut picks: Vec<usize> = keyed.into_iter().take(k).map(|(_, i)| i).collect();

        let missing = k - picks.len();
        if missing > 0 {
            let mut zeros: Vec<usize> = weights
                .iter()
                .enumerate()
                .filter(|(_, w)| **w == 0.0)
                .map(|(i, _)| i)
                .collect();
            zeros.shuffle(&mut self.rng);
            picks.extend(zeros.into_iter().take(missing));
        }
        Ok(picks)
    }

    /// Pick `k` distinct candidates. `weights` is aligned with `universe`.
    pub fn sample<'a>(
        &mut self,
        universe: &'a [CandidateFeature],
        weights: &[f64],
        k: usize,
    ) -> TunerResult<Vec<&'a CandidateFeature>> {
        if weights.len() != universe.len() {
            return Err(degenerate_error!(
                "{} weights for {} candidates",
                weights.len(),
                universe.len()
            ));
        }
        let picks = self.sample_indices(weights, k)?;
        Ok(picks.into_iter().map(|i| &universe[i]).collect())
    }
}

impl Default for SubsetSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SubsetSampler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubsetSampler")
            .field("seed", &self.seed)
            .finish_non_exhaustive()
    }
}
