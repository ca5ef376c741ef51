//! Tuner session: the warmup/search loop around estimator and sampler.

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use af_types::{
    feedback_error, CandidateFeature, FeatureImportanceReport, TrialFeedback, TrialParameters,
    TunerError, TunerResult,
};

use crate::estimator::ProbabilityEstimator;
use crate::sampler::{sample_size, SubsetSampler};
use crate::search::SearchSpaceSpec;
use crate::trial::{TrialRecord, TunerConfig};

/// Where a session is in its protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionPhase {
    /// No parameters handed out yet.
    Init,
    /// Baseline issued, waiting for the first importance report.
    Warmup,
    /// Sampling from learned weights.
    Searching,
}

/// Read-only view of a session for diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub id: Uuid,
    pub phase: SessionPhase,
    pub trial_count: u64,
    pub universe_size: usize,
    pub history_len: usize,
    pub rejected_reports: u64,
    pub baseline_reward: Option<f64>,
    pub best_trial: Option<TrialRecord>,
}

#[derive(Debug)]
struct SessionState {
    trial_count: u64,
    config: TunerConfig,
    estimator: ProbabilityEstimator,
    sampler: SubsetSampler,
    history: Vec<TrialRecord>,
    baseline_reward: Option<f64>,
    rejected_reports: u64,
}

impl SessionState {
    fn phase(&self) -> SessionPhase {
        if self.trial_count == 0 {
            SessionPhase::Init
        } else if self.estimator.is_initialized() {
            SessionPhase::Searching
        } else {
            SessionPhase::Warmup
        }
    }

    fn estimator_for(config: &TunerConfig, universe: Arc<[CandidateFeature]>) -> ProbabilityEstimator {
        ProbabilityEstimator::new(universe)
            .with_composite_penalty(config.composite_penalty)
            .with_floor(config.weight_floor)
    }
}

/// Stateful coordinator for one feature search.
///
/// All operations take `&self` and serialize on one internal lock, so a
/// session can be shared between concurrent trial workers behind an `Arc`.
#[derive(Debug)]
pub struct TunerSession {
    id: Uuid,
    state: Mutex<SessionState>,
}

impl TunerSession {
    /// Create a session with an empty universe. Call
    /// [`update_search_space`](Self::update_search_space) before sampling.
    pub fn new(config: TunerConfig) -> TunerResult<Self> {
        config.validate()?;
        let sampler = match config.seed {
            Some(seed) => SubsetSampler::seeded(seed),
            None => SubsetSampler::new(),
        };
        let empty: Arc<[CandidateFeature]> = Arc::from(Vec::new());
        let estimator = SessionState::estimator_for(&config, empty);
        let id = Uuid::new_v4();

        info!(
            "Created tuner session {id} ({}, feature_percent={}, max_sample={})",
            config.optimize_direction, config.feature_percent, config.max_sample
        );

        Ok(Self {
            id,
            state: Mutex::new(SessionState {
                trial_count: 0,
                config,
                estimator,
                sampler,
                history: Vec::new(),
                baseline_reward: None,
                rejected_reports: 0,
            }),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Compile `spec` and make it the candidate universe. Drops the learned
    /// weights; the next accepted report seeds them again. Returns the
    /// universe size. On error the previous universe stays in place.
    pub fn update_search_space(&self, spec: &SearchSpaceSpec) -> TunerResult<usize> {
        let universe: Arc<[CandidateFeature]> = spec.compile()?.into();
        let size = universe.len();

        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.estimator = SessionState::estimator_for(&state.config, universe);
        info!("Session {}: search space now has {size} candidates", self.id);
        Ok(size)
    }

    /// Hand out the next trial's feature selection.
    ///
    /// The first call returns the empty baseline selection; later calls
    /// sample from the current distribution. The trial counter advances even
    /// if sampling fails.
    pub fn generate_parameters(&self, parameter_id: u64) -> TunerResult<TrialParameters> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let first = state.trial_count == 0;
        state.trial_count += 1;
        if first {
            info!("Session {}: trial {parameter_id} is the baseline", self.id);
            return Ok(TrialParameters::baseline());
        }

        let universe = state.estimator.universe().clone();
        let k = sample_size(
            universe.len(),
            state.config.feature_percent,
            state.config.max_sample,
        );
        if k == 0 {
            debug!("Session {}: universe of {} yields an empty sample", self.id, universe.len());
            return Ok(TrialParameters::baseline());
        }

        let weights = state.estimator.normalize()?;
        let picked = state.sampler.sample(&universe, &weights, k)?;
        let sample_feature: Vec<String> = picked.iter().map(|c| c.id().to_string()).collect();

        debug!(
            "Session {}: trial {parameter_id} samples {} of {} candidates",
            self.id,
            sample_feature.len(),
            universe.len()
        );
        Ok(TrialParameters { sample_feature })
    }

    /// Take a raw trial result. A malformed result is logged, counted and
    /// returned as an error without touching the learned weights.
    pub fn receive_trial_result(
        &self,
        parameter_id: u64,
        parameters: &TrialParameters,
        result: &serde_json::Value,
    ) -> TunerResult<()> {
        match TrialFeedback::from_value(result) {
            Ok(feedback) => self.receive_feedback(parameter_id, parameters, &feedback),
            Err(e) => Err(self.reject(parameter_id, e)),
        }
    }

    /// Typed variant of [`receive_trial_result`](Self::receive_trial_result).
    pub fn receive_feedback(
        &self,
        parameter_id: u64,
        parameters: &TrialParameters,
        feedback: &TrialFeedback,
    ) -> TunerResult<()> {
        if !feedback.reward.is_finite() {
            let e = feedback_error!("reward must be finite, got {}", feedback.reward);
            return Err(self.reject(parameter_id, e));
        }
        let report = feedback
            .importance_report()
            .map_err(|e| self.reject(parameter_id, e))?;
        self.apply(parameter_id, parameters, feedback.reward, &report);
        Ok(())
    }

    fn reject(&self, parameter_id: u64, err: TunerError) -> TunerError {
        self.state.lock().rejected_reports += 1;
        warn!("Session {}: skipping update for trial {parameter_id}: {err}", self.id);
        err
    }

    fn apply(
        &self,
        parameter_id: u64,
        parameters: &TrialParameters,
        reward: f64,
        report: &FeatureImportanceReport,
    ) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let reward = state.config.optimize_direction.signed(reward);

        if !state.estimator.is_initialized() {
            state.estimator.initialize(report);
            if state.baseline_reward.is_none() {
                state.baseline_reward = Some(reward);
                info!(
                    "Session {}: initialized from trial {parameter_id} (reward {reward})",
                    self.id
                );
                return;
            }
            // A search space swapped in mid-run; this is still a regular trial.
            info!(
                "Session {}: re-initialized new search space from trial {parameter_id}",
                self.id
            );
        }

        let record = TrialRecord {
            trial_index: state.history.len() + 1,
            parameter_id,
            sampled: parameters.sample_feature.clone(),
            reward,
            received_at: Utc::now(),
        };
        state.history.push(record);
        let moved = state.estimator.update(report);
        debug!(
            "Session {}: trial {parameter_id} reward {reward}, {moved} weights updated",
            self.id
        );
    }

    pub fn phase(&self) -> SessionPhase {
        self.state.lock().phase()
    }

    /// Number of `generate_parameters` calls so far.
    pub fn trial_count(&self) -> u64 {
        self.state.lock().trial_count
    }

    pub fn universe(&self) -> Arc<[CandidateFeature]> {
        self.state.lock().estimator.universe().clone()
    }

    pub fn history(&self) -> Vec<TrialRecord> {
        self.state.lock().history.clone()
    }

    pub fn weight(&self, candidate_id: &str) -> Option<f64> {
        self.state.lock().estimator.weight(candidate_id)
    }

    /// `(candidate id, probability)` over the whole universe.
    pub fn distribution(&self) -> TunerResult<Vec<(String, f64)>> {
        let state = self.state.lock();
        let probabilities = state.estimator.normalize()?;
        Ok(state
            .estimator
            .universe()
            .iter()
            .zip(probabilities)
            .map(|(c, p)| (c.id().to_string(), p))
            .collect())
    }

    /// The `k` candidates with the highest learned weight.
    pub fn top_candidates(&self, k: usize) -> Vec<(String, f64)> {
        self.state
            .lock()
            .estimator
            .top(k)
            .into_iter()
            .map(|(c, w)| (c.id().to_string(), w))
            .collect()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let state = self.state.lock();
        let best_trial = state
            .history
            .iter()
            .max_by(|a, b| a.reward.total_cmp(&b.reward))
            .cloned();
        SessionSnapshot {
            id: self.id,
            phase: state.phase(),
            trial_count: state.trial_count,
            universe_size: state.estimator.universe().len(),
            history_len: state.history.len(),
            rejected_reports: state.rejected_reports,
            baseline_reward: state.baseline_reward,
            best_trial,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use af_types::Operator;
    use serde_json::json;
    use std::collections::HashSet;
    use std::thread;

    use crate::trial::OptimizeDirection;

    fn spec() -> SearchSpaceSpec {
        SearchSpaceSpec::new()
            .add_flat(Operator::Count, ["a", "b", "c", "d"])
            .add_pair(Operator::CrossCount, ["a", "b"], ["c", "d"])
            .add_pair(Operator::Aggregate, ["n"], ["a"])
    }

    fn session() -> TunerSession {
        let session = TunerSession::new(TunerConfig::default().with_seed(17)).unwrap();
        assert_eq!(session.update_search_space(&spec()).unwrap(), 4 + 4 + 5);
        session
    }

    fn raw_report(reward: f64) -> serde_json::Value {
        json!({
            "reward": reward,
            "feature_importance": [
                {"feature_name": "a", "feature_score": 0.4},
                {"feature_name": "b", "feature_score": 0.3},
                {"feature_name": "c", "feature_score": 0.2},
                {"feature_name": "d", "feature_score": 0.1}
            ]
        })
    }

    #[test]
    fn first_call_is_the_empty_baseline() {
        let session = session();
        assert_eq!(session.phase(), SessionPhase::Init);
        let params = session.generate_parameters(0).unwrap();
        assert_eq!(serde_json::to_value(&params).unwrap(), json!({"sample_feature": []}));
        assert_eq!(session.phase(), SessionPhase::Warmup);
    }

    #[test]
    fn baseline_ignores_prior_weights() {
        let session = session();
        session
            .receive_trial_result(99, &TrialParameters::baseline(), &raw_report(0.5))
            .unwrap();
        assert!(session.generate_parameters(0).unwrap().is_baseline());
    }

    #[test]
    fn full_protocol() {
        let session = session();
        let baseline = session.generate_parameters(0).unwrap();
        session.receive_trial_result(0, &baseline, &raw_report(0.70)).unwrap();
        assert_eq!(session.phase(), SessionPhase::Searching);
        assert_eq!(session.weight("COUNT_a"), Some(0.4));

        let params = session.generate_parameters(1).unwrap();
        // floor(13 * 0.6) = 7
        assert_eq!(params.sample_feature.len(), 7);
        let unique: HashSet<_> = params.sample_feature.iter().collect();
        assert_eq!(unique.len(), 7);

        let picked = params.sample_feature[0].clone();
        let result = json!({
            "reward": 0.75,
            "feature_importance": [{"feature_name": picked, "feature_score": 0.9}]
        });
        session.receive_trial_result(1, &params, &result).unwrap();

        assert_eq!(session.weight(&picked), Some(0.9));
        let history = session.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].trial_index, 1);
        assert_eq!(history[0].parameter_id, 1);
        assert_eq!(history[0].sampled, params.sample_feature);
        assert_eq!(history[0].reward, 0.75);

        let snapshot = session.snapshot();
        assert_eq!(snapshot.baseline_reward, Some(0.70));
        assert_eq!(snapshot.trial_count, 2);
        assert_eq!(snapshot.best_trial.unwrap().parameter_id, 1);
    }

    #[test]
    fn minimize_records_negated_reward() {
        let config = TunerConfig::new(OptimizeDirection::Minimize).with_seed(1);
        let session = TunerSession::new(config).unwrap();
        session.update_search_space(&spec()).unwrap();

        let baseline = session.generate_parameters(0).unwrap();
        session.receive_trial_result(0, &baseline, &raw_report(0.3)).unwrap();
        let params = session.generate_parameters(1).unwrap();
        session.receive_trial_result(1, &params, &raw_report(0.2)).unwrap();

        assert_eq!(session.snapshot().baseline_reward, Some(-0.3));
        assert_eq!(session.history()[0].reward, -0.2);
    }

    #[test]
    fn malformed_feedback_is_recoverable() {
        let session = session();
        session.generate_parameters(0).unwrap();
        session
            .receive_trial_result(0, &TrialParameters::baseline(), &raw_report(0.6))
            .unwrap();
        let params = session.generate_parameters(1).unwrap();
        let before = session.distribution().unwrap();

        let err = session
            .receive_trial_result(1, &params, &json!({"reward": 0.9}))
            .unwrap_err();
        assert!(matches!(err, TunerError::MalformedFeedback(_)));
        assert_eq!(session.trial_count(), 2);
        assert_eq!(session.distribution().unwrap(), before);
        assert!(session.history().is_empty());
        assert_eq!(session.snapshot().rejected_reports, 1);

        let next = session.generate_parameters(2).unwrap();
        assert_eq!(next.sample_feature.len(), 7);
        assert_eq!(session.trial_count(), 3);
    }

    #[test]
    fn malformed_baseline_report_leaves_uniform_prior() {
        let session = session();
        session.generate_parameters(0).unwrap();
        assert!(session
            .receive_trial_result(0, &TrialParameters::baseline(), &json!({"default": 1.0}))
            .is_err());
        assert_eq!(session.phase(), SessionPhase::Warmup);

        let params = session.generate_parameters(1).unwrap();
        assert_eq!(params.sample_feature.len(), 7);

        // the next good report initializes
        session.receive_trial_result(1, &params, &raw_report(0.5)).unwrap();
        assert_eq!(session.phase(), SessionPhase::Searching);
        assert!(session.history().is_empty());
    }

    #[test]
    fn typed_feedback_with_negative_score_is_rejected() {
        let session = session();
        let feedback = TrialFeedback {
            reward: 0.4,
            feature_importance: vec![af_types::FeatureScore {
                feature_name: "a".into(),
                feature_score: -1.0,
            }],
        };
        let err = session
            .receive_feedback(0, &TrialParameters::baseline(), &feedback)
            .unwrap_err();
        assert!(err.is_recoverable());
        assert_eq!(session.phase(), SessionPhase::Init);
    }

    #[test]
    fn replaying_feedback_is_idempotent() {
        let session = session();
        session.generate_parameters(0).unwrap();
        session
            .receive_trial_result(0, &TrialParameters::baseline(), &raw_report(0.6))
            .unwrap();
        let params = session.generate_parameters(1).unwrap();
        let result = json!({
            "reward": 0.7,
            "feature_importance": [{"feature_name": "CROSSCOUNT_a_c", "feature_score": 0.55}]
        });

        session.receive_trial_result(1, &params, &result).unwrap();
        let once = session.distribution().unwrap();
        session.receive_trial_result(1, &params, &result).unwrap();
        assert_eq!(session.distribution().unwrap(), once);
    }

    #[test]
    fn new_search_space_resets_weights() {
        let session = session();
        session.generate_parameters(0).unwrap();
        session
            .receive_trial_result(0, &TrialParameters::baseline(), &raw_report(0.6))
            .unwrap();
        assert_eq!(session.phase(), SessionPhase::Searching);

        let size = session
            .update_search_space(&SearchSpaceSpec::new().add_flat(Operator::Target, ["a", "b"]))
            .unwrap();
        assert_eq!(size, 2);
        assert_eq!(session.phase(), SessionPhase::Warmup);
        assert_eq!(session.weight("COUNT_a"), None);
        assert_eq!(session.trial_count(), 1);
    }

    #[test]
    fn swapping_search_space_mid_run_keeps_recording_trials() {
        let session = session();
        let baseline = session.generate_parameters(0).unwrap();
        session.receive_trial_result(0, &baseline, &raw_report(0.6)).unwrap();
        let params = session.generate_parameters(1).unwrap();
        session.receive_trial_result(1, &params, &raw_report(0.65)).unwrap();
        assert_eq!(session.history().len(), 1);

        session
            .update_search_space(&SearchSpaceSpec::new().add_flat(Operator::Target, ["a", "b", "c"]))
            .unwrap();
        let params = session.generate_parameters(2).unwrap();
        // floor(3 * 0.6) = 1
        assert_eq!(params.sample_feature.len(), 1);
        let picked = params.sample_feature[0].clone();
        let result = json!({
            "reward": 0.8,
            "feature_importance": [
                {"feature_name": "a", "feature_score": 0.3},
                {"feature_name": picked, "feature_score": 0.9}
            ]
        });
        session.receive_trial_result(2, &params, &result).unwrap();

        assert_eq!(session.phase(), SessionPhase::Searching);
        assert_eq!(session.weight(&picked), Some(0.9));
        let history = session.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].parameter_id, 2);
        assert_eq!(history[1].trial_index, 2);
        assert_eq!(session.snapshot().baseline_reward, Some(0.6));
    }

    #[test]
    fn zero_scored_columns_still_fill_the_sample() {
        let session = TunerSession::new(TunerConfig::default().with_seed(23)).unwrap();
        session
            .update_search_space(
                &SearchSpaceSpec::new().add_flat(Operator::Count, ["a", "b", "c", "d", "e"]),
            )
            .unwrap();
        session.generate_parameters(0).unwrap();
        let report = json!({
            "reward": 0.5,
            "feature_importance": [
                {"feature_name": "a", "feature_score": 0.6},
                {"feature_name": "b", "feature_score": 0.4},
                {"feature_name": "c", "feature_score": 0.0},
                {"feature_name": "d", "feature_score": 0.0},
                {"feature_name": "e", "feature_score": 0.0}
            ]
        });
        session
            .receive_trial_result(0, &TrialParameters::baseline(), &report)
            .unwrap();

        for trial in 1..=5 {
            let params = session.generate_parameters(trial).unwrap();
            assert_eq!(params.sample_feature.len(), 3);
            assert!(params.sample_feature.contains(&"COUNT_a".to_string()));
            assert!(params.sample_feature.contains(&"COUNT_b".to_string()));
        }
    }

    #[test]
    fn bad_search_space_keeps_previous_universe() {
        let session = session();
        let bad = SearchSpaceSpec::from_value(json!({"square": ["a"]})).unwrap();
        let err = session.update_search_space(&bad).unwrap_err();
        assert_eq!(err.kind(), "configuration");
        assert_eq!(session.universe().len(), 13);
    }

    #[test]
    fn max_sample_caps_the_subset() {
        let session = TunerSession::new(TunerConfig::default().with_max_sample(2).with_seed(4))
            .unwrap();
        session.update_search_space(&spec()).unwrap();
        session.generate_parameters(0).unwrap();
        assert_eq!(session.generate_parameters(1).unwrap().sample_feature.len(), 2);
    }

    #[test]
    fn empty_universe_yields_empty_samples() {
        let session = TunerSession::new(TunerConfig::default()).unwrap();
        session.generate_parameters(0).unwrap();
        assert!(session.generate_parameters(1).unwrap().is_baseline());
    }

    #[test]
    fn degenerate_weights_fail_sampling() {
        let session = session();
        session.generate_parameters(0).unwrap();
        let zeros = json!({
            "reward": 0.1,
            "feature_importance": [
                {"feature_name": "a", "feature_score": 0.0},
                {"feature_name": "b", "feature_score": 0.0},
                {"feature_name": "c", "feature_score": 0.0},
                {"feature_name": "d", "feature_score": 0.0},
                {"feature_name": "n", "feature_score": 0.0}
            ]
        });
        session.receive_trial_result(0, &TrialParameters::baseline(), &zeros).unwrap();
        let err = session.generate_parameters(1).unwrap_err();
        assert_eq!(err.kind(), "degenerate_distribution");
        assert_eq!(session.trial_count(), 2);
    }

    #[test]
    fn same_seed_same_proposals() {
        let run = || {
            let s = session();
            s.generate_parameters(0).unwrap();
            s.receive_trial_result(0, &TrialParameters::baseline(), &raw_report(0.5))
                .unwrap();
            s.generate_parameters(1).unwrap()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn top_candidates_after_initialize() {
        let session = session();
        session.generate_parameters(0).unwrap();
        session
            .receive_trial_result(0, &TrialParameters::baseline(), &raw_report(0.6))
            .unwrap();
        let top = session.top_candidates(1);
        assert_eq!(top, vec![("COUNT_a".to_string(), 0.4)]);
    }

    #[test]
    fn concurrent_workers_share_one_session() {
        let session = Arc::new(session());
        session.generate_parameters(0).unwrap();
        session
            .receive_trial_result(0, &TrialParameters::baseline(), &raw_report(0.6))
            .unwrap();

        let handles: Vec<_> = (1..=8u64)
            .map(|trial| {
                let session = Arc::clone(&session);
                thread::spawn(move || {
                    let params = session.generate_parameters(trial).unwrap();
                    let importance: Vec<_> = params
                        .sample_feature
                        .iter()
                        .map(|id| json!({"feature_name": id, "feature_score": 0.05}))
                        .collect();
                    let result = json!({"reward": trial as f64, "feature_importance": importance});
                    session.receive_trial_result(trial, &params, &result).unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(session.trial_count(), 9);
        assert_eq!(session.history().len(), 8);
        let indices: HashSet<usize> = session.history().iter().map(|r| r.trial_index).collect();
        assert_eq!(indices, (1..=8).collect::<HashSet<usize>>());
        assert_eq!(session.snapshot().best_trial.unwrap().reward, 8.0);
    }
}
