//! Trial wire types: the parameters handed to a trial worker and the
//! feedback it reports back.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;

use crate::errors::TunerResult;
use crate::feedback_error;

/// Parameters for one trial: the candidate ids the worker should materialize.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrialParameters {
    pub sample_feature: Vec<String>,
}

impl TrialParameters {
    /// Empty selection used for the baseline trial on raw columns only.
    pub fn baseline() -> Self {
        Self::default()
    }

    pub fn is_baseline(&self) -> bool {
        self.sample_feature.is_empty()
    }
}

/// One row of a feature-importance listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureScore {
    pub feature_name: String,
    #[serde(deserialize_with = "number_or_numeric_string")]
    pub feature_score: f64,
}

/// What a trial worker reports once it has trained and scored a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialFeedback {
    /// Scalar metric of the trial. Evaluators that report under `default`
    /// are accepted too.
    #[serde(alias = "default", deserialize_with = "number_or_numeric_string")]
    pub reward: f64,
    pub feature_importance: Vec<FeatureScore>,
}

impl TrialFeedback {
    /// Parse a raw result object. Any missing or mistyped field is a
    /// recoverable [`MalformedFeedback`](crate::TunerError::MalformedFeedback).
    pub fn from_value(value: &serde_json::Value) -> TunerResult<Self> {
        let feedback = Self::deserialize(value).map_err(|e| feedback_error!("{e}"))?;
        if !feedback.reward.is_finite() {
            return Err(feedback_error!("reward must be finite, got {}", feedback.reward));
        }
        Ok(feedback)
    }

    /// Validated name → score mapping.
    pub fn importance_report(&self) -> TunerResult<FeatureImportanceReport> {
        FeatureImportanceReport::from_scores(
            self.feature_importance
                .iter()
                .map(|row| (row.feature_name.clone(), row.feature_score)),
        )
    }
}

/// Per-feature usefulness scores for one trial. Keys are raw column names
/// or candidate ids; scores are finite and non-negative.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureImportanceReport {
    scores: HashMap<String, f64>,
}

impl FeatureImportanceReport {
    /// Build from `(name, score)` pairs. A name listed twice keeps its last
    /// score.
    pub fn from_scores<I, S>(scores: I) -> TunerResult<Self>
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        let mut map = HashMap::new();
        for (name, score) in scores {
            let name = name.into();
            if !score.is_finite() || score < 0.0 {
                return Err(feedback_error!(
                    "score for '{name}' must be finite and non-negative, got {score}"
                ));
            }
            map.insert(name, score);
        }
        Ok(Self { scores: map })
    }

    /// Score features from a gradient-boosting model's split counts and gain
    /// totals: `0.3 * gain% + 0.7 * split%`, zero for features never used in
    /// a split, normalized to sum to one.
    pub fn from_split_gain(names: &[String], split: &[f64], gain: &[f64]) -> TunerResult<Self> {
        if names.len() != split.len() || names.len() != gain.len() {
            return Err(feedback_error!(
                "importance columns differ in length: {} names, {} split, {} gain",
                names.len(),
                split.len(),
                gain.len()
            ));
        }
        if let Some(bad) = split.iter().chain(gain).find(|v| !v.is_finite() || **v < 0.0) {
            return Err(feedback_error!("importance values must be non-negative, got {bad}"));
        }

        let split_total: f64 = split.iter().sum();
        let gain_total: f64 = gain.iter().sum();
        let percent = |v: f64, total: f64| if total > 0.0 { 100.0 * v / total } else { 0.0 };

        let raw: Vec<f64> = split
            .iter()
            .zip(gain)
            .map(|(&s, &g)| {
                if s == 0.0 {
                    0.0
                } else {
                    0.3 * percent(g, gain_total) + 0.7 * percent(s, split_total)
                }
            })
            .collect();
        let total: f64 = raw.iter().sum();

        Self::from_scores(names.iter().zip(raw).map(|(name, score)| {
            let score = if total > 0.0 { score / total } else { 0.0 };
            (name.clone(), score)
        }))
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.scores.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.scores.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

fn number_or_numeric_string<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(f64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(v) => Ok(v),
        Raw::Text(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| serde::de::Error::custom(format!("'{s}' is not a number"))),
    }
}
