//! Search space definitions and compilation into candidate features.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use tracing::debug;

use af_types::{
    config_error, validate_column, CandidateFeature, OperandShape, Operator, Statistic,
    TunerResult,
};

/// Operator-keyed description of which raw columns may be combined.
///
/// ```json
/// {
///     "count": ["city", "device"],
///     "crosscount": [["city"], ["device", "os"]],
///     "aggregate": [["price"], ["city"]]
/// }
/// ```
///
/// Keys keep the order in which they were supplied; compilation follows it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SearchSpaceSpec {
    entries: Map<String, Value>,
}

impl SearchSpaceSpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap a raw JSON value. Anything other than an object is rejected.
    pub fn from_value(value: Value) -> TunerResult<Self> {
        match value {
            Value::Object(entries) => Ok(Self { entries }),
            other => Err(config_error!(
                "search space must be a JSON object keyed by operator, got {other}"
            )),
        }
    }

    pub fn from_json(text: &str) -> TunerResult<Self> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| config_error!("search space is not valid JSON: {e}"))?;
        Self::from_value(value)
    }

    /// Add an operator that takes a flat column list (count, target, embedding).
    pub fn add_flat<I, S>(mut self, operator: Operator, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.entries
            .insert(operator.spec_key().to_string(), string_array(columns));
        self
    }

    /// Add an operator that crosses two column lists (crosscount, aggregate,
    /// nunique, histstat).
    pub fn add_pair<I, J, S, T>(mut self, operator: Operator, left: I, right: J) -> Self
    where
        I: IntoIterator<Item = S>,
        J: IntoIterator<Item = T>,
        S: Into<String>,
        T: Into<String>,
    {
        self.entries.insert(
            operator.spec_key().to_string(),
            Value::Array(vec![string_array(left), string_array(right)]),
        );
        self
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Expand the search space into its ordered, deduplicated candidate universe.
    ///
    /// Any unsupported operator or malformed operand list rejects the whole
    /// spec.
    pub fn compile(&self) -> TunerResult<Vec<CandidateFeature>> {
        let mut seen = HashSet::new();
        let mut universe = Vec::new();
        let mut push = |candidate: CandidateFeature| {
            if seen.insert(candidate.id().to_string()) {
                universe.push(candidate);
            }
        };

        for (key, value) in &self.entries {
            let operator = Operator::from_spec_key(key)
                .ok_or_else(|| config_error!("unsupported feature operator '{key}'"))?;

            match operator.shape() {
                OperandShape::Flat => {
                    for column in flat_columns(key, value)? {
                        push(CandidateFeature::new(operator, vec![column], None)?);
                    }
                }
                OperandShape::Pair => {
                    let (left, right) = pair_columns(key, value)?;
                    for i in &left {
                        for j in &right {
                            let operands = vec![i.clone(), j.clone()];
                            match operator {
                                Operator::CrossCount if i == j => continue,
                                Operator::Aggregate => {
                                    for stat in Statistic::ALL {
                                        push(CandidateFeature::new(
                                            operator,
                                            operands.clone(),
                                            Some(stat),
                                        )?);
                                    }
                                }
                                _ => push(CandidateFeature::new(operator, operands, None)?),
                            }
                        }
                    }
                }
            }
        }

        debug!(
            "Compiled {} operator(s) into {} candidate features",
            self.entries.len(),
            universe.len()
        );
        Ok(universe)
    }
}

/// Compile a search space spec. See [`SearchSpaceSpec::compile`].
pub fn compile(spec: &SearchSpaceSpec) -> TunerResult<Vec<CandidateFeature>> {
    spec.compile()
}

fn string_array<I, S>(items: I) -> Value
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    Value::Array(items.into_iter().map(|s| Value::String(s.into())).collect())
}

fn flat_columns(key: &str, value: &Value) -> TunerResult<Vec<String>> {
    let items = value
        .as_array()
        .ok_or_else(|| config_error!("'{key}' expects an array of column names"))?;
    items
        .iter()
        .map(|item| {
            let column = item
                .as_str()
                .ok_or_else(|| config_error!("'{key}' expects column names, got {item}"))?;
            validate_column(column)?;
            Ok(column.to_string())
        })
        .collect()
}

fn pair_columns(key: &str, value: &Value) -> TunerResult<(Vec<String>, Vec<String>)> {
    match value.as_array().map(Vec::as_slice) {
        Some([left, right]) => Ok((flat_columns(key, left)?, flat_columns(key, right)?)),
        _ => Err(config_error!(
            "'{key}' expects a pair of column arrays, e.g. [[\"a\"], [\"b\"]]"
        )),
    }
}
