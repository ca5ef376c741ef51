//! Candidate-feature identifiers and their reversible naming grammar.
//!
//! Every candidate is named `<PREFIX>[_<stat>]_<operand>[_<operand>]`, e.g.
//! `COUNT_city`, `CROSSCOUNT_city_device`, `AGG_mean_price_city`. The
//! external materializer parses these names back, so `decompose` followed by
//! `compose` must reproduce the identifier byte for byte.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::{TunerError, TunerResult};
use crate::config_error;

/// Token separator inside a candidate identifier.
pub const SEPARATOR: char = '_';

/// Feature-generation operator kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operator {
    Count,
    CrossCount,
    Aggregate,
    NUnique,
    HistStat,
    Target,
    Embedding,
}

/// How an operator's operands are laid out in a search space spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandShape {
    /// `["a", "b", ...]`, one candidate per column.
    Flat,
    /// `[["a", ...], ["b", ...]]`, one candidate per cross pair.
    Pair,
}

impl Operator {
    pub const ALL: [Operator; 7] = [
        Operator::Count,
        Operator::CrossCount,
        Operator::Aggregate,
        Operator::NUnique,
        Operator::HistStat,
        Operator::Target,
        Operator::Embedding,
    ];

    /// Key used for this operator in a search space spec.
    pub fn spec_key(&self) -> &'static str {
        match self {
            Self::Count => "count",
            Self::CrossCount => "crosscount",
            Self::Aggregate => "aggregate",
            Self::NUnique => "nunique",
            Self::HistStat => "histstat",
            Self::Target => "target",
            Self::Embedding => "embedding",
        }
    }

    pub fn from_spec_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.spec_key() == key)
    }

    /// Leading token of candidate identifiers produced by this operator.
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Count => "COUNT",
            Self::CrossCount => "CROSSCOUNT",
            Self::Aggregate => "AGG",
            Self::NUnique => "NUNIQUE",
            Self::HistStat => "HISTSTAT",
            Self::Target => "TARGET",
            Self::Embedding => "EMBEDDING",
        }
    }

    pub fn from_prefix(prefix: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.prefix() == prefix)
    }

    pub fn shape(&self) -> OperandShape {
        match self {
            Self::Count | Self::Target | Self::Embedding => OperandShape::Flat,
            Self::CrossCount | Self::Aggregate | Self::NUnique | Self::HistStat => {
                OperandShape::Pair
            }
        }
    }

    /// Number of column operands in one candidate.
    pub fn operand_count(&self) -> usize {
        match self.shape() {
            OperandShape::Flat => 1,
            OperandShape::Pair => 2,
        }
    }

    /// Commutative operators have their operand pair sorted so that mirrored
    /// pairs name the same candidate.
    pub fn is_commutative(&self) -> bool {
        matches!(self, Self::CrossCount)
    }

    /// Whether identifiers carry a statistic token after the prefix.
    pub fn has_statistic(&self) -> bool {
        matches!(self, Self::Aggregate)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.spec_key())
    }
}

/// Group-by statistics emitted by the `aggregate` operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Statistic {
    Min,
    Max,
    Mean,
    Median,
    Var,
}

impl Statistic {
    /// Emission order used by the compiler.
    pub const ALL: [Statistic; 5] = [
        Statistic::Min,
        Statistic::Max,
        Statistic::Mean,
        Statistic::Median,
        Statistic::Var,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Min => "min",
            Self::Max => "max",
            Self::Mean => "mean",
            Self::Median => "median",
            Self::Var => "var",
        }
    }
}

impl FromStr for Statistic {
    type Err = TunerError;

    fn from_str(s: &str) -> TunerResult<Self> {
        Self::ALL
            .into_iter()
            .find(|stat| stat.as_str() == s)
            .ok_or_else(|| config_error!("unknown statistic '{s}'"))
    }
}

impl fmt::Display for Statistic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Check that a raw column name can be embedded in an identifier without
/// breaking the grammar.
pub fn validate_column(name: &str) -> TunerResult<()> {
    if name.is_empty() {
        return Err(config_error!("column names must not be empty"));
    }
    if name.contains(SEPARATOR) {
        return Err(config_error!(
            "column name '{name}' contains the reserved separator '{SEPARATOR}'"
        ));
    }
    Ok(())
}

/// One derivable column, identified by its canonical name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CandidateFeature {
    id: String,
    operator: Operator,
    operands: Vec<String>,
    statistic: Option<Statistic>,
}

impl CandidateFeature {
    /// Build a candidate from its parts, canonicalizing commutative pairs.
    pub fn new(
        operator: Operator,
        mut operands: Vec<String>,
        statistic: Option<Statistic>,
    ) -> TunerResult<Self> {
        if operands.len() != operator.operand_count() {
            return Err(config_error!(
                "{operator} takes {} operand(s), got {}",
                operator.operand_count(),
                operands.len()
            ));
        }
        for operand in &operands {
            validate_column(operand)?;
        }
        match (operator.has_statistic(), statistic) {
            (true, None) => return Err(config_error!("{operator} requires a statistic")),
            (false, Some(stat)) => {
                return Err(config_error!("{operator} does not take a statistic, got '{stat}'"))
            }
            _ => {}
        }
        if operator.is_commutative() {
            if operands[0] == operands[1] {
                return Err(config_error!(
                    "{operator} operands must differ, got '{}' twice",
                    operands[0]
                ));
            }
            operands.sort();
        }

        let mut id = String::from(operator.prefix());
        if let Some(stat) = statistic {
            id.push(SEPARATOR);
            id.push_str(stat.as_str());
        }
        for operand in &operands {
            id.push(SEPARATOR);
            id.push_str(operand);
        }

        Ok(Self {
            id,
            operator,
            operands,
            statistic,
        })
    }

    /// Parse a canonical identifier. Non-canonical spellings (a reversed
    /// commutative pair, for instance) are rejected.
    pub fn parse(id: &str) -> TunerResult<Self> {
        let mut tokens = id.split(SEPARATOR);
        let prefix = tokens.next().unwrap_or_default();
        let operator = Operator::from_prefix(prefix)
            .ok_or_else(|| config_error!("unknown operator prefix in '{id}'"))?;

        let statistic = if operator.has_statistic() {
            let token = tokens
                .next()
                .ok_or_else(|| config_error!("missing statistic in '{id}'"))?;
            Some(token.parse::<Statistic>()?)
        } else {
            None
        };

        let operands: Vec<String> = tokens.map(str::to_string).collect();
        let candidate = Self::new(operator, operands, statistic)
            .map_err(|e| config_error!("invalid candidate '{id}': {e}"))?;
        if candidate.id != id {
            return Err(config_error!(
                "'{id}' is not canonical, expected '{}'",
                candidate.id
            ));
        }
        Ok(candidate)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn operator(&self) -> Operator {
        self.operator
    }

    /// Base column tokens, without operator or statistic.
    pub fn operands(&self) -> &[String] {
        &self.operands
    }

    pub fn statistic(&self) -> Option<Statistic> {
        self.statistic
    }

    /// Derived from more than one base column.
    pub fn is_composite(&self) -> bool {
        self.operands.len() > 1
    }
}

impl fmt::Display for CandidateFeature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

impl FromStr for CandidateFeature {
    type Err = TunerError;

    fn from_str(s: &str) -> TunerResult<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for CandidateFeature {
    type Error = TunerError;

    fn try_from(value: String) -> TunerResult<Self> {
        Self::parse(&value)
    }
}

impl From<CandidateFeature> for String {
    fn from(candidate: CandidateFeature) -> Self {
        candidate.id
    }
}

/// Split an identifier into `(operator, operands, statistic)`.
pub fn decompose(id: &str) -> TunerResult<(Operator, Vec<String>, Option<Statistic>)> {
    let candidate = CandidateFeature::parse(id)?;
    Ok((candidate.operator, candidate.operands, candidate.statistic))
}

/// Inverse of [`decompose`].
pub fn compose(
    operator: Operator,
    operands: Vec<String>,
    statistic: Option<Statistic>,
) -> TunerResult<String> {
    CandidateFeature::new(operator, operands, statistic).map(String::from)
}
