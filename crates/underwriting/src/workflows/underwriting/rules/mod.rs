//! Versioned policy rules: typed criteria evaluated in declared order.

mod evaluator;
mod loader;

pub use evaluator::{
    system_findings, EvaluationContext, PolicyEvaluator, PolicyFinding, EXTRACTION_INCOMPLETE_RULE,
    FIELD_CONFLICT_RULE, UNUSABLE_INPUT_RULE,
};
pub use loader::{RuleCatalog, RuleSetError, RuleSetFormat, RuleSetRegistry};

use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::aggregation::normalize_text;
use super::calculations::CalculationKind;

/// `name@version` identifier of a rule-set resource.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RuleSetId {
    pub name: String,
    pub version: String,
}

impl RuleSetId {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

impl fmt::Display for RuleSetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

impl FromStr for RuleSetId {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().rsplit_once('@') {
            Some((name, version)) if !name.is_empty() && !version.is_empty() => {
                Ok(Self::new(name, version))
            }
            _ => Err(format!("rule set id '{raw}' must look like name@version")),
        }
    }
}

impl TryFrom<String> for RuleSetId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RuleSetId> for String {
    fn from(value: RuleSetId) -> Self {
        value.to_string()
    }
}

/// Finding status, ordered by escalation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingStatus {
    NotApplicable,
    Pass,
    NeedsReview,
    ExceptionRequired,
    Fail,
}

impl FindingStatus {
    /// `pass < needs_review < exception_required < fail`; `not_applicable` sits below all.
    pub const fn rank(self) -> u8 {
        match self {
            Self::NotApplicable => 0,
            Self::Pass => 1,
            Self::NeedsReview => 2,
            Self::ExceptionRequired => 3,
            Self::Fail => 4,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::NotApplicable => "not_applicable",
            Self::Pass => "pass",
            Self::NeedsReview => "needs_review",
            Self::ExceptionRequired => "exception_required",
            Self::Fail => "fail",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleCategory {
    DebtService,
    Collateral,
    Credit,
    Income,
    Property,
    Documentation,
}

/// Which value a criterion reads: a calculation (contract or stress variant) or a field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum InputRef {
    Calculation {
        kind: CalculationKind,
        stressed: bool,
    },
    Field(String),
}

impl fmt::Display for InputRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputRef::Calculation {
                kind,
                stressed: false,
            } => write!(f, "calc:{kind}"),
            InputRef::Calculation {
                kind,
                stressed: true,
            } => write!(f, "calc:{kind}@stress"),
            InputRef::Field(name) => write!(f, "field:{name}"),
        }
    }
}

impl FromStr for InputRef {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let raw = raw.trim();
        if let Some(name) = raw.strip_prefix("field:") {
            if name.is_empty() || name.contains(char::is_whitespace) {
                return Err(format!("field reference '{raw}' has an invalid name"));
            }
            return Ok(InputRef::Field(name.to_string()));
        }

        if let Some(target) = raw.strip_prefix("calc:") {
            let (code, stressed) = match target.split_once('@') {
                Some((code, "stress")) => (code, true),
                Some((_, variant)) => {
                    return Err(format!("unknown calculation variant '@{variant}' in '{raw}'"))
                }
                None => (target, false),
            };
            let kind = CalculationKind::from_code(code)
                .ok_or_else(|| format!("unknown calculation '{code}' in '{raw}'"))?;
            if stressed && !kind.has_stress_variant() {
                return Err(format!("calculation '{code}' has no stress-tested variant"));
            }
            return Ok(InputRef::Calculation { kind, stressed });
        }

        Err(format!(
            "input reference '{raw}' must start with 'calc:' or 'field:'"
        ))
    }
}

impl TryFrom<String> for InputRef {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<InputRef> for String {
    fn from(value: InputRef) -> Self {
        value.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Comparison {
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
}

impl Comparison {
    pub fn holds(self, observed: Decimal, threshold: Decimal) -> bool {
        match self {
            Self::Lt => observed < threshold,
            Self::Le => observed <= threshold,
            Self::Gt => observed > threshold,
            Self::Ge => observed >= threshold,
            Self::Eq => observed == threshold,
            Self::Ne => observed != threshold,
        }
    }

    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Eq => "==",
            Self::Ne => "!=",
        }
    }
}

/// Closed set of side-effect-free predicate shapes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
pub enum Predicate {
    Compare {
        input: InputRef,
        op: Comparison,
        value: Decimal,
    },
    Between {
        input: InputRef,
        min: Decimal,
        max: Decimal,
        #[serde(default)]
        min_exclusive: bool,
        #[serde(default)]
        max_exclusive: bool,
    },
    Flag {
        input: InputRef,
        expected: bool,
    },
    OneOf {
        input: InputRef,
        values: Vec<String>,
    },
    Always,
}

impl Predicate {
    pub fn input(&self) -> Option<&InputRef> {
        match self {
            Predicate::Compare { input, .. }
            | Predicate::Between { input, .. }
            | Predicate::Flag { input, .. }
            | Predicate::OneOf { input, .. } => Some(input),
            Predicate::Always => None,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Predicate::Compare { input, op, value } => {
                format!("{input} {} {}", op.symbol(), value.normalize())
            }
            Predicate::Between {
                input,
                min,
                max,
                min_exclusive,
                max_exclusive,
            } => format!(
                "{} {} {input} {} {}",
                min.normalize(),
                if *min_exclusive { "<" } else { "<=" },
                if *max_exclusive { "<" } else { "<=" },
                max.normalize()
            ),
            Predicate::Flag { input, expected } => format!("{input} is {expected}"),
            Predicate::OneOf { input, values } => {
                format!("{input} in [{}]", values.join(", "))
            }
            Predicate::Always => "otherwise".to_string(),
        }
    }

    pub(crate) fn one_of_matches(values: &[String], observed: &str) -> bool {
        let observed = normalize_text(observed);
        values
            .iter()
            .any(|candidate| normalize_text(candidate) == observed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Criterion {
    pub id: String,
    #[serde(default)]
    pub description: String,
    pub when: Predicate,
    pub status: FindingStatus,
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remedial_action: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyRule {
    pub id: String,
    pub category: RuleCategory,
    pub name: String,
    #[serde(default)]
    pub rationale: String,
    pub criteria: Vec<Criterion>,
}

impl PolicyRule {
    /// Distinct inputs referenced by any criterion, in declaration order.
    pub fn inputs(&self) -> Vec<&InputRef> {
        let mut inputs: Vec<&InputRef> = Vec::new();
        for input in self.criteria.iter().filter_map(|criterion| criterion.when.input()) {
            if !inputs.contains(&input) {
                inputs.push(input);
            }
        }
        inputs
    }
}

/// Validated, immutable rule set.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleSet {
    id: RuleSetId,
    description: String,
    rules: Vec<PolicyRule>,
}

impl RuleSet {
    pub fn id(&self) -> &RuleSetId {
        &self.id
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn rules(&self) -> &[PolicyRule] {
        &self.rules
    }
}
