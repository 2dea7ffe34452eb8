//! Deterministic financial calculations over resolved fields.
//!
//! Ratios are unrounded percentages; rounding only happens in [`RatioValue::display`].

mod collateral;
mod debt_service;
mod income;

pub use collateral::CollateralCalculator;
pub use debt_service::{
    debt_service_ratio, periodic_payment, qualifying_rate, DebtServiceCalculator, DebtServiceOutcome,
    Liability,
};
pub use income::{IncomeCalculator, IncomeSource, IncomeSummary, IncomeType, PayFrequency};

use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::aggregation::FieldSet;
use super::domain::EvidenceRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalculationKind {
    QualifyingIncome,
    QualifyingRate,
    MonthlyPayment,
    HousingCost,
    Gds,
    Tds,
    Ltv,
    Cltv,
}

impl CalculationKind {
    pub const fn ordered() -> [Self; 8] {
        [
            Self::QualifyingIncome,
            Self::QualifyingRate,
            Self::MonthlyPayment,
            Self::HousingCost,
            Self::Gds,
            Self::Tds,
            Self::Ltv,
            Self::Cltv,
        ]
    }

    pub const fn code(self) -> &'static str {
        match self {
            Self::QualifyingIncome => "qualifying_income",
            Self::QualifyingRate => "qualifying_rate",
            Self::MonthlyPayment => "monthly_payment",
            Self::HousingCost => "housing_cost",
            Self::Gds => "gds",
            Self::Tds => "tds",
            Self::Ltv => "ltv",
            Self::Cltv => "cltv",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        Self::ordered()
            .into_iter()
            .find(|kind| kind.code() == code)
    }

    /// Kinds recomputed at the stress-tested qualifying rate.
    pub const fn has_stress_variant(self) -> bool {
        matches!(
            self,
            Self::MonthlyPayment | Self::HousingCost | Self::Gds | Self::Tds
        )
    }

    pub const fn is_percentage(self) -> bool {
        matches!(
            self,
            Self::QualifyingRate | Self::Gds | Self::Tds | Self::Ltv | Self::Cltv
        )
    }
}

impl fmt::Display for CalculationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Numeric outcome of a calculation; `Undefined` is the degenerate-arithmetic sentinel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RatioValue {
    Defined { value: Decimal },
    Undefined { reason: String },
}

impl RatioValue {
    pub fn defined(value: Decimal) -> Self {
        Self::Defined { value }
    }

    pub fn undefined(reason: impl Into<String>) -> Self {
        Self::Undefined {
            reason: reason.into(),
        }
    }

    pub fn value(&self) -> Option<Decimal> {
        match self {
            RatioValue::Defined { value } => Some(*value),
            RatioValue::Undefined { .. } => None,
        }
    }

    /// Result of checked arithmetic; `None` means the decimal range was exceeded.
    pub fn checked(value: Option<Decimal>, what: &str) -> Self {
        match value {
            Some(value) => Self::defined(value),
            None => Self::undefined(format!("{what} overflowed decimal range")),
        }
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, RatioValue::Undefined { .. })
    }

    /// Presentation form: two decimals, `%` suffix for percentages.
    pub fn display(&self, percentage: bool) -> String {
        match self {
            RatioValue::Defined { value } if percentage => format!("{:.2}%", value.round_dp(2)),
            RatioValue::Defined { value } => format!("{:.2}", value.round_dp(2)),
            RatioValue::Undefined { reason } => format!("undefined ({reason})"),
        }
    }
}

/// Resolved field a calculator had to leave out, reported as a finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnusableInput {
    pub field: String,
    pub reason: String,
}

impl UnusableInput {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalculationStatus {
    Pass,
    Warning,
    Fail,
    Undefined,
    Informational,
}

impl CalculationStatus {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Pass => "pass",
            Self::Warning => "warning",
            Self::Fail => "fail",
            Self::Undefined => "undefined",
            Self::Informational => "informational",
        }
    }

    /// Compare against an upper limit; `warning` inside the margin below it.
    pub fn against_limit(value: &RatioValue, limit: Decimal, margin: Decimal) -> Self {
        match value.value() {
            None => Self::Undefined,
            Some(value) if value > limit => Self::Fail,
            Some(value) if value > limit - margin => Self::Warning,
            Some(_) => Self::Pass,
        }
    }
}

/// Named calculation with provenance back to the resolved fields that fed it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalculationResult {
    pub kind: CalculationKind,
    pub value: RatioValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stressed: Option<RatioValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<Decimal>,
    pub status: CalculationStatus,
    pub inputs: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
}

impl CalculationResult {
    pub(crate) fn informational(kind: CalculationKind, value: RatioValue, inputs: Vec<String>) -> Self {
        let status = if value.is_undefined() {
            CalculationStatus::Undefined
        } else {
            CalculationStatus::Informational
        };
        Self {
            kind,
            value,
            stressed: None,
            threshold: None,
            status,
            inputs,
            notes: Vec::new(),
        }
    }

    /// Figure used for qualification: the stress-tested value when one exists.
    pub fn qualifying_value(&self) -> &RatioValue {
        self.stressed.as_ref().unwrap_or(&self.value)
    }

    /// Evidence of every resolved field that fed this calculation.
    pub fn evidence(&self, fields: &FieldSet) -> Vec<EvidenceRef> {
        let mut evidence: Vec<EvidenceRef> = self
            .inputs
            .iter()
            .flat_map(|name| match fields.get(name) {
                Some(resolved) => resolved.evidence(),
                None => vec![EvidenceRef::Gap {
                    field_path: name.clone(),
                }],
            })
            .collect();
        evidence.sort();
        evidence.dedup();
        evidence
    }
}

/// All calculation results for one case, in calculation order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Calculations {
    results: Vec<CalculationResult>,
}

impl Calculations {
    pub fn get(&self, kind: CalculationKind) -> Option<&CalculationResult> {
        self.results.iter().find(|result| result.kind == kind)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CalculationResult> {
        self.results.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn into_vec(self) -> Vec<CalculationResult> {
        self.results
    }

    pub(crate) fn push(&mut self, result: CalculationResult) {
        debug_assert!(
            !result.inputs.is_empty(),
            "calculation {} must trace to a resolved field",
            result.kind
        );
        self.results.push(result);
    }
}

impl FromIterator<CalculationResult> for Calculations {
    fn from_iter<T: IntoIterator<Item = CalculationResult>>(iter: T) -> Self {
        let mut calculations = Calculations::default();
        for result in iter {
            calculations.push(result);
        }
        calculations
    }
}
