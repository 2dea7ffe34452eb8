use std::collections::BTreeMap;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::super::aggregation::{normalize_text, FieldSet};
use super::super::config::IncomeConfig;
use super::{CalculationKind, CalculationResult, RatioValue, UnusableInput};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncomeType {
    Salary,
    Bonus,
    Commission,
    Overtime,
    SelfEmployed,
    Rental,
    Other,
}

impl IncomeType {
    pub const fn ordered() -> [Self; 7] {
        [
            Self::Salary,
            Self::Bonus,
            Self::Commission,
            Self::Overtime,
            Self::SelfEmployed,
            Self::Rental,
            Self::Other,
        ]
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Salary => "salary",
            Self::Bonus => "bonus",
            Self::Commission => "commission",
            Self::Overtime => "overtime",
            Self::SelfEmployed => "self_employed",
            Self::Rental => "rental",
            Self::Other => "other",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ordered()
            .into_iter()
            .find(|income_type| income_type.label() == label)
    }

    /// Volatile or partially-recognized income is discounted by default.
    pub fn default_factor(self) -> Decimal {
        match self {
            Self::Salary | Self::SelfEmployed | Self::Other => Decimal::ONE,
            Self::Bonus | Self::Commission | Self::Overtime | Self::Rental => dec!(0.5),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayFrequency {
    Annual,
    Monthly,
    SemiMonthly,
    BiWeekly,
    Weekly,
}

impl PayFrequency {
    pub const fn periods_per_year(self) -> u32 {
        match self {
            Self::Annual => 1,
            Self::Monthly => 12,
            Self::SemiMonthly => 24,
            Self::BiWeekly => 26,
            Self::Weekly => 52,
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match normalize_text(label).replace([' ', '-'], "_").as_str() {
            "annual" | "annually" | "yearly" => Some(Self::Annual),
            "monthly" => Some(Self::Monthly),
            "semi_monthly" | "semimonthly" => Some(Self::SemiMonthly),
            "bi_weekly" | "biweekly" => Some(Self::BiWeekly),
            "weekly" => Some(Self::Weekly),
            _ => None,
        }
    }

    /// `None` when the amount is outside the decimal range once annualised.
    pub fn to_monthly(self, amount: Decimal) -> Option<Decimal> {
        amount
            .checked_mul(Decimal::from(self.periods_per_year()))?
            .checked_div(dec!(12))
    }
}

/// One borrower income stream after conversion and adjustment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncomeSource {
    pub borrower_id: String,
    pub income_type: IncomeType,
    pub stated_amount: Decimal,
    pub frequency: PayFrequency,
    pub adjustment_factor: Decimal,
    pub qualifying_monthly: Decimal,
    pub fields: Vec<String>,
}

/// Per-source breakdown plus the qualifying total across all borrowers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IncomeSummary {
    pub sources: Vec<IncomeSource>,
    pub total_qualifying_monthly: Decimal,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unusable: Vec<UnusableInput>,
}

impl IncomeSummary {
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn input_fields(&self) -> Vec<String> {
        self.sources
            .iter()
            .flat_map(|source| source.fields.iter().cloned())
            .collect()
    }

    pub fn to_result(&self) -> Option<CalculationResult> {
        if self.is_empty() {
            return None;
        }
        Some(CalculationResult::informational(
            CalculationKind::QualifyingIncome,
            RatioValue::defined(self.total_qualifying_monthly),
            self.input_fields(),
        ))
    }
}

/// Converts `income.<borrower>.<type>.amount` fields into qualifying monthly income.
pub struct IncomeCalculator<'a> {
    config: &'a IncomeConfig,
    case_factors: &'a BTreeMap<IncomeType, Decimal>,
}

impl<'a> IncomeCalculator<'a> {
    pub fn new(config: &'a IncomeConfig, case_factors: &'a BTreeMap<IncomeType, Decimal>) -> Self {
        Self {
            config,
            case_factors,
        }
    }

    fn factor_for(&self, income_type: IncomeType) -> Decimal {
        self.case_factors
            .get(&income_type)
            .copied()
            .unwrap_or_else(|| self.config.factor_for(income_type))
    }

    pub fn calculate(&self, fields: &FieldSet) -> IncomeSummary {
        let mut sources = Vec::new();
        let mut unusable = Vec::new();
        let mut total_qualifying_monthly = Decimal::ZERO;

        for resolved in fields.with_prefix("income.") {
            let Some((borrower_id, type_label)) = parse_income_amount_field(&resolved.field) else {
                continue;
            };
            let Some(stated_amount) = resolved.value.as_numeric() else {
                warn!(field = %resolved.field, "income amount is not numeric; skipping source");
                unusable.push(UnusableInput::new(
                    resolved.field.clone(),
                    "amount is not numeric",
                ));
                continue;
            };

            let income_type = IncomeType::from_label(type_label).unwrap_or_else(|| {
                warn!(field = %resolved.field, income_type = type_label, "unknown income type; treating as other");
                IncomeType::Other
            });

            let mut source_fields = vec![resolved.field.clone()];
            let frequency_field = format!("income.{borrower_id}.{type_label}.frequency");
            let frequency = match fields.text(&frequency_field) {
                Some(label) => {
                    source_fields.push(frequency_field.clone());
                    PayFrequency::from_label(label).unwrap_or_else(|| {
                        warn!(field = %frequency_field, frequency = label, "unknown pay frequency; treating as annual");
                        PayFrequency::Annual
                    })
                }
                None => PayFrequency::Annual,
            };

            let adjustment_factor = self.factor_for(income_type);
            let Some(qualifying_monthly) = frequency
                .to_monthly(stated_amount)
                .and_then(|monthly| monthly.checked_mul(adjustment_factor))
            else {
                warn!(field = %resolved.field, "qualifying amount overflowed; skipping source");
                unusable.push(UnusableInput::new(
                    resolved.field.clone(),
                    "qualifying amount overflowed decimal range",
                ));
                continue;
            };
            let Some(total) = total_qualifying_monthly.checked_add(qualifying_monthly) else {
                warn!(field = %resolved.field, "qualifying income total overflowed; skipping source");
                unusable.push(UnusableInput::new(
                    resolved.field.clone(),
                    "qualifying income total overflowed decimal range",
                ));
                continue;
            };
            total_qualifying_monthly = total;

            sources.push(IncomeSource {
                borrower_id: borrower_id.to_string(),
                income_type,
                stated_amount,
                frequency,
                adjustment_factor,
                qualifying_monthly,
                fields: source_fields,
            });
        }

        IncomeSummary {
            sources,
            total_qualifying_monthly,
            unusable,
        }
    }
}

fn parse_income_amount_field(field: &str) -> Option<(&str, &str)> {
    let mut parts = field.split('.');
    match (parts.next(), parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some("income"), Some(borrower), Some(income_type), Some("amount"), None)
            if !borrower.is_empty() && !income_type.is_empty() =>
        {
            Some((borrower, income_type))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frequencies_convert_to_monthly() {
        assert_eq!(PayFrequency::Annual.to_monthly(dec!(120000)), Some(dec!(10000)));
        assert_eq!(PayFrequency::BiWeekly.to_monthly(dec!(1200)), Some(dec!(2600)));
        assert_eq!(PayFrequency::Weekly.to_monthly(dec!(600)), Some(dec!(2600)));
        assert_eq!(PayFrequency::Weekly.to_monthly(Decimal::MAX), None);
        assert_eq!(PayFrequency::from_label("Bi-Weekly"), Some(PayFrequency::BiWeekly));
        assert_eq!(PayFrequency::from_label("fortnightly"), None);
    }

    #[test]
    fn amount_field_names_are_parsed_strictly() {
        assert_eq!(
            parse_income_amount_field("income.b1.salary.amount"),
            Some(("b1", "salary"))
        );
        assert_eq!(parse_income_amount_field("income.b1.salary.frequency"), None);
        assert_eq!(parse_income_amount_field("income.b1.amount"), None);
    }
}
