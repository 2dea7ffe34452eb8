use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, MathematicalOps};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::super::aggregation::FieldSet;
use super::super::config::DebtServiceConfig;
use super::income::{IncomeSummary, PayFrequency};
use super::{CalculationKind, CalculationResult, CalculationStatus, RatioValue, UnusableInput};

const HUNDRED: Decimal = dec!(100);
const MONTHS_PER_YEAR: Decimal = dec!(12);

/// Monthly obligation outside the subject property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Liability {
    pub id: String,
    pub kind: Option<String>,
    pub monthly_payment: Decimal,
    pub joint: bool,
    pub fields: Vec<String>,
}

/// Liabilities found on the case plus the payment, housing and ratio results.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DebtServiceOutcome {
    pub liabilities: Vec<Liability>,
    pub results: Vec<CalculationResult>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unusable: Vec<UnusableInput>,
}

/// `max(contract_rate + buffer, floor)`, all annual percentages. `None` when
/// the sum leaves the decimal range.
pub fn qualifying_rate(contract_rate: Decimal, buffer: Decimal, floor: Decimal) -> Option<Decimal> {
    contract_rate
        .checked_add(buffer)
        .map(|stressed| stressed.max(floor))
}

/// Level payment per period: `P * r(1+r)^n / ((1+r)^n - 1)`, or `P / n` at a zero rate.
pub fn periodic_payment(
    principal: Decimal,
    annual_rate: Decimal,
    periods_per_year: u32,
    total_periods: u32,
) -> RatioValue {
    if total_periods == 0 {
        return RatioValue::undefined("amortization has zero payment periods");
    }
    if periods_per_year == 0 {
        return RatioValue::undefined("payment frequency has zero periods per year");
    }

    let n = Decimal::from(total_periods);
    let Some(rate) = annual_rate
        .checked_div(HUNDRED)
        .and_then(|rate| rate.checked_div(Decimal::from(periods_per_year)))
    else {
        return RatioValue::undefined("periodic rate overflowed decimal range");
    };
    if rate.is_zero() {
        return RatioValue::checked(principal.checked_div(n), "payment");
    }

    let growth = match Decimal::ONE
        .checked_add(rate)
        .and_then(|base| base.checked_powi(i64::from(total_periods)))
    {
        Some(growth) => growth,
        None => return RatioValue::undefined("compounding overflowed decimal range"),
    };
    let Some(denominator) = growth.checked_sub(Decimal::ONE) else {
        return RatioValue::undefined("compounding overflowed decimal range");
    };
    if denominator.is_zero() {
        return RatioValue::undefined("rate too small to amortize");
    }

    RatioValue::checked(
        principal
            .checked_mul(rate)
            .and_then(|value| value.checked_mul(growth))
            .and_then(|value| value.checked_div(denominator)),
        "payment",
    )
}

/// Cost divided by qualifying monthly income, as a percentage.
pub fn debt_service_ratio(monthly_cost: Decimal, qualifying_income: Decimal) -> RatioValue {
    if qualifying_income <= Decimal::ZERO {
        return RatioValue::undefined("qualifying monthly income is zero");
    }
    RatioValue::checked(
        monthly_cost
            .checked_div(qualifying_income)
            .and_then(|ratio| ratio.checked_mul(HUNDRED)),
        "debt service ratio",
    )
}

fn add_costs(cost: &RatioValue, extra: &RatioValue) -> RatioValue {
    match (cost, extra) {
        (RatioValue::Defined { value }, RatioValue::Defined { value: extra }) => {
            RatioValue::checked(value.checked_add(*extra), "monthly cost")
        }
        (RatioValue::Undefined { .. }, _) => cost.clone(),
        (_, undefined) => undefined.clone(),
    }
}

struct LoanTerms {
    principal: Decimal,
    contract_rate: Decimal,
    frequency: PayFrequency,
    total_periods: u32,
    fields: Vec<String>,
}

struct PropertyCosts {
    monthly: RatioValue,
    fields: Vec<String>,
    notes: Vec<String>,
}

pub struct DebtServiceCalculator<'a> {
    config: &'a DebtServiceConfig,
}

impl<'a> DebtServiceCalculator<'a> {
    pub fn new(config: &'a DebtServiceConfig) -> Self {
        Self { config }
    }

    pub fn calculate(&self, fields: &FieldSet, income: &IncomeSummary) -> DebtServiceOutcome {
        let (liabilities, unusable) = collect_liabilities(fields);
        let Some(loan) = loan_terms(fields) else {
            return DebtServiceOutcome {
                liabilities,
                results: Vec::new(),
                unusable,
            };
        };

        let stress_rate = RatioValue::checked(
            qualifying_rate(
                loan.contract_rate,
                self.config.stress_buffer,
                self.config.stress_floor,
            ),
            "qualifying rate",
        );
        let rate_result = CalculationResult::informational(
            CalculationKind::QualifyingRate,
            stress_rate.clone(),
            vec!["loan.contract_rate".to_string()],
        );

        let periods_per_year = loan.frequency.periods_per_year();
        let to_monthly = |payment: RatioValue| match payment {
            RatioValue::Defined { value } => RatioValue::checked(
                value
                    .checked_mul(Decimal::from(periods_per_year))
                    .and_then(|annual| annual.checked_div(MONTHS_PER_YEAR)),
                "monthly payment",
            ),
            undefined => undefined,
        };
        let contract_payment = to_monthly(periodic_payment(
            loan.principal,
            loan.contract_rate,
            periods_per_year,
            loan.total_periods,
        ));
        let stressed_payment = match stress_rate.value() {
            Some(rate) => to_monthly(periodic_payment(
                loan.principal,
                rate,
                periods_per_year,
                loan.total_periods,
            )),
            None => stress_rate.clone(),
        };

        let mut payment_result = CalculationResult::informational(
            CalculationKind::MonthlyPayment,
            contract_payment.clone(),
            loan.fields.clone(),
        );
        payment_result.stressed = Some(stressed_payment.clone());
        if stressed_payment.is_undefined() {
            payment_result.status = CalculationStatus::Undefined;
        }

        let property = self.property_costs(fields);
        let housing = add_costs(&contract_payment, &property.monthly);
        let housing_stressed = add_costs(&stressed_payment, &property.monthly);

        let mut housing_inputs = loan.fields.clone();
        housing_inputs.extend(property.fields.iter().cloned());
        let mut housing_result = CalculationResult::informational(
            CalculationKind::HousingCost,
            housing.clone(),
            housing_inputs.clone(),
        );
        housing_result.stressed = Some(housing_stressed.clone());
        housing_result.notes = property.notes.clone();
        if housing_stressed.is_undefined() {
            housing_result.status = CalculationStatus::Undefined;
        }

        let liability_total = RatioValue::checked(
            liabilities
                .iter()
                .try_fold(Decimal::ZERO, |total, liability| {
                    let payment = if liability.joint {
                        liability
                            .monthly_payment
                            .checked_mul(self.config.joint_liability_share)?
                    } else {
                        liability.monthly_payment
                    };
                    total.checked_add(payment)
                }),
            "liability total",
        );

        let qualifying_income = if income.is_empty() {
            None
        } else {
            Some(income.total_qualifying_monthly)
        };
        let ratio = |cost: &RatioValue| match (cost, qualifying_income) {
            (RatioValue::Undefined { reason }, _) => RatioValue::undefined(reason.clone()),
            (_, None) => RatioValue::undefined("no qualifying income sources"),
            (RatioValue::Defined { value }, Some(monthly_income)) => {
                debt_service_ratio(*value, monthly_income)
            }
        };
        let with_liabilities = |cost: &RatioValue| add_costs(cost, &liability_total);

        let mut ratio_inputs = housing_inputs;
        ratio_inputs.extend(income.input_fields());

        let gds = self.ratio_result(
            CalculationKind::Gds,
            ratio(&housing),
            ratio(&housing_stressed),
            self.config.gds_limit,
            ratio_inputs.clone(),
        );

        let mut tds_inputs = ratio_inputs;
        tds_inputs.extend(
            liabilities
                .iter()
                .flat_map(|liability| liability.fields.iter().cloned()),
        );
        let mut tds = self.ratio_result(
            CalculationKind::Tds,
            ratio(&with_liabilities(&housing)),
            ratio(&with_liabilities(&housing_stressed)),
            self.config.tds_limit,
            tds_inputs,
        );
        tds.notes = unusable
            .iter()
            .map(|input| format!("{} left out: {}", input.field, input.reason))
            .collect();

        debug!(
            contract_rate = %loan.contract_rate,
            qualifying_rate = %stress_rate.display(true),
            gds = %gds.qualifying_value().display(true),
            tds = %tds.qualifying_value().display(true),
            "debt service calculated"
        );

        DebtServiceOutcome {
            liabilities,
            results: vec![rate_result, payment_result, housing_result, gds, tds],
            unusable,
        }
    }

    fn ratio_result(
        &self,
        kind: CalculationKind,
        contract: RatioValue,
        stressed: RatioValue,
        limit: Decimal,
        inputs: Vec<String>,
    ) -> CalculationResult {
        let status = CalculationStatus::against_limit(&stressed, limit, self.config.warning_margin);
        CalculationResult {
            kind,
            value: contract,
            stressed: Some(stressed),
            threshold: Some(limit),
            status,
            inputs,
            notes: Vec::new(),
        }
    }

    /// Taxes/12 + heating + configured share of shared-building fees.
    fn property_costs(&self, fields: &FieldSet) -> PropertyCosts {
        let mut costs = PropertyCosts {
            monthly: RatioValue::defined(Decimal::ZERO),
            fields: Vec::new(),
            notes: Vec::new(),
        };

        let parts = [
            ("property.annual_taxes", Decimal::ONE, MONTHS_PER_YEAR),
            ("property.monthly_heating", Decimal::ONE, Decimal::ONE),
            (
                "property.monthly_condo_fees",
                self.config.condo_fee_fraction,
                Decimal::ONE,
            ),
        ];
        for (field, weight, divisor) in parts {
            match fields.numeric(field) {
                Some(amount) => {
                    let share = amount
                        .checked_mul(weight)
                        .and_then(|weighted| weighted.checked_div(divisor));
                    costs.monthly = add_costs(&costs.monthly, &RatioValue::checked(share, field));
                    costs.fields.push(field.to_string());
                }
                None => costs.notes.push(format!("{field} not provided; counted as 0")),
            }
        }

        costs
    }
}

fn loan_terms(fields: &FieldSet) -> Option<LoanTerms> {
    let principal = fields.numeric("loan.amount");
    let contract_rate = fields.numeric("loan.contract_rate");
    let months = fields.numeric("loan.amortization_months");

    let (Some(principal), Some(contract_rate), Some(months)) = (principal, contract_rate, months)
    else {
        debug!("loan terms incomplete; skipping debt service calculation");
        return None;
    };

    let mut loan_fields = vec![
        "loan.amount".to_string(),
        "loan.contract_rate".to_string(),
        "loan.amortization_months".to_string(),
    ];

    let frequency = match fields.text("loan.payment_frequency") {
        Some(label) => {
            loan_fields.push("loan.payment_frequency".to_string());
            match PayFrequency::from_label(label) {
                Some(PayFrequency::Annual) | None => {
                    warn!(frequency = label, "unsupported mortgage payment frequency; using monthly");
                    PayFrequency::Monthly
                }
                Some(frequency) => frequency,
            }
        }
        None => PayFrequency::Monthly,
    };

    // Out-of-range amortizations collapse to zero periods, which is undefined downstream.
    let total_periods = months
        .max(Decimal::ZERO)
        .checked_mul(Decimal::from(frequency.periods_per_year()))
        .and_then(|periods| periods.checked_div(MONTHS_PER_YEAR))
        .and_then(|periods| periods.round().to_u32())
        .unwrap_or(0);

    Some(LoanTerms {
        principal,
        contract_rate,
        frequency,
        total_periods,
        fields: loan_fields,
    })
}

fn collect_liabilities(fields: &FieldSet) -> (Vec<Liability>, Vec<UnusableInput>) {
    let mut liabilities = Vec::new();
    let mut unusable = Vec::new();

    for resolved in fields.with_prefix("liability.") {
        let Some(id) = resolved
            .field
            .strip_prefix("liability.")
            .and_then(|rest| rest.strip_suffix(".payment"))
        else {
            continue;
        };
        if id.is_empty() || id.contains('.') {
            continue;
        }
        let Some(monthly_payment) = resolved.value.as_numeric() else {
            warn!(field = %resolved.field, "liability payment is not numeric; leaving it out");
            unusable.push(UnusableInput::new(
                resolved.field.clone(),
                "payment is not numeric",
            ));
            continue;
        };

        let mut liability_fields = vec![resolved.field.clone()];
        let kind_field = format!("liability.{id}.kind");
        let kind = fields.text(&kind_field).map(|kind| {
            liability_fields.push(kind_field.clone());
            kind.to_string()
        });
        let joint_field = format!("liability.{id}.joint");
        let joint = match fields.flag(&joint_field) {
            Some(joint) => {
                liability_fields.push(joint_field);
                joint
            }
            None => false,
        };

        liabilities.push(Liability {
            id: id.to_string(),
            kind,
            monthly_payment,
            joint,
            fields: liability_fields,
        });
    }

    (liabilities, unusable)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stress_rate_takes_buffer_when_above_floor() {
        assert_eq!(
            qualifying_rate(dec!(4.79), dec!(2.0), dec!(5.25)),
            Some(dec!(6.79))
        );
    }

    #[test]
    fn stress_rate_uses_floor_for_low_contract_rates() {
        assert_eq!(
            qualifying_rate(dec!(2.5), dec!(2.0), dec!(5.25)),
            Some(dec!(5.25))
        );
    }

    #[test]
    fn zero_rate_payment_is_straight_line() {
        let payment = periodic_payment(dec!(300000), Decimal::ZERO, 12, 300);
        assert_eq!(payment, RatioValue::defined(dec!(1000)));
    }

    #[test]
    fn zero_periods_is_undefined() {
        assert!(periodic_payment(dec!(300000), dec!(5), 12, 0).is_undefined());
    }

    #[test]
    fn amortized_payment_matches_reference_value() {
        // 400k over 25 years at 6% nominal compounded monthly.
        let payment = periodic_payment(dec!(400000), dec!(6), 12, 300)
            .value()
            .expect("defined payment");
        assert!((payment - dec!(2577.21)).abs() < dec!(0.01), "payment was {payment}");
    }

    #[test]
    fn zero_income_ratio_is_undefined() {
        assert!(debt_service_ratio(dec!(3000), Decimal::ZERO).is_undefined());
    }

    #[test]
    fn out_of_range_contract_rate_has_no_stress_rate() {
        assert_eq!(qualifying_rate(Decimal::MAX, dec!(2.0), dec!(5.25)), None);
    }

    #[test]
    fn ratio_over_tiny_income_is_undefined() {
        let ratio = debt_service_ratio(dec!(3281.78), dec!(0.0000000000000000000000001));
        assert_eq!(
            ratio,
            RatioValue::undefined("debt service ratio overflowed decimal range")
        );
    }

    #[test]
    fn huge_principal_payment_is_undefined() {
        assert!(periodic_payment(Decimal::MAX, dec!(600), 12, 2).is_undefined());
        assert!(periodic_payment(Decimal::MAX, Decimal::ZERO, 12, 1).value().is_some());
    }

    #[test]
    fn overflowing_costs_stay_undefined() {
        let total = add_costs(
            &RatioValue::defined(Decimal::MAX),
            &RatioValue::defined(Decimal::ONE),
        );
        assert_eq!(
            total,
            RatioValue::undefined("monthly cost overflowed decimal range")
        );
        let carried = add_costs(&RatioValue::undefined("no rate"), &total);
        assert_eq!(carried, RatioValue::undefined("no rate"));
    }
}
