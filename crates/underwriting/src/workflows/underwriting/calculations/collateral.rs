use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use super::super::aggregation::FieldSet;
use super::super::config::CollateralConfig;
use super::{CalculationKind, CalculationResult, CalculationStatus, RatioValue};

/// Loan-to-value and combined loan-to-value. Values stay unrounded for threshold checks.
pub struct CollateralCalculator<'a> {
    config: &'a CollateralConfig,
}

impl<'a> CollateralCalculator<'a> {
    pub fn new(config: &'a CollateralConfig) -> Self {
        Self { config }
    }

    pub fn calculate(&self, fields: &FieldSet) -> Vec<CalculationResult> {
        let Some(loan_amount) = fields.numeric("loan.amount") else {
            return Vec::new();
        };

        // Appraisal is authoritative when present.
        let (value_field, property_value) = match fields.numeric("property.appraised_value") {
            Some(value) => ("property.appraised_value", value),
            None => match fields.numeric("property.purchase_price") {
                Some(value) => ("property.purchase_price", value),
                None => return Vec::new(),
            },
        };

        let ltv_inputs = vec!["loan.amount".to_string(), value_field.to_string()];
        let ltv = self.ratio_result(
            CalculationKind::Ltv,
            loan_to_value(loan_amount, property_value),
            self.config.ltv_limit,
            ltv_inputs.clone(),
        );

        let mut cltv_inputs = ltv_inputs;
        let mut notes = Vec::new();
        let secondary = match fields.numeric("loan.secondary_financing") {
            Some(amount) => {
                cltv_inputs.push("loan.secondary_financing".to_string());
                amount
            }
            None => {
                notes.push("loan.secondary_financing not provided; counted as 0".to_string());
                Decimal::ZERO
            }
        };
        let cltv_value = match loan_amount.checked_add(secondary) {
            Some(financed) => loan_to_value(financed, property_value),
            None => RatioValue::undefined("financed amount overflowed decimal range"),
        };
        let mut cltv = self.ratio_result(
            CalculationKind::Cltv,
            cltv_value,
            self.config.cltv_limit,
            cltv_inputs,
        );
        cltv.notes = notes;

        vec![ltv, cltv]
    }

    fn ratio_result(
        &self,
        kind: CalculationKind,
        value: RatioValue,
        limit: Decimal,
        inputs: Vec<String>,
    ) -> CalculationResult {
        CalculationResult {
            kind,
            status: CalculationStatus::against_limit(&value, limit, self.config.warning_margin),
            value,
            stressed: None,
            threshold: Some(limit),
            inputs,
            notes: Vec::new(),
        }
    }
}

fn loan_to_value(financed: Decimal, property_value: Decimal) -> RatioValue {
    if property_value <= Decimal::ZERO {
        return RatioValue::undefined("property value is zero");
    }
    RatioValue::checked(
        financed
            .checked_div(property_value)
            .and_then(|ratio| ratio.checked_mul(dec!(100))),
        "loan-to-value ratio",
    )
}
