use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use super::calculations::IncomeType;
use super::domain::CaseType;
use super::rules::RuleSetId;

/// Calculator parameters and rule-set routing. Loaded once at process start and
/// shared immutably across every case evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub aggregation: AggregationConfig,
    pub income: IncomeConfig,
    pub debt_service: DebtServiceConfig,
    pub collateral: CollateralConfig,
    pub rule_sets: BTreeMap<CaseType, RuleSetId>,
}

/// Agreement tolerances for multi-candidate numeric fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AggregationConfig {
    /// Relative variance (`|a-b|/max(a,b)`) under which numeric candidates agree.
    pub default_tolerance: Decimal,
    pub field_tolerances: BTreeMap<String, Decimal>,
}

impl AggregationConfig {
    pub fn tolerance_for(&self, field: &str) -> Decimal {
        self.field_tolerances
            .get(field)
            .copied()
            .unwrap_or(self.default_tolerance)
    }
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            default_tolerance: dec!(0.05),
            field_tolerances: BTreeMap::new(),
        }
    }
}

/// Per-income-type adjustment factors applied to monthly income.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IncomeConfig {
    pub factors: BTreeMap<IncomeType, Decimal>,
}

impl IncomeConfig {
    pub fn factor_for(&self, income_type: IncomeType) -> Decimal {
        self.factors
            .get(&income_type)
            .copied()
            .unwrap_or_else(|| income_type.default_factor())
    }
}

impl Default for IncomeConfig {
    fn default() -> Self {
        let factors = IncomeType::ordered()
            .into_iter()
            .map(|income_type| (income_type, income_type.default_factor()))
            .collect();
        Self { factors }
    }
}

/// Stress-test parameters and debt-service limits. Rates and limits are percentages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DebtServiceConfig {
    pub stress_buffer: Decimal,
    pub stress_floor: Decimal,
    pub condo_fee_fraction: Decimal,
    pub joint_liability_share: Decimal,
    pub gds_limit: Decimal,
    pub tds_limit: Decimal,
    pub warning_margin: Decimal,
}

impl Default for DebtServiceConfig {
    fn default() -> Self {
        Self {
            stress_buffer: dec!(2.00),
            stress_floor: dec!(5.25),
            condo_fee_fraction: dec!(0.5),
            joint_liability_share: Decimal::ONE,
            gds_limit: dec!(39),
            tds_limit: dec!(44),
            warning_margin: dec!(2),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CollateralConfig {
    pub ltv_limit: Decimal,
    pub cltv_limit: Decimal,
    pub warning_margin: Decimal,
}

impl Default for CollateralConfig {
    fn default() -> Self {
        Self {
            ltv_limit: dec!(80),
            cltv_limit: dec!(80),
            warning_margin: dec!(5),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        let standard = RuleSetId::new("residential-standard", "2026.1");
        let insured = RuleSetId::new("residential-insured", "2026.1");

        let mut rule_sets = BTreeMap::new();
        rule_sets.insert(CaseType::ConventionalPurchase, standard.clone());
        rule_sets.insert(CaseType::InsuredPurchase, insured);
        rule_sets.insert(CaseType::Refinance, standard);

        Self {
            aggregation: AggregationConfig::default(),
            income: IncomeConfig::default(),
            debt_service: DebtServiceConfig::default(),
            collateral: CollateralConfig::default(),
            rule_sets,
        }
    }
}

impl EngineConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, EngineConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| EngineConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, EngineConfigError> {
        let config: EngineConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects parameter combinations that would make every evaluation meaningless.
    pub fn validate(&self) -> Result<(), EngineConfigError> {
        let unit = |name: &str, value: Decimal| {
            if value < Decimal::ZERO || value > Decimal::ONE {
                Err(EngineConfigError::Invalid(format!(
                    "{name} must be between 0 and 1, found {value}"
                )))
            } else {
                Ok(())
            }
        };
        let non_negative = |name: &str, value: Decimal| {
            if value < Decimal::ZERO {
                Err(EngineConfigError::Invalid(format!(
                    "{name} must not be negative, found {value}"
                )))
            } else {
                Ok(())
            }
        };
        let positive = |name: &str, value: Decimal| {
            if value <= Decimal::ZERO {
                Err(EngineConfigError::Invalid(format!(
                    "{name} must be positive, found {value}"
                )))
            } else {
                Ok(())
            }
        };

        unit("aggregation.default_tolerance", self.aggregation.default_tolerance)?;
        for (field, tolerance) in &self.aggregation.field_tolerances {
            unit(&format!("aggregation.field_tolerances.{field}"), *tolerance)?;
        }
        for (income_type, factor) in &self.income.factors {
            unit(&format!("income.factors.{}", income_type.label()), *factor)?;
        }

        let debt = &self.debt_service;
        non_negative("debt_service.stress_buffer", debt.stress_buffer)?;
        non_negative("debt_service.stress_floor", debt.stress_floor)?;
        unit("debt_service.condo_fee_fraction", debt.condo_fee_fraction)?;
        unit("debt_service.joint_liability_share", debt.joint_liability_share)?;
        positive("debt_service.gds_limit", debt.gds_limit)?;
        positive("debt_service.tds_limit", debt.tds_limit)?;
        non_negative("debt_service.warning_margin", debt.warning_margin)?;

        positive("collateral.ltv_limit", self.collateral.ltv_limit)?;
        positive("collateral.cltv_limit", self.collateral.cltv_limit)?;
        non_negative("collateral.warning_margin", self.collateral.warning_margin)?;

        for case_type in CaseType::ordered() {
            if !self.rule_sets.contains_key(&case_type) {
                return Err(EngineConfigError::Invalid(format!(
                    "rule_sets has no entry for case type {}",
                    case_type.label()
                )));
            }
        }

        Ok(())
    }
}

/// Structural configuration failure; blocks every evaluation until fixed.
#[derive(Debug, thiserror::Error)]
pub enum EngineConfigError {
    #[error("failed to read engine config {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("engine config is not valid TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid engine config: {0}")]
    Invalid(String),
    #[error("case type {case_type} routes to unknown rule set {rule_set}")]
    UnknownRuleSet {
        case_type: &'static str,
        rule_set: RuleSetId,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        EngineConfig::default()
            .validate()
            .expect("defaults validate");
    }

    #[test]
    fn partial_toml_keeps_defaults_for_missing_sections() {
        let config = EngineConfig::from_toml_str(
            r#"
            [debt_service]
            stress_buffer = 2
            stress_floor = 5.25

            [rule_sets]
            conventional_purchase = "residential-standard@2026.1"
            insured_purchase = "residential-insured@2026.1"
            refinance = "residential-standard@2026.1"
            "#,
        )
        .expect("config parses");

        assert_eq!(config.debt_service.stress_floor, dec!(5.25));
        assert_eq!(config.debt_service.gds_limit, dec!(39));
        assert_eq!(config.aggregation.default_tolerance, dec!(0.05));
        assert_eq!(config.income.factor_for(IncomeType::Bonus), dec!(0.5));
    }

    #[test]
    fn rejects_unknown_keys() {
        let error = EngineConfig::from_toml_str("[debt_service]\nstress_bufer = 2\n")
            .expect_err("typo must fail");
        assert!(matches!(error, EngineConfigError::Parse(_)));
    }

    #[test]
    fn rejects_income_factor_above_one() {
        let mut config = EngineConfig::default();
        config.income.factors.insert(IncomeType::Rental, dec!(1.5));

        match config.validate() {
            Err(EngineConfigError::Invalid(message)) => assert!(message.contains("rental")),
            other => panic!("expected invalid factor, got {other:?}"),
        }
    }

    #[test]
    fn rejects_missing_case_type_route() {
        let mut config = EngineConfig::default();
        config.rule_sets.remove(&CaseType::Refinance);

        assert!(matches!(
            config.validate(),
            Err(EngineConfigError::Invalid(_))
        ));
    }
}
