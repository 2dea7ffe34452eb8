use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::aggregation::{FieldAggregator, FieldOverride, FieldSet, OverrideLog};
use super::calculations::{
    CalculationKind, CalculationResult, Calculations, CollateralCalculator, DebtServiceCalculator,
    IncomeCalculator, IncomeSummary, Liability, UnusableInput,
};
use super::config::{EngineConfig, EngineConfigError};
use super::decision::{assess_risk, decide, Decision, RiskAssessment};
use super::domain::{CaseBundle, CaseId, CaseType};
use super::rules::{
    system_findings, EvaluationContext, PolicyEvaluator, PolicyFinding, RuleCatalog, RuleSet,
    RuleSetId, RuleSetRegistry,
};

/// Everything the engine derived for one case; consumed read-only downstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseAssessment {
    pub case_id: CaseId,
    pub case_type: CaseType,
    pub rule_set: RuleSetId,
    pub fields: FieldSet,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub overrides: Vec<FieldOverride>,
    pub income: IncomeSummary,
    pub liabilities: Vec<Liability>,
    pub calculations: Calculations,
    pub findings: Vec<PolicyFinding>,
    pub risk: RiskAssessment,
    pub decision: Decision,
}

impl CaseAssessment {
    pub fn calculation(&self, kind: CalculationKind) -> Option<&CalculationResult> {
        self.calculations.get(kind)
    }

    pub fn finding(&self, rule_id: &str) -> Option<&PolicyFinding> {
        self.findings.iter().find(|finding| finding.rule_id == rule_id)
    }
}

/// Stateless pipeline from extracted candidates to a recommended decision.
///
/// Holds only immutable configuration, so one instance can assess many cases
/// concurrently.
#[derive(Debug, Clone)]
pub struct UnderwritingEngine {
    config: Arc<EngineConfig>,
    registry: RuleSetRegistry,
    aggregator: FieldAggregator,
}

impl UnderwritingEngine {
    /// Fails fast when the configuration is invalid or routes to an unknown rule set.
    pub fn new(config: EngineConfig, catalog: &RuleCatalog) -> Result<Self, EngineConfigError> {
        config.validate()?;
        let registry = RuleSetRegistry::new(&config, catalog)?;
        let aggregator = FieldAggregator::new(config.aggregation.clone());
        Ok(Self {
            config: Arc::new(config),
            registry,
            aggregator,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn rule_set_for(&self, case_type: CaseType) -> &Arc<RuleSet> {
        self.registry.resolve(case_type)
    }

    pub fn assess(&self, bundle: &CaseBundle) -> CaseAssessment {
        let rule_set = self.registry.resolve(bundle.case_type);

        let aggregated = self.aggregator.resolve(bundle.candidates());
        let fields = if bundle.overrides.is_empty() {
            aggregated
        } else {
            OverrideLog::new(bundle.overrides.iter().cloned()).apply(&aggregated)
        };
        debug!(case_id = %bundle.case_id, fields = fields.len(), "fields resolved");

        let income = IncomeCalculator::new(&self.config.income, &bundle.income_factor_overrides)
            .calculate(&fields);
        let debt_service =
            DebtServiceCalculator::new(&self.config.debt_service).calculate(&fields, &income);
        let collateral = CollateralCalculator::new(&self.config.collateral).calculate(&fields);
        let unusable: Vec<UnusableInput> = income
            .unusable
            .iter()
            .chain(&debt_service.unusable)
            .cloned()
            .collect();

        let calculations: Calculations = income
            .to_result()
            .into_iter()
            .chain(debt_service.results)
            .chain(collateral)
            .collect();

        let context = EvaluationContext::new(&fields, &calculations);
        let mut findings = PolicyEvaluator::new(rule_set).evaluate(&context);
        findings.extend(system_findings(
            &fields,
            &unusable,
            bundle.incomplete_documents(),
        ));

        let risk = assess_risk(&findings);
        let decision = decide(&findings);

        info!(
            case_id = %bundle.case_id,
            case_type = bundle.case_type.label(),
            rule_set = %rule_set.id(),
            findings = findings.len(),
            risk = risk.tier.label(),
            outcome = decision.outcome.label(),
            "case assessed"
        );

        CaseAssessment {
            case_id: bundle.case_id.clone(),
            case_type: bundle.case_type,
            rule_set: rule_set.id().clone(),
            fields,
            overrides: bundle.overrides.clone(),
            income,
            liabilities: debt_service.liabilities,
            calculations,
            findings,
            risk,
            decision,
        }
    }
}
