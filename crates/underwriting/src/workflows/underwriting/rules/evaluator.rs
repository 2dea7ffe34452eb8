use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::super::aggregation::FieldSet;
use super::super::calculations::{CalculationKind, Calculations, RatioValue, UnusableInput};
use super::super::domain::{DocumentExtraction, EvidenceRef, ExtractionOutcome, FieldValue};
use super::{
    Criterion, FindingStatus, InputRef, PolicyRule, Predicate, RuleCategory, RuleSet, Severity,
};

pub const FIELD_CONFLICT_RULE: &str = "system.field_conflict";
pub const EXTRACTION_INCOMPLETE_RULE: &str = "system.extraction_incomplete";
pub const UNUSABLE_INPUT_RULE: &str = "system.unusable_input";

/// Result of evaluating one rule (or one system check) against a case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyFinding {
    pub rule_id: String,
    pub rule_name: String,
    pub category: RuleCategory,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub criterion_id: Option<String>,
    pub status: FindingStatus,
    pub severity: Severity,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remedial_action: Option<String>,
    pub evidence: Vec<EvidenceRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub gaps: Vec<String>,
}

impl PolicyFinding {
    /// `fail`, `exception_required`, or anything marked critical.
    pub fn is_blocking(&self) -> bool {
        matches!(
            self.status,
            FindingStatus::Fail | FindingStatus::ExceptionRequired
        ) || self.severity == Severity::Critical
    }

    pub fn is_system(&self) -> bool {
        self.rule_id.starts_with("system.")
    }
}

enum Observed<'a> {
    Numeric(Decimal),
    Flag(bool),
    Text(&'a str),
    Missing,
    Undefined(&'a str),
}

/// Read-only lookup of rule inputs for one case.
#[derive(Clone, Copy)]
pub struct EvaluationContext<'a> {
    fields: &'a FieldSet,
    calculations: &'a Calculations,
}

impl<'a> EvaluationContext<'a> {
    pub fn new(fields: &'a FieldSet, calculations: &'a Calculations) -> Self {
        Self {
            fields,
            calculations,
        }
    }

    fn ratio(&self, kind: CalculationKind, stressed: bool) -> Option<&'a RatioValue> {
        let result = self.calculations.get(kind)?;
        if stressed {
            result.stressed.as_ref()
        } else {
            Some(&result.value)
        }
    }

    fn observe(&self, input: &InputRef) -> Observed<'a> {
        match input {
            InputRef::Calculation { kind, stressed } => match self.ratio(*kind, *stressed) {
                Some(RatioValue::Defined { value }) => Observed::Numeric(*value),
                Some(RatioValue::Undefined { reason }) => Observed::Undefined(reason),
                None => Observed::Missing,
            },
            InputRef::Field(name) => match self.fields.get(name).map(|resolved| &resolved.value) {
                Some(FieldValue::Numeric(value)) => Observed::Numeric(*value),
                Some(FieldValue::Flag(value)) => Observed::Flag(*value),
                Some(FieldValue::Text(value)) => Observed::Text(value),
                None => Observed::Missing,
            },
        }
    }

    /// Current value rendered for messages.
    fn describe(&self, input: &InputRef) -> String {
        match input {
            InputRef::Calculation { kind, stressed } => match self.ratio(*kind, *stressed) {
                Some(value) => value.display(kind.is_percentage()),
                None => "not available".to_string(),
            },
            InputRef::Field(name) => match self.fields.get(name) {
                Some(resolved) => resolved.value.to_string(),
                None => "not available".to_string(),
            },
        }
    }

    /// Source citations for an input; calculations cite the fields that fed them.
    pub fn evidence(&self, input: &InputRef) -> Vec<EvidenceRef> {
        let gap = || {
            vec![EvidenceRef::Gap {
                field_path: input.to_string(),
            }]
        };
        let evidence = match input {
            InputRef::Calculation { kind, .. } => self
                .calculations
                .get(*kind)
                .map(|result| result.evidence(self.fields)),
            InputRef::Field(name) => self.fields.get(name).map(|resolved| resolved.evidence()),
        };
        match evidence {
            Some(evidence) if !evidence.is_empty() => evidence,
            _ => gap(),
        }
    }
}

/// Applies one rule set to a case; each rule yields exactly one finding.
pub struct PolicyEvaluator<'a> {
    rule_set: &'a RuleSet,
}

impl<'a> PolicyEvaluator<'a> {
    pub fn new(rule_set: &'a RuleSet) -> Self {
        Self { rule_set }
    }

    pub fn evaluate(&self, context: &EvaluationContext<'_>) -> Vec<PolicyFinding> {
        self.rule_set
            .rules()
            .iter()
            .map(|rule| evaluate_rule(rule, context))
            .collect()
    }
}

fn evaluate_rule(rule: &PolicyRule, context: &EvaluationContext<'_>) -> PolicyFinding {
    let inputs = rule.inputs();

    let undefined: Vec<(&InputRef, &str)> = inputs
        .iter()
        .filter_map(|input| match context.observe(input) {
            Observed::Undefined(reason) => Some((*input, reason)),
            _ => None,
        })
        .collect();
    if !undefined.is_empty() {
        return undefined_finding(rule, &undefined, context);
    }

    let mut gaps = Vec::new();
    for criterion in &rule.criteria {
        if predicate_holds(&criterion.when, context, &mut gaps) {
            debug!(rule = %rule.id, criterion = %criterion.id, status = criterion.status.label(), "criterion matched");
            return matched_finding(rule, criterion, &inputs, context, gaps);
        }
    }

    PolicyFinding {
        rule_id: rule.id.clone(),
        rule_name: rule.name.clone(),
        category: rule.category,
        criterion_id: None,
        status: FindingStatus::NotApplicable,
        severity: Severity::Info,
        message: format!("{}: no criterion matched ({})", rule.name, observed_values(&inputs, context)),
        remedial_action: None,
        evidence: collect_evidence(inputs.iter().copied(), context),
        gaps,
    }
}

fn undefined_finding(
    rule: &PolicyRule,
    undefined: &[(&InputRef, &str)],
    context: &EvaluationContext<'_>,
) -> PolicyFinding {
    let gaps: Vec<String> = undefined
        .iter()
        .map(|(input, reason)| format!("{input} is undefined: {reason}"))
        .collect();
    let names: Vec<String> = undefined.iter().map(|(input, _)| input.to_string()).collect();

    PolicyFinding {
        rule_id: rule.id.clone(),
        rule_name: rule.name.clone(),
        category: rule.category,
        criterion_id: None,
        status: FindingStatus::NeedsReview,
        severity: Severity::Medium,
        message: format!("{}: cannot be assessed; {}", rule.name, gaps.join("; ")),
        remedial_action: Some(format!(
            "Resolve undefined ratio {} before decisioning",
            names.join(", ")
        )),
        evidence: collect_evidence(undefined.iter().map(|(input, _)| *input), context),
        gaps,
    }
}

fn matched_finding(
    rule: &PolicyRule,
    criterion: &Criterion,
    inputs: &[&InputRef],
    context: &EvaluationContext<'_>,
    gaps: Vec<String>,
) -> PolicyFinding {
    let cited: Vec<&InputRef> = match criterion.when.input() {
        Some(input) => vec![input],
        None => inputs.to_vec(),
    };
    let label = if criterion.description.is_empty() {
        criterion.when.describe()
    } else {
        criterion.description.clone()
    };

    PolicyFinding {
        rule_id: rule.id.clone(),
        rule_name: rule.name.clone(),
        category: rule.category,
        criterion_id: Some(criterion.id.clone()),
        status: criterion.status,
        severity: criterion.severity,
        message: format!(
            "{}: {} ({})",
            rule.name,
            label,
            observed_values(&cited, context)
        ),
        remedial_action: criterion.remedial_action.clone(),
        evidence: collect_evidence(cited.into_iter(), context),
        gaps,
    }
}

fn observed_values(inputs: &[&InputRef], context: &EvaluationContext<'_>) -> String {
    inputs
        .iter()
        .map(|input| format!("{input} = {}", context.describe(input)))
        .collect::<Vec<_>>()
        .join(", ")
}

fn collect_evidence<'r>(
    inputs: impl Iterator<Item = &'r InputRef>,
    context: &EvaluationContext<'_>,
) -> Vec<EvidenceRef> {
    let mut evidence: Vec<EvidenceRef> = inputs.flat_map(|input| context.evidence(input)).collect();
    evidence.sort();
    evidence.dedup();
    evidence
}

fn record_gap(gaps: &mut Vec<String>, gap: String) {
    if !gaps.contains(&gap) {
        gaps.push(gap);
    }
}

/// Missing or mistyped inputs make the predicate false and are recorded as gaps.
fn predicate_holds(
    predicate: &Predicate,
    context: &EvaluationContext<'_>,
    gaps: &mut Vec<String>,
) -> bool {
    let Some(input) = predicate.input() else {
        return true;
    };

    let observed = context.observe(input);
    if let Observed::Missing = observed {
        record_gap(gaps, format!("{input} is not available"));
        return false;
    }

    match (predicate, observed) {
        (Predicate::Compare { op, value, .. }, Observed::Numeric(observed)) => {
            op.holds(observed, *value)
        }
        (
            Predicate::Between {
                min,
                max,
                min_exclusive,
                max_exclusive,
                ..
            },
            Observed::Numeric(observed),
        ) => {
            let above_min = if *min_exclusive {
                observed > *min
            } else {
                observed >= *min
            };
            let below_max = if *max_exclusive {
                observed < *max
            } else {
                observed <= *max
            };
            above_min && below_max
        }
        (Predicate::Flag { expected, .. }, Observed::Flag(observed)) => observed == *expected,
        (Predicate::OneOf { values, .. }, Observed::Text(observed)) => {
            Predicate::one_of_matches(values, observed)
        }
        _ => {
            record_gap(gaps, format!("{input} has the wrong type for this criterion"));
            false
        }
    }
}

/// Findings for unresolved field conflicts, values the calculators had to
/// leave out and documents that never produced candidates.
pub fn system_findings<'a>(
    fields: &FieldSet,
    unusable: &[UnusableInput],
    incomplete: impl IntoIterator<Item = &'a DocumentExtraction>,
) -> Vec<PolicyFinding> {
    let mut findings: Vec<PolicyFinding> = fields
        .unresolved_conflicts()
        .map(|resolved| {
            let spread = match resolved.max_variance {
                Some(variance) => format!(
                    "values differ by up to {}%",
                    (variance * Decimal::ONE_HUNDRED).round_dp(2)
                ),
                None => "values do not match".to_string(),
            };
            PolicyFinding {
                rule_id: FIELD_CONFLICT_RULE.to_string(),
                rule_name: "Conflicting extracted values".to_string(),
                category: RuleCategory::Documentation,
                criterion_id: None,
                status: FindingStatus::NeedsReview,
                severity: Severity::Medium,
                message: format!(
                    "{}: {} candidates disagree, {}; working value {} (confidence {:.2})",
                    resolved.field,
                    resolved.candidates.len(),
                    spread,
                    resolved.value,
                    resolved.confidence
                ),
                remedial_action: Some(format!(
                    "Confirm {} against source documents and record an override",
                    resolved.field
                )),
                evidence: resolved.evidence(),
                gaps: Vec::new(),
            }
        })
        .collect();

    findings.extend(unusable.iter().map(|input| {
        let resolved = fields.get(&input.field);
        let value = resolved.map_or_else(|| "not available".to_string(), |r| r.value.to_string());
        let evidence = match resolved.map(|resolved| resolved.evidence()) {
            Some(evidence) if !evidence.is_empty() => evidence,
            _ => vec![EvidenceRef::Gap {
                field_path: input.field.clone(),
            }],
        };
        PolicyFinding {
            rule_id: UNUSABLE_INPUT_RULE.to_string(),
            rule_name: "Unusable extracted value".to_string(),
            category: RuleCategory::Documentation,
            criterion_id: None,
            status: FindingStatus::NeedsReview,
            severity: Severity::Medium,
            message: format!(
                "{}: {} (value {value}); left out of calculations",
                input.field, input.reason
            ),
            remedial_action: Some(format!(
                "Correct {} from source documents or record an override",
                input.field
            )),
            evidence,
            gaps: vec![format!("field:{} {}", input.field, input.reason)],
        }
    }));

    findings.extend(incomplete.into_iter().filter_map(|document| {
        let detail = match &document.outcome {
            ExtractionOutcome::Completed { .. } => return None,
            ExtractionOutcome::Failed { reason } => format!("extraction failed: {reason}"),
            ExtractionOutcome::TimedOut => "extraction timed out".to_string(),
        };
        let field_path = format!("document:{}", document.document_id);
        Some(PolicyFinding {
            rule_id: EXTRACTION_INCOMPLETE_RULE.to_string(),
            rule_name: "Incomplete document extraction".to_string(),
            category: RuleCategory::Documentation,
            criterion_id: None,
            status: FindingStatus::NeedsReview,
            severity: Severity::Medium,
            message: format!("document {}: {detail}", document.document_id),
            remedial_action: Some(format!(
                "Re-run extraction for document {} or enter its values manually",
                document.document_id
            )),
            evidence: vec![EvidenceRef::Gap {
                field_path: field_path.clone(),
            }],
            gaps: vec![format!("{field_path} produced no candidates")],
        })
    }));

    findings
}
