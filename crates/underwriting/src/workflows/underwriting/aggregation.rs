use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::config::AggregationConfig;
use super::domain::{EvidenceRef, FieldCandidate, FieldValue};

/// How the working value of a resolved field was chosen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldResolution {
    SingleCandidate,
    Consensus,
    HighestConfidence,
    ManualOverride {
        actor: String,
        reason: String,
        recorded_at: DateTime<Utc>,
    },
}

/// Single provenance-tracked value for a logical field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedField {
    pub field: String,
    pub value: FieldValue,
    pub confidence: f64,
    pub candidates: Vec<FieldCandidate>,
    pub conflicted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_variance: Option<Decimal>,
    pub resolution: FieldResolution,
}

impl ResolvedField {
    /// Conflicted and not yet explained by a manual override.
    pub fn unresolved_conflict(&self) -> bool {
        self.conflicted && !matches!(self.resolution, FieldResolution::ManualOverride { .. })
    }

    pub fn evidence(&self) -> Vec<EvidenceRef> {
        let mut evidence = Vec::with_capacity(self.candidates.len() + 1);
        if let FieldResolution::ManualOverride { actor, .. } = &self.resolution {
            evidence.push(EvidenceRef::ManualOverride {
                field_path: self.field.clone(),
                actor: actor.clone(),
            });
        }
        evidence.extend(self.candidates.iter().map(FieldCandidate::evidence));
        evidence
    }
}

/// Resolved fields for one case, keyed by logical field name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldSet {
    fields: BTreeMap<String, ResolvedField>,
}

impl FieldSet {
    pub fn get(&self, field: &str) -> Option<&ResolvedField> {
        self.fields.get(field)
    }

    pub fn numeric(&self, field: &str) -> Option<Decimal> {
        self.get(field).and_then(|resolved| resolved.value.as_numeric())
    }

    pub fn flag(&self, field: &str) -> Option<bool> {
        self.get(field).and_then(|resolved| resolved.value.as_flag())
    }

    pub fn text(&self, field: &str) -> Option<&str> {
        self.get(field).and_then(|resolved| resolved.value.as_text())
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResolvedField> {
        self.fields.values()
    }

    /// Fields whose logical name starts with `prefix`, in name order.
    pub fn with_prefix<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = &'a ResolvedField> {
        self.fields
            .range(prefix.to_string()..)
            .take_while(move |(name, _)| name.starts_with(prefix))
            .map(|(_, resolved)| resolved)
    }

    pub fn unresolved_conflicts(&self) -> impl Iterator<Item = &ResolvedField> {
        self.iter().filter(|resolved| resolved.unresolved_conflict())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn into_vec(self) -> Vec<ResolvedField> {
        self.fields.into_values().collect()
    }
}

impl FromIterator<ResolvedField> for FieldSet {
    fn from_iter<T: IntoIterator<Item = ResolvedField>>(iter: T) -> Self {
        let fields = iter
            .into_iter()
            .map(|resolved| (resolved.field.clone(), resolved))
            .collect();
        Self { fields }
    }
}

/// Underwriter correction recorded on top of the extracted candidates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldOverride {
    pub field: String,
    pub value: FieldValue,
    pub reason: String,
    pub actor: String,
    pub recorded_at: DateTime<Utc>,
}

/// Append-only history of overrides for a case.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OverrideLog {
    events: Vec<FieldOverride>,
}

impl OverrideLog {
    pub fn new(events: impl IntoIterator<Item = FieldOverride>) -> Self {
        Self {
            events: events.into_iter().collect(),
        }
    }

    pub fn record(&mut self, event: FieldOverride) {
        self.events.push(event);
    }

    pub fn events(&self) -> &[FieldOverride] {
        &self.events
    }

    /// Latest override for the field; later `recorded_at` wins, then later position.
    pub fn latest_for(&self, field: &str) -> Option<&FieldOverride> {
        self.events
            .iter()
            .filter(|event| event.field == field)
            .max_by(|left, right| left.recorded_at.cmp(&right.recorded_at))
    }

    /// Produce a new field set with overrides layered over the aggregated values.
    pub fn apply(&self, fields: &FieldSet) -> FieldSet {
        let mut names: Vec<&str> = fields.fields.keys().map(String::as_str).collect();
        names.extend(self.events.iter().map(|event| event.field.as_str()));
        names.sort_unstable();
        names.dedup();

        names
            .into_iter()
            .filter_map(|name| match (fields.get(name), self.latest_for(name)) {
                (base, Some(event)) => Some(overridden(base, event)),
                (Some(base), None) => Some(base.clone()),
                (None, None) => None,
            })
            .collect()
    }
}

fn overridden(base: Option<&ResolvedField>, event: &FieldOverride) -> ResolvedField {
    let resolution = FieldResolution::ManualOverride {
        actor: event.actor.clone(),
        reason: event.reason.clone(),
        recorded_at: event.recorded_at,
    };

    match base {
        Some(base) => ResolvedField {
            field: base.field.clone(),
            value: event.value.clone(),
            confidence: 1.0,
            candidates: base.candidates.clone(),
            conflicted: base.conflicted,
            max_variance: base.max_variance,
            resolution,
        },
        None => ResolvedField {
            field: event.field.clone(),
            value: event.value.clone(),
            confidence: 1.0,
            candidates: Vec::new(),
            conflicted: false,
            max_variance: None,
            resolution,
        },
    }
}

/// Merges raw candidates into one resolved field per logical name.
#[derive(Debug, Clone)]
pub struct FieldAggregator {
    config: AggregationConfig,
}

impl FieldAggregator {
    pub fn new(config: AggregationConfig) -> Self {
        Self { config }
    }

    /// Never fails; fields without candidates are simply absent from the result.
    pub fn resolve<'a, I>(&self, candidates: I) -> FieldSet
    where
        I: IntoIterator<Item = &'a FieldCandidate>,
    {
        let mut grouped: BTreeMap<String, Vec<FieldCandidate>> = BTreeMap::new();
        for candidate in candidates {
            let mut candidate = candidate.clone();
            candidate.confidence = sanitize_confidence(&candidate);
            grouped
                .entry(candidate.field.clone())
                .or_default()
                .push(candidate);
        }

        grouped
            .into_iter()
            .map(|(field, candidates)| self.resolve_field(field, candidates))
            .collect()
    }

    fn resolve_field(&self, field: String, mut candidates: Vec<FieldCandidate>) -> ResolvedField {
        candidates.sort_by(preference_order);
        let winner = &candidates[0];
        let value = winner.value.clone();
        let confidence = winner.confidence;

        if candidates.len() == 1 {
            return ResolvedField {
                field,
                value,
                confidence,
                candidates,
                conflicted: false,
                max_variance: None,
                resolution: FieldResolution::SingleCandidate,
            };
        }

        let tolerance = self.config.tolerance_for(&field);
        let (conflicted, max_variance) = match numeric_values(&candidates) {
            Some(values) => match max_pairwise_variance(&values) {
                Some(variance) => (variance > tolerance, Some(variance)),
                // Candidates too far apart to measure.
                None => (true, None),
            },
            None => (!categorical_agreement(&candidates), None),
        };

        if conflicted {
            debug!(
                field = %field,
                candidates = candidates.len(),
                ?max_variance,
                %tolerance,
                "field candidates disagree beyond tolerance"
            );
        }

        ResolvedField {
            field,
            value,
            confidence,
            candidates,
            conflicted,
            max_variance,
            resolution: if conflicted {
                FieldResolution::HighestConfidence
            } else {
                FieldResolution::Consensus
            },
        }
    }
}

fn sanitize_confidence(candidate: &FieldCandidate) -> f64 {
    let raw = candidate.confidence;
    if raw.is_nan() {
        warn!(field = %candidate.field, "candidate confidence is NaN; treating as 0");
        return 0.0;
    }
    if !(0.0..=1.0).contains(&raw) {
        warn!(field = %candidate.field, confidence = raw, "candidate confidence outside [0, 1]; clamping");
    }
    raw.clamp(0.0, 1.0)
}

/// Highest confidence first, then most recently produced, then document/page order.
fn preference_order(left: &FieldCandidate, right: &FieldCandidate) -> Ordering {
    right
        .confidence
        .total_cmp(&left.confidence)
        .then_with(|| right.produced_at.cmp(&left.produced_at))
        .then_with(|| left.source.document_id.cmp(&right.source.document_id))
        .then_with(|| left.source.page.cmp(&right.source.page))
}

fn numeric_values(candidates: &[FieldCandidate]) -> Option<Vec<Decimal>> {
    candidates
        .iter()
        .map(|candidate| candidate.value.as_numeric())
        .collect()
}

/// `|a-b| / max(|a|, |b|)`; zero when both are zero, `None` when the
/// difference leaves the decimal range.
pub(crate) fn relative_variance(a: Decimal, b: Decimal) -> Option<Decimal> {
    let scale = a.abs().max(b.abs());
    if scale.is_zero() {
        return Some(Decimal::ZERO);
    }
    a.checked_sub(b)?.abs().checked_div(scale)
}

fn max_pairwise_variance(values: &[Decimal]) -> Option<Decimal> {
    let mut worst = Decimal::ZERO;
    for (index, a) in values.iter().enumerate() {
        for b in &values[index + 1..] {
            worst = worst.max(relative_variance(*a, *b)?);
        }
    }
    Some(worst)
}

fn categorical_agreement(candidates: &[FieldCandidate]) -> bool {
    let first = &candidates[0].value;
    candidates[1..]
        .iter()
        .all(|candidate| categorical_eq(first, &candidate.value))
}

fn categorical_eq(left: &FieldValue, right: &FieldValue) -> bool {
    match (left, right) {
        (FieldValue::Text(left), FieldValue::Text(right)) => {
            normalize_text(left) == normalize_text(right)
        }
        (FieldValue::Flag(left), FieldValue::Flag(right)) => left == right,
        _ => false,
    }
}

pub(crate) fn normalize_text(value: &str) -> String {
    let cleaned = value.replace(['\u{feff}', '\u{200b}'], "");
    let collapsed = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.to_ascii_lowercase()
}
