use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::rules::{
    FindingStatus, PolicyFinding, Severity, EXTRACTION_INCOMPLETE_RULE, FIELD_CONFLICT_RULE,
    UNUSABLE_INPUT_RULE,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskTier {
    Low,
    Medium,
    High,
    VeryHigh,
}

impl RiskTier {
    /// pass -> low, needs_review -> medium, exception_required -> high, fail or critical -> very_high.
    pub fn for_finding(status: FindingStatus, severity: Severity) -> Self {
        if severity == Severity::Critical {
            return Self::VeryHigh;
        }
        match status {
            FindingStatus::NotApplicable | FindingStatus::Pass => Self::Low,
            FindingStatus::NeedsReview => Self::Medium,
            FindingStatus::ExceptionRequired => Self::High,
            FindingStatus::Fail => Self::VeryHigh,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::VeryHigh => "very_high",
        }
    }
}

/// Findings sharing one status and severity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskSignal {
    pub tier: RiskTier,
    pub status: FindingStatus,
    pub severity: Severity,
    pub count: usize,
    pub rule_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub tier: RiskTier,
    pub signals: Vec<RiskSignal>,
}

/// Groups findings into signals, most severe first; equal tiers order by finding count.
pub fn assess_risk(findings: &[PolicyFinding]) -> RiskAssessment {
    let mut grouped: BTreeMap<(u8, Severity), RiskSignal> = BTreeMap::new();
    for finding in findings
        .iter()
        .filter(|finding| finding.status != FindingStatus::NotApplicable)
    {
        let signal = grouped
            .entry((finding.status.rank(), finding.severity))
            .or_insert_with(|| RiskSignal {
                tier: RiskTier::for_finding(finding.status, finding.severity),
                status: finding.status,
                severity: finding.severity,
                count: 0,
                rule_ids: Vec::new(),
            });
        signal.count += 1;
        signal.rule_ids.push(finding.rule_id.clone());
    }

    let mut signals: Vec<RiskSignal> = grouped.into_values().collect();
    signals.sort_by(|left, right| {
        right
            .tier
            .cmp(&left.tier)
            .then_with(|| right.count.cmp(&left.count))
            .then_with(|| right.status.rank().cmp(&left.status.rank()))
            .then_with(|| right.severity.cmp(&left.severity))
    });

    RiskAssessment {
        tier: signals.first().map_or(RiskTier::Low, |signal| signal.tier),
        signals,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionOutcome {
    Approve,
    Decline,
    Refer,
    PendingInfo,
}

impl DecisionOutcome {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Decline => "decline",
            Self::Refer => "refer",
            Self::PendingInfo => "pending_info",
        }
    }
}

/// Recommended outcome with the trail that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub outcome: DecisionOutcome,
    pub conditions: Vec<String>,
    pub blocking_findings: Vec<String>,
    pub note: String,
}

impl Decision {
    pub fn summary(&self) -> String {
        if self.conditions.is_empty() {
            format!("{}: {}", self.outcome.label(), self.note)
        } else {
            format!(
                "{}: {} (conditions: {})",
                self.outcome.label(),
                self.note,
                self.conditions.join("; ")
            )
        }
    }
}

/// Outcome precedence: any fail declines, any other blocking finding refers,
/// open gaps or conflicts hold the case for information, otherwise approve.
pub fn decide(findings: &[PolicyFinding]) -> Decision {
    let blocking: Vec<&PolicyFinding> = findings.iter().filter(|f| f.is_blocking()).collect();

    let mut conditions: Vec<String> = Vec::new();
    for action in findings
        .iter()
        .filter(|finding| !finding.is_blocking())
        .filter_map(|finding| finding.remedial_action.as_ref())
    {
        if !conditions.contains(action) {
            conditions.push(action.clone());
        }
    }

    let blocking_findings = blocking
        .iter()
        .map(|finding| finding.rule_id.clone())
        .collect();

    let failed: Vec<&str> = blocking
        .iter()
        .filter(|finding| finding.status == FindingStatus::Fail)
        .map(|finding| finding.rule_name.as_str())
        .collect();

    let (outcome, note) = if !failed.is_empty() {
        (
            DecisionOutcome::Decline,
            format!("declined on {}", failed.join(", ")),
        )
    } else if !blocking.is_empty() {
        let names: Vec<&str> = blocking.iter().map(|f| f.rule_name.as_str()).collect();
        (
            DecisionOutcome::Refer,
            format!("senior exception required for {}", names.join(", ")),
        )
    } else if let Some(note) = pending_note(findings) {
        (DecisionOutcome::PendingInfo, note)
    } else {
        let assessed = findings
            .iter()
            .filter(|finding| finding.status != FindingStatus::NotApplicable)
            .count();
        (
            DecisionOutcome::Approve,
            format!("{assessed} rule(s) assessed with no blocking findings"),
        )
    };

    Decision {
        outcome,
        conditions,
        blocking_findings,
        note,
    }
}

fn pending_note(findings: &[PolicyFinding]) -> Option<String> {
    let count = |rule_id: &str| findings.iter().filter(|f| f.rule_id == rule_id).count();
    let conflicts = count(FIELD_CONFLICT_RULE);
    let incomplete = count(EXTRACTION_INCOMPLETE_RULE);
    let unusable = count(UNUSABLE_INPUT_RULE);
    let gaps = findings
        .iter()
        .filter(|finding| !finding.is_system())
        .map(|finding| finding.gaps.len())
        .sum::<usize>();

    let mut parts = Vec::new();
    if gaps > 0 {
        parts.push(format!("{gaps} missing or undefined input(s)"));
    }
    if unusable > 0 {
        parts.push(format!("{unusable} unusable extracted value(s)"));
    }
    if conflicts > 0 {
        parts.push(format!("{conflicts} unresolved field conflict(s)"));
    }
    if incomplete > 0 {
        parts.push(format!("{incomplete} incomplete document extraction(s)"));
    }

    if parts.is_empty() {
        None
    } else {
        Some(format!("waiting on {}", parts.join(", ")))
    }
}
