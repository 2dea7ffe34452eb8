use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::aggregation::FieldSet;
use super::calculations::Calculations;
use super::decision::{Decision, RiskAssessment};
use super::domain::CaseId;
use super::engine::CaseAssessment;
use super::rules::{PolicyFinding, RuleSetId};

/// Immutable record of one completed evaluation run.
///
/// Fields are private and there are no mutating methods; a re-run produces a
/// new snapshot that points at the one it supersedes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditSnapshot {
    snapshot_id: Uuid,
    case_id: CaseId,
    recorded_at: DateTime<Utc>,
    rule_set: RuleSetId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    supersedes: Option<Uuid>,
    calculation_digest: String,
    assessment: CaseAssessment,
}

#[derive(Serialize)]
struct DigestView<'a> {
    case_id: &'a CaseId,
    rule_set: &'a RuleSetId,
    fields: &'a FieldSet,
    calculations: &'a Calculations,
    findings: &'a [PolicyFinding],
    risk: &'a RiskAssessment,
    decision: &'a Decision,
}

impl AuditSnapshot {
    pub fn capture(
        assessment: CaseAssessment,
        supersedes: Option<Uuid>,
    ) -> Result<Self, serde_json::Error> {
        let calculation_digest = calculation_digest(&assessment)?;
        Ok(Self {
            snapshot_id: Uuid::new_v4(),
            case_id: assessment.case_id.clone(),
            recorded_at: Utc::now(),
            rule_set: assessment.rule_set.clone(),
            supersedes,
            calculation_digest,
            assessment,
        })
    }

    pub fn snapshot_id(&self) -> Uuid {
        self.snapshot_id
    }

    pub fn case_id(&self) -> &CaseId {
        &self.case_id
    }

    pub fn recorded_at(&self) -> DateTime<Utc> {
        self.recorded_at
    }

    pub fn rule_set(&self) -> &RuleSetId {
        &self.rule_set
    }

    pub fn supersedes(&self) -> Option<Uuid> {
        self.supersedes
    }

    pub fn calculation_digest(&self) -> &str {
        &self.calculation_digest
    }

    pub fn assessment(&self) -> &CaseAssessment {
        &self.assessment
    }

    /// Recompute the digest; false means the stored content was altered.
    pub fn verify(&self) -> bool {
        calculation_digest(&self.assessment)
            .map(|digest| digest == self.calculation_digest)
            .unwrap_or(false)
    }
}

/// SHA-256 over canonical JSON of the computed content. Snapshot ids and
/// timestamps are excluded so identical inputs give identical digests.
pub fn calculation_digest(assessment: &CaseAssessment) -> Result<String, serde_json::Error> {
    let view = DigestView {
        case_id: &assessment.case_id,
        rule_set: &assessment.rule_set,
        fields: &assessment.fields,
        calculations: &assessment.calculations,
        findings: &assessment.findings,
        risk: &assessment.risk,
        decision: &assessment.decision,
    };
    // Value objects keep keys sorted, which makes the encoding canonical.
    let canonical = serde_json::to_vec(&serde_json::to_value(&view)?)?;
    Ok(format!("{:x}", Sha256::digest(&canonical)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflows::underwriting::config::EngineConfig;
    use crate::workflows::underwriting::domain::{CaseBundle, CaseType};
    use crate::workflows::underwriting::engine::UnderwritingEngine;
    use crate::workflows::underwriting::rules::RuleCatalog;

    #[test]
    fn digest_is_lowercase_sha256_hex() {
        let catalog = RuleCatalog::builtin().expect("built-in rule sets load");
        let engine = UnderwritingEngine::new(EngineConfig::default(), &catalog).expect("engine");
        let assessment = engine.assess(&CaseBundle::new("case-hex", CaseType::Refinance));

        let digest = calculation_digest(&assessment).expect("digest");
        assert_eq!(digest.len(), 64);
        assert!(digest
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
        assert_eq!(digest, calculation_digest(&assessment).expect("digest"));
    }
}
