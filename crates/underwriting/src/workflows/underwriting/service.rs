use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use super::audit::AuditSnapshot;
use super::decision::{DecisionOutcome, RiskTier};
use super::domain::{CaseBundle, CaseId};
use super::engine::UnderwritingEngine;
use super::repository::{SnapshotStore, SnapshotStoreError};

/// Runs the engine for a case and commits exactly one snapshot per completed run.
///
/// Runs for the same case are serialized so each snapshot supersedes the one
/// recorded immediately before it.
pub struct UnderwritingService<S> {
    engine: Arc<UnderwritingEngine>,
    store: Arc<S>,
    case_locks: Mutex<HashMap<CaseId, Arc<Mutex<()>>>>,
}

impl<S> UnderwritingService<S>
where
    S: SnapshotStore + 'static,
{
    pub fn new(engine: Arc<UnderwritingEngine>, store: Arc<S>) -> Self {
        Self {
            engine,
            store,
            case_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn engine(&self) -> &UnderwritingEngine {
        &self.engine
    }

    /// Assess the bundle and append a snapshot superseding the case's latest one.
    pub fn evaluate(&self, bundle: &CaseBundle) -> Result<AuditSnapshot, UnderwritingServiceError> {
        let case_lock = self.case_lock(&bundle.case_id)?;
        let result = Self::hold(&case_lock).and_then(|_guard| self.record(bundle));
        self.release(&bundle.case_id, case_lock);
        result
    }

    fn record(&self, bundle: &CaseBundle) -> Result<AuditSnapshot, UnderwritingServiceError> {
        let previous = self.store.latest(&bundle.case_id)?;
        let assessment = self.engine.assess(bundle);
        let snapshot = AuditSnapshot::capture(
            assessment,
            previous.as_ref().map(AuditSnapshot::snapshot_id),
        )?;

        if let Some(previous) = &previous {
            if previous.calculation_digest() == snapshot.calculation_digest() {
                info!(case_id = %bundle.case_id, "re-run reproduced the previous calculations");
            }
        }

        self.store.append(snapshot.clone())?;
        info!(
            case_id = %snapshot.case_id(),
            snapshot_id = %snapshot.snapshot_id(),
            outcome = snapshot.assessment().decision.outcome.label(),
            "assessment snapshot recorded"
        );
        Ok(snapshot)
    }

    fn case_lock(&self, case_id: &CaseId) -> Result<Arc<Mutex<()>>, UnderwritingServiceError> {
        let mut locks = self.case_locks.lock().map_err(|_| poisoned())?;
        Ok(locks.entry(case_id.clone()).or_default().clone())
    }

    fn hold(case_lock: &Mutex<()>) -> Result<MutexGuard<'_, ()>, UnderwritingServiceError> {
        case_lock.lock().map_err(|_| poisoned())
    }

    /// Drop the case entry once no other run is holding or waiting on it.
    fn release(&self, case_id: &CaseId, case_lock: Arc<Mutex<()>>) {
        if let Ok(mut locks) = self.case_locks.lock() {
            // The map and this run hold the only references.
            if Arc::strong_count(&case_lock) == 2 {
                locks.remove(case_id);
            }
        }
    }

    pub fn latest(&self, case_id: &CaseId) -> Result<AuditSnapshot, UnderwritingServiceError> {
        self.store
            .latest(case_id)?
            .ok_or_else(|| UnderwritingServiceError::NotFound(case_id.clone()))
    }

    pub fn history(&self, case_id: &CaseId) -> Result<Vec<AuditSnapshot>, UnderwritingServiceError> {
        let history = self.store.history(case_id)?;
        if history.iter().any(|snapshot| !snapshot.verify()) {
            warn!(case_id = %case_id, "stored snapshot digest does not match its content");
        }
        Ok(history)
    }
}

fn poisoned() -> UnderwritingServiceError {
    UnderwritingServiceError::Store(SnapshotStoreError::Unavailable(
        "case lock poisoned".to_string(),
    ))
}

/// Compact listing entry for a stored snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotSummary {
    pub snapshot_id: Uuid,
    pub recorded_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supersedes: Option<Uuid>,
    pub rule_set: String,
    pub outcome: DecisionOutcome,
    pub risk_tier: RiskTier,
    pub calculation_digest: String,
    pub summary: String,
}

impl From<&AuditSnapshot> for SnapshotSummary {
    fn from(snapshot: &AuditSnapshot) -> Self {
        let assessment = snapshot.assessment();
        Self {
            snapshot_id: snapshot.snapshot_id(),
            recorded_at: snapshot.recorded_at(),
            supersedes: snapshot.supersedes(),
            rule_set: snapshot.rule_set().to_string(),
            outcome: assessment.decision.outcome,
            risk_tier: assessment.risk.tier,
            calculation_digest: snapshot.calculation_digest().to_string(),
            summary: assessment.decision.summary(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum UnderwritingServiceError {
    #[error("no assessment recorded for case {0}")]
    NotFound(CaseId),
    #[error(transparent)]
    Store(#[from] SnapshotStoreError),
    #[error("failed to digest assessment: {0}")]
    Digest(#[from] serde_json::Error),
}
