use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use axum::response::Response;
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::Value;

use crate::workflows::underwriting::audit::AuditSnapshot;
use crate::workflows::underwriting::config::EngineConfig;
use crate::workflows::underwriting::domain::{
    CaseBundle, CaseId, CaseType, DocumentExtraction, DocumentId, FieldCandidate, FieldValue,
    SourceLocator,
};
use crate::workflows::underwriting::engine::UnderwritingEngine;
use crate::workflows::underwriting::repository::{SnapshotStore, SnapshotStoreError};
use crate::workflows::underwriting::rules::RuleCatalog;
use crate::workflows::underwriting::service::UnderwritingService;

pub(super) fn produced_at(minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 9, minute, 0)
        .single()
        .expect("valid timestamp")
}

pub(super) fn candidate(
    field: &str,
    value: FieldValue,
    confidence: f64,
    document: &str,
    page: u32,
) -> FieldCandidate {
    FieldCandidate {
        field: field.to_string(),
        value,
        confidence,
        source: SourceLocator {
            document_id: DocumentId(document.to_string()),
            page: Some(page),
            region: None,
        },
        produced_at: produced_at(0),
    }
}

pub(super) fn numeric(field: &str, value: Decimal) -> FieldCandidate {
    candidate(field, FieldValue::Numeric(value), 0.95, "doc-application", 1)
}

pub(super) fn text(field: &str, value: &str) -> FieldCandidate {
    candidate(
        field,
        FieldValue::Text(value.to_string()),
        0.95,
        "doc-application",
        1,
    )
}

pub(super) fn flag(field: &str, value: bool) -> FieldCandidate {
    candidate(field, FieldValue::Flag(value), 0.95, "doc-application", 1)
}

/// Salary 150k, 520k loan on a 650k appraisal at 4.79% over 25 years.
pub(super) fn approvable_candidates() -> Vec<FieldCandidate> {
    vec![
        numeric("income.b1.salary.amount", dec!(150000)),
        text("income.b1.salary.frequency", "annual"),
        numeric("loan.amount", dec!(520000)),
        numeric("loan.contract_rate", dec!(4.79)),
        numeric("loan.amortization_months", dec!(300)),
        numeric("property.appraised_value", dec!(650000)),
        numeric("property.annual_taxes", dec!(4800)),
        numeric("property.monthly_heating", dec!(100)),
        text("property.type", "Single Family"),
        numeric("liability.auto.payment", dec!(300)),
        text("liability.auto.kind", "auto loan"),
        numeric("credit.score", dec!(742)),
        flag("credit.bankruptcy", false),
    ]
}

pub(super) fn bundle_with(case_id: &str, candidates: Vec<FieldCandidate>) -> CaseBundle {
    let mut bundle = CaseBundle::new(case_id, CaseType::ConventionalPurchase);
    bundle
        .documents
        .push(DocumentExtraction::completed("doc-application", candidates));
    bundle
}

pub(super) fn approvable_bundle(case_id: &str) -> CaseBundle {
    bundle_with(case_id, approvable_candidates())
}

/// Replace every candidate for `field` with a single numeric value.
pub(super) fn with_numeric(
    mut candidates: Vec<FieldCandidate>,
    field: &str,
    value: Decimal,
) -> Vec<FieldCandidate> {
    candidates.retain(|candidate| candidate.field != field);
    candidates.push(numeric(field, value));
    candidates
}

pub(super) fn engine() -> UnderwritingEngine {
    let catalog = RuleCatalog::builtin().expect("built-in rule sets load");
    UnderwritingEngine::new(EngineConfig::default(), &catalog).expect("default engine builds")
}

pub(super) fn build_service() -> (UnderwritingService<MemoryStore>, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::default());
    let service = UnderwritingService::new(Arc::new(engine()), store.clone());
    (service, store)
}

#[derive(Default, Clone)]
pub(super) struct MemoryStore {
    pub(super) snapshots: Arc<Mutex<BTreeMap<CaseId, Vec<AuditSnapshot>>>>,
}

impl SnapshotStore for MemoryStore {
    fn append(&self, snapshot: AuditSnapshot) -> Result<(), SnapshotStoreError> {
        let mut guard = self.snapshots.lock().expect("store mutex poisoned");
        let history = guard.entry(snapshot.case_id().clone()).or_default();
        if history
            .iter()
            .any(|stored| stored.snapshot_id() == snapshot.snapshot_id())
        {
            return Err(SnapshotStoreError::Conflict(snapshot.snapshot_id()));
        }
        history.push(snapshot);
        Ok(())
    }

    fn latest(&self, case_id: &CaseId) -> Result<Option<AuditSnapshot>, SnapshotStoreError> {
        let guard = self.snapshots.lock().expect("store mutex poisoned");
        Ok(guard
            .get(case_id)
            .and_then(|history| history.last().cloned()))
    }

    fn history(&self, case_id: &CaseId) -> Result<Vec<AuditSnapshot>, SnapshotStoreError> {
        let guard = self.snapshots.lock().expect("store mutex poisoned");
        Ok(guard.get(case_id).cloned().unwrap_or_default())
    }
}

pub(super) struct UnavailableStore;

impl SnapshotStore for UnavailableStore {
    fn append(&self, _snapshot: AuditSnapshot) -> Result<(), SnapshotStoreError> {
        Err(SnapshotStoreError::Unavailable("disk offline".to_string()))
    }

    fn latest(&self, _case_id: &CaseId) -> Result<Option<AuditSnapshot>, SnapshotStoreError> {
        Ok(None)
    }

    fn history(&self, _case_id: &CaseId) -> Result<Vec<AuditSnapshot>, SnapshotStoreError> {
        Err(SnapshotStoreError::Unavailable("disk offline".to_string()))
    }
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}
