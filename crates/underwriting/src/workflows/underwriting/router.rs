use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};

use super::audit::AuditSnapshot;
use super::domain::{CaseBundle, CaseId};
use super::repository::SnapshotStore;
use super::service::{SnapshotSummary, UnderwritingService};
use crate::error::AppError;

/// Router exposing case assessment and audit history endpoints.
pub fn underwriting_router<S>(service: Arc<UnderwritingService<S>>) -> Router
where
    S: SnapshotStore + 'static,
{
    Router::new()
        .route(
            "/api/v1/cases/:case_id/assessments",
            post(assess_handler::<S>),
        )
        .route("/api/v1/cases/:case_id/snapshots", get(history_handler::<S>))
        .route(
            "/api/v1/cases/:case_id/snapshots/latest",
            get(latest_handler::<S>),
        )
        .with_state(service)
}

pub(crate) async fn assess_handler<S>(
    State(service): State<Arc<UnderwritingService<S>>>,
    Path(case_id): Path<String>,
    Json(bundle): Json<CaseBundle>,
) -> Result<(StatusCode, Json<AuditSnapshot>), AppError>
where
    S: SnapshotStore + 'static,
{
    if bundle.case_id.0 != case_id {
        return Err(AppError::CaseMismatch {
            path: case_id,
            body: bundle.case_id,
        });
    }

    let snapshot = service.evaluate(&bundle)?;
    Ok((StatusCode::CREATED, Json(snapshot)))
}

pub(crate) async fn history_handler<S>(
    State(service): State<Arc<UnderwritingService<S>>>,
    Path(case_id): Path<String>,
) -> Result<Json<Value>, AppError>
where
    S: SnapshotStore + 'static,
{
    let case_id = CaseId(case_id);
    let history = service.history(&case_id)?;
    let snapshots: Vec<SnapshotSummary> = history.iter().map(SnapshotSummary::from).collect();
    Ok(Json(json!({
        "case_id": case_id,
        "snapshots": snapshots,
    })))
}

pub(crate) async fn latest_handler<S>(
    State(service): State<Arc<UnderwritingService<S>>>,
    Path(case_id): Path<String>,
) -> Result<Json<AuditSnapshot>, AppError>
where
    S: SnapshotStore + 'static,
{
    Ok(Json(service.latest(&CaseId(case_id))?))
}
