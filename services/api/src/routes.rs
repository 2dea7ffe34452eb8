use crate::infra::AppState;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Extension;
use axum::Json;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use underwriting::error::AppError;
use underwriting::workflows::underwriting::{
    underwriting_router, CaseAssessment, CaseBundle, CaseType, SnapshotStore,
    UnderwritingService,
};

#[derive(Debug, Serialize)]
pub(crate) struct RuleSetEntry {
    pub(crate) case_type: CaseType,
    pub(crate) rule_set: String,
    pub(crate) description: String,
    pub(crate) rules: Vec<String>,
}

pub(crate) fn with_underwriting_routes<S>(service: Arc<UnderwritingService<S>>) -> axum::Router
where
    S: SnapshotStore + 'static,
{
    underwriting_router(service)
        .route("/health", axum::routing::get(healthcheck))
        .route("/ready", axum::routing::get(readiness_endpoint))
        .route("/metrics", axum::routing::get(metrics_endpoint))
        .route("/api/v1/rule-sets", axum::routing::get(rule_sets_endpoint))
        .route(
            "/api/v1/assessments/preview",
            axum::routing::post(preview_endpoint),
        )
}

pub(crate) async fn healthcheck() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub(crate) async fn readiness_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    let ready = state.readiness.load(std::sync::atomic::Ordering::Relaxed);
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let payload = if ready {
        json!({ "status": "ready" })
    } else {
        json!({ "status": "initializing" })
    };

    (status, Json(payload))
}

pub(crate) async fn metrics_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

/// Rule set routing in effect for each case type.
pub(crate) async fn rule_sets_endpoint(
    Extension(state): Extension<AppState>,
) -> Json<Vec<RuleSetEntry>> {
    let entries = CaseType::ordered()
        .into_iter()
        .map(|case_type| {
            let rule_set = state.engine.rule_set_for(case_type);
            RuleSetEntry {
                case_type,
                rule_set: rule_set.id().to_string(),
                description: rule_set.description().to_string(),
                rules: rule_set.rules().iter().map(|rule| rule.id.clone()).collect(),
            }
        })
        .collect();
    Json(entries)
}

/// Assess a bundle without recording a snapshot.
pub(crate) async fn preview_endpoint(
    Extension(state): Extension<AppState>,
    Json(bundle): Json<CaseBundle>,
) -> Result<Json<CaseAssessment>, AppError> {
    if bundle.case_id.0.trim().is_empty() {
        return Err(AppError::Input("case_id must not be empty".to_string()));
    }
    Ok(Json(state.engine.assess(&bundle)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::{build_engine, InMemorySnapshotStore};
    use axum::body::Body;
    use axum::http::Request;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use std::sync::atomic::AtomicBool;
    use tower::ServiceExt;
    use underwriting::config::UnderwritingPaths;

    fn app(ready: bool) -> axum::Router {
        let engine = Arc::new(build_engine(&UnderwritingPaths::default()).expect("engine builds"));
        let handle = PrometheusBuilder::new().build_recorder().handle();
        let state = AppState {
            readiness: Arc::new(AtomicBool::new(ready)),
            metrics: Arc::new(handle),
            engine: engine.clone(),
        };
        let service = Arc::new(UnderwritingService::new(
            engine,
            Arc::new(InMemorySnapshotStore::default()),
        ));
        with_underwriting_routes(service).layer(Extension(state))
    }

    #[tokio::test]
    async fn readiness_reflects_flag() {
        let response = app(false)
            .oneshot(Request::get("/ready").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn rule_sets_lists_every_case_type() {
        let response = app(true)
            .oneshot(
                Request::get("/api/v1/rule-sets")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .expect("body");
        let entries: serde_json::Value = serde_json::from_slice(&body).expect("json");
        let entries = entries.as_array().expect("array");
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[1]["case_type"], "insured_purchase");
        assert_eq!(entries[1]["rule_set"], "residential-insured@2026.1");
    }

    #[tokio::test]
    async fn preview_rejects_blank_case_id() {
        let bundle = CaseBundle::new(" ", CaseType::Refinance);
        let response = app(true)
            .oneshot(
                Request::post("/api/v1/assessments/preview")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(serde_json::to_vec(&bundle).expect("bundle json")))
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
