use crate::config::ConfigError;
use crate::telemetry::TelemetryError;
use crate::workflows::underwriting::{
    CaseId, EngineConfigError, RuleSetError, SnapshotStoreError, UnderwritingServiceError,
};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::fmt;

/// Failures that can stop the process or a request at the application boundary.
#[derive(Debug)]
pub enum AppError {
    Config(ConfigError),
    Telemetry(TelemetryError),
    Io(std::io::Error),
    Server(axum::Error),
    EngineConfig(EngineConfigError),
    RuleSet(RuleSetError),
    Snapshot(SnapshotStoreError),
    Underwriting(UnderwritingServiceError),
    Input(String),
    CaseMismatch { path: String, body: CaseId },
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Config(err) => write!(f, "configuration error: {}", err),
            AppError::Telemetry(err) => write!(f, "telemetry error: {}", err),
            AppError::Io(err) => write!(f, "io error: {}", err),
            AppError::Server(err) => write!(f, "server error: {}", err),
            AppError::EngineConfig(err) => write!(f, "engine configuration error: {}", err),
            AppError::RuleSet(err) => write!(f, "rule set error: {}", err),
            AppError::Snapshot(err) => write!(f, "snapshot store error: {}", err),
            AppError::Underwriting(err) => write!(f, "underwriting error: {}", err),
            AppError::Input(message) => write!(f, "invalid input: {}", message),
            AppError::CaseMismatch { path, body } => {
                write!(f, "body case_id {} does not match path {}", body, path)
            }
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AppError::Config(err) => Some(err),
            AppError::Telemetry(err) => Some(err),
            AppError::Io(err) => Some(err),
            AppError::Server(err) => Some(err),
            AppError::EngineConfig(err) => Some(err),
            AppError::RuleSet(err) => Some(err),
            AppError::Snapshot(err) => Some(err),
            AppError::Underwriting(err) => Some(err),
            AppError::Input(_) | AppError::CaseMismatch { .. } => None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::Input(_) | AppError::Snapshot(SnapshotStoreError::InvalidCaseId(_)) => {
                StatusCode::BAD_REQUEST
            }
            AppError::CaseMismatch { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Underwriting(UnderwritingServiceError::NotFound(_)) => StatusCode::NOT_FOUND,
            AppError::Snapshot(SnapshotStoreError::Conflict(_)) => StatusCode::CONFLICT,
            AppError::Config(_)
            | AppError::Telemetry(_)
            | AppError::Io(_)
            | AppError::Server(_)
            | AppError::EngineConfig(_)
            | AppError::RuleSet(_)
            | AppError::Snapshot(_)
            | AppError::Underwriting(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

impl From<ConfigError> for AppError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

impl From<TelemetryError> for AppError {
    fn from(value: TelemetryError) -> Self {
        Self::Telemetry(value)
    }
}

impl From<std::io::Error> for AppError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<axum::Error> for AppError {
    fn from(value: axum::Error) -> Self {
        Self::Server(value)
    }
}

impl From<EngineConfigError> for AppError {
    fn from(value: EngineConfigError) -> Self {
        Self::EngineConfig(value)
    }
}

impl From<RuleSetError> for AppError {
    fn from(value: RuleSetError) -> Self {
        Self::RuleSet(value)
    }
}

impl From<SnapshotStoreError> for AppError {
    fn from(value: SnapshotStoreError) -> Self {
        Self::Snapshot(value)
    }
}

impl From<UnderwritingServiceError> for AppError {
    fn from(value: UnderwritingServiceError) -> Self {
        match value {
            UnderwritingServiceError::Store(store) => Self::Snapshot(store),
            other => Self::Underwriting(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_maps_to_404() {
        let error = AppError::from(UnderwritingServiceError::NotFound(CaseId(
            "case-9".to_string(),
        )));
        assert_eq!(error.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn store_errors_are_unwrapped_from_service_errors() {
        let error = AppError::from(UnderwritingServiceError::Store(
            SnapshotStoreError::InvalidCaseId("../etc".to_string()),
        ));
        assert!(matches!(error, AppError::Snapshot(_)));
        assert_eq!(error.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn case_mismatch_is_unprocessable() {
        let error = AppError::CaseMismatch {
            path: "case-1".to_string(),
            body: CaseId("case-2".to_string()),
        };
        assert_eq!(error.to_string(), "body case_id case-2 does not match path case-1");
        assert_eq!(
            error.into_response().status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }

    #[test]
    fn store_conflict_maps_to_409() {
        let error = AppError::from(UnderwritingServiceError::Store(
            SnapshotStoreError::Conflict(uuid::Uuid::nil()),
        ));
        assert_eq!(error.into_response().status(), StatusCode::CONFLICT);
    }

    #[test]
    fn rule_set_errors_are_server_errors() {
        let error = AppError::from(RuleSetError::Empty("/tmp/rules".into()));
        assert!(error.to_string().starts_with("rule set error:"));
        assert_eq!(
            error.into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
