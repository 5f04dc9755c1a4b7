use axum::{
    Json,
    extract::rejection::QueryRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use lib_telemetry::TelemetryError;
use serde_json::json;
use tracing::{error, warn};

/// Failure of a pull request. Rendered as `{"error": "<message>"}` with a
/// non-2xx status.
#[derive(Debug)]
pub enum AppError {
    /// A failure reported by the store gateway or the query facade.
    Telemetry(TelemetryError),
    /// The request itself is malformed (bad path segment or query string).
    BadRequest(String),
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::Telemetry(TelemetryError::StoreUnavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Telemetry(TelemetryError::ValidationRejected(_)) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Telemetry(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            if let AppError::Telemetry(e) = &self {
                if e.is_transient() {
                    warn!("Store unavailable while answering request: {}", e);
                } else {
                    error!("Request failed: {}", e);
                }
            }
        }
        let message = self.to_string();
        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AppError::Telemetry(e) => write!(f, "{}", e),
            AppError::BadRequest(msg) => write!(f, "bad request: {}", msg),
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AppError::Telemetry(e) => Some(e),
            AppError::BadRequest(_) => None,
        }
    }
}

impl From<TelemetryError> for AppError {
    fn from(e: TelemetryError) -> Self {
        AppError::Telemetry(e)
    }
}

impl From<QueryRejection> for AppError {
    fn from(e: QueryRejection) -> Self {
        AppError::BadRequest(e.body_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_follow_the_error_kind() {
        let unavailable = AppError::from(TelemetryError::StoreUnavailable("refused".into()));
        assert_eq!(unavailable.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            AppError::BadRequest("id".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::from(TelemetryError::Config("x".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn response_carries_the_message() {
        let response = AppError::BadRequest("invalid student id 'abc'".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
