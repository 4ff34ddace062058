//! REST API types: request bodies and the error response.
//!
//! Successful responses are the service outputs themselves
//! ([`UploadOutcome`](crate::service::UploadOutcome),
//! [`Submission`](crate::service::Submission),
//! [`TaskStatus`](crate::service::TaskStatus)); only errors need a
//! transport-specific shape: `{"error": "<message>"}` plus a status code.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::error;

use crate::error::{AnalysisError, ServiceError, ValidationError};
use crate::models::PreprocessOptions;

/// Body of `POST /api/csv/preprocess`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreprocessRequest {
    pub file_id: String,
    #[serde(default)]
    pub options: PreprocessOptions,
}

/// Errors returned by handlers.
#[derive(Debug)]
pub enum ApiError {
    Service(ServiceError),
    BadRequest(String),
    PayloadTooLarge(String),
    Internal(String),
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        ApiError::Service(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Service(err) => service_status(err),
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn message(&self) -> String {
        match self {
            ApiError::Service(err) => err.to_string(),
            ApiError::BadRequest(msg) | ApiError::PayloadTooLarge(msg) | ApiError::Internal(msg) => {
                msg.clone()
            }
        }
    }
}

fn service_status(err: &ServiceError) -> StatusCode {
    match err {
        ServiceError::Validation(ValidationError::FileTooLarge { .. }) => StatusCode::PAYLOAD_TOO_LARGE,
        ServiceError::Analysis(AnalysisError::Encode(_)) => StatusCode::INTERNAL_SERVER_ERROR,
        ServiceError::Validation(_) | ServiceError::Analysis(_) => StatusCode::BAD_REQUEST,
        ServiceError::NotFound { .. } => StatusCode::NOT_FOUND,
        ServiceError::Store(_) | ServiceError::QueueClosed => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = self.message();
        if status.is_server_error() {
            error!(%status, error = %message, "request failed");
        }
        (status, Json(error_response(&message))).into_response()
    }
}

/// Create an error response body.
pub fn error_response(error: &str) -> serde_json::Value {
    json!({ "error": error })
}

/// `Content-Disposition` value for a download, with quotes and control
/// characters removed from the name.
pub fn attachment_header(file_name: &str) -> String {
    let safe: String = file_name
        .chars()
        .filter(|c| !c.is_control() && *c != '"' && *c != '\\')
        .collect();
    format!("attachment; filename=\"{safe}\"")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ParseError, StoreError};

    #[test]
    fn test_status_mapping() {
        let too_large: ApiError = ServiceError::from(ValidationError::FileTooLarge { size: 2, max: 1 }).into();
        assert_eq!(too_large.status(), StatusCode::PAYLOAD_TOO_LARGE);

        let bad_type: ApiError = ServiceError::from(ValidationError::UnsupportedFileType("a.txt".into())).into();
        assert_eq!(bad_type.status(), StatusCode::BAD_REQUEST);

        let unparsable: ApiError = ServiceError::from(AnalysisError::Parse(ParseError::Empty)).into();
        assert_eq!(unparsable.status(), StatusCode::BAD_REQUEST);
        assert_eq!(unparsable.message(), "Cannot analyze file: CSV file is empty");

        let missing: ApiError = ServiceError::task_not_found("t-1").into();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
        assert_eq!(missing.message(), "Task not found: t-1");

        let store: ApiError = ServiceError::Store(StoreError::NotFound("x".into())).into();
        assert_eq!(store.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let json_err = serde_json::from_str::<u8>("x").unwrap_err();
        let encode: ApiError = ServiceError::from(AnalysisError::from(json_err)).into();
        assert_eq!(encode.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_preprocess_request_defaults() {
        let request: PreprocessRequest = serde_json::from_str(r#"{"file_id": "abc"}"#).unwrap();
        assert_eq!(request.options, PreprocessOptions::default());

        let request: PreprocessRequest = serde_json::from_str(
            r#"{"file_id": "abc", "options": {"remove_duplicates": true, "handle_missing": "fill_median"}}"#,
        )
        .unwrap();
        assert!(request.options.remove_duplicates);
        assert_eq!(request.options.handle_missing, crate::models::MissingStrategy::FillMedian);
    }

    #[test]
    fn test_attachment_header() {
        assert_eq!(
            attachment_header("processed_sales.csv"),
            "attachment; filename=\"processed_sales.csv\""
        );
        assert_eq!(attachment_header("a\"b\n.csv"), "attachment; filename=\"ab.csv\"");
    }
}
