//! Unified API error handling.
//!
//! Every JSON endpoint answers failures in the same envelope,
//! `{"error":{"code","message","details"}}`, with a matching HTTP status.
//! Domain errors convert into [`ApiError`] so handlers can use `?`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::auth::AuthError;
use crate::backend::BackendError;
use crate::device::{CameraError, LocationError};
use crate::upload::UploadError;

/// Messages per form field.
pub type FieldErrors = HashMap<String, Vec<String>>;

/// Error codes for API responses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    BadRequest,
    ValidationError,
    Unauthorized,
    Forbidden,
    NotFound,
    Conflict,
    /// A device capability (location, camera) could not deliver
    DeviceError,
    TooManyRequests,
    InternalError,
    /// The backend answered with a failure or could not be reached
    BackendError,
}

impl ErrorCode {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorCode::BadRequest | ErrorCode::ValidationError => StatusCode::BAD_REQUEST,
            ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorCode::Forbidden => StatusCode::FORBIDDEN,
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::Conflict => StatusCode::CONFLICT,
            ErrorCode::DeviceError => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorCode::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
            ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorCode::BackendError => StatusCode::BAD_GATEWAY,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub message: String,
    /// Field-level validation messages
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<FieldErrors>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

/// Unified API error type
#[derive(Debug)]
pub struct ApiError {
    code: ErrorCode,
    status: StatusCode,
    message: String,
    details: Option<FieldErrors>,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            status: code.status_code(),
            code,
            message: message.into(),
            details: None,
        }
    }

    /// Override the status implied by the code
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::BadRequest, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unauthorized, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Forbidden, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::TooManyRequests, message)
    }

    /// Validation failure. With a single message, that message becomes the
    /// top-level one so forms can show it directly.
    pub fn validation(errors: FieldErrors) -> Self {
        let mut messages = errors.values().flatten();
        let message = match (messages.next(), messages.next()) {
            (Some(only), None) => only.clone(),
            _ => format!("Validation failed for {} fields", errors.len()),
        };

        Self {
            details: Some(errors),
            ..Self::new(ErrorCode::ValidationError, message)
        }
    }

    pub fn validation_field(field: &str, message: impl Into<String>) -> Self {
        Self::validation(HashMap::from([(field.to_string(), vec![message.into()])]))
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            error: ErrorBody {
                code: self.code,
                message: self.message,
                details: self.details,
            },
        };

        (self.status, Json(body)).into_response()
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{:?}] {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

impl From<BackendError> for ApiError {
    fn from(err: BackendError) -> Self {
        match &err {
            BackendError::InvalidCredentials => ApiError::unauthorized(err.to_string()),
            BackendError::Unauthorized => {
                ApiError::unauthorized("Your session has expired. Please login again")
            }
            BackendError::Forbidden => ApiError::forbidden(err.to_string()),
            BackendError::EmailTaken => ApiError::new(ErrorCode::Conflict, err.to_string()),
            BackendError::NotFound(_) => ApiError::new(ErrorCode::NotFound, err.to_string()),
            BackendError::Remote { status: 409, message } => {
                ApiError::new(ErrorCode::Conflict, message.clone())
            }
            BackendError::Remote { .. } | BackendError::Http(_) => {
                tracing::error!(error = %err, "Backend request failed");
                ApiError::new(
                    ErrorCode::BackendError,
                    "The backend request failed. Please try again.",
                )
            }
            BackendError::Database(_) | BackendError::Io(_) | BackendError::Internal(_) => {
                tracing::error!(error = %err, "Backend error");
                ApiError::new(ErrorCode::InternalError, "An internal error occurred")
            }
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::InvalidCredentials => ApiError::unauthorized(err.to_string()),
            AuthError::EmailTaken => ApiError::new(ErrorCode::Conflict, err.to_string()),
            AuthError::Validation(errors) => ApiError::validation(errors),
            AuthError::Backend(e) => e.into(),
        }
    }
}

impl From<LocationError> for ApiError {
    fn from(err: LocationError) -> Self {
        ApiError::new(ErrorCode::DeviceError, err.to_string())
    }
}

impl From<CameraError> for ApiError {
    fn from(err: CameraError) -> Self {
        ApiError::new(ErrorCode::DeviceError, err.to_string())
    }
}

impl From<UploadError> for ApiError {
    fn from(err: UploadError) -> Self {
        match err {
            UploadError::NotAnImage | UploadError::EmptyImage | UploadError::MissingPrerequisites => {
                ApiError::validation_field("image", err.to_string())
            }
            UploadError::TooLarge { .. } => ApiError::validation_field("image", err.to_string())
                .with_status(StatusCode::PAYLOAD_TOO_LARGE),
            UploadError::Location(e) => e.into(),
            UploadError::SessionExpired => ApiError::unauthorized(err.to_string()),
            // The flow already logged the cause; the caller only sees the generic message
            UploadError::Backend(_) => ApiError::new(ErrorCode::BackendError, err.to_string()),
        }
    }
}

/// Collects field errors across several checks before failing once.
#[derive(Debug, Default)]
pub struct ValidationErrorBuilder {
    errors: FieldErrors,
}

impl ValidationErrorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) -> &mut Self {
        self.errors
            .entry(field.into())
            .or_default()
            .push(message.into());
        self
    }

    /// Record the error of a validator result, if any
    pub fn check(&mut self, field: &str, result: Result<(), String>) -> &mut Self {
        if let Err(message) = result {
            self.add(field, message);
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn build(self) -> Option<ApiError> {
        (!self.errors.is_empty()).then(|| ApiError::validation(self.errors))
    }

    pub fn finish(self) -> Result<(), ApiError> {
        self.build().map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_serialize_snake_case() {
        assert_eq!(
            serde_json::to_string(&ErrorCode::ValidationError).unwrap(),
            "\"validation_error\""
        );
        assert_eq!(
            serde_json::to_string(&ErrorCode::BackendError).unwrap(),
            "\"backend_error\""
        );
        assert_eq!(ErrorCode::DeviceError.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(ErrorCode::BackendError.status_code(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_validation_error_single_field() {
        let err = ApiError::validation_field("full_name", "Full name is required");
        assert_eq!(err.code, ErrorCode::ValidationError);
        assert_eq!(err.message, "Full name is required");
    }

    #[test]
    fn test_validation_error_multiple_fields() {
        let errors = HashMap::from([
            ("phone".to_string(), vec!["Phone number is required".to_string()]),
            ("email".to_string(), vec!["Please enter a valid email address".to_string()]),
        ]);

        let err = ApiError::validation(errors);
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert!(err.message.contains("2 fields"));
    }

    #[test]
    fn test_validation_error_builder() {
        let mut builder = ValidationErrorBuilder::new();
        builder.add("latitude", "Latitude is required");
        builder.check("image", Err("Please select a valid image file".to_string()));
        builder.check("longitude", Ok(()));
        builder.add("latitude", "Latitude must be between -90 and 90");

        assert!(!builder.is_empty());

        let err = builder.build().unwrap();
        let details = err.details.unwrap();
        assert_eq!(details["latitude"].len(), 2);
        assert_eq!(details["image"].len(), 1);
        assert!(!details.contains_key("longitude"));
    }

    #[test]
    fn test_empty_builder_finishes_ok() {
        assert!(ValidationErrorBuilder::new().finish().is_ok());
    }

    #[test]
    fn test_backend_errors_map_to_statuses() {
        let err: ApiError = BackendError::InvalidCredentials.into();
        assert_eq!(err.status, StatusCode::UNAUTHORIZED);

        let err: ApiError = BackendError::EmailTaken.into();
        assert_eq!(err.status, StatusCode::CONFLICT);

        let err: ApiError = BackendError::Forbidden.into();
        assert_eq!(err.status, StatusCode::FORBIDDEN);

        let err: ApiError = BackendError::Remote {
            status: 503,
            message: "upstream down".to_string(),
        }
        .into();
        assert_eq!(err.code, ErrorCode::BackendError);
        assert!(!err.message.contains("upstream down"));
    }

    #[test]
    fn test_upload_errors_keep_user_messages() {
        let err: ApiError = UploadError::NotAnImage.into();
        assert_eq!(err.code, ErrorCode::ValidationError);
        assert_eq!(err.message, "Please select a valid image file");

        let err: ApiError = UploadError::TooLarge { max: 10 }.into();
        assert_eq!(err.status, StatusCode::PAYLOAD_TOO_LARGE);

        let err: ApiError = UploadError::Backend(BackendError::Internal("disk".to_string())).into();
        assert_eq!(err.message, "Failed to upload image. Please try again.");

        let err: ApiError = LocationError::PermissionDenied.into();
        assert_eq!(err.status, StatusCode::UNPROCESSABLE_ENTITY);
    }
}
