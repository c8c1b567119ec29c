// HTTP API Error Types
use axum::response::{IntoResponse, Response};
use std::collections::BTreeMap;

use crate::dispatch::response::{ErrorItem, HandlerResult, ResponseEnvelope};

/// HTTP API error with appropriate status codes and client-friendly messages
#[derive(Debug)]
pub enum ApiError {
    // 400 Bad Request
    BadRequest(String),
    ValidationError {
        message: String,
        field_errors: Option<BTreeMap<String, String>>,
    },
    InvalidJson(String),

    // 401 Unauthorized
    Unauthorized(String),

    // 403 Forbidden
    Forbidden(String),

    // 404 Not Found
    NotFound(String),

    // 409 Conflict
    Conflict(String),

    // 500 Internal Server Error
    InternalServerError(String),
}

impl ApiError {
    /// Get HTTP status code
    pub fn status_code(&self) -> u16 {
        match self {
            ApiError::BadRequest(_) => 400,
            ApiError::ValidationError { .. } => 400,
            ApiError::InvalidJson(_) => 400,
            ApiError::Unauthorized(_) => 401,
            ApiError::Forbidden(_) => 403,
            ApiError::NotFound(_) => 404,
            ApiError::Conflict(_) => 409,
            ApiError::InternalServerError(_) => 500,
        }
    }

    /// Get client-safe error message
    pub fn message(&self) -> &str {
        match self {
            ApiError::BadRequest(msg) => msg,
            ApiError::ValidationError { message, .. } => message,
            ApiError::InvalidJson(msg) => msg,
            ApiError::Unauthorized(msg) => msg,
            ApiError::Forbidden(msg) => msg,
            ApiError::NotFound(msg) => msg,
            ApiError::Conflict(msg) => msg,
            ApiError::InternalServerError(msg) => msg,
        }
    }

    /// Field errors as envelope entries, if this is a validation error
    fn error_items(&self) -> Option<Vec<ErrorItem>> {
        match self {
            ApiError::ValidationError {
                field_errors: Some(field_errors),
                ..
            } => Some(
                field_errors
                    .iter()
                    .map(|(field, message)| ErrorItem::for_field(field.clone(), message.clone()))
                    .collect(),
            ),
            ApiError::ValidationError { message, .. } => Some(vec![ErrorItem::new(message.clone())]),
            _ => None,
        }
    }

    /// Convert to the standard response envelope
    pub fn to_envelope(&self) -> ResponseEnvelope {
        match self.error_items() {
            Some(errors) => ResponseEnvelope::invalid(self.status_code(), errors),
            None => ResponseEnvelope::failure(self.status_code(), self.message()),
        }
    }
}

// Static constructor methods
impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest(message.into())
    }

    pub fn validation_error(
        message: impl Into<String>,
        field_errors: Option<BTreeMap<String, String>>,
    ) -> Self {
        ApiError::ValidationError {
            message: message.into(),
            field_errors,
        }
    }

    /// Validation error for a single field
    pub fn field_error(field: impl Into<String>, message: impl Into<String>) -> Self {
        let mut field_errors = BTreeMap::new();
        field_errors.insert(field.into(), message.into());
        ApiError::validation_error("Invalid field", Some(field_errors))
    }

    pub fn invalid_json(message: impl Into<String>) -> Self {
        ApiError::InvalidJson(message.into())
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        ApiError::Unauthorized(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        ApiError::Forbidden(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ApiError::NotFound(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        ApiError::Conflict(message.into())
    }

    pub fn internal_server_error(message: impl Into<String>) -> Self {
        ApiError::InternalServerError(message.into())
    }
}

// Convert other error types to ApiError
impl From<crate::database::StoreError> for ApiError {
    fn from(err: crate::database::StoreError) -> Self {
        match err {
            crate::database::StoreError::NotFound { collection, id } => {
                ApiError::not_found(format!("{} {} not found", collection, id))
            }
            crate::database::StoreError::Conflict(msg) => ApiError::conflict(msg),
            crate::database::StoreError::InvalidRecord(msg) => {
                // Records are built by handlers; a malformed one is our bug
                tracing::error!("Invalid record: {}", msg);
                ApiError::internal_server_error("An error occurred while processing your request")
            }
        }
    }
}

impl From<crate::auth::JwtError> for ApiError {
    fn from(err: crate::auth::JwtError) -> Self {
        match err {
            crate::auth::JwtError::Invalid(msg) => ApiError::unauthorized(format!("Invalid token: {}", msg)),
            other => {
                tracing::error!("Token error: {}", other);
                ApiError::internal_server_error("Unable to process token")
            }
        }
    }
}

impl From<crate::auth::PasswordError> for ApiError {
    fn from(err: crate::auth::PasswordError) -> Self {
        tracing::error!("{}", err);
        ApiError::internal_server_error("Unable to process password")
    }
}

// Handlers report client errors through ApiError; the dispatcher sees results
impl From<ApiError> for HandlerResult {
    fn from(err: ApiError) -> Self {
        if err.status_code() >= 500 {
            tracing::error!("Handler error: {}", err);
            return HandlerResult::fail("Internal server error", err.status_code());
        }
        match err.error_items() {
            Some(errors) => HandlerResult::ValidationFailure {
                errors,
                code: Some(err.status_code()),
            },
            None => HandlerResult::Failure {
                message: err.message().to_string(),
                code: Some(err.status_code()),
            },
        }
    }
}

// Standard error trait implementations
impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for ApiError {}

// Automatic HTTP response conversion for Axum
impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        self.to_envelope().into_response()
    }
}
