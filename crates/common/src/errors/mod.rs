//! Error types for LexDesk services
//!
//! Provides a comprehensive error handling system with:
//! - Distinct error types for different failure modes
//! - HTTP status code mapping
//! - The `{success, error: {code, message, details}}` response envelope
//! - Stable error codes for client handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use uuid::Uuid;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

static EXPOSE_INTERNAL_ERRORS: AtomicBool = AtomicBool::new(false);

/// Show real messages for server-side failures in responses (development only)
pub fn set_expose_internal_errors(expose: bool) {
    EXPOSE_INTERNAL_ERRORS.store(expose, Ordering::Relaxed);
}

fn expose_internal_errors() -> bool {
    EXPOSE_INTERNAL_ERRORS.load(Ordering::Relaxed)
}

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation
    ValidationError,
    UnsupportedFileType,
    InvalidDocumentStatus,
    DocumentNotProcessed,
    BatchTooLarge,
    InvalidDocuments,
    NoTargetUsers,

    // Authentication
    Unauthorized,
    InvalidToken,
    TokenExpired,
    TokenRevoked,
    InvalidCredentials,

    // Authorization
    AccessDenied,
    AccountDisabled,
    SubscriptionRequired,
    InvalidSignature,

    // Resources
    DocumentNotFound,
    AnalysisNotFound,
    UserNotFound,
    ConversationNotFound,
    QuestionNotFound,
    BatchNotFound,
    ObjectNotFound,
    RouteNotFound,

    // Conflicts
    EmailAlreadyExists,

    // Limits
    FileTooLarge,
    RateLimitExceeded,
    RequestTimeout,

    // Server side
    ProcessingFailed,
    DatabaseError,
    StorageError,
    ExtractionError,
    InternalError,
    ConfigurationError,
    ServiceUnavailable,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::UnsupportedFileType => "UNSUPPORTED_FILE_TYPE",
            ErrorCode::InvalidDocumentStatus => "INVALID_DOCUMENT_STATUS",
            ErrorCode::DocumentNotProcessed => "DOCUMENT_NOT_PROCESSED",
            ErrorCode::BatchTooLarge => "BATCH_TOO_LARGE",
            ErrorCode::InvalidDocuments => "INVALID_DOCUMENTS",
            ErrorCode::NoTargetUsers => "NO_TARGET_USERS",
            ErrorCode::Unauthorized => "UNAUTHORIZED",
            ErrorCode::InvalidToken => "INVALID_TOKEN",
            ErrorCode::TokenExpired => "TOKEN_EXPIRED",
            ErrorCode::TokenRevoked => "TOKEN_REVOKED",
            ErrorCode::InvalidCredentials => "INVALID_CREDENTIALS",
            ErrorCode::AccessDenied => "ACCESS_DENIED",
            ErrorCode::AccountDisabled => "ACCOUNT_DISABLED",
            ErrorCode::SubscriptionRequired => "SUBSCRIPTION_REQUIRED",
            ErrorCode::InvalidSignature => "INVALID_SIGNATURE",
            ErrorCode::DocumentNotFound => "DOCUMENT_NOT_FOUND",
            ErrorCode::AnalysisNotFound => "ANALYSIS_NOT_FOUND",
            ErrorCode::UserNotFound => "USER_NOT_FOUND",
            ErrorCode::ConversationNotFound => "CONVERSATION_NOT_FOUND",
            ErrorCode::QuestionNotFound => "QUESTION_NOT_FOUND",
            ErrorCode::BatchNotFound => "BATCH_NOT_FOUND",
            ErrorCode::ObjectNotFound => "OBJECT_NOT_FOUND",
            ErrorCode::RouteNotFound => "ROUTE_NOT_FOUND",
            ErrorCode::EmailAlreadyExists => "EMAIL_ALREADY_EXISTS",
            ErrorCode::FileTooLarge => "FILE_TOO_LARGE",
            ErrorCode::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            ErrorCode::RequestTimeout => "REQUEST_TIMEOUT",
            ErrorCode::ProcessingFailed => "PROCESSING_FAILED",
            ErrorCode::DatabaseError => "DATABASE_ERROR",
            ErrorCode::StorageError => "STORAGE_ERROR",
            ErrorCode::ExtractionError => "EXTRACTION_ERROR",
            ErrorCode::InternalError => "INTERNAL_ERROR",
            ErrorCode::ConfigurationError => "CONFIGURATION_ERROR",
            ErrorCode::ServiceUnavailable => "SERVICE_UNAVAILABLE",
        }
    }
}

/// A single failed field in a validation error
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub code: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Validation errors
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        fields: Vec<FieldError>,
    },

    #[error("Unsupported file type: {content_type}")]
    UnsupportedFileType {
        content_type: String,
        allowed: Vec<String>,
    },

    #[error("Document is {current}, expected {expected}")]
    InvalidDocumentStatus { current: String, expected: String },

    #[error("Document has not been processed yet")]
    DocumentNotProcessed { status: String },

    #[error("Batch must contain between 1 and {max} documents, got {size}")]
    BatchTooLarge { size: usize, max: usize },

    #[error("Some documents cannot be processed")]
    InvalidDocuments { invalid_document_ids: Vec<Uuid> },

    #[error("No users match the broadcast target")]
    NoTargetUsers,

    // Authentication errors
    #[error("Unauthorized: {message}")]
    Unauthorized { message: String },

    #[error("Invalid token")]
    InvalidToken,

    #[error("Token expired")]
    TokenExpired,

    #[error("Token has been revoked")]
    TokenRevoked,

    #[error("Invalid email or password")]
    InvalidCredentials,

    // Authorization errors
    #[error("Access denied")]
    AccessDenied,

    #[error("Account is disabled")]
    AccountDisabled,

    #[error("This feature requires a {} subscription", required.join(" or "))]
    SubscriptionRequired {
        current: String,
        required: Vec<String>,
    },

    #[error("Invalid or expired signature")]
    InvalidSignature,

    // Resource errors
    #[error("Document not found: {id}")]
    DocumentNotFound { id: String },

    #[error("Analysis not found for document {document_id}")]
    AnalysisNotFound { document_id: String },

    #[error("User not found: {id}")]
    UserNotFound { id: String },

    #[error("Conversation not found: {id}")]
    ConversationNotFound { id: String },

    #[error("Question not found: {id}")]
    QuestionNotFound { id: String },

    #[error("Batch job not found: {id}")]
    BatchNotFound { id: String },

    #[error("Object not found: {path}")]
    ObjectNotFound { path: String },

    #[error("Route not found: {path}")]
    RouteNotFound { path: String },

    // Conflict errors
    #[error("Email already registered")]
    EmailAlreadyExists,

    // Limits
    #[error("File size {file_size} exceeds the {plan} plan limit of {max_size} bytes")]
    FileTooLarge {
        max_size: u64,
        file_size: u64,
        plan: String,
    },

    #[error("Rate limit exceeded, retry in {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Request did not complete within {timeout_secs}s")]
    RequestTimeout { timeout_secs: u64 },

    // Server-side errors
    #[error("Document processing failed: {message}")]
    ProcessingFailed { message: String },

    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("Database error: {message}")]
    DatabaseMessage { message: String },

    #[error("Storage error: {message}")]
    Storage { message: String },

    #[error("Extraction service error: {message}")]
    Extraction { message: String },

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("Internal server error: {message}")]
    Internal { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Service unavailable: {message}")]
    ServiceUnavailable { message: String },

    // Generic
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AppError {
    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        AppError::Validation {
            fields: vec![FieldError::new(field, "invalid", message.clone())],
            message,
        }
    }

    pub fn subscription_required(current: &str, required: &[&str]) -> Self {
        AppError::SubscriptionRequired {
            current: current.to_string(),
            required: required.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        AppError::Internal {
            message: message.into(),
        }
    }

    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Validation { .. } => ErrorCode::ValidationError,
            AppError::UnsupportedFileType { .. } => ErrorCode::UnsupportedFileType,
            AppError::InvalidDocumentStatus { .. } => ErrorCode::InvalidDocumentStatus,
            AppError::DocumentNotProcessed { .. } => ErrorCode::DocumentNotProcessed,
            AppError::BatchTooLarge { .. } => ErrorCode::BatchTooLarge,
            AppError::InvalidDocuments { .. } => ErrorCode::InvalidDocuments,
            AppError::NoTargetUsers => ErrorCode::NoTargetUsers,
            AppError::Unauthorized { .. } => ErrorCode::Unauthorized,
            AppError::InvalidToken => ErrorCode::InvalidToken,
            AppError::TokenExpired => ErrorCode::TokenExpired,
            AppError::TokenRevoked => ErrorCode::TokenRevoked,
            AppError::InvalidCredentials => ErrorCode::InvalidCredentials,
            AppError::AccessDenied => ErrorCode::AccessDenied,
            AppError::AccountDisabled => ErrorCode::AccountDisabled,
            AppError::SubscriptionRequired { .. } => ErrorCode::SubscriptionRequired,
            AppError::InvalidSignature => ErrorCode::InvalidSignature,
            AppError::DocumentNotFound { .. } => ErrorCode::DocumentNotFound,
            AppError::AnalysisNotFound { .. } => ErrorCode::AnalysisNotFound,
            AppError::UserNotFound { .. } => ErrorCode::UserNotFound,
            AppError::ConversationNotFound { .. } => ErrorCode::ConversationNotFound,
            AppError::QuestionNotFound { .. } => ErrorCode::QuestionNotFound,
            AppError::BatchNotFound { .. } => ErrorCode::BatchNotFound,
            AppError::ObjectNotFound { .. } => ErrorCode::ObjectNotFound,
            AppError::RouteNotFound { .. } => ErrorCode::RouteNotFound,
            AppError::EmailAlreadyExists => ErrorCode::EmailAlreadyExists,
            AppError::FileTooLarge { .. } => ErrorCode::FileTooLarge,
            AppError::RateLimited { .. } => ErrorCode::RateLimitExceeded,
            AppError::RequestTimeout { .. } => ErrorCode::RequestTimeout,
            AppError::ProcessingFailed { .. } => ErrorCode::ProcessingFailed,
            AppError::Database(_) | AppError::DatabaseMessage { .. } => ErrorCode::DatabaseError,
            AppError::Storage { .. } => ErrorCode::StorageError,
            AppError::Extraction { .. } | AppError::HttpClient(_) => ErrorCode::ExtractionError,
            AppError::Internal { .. } => ErrorCode::InternalError,
            AppError::Configuration { .. } => ErrorCode::ConfigurationError,
            AppError::Serialization(_) => ErrorCode::InternalError,
            AppError::ServiceUnavailable { .. } => ErrorCode::ServiceUnavailable,
            AppError::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            AppError::Validation { .. }
            | AppError::UnsupportedFileType { .. }
            | AppError::InvalidDocumentStatus { .. }
            | AppError::DocumentNotProcessed { .. }
            | AppError::BatchTooLarge { .. }
            | AppError::InvalidDocuments { .. }
            | AppError::NoTargetUsers => StatusCode::BAD_REQUEST,

            // 401 Unauthorized
            AppError::Unauthorized { .. }
            | AppError::InvalidToken
            | AppError::TokenExpired
            | AppError::TokenRevoked
            | AppError::InvalidCredentials => StatusCode::UNAUTHORIZED,

            // 403 Forbidden
            AppError::AccessDenied
            | AppError::AccountDisabled
            | AppError::SubscriptionRequired { .. }
            | AppError::InvalidSignature => StatusCode::FORBIDDEN,

            // 404 Not Found
            AppError::DocumentNotFound { .. }
            | AppError::AnalysisNotFound { .. }
            | AppError::UserNotFound { .. }
            | AppError::ConversationNotFound { .. }
            | AppError::QuestionNotFound { .. }
            | AppError::BatchNotFound { .. }
            | AppError::ObjectNotFound { .. }
            | AppError::RouteNotFound { .. } => StatusCode::NOT_FOUND,

            // 408 Request Timeout
            AppError::RequestTimeout { .. } => StatusCode::REQUEST_TIMEOUT,

            // 409 Conflict
            AppError::EmailAlreadyExists => StatusCode::CONFLICT,

            // 413 Payload Too Large
            AppError::FileTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,

            // 429 Too Many Requests
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,

            // 500 Internal Server Error
            AppError::ProcessingFailed { .. }
            | AppError::Database(_)
            | AppError::DatabaseMessage { .. }
            | AppError::Storage { .. }
            | AppError::Internal { .. }
            | AppError::Configuration { .. }
            | AppError::Serialization(_)
            | AppError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,

            // 502 Bad Gateway
            AppError::Extraction { .. } | AppError::HttpClient(_) => StatusCode::BAD_GATEWAY,

            // 503 Service Unavailable
            AppError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Structured details attached to the error body
    pub fn details(&self) -> Option<serde_json::Value> {
        use serde_json::json;

        match self {
            AppError::Validation { fields, .. } => Some(json!(fields)),
            AppError::UnsupportedFileType { allowed, .. } => {
                Some(json!({ "allowedTypes": allowed }))
            }
            AppError::InvalidDocumentStatus { current, expected } => {
                Some(json!({ "currentStatus": current, "expectedStatus": expected }))
            }
            AppError::DocumentNotProcessed { status } => Some(json!({ "currentStatus": status })),
            AppError::BatchTooLarge { size, max } => Some(json!({ "size": size, "maxSize": max })),
            AppError::InvalidDocuments {
                invalid_document_ids,
            } => Some(json!({ "invalidDocumentIds": invalid_document_ids })),
            AppError::SubscriptionRequired { current, required } => {
                Some(json!({ "currentPlan": current, "requiredPlans": required }))
            }
            AppError::FileTooLarge {
                max_size,
                file_size,
                plan,
            } => Some(json!({ "maxSize": max_size, "fileSize": file_size, "currentPlan": plan })),
            AppError::RateLimited { retry_after_secs } => {
                Some(json!({ "retryAfter": retry_after_secs }))
            }
            AppError::RequestTimeout { timeout_secs } => Some(json!({ "timeoutSecs": timeout_secs })),
            _ => None,
        }
    }

    /// Check if this error should be logged at error level
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }

    /// Check if this error is a client error
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }

    /// Message safe to return to the client
    pub fn public_message(&self) -> String {
        if !self.is_server_error() || expose_internal_errors() {
            return self.to_string();
        }
        match self {
            AppError::ProcessingFailed { .. } => "Document processing failed".to_string(),
            AppError::Extraction { .. } | AppError::HttpClient(_) => {
                "Extraction service is unavailable".to_string()
            }
            AppError::ServiceUnavailable { .. } => "Service temporarily unavailable".to_string(),
            _ => "An internal error occurred".to_string(),
        }
    }
}

/// Error payload inside the response envelope
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Failed response envelope
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: ErrorDetails,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();

        if self.is_server_error() {
            tracing::error!(
                error = %self,
                code = code.as_str(),
                status = status.as_u16(),
                "Server error"
            );
        } else if self.is_client_error() {
            tracing::warn!(
                error = %self,
                code = code.as_str(),
                status = status.as_u16(),
                "Client error"
            );
        }

        let body = ErrorResponse {
            success: false,
            error: ErrorDetails {
                code,
                message: self.public_message(),
                details: self.details(),
            },
        };

        let mut response = (status, Json(body)).into_response();
        if let AppError::RateLimited { retry_after_secs } = self {
            if let Ok(value) = retry_after_secs.to_string().parse() {
                response.headers_mut().insert("retry-after", value);
            }
        }
        response
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut fields: Vec<FieldError> = errors
            .field_errors()
            .into_iter()
            .flat_map(|(field, errs)| {
                errs.iter().map(move |e| {
                    let message = e
                        .message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| format!("{} is invalid", field));
                    FieldError::new(field.to_string(), e.code.to_string(), message)
                })
            })
            .collect();
        fields.sort_by(|a, b| a.field.cmp(&b.field));

        AppError::Validation {
            message: "Request validation failed".to_string(),
            fields,
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Storage {
            message: err.to_string(),
        }
    }
}

impl From<redis::RedisError> for AppError {
    fn from(err: redis::RedisError) -> Self {
        AppError::ServiceUnavailable {
            message: format!("redis: {}", err),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for AppError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        AppError::DatabaseMessage {
            message: format!("migration failed: {}", err),
        }
    }
}
