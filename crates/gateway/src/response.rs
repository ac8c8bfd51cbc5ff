//! Successful response envelope
//!
//! Failures use `lexdesk_common::errors::ErrorResponse`; both share the
//! `{success, data | error}` shape.

use axum::{http::StatusCode, Json};
use lexdesk_common::errors::AppError;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
}

/// Handler result carrying the envelope
pub type ApiResult<T> = Result<Json<ApiResponse<T>>, AppError>;

/// Handler result for creations
pub type Created<T> = Result<(StatusCode, Json<ApiResponse<T>>), AppError>;

pub fn ok<T: Serialize>(data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse { success: true, data })
}

pub fn created<T: Serialize>(data: T) -> (StatusCode, Json<ApiResponse<T>>) {
    (StatusCode::CREATED, ok(data))
}

pub fn accepted<T: Serialize>(data: T) -> (StatusCode, Json<ApiResponse<T>>) {
    (StatusCode::ACCEPTED, ok(data))
}

/// Plain acknowledgement for writes without a meaningful payload
#[derive(Debug, Serialize)]
pub struct Message {
    pub message: String,
}

impl Message {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
