//! Account handlers: registration, sign-in, token checks, password reset

use crate::extract::JsonBody;
use crate::response::{created, ok, ApiResult, Created, Message};
use crate::AppState;
use axum::{body::Bytes, extract::State, http::HeaderMap};
use lexdesk_common::{
    auth::extract_bearer,
    db::models::User,
    errors::AppError,
    services::{AuthSession, LoginInput, RegisterInput},
};
use serde::{Deserialize, Serialize};

pub async fn register(State(state): State<AppState>, JsonBody(input): JsonBody<RegisterInput>) -> Created<AuthSession> {
    let session = state.services.users.register(input).await?;
    Ok(created(session))
}

pub async fn login(State(state): State<AppState>, JsonBody(input): JsonBody<LoginInput>) -> ApiResult<AuthSession> {
    let session = state.services.users.login(input).await?;
    Ok(ok(session))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyTokenRequest {
    pub token: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TokenStatus {
    pub valid: bool,
    pub user: User,
}

/// Check a token given in the body (`{"token": ...}`) or as a bearer header
pub async fn verify_token(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> ApiResult<TokenStatus> {
    let from_body = if body.iter().all(u8::is_ascii_whitespace) {
        None
    } else {
        serde_json::from_slice::<VerifyTokenRequest>(&body)
            .map_err(|_| AppError::validation("body", "Malformed JSON body"))?
            .token
    };
    let token = match from_body {
        Some(token) => token,
        None => headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(extract_bearer)
            .map(str::to_string)
            .ok_or_else(|| AppError::Unauthorized {
                message: "Missing token".to_string(),
            })?,
    };

    let caller = state.services.users.resolve(&token).await?;
    let user = state.services.users.profile(&caller).await?;
    Ok(ok(TokenStatus { valid: true, user }))
}

/// `{email}` starts a reset; `{token, newPassword}` completes one
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetPasswordRequest {
    pub email: Option<String>,
    pub token: Option<String>,
    pub new_password: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetRequested {
    pub message: String,
    /// Only returned when internal details are exposed (development)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reset_token: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum ResetOutcome {
    Requested(ResetRequested),
    Completed(Message),
}

pub async fn reset_password(
    State(state): State<AppState>,
    JsonBody(input): JsonBody<ResetPasswordRequest>,
) -> ApiResult<ResetOutcome> {
    if let Some(token) = input.token {
        let password = input
            .new_password
            .ok_or_else(|| AppError::validation("newPassword", "newPassword is required with a reset token"))?;
        state.services.users.complete_password_reset(&token, &password).await?;
        return Ok(ok(ResetOutcome::Completed(Message::new("Password has been reset"))));
    }

    let email = input
        .email
        .map(|e| e.trim().to_string())
        .filter(|e| !e.is_empty())
        .ok_or_else(|| AppError::validation("email", "email is required"))?;
    let token = state.services.users.request_password_reset(&email).await?;

    // Unknown addresses get the same answer as known ones
    Ok(ok(ResetOutcome::Requested(ResetRequested {
        message: "If the address is registered, a reset link has been sent".to_string(),
        reset_token: token.filter(|_| state.config.server.expose_internal_errors),
    })))
}
