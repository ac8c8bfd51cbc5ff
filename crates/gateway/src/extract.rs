//! Request extractors
//!
//! Every rejection is turned into an `AppError` so that malformed input,
//! missing credentials and domain failures share one envelope.

use crate::AppState;
use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        FromRequest, FromRequestParts, Path, Query, Request,
    },
    http::{header::AUTHORIZATION, request::Parts},
    Json,
};
use lexdesk_common::{auth::extract_bearer, errors::AppError, policy::Caller};
use serde::de::DeserializeOwned;

fn bearer_token(parts: &Parts) -> Result<Option<&str>, AppError> {
    let Some(value) = parts.headers.get(AUTHORIZATION) else {
        return Ok(None);
    };
    let header = value.to_str().map_err(|_| AppError::InvalidToken)?;
    extract_bearer(header).map(Some).ok_or(AppError::InvalidToken)
}

/// An authenticated caller with an active profile
#[derive(Debug, Clone)]
pub struct AuthUser(pub Caller);

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)?.ok_or_else(|| AppError::Unauthorized {
            message: "Missing bearer token".to_string(),
        })?;
        let caller = state.services.users.resolve(token).await?;
        tracing::Span::current().record("user_id", caller.uid.as_str());
        Ok(AuthUser(caller))
    }
}

/// Anonymous callers pass through; a presented token must still be valid
#[derive(Debug, Clone)]
pub struct MaybeUser(pub Option<Caller>);

impl MaybeUser {
    pub fn as_ref(&self) -> Option<&Caller> {
        self.0.as_ref()
    }
}

impl FromRequestParts<AppState> for MaybeUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        match bearer_token(parts)? {
            Some(token) => Ok(MaybeUser(Some(state.services.users.resolve(token).await?))),
            None => Ok(MaybeUser(None)),
        }
    }
}

/// JSON body; field rules are checked by the services after authorization
#[derive(Debug, Clone)]
pub struct JsonBody<T>(pub T);

impl<S, T> FromRequest<S> for JsonBody<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(JsonBody(value)),
            Err(rejection) => Err(json_rejection(rejection)),
        }
    }
}

fn json_rejection(rejection: JsonRejection) -> AppError {
    let message = match rejection {
        JsonRejection::MissingJsonContentType(_) => "Expected a JSON body with content-type application/json".to_string(),
        JsonRejection::JsonSyntaxError(_) => "Malformed JSON body".to_string(),
        other => other.body_text(),
    };
    AppError::validation("body", message)
}

/// Query string parameters
#[derive(Debug, Clone)]
pub struct QueryParams<T>(pub T);

impl<S, T> FromRequestParts<S> for QueryParams<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        Query::<T>::from_request_parts(parts, state)
            .await
            .map(|Query(value)| QueryParams(value))
            .map_err(|rejection: QueryRejection| AppError::validation("query", rejection.body_text()))
    }
}

/// Path parameters, e.g. ids that must parse as UUIDs
#[derive(Debug, Clone)]
pub struct PathParam<T>(pub T);

impl<S, T> FromRequestParts<S> for PathParam<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        Path::<T>::from_request_parts(parts, state)
            .await
            .map(|Path(value)| PathParam(value))
            .map_err(|rejection: PathRejection| AppError::validation("path", rejection.body_text()))
    }
}
