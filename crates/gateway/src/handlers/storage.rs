//! Signed-URL object endpoint
//!
//! Upload and download URLs issued by the document service point here. The
//! signature is the only credential; no bearer token is required.

use crate::extract::{PathParam, QueryParams};
use crate::response::{ok, ApiResult};
use crate::AppState;
use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap},
    response::{IntoResponse, Response},
};
use lexdesk_common::{errors::AppError, storage::UrlMethod};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct SignedQuery {
    pub method: UrlMethod,
    pub expires: i64,
    pub signature: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredObject {
    pub path: String,
    pub size: usize,
}

fn check(state: &AppState, expected: UrlMethod, path: &str, query: &SignedQuery) -> Result<(), AppError> {
    if query.method != expected {
        return Err(AppError::InvalidSignature);
    }
    state
        .services
        .blobs
        .signer()
        .verify(expected, path, query.expires, &query.signature)
}

pub async fn put_object(
    State(state): State<AppState>,
    PathParam(path): PathParam<String>,
    QueryParams(query): QueryParams<SignedQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<StoredObject> {
    check(&state, UrlMethod::Put, &path, &query)?;

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream");
    let size = body.len();
    state.services.blobs.put(&path, body.to_vec(), content_type).await?;

    tracing::info!(path = %path, size, "Object stored");
    Ok(ok(StoredObject { path, size }))
}

pub async fn get_object(
    State(state): State<AppState>,
    PathParam(path): PathParam<String>,
    QueryParams(query): QueryParams<SignedQuery>,
) -> Result<Response, AppError> {
    check(&state, UrlMethod::Get, &path, &query)?;

    let bytes = state.services.blobs.get(&path).await?;
    let file_name: String = path
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .chars()
        .filter(|c| (c.is_ascii_graphic() || *c == ' ') && *c != '"')
        .collect();
    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (header::CONTENT_DISPOSITION, format!("attachment; filename=\"{}\"", file_name)),
        ],
        bytes,
    )
        .into_response())
}
