//! Processing handlers: single runs, reanalysis and batches

use crate::extract::{AuthUser, JsonBody, PathParam};
use crate::response::{accepted, ok, ApiResult, Created};
use crate::AppState;
use axum::extract::State;
use lexdesk_common::{
    db::models::{BatchJob, ProcessingOptions},
    services::{DocumentStatusView, ProcessOutcome, ProcessingMode},
};
use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessRequest {
    pub document_id: Uuid,
    #[serde(default)]
    pub options: ProcessingOptions,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRequest {
    pub document_ids: Vec<Uuid>,
    #[serde(default)]
    pub options: ProcessingOptions,
}

pub async fn process_document(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    JsonBody(req): JsonBody<ProcessRequest>,
) -> ApiResult<ProcessOutcome> {
    let outcome = state
        .services
        .documents
        .process(&caller, req.document_id, req.options, ProcessingMode::Initial)
        .await?;
    Ok(ok(outcome))
}

pub async fn reanalyze(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    JsonBody(req): JsonBody<ProcessRequest>,
) -> ApiResult<ProcessOutcome> {
    let outcome = state
        .services
        .documents
        .process(&caller, req.document_id, req.options, ProcessingMode::Reanalysis)
        .await?;
    Ok(ok(outcome))
}

pub async fn status(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    PathParam(document_id): PathParam<Uuid>,
) -> ApiResult<DocumentStatusView> {
    let view = state.services.documents.status(&caller, document_id).await?;
    Ok(ok(view))
}

/// Accepted for background processing; poll `/process/batch/{id}`
pub async fn create_batch(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    JsonBody(req): JsonBody<BatchRequest>,
) -> Created<BatchJob> {
    let job = state
        .services
        .documents
        .create_batch(&caller, req.document_ids, req.options)
        .await?;
    Ok(accepted(job))
}

pub async fn get_batch(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    PathParam(batch_id): PathParam<Uuid>,
) -> ApiResult<BatchJob> {
    let job = state.services.documents.get_batch(&caller, batch_id).await?;
    Ok(ok(job))
}
