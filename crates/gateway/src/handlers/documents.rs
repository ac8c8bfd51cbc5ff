//! Document handlers

use crate::extract::{AuthUser, JsonBody, MaybeUser, PathParam, QueryParams};
use crate::response::{created, ok, ApiResult, Created};
use crate::AppState;
use axum::extract::State;
use lexdesk_common::{
    db::models::{AnalysisRecord, Document},
    services::{DocumentPatch, DocumentQuery, DocumentStatusView, DownloadTicket, InitUpload, UploadTicket},
    store::Paged,
};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentList {
    pub documents: Vec<Document>,
    pub total: u64,
    pub limit: u64,
    pub offset: u64,
    pub has_more: bool,
}

impl From<Paged<Document>> for DocumentList {
    fn from(page: Paged<Document>) -> Self {
        Self {
            documents: page.items,
            total: page.total,
            limit: page.limit,
            offset: page.offset,
            has_more: page.has_more,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Deleted {
    pub document_id: Uuid,
    pub deleted: bool,
}

pub async fn init_upload(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    JsonBody(input): JsonBody<InitUpload>,
) -> Created<UploadTicket> {
    let ticket = state.services.documents.init_upload(&caller, input).await?;
    Ok(created(ticket))
}

pub async fn upload_complete(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    PathParam(id): PathParam<Uuid>,
) -> ApiResult<Document> {
    let doc = state.services.documents.confirm_upload(&caller, id).await?;
    Ok(ok(doc))
}

pub async fn list(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    QueryParams(query): QueryParams<DocumentQuery>,
) -> ApiResult<DocumentList> {
    let page = state.services.documents.list(&caller, &query).await?;
    Ok(ok(DocumentList::from(page)))
}

pub async fn get(State(state): State<AppState>, caller: MaybeUser, PathParam(id): PathParam<Uuid>) -> ApiResult<Document> {
    let doc = state.services.documents.get(caller.as_ref(), id).await?;
    Ok(ok(doc))
}

pub async fn update(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    PathParam(id): PathParam<Uuid>,
    JsonBody(patch): JsonBody<DocumentPatch>,
) -> ApiResult<Document> {
    let doc = state.services.documents.update(&caller, id, patch).await?;
    Ok(ok(doc))
}

pub async fn delete(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    PathParam(id): PathParam<Uuid>,
) -> ApiResult<Deleted> {
    state.services.documents.delete(&caller, id).await?;
    Ok(ok(Deleted {
        document_id: id,
        deleted: true,
    }))
}

pub async fn download(
    State(state): State<AppState>,
    caller: MaybeUser,
    PathParam(id): PathParam<Uuid>,
) -> ApiResult<DownloadTicket> {
    let ticket = state.services.documents.download_url(caller.as_ref(), id).await?;
    Ok(ok(ticket))
}

pub async fn status(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    PathParam(id): PathParam<Uuid>,
) -> ApiResult<DocumentStatusView> {
    let view = state.services.documents.status(&caller, id).await?;
    Ok(ok(view))
}

pub async fn latest_analysis(
    State(state): State<AppState>,
    caller: MaybeUser,
    PathParam(id): PathParam<Uuid>,
) -> ApiResult<AnalysisRecord> {
    let record = state.services.analysis.latest(caller.as_ref(), id).await?;
    Ok(ok(record))
}

pub async fn analyses(
    State(state): State<AppState>,
    caller: MaybeUser,
    PathParam(id): PathParam<Uuid>,
) -> ApiResult<Vec<AnalysisRecord>> {
    let records = state.services.analysis.list_by_document(caller.as_ref(), id).await?;
    Ok(ok(records))
}
