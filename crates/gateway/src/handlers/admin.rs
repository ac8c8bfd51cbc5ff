//! Administrator handlers. Every route requires the admin role.

use crate::extract::{AuthUser, JsonBody, PathParam, QueryParams};
use crate::handlers::documents::{Deleted, DocumentList};
use crate::response::{created, ok, ApiResult, Created};
use crate::AppState;
use axum::extract::State;
use lexdesk_common::{
    db::models::User,
    services::{
        AdminDocumentQuery, AdminStats, AdminUserQuery, Analytics, AnalyticsQuery, BroadcastInput, BroadcastReceipt,
        UserPatch,
    },
};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserList {
    pub users: Vec<User>,
    pub total: u64,
    pub limit: u64,
    pub offset: u64,
    pub has_more: bool,
}

pub async fn stats(State(state): State<AppState>, AuthUser(caller): AuthUser) -> ApiResult<AdminStats> {
    let stats = state.services.admin.stats(&caller).await?;
    Ok(ok(stats))
}

pub async fn analytics(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    QueryParams(query): QueryParams<AnalyticsQuery>,
) -> ApiResult<Analytics> {
    let analytics = state.services.admin.analytics(&caller, &query).await?;
    Ok(ok(analytics))
}

pub async fn list_users(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    QueryParams(query): QueryParams<AdminUserQuery>,
) -> ApiResult<UserList> {
    let page = state.services.admin.list_users(&caller, &query).await?;
    Ok(ok(UserList {
        users: page.items,
        total: page.total,
        limit: page.limit,
        offset: page.offset,
        has_more: page.has_more,
    }))
}

pub async fn list_documents(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    QueryParams(query): QueryParams<AdminDocumentQuery>,
) -> ApiResult<DocumentList> {
    let page = state.services.admin.list_documents(&caller, &query).await?;
    Ok(ok(DocumentList::from(page)))
}

pub async fn update_user(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    PathParam(user_id): PathParam<String>,
    JsonBody(patch): JsonBody<UserPatch>,
) -> ApiResult<User> {
    let user = state.services.admin.update_user(&caller, &user_id, patch).await?;
    Ok(ok(user))
}

pub async fn delete_document(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    PathParam(id): PathParam<Uuid>,
) -> ApiResult<Deleted> {
    state.services.admin.force_delete_document(&caller, id).await?;
    Ok(ok(Deleted {
        document_id: id,
        deleted: true,
    }))
}

pub async fn broadcast(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    JsonBody(input): JsonBody<BroadcastInput>,
) -> Created<BroadcastReceipt> {
    let receipt = state.services.admin.broadcast(&caller, input).await?;
    Ok(created(receipt))
}
