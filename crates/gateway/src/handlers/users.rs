//! Self-service profile handlers

use crate::extract::{AuthUser, JsonBody};
use crate::response::{ok, ApiResult, Message};
use crate::AppState;
use axum::extract::State;
use lexdesk_common::{
    db::models::{Notification, User},
    services::{ProfilePatch, UserStats},
};

pub async fn profile(State(state): State<AppState>, AuthUser(caller): AuthUser) -> ApiResult<User> {
    let user = state.services.users.profile(&caller).await?;
    Ok(ok(user))
}

pub async fn update_profile(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    JsonBody(patch): JsonBody<ProfilePatch>,
) -> ApiResult<User> {
    let user = state.services.users.update_profile(&caller, patch).await?;
    Ok(ok(user))
}

pub async fn stats(State(state): State<AppState>, AuthUser(caller): AuthUser) -> ApiResult<UserStats> {
    let stats = state.services.users.stats(&caller).await?;
    Ok(ok(stats))
}

pub async fn notifications(State(state): State<AppState>, AuthUser(caller): AuthUser) -> ApiResult<Vec<Notification>> {
    let notifications = state.services.users.notifications(&caller).await?;
    Ok(ok(notifications))
}

pub async fn delete_account(State(state): State<AppState>, AuthUser(caller): AuthUser) -> ApiResult<Message> {
    state.services.users.delete_account(&caller).await?;
    Ok(ok(Message::new("Account deleted")))
}
