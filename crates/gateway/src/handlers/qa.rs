//! Question and answer handlers

use crate::extract::{AuthUser, JsonBody, PathParam};
use crate::response::{created, ok, ApiResult, Created};
use crate::AppState;
use axum::extract::State;
use lexdesk_common::{
    db::models::QaSession,
    services::{AskInput, FeedbackInput},
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AskRequest {
    pub document_id: Uuid,
    #[serde(flatten)]
    pub question: AskInput,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FollowUpRequest {
    pub conversation_id: Uuid,
    #[serde(flatten)]
    pub question: AskInput,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackRequest {
    pub question_id: Uuid,
    #[serde(flatten)]
    pub feedback: FeedbackInput,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub conversation_id: Uuid,
    pub document_id: Uuid,
    pub sessions: Vec<QaSession>,
}

pub async fn ask(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    JsonBody(req): JsonBody<AskRequest>,
) -> Created<QaSession> {
    let session = state
        .services
        .conversations
        .ask(&caller, req.document_id, req.question)
        .await?;
    Ok(created(session))
}

pub async fn follow_up(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    JsonBody(req): JsonBody<FollowUpRequest>,
) -> Created<QaSession> {
    let session = state
        .services
        .conversations
        .follow_up(&caller, req.conversation_id, req.question)
        .await?;
    Ok(created(session))
}

pub async fn feedback(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    JsonBody(req): JsonBody<FeedbackRequest>,
) -> ApiResult<QaSession> {
    let session = state
        .services
        .conversations
        .record_feedback(&caller, req.question_id, req.feedback)
        .await?;
    Ok(ok(session))
}

pub async fn conversation(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    PathParam(id): PathParam<Uuid>,
) -> ApiResult<Conversation> {
    let sessions = state.services.conversations.history(&caller, id).await?;
    // history() never returns an empty conversation
    let document_id = sessions.first().map(|s| s.document_id).unwrap_or_default();
    Ok(ok(Conversation {
        conversation_id: id,
        document_id,
        sessions,
    }))
}
