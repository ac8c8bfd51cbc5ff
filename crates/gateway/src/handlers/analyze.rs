//! Derived analysis for paid plans

use crate::extract::{AuthUser, JsonBody};
use crate::response::{ok, ApiResult};
use crate::AppState;
use axum::extract::State;
use lexdesk_common::services::{CompareInput, Comparison, RiskAssessment};
use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskAssessmentRequest {
    pub document_id: Uuid,
}

pub async fn risk_assessment(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    JsonBody(req): JsonBody<RiskAssessmentRequest>,
) -> ApiResult<RiskAssessment> {
    let assessment = state.services.analysis.risk_assessment(&caller, req.document_id).await?;
    Ok(ok(assessment))
}

pub async fn compare(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    JsonBody(input): JsonBody<CompareInput>,
) -> ApiResult<Comparison> {
    let comparison = state.services.analysis.compare(&caller, input).await?;
    Ok(ok(comparison))
}
