//! Questions and answers about processed documents

use crate::db::models::*;
use crate::errors::{AppError, Result};
use crate::extraction::{AnswerRequest, DocumentExtractionService};
use crate::metrics;
use crate::policy::{authorize, Action, Caller, ResourceRef};
use crate::store::{usage_month, Store};
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AskInput {
    #[validate(length(min = 1, max = 2000, message = "question must be 1-2000 characters"))]
    pub question: String,

    #[validate(length(max = 5000))]
    pub context: Option<String>,

    #[validate(length(min = 2, max = 10))]
    pub language: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackInput {
    pub helpful: bool,

    #[validate(length(max = 2000))]
    pub comment: Option<String>,
}

#[derive(Clone)]
pub struct ConversationService {
    store: Arc<dyn Store>,
    extractor: Arc<dyn DocumentExtractionService>,
}

impl ConversationService {
    pub fn new(store: Arc<dyn Store>, extractor: Arc<dyn DocumentExtractionService>) -> Self {
        Self { store, extractor }
    }

    /// Start a new conversation about a document
    #[instrument(skip(self, caller, input), fields(user_id = %caller.uid))]
    pub async fn ask(&self, caller: &Caller, document_id: Uuid, input: AskInput) -> Result<QaSession> {
        let doc = self
            .store
            .get_document(document_id)
            .await?
            .ok_or_else(|| AppError::DocumentNotFound {
                id: document_id.to_string(),
            })?;
        authorize(Some(caller), Action::Ask, ResourceRef::from(&doc))?;
        input.validate()?;

        let outcome = self.answer_and_record(caller, &doc, Uuid::new_v4(), input, &[]).await;
        metrics::record_question(false, outcome.is_ok());
        outcome
    }

    /// Continue a conversation the caller started
    #[instrument(skip(self, caller, input), fields(user_id = %caller.uid))]
    pub async fn follow_up(&self, caller: &Caller, conversation_id: Uuid, input: AskInput) -> Result<QaSession> {
        let history = self.owned_conversation(caller, conversation_id).await?;
        input.validate()?;

        let document_id = history[0].document_id;
        let doc = self
            .store
            .get_document(document_id)
            .await?
            .ok_or_else(|| AppError::DocumentNotFound {
                id: document_id.to_string(),
            })?;
        authorize(Some(caller), Action::Ask, ResourceRef::from(&doc))?;

        let outcome = self
            .answer_and_record(caller, &doc, conversation_id, input, &history)
            .await;
        metrics::record_question(true, outcome.is_ok());
        outcome
    }

    async fn answer_and_record(
        &self,
        caller: &Caller,
        doc: &Document,
        conversation_id: Uuid,
        input: AskInput,
        history: &[QaSession],
    ) -> Result<QaSession> {
        if doc.status != DocumentStatus::Processed {
            return Err(AppError::DocumentNotProcessed {
                status: doc.status.as_str().to_string(),
            });
        }
        let analysis = self
            .store
            .latest_analysis(doc.id)
            .await?
            .ok_or_else(|| AppError::AnalysisNotFound {
                document_id: doc.id.to_string(),
            })?;

        let language = input
            .language
            .clone()
            .or_else(|| analysis.result.language.clone())
            .unwrap_or_else(|| "en".to_string());
        let asked_at = Utc::now();

        let answer = self
            .extractor
            .answer(AnswerRequest {
                question: &input.question,
                context: input.context.as_deref(),
                language: &language,
                analysis: &analysis,
                history,
            })
            .await?;

        let session = QaSession {
            id: Uuid::new_v4(),
            seq: 0,
            conversation_id,
            document_id: doc.id,
            user_id: caller.uid.clone(),
            question: Question {
                text: input.question,
                context: input.context,
                language,
                timestamp: asked_at,
            },
            answer,
            feedback: None,
            is_follow_up: !history.is_empty(),
            created_at: Utc::now(),
        };
        let session = self.store.insert_qa_session(session).await?;

        if let Err(e) = self.store.bump_document_counters(doc.id, 0, 1, None).await {
            warn!(document_id = %doc.id, error = %e, "Failed to count question");
        }
        if let Err(e) = self
            .store
            .apply_usage(&caller.uid, UsageDelta::api_call(), &usage_month(Utc::now()))
            .await
        {
            warn!(user_id = %caller.uid, error = %e, "Failed to update usage counters");
        }

        info!(
            document_id = %doc.id,
            conversation_id = %conversation_id,
            follow_up = session.is_follow_up,
            "Question answered"
        );
        Ok(session)
    }

    /// Sessions of a conversation rooted by the caller, oldest first
    async fn owned_conversation(&self, caller: &Caller, conversation_id: Uuid) -> Result<Vec<QaSession>> {
        let sessions = self.store.list_conversation(conversation_id).await?;
        match sessions.first() {
            Some(root) if root.user_id == caller.uid => Ok(sessions),
            _ => Err(AppError::ConversationNotFound {
                id: conversation_id.to_string(),
            }),
        }
    }

    pub async fn history(&self, caller: &Caller, conversation_id: Uuid) -> Result<Vec<QaSession>> {
        self.owned_conversation(caller, conversation_id).await
    }

    /// Overwrite the feedback on one answer
    #[instrument(skip(self, caller, input), fields(user_id = %caller.uid))]
    pub async fn record_feedback(&self, caller: &Caller, question_id: Uuid, input: FeedbackInput) -> Result<QaSession> {
        let session = self
            .store
            .get_qa_session(question_id)
            .await?
            .ok_or_else(|| AppError::QuestionNotFound {
                id: question_id.to_string(),
            })?;
        authorize(
            Some(caller),
            Action::Feedback,
            ResourceRef {
                owner_id: &session.user_id,
                is_public: false,
            },
        )?;
        input.validate()?;

        let feedback = Feedback {
            helpful: input.helpful,
            comment: input.comment.filter(|c| !c.trim().is_empty()),
            submitted_at: Utc::now(),
        };
        self.store
            .set_feedback(question_id, feedback)
            .await?
            .ok_or_else(|| AppError::QuestionNotFound {
                id: question_id.to_string(),
            })
    }
}
