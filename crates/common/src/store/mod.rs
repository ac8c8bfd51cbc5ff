//! Persistence seam
//!
//! One async trait covers every record type together with the atomic
//! primitives the document lifecycle relies on:
//! - guarded status transitions (compare-and-set on `status`)
//! - the processing completion transaction
//! - cascading deletes
//! - all-or-nothing batch enqueue
//!
//! `PgStore` (SeaORM) and `MemoryStore` implement it.

mod memory;

pub use memory::MemoryStore;

use crate::db::models::*;
use crate::errors::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Mutation applied to a document inside a guarded update
pub type DocumentMutation = Box<dyn FnOnce(&mut Document) + Send>;

/// Outcome of a guarded document update
#[derive(Debug, Clone)]
pub enum Transition {
    Applied(Document),
    Missing,
    /// The document exists but its status was not one of the expected ones
    Rejected(DocumentStatus),
}

/// Outcome of an atomic batch enqueue
#[derive(Debug, Clone)]
pub enum BatchEnqueue {
    Created(BatchJob),
    Rejected { invalid_document_ids: Vec<Uuid> },
}

/// Input for a processing completion
#[derive(Debug, Clone)]
pub struct AnalysisDraft {
    pub result: AnalysisResult,
    pub options: ProcessingOptions,
}

/// Half-open time range `[from, to)`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl TimeRange {
    pub fn between(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self {
            from: Some(from),
            to: Some(to),
        }
    }

    pub fn since(from: DateTime<Utc>) -> Self {
        Self {
            from: Some(from),
            to: None,
        }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.from.map_or(true, |f| at >= f) && self.to.map_or(true, |t| at < t)
    }
}

/// Offset pagination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub limit: u64,
    pub offset: u64,
}

impl Page {
    pub const DEFAULT_LIMIT: u64 = 20;
    pub const MAX_LIMIT: u64 = 100;

    pub fn new(limit: Option<u64>, offset: Option<u64>) -> Self {
        Self {
            limit: limit
                .unwrap_or(Self::DEFAULT_LIMIT)
                .clamp(1, Self::MAX_LIMIT),
            offset: offset.unwrap_or(0),
        }
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(None, None)
    }
}

/// One page of results together with the exact filtered total
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Paged<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub limit: u64,
    pub offset: u64,
    pub has_more: bool,
}

impl<T> Paged<T> {
    pub fn new(items: Vec<T>, total: u64, page: Page) -> Self {
        let has_more = page.offset + (items.len() as u64) < total;
        Self {
            items,
            total,
            limit: page.limit,
            offset: page.offset,
            has_more,
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Paged<U> {
        Paged {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            limit: self.limit,
            offset: self.offset,
            has_more: self.has_more,
        }
    }
}

/// Document query predicate. Every field narrows the result.
#[derive(Debug, Clone, Default)]
pub struct DocumentFilter {
    pub owner_id: Option<String>,
    pub statuses: Vec<DocumentStatus>,
    /// Document must carry every tag
    pub tags: Vec<String>,
    /// Case-insensitive substring of file name, title or description
    pub search: Option<String>,
    pub created: TimeRange,
}

impl DocumentFilter {
    pub fn owned_by(owner_id: &str) -> Self {
        Self {
            owner_id: Some(owner_id.to_string()),
            ..Default::default()
        }
    }

    pub fn with_status(mut self, status: DocumentStatus) -> Self {
        self.statuses.push(status);
        self
    }

    pub fn created_in(mut self, range: TimeRange) -> Self {
        self.created = range;
        self
    }

    pub fn matches(&self, doc: &Document) -> bool {
        if let Some(ref owner) = self.owner_id {
            if &doc.owner_id != owner {
                return false;
            }
        }
        if !self.statuses.is_empty() && !self.statuses.contains(&doc.status) {
            return false;
        }
        if !doc.tags.contains_all(&self.tags) {
            return false;
        }
        if let Some(ref needle) = self.search {
            let needle = needle.to_lowercase();
            let hit = doc.file_name.to_lowercase().contains(&needle)
                || doc.title.to_lowercase().contains(&needle)
                || doc
                    .description
                    .as_deref()
                    .map(|d| d.to_lowercase().contains(&needle))
                    .unwrap_or(false);
            if !hit {
                return false;
            }
        }
        self.created.contains(doc.created_at)
    }
}

/// User query predicate
#[derive(Debug, Clone, Default)]
pub struct UserFilter {
    pub role: Option<Role>,
    pub subscription: Option<Subscription>,
    pub is_active: Option<bool>,
    /// Case-insensitive substring of email or display name
    pub search: Option<String>,
    pub created: TimeRange,
}

impl UserFilter {
    pub fn active() -> Self {
        Self {
            is_active: Some(true),
            ..Default::default()
        }
    }

    pub fn matches(&self, user: &User) -> bool {
        if self.role.map_or(false, |r| r != user.role) {
            return false;
        }
        if self.subscription.map_or(false, |s| s != user.subscription) {
            return false;
        }
        if self.is_active.map_or(false, |a| a != user.is_active) {
            return false;
        }
        if let Some(ref needle) = self.search {
            let needle = needle.to_lowercase();
            if !user.email.to_lowercase().contains(&needle)
                && !user.display_name.to_lowercase().contains(&needle)
            {
                return false;
            }
        }
        self.created.contains(user.created_at)
    }
}

/// Storage of every LexDesk record type
#[async_trait]
pub trait Store: Send + Sync {
    /// Check backend connectivity
    async fn ping(&self) -> Result<()>;

    /// Name used in logs and readiness output
    fn backend_name(&self) -> &'static str;

    // Users

    async fn insert_user(&self, user: User) -> Result<User>;

    async fn get_user(&self, id: &str) -> Result<Option<User>>;

    async fn save_user(&self, user: User) -> Result<User>;

    /// Best-effort usage counter update; missing users are ignored
    async fn apply_usage(&self, user_id: &str, delta: UsageDelta, month: &str) -> Result<()>;

    async fn list_users(&self, filter: &UserFilter, page: Page) -> Result<Paged<User>>;

    async fn count_users(&self, filter: &UserFilter) -> Result<u64>;

    async fn active_user_ids(&self) -> Result<Vec<String>>;

    /// Remove the user and every record they own in one atomic unit
    async fn delete_user_cascade(&self, user_id: &str) -> Result<bool>;

    // Identities

    async fn insert_identity(&self, identity: IdentityAccount) -> Result<IdentityAccount>;

    async fn get_identity(&self, uid: &str) -> Result<Option<IdentityAccount>>;

    async fn find_identity_by_email(&self, email: &str) -> Result<Option<IdentityAccount>>;

    async fn save_identity(&self, identity: IdentityAccount) -> Result<IdentityAccount>;

    async fn delete_identity(&self, uid: &str) -> Result<bool>;

    // Documents

    async fn insert_document(&self, document: Document) -> Result<Document>;

    async fn get_document(&self, id: Uuid) -> Result<Option<Document>>;

    /// Apply `mutate` only if the current status is one of `expected`
    /// (any status when `None`). Linearizable per document.
    async fn update_document_if(
        &self,
        id: Uuid,
        expected: Option<&[DocumentStatus]>,
        mutate: DocumentMutation,
    ) -> Result<Transition>;

    /// Best-effort counter bumps
    async fn bump_document_counters(
        &self,
        id: Uuid,
        views: i64,
        questions: i64,
        viewed_at: Option<DateTime<Utc>>,
    ) -> Result<()>;

    async fn list_documents(&self, filter: &DocumentFilter, page: Page) -> Result<Paged<Document>>;

    async fn count_documents(&self, filter: &DocumentFilter) -> Result<u64>;

    /// Delete the document with its analyses and Q&A sessions
    async fn delete_document_cascade(&self, id: Uuid) -> Result<bool>;

    /// Insert the analysis record and point the document at it, in one unit.
    /// `None` when the document is gone or no longer processing.
    async fn complete_processing(
        &self,
        id: Uuid,
        draft: AnalysisDraft,
        at: DateTime<Utc>,
    ) -> Result<Option<(Document, AnalysisRecord)>>;

    // Analyses

    async fn append_analysis(&self, record: AnalysisRecord) -> Result<AnalysisRecord>;

    async fn latest_analysis(&self, document_id: Uuid) -> Result<Option<AnalysisRecord>>;

    /// Newest first
    async fn list_analyses(&self, document_id: Uuid) -> Result<Vec<AnalysisRecord>>;

    async fn count_analyses(&self, created: TimeRange) -> Result<u64>;

    // Q&A sessions

    async fn insert_qa_session(&self, session: QaSession) -> Result<QaSession>;

    async fn get_qa_session(&self, id: Uuid) -> Result<Option<QaSession>>;

    /// Creation order
    async fn list_conversation(&self, conversation_id: Uuid) -> Result<Vec<QaSession>>;

    async fn set_feedback(&self, id: Uuid, feedback: Feedback) -> Result<Option<QaSession>>;

    async fn count_qa_sessions(&self, created: TimeRange) -> Result<u64>;

    // Batch jobs

    /// Mark every member queued and insert the job, or change nothing
    async fn create_batch(&self, job: BatchJob) -> Result<BatchEnqueue>;

    async fn get_batch(&self, id: Uuid) -> Result<Option<BatchJob>>;

    async fn save_batch(&self, job: BatchJob) -> Result<BatchJob>;

    // Notifications

    async fn insert_notifications(&self, notifications: Vec<Notification>) -> Result<u64>;

    async fn list_notifications(&self, user_id: &str, limit: u64) -> Result<Vec<Notification>>;
}

/// Calendar month key used for the monthly document counter
pub fn usage_month(at: DateTime<Utc>) -> String {
    at.format("%Y-%m").to_string()
}

/// Shared completion step: build the record and update the document.
/// The record's `seq` is assigned by the caller's backend.
pub(crate) fn finish_processing(
    doc: &mut Document,
    draft: AnalysisDraft,
    at: DateTime<Utc>,
) -> AnalysisRecord {
    let previous = doc.analysis.as_ref().map(|p| p.analysis_id);
    let analysis_type = if previous.is_some() {
        AnalysisType::Reanalysis
    } else {
        AnalysisType::FullAnalysis
    };

    let record = AnalysisRecord {
        id: Uuid::new_v4(),
        seq: 0,
        document_id: doc.id,
        owner_id: doc.owner_id.clone(),
        analysis_type,
        result: draft.result,
        options: draft.options,
        previous_analysis_id: previous,
        created_at: at,
    };

    doc.status = DocumentStatus::Processed;
    doc.processing.status = Some(ProcessingState::Completed);
    doc.processing.completed_at = Some(at);
    doc.processing.error = None;
    doc.analysis = Some(pointer_for(&record));
    doc.updated_at = at;

    record
}

pub(crate) fn pointer_for(record: &AnalysisRecord) -> AnalysisPointer {
    AnalysisPointer {
        analysis_id: record.id,
        analysis_type: record.analysis_type,
        summary: record.result.summary.clone(),
        risk_level: record.result.risk_level(),
        risk_count: record.result.risks.len() as u32,
        entity_count: record.result.entities.len() as u32,
        confidence: record.result.confidence,
        analyzed_at: record.created_at,
    }
}

/// Whether a batch member may be enqueued by `owner_id`
pub(crate) fn batch_member_valid(doc: Option<&Document>, owner_id: &str) -> bool {
    matches!(doc, Some(d) if d.owner_id == owner_id && d.status == DocumentStatus::Uploaded)
}

pub(crate) fn mark_queued(doc: &mut Document, job: &BatchJob) {
    doc.status = DocumentStatus::Processing;
    doc.processing = ProcessingInfo::queued(job.options.clone(), job.id, job.created_at);
    doc.updated_at = job.created_at;
}
