//! In-process store
//!
//! Every table lives behind a single `RwLock`, so each trait method is one
//! critical section and the atomic primitives hold trivially.

use super::*;
use crate::errors::AppError;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Default)]
struct Tables {
    users: HashMap<String, User>,
    identities: HashMap<String, IdentityAccount>,
    documents: HashMap<Uuid, Document>,
    analyses: HashMap<Uuid, AnalysisRecord>,
    qa_sessions: HashMap<Uuid, QaSession>,
    batches: HashMap<Uuid, BatchJob>,
    notifications: Vec<Notification>,
    seq: i64,
}

impl Tables {
    fn next_seq(&mut self) -> i64 {
        self.seq += 1;
        self.seq
    }

    fn remove_document(&mut self, id: Uuid) -> bool {
        let existed = self.documents.remove(&id).is_some();
        self.analyses.retain(|_, a| a.document_id != id);
        self.qa_sessions.retain(|_, s| s.document_id != id);
        existed
    }
}

/// Store backed by process memory
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn paginate<T: Clone>(mut items: Vec<T>, page: Page) -> Paged<T> {
    let total = items.len() as u64;
    let items: Vec<T> = items
        .drain(..)
        .skip(page.offset as usize)
        .take(page.limit as usize)
        .collect();
    Paged::new(items, total, page)
}

#[async_trait]
impl Store for MemoryStore {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }

    // ------------------------------------------------------------------
    // Users
    // ------------------------------------------------------------------

    async fn insert_user(&self, user: User) -> Result<User> {
        let mut t = self.tables.write().await;
        if t.users.contains_key(&user.id) || t.users.values().any(|u| u.email == user.email) {
            return Err(AppError::EmailAlreadyExists);
        }
        t.users.insert(user.id.clone(), user.clone());
        Ok(user)
    }

    async fn get_user(&self, id: &str) -> Result<Option<User>> {
        Ok(self.tables.read().await.users.get(id).cloned())
    }

    async fn save_user(&self, user: User) -> Result<User> {
        let mut t = self.tables.write().await;
        if !t.users.contains_key(&user.id) {
            return Err(AppError::UserNotFound { id: user.id });
        }
        t.users.insert(user.id.clone(), user.clone());
        Ok(user)
    }

    async fn apply_usage(&self, user_id: &str, delta: UsageDelta, month: &str) -> Result<()> {
        let mut t = self.tables.write().await;
        if let Some(user) = t.users.get_mut(user_id) {
            user.usage.apply(delta, month);
        }
        Ok(())
    }

    async fn list_users(&self, filter: &UserFilter, page: Page) -> Result<Paged<User>> {
        let t = self.tables.read().await;
        let mut users: Vec<User> = t.users.values().filter(|u| filter.matches(u)).cloned().collect();
        users.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(paginate(users, page))
    }

    async fn count_users(&self, filter: &UserFilter) -> Result<u64> {
        let t = self.tables.read().await;
        Ok(t.users.values().filter(|u| filter.matches(u)).count() as u64)
    }

    async fn active_user_ids(&self) -> Result<Vec<String>> {
        let t = self.tables.read().await;
        let mut ids: Vec<String> = t
            .users
            .values()
            .filter(|u| u.is_active)
            .map(|u| u.id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn delete_user_cascade(&self, user_id: &str) -> Result<bool> {
        let mut t = self.tables.write().await;
        let owned: Vec<Uuid> = t
            .documents
            .values()
            .filter(|d| d.owner_id == user_id)
            .map(|d| d.id)
            .collect();
        for id in owned {
            t.remove_document(id);
        }
        t.analyses.retain(|_, a| a.owner_id != user_id);
        t.qa_sessions.retain(|_, s| s.user_id != user_id);
        t.batches.retain(|_, b| b.owner_id != user_id);
        t.notifications.retain(|n| n.user_id != user_id);
        Ok(t.users.remove(user_id).is_some())
    }

    // ------------------------------------------------------------------
    // Identities
    // ------------------------------------------------------------------

    async fn insert_identity(&self, identity: IdentityAccount) -> Result<IdentityAccount> {
        let mut t = self.tables.write().await;
        if t.identities.values().any(|i| i.email == identity.email) {
            return Err(AppError::EmailAlreadyExists);
        }
        t.identities.insert(identity.uid.clone(), identity.clone());
        Ok(identity)
    }

    async fn get_identity(&self, uid: &str) -> Result<Option<IdentityAccount>> {
        Ok(self.tables.read().await.identities.get(uid).cloned())
    }

    async fn find_identity_by_email(&self, email: &str) -> Result<Option<IdentityAccount>> {
        let t = self.tables.read().await;
        Ok(t.identities.values().find(|i| i.email == email).cloned())
    }

    async fn save_identity(&self, identity: IdentityAccount) -> Result<IdentityAccount> {
        let mut t = self.tables.write().await;
        t.identities.insert(identity.uid.clone(), identity.clone());
        Ok(identity)
    }

    async fn delete_identity(&self, uid: &str) -> Result<bool> {
        Ok(self.tables.write().await.identities.remove(uid).is_some())
    }

    // ------------------------------------------------------------------
    // Documents
    // ------------------------------------------------------------------

    async fn insert_document(&self, document: Document) -> Result<Document> {
        let mut t = self.tables.write().await;
        t.documents.insert(document.id, document.clone());
        Ok(document)
    }

    async fn get_document(&self, id: Uuid) -> Result<Option<Document>> {
        Ok(self.tables.read().await.documents.get(&id).cloned())
    }

    async fn update_document_if(
        &self,
        id: Uuid,
        expected: Option<&[DocumentStatus]>,
        mutate: DocumentMutation,
    ) -> Result<Transition> {
        let mut t = self.tables.write().await;
        let Some(doc) = t.documents.get_mut(&id) else {
            return Ok(Transition::Missing);
        };
        if let Some(expected) = expected {
            if !expected.contains(&doc.status) {
                return Ok(Transition::Rejected(doc.status));
            }
        }
        mutate(doc);
        Ok(Transition::Applied(doc.clone()))
    }

    async fn bump_document_counters(
        &self,
        id: Uuid,
        views: i64,
        questions: i64,
        viewed_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let mut t = self.tables.write().await;
        if let Some(doc) = t.documents.get_mut(&id) {
            doc.views += views;
            doc.questions_asked += questions;
            if viewed_at.is_some() {
                doc.last_viewed_at = viewed_at;
            }
        }
        Ok(())
    }

    async fn list_documents(&self, filter: &DocumentFilter, page: Page) -> Result<Paged<Document>> {
        let t = self.tables.read().await;
        let mut docs: Vec<Document> = t
            .documents
            .values()
            .filter(|d| filter.matches(d))
            .cloned()
            .collect();
        docs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(paginate(docs, page))
    }

    async fn count_documents(&self, filter: &DocumentFilter) -> Result<u64> {
        let t = self.tables.read().await;
        Ok(t.documents.values().filter(|d| filter.matches(d)).count() as u64)
    }

    async fn delete_document_cascade(&self, id: Uuid) -> Result<bool> {
        Ok(self.tables.write().await.remove_document(id))
    }

    async fn complete_processing(
        &self,
        id: Uuid,
        draft: AnalysisDraft,
        at: DateTime<Utc>,
    ) -> Result<Option<(Document, AnalysisRecord)>> {
        let mut t = self.tables.write().await;
        let seq = t.next_seq();
        let Some(doc) = t.documents.get_mut(&id) else {
            return Ok(None);
        };
        if doc.status != DocumentStatus::Processing {
            return Ok(None);
        }
        let mut record = finish_processing(doc, draft, at);
        record.seq = seq;
        let doc = doc.clone();
        t.analyses.insert(record.id, record.clone());
        Ok(Some((doc, record)))
    }

    // ------------------------------------------------------------------
    // Analyses
    // ------------------------------------------------------------------

    async fn append_analysis(&self, mut record: AnalysisRecord) -> Result<AnalysisRecord> {
        let mut t = self.tables.write().await;
        record.seq = t.next_seq();
        t.analyses.insert(record.id, record.clone());
        Ok(record)
    }

    async fn latest_analysis(&self, document_id: Uuid) -> Result<Option<AnalysisRecord>> {
        let t = self.tables.read().await;
        Ok(t
            .analyses
            .values()
            .filter(|a| a.document_id == document_id)
            .max_by_key(|a| a.seq)
            .cloned())
    }

    async fn list_analyses(&self, document_id: Uuid) -> Result<Vec<AnalysisRecord>> {
        let t = self.tables.read().await;
        let mut records: Vec<AnalysisRecord> = t
            .analyses
            .values()
            .filter(|a| a.document_id == document_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| b.seq.cmp(&a.seq));
        Ok(records)
    }

    async fn count_analyses(&self, created: TimeRange) -> Result<u64> {
        let t = self.tables.read().await;
        Ok(t.analyses.values().filter(|a| created.contains(a.created_at)).count() as u64)
    }

    // ------------------------------------------------------------------
    // Q&A sessions
    // ------------------------------------------------------------------

    async fn insert_qa_session(&self, mut session: QaSession) -> Result<QaSession> {
        let mut t = self.tables.write().await;
        session.seq = t.next_seq();
        t.qa_sessions.insert(session.id, session.clone());
        Ok(session)
    }

    async fn get_qa_session(&self, id: Uuid) -> Result<Option<QaSession>> {
        Ok(self.tables.read().await.qa_sessions.get(&id).cloned())
    }

    async fn list_conversation(&self, conversation_id: Uuid) -> Result<Vec<QaSession>> {
        let t = self.tables.read().await;
        let mut sessions: Vec<QaSession> = t
            .qa_sessions
            .values()
            .filter(|s| s.conversation_id == conversation_id)
            .cloned()
            .collect();
        sessions.sort_by_key(|s| s.seq);
        Ok(sessions)
    }

    async fn set_feedback(&self, id: Uuid, feedback: Feedback) -> Result<Option<QaSession>> {
        let mut t = self.tables.write().await;
        Ok(t.qa_sessions.get_mut(&id).map(|s| {
            s.feedback = Some(feedback);
            s.clone()
        }))
    }

    async fn count_qa_sessions(&self, created: TimeRange) -> Result<u64> {
        let t = self.tables.read().await;
        Ok(t.qa_sessions.values().filter(|s| created.contains(s.created_at)).count() as u64)
    }

    // ------------------------------------------------------------------
    // Batch jobs
    // ------------------------------------------------------------------

    async fn create_batch(&self, job: BatchJob) -> Result<BatchEnqueue> {
        let mut t = self.tables.write().await;
        let invalid: Vec<Uuid> = job
            .document_ids
            .0
            .iter()
            .copied()
            .filter(|id| !batch_member_valid(t.documents.get(id), &job.owner_id))
            .collect();
        if !invalid.is_empty() {
            return Ok(BatchEnqueue::Rejected {
                invalid_document_ids: invalid,
            });
        }
        for id in &job.document_ids.0 {
            if let Some(doc) = t.documents.get_mut(id) {
                mark_queued(doc, &job);
            }
        }
        t.batches.insert(job.id, job.clone());
        Ok(BatchEnqueue::Created(job))
    }

    async fn get_batch(&self, id: Uuid) -> Result<Option<BatchJob>> {
        Ok(self.tables.read().await.batches.get(&id).cloned())
    }

    async fn save_batch(&self, job: BatchJob) -> Result<BatchJob> {
        let mut t = self.tables.write().await;
        t.batches.insert(job.id, job.clone());
        Ok(job)
    }

    // ------------------------------------------------------------------
    // Notifications
    // ------------------------------------------------------------------

    async fn insert_notifications(&self, notifications: Vec<Notification>) -> Result<u64> {
        let mut t = self.tables.write().await;
        let count = notifications.len() as u64;
        t.notifications.extend(notifications);
        Ok(count)
    }

    async fn list_notifications(&self, user_id: &str, limit: u64) -> Result<Vec<Notification>> {
        let t = self.tables.read().await;
        let mut items: Vec<Notification> = t
            .notifications
            .iter()
            .filter(|n| n.user_id == user_id)
            .cloned()
            .collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        items.truncate(limit as usize);
        Ok(items)
    }
}
