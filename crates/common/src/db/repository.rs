//! PostgreSQL store
//!
//! Guarded transitions take a row lock (`SELECT ... FOR UPDATE`) inside a
//! transaction; completion, cascades and batch enqueue each run in one
//! transaction. Dropping an uncommitted transaction rolls it back.

use crate::db::models::*;
use crate::db::DbPool;
use crate::errors::{AppError, Result};
use crate::store::{
    batch_member_valid, finish_processing, mark_queued, AnalysisDraft, BatchEnqueue, DocumentFilter,
    DocumentMutation, Page, Paged, Store, TimeRange, Transition, UserFilter,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::sea_query::extension::postgres::PgBinOper;
use sea_orm::sea_query::{Alias, Expr, Func, LikeExpr, SimpleExpr};
use sea_orm::{
    ActiveModelTrait, ActiveValue::NotSet, ColumnTrait, Condition, DatabaseConnection, DbErr, EntityTrait,
    IntoActiveModel, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set, SqlErr, TransactionTrait,
};
use tracing::{debug, instrument};
use uuid::Uuid;

/// Store backed by PostgreSQL through SeaORM
#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    /// Create a new store with the given connection pool
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Get the read connection
    fn read_conn(&self) -> &DatabaseConnection {
        self.pool.read()
    }

    /// Get the write connection
    fn write_conn(&self) -> &DatabaseConnection {
        self.pool.write()
    }
}

/// Map unique violations on email columns to the domain error
fn unique_email(err: DbErr) -> AppError {
    match err.sql_err() {
        Some(SqlErr::UniqueConstraintViolation(_)) => AppError::EmailAlreadyExists,
        _ => AppError::Database(err),
    }
}

/// `LOWER(col) LIKE %needle%`, with LIKE metacharacters escaped
fn ilike_contains<C: ColumnTrait>(column: C, needle: &str) -> SimpleExpr {
    let escaped = needle
        .to_lowercase()
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    Expr::expr(Func::lower(Expr::col(column)))
        .like(LikeExpr::new(format!("%{}%", escaped)).escape('\\'))
}

fn created_between<C: ColumnTrait>(mut cond: Condition, column: C, range: TimeRange) -> Condition {
    if let Some(from) = range.from {
        cond = cond.add(column.gte(from));
    }
    if let Some(to) = range.to {
        cond = cond.add(column.lt(to));
    }
    cond
}

fn document_condition(filter: &DocumentFilter) -> Condition {
    let mut cond = Condition::all();
    if let Some(ref owner) = filter.owner_id {
        cond = cond.add(DocumentColumn::OwnerId.eq(owner.as_str()));
    }
    if !filter.statuses.is_empty() {
        cond = cond.add(DocumentColumn::Status.is_in(filter.statuses.iter().copied()));
    }
    if !filter.tags.is_empty() {
        let wanted = serde_json::Value::from(filter.tags.clone());
        cond = cond.add(
            Expr::col(DocumentColumn::Tags)
                .binary(PgBinOper::Contains, Expr::val(wanted).cast_as(Alias::new("jsonb"))),
        );
    }
    if let Some(ref needle) = filter.search {
        cond = cond.add(
            Condition::any()
                .add(ilike_contains(DocumentColumn::FileName, needle))
                .add(ilike_contains(DocumentColumn::Title, needle))
                .add(ilike_contains(DocumentColumn::Description, needle)),
        );
    }
    created_between(cond, DocumentColumn::CreatedAt, filter.created)
}

fn user_condition(filter: &UserFilter) -> Condition {
    let mut cond = Condition::all();
    if let Some(role) = filter.role {
        cond = cond.add(UserColumn::Role.eq(role));
    }
    if let Some(subscription) = filter.subscription {
        cond = cond.add(UserColumn::Subscription.eq(subscription));
    }
    if let Some(active) = filter.is_active {
        cond = cond.add(UserColumn::IsActive.eq(active));
    }
    if let Some(ref needle) = filter.search {
        cond = cond.add(
            Condition::any()
                .add(ilike_contains(UserColumn::Email, needle))
                .add(ilike_contains(UserColumn::DisplayName, needle)),
        );
    }
    created_between(cond, UserColumn::CreatedAt, filter.created)
}

#[async_trait]
impl Store for PgStore {
    async fn ping(&self) -> Result<()> {
        self.pool.ping().await
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }

    // ========================================================================
    // Users
    // ========================================================================

    async fn insert_user(&self, user: User) -> Result<User> {
        user.into_active_model()
            .reset_all()
            .insert(self.write_conn())
            .await
            .map_err(unique_email)
    }

    async fn get_user(&self, id: &str) -> Result<Option<User>> {
        UserEntity::find_by_id(id.to_string())
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn save_user(&self, user: User) -> Result<User> {
        let id = user.id.clone();
        user.into_active_model()
            .reset_all()
            .update(self.write_conn())
            .await
            .map_err(|e| match e {
                DbErr::RecordNotUpdated => AppError::UserNotFound { id },
                other => unique_email(other),
            })
    }

    async fn apply_usage(&self, user_id: &str, delta: UsageDelta, month: &str) -> Result<()> {
        let txn = self.write_conn().begin().await?;
        let Some(user) = UserEntity::find_by_id(user_id.to_string())
            .lock_exclusive()
            .one(&txn)
            .await?
        else {
            return Ok(());
        };

        let mut usage = user.usage.clone();
        usage.apply(delta, month);
        let mut active = user.into_active_model();
        active.usage = Set(usage);
        active.update(&txn).await?;
        txn.commit().await?;
        Ok(())
    }

    async fn list_users(&self, filter: &UserFilter, page: Page) -> Result<Paged<User>> {
        let cond = user_condition(filter);
        let total = UserEntity::find().filter(cond.clone()).count(self.read_conn()).await?;
        let users = UserEntity::find()
            .filter(cond)
            .order_by_desc(UserColumn::CreatedAt)
            .order_by_asc(UserColumn::Id)
            .offset(page.offset)
            .limit(page.limit)
            .all(self.read_conn())
            .await?;
        Ok(Paged::new(users, total, page))
    }

    async fn count_users(&self, filter: &UserFilter) -> Result<u64> {
        UserEntity::find()
            .filter(user_condition(filter))
            .count(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn active_user_ids(&self) -> Result<Vec<String>> {
        UserEntity::find()
            .select_only()
            .column(UserColumn::Id)
            .filter(UserColumn::IsActive.eq(true))
            .order_by_asc(UserColumn::Id)
            .into_tuple::<String>()
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    #[instrument(skip(self))]
    async fn delete_user_cascade(&self, user_id: &str) -> Result<bool> {
        let txn = self.write_conn().begin().await?;

        // sessions the user opened on other owners' public documents
        QaSessionEntity::delete_many()
            .filter(QaSessionColumn::UserId.eq(user_id))
            .exec(&txn)
            .await?;
        // documents cascade to their analyses and sessions
        DocumentEntity::delete_many()
            .filter(DocumentColumn::OwnerId.eq(user_id))
            .exec(&txn)
            .await?;
        BatchJobEntity::delete_many()
            .filter(BatchJobColumn::OwnerId.eq(user_id))
            .exec(&txn)
            .await?;
        NotificationEntity::delete_many()
            .filter(NotificationColumn::UserId.eq(user_id))
            .exec(&txn)
            .await?;
        let deleted = UserEntity::delete_by_id(user_id.to_string()).exec(&txn).await?;

        txn.commit().await?;
        Ok(deleted.rows_affected > 0)
    }

    // ========================================================================
    // Identities
    // ========================================================================

    async fn insert_identity(&self, identity: IdentityAccount) -> Result<IdentityAccount> {
        identity
            .into_active_model()
            .reset_all()
            .insert(self.write_conn())
            .await
            .map_err(unique_email)
    }

    async fn get_identity(&self, uid: &str) -> Result<Option<IdentityAccount>> {
        IdentityEntity::find_by_id(uid.to_string())
            .one(self.write_conn())
            .await
            .map_err(Into::into)
    }

    async fn find_identity_by_email(&self, email: &str) -> Result<Option<IdentityAccount>> {
        IdentityEntity::find()
            .filter(IdentityColumn::Email.eq(email))
            .one(self.write_conn())
            .await
            .map_err(Into::into)
    }

    async fn save_identity(&self, identity: IdentityAccount) -> Result<IdentityAccount> {
        let uid = identity.uid.clone();
        identity
            .into_active_model()
            .reset_all()
            .update(self.write_conn())
            .await
            .map_err(|e| match e {
                DbErr::RecordNotUpdated => AppError::UserNotFound { id: uid },
                other => unique_email(other),
            })
    }

    async fn delete_identity(&self, uid: &str) -> Result<bool> {
        let result = IdentityEntity::delete_by_id(uid.to_string())
            .exec(self.write_conn())
            .await?;
        Ok(result.rows_affected > 0)
    }

    // ========================================================================
    // Documents
    // ========================================================================

    async fn insert_document(&self, document: Document) -> Result<Document> {
        document
            .into_active_model()
            .reset_all()
            .insert(self.write_conn())
            .await
            .map_err(Into::into)
    }

    async fn get_document(&self, id: Uuid) -> Result<Option<Document>> {
        DocumentEntity::find_by_id(id)
            .one(self.write_conn())
            .await
            .map_err(Into::into)
    }

    #[instrument(skip(self, expected, mutate), level = "debug")]
    async fn update_document_if(
        &self,
        id: Uuid,
        expected: Option<&[DocumentStatus]>,
        mutate: DocumentMutation,
    ) -> Result<Transition> {
        let txn = self.write_conn().begin().await?;
        let Some(current) = DocumentEntity::find_by_id(id).lock_exclusive().one(&txn).await? else {
            return Ok(Transition::Missing);
        };

        if let Some(expected) = expected {
            if !expected.contains(&current.status) {
                debug!(status = current.status.as_str(), "Guarded update rejected");
                return Ok(Transition::Rejected(current.status));
            }
        }

        let mut next = current;
        mutate(&mut next);
        let updated = next.into_active_model().reset_all().update(&txn).await?;
        txn.commit().await?;
        Ok(Transition::Applied(updated))
    }

    async fn bump_document_counters(
        &self,
        id: Uuid,
        views: i64,
        questions: i64,
        viewed_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let mut update = DocumentEntity::update_many()
            .col_expr(DocumentColumn::Views, Expr::col(DocumentColumn::Views).add(views))
            .col_expr(
                DocumentColumn::QuestionsAsked,
                Expr::col(DocumentColumn::QuestionsAsked).add(questions),
            );
        if let Some(at) = viewed_at {
            update = update.col_expr(DocumentColumn::LastViewedAt, Expr::value(at));
        }
        update
            .filter(DocumentColumn::Id.eq(id))
            .exec(self.write_conn())
            .await?;
        Ok(())
    }

    async fn list_documents(&self, filter: &DocumentFilter, page: Page) -> Result<Paged<Document>> {
        let cond = document_condition(filter);
        let total = DocumentEntity::find()
            .filter(cond.clone())
            .count(self.read_conn())
            .await?;
        let documents = DocumentEntity::find()
            .filter(cond)
            .order_by_desc(DocumentColumn::CreatedAt)
            .order_by_asc(DocumentColumn::Id)
            .offset(page.offset)
            .limit(page.limit)
            .all(self.read_conn())
            .await?;
        Ok(Paged::new(documents, total, page))
    }

    async fn count_documents(&self, filter: &DocumentFilter) -> Result<u64> {
        DocumentEntity::find()
            .filter(document_condition(filter))
            .count(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn delete_document_cascade(&self, id: Uuid) -> Result<bool> {
        let txn = self.write_conn().begin().await?;
        QaSessionEntity::delete_many()
            .filter(QaSessionColumn::DocumentId.eq(id))
            .exec(&txn)
            .await?;
        AnalysisEntity::delete_many()
            .filter(AnalysisColumn::DocumentId.eq(id))
            .exec(&txn)
            .await?;
        let result = DocumentEntity::delete_by_id(id).exec(&txn).await?;
        txn.commit().await?;
        Ok(result.rows_affected > 0)
    }

    #[instrument(skip(self, draft))]
    async fn complete_processing(
        &self,
        id: Uuid,
        draft: AnalysisDraft,
        at: DateTime<Utc>,
    ) -> Result<Option<(Document, AnalysisRecord)>> {
        let txn = self.write_conn().begin().await?;
        let Some(mut doc) = DocumentEntity::find_by_id(id).lock_exclusive().one(&txn).await? else {
            return Ok(None);
        };
        if doc.status != DocumentStatus::Processing {
            return Ok(None);
        }

        let record = finish_processing(&mut doc, draft, at);
        let mut active = record.into_active_model().reset_all();
        active.seq = NotSet;
        let record = active.insert(&txn).await?;

        let doc = doc.into_active_model().reset_all().update(&txn).await?;
        txn.commit().await?;
        Ok(Some((doc, record)))
    }

    // ========================================================================
    // Analyses
    // ========================================================================

    async fn append_analysis(&self, record: AnalysisRecord) -> Result<AnalysisRecord> {
        let mut active = record.into_active_model().reset_all();
        active.seq = NotSet;
        active.insert(self.write_conn()).await.map_err(Into::into)
    }

    async fn latest_analysis(&self, document_id: Uuid) -> Result<Option<AnalysisRecord>> {
        AnalysisEntity::find()
            .filter(AnalysisColumn::DocumentId.eq(document_id))
            .order_by_desc(AnalysisColumn::Seq)
            .one(self.write_conn())
            .await
            .map_err(Into::into)
    }

    async fn list_analyses(&self, document_id: Uuid) -> Result<Vec<AnalysisRecord>> {
        AnalysisEntity::find()
            .filter(AnalysisColumn::DocumentId.eq(document_id))
            .order_by_desc(AnalysisColumn::Seq)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn count_analyses(&self, created: TimeRange) -> Result<u64> {
        AnalysisEntity::find()
            .filter(created_between(Condition::all(), AnalysisColumn::CreatedAt, created))
            .count(self.read_conn())
            .await
            .map_err(Into::into)
    }

    // ========================================================================
    // Q&A sessions
    // ========================================================================

    async fn insert_qa_session(&self, session: QaSession) -> Result<QaSession> {
        let mut active = session.into_active_model().reset_all();
        active.seq = NotSet;
        active.insert(self.write_conn()).await.map_err(Into::into)
    }

    async fn get_qa_session(&self, id: Uuid) -> Result<Option<QaSession>> {
        QaSessionEntity::find_by_id(id)
            .one(self.write_conn())
            .await
            .map_err(Into::into)
    }

    async fn list_conversation(&self, conversation_id: Uuid) -> Result<Vec<QaSession>> {
        QaSessionEntity::find()
            .filter(QaSessionColumn::ConversationId.eq(conversation_id))
            .order_by_asc(QaSessionColumn::Seq)
            .all(self.write_conn())
            .await
            .map_err(Into::into)
    }

    async fn set_feedback(&self, id: Uuid, feedback: Feedback) -> Result<Option<QaSession>> {
        let Some(session) = QaSessionEntity::find_by_id(id).one(self.write_conn()).await? else {
            return Ok(None);
        };
        let mut active = session.into_active_model();
        active.feedback = Set(Some(feedback));
        Ok(Some(active.update(self.write_conn()).await?))
    }

    async fn count_qa_sessions(&self, created: TimeRange) -> Result<u64> {
        QaSessionEntity::find()
            .filter(created_between(Condition::all(), QaSessionColumn::CreatedAt, created))
            .count(self.read_conn())
            .await
            .map_err(Into::into)
    }

    // ========================================================================
    // Batch jobs
    // ========================================================================

    #[instrument(skip(self, job), fields(batch_id = %job.id, size = job.document_ids.0.len()))]
    async fn create_batch(&self, job: BatchJob) -> Result<BatchEnqueue> {
        let txn = self.write_conn().begin().await?;
        let members = DocumentEntity::find()
            .filter(DocumentColumn::Id.is_in(job.document_ids.0.iter().copied()))
            .lock_exclusive()
            .all(&txn)
            .await?;

        let invalid: Vec<Uuid> = job
            .document_ids
            .0
            .iter()
            .copied()
            .filter(|id| !batch_member_valid(members.iter().find(|d| d.id == *id), &job.owner_id))
            .collect();
        if !invalid.is_empty() {
            return Ok(BatchEnqueue::Rejected {
                invalid_document_ids: invalid,
            });
        }

        for mut doc in members {
            mark_queued(&mut doc, &job);
            doc.into_active_model().reset_all().update(&txn).await?;
        }
        let job = job.into_active_model().reset_all().insert(&txn).await?;
        txn.commit().await?;
        Ok(BatchEnqueue::Created(job))
    }

    async fn get_batch(&self, id: Uuid) -> Result<Option<BatchJob>> {
        BatchJobEntity::find_by_id(id)
            .one(self.write_conn())
            .await
            .map_err(Into::into)
    }

    async fn save_batch(&self, job: BatchJob) -> Result<BatchJob> {
        job.into_active_model()
            .reset_all()
            .update(self.write_conn())
            .await
            .map_err(Into::into)
    }

    // ========================================================================
    // Notifications
    // ========================================================================

    async fn insert_notifications(&self, notifications: Vec<Notification>) -> Result<u64> {
        if notifications.is_empty() {
            return Ok(0);
        }
        let count = notifications.len() as u64;
        let models = notifications
            .into_iter()
            .map(|n| n.into_active_model().reset_all());
        NotificationEntity::insert_many(models)
            .exec(self.write_conn())
            .await?;
        Ok(count)
    }

    async fn list_notifications(&self, user_id: &str, limit: u64) -> Result<Vec<Notification>> {
        NotificationEntity::find()
            .filter(NotificationColumn::UserId.eq(user_id))
            .order_by_desc(NotificationColumn::CreatedAt)
            .limit(limit)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }
}
