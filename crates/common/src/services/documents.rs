//! Document lifecycle
//!
//! `uploading -> uploaded -> processing -> {processed | error}`, with
//! `processed | error -> processing` only through reanalysis. Every status
//! change goes through the store's guarded update, so concurrent requests
//! for the same document see exactly one winner.

use super::ServiceSettings;
use crate::db::models::*;
use crate::errors::{AppError, Result};
use crate::extraction::{is_supported_content_type, DocumentExtractionService, ExtractionRequest, SUPPORTED_CONTENT_TYPES};
use crate::metrics;
use crate::policy::{authorize, require_subscription, Action, Caller, ResourceRef};
use crate::storage::{blob_path, is_valid_file_name, BlobStore, SignedUrl};
use crate::store::{usage_month, AnalysisDraft, BatchEnqueue, DocumentFilter, Page, Paged, Store, Transition};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn, Instrument};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct InitUpload {
    #[validate(length(min = 1, max = 255, message = "fileName must be 1-255 characters"))]
    pub file_name: String,

    #[validate(range(min = 1, message = "fileSize must be positive"))]
    pub file_size: u64,

    #[validate(length(min = 1, message = "contentType is required"))]
    pub content_type: String,

    #[serde(default)]
    #[validate(length(max = 20, message = "at most 20 tags"))]
    pub tags: Vec<String>,

    #[validate(length(max = 200))]
    pub title: Option<String>,

    #[validate(length(max = 2000))]
    pub description: Option<String>,

    pub is_public: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadTicket {
    pub document_id: Uuid,
    pub upload: SignedUrl,
    pub document: Document,
}

/// Metadata an owner may change
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct DocumentPatch {
    #[validate(length(min = 1, max = 200))]
    pub title: Option<String>,

    #[validate(length(max = 2000))]
    pub description: Option<String>,

    #[validate(length(max = 20, message = "at most 20 tags"))]
    pub tags: Option<Vec<String>>,

    pub is_public: Option<bool>,
}

impl DocumentPatch {
    fn is_empty(&self) -> bool {
        self.title.is_none() && self.description.is_none() && self.tags.is_none() && self.is_public.is_none()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentQuery {
    pub status: Option<DocumentStatus>,
    /// Comma separated; a document must carry all of them
    pub tags: Option<String>,
    pub search: Option<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl DocumentQuery {
    pub fn filter_for(&self, owner_id: Option<&str>) -> DocumentFilter {
        let mut filter = DocumentFilter {
            owner_id: owner_id.map(str::to_string),
            ..Default::default()
        };
        if let Some(status) = self.status {
            filter = filter.with_status(status);
        }
        if let Some(ref tags) = self.tags {
            filter.tags = TagList::normalized(tags.split(',')).0;
        }
        filter.search = self
            .search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        filter
    }

    pub fn page(&self) -> Page {
        Page::new(self.limit, self.offset)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadTicket {
    pub document_id: Uuid,
    pub file_name: String,
    pub content_type: String,
    pub download: SignedUrl,
}

/// Polling view of one document
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentStatusView {
    pub document_id: Uuid,
    pub status: DocumentStatus,
    pub upload_progress: i32,
    pub processing: ProcessingInfo,
    pub analysis: Option<AnalysisPointer>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingMode {
    Initial,
    Reanalysis,
}

impl ProcessingMode {
    fn expected(&self) -> &'static [DocumentStatus] {
        match self {
            ProcessingMode::Initial => &[DocumentStatus::Uploaded],
            ProcessingMode::Reanalysis => &[DocumentStatus::Processed, DocumentStatus::Error],
        }
    }

    fn expected_label(&self) -> &'static str {
        match self {
            ProcessingMode::Initial => "uploaded",
            ProcessingMode::Reanalysis => "processed or error",
        }
    }

    fn action(&self) -> Action {
        match self {
            ProcessingMode::Initial => Action::Process,
            ProcessingMode::Reanalysis => Action::Reanalyze,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingMode::Initial => "initial",
            ProcessingMode::Reanalysis => "reanalysis",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessOutcome {
    pub document: Document,
    pub analysis: AnalysisRecord,
}

#[derive(Clone)]
pub struct DocumentService {
    store: Arc<dyn Store>,
    blobs: Arc<dyn BlobStore>,
    extractor: Arc<dyn DocumentExtractionService>,
    settings: ServiceSettings,
}

impl DocumentService {
    pub fn new(
        store: Arc<dyn Store>,
        blobs: Arc<dyn BlobStore>,
        extractor: Arc<dyn DocumentExtractionService>,
        settings: ServiceSettings,
    ) -> Self {
        Self {
            store,
            blobs,
            extractor,
            settings,
        }
    }

    pub(crate) async fn load(&self, id: Uuid) -> Result<Document> {
        self.store
            .get_document(id)
            .await?
            .ok_or_else(|| AppError::DocumentNotFound { id: id.to_string() })
    }

    /// Load a document and check `action` against it
    pub(crate) async fn load_authorized(&self, caller: Option<&Caller>, id: Uuid, action: Action) -> Result<Document> {
        let doc = self.load(id).await?;
        authorize(caller, action, ResourceRef::from(&doc))?;
        Ok(doc)
    }

    async fn track_usage(&self, user_id: &str, delta: UsageDelta) {
        if let Err(e) = self.store.apply_usage(user_id, delta, &usage_month(Utc::now())).await {
            warn!(user_id, error = %e, "Failed to update usage counters");
        }
    }

    fn guard_failed(id: Uuid, transition: Transition, expected: &str) -> AppError {
        match transition {
            Transition::Rejected(current) => AppError::InvalidDocumentStatus {
                current: current.as_str().to_string(),
                expected: expected.to_string(),
            },
            _ => AppError::DocumentNotFound { id: id.to_string() },
        }
    }

    // ------------------------------------------------------------------
    // Upload
    // ------------------------------------------------------------------

    #[instrument(skip(self, caller, input), fields(user_id = %caller.uid, file_size = input.file_size))]
    pub async fn init_upload(&self, caller: &Caller, input: InitUpload) -> Result<UploadTicket> {
        input.validate()?;
        if !is_valid_file_name(&input.file_name) {
            return Err(AppError::validation("fileName", "fileName must be a single path segment"));
        }
        if !is_supported_content_type(&input.content_type) {
            return Err(AppError::UnsupportedFileType {
                content_type: input.content_type,
                allowed: SUPPORTED_CONTENT_TYPES.iter().map(|s| s.to_string()).collect(),
            });
        }

        let plan = caller.subscription;
        if input.file_size > plan.max_upload_bytes() {
            metrics::record_upload(plan.as_str(), false);
            return Err(AppError::FileTooLarge {
                max_size: plan.max_upload_bytes(),
                file_size: input.file_size,
                plan: plan.as_str().to_string(),
            });
        }

        let now = Utc::now();
        let title = input
            .title
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| input.file_name.clone());
        let document = Document {
            id: Uuid::new_v4(),
            owner_id: caller.uid.clone(),
            file_name: input.file_name,
            title,
            description: input.description,
            file_size: input.file_size as i64,
            content_type: input.content_type,
            tags: TagList::normalized(&input.tags),
            is_public: input.is_public.unwrap_or(false),
            status: DocumentStatus::Uploading,
            upload_progress: 0,
            processing: ProcessingInfo::default(),
            analysis: None,
            views: 0,
            questions_asked: 0,
            last_viewed_at: None,
            created_at: now,
            updated_at: now,
        };
        let document = self.store.insert_document(document).await?;
        self.track_usage(&caller.uid, UsageDelta::document()).await;

        let path = blob_path(&document.owner_id, document.id, &document.file_name);
        let upload = self.blobs.upload_url(&path, self.settings.upload_url_ttl);

        metrics::record_upload(plan.as_str(), true);
        info!(document_id = %document.id, "Upload initialized");

        Ok(UploadTicket {
            document_id: document.id,
            upload,
            document,
        })
    }

    #[instrument(skip(self, caller), fields(user_id = %caller.uid))]
    pub async fn confirm_upload(&self, caller: &Caller, id: Uuid) -> Result<Document> {
        self.load_authorized(Some(caller), id, Action::Update).await?;

        let now = Utc::now();
        let transition = self
            .store
            .update_document_if(
                id,
                Some(&[DocumentStatus::Uploading]),
                Box::new(move |doc| {
                    doc.status = DocumentStatus::Uploaded;
                    doc.upload_progress = 100;
                    doc.updated_at = now;
                }),
            )
            .await?;

        let Transition::Applied(doc) = transition else {
            return Err(Self::guard_failed(id, transition, "uploading"));
        };

        self.track_usage(&doc.owner_id, UsageDelta::storage(doc.file_size)).await;
        info!(document_id = %id, "Upload confirmed");
        Ok(doc)
    }

    // ------------------------------------------------------------------
    // Processing
    // ------------------------------------------------------------------

    /// Move a document into `processing`. Exactly one concurrent caller wins.
    #[instrument(skip(self, caller, options), fields(user_id = %caller.uid, mode = mode.as_str()))]
    pub async fn begin_processing(
        &self,
        caller: &Caller,
        id: Uuid,
        options: ProcessingOptions,
        mode: ProcessingMode,
    ) -> Result<Document> {
        self.load_authorized(Some(caller), id, mode.action()).await?;
        if mode == ProcessingMode::Reanalysis {
            require_subscription(caller, Subscription::PAID)?;
        }

        let now = Utc::now();
        let transition = self
            .store
            .update_document_if(
                id,
                Some(mode.expected()),
                Box::new(move |doc| {
                    doc.status = DocumentStatus::Processing;
                    doc.processing = ProcessingInfo::started(options, now);
                    doc.updated_at = now;
                }),
            )
            .await?;

        match transition {
            Transition::Applied(doc) => {
                debug!(document_id = %id, "Processing started");
                Ok(doc)
            }
            other => Err(Self::guard_failed(id, other, mode.expected_label())),
        }
    }

    /// Record a successful extraction. Pipeline-only.
    pub(crate) async fn complete_processing(
        &self,
        id: Uuid,
        result: AnalysisResult,
        options: ProcessingOptions,
    ) -> Result<ProcessOutcome> {
        let completed = self
            .store
            .complete_processing(id, AnalysisDraft { result, options }, Utc::now())
            .await?;

        let Some((document, analysis)) = completed else {
            return Err(AppError::internal(format!(
                "document {} vanished or left processing before completion",
                id
            )));
        };

        self.track_usage(&document.owner_id, UsageDelta::api_call()).await;
        info!(document_id = %id, analysis_id = %analysis.id, "Processing completed");
        Ok(ProcessOutcome { document, analysis })
    }

    /// Record a failed run. Never fails; problems are logged.
    pub(crate) async fn fail_processing(&self, id: Uuid, message: &str) {
        let now = Utc::now();
        let error_message = message.to_string();
        let outcome = self
            .store
            .update_document_if(
                id,
                Some(&[DocumentStatus::Processing]),
                Box::new(move |doc| {
                    doc.status = DocumentStatus::Error;
                    doc.processing.status = Some(ProcessingState::Error);
                    doc.processing.error = Some(error_message);
                    doc.processing.completed_at = Some(now);
                    doc.updated_at = now;
                }),
            )
            .await;

        match outcome {
            Ok(Transition::Applied(_)) => warn!(document_id = %id, error = message, "Processing failed"),
            Ok(Transition::Missing) => warn!(document_id = %id, "Processing failed for a deleted document"),
            Ok(Transition::Rejected(status)) => warn!(
                document_id = %id,
                status = status.as_str(),
                "Processing failed after the document left processing"
            ),
            Err(e) => error!(document_id = %id, error = %e, "Failed to record processing failure"),
        }
    }

    /// Read the blob, extract, and complete. The document must be processing.
    async fn run_pipeline(&self, doc: &Document) -> Result<ProcessOutcome> {
        let path = blob_path(&doc.owner_id, doc.id, &doc.file_name);
        let bytes = self.blobs.get(&path).await?;
        let options = doc.processing.options.clone();

        let result = self
            .extractor
            .extract(ExtractionRequest {
                bytes: &bytes,
                content_type: &doc.content_type,
                file_name: &doc.file_name,
                options: &options,
            })
            .await?;

        self.complete_processing(doc.id, result, options).await
    }

    /// Full processing run awaited by the triggering request. Upstream
    /// failures leave the document in `error` with the real message and
    /// surface as `PROCESSING_FAILED`.
    ///
    /// Once started, the pipeline runs on its own task, so a timed out or
    /// disconnected request still ends in `processed` or `error`.
    #[instrument(skip(self, caller, options), fields(user_id = %caller.uid, mode = mode.as_str()))]
    pub async fn process(
        &self,
        caller: &Caller,
        id: Uuid,
        options: ProcessingOptions,
        mode: ProcessingMode,
    ) -> Result<ProcessOutcome> {
        let doc = self.begin_processing(caller, id, options, mode).await?;

        let runner = self.clone();
        let task = tokio::spawn(async move { runner.finish_processing(doc, mode).await }.in_current_span());

        match task.await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(document_id = %id, error = %e, "Processing task aborted");
                self.fail_processing(id, "processing task aborted").await;
                Err(AppError::ProcessingFailed { message: e.to_string() })
            }
        }
    }

    async fn finish_processing(&self, doc: Document, mode: ProcessingMode) -> Result<ProcessOutcome> {
        let id = doc.id;
        let started = Instant::now();
        let outcome = self.run_pipeline(&doc).await;
        let elapsed = started.elapsed().as_secs_f64();
        metrics::record_processing(elapsed, mode.as_str(), self.extractor.name(), outcome.is_ok());

        match outcome {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                error!(document_id = %id, error = %e, "Processing pipeline failed");
                self.fail_processing(id, &e.to_string()).await;
                Err(AppError::ProcessingFailed { message: e.to_string() })
            }
        }
    }

    // ------------------------------------------------------------------
    // Reads and metadata
    // ------------------------------------------------------------------

    /// Fetch a document; counts a view only after access is granted
    #[instrument(skip(self, caller))]
    pub async fn get(&self, caller: Option<&Caller>, id: Uuid) -> Result<Document> {
        let mut doc = self.load_authorized(caller, id, Action::Read).await?;

        let now = Utc::now();
        match self.store.bump_document_counters(id, 1, 0, Some(now)).await {
            Ok(()) => {
                doc.views += 1;
                doc.last_viewed_at = Some(now);
            }
            Err(e) => warn!(document_id = %id, error = %e, "Failed to count view"),
        }
        Ok(doc)
    }

    #[instrument(skip(self, caller, patch), fields(user_id = %caller.uid))]
    pub async fn update(&self, caller: &Caller, id: Uuid, patch: DocumentPatch) -> Result<Document> {
        self.load_authorized(Some(caller), id, Action::Update).await?;
        patch.validate()?;
        if patch.is_empty() {
            return Err(AppError::validation("body", "No updatable fields provided"));
        }

        let now = Utc::now();
        let transition = self
            .store
            .update_document_if(
                id,
                None,
                Box::new(move |doc| {
                    if let Some(title) = patch.title {
                        doc.title = title;
                    }
                    if let Some(description) = patch.description {
                        doc.description = Some(description).filter(|d| !d.is_empty());
                    }
                    if let Some(tags) = patch.tags {
                        doc.tags = TagList::normalized(&tags);
                    }
                    if let Some(is_public) = patch.is_public {
                        doc.is_public = is_public;
                    }
                    doc.updated_at = now;
                }),
            )
            .await?;

        match transition {
            Transition::Applied(doc) => Ok(doc),
            other => Err(Self::guard_failed(id, other, "any")),
        }
    }

    #[instrument(skip(self, caller), fields(user_id = %caller.uid))]
    pub async fn delete(&self, caller: &Caller, id: Uuid) -> Result<()> {
        let doc = self.load_authorized(Some(caller), id, Action::Delete).await?;
        self.remove(doc).await
    }

    /// Admin-only delete of any document
    #[instrument(skip(self, caller), fields(admin_id = %caller.uid))]
    pub async fn force_delete(&self, caller: &Caller, id: Uuid) -> Result<()> {
        let doc = self.load_authorized(Some(caller), id, Action::ForceDelete).await?;
        info!(document_id = %id, owner_id = %doc.owner_id, "Admin deleting document");
        self.remove(doc).await
    }

    /// Blob first, then the records in one cascade
    async fn remove(&self, doc: Document) -> Result<()> {
        let path = blob_path(&doc.owner_id, doc.id, &doc.file_name);
        if !self.blobs.delete(&path).await? {
            debug!(path, "Blob already absent");
        }

        if !self.store.delete_document_cascade(doc.id).await? {
            debug!(document_id = %doc.id, "Document already deleted");
            return Ok(());
        }

        if doc.status != DocumentStatus::Uploading {
            self.track_usage(&doc.owner_id, UsageDelta::storage(-doc.file_size)).await;
        }
        info!(document_id = %doc.id, "Document deleted");
        Ok(())
    }

    pub async fn list(&self, caller: &Caller, query: &DocumentQuery) -> Result<Paged<Document>> {
        self.store
            .list_documents(&query.filter_for(Some(&caller.uid)), query.page())
            .await
    }

    /// Fresh signed GET URL on every call
    #[instrument(skip(self, caller))]
    pub async fn download_url(&self, caller: Option<&Caller>, id: Uuid) -> Result<DownloadTicket> {
        let doc = self.load_authorized(caller, id, Action::Download).await?;
        if doc.status == DocumentStatus::Uploading {
            return Err(AppError::InvalidDocumentStatus {
                current: doc.status.as_str().to_string(),
                expected: "uploaded".to_string(),
            });
        }

        let path = blob_path(&doc.owner_id, doc.id, &doc.file_name);
        Ok(DownloadTicket {
            document_id: doc.id,
            download: self.blobs.download_url(&path, self.settings.download_url_ttl),
            file_name: doc.file_name,
            content_type: doc.content_type,
        })
    }

    pub async fn status(&self, caller: &Caller, id: Uuid) -> Result<DocumentStatusView> {
        let doc = self.load_authorized(Some(caller), id, Action::ViewStatus).await?;
        Ok(DocumentStatusView {
            document_id: doc.id,
            status: doc.status,
            upload_progress: doc.upload_progress,
            processing: doc.processing,
            analysis: doc.analysis,
            updated_at: doc.updated_at,
        })
    }

    // ------------------------------------------------------------------
    // Batch
    // ------------------------------------------------------------------

    /// Enqueue a batch atomically and process it on a spawned task
    #[instrument(skip(self, caller, document_ids, options), fields(user_id = %caller.uid, size = document_ids.len()))]
    pub async fn create_batch(
        &self,
        caller: &Caller,
        document_ids: Vec<Uuid>,
        options: ProcessingOptions,
    ) -> Result<BatchJob> {
        require_subscription(caller, Subscription::ENTERPRISE_ONLY)?;

        let mut ids: Vec<Uuid> = Vec::with_capacity(document_ids.len());
        for id in document_ids {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        let max = self.settings.batch_limit();
        if ids.is_empty() || ids.len() > max {
            return Err(AppError::BatchTooLarge { size: ids.len(), max });
        }

        let now = Utc::now();
        let job = BatchJob {
            id: Uuid::new_v4(),
            owner_id: caller.uid.clone(),
            progress: BatchProgress::new(ids.len() as u32),
            document_ids: IdList(ids),
            status: BatchStatus::Queued,
            options,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };

        let job = match self.store.create_batch(job).await? {
            BatchEnqueue::Created(job) => job,
            BatchEnqueue::Rejected { invalid_document_ids } => {
                return Err(AppError::InvalidDocuments { invalid_document_ids });
            }
        };

        info!(batch_id = %job.id, "Batch enqueued");
        let runner = self.clone();
        let spawned = job.clone();
        tokio::spawn(async move {
            runner.run_batch(spawned).await;
        });

        Ok(job)
    }

    /// Process every member with bounded concurrency and record progress
    pub async fn run_batch(&self, mut job: BatchJob) {
        let batch_id = job.id;
        job.status = BatchStatus::Processing;
        job.updated_at = Utc::now();
        if let Err(e) = self.store.save_batch(job.clone()).await {
            error!(batch_id = %batch_id, error = %e, "Failed to mark batch processing");
        }

        let ids = job.document_ids.0.clone();
        let mut results = stream::iter(ids)
            .map(|id| self.process_member(id))
            .buffer_unordered(self.settings.batch_concurrency.max(1));

        while let Some(result) = results.next().await {
            job.progress.record(result);
            job.updated_at = Utc::now();
            if let Err(e) = self.store.save_batch(job.clone()).await {
                warn!(batch_id = %batch_id, error = %e, "Failed to save batch progress");
            }
        }

        job.status = job.progress.final_status();
        job.completed_at = Some(Utc::now());
        job.updated_at = Utc::now();
        let status = job.status;
        if let Err(e) = self.store.save_batch(job).await {
            error!(batch_id = %batch_id, error = %e, "Failed to finish batch");
        }
        metrics::record_batch(match status {
            BatchStatus::Completed => "completed",
            BatchStatus::Partial => "partial",
            _ => "failed",
        });
        info!(batch_id = %batch_id, status = ?status, "Batch finished");
    }

    async fn process_member(&self, id: Uuid) -> BatchItemResult {
        let started = Instant::now();
        let now = Utc::now();
        let transition = self
            .store
            .update_document_if(
                id,
                Some(&[DocumentStatus::Processing]),
                Box::new(move |doc| {
                    doc.processing.status = Some(ProcessingState::Started);
                    doc.processing.started_at = Some(now);
                }),
            )
            .await;

        let outcome = match transition {
            Ok(Transition::Applied(doc)) => self.run_pipeline(&doc).await,
            Ok(other) => Err(Self::guard_failed(id, other, "processing")),
            Err(e) => Err(e),
        };
        metrics::record_processing(
            started.elapsed().as_secs_f64(),
            "batch",
            self.extractor.name(),
            outcome.is_ok(),
        );

        match outcome {
            Ok(done) => BatchItemResult {
                document_id: id,
                status: BatchItemStatus::Completed,
                analysis_id: Some(done.analysis.id),
                error: None,
            },
            Err(e) => {
                self.fail_processing(id, &e.to_string()).await;
                BatchItemResult {
                    document_id: id,
                    status: BatchItemStatus::Failed,
                    analysis_id: None,
                    error: Some(e.public_message()),
                }
            }
        }
    }

    pub async fn get_batch(&self, caller: &Caller, id: Uuid) -> Result<BatchJob> {
        let job = self
            .store
            .get_batch(id)
            .await?
            .ok_or_else(|| AppError::BatchNotFound { id: id.to_string() })?;
        authorize(
            Some(caller),
            Action::ViewStatus,
            ResourceRef {
                owner_id: &job.owner_id,
                is_public: false,
            },
        )?;
        Ok(job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extraction::MockExtractor;
    use crate::storage::{MemoryBlobStore, UrlSigner};
    use crate::store::MemoryStore;
    use crate::testing::sample_user;
    use std::time::Duration;

    struct Fixture {
        store: Arc<MemoryStore>,
        blobs: Arc<MemoryBlobStore>,
        service: DocumentService,
    }

    fn fixture_with(extractor: MockExtractor) -> Fixture {
        fixture_with_settings(extractor, ServiceSettings::default())
    }

    fn fixture_with_settings(extractor: MockExtractor, settings: ServiceSettings) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let blobs = Arc::new(MemoryBlobStore::new(UrlSigner::new("secret", "http://localhost").unwrap()));
        let service = DocumentService::new(store.clone(), blobs.clone(), Arc::new(extractor), settings);
        Fixture { store, blobs, service }
    }

    fn fixture() -> Fixture {
        fixture_with(MockExtractor::new())
    }

    async fn caller(f: &Fixture, id: &str, plan: Subscription) -> Caller {
        let user = f.store.insert_user(sample_user(id, plan)).await.unwrap();
        Caller::from(&user)
    }

    fn upload(name: &str, size: u64) -> InitUpload {
        InitUpload {
            file_name: name.to_string(),
            file_size: size,
            content_type: "text/plain".to_string(),
            tags: vec!["NDA".into(), "nda".into()],
            title: None,
            description: None,
            is_public: None,
        }
    }

    /// Upload, put the blob and confirm
    async fn uploaded(f: &Fixture, owner: &Caller, name: &str) -> Document {
        let ticket = f.service.init_upload(owner, upload(name, 64)).await.unwrap();
        let path = blob_path(&owner.uid, ticket.document_id, name);
        f.blobs
            .put(&path, b"The vendor accepts unlimited liability.".to_vec(), "text/plain")
            .await
            .unwrap();
        f.service.confirm_upload(owner, ticket.document_id).await.unwrap()
    }

    #[tokio::test]
    async fn test_init_upload_creates_uploading_document() {
        let f = fixture();
        let alice = caller(&f, "alice", Subscription::Free).await;

        let ticket = f.service.init_upload(&alice, upload("nda.txt", 1000)).await.unwrap();
        assert_eq!(ticket.document.status, DocumentStatus::Uploading);
        assert_eq!(ticket.document.title, "nda.txt");
        assert_eq!(ticket.document.tags.0, vec!["nda".to_string()]);
        assert!(ticket.upload.url.contains(&format!("documents/alice/{}/nda.txt", ticket.document_id)));

        let user = f.store.get_user("alice").await.unwrap().unwrap();
        assert_eq!(user.usage.documents_this_month, 1);
    }

    #[tokio::test]
    async fn test_oversized_free_upload_creates_nothing() {
        let f = fixture();
        let alice = caller(&f, "alice", Subscription::Free).await;

        let mut input = upload("big.pdf", 10_000_000);
        input.content_type = "application/pdf".into();
        let err = f.service.init_upload(&alice, input).await.unwrap_err();
        assert_eq!(err.code(), crate::errors::ErrorCode::FileTooLarge);
        assert_eq!(err.details().unwrap()["maxSize"], 5_242_880);

        let docs = f.service.list(&alice, &DocumentQuery::default()).await.unwrap();
        assert_eq!(docs.total, 0);
    }

    #[tokio::test]
    async fn test_rejects_unsupported_type_and_nested_names() {
        let f = fixture();
        let alice = caller(&f, "alice", Subscription::Premium).await;

        let mut input = upload("a.png", 10);
        input.content_type = "image/png".into();
        assert!(matches!(
            f.service.init_upload(&alice, input).await,
            Err(AppError::UnsupportedFileType { .. })
        ));
        assert!(matches!(
            f.service.init_upload(&alice, upload("../escape.txt", 10)).await,
            Err(AppError::Validation { .. })
        ));
    }

    #[tokio::test]
    async fn test_confirm_requires_uploading() {
        let f = fixture();
        let alice = caller(&f, "alice", Subscription::Free).await;
        let doc = uploaded(&f, &alice, "a.txt").await;
        assert_eq!(doc.status, DocumentStatus::Uploaded);
        assert_eq!(doc.upload_progress, 100);

        let err = f.service.confirm_upload(&alice, doc.id).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidDocumentStatus { ref current, .. } if current == "uploaded"));

        let user = f.store.get_user("alice").await.unwrap().unwrap();
        assert_eq!(user.usage.storage_used, 64);
    }

    #[tokio::test]
    async fn test_cannot_process_while_uploading() {
        let f = fixture();
        let alice = caller(&f, "alice", Subscription::Free).await;
        let ticket = f.service.init_upload(&alice, upload("a.txt", 10)).await.unwrap();

        let err = f
            .service
            .begin_processing(&alice, ticket.document_id, ProcessingOptions::default(), ProcessingMode::Initial)
            .await
            .unwrap_err();
        assert_eq!(err.code(), crate::errors::ErrorCode::InvalidDocumentStatus);
    }

    #[tokio::test]
    async fn test_process_links_analysis() {
        let f = fixture();
        let alice = caller(&f, "alice", Subscription::Free).await;
        let doc = uploaded(&f, &alice, "a.txt").await;

        let outcome = f
            .service
            .process(&alice, doc.id, ProcessingOptions::default(), ProcessingMode::Initial)
            .await
            .unwrap();
        assert_eq!(outcome.document.status, DocumentStatus::Processed);
        let pointer = outcome.document.analysis.clone().unwrap();
        assert_eq!(pointer.analysis_id, outcome.analysis.id);
        assert_eq!(outcome.analysis.document_id, doc.id);
        assert_eq!(pointer.risk_count, 1);

        let user = f.store.get_user("alice").await.unwrap().unwrap();
        assert_eq!(user.usage.api_calls, 1);
    }

    #[tokio::test]
    async fn test_failed_extraction_marks_error() {
        let f = fixture_with(MockExtractor::failing());
        let alice = caller(&f, "alice", Subscription::Free).await;
        let doc = uploaded(&f, &alice, "a.txt").await;

        let err = f
            .service
            .process(&alice, doc.id, ProcessingOptions::default(), ProcessingMode::Initial)
            .await
            .unwrap_err();
        assert_eq!(err.code(), crate::errors::ErrorCode::ProcessingFailed);

        let stored = f.store.get_document(doc.id).await.unwrap().unwrap();
        assert_eq!(stored.status, DocumentStatus::Error);
        assert_eq!(stored.processing.status, Some(ProcessingState::Error));
        assert!(stored.processing.error.unwrap().contains("Mock"));
        assert!(stored.analysis.is_none());
    }

    #[tokio::test]
    async fn test_missing_blob_fails_processing() {
        let f = fixture();
        let alice = caller(&f, "alice", Subscription::Free).await;
        let ticket = f.service.init_upload(&alice, upload("a.txt", 10)).await.unwrap();
        f.service.confirm_upload(&alice, ticket.document_id).await.unwrap();

        assert!(f
            .service
            .process(&alice, ticket.document_id, ProcessingOptions::default(), ProcessingMode::Initial)
            .await
            .is_err());
        let stored = f.store.get_document(ticket.document_id).await.unwrap().unwrap();
        assert_eq!(stored.status, DocumentStatus::Error);
    }

    #[tokio::test]
    async fn test_reanalysis_requires_paid_plan() {
        let f = fixture();
        let alice = caller(&f, "alice", Subscription::Free).await;
        let doc = uploaded(&f, &alice, "a.txt").await;
        f.service
            .process(&alice, doc.id, ProcessingOptions::default(), ProcessingMode::Initial)
            .await
            .unwrap();

        let err = f
            .service
            .process(&alice, doc.id, ProcessingOptions::default(), ProcessingMode::Reanalysis)
            .await
            .unwrap_err();
        assert_eq!(err.details().unwrap()["currentPlan"], "free");

        let stored = f.store.get_document(doc.id).await.unwrap().unwrap();
        assert_eq!(stored.status, DocumentStatus::Processed);
    }

    #[tokio::test]
    async fn test_reanalysis_chains_records() {
        let f = fixture();
        let alice = caller(&f, "alice", Subscription::Premium).await;
        let doc = uploaded(&f, &alice, "a.txt").await;

        let first = f
            .service
            .process(&alice, doc.id, ProcessingOptions::default(), ProcessingMode::Initial)
            .await
            .unwrap();
        // initial mode is not a reanalysis path
        assert!(f
            .service
            .begin_processing(&alice, doc.id, ProcessingOptions::default(), ProcessingMode::Initial)
            .await
            .is_err());

        let second = f
            .service
            .process(&alice, doc.id, ProcessingOptions::default(), ProcessingMode::Reanalysis)
            .await
            .unwrap();
        assert_eq!(second.analysis.analysis_type, AnalysisType::Reanalysis);
        assert_eq!(second.analysis.previous_analysis_id, Some(first.analysis.id));
        assert_eq!(second.document.analysis.unwrap().analysis_id, second.analysis.id);
    }

    #[tokio::test]
    async fn test_concurrent_begin_single_winner() {
        let f = fixture();
        let alice = caller(&f, "alice", Subscription::Free).await;
        let doc = uploaded(&f, &alice, "a.txt").await;

        let (a, b) = tokio::join!(
            f.service
                .begin_processing(&alice, doc.id, ProcessingOptions::default(), ProcessingMode::Initial),
            f.service
                .begin_processing(&alice, doc.id, ProcessingOptions::default(), ProcessingMode::Initial),
        );
        assert_eq!([a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count(), 1);
        let loser = a.err().or(b.err()).unwrap();
        assert_eq!(loser.code(), crate::errors::ErrorCode::InvalidDocumentStatus);
    }

    #[tokio::test]
    async fn test_fail_processing_ignores_other_states() {
        let f = fixture();
        let alice = caller(&f, "alice", Subscription::Free).await;
        let doc = uploaded(&f, &alice, "a.txt").await;

        f.service.fail_processing(doc.id, "late failure").await;
        f.service.fail_processing(Uuid::new_v4(), "gone").await;

        let stored = f.store.get_document(doc.id).await.unwrap().unwrap();
        assert_eq!(stored.status, DocumentStatus::Uploaded);
    }

    #[tokio::test]
    async fn test_foreign_reads_denied_without_side_effects() {
        let f = fixture();
        let alice = caller(&f, "alice", Subscription::Free).await;
        let bob = caller(&f, "bob", Subscription::Free).await;
        let doc = uploaded(&f, &alice, "a.txt").await;

        assert!(matches!(f.service.get(Some(&bob), doc.id).await, Err(AppError::AccessDenied)));
        assert!(matches!(f.service.get(None, doc.id).await, Err(AppError::AccessDenied)));
        assert!(matches!(
            f.service.update(&bob, doc.id, DocumentPatch { is_public: Some(true), ..Default::default() }).await,
            Err(AppError::AccessDenied)
        ));
        assert!(matches!(f.service.delete(&bob, doc.id).await, Err(AppError::AccessDenied)));

        let stored = f.store.get_document(doc.id).await.unwrap().unwrap();
        assert_eq!(stored.views, 0);
        assert!(!stored.is_public);

        let viewed = f.service.get(Some(&alice), doc.id).await.unwrap();
        assert_eq!(viewed.views, 1);
    }

    #[tokio::test]
    async fn test_public_document_readable() {
        let f = fixture();
        let alice = caller(&f, "alice", Subscription::Free).await;
        let doc = uploaded(&f, &alice, "a.txt").await;
        f.service
            .update(&alice, doc.id, DocumentPatch { is_public: Some(true), ..Default::default() })
            .await
            .unwrap();

        assert!(f.service.get(None, doc.id).await.is_ok());
        assert!(f.service.download_url(None, doc.id).await.is_ok());
    }

    #[tokio::test]
    async fn test_download_requires_upload() {
        let f = fixture();
        let alice = caller(&f, "alice", Subscription::Free).await;
        let ticket = f.service.init_upload(&alice, upload("a.txt", 10)).await.unwrap();
        assert!(f.service.download_url(Some(&alice), ticket.document_id).await.is_err());

        f.service.confirm_upload(&alice, ticket.document_id).await.unwrap();
        let first = f.service.download_url(Some(&alice), ticket.document_id).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = f.service.download_url(Some(&alice), ticket.document_id).await.unwrap();
        assert_eq!(first.download.method, crate::storage::UrlMethod::Get);
        assert!(second.download.expires_at >= first.download.expires_at);
    }

    #[tokio::test]
    async fn test_delete_cascades_and_tolerates_missing_blob() {
        let f = fixture();
        let alice = caller(&f, "alice", Subscription::Free).await;
        let doc = uploaded(&f, &alice, "a.txt").await;
        let outcome = f
            .service
            .process(&alice, doc.id, ProcessingOptions::default(), ProcessingMode::Initial)
            .await
            .unwrap();

        let path = blob_path("alice", doc.id, "a.txt");
        f.blobs.delete(&path).await.unwrap();

        f.service.delete(&alice, doc.id).await.unwrap();
        assert!(f.store.get_document(doc.id).await.unwrap().is_none());
        assert!(f.store.list_analyses(doc.id).await.unwrap().is_empty());
        assert!(f.store.latest_analysis(outcome.document.id).await.unwrap().is_none());
        assert!(matches!(f.service.get(Some(&alice), doc.id).await, Err(AppError::DocumentNotFound { .. })));

        let user = f.store.get_user("alice").await.unwrap().unwrap();
        assert_eq!(user.usage.storage_used, 0);
    }

    #[tokio::test]
    async fn test_list_filters_before_paging() {
        let f = fixture();
        let alice = caller(&f, "alice", Subscription::Free).await;
        for i in 0..5 {
            f.service.init_upload(&alice, upload(&format!("lease-{}.txt", i), 10)).await.unwrap();
        }
        f.service.init_upload(&alice, upload("other.txt", 10)).await.unwrap();

        let query = DocumentQuery {
            search: Some("LEASE".into()),
            limit: Some(2),
            ..Default::default()
        };
        let page = f.service.list(&alice, &query).await.unwrap();
        assert_eq!(page.total, 5);
        assert_eq!(page.items.len(), 2);
        assert!(page.has_more);
    }

    #[tokio::test]
    async fn test_abandoned_request_still_finishes_processing() {
        let f = fixture_with(MockExtractor::slow(Duration::from_millis(200)));
        let alice = caller(&f, "alice", Subscription::Free).await;
        let doc = uploaded(&f, &alice, "slow.txt").await;

        let abandoned = tokio::time::timeout(
            Duration::from_millis(20),
            f.service
                .process(&alice, doc.id, ProcessingOptions::default(), ProcessingMode::Initial),
        )
        .await;
        assert!(abandoned.is_err());

        let mut stored = f.store.get_document(doc.id).await.unwrap().unwrap();
        for _ in 0..100 {
            if stored.status != DocumentStatus::Processing {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
            stored = f.store.get_document(doc.id).await.unwrap().unwrap();
        }
        assert_eq!(stored.status, DocumentStatus::Processed);
        assert_eq!(stored.processing.status, Some(ProcessingState::Completed));
        assert!(stored.analysis.is_some());
    }

    #[tokio::test]
    async fn test_abandoned_failing_request_ends_in_error() {
        let f = fixture_with(MockExtractor::slow(Duration::from_millis(200)));
        let alice = caller(&f, "alice", Subscription::Free).await;
        let doc = uploaded(&f, &alice, "will-fail.txt").await;

        let abandoned = tokio::time::timeout(
            Duration::from_millis(20),
            f.service
                .process(&alice, doc.id, ProcessingOptions::default(), ProcessingMode::Initial),
        )
        .await;
        assert!(abandoned.is_err());

        let mut stored = f.store.get_document(doc.id).await.unwrap().unwrap();
        for _ in 0..100 {
            if stored.status != DocumentStatus::Processing {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
            stored = f.store.get_document(doc.id).await.unwrap().unwrap();
        }
        assert_eq!(stored.status, DocumentStatus::Error);
        assert!(stored.processing.error.unwrap().contains("will-fail.txt"));
    }

    #[tokio::test]
    async fn test_batch_cap_ignores_larger_configuration() {
        let mut config = crate::config::AppConfig::in_memory();
        config.batch.max_size = 100;
        assert_eq!(ServiceSettings::from_config(&config).batch_max_size, 50);

        let settings = ServiceSettings {
            batch_max_size: 100,
            ..ServiceSettings::default()
        };
        let f = fixture_with_settings(MockExtractor::new(), settings);
        let corp = caller(&f, "corp", Subscription::Enterprise).await;
        let too_many: Vec<Uuid> = (0..51).map(|_| Uuid::new_v4()).collect();

        assert!(matches!(
            f.service.create_batch(&corp, too_many, ProcessingOptions::default()).await,
            Err(AppError::BatchTooLarge { size: 51, max: 50 })
        ));
    }

    #[tokio::test]
    async fn test_batch_requires_enterprise() {
        let f = fixture();
        let alice = caller(&f, "alice", Subscription::Premium).await;
        let doc = uploaded(&f, &alice, "a.txt").await;

        let err = f
            .service
            .create_batch(&alice, vec![doc.id], ProcessingOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.code(), crate::errors::ErrorCode::SubscriptionRequired);
        let stored = f.store.get_document(doc.id).await.unwrap().unwrap();
        assert_eq!(stored.status, DocumentStatus::Uploaded);
    }

    #[tokio::test]
    async fn test_batch_size_bounds() {
        let f = fixture();
        let corp = caller(&f, "corp", Subscription::Enterprise).await;
        let too_many: Vec<Uuid> = (0..51).map(|_| Uuid::new_v4()).collect();

        assert!(matches!(
            f.service.create_batch(&corp, too_many, ProcessingOptions::default()).await,
            Err(AppError::BatchTooLarge { size: 51, max: 50 })
        ));
        assert!(matches!(
            f.service.create_batch(&corp, vec![], ProcessingOptions::default()).await,
            Err(AppError::BatchTooLarge { size: 0, .. })
        ));
    }

    #[tokio::test]
    async fn test_batch_with_foreign_document_rejected() {
        let f = fixture();
        let corp = caller(&f, "corp", Subscription::Enterprise).await;
        let bob = caller(&f, "bob", Subscription::Free).await;
        let a = uploaded(&f, &corp, "a.txt").await;
        let b = uploaded(&f, &corp, "b.txt").await;
        let foreign = uploaded(&f, &bob, "c.txt").await;

        let err = f
            .service
            .create_batch(&corp, vec![a.id, foreign.id, b.id], ProcessingOptions::default())
            .await
            .unwrap_err();
        match err {
            AppError::InvalidDocuments { invalid_document_ids } => assert_eq!(invalid_document_ids, vec![foreign.id]),
            other => panic!("unexpected error: {other}"),
        }
        for id in [a.id, b.id, foreign.id] {
            let doc = f.store.get_document(id).await.unwrap().unwrap();
            assert_eq!(doc.status, DocumentStatus::Uploaded);
        }
    }

    #[tokio::test]
    async fn test_batch_runs_to_partial() {
        let f = fixture();
        let corp = caller(&f, "corp", Subscription::Enterprise).await;
        let good = uploaded(&f, &corp, "good.txt").await;
        let bad = uploaded(&f, &corp, "fail.txt").await;

        let job = f
            .service
            .create_batch(&corp, vec![good.id, bad.id, good.id], ProcessingOptions::default())
            .await
            .unwrap();
        assert_eq!(job.document_ids.0.len(), 2);
        assert_eq!(job.progress.total, 2);

        let mut finished = None;
        for _ in 0..100 {
            let current = f.service.get_batch(&corp, job.id).await.unwrap();
            if current.completed_at.is_some() {
                finished = Some(current);
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let finished = finished.expect("batch did not finish");
        assert_eq!(finished.status, BatchStatus::Partial);
        assert_eq!(finished.progress.completed, 1);
        assert_eq!(finished.progress.failed, 1);

        let good = f.store.get_document(good.id).await.unwrap().unwrap();
        assert_eq!(good.status, DocumentStatus::Processed);
        let bad = f.store.get_document(bad.id).await.unwrap().unwrap();
        assert_eq!(bad.status, DocumentStatus::Error);
    }

    #[tokio::test]
    async fn test_batch_owner_only() {
        let f = fixture();
        let corp = caller(&f, "corp", Subscription::Enterprise).await;
        let bob = caller(&f, "bob", Subscription::Enterprise).await;
        let doc = uploaded(&f, &corp, "a.txt").await;
        let job = f
            .service
            .create_batch(&corp, vec![doc.id], ProcessingOptions::default())
            .await
            .unwrap();

        assert!(matches!(f.service.get_batch(&bob, job.id).await, Err(AppError::AccessDenied)));
        assert!(matches!(
            f.service.get_batch(&corp, Uuid::new_v4()).await,
            Err(AppError::BatchNotFound { .. })
        ));
    }
}
