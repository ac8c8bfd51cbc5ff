//! Domain services
//!
//! Each service owns one slice of the document lifecycle and runs every
//! request through the same pipeline: existence, access policy,
//! subscription, then payload checks. Handlers stay thin on top of these.

mod admin;
mod analysis;
mod conversations;
mod documents;
mod users;

pub use admin::{
    AdminAggregator, AdminDocumentQuery, AdminStats, AdminUserQuery, Analytics, AnalyticsPeriod, AnalyticsQuery,
    BroadcastInput, BroadcastReceipt, UserPatch,
};
pub use analysis::{AnalysisService, CompareInput, Comparison, ComparedDocument, RiskAssessment};
pub use conversations::{AskInput, ConversationService, FeedbackInput};
pub use documents::{
    DocumentPatch, DocumentQuery, DocumentService, DocumentStatusView, DownloadTicket, InitUpload, ProcessOutcome,
    ProcessingMode, UploadTicket,
};
pub use users::{AuthSession, LoginInput, ProfilePatch, RegisterInput, UserDirectory, UserStats};

use crate::auth::IdentityProvider;
use crate::config::{AppConfig, MAX_BATCH_SIZE};
use crate::extraction::DocumentExtractionService;
use crate::storage::BlobStore;
use crate::store::Store;
use std::sync::Arc;
use std::time::Duration;

/// Tunables shared by the services
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub upload_url_ttl: Duration,
    pub download_url_ttl: Duration,
    pub batch_max_size: usize,
    pub batch_concurrency: usize,
}

impl ServiceSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            upload_url_ttl: Duration::from_secs(config.storage.upload_url_ttl_secs),
            download_url_ttl: Duration::from_secs(config.storage.download_url_ttl_secs),
            batch_max_size: config.batch.max_size.clamp(1, MAX_BATCH_SIZE),
            batch_concurrency: config.batch.concurrency.max(1),
        }
    }

    /// Effective batch cap; never above `MAX_BATCH_SIZE`
    pub fn batch_limit(&self) -> usize {
        self.batch_max_size.clamp(1, MAX_BATCH_SIZE)
    }
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            upload_url_ttl: Duration::from_secs(15 * 60),
            download_url_ttl: Duration::from_secs(60 * 60),
            batch_max_size: MAX_BATCH_SIZE,
            batch_concurrency: 4,
        }
    }
}

/// Every service, wired over the same collaborators
#[derive(Clone)]
pub struct Services {
    pub store: Arc<dyn Store>,
    pub blobs: Arc<dyn BlobStore>,
    pub documents: DocumentService,
    pub analysis: AnalysisService,
    pub conversations: ConversationService,
    pub users: UserDirectory,
    pub admin: AdminAggregator,
}

impl Services {
    pub fn new(
        store: Arc<dyn Store>,
        blobs: Arc<dyn BlobStore>,
        extractor: Arc<dyn DocumentExtractionService>,
        identity: Arc<dyn IdentityProvider>,
        settings: ServiceSettings,
    ) -> Self {
        let documents = DocumentService::new(store.clone(), blobs.clone(), extractor.clone(), settings);
        Self {
            analysis: AnalysisService::new(store.clone()),
            conversations: ConversationService::new(store.clone(), extractor),
            users: UserDirectory::new(store.clone(), blobs.clone(), identity),
            admin: AdminAggregator::new(store.clone(), documents.clone()),
            documents,
            store,
            blobs,
        }
    }
}
