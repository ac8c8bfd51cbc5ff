//! Admin rollups, user management and broadcast

use super::documents::DocumentService;
use crate::db::models::*;
use crate::errors::{AppError, Result};
use crate::policy::{require_admin, Caller};
use crate::store::{DocumentFilter, Page, Paged, Store, TimeRange, UserFilter};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionCounts {
    pub free: u64,
    pub premium: u64,
    pub enterprise: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserTotals {
    pub total: u64,
    pub active: u64,
    pub admins: u64,
    pub by_subscription: SubscriptionCounts,
    pub new_last_24h: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentTotals {
    pub total: u64,
    pub processed: u64,
    /// Uploading or uploaded, not yet picked up
    pub pending: u64,
    pub processing: u64,
    pub errors: u64,
    /// Processed share of all documents, in percent
    pub processing_rate: f64,
    pub new_last_24h: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminStats {
    pub users: UserTotals,
    pub documents: DocumentTotals,
    pub analyses: u64,
    pub questions: u64,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalyticsPeriod {
    Day,
    Week,
    Month,
    Custom,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsQuery {
    pub period: Option<AnalyticsPeriod>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl AnalyticsQuery {
    /// Resolve to a half-open `[start, end)` window ending now for fixed periods
    pub fn window(&self, now: DateTime<Utc>) -> Result<(AnalyticsPeriod, DateTime<Utc>, DateTime<Utc>)> {
        let period = self.period.unwrap_or(AnalyticsPeriod::Week);
        let span = match period {
            AnalyticsPeriod::Day => Duration::days(1),
            AnalyticsPeriod::Week => Duration::days(7),
            AnalyticsPeriod::Month => Duration::days(30),
            AnalyticsPeriod::Custom => {
                let (Some(start), Some(end)) = (self.start, self.end) else {
                    return Err(AppError::validation("start", "custom period requires start and end"));
                };
                if start >= end {
                    return Err(AppError::validation("end", "end must be after start"));
                }
                return Ok((period, start, end));
            }
        };
        Ok((period, now - span, now))
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Analytics {
    pub period: AnalyticsPeriod,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub new_users: u64,
    pub new_documents: u64,
    pub processed_documents: u64,
    pub analyses: u64,
    pub questions: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminUserQuery {
    pub role: Option<Role>,
    pub subscription: Option<Subscription>,
    pub is_active: Option<bool>,
    pub search: Option<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminDocumentQuery {
    pub owner_id: Option<String>,
    pub status: Option<DocumentStatus>,
    pub tags: Option<String>,
    pub search: Option<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPatch {
    pub role: Option<Role>,
    pub subscription: Option<Subscription>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastInput {
    #[validate(length(min = 1, max = 200, message = "title must be 1-200 characters"))]
    pub title: String,

    #[validate(length(min = 1, max = 5000, message = "message must be 1-5000 characters"))]
    pub message: String,

    #[validate(length(min = 1, max = 50))]
    pub kind: Option<String>,

    /// All active users when omitted
    pub target_user_ids: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastReceipt {
    pub recipients: u64,
    pub sent_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct AdminAggregator {
    store: Arc<dyn Store>,
    documents: DocumentService,
}

impl AdminAggregator {
    pub fn new(store: Arc<dyn Store>, documents: DocumentService) -> Self {
        Self { store, documents }
    }

    #[instrument(skip(self, caller), fields(admin_id = %caller.uid))]
    pub async fn stats(&self, caller: &Caller) -> Result<AdminStats> {
        require_admin(caller)?;
        let now = Utc::now();
        let last_day = TimeRange::since(now - Duration::hours(24));
        let store = &self.store;

        let by_plan = |plan| UserFilter {
            subscription: Some(plan),
            ..Default::default()
        };
        let users = UserTotals {
            total: store.count_users(&UserFilter::default()).await?,
            active: store.count_users(&UserFilter::active()).await?,
            admins: store
                .count_users(&UserFilter {
                    role: Some(Role::Admin),
                    ..Default::default()
                })
                .await?,
            by_subscription: SubscriptionCounts {
                free: store.count_users(&by_plan(Subscription::Free)).await?,
                premium: store.count_users(&by_plan(Subscription::Premium)).await?,
                enterprise: store.count_users(&by_plan(Subscription::Enterprise)).await?,
            },
            new_last_24h: store
                .count_users(&UserFilter {
                    created: last_day,
                    ..Default::default()
                })
                .await?,
        };

        let total = store.count_documents(&DocumentFilter::default()).await?;
        let processed = store.count_documents(&status_filter(&[DocumentStatus::Processed])).await?;
        let documents = DocumentTotals {
            total,
            processed,
            pending: store
                .count_documents(&status_filter(&[DocumentStatus::Uploading, DocumentStatus::Uploaded]))
                .await?,
            processing: store.count_documents(&status_filter(&[DocumentStatus::Processing])).await?,
            errors: store.count_documents(&status_filter(&[DocumentStatus::Error])).await?,
            processing_rate: processing_rate(processed, total),
            new_last_24h: store
                .count_documents(&DocumentFilter::default().created_in(last_day))
                .await?,
        };

        Ok(AdminStats {
            users,
            documents,
            analyses: store.count_analyses(TimeRange::default()).await?,
            questions: store.count_qa_sessions(TimeRange::default()).await?,
            generated_at: now,
        })
    }

    #[instrument(skip(self, caller, query), fields(admin_id = %caller.uid))]
    pub async fn analytics(&self, caller: &Caller, query: &AnalyticsQuery) -> Result<Analytics> {
        require_admin(caller)?;
        let (period, start, end) = query.window(Utc::now())?;
        let range = TimeRange::between(start, end);
        let store = &self.store;

        Ok(Analytics {
            period,
            start,
            end,
            new_users: store
                .count_users(&UserFilter {
                    created: range,
                    ..Default::default()
                })
                .await?,
            new_documents: store
                .count_documents(&DocumentFilter::default().created_in(range))
                .await?,
            processed_documents: store
                .count_documents(
                    &DocumentFilter::default()
                        .with_status(DocumentStatus::Processed)
                        .created_in(range),
                )
                .await?,
            analyses: store.count_analyses(range).await?,
            questions: store.count_qa_sessions(range).await?,
        })
    }

    pub async fn list_users(&self, caller: &Caller, query: &AdminUserQuery) -> Result<Paged<User>> {
        require_admin(caller)?;
        let filter = UserFilter {
            role: query.role,
            subscription: query.subscription,
            is_active: query.is_active,
            search: query
                .search
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            created: TimeRange::default(),
        };
        self.store
            .list_users(&filter, Page::new(query.limit, query.offset))
            .await
    }

    pub async fn list_documents(&self, caller: &Caller, query: &AdminDocumentQuery) -> Result<Paged<Document>> {
        require_admin(caller)?;
        let mut filter = DocumentFilter {
            owner_id: query.owner_id.clone(),
            ..Default::default()
        };
        if let Some(status) = query.status {
            filter = filter.with_status(status);
        }
        if let Some(ref tags) = query.tags {
            filter.tags = TagList::normalized(tags.split(',')).0;
        }
        filter.search = query
            .search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        self.store
            .list_documents(&filter, Page::new(query.limit, query.offset))
            .await
    }

    #[instrument(skip(self, caller, patch), fields(admin_id = %caller.uid))]
    pub async fn update_user(&self, caller: &Caller, user_id: &str, patch: UserPatch) -> Result<User> {
        require_admin(caller)?;
        let mut user = self
            .store
            .get_user(user_id)
            .await?
            .ok_or_else(|| AppError::UserNotFound { id: user_id.to_string() })?;

        if patch.role.is_none() && patch.subscription.is_none() && patch.is_active.is_none() {
            return Err(AppError::validation("body", "No updatable fields provided"));
        }
        if user.id == caller.uid && (patch.role == Some(Role::User) || patch.is_active == Some(false)) {
            return Err(AppError::validation("userId", "Admins cannot demote or disable themselves"));
        }

        if let Some(role) = patch.role {
            user.role = role;
        }
        if let Some(subscription) = patch.subscription {
            user.subscription = subscription;
        }
        if let Some(is_active) = patch.is_active {
            user.is_active = is_active;
        }
        user.updated_at = Utc::now();

        let user = self.store.save_user(user).await?;
        info!(
            user_id,
            role = ?user.role,
            subscription = user.subscription.as_str(),
            is_active = user.is_active,
            "User updated by admin"
        );
        Ok(user)
    }

    pub async fn force_delete_document(&self, caller: &Caller, id: Uuid) -> Result<()> {
        self.documents.force_delete(caller, id).await
    }

    /// One notification per target user
    #[instrument(skip(self, caller, input), fields(admin_id = %caller.uid))]
    pub async fn broadcast(&self, caller: &Caller, input: BroadcastInput) -> Result<BroadcastReceipt> {
        require_admin(caller)?;
        input.validate()?;

        let targets = match input.target_user_ids {
            Some(ids) => {
                let mut existing: Vec<String> = Vec::with_capacity(ids.len());
                for id in ids {
                    if existing.contains(&id) {
                        continue;
                    }
                    if self.store.get_user(&id).await?.is_some() {
                        existing.push(id);
                    }
                }
                existing
            }
            None => self.store.active_user_ids().await?,
        };
        if targets.is_empty() {
            return Err(AppError::NoTargetUsers);
        }

        let now = Utc::now();
        let kind = input.kind.unwrap_or_else(|| "announcement".to_string());
        let notifications: Vec<Notification> = targets
            .into_iter()
            .map(|user_id| Notification {
                id: Uuid::new_v4(),
                user_id,
                title: input.title.clone(),
                message: input.message.clone(),
                kind: kind.clone(),
                read: false,
                created_by: caller.uid.clone(),
                created_at: now,
            })
            .collect();

        let recipients = self.store.insert_notifications(notifications).await?;
        info!(recipients, "Broadcast sent");
        Ok(BroadcastReceipt {
            recipients,
            sent_at: now,
        })
    }
}

fn status_filter(statuses: &[DocumentStatus]) -> DocumentFilter {
    DocumentFilter {
        statuses: statuses.to_vec(),
        ..Default::default()
    }
}

fn processing_rate(processed: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    ((processed as f64 / total as f64) * 10_000.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extraction::MockExtractor;
    use crate::services::ServiceSettings;
    use crate::storage::{MemoryBlobStore, UrlSigner};
    use crate::store::MemoryStore;
    use crate::testing::{sample_document, sample_user};

    struct Fixture {
        store: Arc<MemoryStore>,
        admin: AdminAggregator,
        root: Caller,
        alice: Caller,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let blobs = Arc::new(MemoryBlobStore::new(UrlSigner::new("secret", "http://localhost").unwrap()));
        let documents = DocumentService::new(
            store.clone(),
            blobs,
            Arc::new(MockExtractor::new()),
            ServiceSettings::default(),
        );

        let mut root = sample_user("root", Subscription::Free);
        root.role = Role::Admin;
        let root = store.insert_user(root).await.unwrap();
        let alice = store.insert_user(sample_user("alice", Subscription::Premium)).await.unwrap();

        Fixture {
            admin: AdminAggregator::new(store.clone(), documents),
            store,
            root: Caller::from(&root),
            alice: Caller::from(&alice),
        }
    }

    #[test]
    fn test_processing_rate() {
        assert_eq!(processing_rate(0, 0), 0.0);
        assert_eq!(processing_rate(1, 3), 33.33);
        assert_eq!(processing_rate(2, 2), 100.0);
    }

    #[test]
    fn test_custom_window_requires_ordered_bounds() {
        let now = Utc::now();
        let query = AnalyticsQuery {
            period: Some(AnalyticsPeriod::Custom),
            start: Some(now),
            end: Some(now - Duration::days(1)),
        };
        assert!(query.window(now).is_err());

        let week = AnalyticsQuery {
            period: None,
            start: None,
            end: None,
        };
        let (period, start, end) = week.window(now).unwrap();
        assert_eq!(period, AnalyticsPeriod::Week);
        assert_eq!(end - start, Duration::days(7));
    }

    #[tokio::test]
    async fn test_non_admin_denied() {
        let f = fixture().await;
        assert!(matches!(f.admin.stats(&f.alice).await, Err(AppError::AccessDenied)));
        assert!(matches!(
            f.admin.list_users(&f.alice, &AdminUserQuery::default()).await,
            Err(AppError::AccessDenied)
        ));
    }

    #[tokio::test]
    async fn test_stats_rollup() {
        let f = fixture().await;
        for status in [
            DocumentStatus::Uploading,
            DocumentStatus::Uploaded,
            DocumentStatus::Processing,
            DocumentStatus::Processed,
        ] {
            f.store.insert_document(sample_document("alice", status)).await.unwrap();
        }

        let stats = f.admin.stats(&f.root).await.unwrap();
        assert_eq!(stats.users.total, 2);
        assert_eq!(stats.users.admins, 1);
        assert_eq!(stats.users.by_subscription.premium, 1);
        assert_eq!(stats.users.new_last_24h, 2);
        assert_eq!(stats.documents.total, 4);
        assert_eq!(stats.documents.pending, 2);
        assert_eq!(stats.documents.processing, 1);
        assert_eq!(stats.documents.processing_rate, 25.0);
    }

    #[tokio::test]
    async fn test_analytics_window_excludes_old_records() {
        let f = fixture().await;
        let mut old = sample_document("alice", DocumentStatus::Uploaded);
        old.created_at = Utc::now() - Duration::days(10);
        f.store.insert_document(old).await.unwrap();
        f.store
            .insert_document(sample_document("alice", DocumentStatus::Uploaded))
            .await
            .unwrap();

        let analytics = f
            .admin
            .analytics(
                &f.root,
                &AnalyticsQuery {
                    period: Some(AnalyticsPeriod::Week),
                    start: None,
                    end: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(analytics.new_documents, 1);
    }

    #[tokio::test]
    async fn test_update_user() {
        let f = fixture().await;
        let updated = f
            .admin
            .update_user(
                &f.root,
                "alice",
                UserPatch {
                    subscription: Some(Subscription::Enterprise),
                    is_active: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.subscription, Subscription::Enterprise);
        assert!(!updated.is_active);

        assert!(matches!(
            f.admin.update_user(&f.root, "ghost", UserPatch { is_active: Some(true), ..Default::default() }).await,
            Err(AppError::UserNotFound { .. })
        ));
        assert!(f
            .admin
            .update_user(&f.root, "root", UserPatch { is_active: Some(false), ..Default::default() })
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_force_delete() {
        let f = fixture().await;
        let doc = f
            .store
            .insert_document(sample_document("alice", DocumentStatus::Uploaded))
            .await
            .unwrap();

        assert!(matches!(
            f.admin.force_delete_document(&f.alice, doc.id).await,
            Err(AppError::AccessDenied)
        ));
        f.admin.force_delete_document(&f.root, doc.id).await.unwrap();
        assert!(f.store.get_document(doc.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_broadcast_targets() {
        let f = fixture().await;
        let input = |targets: Option<Vec<String>>| BroadcastInput {
            title: "Maintenance".into(),
            message: "Tonight at 22:00 UTC".into(),
            kind: None,
            target_user_ids: targets,
        };

        let receipt = f.admin.broadcast(&f.root, input(None)).await.unwrap();
        assert_eq!(receipt.recipients, 2);

        let receipt = f
            .admin
            .broadcast(&f.root, input(Some(vec!["alice".into(), "alice".into(), "ghost".into()])))
            .await
            .unwrap();
        assert_eq!(receipt.recipients, 1);
        assert_eq!(f.store.list_notifications("alice", 10).await.unwrap().len(), 2);

        assert!(matches!(
            f.admin.broadcast(&f.root, input(Some(vec!["ghost".into()]))).await,
            Err(AppError::NoTargetUsers)
        ));
    }
}
