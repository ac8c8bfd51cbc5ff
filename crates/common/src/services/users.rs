//! User profiles paired with identity accounts

use crate::auth::{IdentityProvider, IssuedToken};
use crate::db::models::*;
use crate::errors::{AppError, Result};
use crate::policy::Caller;
use crate::storage::{blob_path, BlobStore};
use crate::store::{DocumentFilter, Page, Store};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use validator::Validate;

/// Most notifications returned by one listing
pub const NOTIFICATION_LIMIT: u64 = 50;

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RegisterInput {
    #[validate(email(message = "email must be a valid address"))]
    pub email: String,

    #[validate(length(min = 8, max = 128, message = "password must be 8-128 characters"))]
    pub password: String,

    #[validate(length(min = 1, max = 100, message = "displayName must be 1-100 characters"))]
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct LoginInput {
    #[validate(email)]
    pub email: String,

    #[validate(length(min = 1))]
    pub password: String,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ProfilePatch {
    #[validate(length(min = 1, max = 100))]
    pub display_name: Option<String>,

    pub preferences: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthSession {
    pub user: User,
    pub token: String,
    pub expires_in: u64,
}

impl AuthSession {
    fn new(user: User, token: IssuedToken) -> Self {
        Self {
            user,
            token: token.token,
            expires_in: token.expires_in,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStats {
    pub total_documents: u64,
    pub processed_documents: u64,
    pub processing_documents: u64,
    pub failed_documents: u64,
    pub usage: Usage,
    pub subscription: Subscription,
    pub max_upload_bytes: u64,
}

#[derive(Clone)]
pub struct UserDirectory {
    store: Arc<dyn Store>,
    blobs: Arc<dyn BlobStore>,
    identity: Arc<dyn IdentityProvider>,
}

impl UserDirectory {
    pub fn new(store: Arc<dyn Store>, blobs: Arc<dyn BlobStore>, identity: Arc<dyn IdentityProvider>) -> Self {
        Self { store, blobs, identity }
    }

    async fn load(&self, uid: &str) -> Result<User> {
        self.store
            .get_user(uid)
            .await?
            .ok_or_else(|| AppError::UserNotFound { id: uid.to_string() })
    }

    /// Create the identity account and its profile, or neither
    #[instrument(skip(self, input))]
    pub async fn register(&self, input: RegisterInput) -> Result<AuthSession> {
        input.validate()?;

        let identity = self.identity.create_account(&input.email, &input.password).await?;
        let now = Utc::now();
        let display_name = input
            .display_name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| identity.email.split('@').next().unwrap_or_default().to_string());

        let profile = User {
            id: identity.uid.clone(),
            email: identity.email.clone(),
            display_name,
            role: Role::User,
            subscription: Subscription::Free,
            is_active: true,
            usage: Usage::default(),
            preferences: serde_json::json!({}),
            created_at: now,
            updated_at: now,
            last_login_at: Some(now),
        };

        let user = match self.store.insert_user(profile).await {
            Ok(user) => user,
            Err(e) => {
                error!(uid = %identity.uid, error = %e, "Profile insert failed, rolling back identity");
                if let Err(rollback) = self.identity.delete_account(&identity.uid).await {
                    error!(uid = %identity.uid, error = %rollback, "Identity rollback failed");
                }
                return Err(e);
            }
        };

        let token = self.identity.issue_token(&user.id).await?;
        info!(uid = %user.id, "User registered");
        Ok(AuthSession::new(user, token))
    }

    #[instrument(skip(self, input))]
    pub async fn login(&self, input: LoginInput) -> Result<AuthSession> {
        input.validate()?;
        let (identity, token) = self.identity.sign_in(&input.email, &input.password).await?;

        let mut user = self
            .store
            .get_user(&identity.uid)
            .await?
            .ok_or(AppError::InvalidCredentials)?;
        if !user.is_active {
            return Err(AppError::AccountDisabled);
        }

        let now = Utc::now();
        user.last_login_at = Some(now);
        user.updated_at = now;
        let user = self.store.save_user(user).await?;
        Ok(AuthSession::new(user, token))
    }

    /// Bearer token to the caller behind it. The profile must exist and be active.
    pub async fn resolve(&self, token: &str) -> Result<Caller> {
        let identity = self.identity.verify_token(token).await?;
        let user = self
            .store
            .get_user(&identity.uid)
            .await?
            .ok_or_else(|| AppError::Unauthorized {
                message: "No profile for this account".to_string(),
            })?;
        if !user.is_active {
            return Err(AppError::AccountDisabled);
        }
        Ok(Caller::from(&user))
    }

    pub async fn profile(&self, caller: &Caller) -> Result<User> {
        self.load(&caller.uid).await
    }

    pub async fn update_profile(&self, caller: &Caller, patch: ProfilePatch) -> Result<User> {
        let mut user = self.load(&caller.uid).await?;
        patch.validate()?;
        if patch.display_name.is_none() && patch.preferences.is_none() {
            return Err(AppError::validation("body", "No updatable fields provided"));
        }
        if let Some(preferences) = patch.preferences {
            if !preferences.is_object() {
                return Err(AppError::validation("preferences", "preferences must be an object"));
            }
            user.preferences = preferences;
        }
        if let Some(name) = patch.display_name {
            user.display_name = name.trim().to_string();
        }
        user.updated_at = Utc::now();
        self.store.save_user(user).await
    }

    pub async fn stats(&self, caller: &Caller) -> Result<UserStats> {
        let user = self.load(&caller.uid).await?;
        let owned = DocumentFilter::owned_by(&caller.uid);

        let total_documents = self.store.count_documents(&owned).await?;
        let processed_documents = self
            .store
            .count_documents(&owned.clone().with_status(DocumentStatus::Processed))
            .await?;
        let processing_documents = self
            .store
            .count_documents(&owned.clone().with_status(DocumentStatus::Processing))
            .await?;
        let failed_documents = self
            .store
            .count_documents(&owned.with_status(DocumentStatus::Error))
            .await?;

        Ok(UserStats {
            total_documents,
            processed_documents,
            processing_documents,
            failed_documents,
            max_upload_bytes: user.subscription.max_upload_bytes(),
            subscription: user.subscription,
            usage: user.usage,
        })
    }

    pub async fn notifications(&self, caller: &Caller) -> Result<Vec<Notification>> {
        self.store.list_notifications(&caller.uid, NOTIFICATION_LIMIT).await
    }

    /// Blobs, then every owned record, then the identity account
    #[instrument(skip(self, caller), fields(user_id = %caller.uid))]
    pub async fn delete_account(&self, caller: &Caller) -> Result<()> {
        let owned = DocumentFilter::owned_by(&caller.uid);
        let page_size = Page::MAX_LIMIT;
        let mut offset = 0;
        loop {
            let page = self
                .store
                .list_documents(&owned, Page::new(Some(page_size), Some(offset)))
                .await?;
            for doc in &page.items {
                let path = blob_path(&doc.owner_id, doc.id, &doc.file_name);
                if let Err(e) = self.blobs.delete(&path).await {
                    warn!(document_id = %doc.id, error = %e, "Failed to delete blob");
                }
            }
            if !page.has_more {
                break;
            }
            offset += page_size;
        }

        self.store.delete_user_cascade(&caller.uid).await?;
        self.identity.delete_account(&caller.uid).await?;
        info!("Account deleted");
        Ok(())
    }

    /// Issue a reset token. `None` for unknown emails, so callers can answer uniformly.
    pub async fn request_password_reset(&self, email: &str) -> Result<Option<String>> {
        self.identity.request_password_reset(email).await
    }

    pub async fn complete_password_reset(&self, token: &str, new_password: &str) -> Result<()> {
        if new_password.chars().count() < 8 {
            return Err(AppError::validation("newPassword", "password must be at least 8 characters"));
        }
        self.identity.complete_password_reset(token, new_password).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::LocalIdentityProvider;
    use crate::storage::{MemoryBlobStore, UrlSigner};
    use crate::store::MemoryStore;
    use crate::testing::sample_document;

    struct Fixture {
        store: Arc<MemoryStore>,
        blobs: Arc<MemoryBlobStore>,
        users: UserDirectory,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let blobs = Arc::new(MemoryBlobStore::new(UrlSigner::new("secret", "http://localhost").unwrap()));
        let identity = Arc::new(LocalIdentityProvider::new(store.clone(), "test_secret", 3600, 600));
        let users = UserDirectory::new(store.clone(), blobs.clone(), identity);
        Fixture { store, blobs, users }
    }

    fn register_input(email: &str) -> RegisterInput {
        RegisterInput {
            email: email.to_string(),
            password: "correct horse".to_string(),
            display_name: None,
        }
    }

    #[tokio::test]
    async fn test_register_then_resolve() {
        let f = fixture();
        let session = f.users.register(register_input("Alice@Example.com")).await.unwrap();
        assert_eq!(session.user.email, "alice@example.com");
        assert_eq!(session.user.display_name, "alice");
        assert_eq!(session.user.subscription, Subscription::Free);

        let caller = f.users.resolve(&session.token).await.unwrap();
        assert_eq!(caller.uid, session.user.id);
        assert_eq!(caller.role, Role::User);
    }

    #[tokio::test]
    async fn test_duplicate_registration() {
        let f = fixture();
        f.users.register(register_input("a@example.com")).await.unwrap();
        assert!(matches!(
            f.users.register(register_input("a@example.com")).await,
            Err(AppError::EmailAlreadyExists)
        ));
    }

    #[tokio::test]
    async fn test_register_validates() {
        let f = fixture();
        let mut input = register_input("not-an-email");
        input.password = "short".into();
        match f.users.register(input).await {
            Err(AppError::Validation { fields, .. }) => {
                let names: Vec<&str> = fields.iter().map(|f| f.field.as_str()).collect();
                assert_eq!(names, vec!["email", "password"]);
            }
            other => panic!("unexpected: {:?}", other.map(|s| s.user.id)),
        }
    }

    #[tokio::test]
    async fn test_disabled_account_rejected() {
        let f = fixture();
        let session = f.users.register(register_input("a@example.com")).await.unwrap();
        let mut user = session.user.clone();
        user.is_active = false;
        f.store.save_user(user).await.unwrap();

        assert!(matches!(f.users.resolve(&session.token).await, Err(AppError::AccountDisabled)));
        assert!(matches!(
            f.users
                .login(LoginInput {
                    email: "a@example.com".into(),
                    password: "correct horse".into()
                })
                .await,
            Err(AppError::AccountDisabled)
        ));
    }

    #[tokio::test]
    async fn test_login_sets_last_login() {
        let f = fixture();
        f.users.register(register_input("a@example.com")).await.unwrap();
        let session = f
            .users
            .login(LoginInput {
                email: "a@example.com".into(),
                password: "correct horse".into(),
            })
            .await
            .unwrap();
        assert!(session.user.last_login_at.is_some());
        assert!(matches!(
            f.users
                .login(LoginInput {
                    email: "a@example.com".into(),
                    password: "wrong horse".into()
                })
                .await,
            Err(AppError::InvalidCredentials)
        ));
    }

    #[tokio::test]
    async fn test_update_profile_and_stats() {
        let f = fixture();
        let session = f.users.register(register_input("a@example.com")).await.unwrap();
        let caller = Caller::from(&session.user);

        let updated = f
            .users
            .update_profile(
                &caller,
                ProfilePatch {
                    display_name: Some("  Alice  ".into()),
                    preferences: Some(serde_json::json!({"theme": "dark"})),
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.display_name, "Alice");
        assert_eq!(updated.preferences["theme"], "dark");

        assert!(f.users.update_profile(&caller, ProfilePatch::default()).await.is_err());

        f.store
            .insert_document(sample_document(&caller.uid, DocumentStatus::Processed))
            .await
            .unwrap();
        f.store
            .insert_document(sample_document(&caller.uid, DocumentStatus::Error))
            .await
            .unwrap();
        let stats = f.users.stats(&caller).await.unwrap();
        assert_eq!(stats.total_documents, 2);
        assert_eq!(stats.processed_documents, 1);
        assert_eq!(stats.failed_documents, 1);
        assert_eq!(stats.max_upload_bytes, 5_242_880);
    }

    #[tokio::test]
    async fn test_delete_account_removes_everything() {
        let f = fixture();
        let session = f.users.register(register_input("a@example.com")).await.unwrap();
        let caller = Caller::from(&session.user);

        let doc = f
            .store
            .insert_document(sample_document(&caller.uid, DocumentStatus::Uploaded))
            .await
            .unwrap();
        let path = blob_path(&doc.owner_id, doc.id, &doc.file_name);
        f.blobs.put(&path, b"body".to_vec(), "text/plain").await.unwrap();

        f.users.delete_account(&caller).await.unwrap();

        assert!(!f.blobs.exists(&path).await.unwrap());
        assert!(f.store.get_document(doc.id).await.unwrap().is_none());
        assert!(f.store.get_user(&caller.uid).await.unwrap().is_none());
        assert!(f.store.get_identity(&caller.uid).await.unwrap().is_none());
        assert!(f.users.resolve(&session.token).await.is_err());
    }

    #[tokio::test]
    async fn test_password_reset_revokes_old_tokens() {
        let f = fixture();
        let session = f.users.register(register_input("a@example.com")).await.unwrap();

        assert!(f.users.request_password_reset("nobody@example.com").await.unwrap().is_none());
        let token = f.users.request_password_reset("a@example.com").await.unwrap().unwrap();
        assert!(f.users.complete_password_reset(&token, "short").await.is_err());
        f.users.complete_password_reset(&token, "new password!").await.unwrap();

        assert!(matches!(f.users.resolve(&session.token).await, Err(AppError::TokenRevoked)));
        let fresh = f
            .users
            .login(LoginInput {
                email: "a@example.com".into(),
                password: "new password!".into(),
            })
            .await
            .unwrap();
        assert!(f.users.resolve(&fresh.token).await.is_ok());
    }
}
