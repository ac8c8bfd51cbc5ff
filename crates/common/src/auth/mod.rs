//! Authentication
//!
//! Provides:
//! - The `IdentityProvider` boundary (verify bearer tokens, manage accounts)
//! - JWT issuing and validation with a per-account revocation generation
//! - `LocalIdentityProvider`, backed by the identities table of the store

use crate::db::models::IdentityAccount;
use crate::errors::{AppError, Result};
use crate::store::Store;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Verified caller identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub uid: String,
    pub email: String,
    pub email_verified: bool,
}

impl From<&IdentityAccount> for Identity {
    fn from(account: &IdentityAccount) -> Self {
        Self {
            uid: account.uid.clone(),
            email: account.email.clone(),
            email_verified: account.email_verified,
        }
    }
}

/// A freshly issued bearer token
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuedToken {
    pub token: String,
    pub expires_in: u64,
}

/// Credential and account boundary
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Verify a bearer token and return the identity it was issued to
    async fn verify_token(&self, token: &str) -> Result<Identity>;

    /// Create an account; fails with EMAIL_ALREADY_EXISTS on a taken email
    async fn create_account(&self, email: &str, password: &str) -> Result<Identity>;

    /// Exchange email and password for a token
    async fn sign_in(&self, email: &str, password: &str) -> Result<(Identity, IssuedToken)>;

    /// Issue a token for an existing account
    async fn issue_token(&self, uid: &str) -> Result<IssuedToken>;

    /// Start a password reset. Returns the reset token (`{uid}.{secret}`)
    /// when the account exists; unknown emails yield `None`.
    async fn request_password_reset(&self, email: &str) -> Result<Option<String>>;

    /// Finish a password reset started with `request_password_reset`
    async fn complete_password_reset(&self, token: &str, new_password: &str) -> Result<()>;

    /// Invalidate every token issued so far
    async fn revoke_tokens(&self, uid: &str) -> Result<()>;

    async fn delete_account(&self, uid: &str) -> Result<()>;
}

/// JWT claims structure
#[derive(Debug, Serialize, Deserialize)]
pub struct JwtClaims {
    /// Subject (identity uid)
    pub sub: String,

    pub email: String,

    /// Expiration time (Unix timestamp)
    pub exp: i64,

    /// Issued at (Unix timestamp)
    pub iat: i64,

    /// Token generation of the account at issue time
    pub gen: i64,
}

/// JWT token manager
pub struct JwtManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    expiration_secs: i64,
}

impl JwtManager {
    /// Create a new JWT manager with the given secret
    pub fn new(secret: &str, expiration_secs: u64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            expiration_secs: expiration_secs as i64,
        }
    }

    pub fn expiration_secs(&self) -> u64 {
        self.expiration_secs.max(0) as u64
    }

    /// Generate a new JWT token
    pub fn generate_token(&self, uid: &str, email: &str, generation: i64) -> Result<String> {
        let now = Utc::now();
        let exp = now + Duration::seconds(self.expiration_secs);

        let claims = JwtClaims {
            sub: uid.to_string(),
            email: email.to_string(),
            exp: exp.timestamp(),
            iat: now.timestamp(),
            gen: generation,
        };

        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| AppError::internal(format!("Failed to generate token: {}", e)))
    }

    /// Validate and decode a JWT token
    pub fn validate_token(&self, token: &str) -> Result<JwtClaims> {
        decode::<JwtClaims>(token, &self.decoding_key, &Validation::default())
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AppError::TokenExpired,
                _ => AppError::InvalidToken,
            })
    }
}

/// Extract the token from an `Authorization: Bearer ...` header value
pub fn extract_bearer(auth_header: &str) -> Option<&str> {
    auth_header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Hash a one-time token for storage
fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::encode_b64(&rand::random::<[u8; 16]>())
        .map_err(|e| AppError::internal(format!("Failed to encode salt: {}", e)))?;
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::internal(format!("Failed to hash password: {}", e)))
}

fn verify_password(password: &str, stored: &str) -> bool {
    PasswordHash::new(stored)
        .map(|parsed| Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok())
        .unwrap_or(false)
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Identity provider storing argon2 credentials next to the profiles
pub struct LocalIdentityProvider {
    store: Arc<dyn Store>,
    jwt: JwtManager,
    reset_ttl: Duration,
}

impl LocalIdentityProvider {
    pub fn new(store: Arc<dyn Store>, jwt_secret: &str, expiration_secs: u64, reset_ttl_secs: u64) -> Self {
        Self {
            store,
            jwt: JwtManager::new(jwt_secret, expiration_secs),
            reset_ttl: Duration::seconds(reset_ttl_secs as i64),
        }
    }

    fn token_for(&self, account: &IdentityAccount) -> Result<IssuedToken> {
        Ok(IssuedToken {
            token: self.jwt.generate_token(&account.uid, &account.email, account.token_generation)?,
            expires_in: self.jwt.expiration_secs(),
        })
    }

    async fn account(&self, uid: &str) -> Result<IdentityAccount> {
        self.store
            .get_identity(uid)
            .await?
            .ok_or_else(|| AppError::UserNotFound { id: uid.to_string() })
    }
}

#[async_trait]
impl IdentityProvider for LocalIdentityProvider {
    async fn verify_token(&self, token: &str) -> Result<Identity> {
        let claims = self.jwt.validate_token(token)?;
        let account = self
            .store
            .get_identity(&claims.sub)
            .await?
            .ok_or(AppError::InvalidToken)?;

        if claims.gen < account.token_generation {
            debug!(uid = %account.uid, "Rejected token from a revoked generation");
            return Err(AppError::TokenRevoked);
        }

        Ok(Identity::from(&account))
    }

    #[instrument(skip(self, password))]
    async fn create_account(&self, email: &str, password: &str) -> Result<Identity> {
        let email = normalize_email(email);
        if self.store.find_identity_by_email(&email).await?.is_some() {
            return Err(AppError::EmailAlreadyExists);
        }

        let account = IdentityAccount {
            uid: uuid::Uuid::new_v4().simple().to_string(),
            email,
            password_hash: hash_password(password)?,
            email_verified: false,
            token_generation: 0,
            reset_token_hash: None,
            reset_expires_at: None,
            created_at: Utc::now(),
        };
        let account = self.store.insert_identity(account).await?;

        info!(uid = %account.uid, "Identity account created");
        Ok(Identity::from(&account))
    }

    #[instrument(skip(self, password))]
    async fn sign_in(&self, email: &str, password: &str) -> Result<(Identity, IssuedToken)> {
        let account = self
            .store
            .find_identity_by_email(&normalize_email(email))
            .await?
            .ok_or(AppError::InvalidCredentials)?;

        if !verify_password(password, &account.password_hash) {
            warn!(uid = %account.uid, "Sign-in with wrong password");
            return Err(AppError::InvalidCredentials);
        }

        let token = self.token_for(&account)?;
        Ok((Identity::from(&account), token))
    }

    async fn issue_token(&self, uid: &str) -> Result<IssuedToken> {
        let account = self.account(uid).await?;
        self.token_for(&account)
    }

    #[instrument(skip(self))]
    async fn request_password_reset(&self, email: &str) -> Result<Option<String>> {
        let Some(mut account) = self.store.find_identity_by_email(&normalize_email(email)).await? else {
            debug!("Password reset requested for unknown email");
            return Ok(None);
        };

        let token = format!("{}.{}", account.uid, hex::encode(rand::random::<[u8; 32]>()));
        account.reset_token_hash = Some(hash_token(&token));
        account.reset_expires_at = Some(Utc::now() + self.reset_ttl);
        self.store.save_identity(account).await?;

        Ok(Some(token))
    }

    async fn complete_password_reset(&self, token: &str, new_password: &str) -> Result<()> {
        let (uid, _) = token.split_once('.').ok_or(AppError::InvalidToken)?;
        let mut account = self.store.get_identity(uid).await?.ok_or(AppError::InvalidToken)?;

        let expected = account.reset_token_hash.as_deref().ok_or(AppError::InvalidToken)?;
        if expected != hash_token(token) {
            return Err(AppError::InvalidToken);
        }
        if account.reset_expires_at.map_or(true, |at| at <= Utc::now()) {
            return Err(AppError::TokenExpired);
        }

        account.password_hash = hash_password(new_password)?;
        account.reset_token_hash = None;
        account.reset_expires_at = None;
        account.token_generation += 1;
        self.store.save_identity(account).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn revoke_tokens(&self, uid: &str) -> Result<()> {
        let mut account = self.account(uid).await?;
        account.token_generation += 1;
        self.store.save_identity(account).await?;
        info!(uid, "Tokens revoked");
        Ok(())
    }

    async fn delete_account(&self, uid: &str) -> Result<()> {
        if !self.store.delete_identity(uid).await? {
            warn!(uid, "Identity account already absent");
        }
        Ok(())
    }
}
