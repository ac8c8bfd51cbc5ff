//! Configuration management for LexDesk services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config/default, config/{APP_ENV}, config/local)
//! - Default values

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Upper bound on documents per batch; `batch.max_size` may only lower it
pub const MAX_BATCH_SIZE: usize = 50;

/// Secrets shorter than this are rejected outside development
const MIN_SECRET_LEN: usize = 32;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Deployment environment (`APP_ENV`)
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Blob storage configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// Extraction service configuration
    #[serde(default)]
    pub extraction: ExtractionConfig,

    /// Authentication configuration
    #[serde(default)]
    pub auth: AuthConfig,

    /// Redis configuration (shared rate-limit counters)
    #[serde(default)]
    pub redis: RedisConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Batch processing configuration
    #[serde(default)]
    pub batch: BatchConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Maximum concurrent requests
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_requests: usize,

    /// Maximum request body size in bytes (storage uploads included)
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,

    /// Return real messages for server-side errors (development only)
    #[serde(default)]
    pub expose_internal_errors: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Store backend
    #[serde(default = "default_database_backend")]
    pub backend: DatabaseBackend,

    /// Primary database URL (for writes)
    #[serde(default = "default_database_url")]
    pub url: String,

    /// Read replica URL (optional, falls back to primary)
    pub read_url: Option<String>,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Idle timeout in seconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    /// Apply pending migrations at startup
    #[serde(default = "default_true")]
    pub run_migrations: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Fs,
    Memory,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_backend")]
    pub backend: StorageBackend,

    /// Root directory for the filesystem backend
    #[serde(default = "default_storage_root")]
    pub root: String,

    /// Secret used to sign upload/download URLs
    #[serde(default = "default_signing_secret")]
    pub signing_secret: String,

    /// Public base URL that signed URLs point at
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,

    /// Lifetime of upload URLs in seconds
    #[serde(default = "default_upload_url_ttl")]
    pub upload_url_ttl_secs: u64,

    /// Lifetime of download URLs in seconds
    #[serde(default = "default_download_url_ttl")]
    pub download_url_ttl_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionProvider {
    Local,
    Http,
    Mock,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExtractionConfig {
    #[serde(default = "default_extraction_provider")]
    pub provider: ExtractionProvider,

    /// Base URL of the remote extraction service
    pub endpoint: Option<String>,

    /// API key for the remote extraction service
    pub api_key: Option<String>,

    /// Request timeout in seconds
    #[serde(default = "default_extraction_timeout")]
    pub timeout_secs: u64,

    /// Maximum retries
    #[serde(default = "default_extraction_retries")]
    pub max_retries: u32,

    /// Section size in characters for answer retrieval
    #[serde(default = "default_section_chars")]
    pub section_chars: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthConfig {
    /// JWT secret for token signing
    #[serde(default = "default_jwt_secret")]
    pub jwt_secret: String,

    /// JWT expiration in seconds
    #[serde(default = "default_jwt_expiration")]
    pub jwt_expiration_secs: u64,

    /// Password reset token lifetime in seconds
    #[serde(default = "default_reset_ttl")]
    pub reset_token_ttl_secs: u64,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RedisConfig {
    /// Redis URL; rate limiting falls back to the local backend when absent
    pub url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RateLimitBackend {
    Redis,
    Local,
}

/// A fixed window: at most `max` requests per `window_secs`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct WindowConfig {
    pub window_secs: u64,
    pub max: u32,
}

impl WindowConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    /// Enable rate limiting
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_rate_limit_backend")]
    pub backend: RateLimitBackend,

    /// Every API route
    #[serde(default = "default_general_window")]
    pub general: WindowConfig,

    /// `/auth/*`
    #[serde(default = "default_auth_window")]
    pub auth: WindowConfig,

    /// `/documents/upload`
    #[serde(default = "default_upload_window")]
    pub upload: WindowConfig,

    /// Key clients by the first `x-forwarded-for` hop. Only enable behind a
    /// proxy that overwrites the header; otherwise clients pick their own key.
    #[serde(default)]
    pub trust_forwarded_for: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level or EnvFilter directive
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_true")]
    pub json_logging: bool,

    /// OpenTelemetry endpoint
    pub otel_endpoint: Option<String>,

    /// Expose `/metrics`
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,

    /// Service name for tracing
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BatchConfig {
    /// Maximum documents per batch
    #[serde(default = "default_batch_max_size")]
    pub max_size: usize,

    /// Documents processed concurrently within one batch
    #[serde(default = "default_batch_concurrency")]
    pub concurrency: usize,
}

// Default value functions
fn default_true() -> bool { true }
fn default_environment() -> String { "development".to_string() }
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_request_timeout() -> u64 { 120 }
fn default_max_concurrent() -> usize { 256 }
fn default_body_limit() -> usize { 512 * 1024 * 1024 }
fn default_database_backend() -> DatabaseBackend { DatabaseBackend::Postgres }
fn default_database_url() -> String { "postgres://localhost/lexdesk".to_string() }
fn default_max_connections() -> u32 { 50 }
fn default_min_connections() -> u32 { 5 }
fn default_connect_timeout() -> u64 { 10 }
fn default_idle_timeout() -> u64 { 300 }
fn default_storage_backend() -> StorageBackend { StorageBackend::Fs }
fn default_storage_root() -> String { "./data/blobs".to_string() }
fn default_signing_secret() -> String { "change-me-storage-secret".to_string() }
fn default_public_base_url() -> String { "http://localhost:8080".to_string() }
fn default_upload_url_ttl() -> u64 { 15 * 60 }
fn default_download_url_ttl() -> u64 { 60 * 60 }
fn default_extraction_provider() -> ExtractionProvider { ExtractionProvider::Local }
fn default_extraction_timeout() -> u64 { 60 }
fn default_extraction_retries() -> u32 { 3 }
fn default_section_chars() -> usize { 1200 }
fn default_jwt_secret() -> String { "change-me-jwt-secret".to_string() }
fn default_jwt_expiration() -> u64 { 3600 }
fn default_reset_ttl() -> u64 { 3600 }
fn default_rate_limit_backend() -> RateLimitBackend { RateLimitBackend::Local }
fn default_general_window() -> WindowConfig { WindowConfig { window_secs: 15 * 60, max: 100 } }
fn default_auth_window() -> WindowConfig { WindowConfig { window_secs: 15 * 60, max: 5 } }
fn default_upload_window() -> WindowConfig { WindowConfig { window_secs: 60 * 60, max: 10 } }
fn default_log_level() -> String { "info".to_string() }
fn default_service_name() -> String { "lexdesk-gateway".to_string() }
fn default_batch_max_size() -> usize { MAX_BATCH_SIZE }
fn default_batch_concurrency() -> usize { 4 }

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Start with defaults
            .set_default("environment", env.as_str())?
            .set_default("server.host", default_host())?
            .set_default("server.port", i64::from(default_port()))?

            // Load base config file
            .add_source(File::with_name("config/default").required(false))

            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))

            // Load local overrides
            .add_source(File::with_name("config/local").required(false))

            // Load from environment variables with APP__ prefix
            // e.g., APP__SERVER__PORT=8081
            .add_source(
                Environment::with_prefix("APP")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load from a specific file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// In-process configuration: memory store, memory blobs, mock extraction.
    /// Used by tests and local demos.
    pub fn in_memory() -> Self {
        let mut config = Self::default();
        config.database.backend = DatabaseBackend::Memory;
        config.storage.backend = StorageBackend::Memory;
        config.extraction.provider = ExtractionProvider::Mock;
        config.rate_limit.backend = RateLimitBackend::Local;
        config.observability.json_logging = false;
        config
    }

    pub fn is_development(&self) -> bool {
        matches!(self.environment.as_str(), "development" | "dev" | "test")
    }

    /// True while either signing secret still has its shipped default
    pub fn uses_default_secrets(&self) -> bool {
        self.auth.jwt_secret == default_jwt_secret() || self.storage.signing_secret == default_signing_secret()
    }

    /// Reject settings the services cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();

        if self.database.backend == DatabaseBackend::Postgres && self.database.url.trim().is_empty() {
            problems.push("database.url is required for the postgres backend".to_string());
        }
        if self.extraction.provider == ExtractionProvider::Http
            && self.extraction.endpoint.as_deref().map_or(true, |e| e.trim().is_empty())
        {
            problems.push("extraction.endpoint is required for the http provider".to_string());
        }
        if self.batch.max_size == 0 || self.batch.max_size > MAX_BATCH_SIZE {
            problems.push(format!("batch.max_size must be between 1 and {}", MAX_BATCH_SIZE));
        }
        if self.server.request_timeout_secs == 0 {
            problems.push("server.request_timeout_secs must be positive".to_string());
        }

        if !self.is_development() {
            for (name, secret, default) in [
                ("auth.jwt_secret", &self.auth.jwt_secret, default_jwt_secret()),
                ("storage.signing_secret", &self.storage.signing_secret, default_signing_secret()),
            ] {
                if *secret == default || secret.len() < MIN_SECRET_LEN {
                    problems.push(format!(
                        "{} must be set to at least {} characters in {}",
                        name, MIN_SECRET_LEN, self.environment
                    ));
                }
            }
            if self.server.expose_internal_errors {
                problems.push(format!("server.expose_internal_errors is not allowed in {}", self.environment));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Message(problems.join("; ")))
        }
    }

    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }

    /// Get the read database URL (falls back to primary)
    pub fn read_database_url(&self) -> &str {
        self.database.read_url.as_deref().unwrap_or(&self.database.url)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_request_timeout(),
            max_concurrent_requests: default_max_concurrent(),
            body_limit_bytes: default_body_limit(),
            expose_internal_errors: false,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: default_database_backend(),
            url: default_database_url(),
            read_url: None,
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connect_timeout_secs: default_connect_timeout(),
            idle_timeout_secs: default_idle_timeout(),
            run_migrations: true,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            root: default_storage_root(),
            signing_secret: default_signing_secret(),
            public_base_url: default_public_base_url(),
            upload_url_ttl_secs: default_upload_url_ttl(),
            download_url_ttl_secs: default_download_url_ttl(),
        }
    }
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            provider: default_extraction_provider(),
            endpoint: None,
            api_key: None,
            timeout_secs: default_extraction_timeout(),
            max_retries: default_extraction_retries(),
            section_chars: default_section_chars(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: default_jwt_secret(),
            jwt_expiration_secs: default_jwt_expiration(),
            reset_token_ttl_secs: default_reset_ttl(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: default_rate_limit_backend(),
            general: default_general_window(),
            auth: default_auth_window(),
            upload: default_upload_window(),
            trust_forwarded_for: false,
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: true,
            otel_endpoint: None,
            metrics_enabled: true,
            service_name: default_service_name(),
        }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_size: default_batch_max_size(),
            concurrency: default_batch_concurrency(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            environment: default_environment(),
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            storage: StorageConfig::default(),
            extraction: ExtractionConfig::default(),
            auth: AuthConfig::default(),
            redis: RedisConfig::default(),
            rate_limit: RateLimitConfig::default(),
            observability: ObservabilityConfig::default(),
            batch: BatchConfig::default(),
        }
    }
}
