//! Document extraction service abstraction
//!
//! Turns raw bytes plus a mime type into extracted text, entities and risks,
//! and answers questions against a stored analysis. Implementations:
//! - `LocalExtractor`: PDF and plain text extraction in-process
//! - `HttpExtractor`: a remote extraction service
//! - `MockExtractor`: deterministic output for tests

mod http;
mod local;
mod mock;
mod pdf;
mod sections;

pub use http::HttpExtractor;
pub use local::LocalExtractor;
pub use mock::MockExtractor;
pub use sections::{split_sections, Section};

use crate::config::{ExtractionConfig, ExtractionProvider};
use crate::db::models::{AnalysisRecord, AnalysisResult, Answer, ProcessingOptions, QaSession};
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use std::sync::Arc;

/// Content types accepted for upload
pub const SUPPORTED_CONTENT_TYPES: &[&str] = &[
    "application/pdf",
    "application/msword",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "text/plain",
    "application/rtf",
    "text/rtf",
];

pub fn is_supported_content_type(content_type: &str) -> bool {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    SUPPORTED_CONTENT_TYPES.contains(&essence.as_str())
}

/// Input of one extraction run
#[derive(Debug, Clone, Copy)]
pub struct ExtractionRequest<'a> {
    pub bytes: &'a [u8],
    pub content_type: &'a str,
    pub file_name: &'a str,
    pub options: &'a ProcessingOptions,
}

/// Input of one question
#[derive(Debug, Clone, Copy)]
pub struct AnswerRequest<'a> {
    pub question: &'a str,
    pub context: Option<&'a str>,
    pub language: &'a str,
    pub analysis: &'a AnalysisRecord,
    /// Earlier turns of the same conversation, oldest first
    pub history: &'a [QaSession],
}

/// Trait for document extraction and question answering
#[async_trait]
pub trait DocumentExtractionService: Send + Sync {
    /// Extract text, entities and risks from raw bytes
    async fn extract(&self, request: ExtractionRequest<'_>) -> Result<AnalysisResult>;

    /// Answer a question about an analyzed document
    async fn answer(&self, request: AnswerRequest<'_>) -> Result<Answer>;

    /// Provider name for logs and metrics
    fn name(&self) -> &str;
}

/// Create an extractor based on configuration
pub fn create_extractor(config: &ExtractionConfig) -> Result<Arc<dyn DocumentExtractionService>> {
    match config.provider {
        ExtractionProvider::Local => Ok(Arc::new(LocalExtractor::new(config.section_chars))),
        ExtractionProvider::Http => {
            let endpoint = config.endpoint.clone().ok_or_else(|| AppError::Configuration {
                message: "extraction.endpoint is required for the http provider".to_string(),
            })?;
            Ok(Arc::new(HttpExtractor::new(
                endpoint,
                config.api_key.clone(),
                config.timeout_secs,
                config.max_retries,
            )?))
        }
        ExtractionProvider::Mock => Ok(Arc::new(MockExtractor::new())),
    }
}
