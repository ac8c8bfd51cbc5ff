//! Deterministic extractor for tests and local development

use super::pdf::clean_text;
use super::{AnswerRequest, DocumentExtractionService, ExtractionRequest};
use crate::db::models::{
    AnalysisResult, Answer, AnswerSource, EntityType, ExtractedEntity, RiskFactor, RiskType, Severity,
};
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::time::Duration;

/// File names containing this marker fail extraction
pub const FAILURE_MARKER: &str = "fail";

#[derive(Default)]
pub struct MockExtractor {
    always_fail: bool,
    delay: Option<Duration>,
}

impl MockExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// An extractor whose every call fails
    pub fn failing() -> Self {
        Self {
            always_fail: true,
            ..Self::default()
        }
    }

    /// An extractor that sleeps before every extraction
    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }
}

#[async_trait]
impl DocumentExtractionService for MockExtractor {
    async fn extract(&self, request: ExtractionRequest<'_>) -> Result<AnalysisResult> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.always_fail || request.file_name.to_ascii_lowercase().contains(FAILURE_MARKER) {
            return Err(AppError::Extraction {
                message: format!("Mock extraction failed for {}", request.file_name),
            });
        }

        let text = clean_text(&String::from_utf8_lossy(request.bytes));
        let lower = text.to_lowercase();

        let mut risks = Vec::new();
        if request.options.analyze_risks && lower.contains("unlimited liability") {
            risks.push(RiskFactor {
                risk_type: RiskType::Liability,
                severity: Severity::High,
                description: "Liability is not capped".into(),
                location: None,
                recommendation: "Negotiate a liability cap".into(),
            });
        }
        if request.options.analyze_risks && lower.contains("terminate at any time") {
            risks.push(RiskFactor {
                risk_type: RiskType::Termination,
                severity: Severity::Medium,
                description: "Either party may terminate without notice".into(),
                location: None,
                recommendation: "Add a notice period".into(),
            });
        }

        let entities = if request.options.extract_entities {
            vec![ExtractedEntity {
                entity_type: EntityType::Clause,
                name: request.file_name.to_string(),
                confidence: 0.9,
            }]
        } else {
            Vec::new()
        };

        let summary = if request.options.generate_summary {
            text.chars().take(120).collect()
        } else {
            String::new()
        };

        Ok(AnalysisResult {
            extracted_text: text,
            risks,
            entities,
            summary,
            confidence: 0.95,
            page_count: Some(1),
            language: request.options.language.clone(),
        })
    }

    async fn answer(&self, request: AnswerRequest<'_>) -> Result<Answer> {
        if self.always_fail {
            return Err(AppError::Extraction {
                message: "Mock answer failed".into(),
            });
        }

        let turn = request.history.len() + 1;
        Ok(Answer {
            text: format!("Answer {} to: {}", turn, request.question),
            confidence: 0.8,
            sources: vec![AnswerSource {
                section: "Section 1".into(),
                excerpt: request.analysis.result.summary.clone(),
                score: 0.8,
            }],
            related_sections: vec!["Section 1".into()],
            follow_up_suggestions: vec!["What are the payment terms?".into()],
            timestamp: Utc::now(),
        })
    }

    fn name(&self) -> &str {
        "mock"
    }
}
