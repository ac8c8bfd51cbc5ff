//! Remote extraction service client

use super::{AnswerRequest, DocumentExtractionService, ExtractionRequest};
use crate::db::models::{AnalysisResult, Answer, AnswerSource};
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use backoff::backoff::Backoff;
use backoff::ExponentialBackoffBuilder;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{instrument, warn};

pub struct HttpExtractor {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    max_retries: u32,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ExtractQuery<'a> {
    file_name: &'a str,
    extract_text: bool,
    extract_entities: bool,
    analyze_risks: bool,
    generate_summary: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    language: Option<&'a str>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Turn<'a> {
    question: &'a str,
    answer: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AnswerBody<'a> {
    question: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    context: Option<&'a str>,
    language: &'a str,
    summary: &'a str,
    extracted_text: &'a str,
    history: Vec<Turn<'a>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnswerPayload {
    text: String,
    #[serde(default)]
    confidence: f64,
    #[serde(default)]
    sources: Vec<AnswerSource>,
    #[serde(default)]
    related_sections: Vec<String>,
    #[serde(default)]
    follow_up_suggestions: Vec<String>,
}

/// Outcome of one attempt
enum Attempt<T> {
    Done(T),
    Retry(AppError),
}

impl HttpExtractor {
    pub fn new(endpoint: String, api_key: Option<String>, timeout_secs: u64, max_retries: u32) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key,
            max_retries,
        })
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    /// Send a request, retrying connection failures, 429 and 5xx responses
    async fn send_with_retry<T, F>(&self, operation: &str, build: F) -> Result<T>
    where
        T: for<'de> Deserialize<'de>,
        F: Fn() -> reqwest::RequestBuilder,
    {
        let mut policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(200))
            .with_max_interval(Duration::from_secs(5))
            .with_max_elapsed_time(None)
            .build();

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.try_once(build()).await? {
                Attempt::Done(value) => return Ok(value),
                Attempt::Retry(err) if attempt > self.max_retries => return Err(err),
                Attempt::Retry(err) => {
                    let delay = policy.next_backoff().unwrap_or(Duration::from_secs(5));
                    warn!(
                        operation,
                        attempt,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Extraction request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn try_once<T>(&self, request: reqwest::RequestBuilder) -> Result<Attempt<T>>
    where
        T: for<'de> Deserialize<'de>,
    {
        let response = match self.authorized(request).send().await {
            Ok(response) => response,
            Err(e) if e.is_timeout() || e.is_connect() => {
                return Ok(Attempt::Retry(AppError::Extraction {
                    message: format!("Request failed: {}", e),
                }))
            }
            Err(e) => return Err(e.into()),
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let err = AppError::Extraction {
                message: format!("Extraction service returned {}: {}", status, body),
            };
            if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                return Ok(Attempt::Retry(err));
            }
            return Err(err);
        }

        let value = response.json::<T>().await.map_err(|e| AppError::Extraction {
            message: format!("Failed to parse extraction response: {}", e),
        })?;
        Ok(Attempt::Done(value))
    }
}

#[async_trait]
impl DocumentExtractionService for HttpExtractor {
    #[instrument(skip(self, request), fields(endpoint = %self.endpoint, content_type = request.content_type))]
    async fn extract(&self, request: ExtractionRequest<'_>) -> Result<AnalysisResult> {
        let url = format!("{}/extract", self.endpoint);
        let query = ExtractQuery {
            file_name: request.file_name,
            extract_text: request.options.extract_text,
            extract_entities: request.options.extract_entities,
            analyze_risks: request.options.analyze_risks,
            generate_summary: request.options.generate_summary,
            language: request.options.language.as_deref(),
        };

        self.send_with_retry("extract", || {
            self.client
                .post(&url)
                .query(&query)
                .header(reqwest::header::CONTENT_TYPE, request.content_type)
                .body(request.bytes.to_vec())
        })
        .await
    }

    #[instrument(skip(self, request), fields(endpoint = %self.endpoint, analysis_id = %request.analysis.id))]
    async fn answer(&self, request: AnswerRequest<'_>) -> Result<Answer> {
        let url = format!("{}/answer", self.endpoint);
        let body = AnswerBody {
            question: request.question,
            context: request.context,
            language: request.language,
            summary: &request.analysis.result.summary,
            extracted_text: &request.analysis.result.extracted_text,
            history: request
                .history
                .iter()
                .map(|turn| Turn {
                    question: &turn.question.text,
                    answer: &turn.answer.text,
                })
                .collect(),
        };

        let payload: AnswerPayload = self
            .send_with_retry("answer", || self.client.post(&url).json(&body))
            .await?;

        Ok(Answer {
            text: payload.text,
            confidence: payload.confidence,
            sources: payload.sources,
            related_sections: payload.related_sections,
            follow_up_suggestions: payload.follow_up_suggestions,
            timestamp: Utc::now(),
        })
    }

    fn name(&self) -> &str {
        "http"
    }
}
