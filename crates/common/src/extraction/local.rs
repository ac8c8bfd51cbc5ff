//! In-process extraction
//!
//! Reads text out of PDF and plain-text uploads and answers questions by
//! retrieving the best-matching sections of the stored text. Risk and entity
//! detection is left to a real model behind `HttpExtractor`.

use super::pdf::{clean_text, extract_pdf_text};
use super::sections::{rank_sections, split_sections};
use super::{AnswerRequest, DocumentExtractionService, ExtractionRequest};
use crate::db::models::{AnalysisResult, Answer, AnswerSource};
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, instrument};

const SUMMARY_CHARS: usize = 400;
const TOP_SECTIONS: usize = 3;
const EXCERPT_CHARS: usize = 300;

pub struct LocalExtractor {
    section_chars: usize,
}

impl LocalExtractor {
    pub fn new(section_chars: usize) -> Self {
        Self { section_chars }
    }

    fn text_of(&self, request: &ExtractionRequest<'_>) -> Result<(String, Option<u32>)> {
        let essence = request
            .content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        match essence.as_str() {
            "application/pdf" => {
                let (text, pages) = extract_pdf_text(request.bytes)?;
                Ok((text, Some(pages)))
            }
            "text/plain" => Ok((clean_text(&String::from_utf8_lossy(request.bytes)), None)),
            "application/rtf" | "text/rtf" => {
                Ok((clean_text(&strip_rtf(&String::from_utf8_lossy(request.bytes))), None))
            }
            other => Err(AppError::Extraction {
                message: format!("Local extraction does not support {}", other),
            }),
        }
    }
}

/// Leading sentences of the text, cut at a char boundary
fn summarize(text: &str) -> String {
    if text.chars().count() <= SUMMARY_CHARS {
        return text.to_string();
    }
    let cut: String = text.chars().take(SUMMARY_CHARS).collect();
    match cut.rfind(". ") {
        Some(pos) if pos > SUMMARY_CHARS / 2 => cut[..=pos].to_string(),
        _ => format!("{}...", cut.trim_end()),
    }
}

fn excerpt(text: &str) -> String {
    if text.chars().count() <= EXCERPT_CHARS {
        text.to_string()
    } else {
        let cut: String = text.chars().take(EXCERPT_CHARS).collect();
        format!("{}...", cut.trim_end())
    }
}

/// Drop RTF control words and groups, keeping literal text
fn strip_rtf(rtf: &str) -> String {
    let mut out = String::with_capacity(rtf.len());
    let mut chars = rtf.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '\\' => {
                match chars.peek() {
                    Some('\\') | Some('{') | Some('}') => {
                        if let Some(c) = chars.next() {
                            out.push(c);
                        }
                    }
                    _ => {
                        // control word: letters, optional numeric argument, optional space
                        while matches!(chars.peek(), Some(c) if c.is_ascii_alphabetic()) {
                            chars.next();
                        }
                        while matches!(chars.peek(), Some(c) if c.is_ascii_digit() || *c == '-') {
                            chars.next();
                        }
                        if chars.peek() == Some(&' ') {
                            chars.next();
                        }
                        out.push(' ');
                    }
                }
            }
            '{' | '}' => {}
            _ => out.push(ch),
        }
    }

    out
}

#[async_trait]
impl DocumentExtractionService for LocalExtractor {
    #[instrument(skip(self, request), fields(content_type = request.content_type, size = request.bytes.len()))]
    async fn extract(&self, request: ExtractionRequest<'_>) -> Result<AnalysisResult> {
        let (text, page_count) = self.text_of(&request)?;
        if text.is_empty() {
            return Err(AppError::Extraction {
                message: "Document contains no extractable text".to_string(),
            });
        }

        let summary = if request.options.generate_summary {
            summarize(&text)
        } else {
            String::new()
        };

        debug!(chars = text.len(), "Local extraction complete");

        Ok(AnalysisResult {
            extracted_text: text,
            risks: Vec::new(),
            entities: Vec::new(),
            summary,
            confidence: 1.0,
            page_count,
            language: request.options.language.clone(),
        })
    }

    #[instrument(skip(self, request), fields(analysis_id = %request.analysis.id))]
    async fn answer(&self, request: AnswerRequest<'_>) -> Result<Answer> {
        let sections = split_sections(&request.analysis.result.extracted_text, self.section_chars);
        let query = match request.context {
            Some(context) => format!("{} {}", request.question, context),
            None => request.question.to_string(),
        };
        let ranked = rank_sections(&sections, &query, TOP_SECTIONS);

        let (text, confidence) = match ranked.first() {
            Some((best, score)) => (excerpt(&best.content), *score),
            None if !request.analysis.result.summary.is_empty() => (
                format!(
                    "No passage of the document addresses this directly. Summary: {}",
                    request.analysis.result.summary
                ),
                0.0,
            ),
            None => ("No passage of the document addresses this directly.".to_string(), 0.0),
        };

        let related_sections: Vec<String> = ranked.iter().map(|(s, _)| s.label.clone()).collect();

        Ok(Answer {
            text,
            confidence,
            sources: ranked
                .iter()
                .map(|(section, score)| AnswerSource {
                    section: section.label.clone(),
                    excerpt: excerpt(&section.content),
                    score: *score,
                })
                .collect(),
            follow_up_suggestions: related_sections
                .iter()
                .skip(1)
                .map(|label| format!("What else does {} say?", label))
                .collect(),
            related_sections,
            timestamp: Utc::now(),
        })
    }

    fn name(&self) -> &str {
        "local"
    }
}
