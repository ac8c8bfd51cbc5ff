//! PDF text extraction
//!
//! Extracts text content from in-memory PDF files using lopdf.

use crate::errors::{AppError, Result};
use tracing::{debug, warn};

/// Extracted text and the page count of a PDF
pub fn extract_pdf_text(bytes: &[u8]) -> Result<(String, u32)> {
    let doc = lopdf::Document::load_mem(bytes).map_err(|e| AppError::Extraction {
        message: format!("Failed to load PDF: {}", e),
    })?;

    let pages = doc.get_pages();
    let page_count = pages.len() as u32;
    debug!(page_count, "Extracting text from PDF");

    let mut text = String::new();
    for (page_num, page_id) in pages.iter() {
        match doc.get_page_content(*page_id) {
            Ok(content) => {
                text.push_str(&extract_text_from_content(&content));
                text.push('\n');
            }
            Err(e) => {
                warn!(page = page_num, error = %e, "Failed to read page content, skipping");
            }
        }
    }

    let cleaned = clean_text(&text);
    if cleaned.is_empty() {
        return Err(AppError::Extraction {
            message: "No text content extracted from PDF".to_string(),
        });
    }

    Ok((cleaned, page_count))
}

/// Collect text shown between BT and ET operators
fn extract_text_from_content(content: &[u8]) -> String {
    let content_str = String::from_utf8_lossy(content);
    let mut text = String::new();
    let mut in_text_block = false;
    let mut current = String::new();

    for line in content_str.lines() {
        let trimmed = line.trim();

        if trimmed == "BT" {
            in_text_block = true;
            continue;
        }

        if trimmed == "ET" {
            in_text_block = false;
            if !current.is_empty() {
                text.push_str(&current);
                text.push(' ');
                current.clear();
            }
            continue;
        }

        if in_text_block {
            if let Some(shown) = text_from_operator(trimmed) {
                current.push_str(&shown);
            }
        }
    }

    text
}

/// Text of a `Tj`, `'`, `"` or `TJ` operator line
fn text_from_operator(line: &str) -> Option<String> {
    if line.ends_with("Tj") || line.ends_with('\'') || line.ends_with('"') {
        let start = line.find('(')?;
        let end = line.rfind(')')?;
        if end > start {
            return Some(decode_pdf_string(&line[start + 1..end]));
        }
        return None;
    }

    if line.ends_with("TJ") {
        let mut result = String::new();
        let mut in_paren = false;
        let mut escaped = false;
        let mut current = String::new();

        for ch in line.chars() {
            match ch {
                _ if escaped => {
                    current.push('\\');
                    current.push(ch);
                    escaped = false;
                }
                '\\' if in_paren => escaped = true,
                '(' if !in_paren => in_paren = true,
                ')' if in_paren => {
                    in_paren = false;
                    result.push_str(&decode_pdf_string(&current));
                    current.clear();
                }
                _ if in_paren => current.push(ch),
                _ => {}
            }
        }

        if !result.is_empty() {
            return Some(result);
        }
    }

    None
}

/// Decode PDF string escapes
fn decode_pdf_string(s: &str) -> String {
    let mut result = String::new();
    let mut chars = s.chars();

    while let Some(ch) = chars.next() {
        if ch == '\\' {
            match chars.next() {
                Some('n') => result.push('\n'),
                Some('r') => result.push('\r'),
                Some('t') => result.push('\t'),
                Some(c) => result.push(c),
                None => {}
            }
        } else {
            result.push(ch);
        }
    }

    result
}

/// Collapse whitespace and normalize typographic quotes
pub(crate) fn clean_text(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace('\u{FEFF}', "")
        .replace(['\u{201C}', '\u{201D}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'")
}
