//! Section splitting and retrieval over extracted text

use text_splitter::{ChunkConfig, TextSplitter};
use tracing::debug;

/// A contiguous excerpt of a document
#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    /// `Section N`, 1-based
    pub label: String,
    pub content: String,
    pub start_pos: usize,
}

/// Split text into sections of at most `max_chars` characters
pub fn split_sections(text: &str, max_chars: usize) -> Vec<Section> {
    let splitter = TextSplitter::new(ChunkConfig::new(max_chars.max(1)));

    let sections: Vec<Section> = splitter
        .chunk_indices(text)
        .enumerate()
        .map(|(i, (start_pos, content))| Section {
            label: format!("Section {}", i + 1),
            content: content.to_string(),
            start_pos,
        })
        .collect();

    debug!(
        input_len = text.len(),
        section_count = sections.len(),
        max_chars,
        "Text split into sections"
    );

    sections
}

fn terms(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() > 2)
        .map(|t| t.to_lowercase())
        .collect()
}

/// Rank sections by the share of question terms they contain.
/// Sections with no overlap are dropped.
pub fn rank_sections<'a>(sections: &'a [Section], question: &str, top: usize) -> Vec<(&'a Section, f64)> {
    let mut wanted = terms(question);
    wanted.sort();
    wanted.dedup();
    if wanted.is_empty() {
        return Vec::new();
    }

    let mut scored: Vec<(&Section, f64)> = sections
        .iter()
        .map(|section| {
            let present = terms(&section.content);
            let hits = wanted.iter().filter(|w| present.contains(w)).count();
            (section, hits as f64 / wanted.len() as f64)
        })
        .filter(|(_, score)| *score > 0.0)
        .collect();

    scored.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.start_pos.cmp(&b.0.start_pos))
    });
    scored.truncate(top);
    scored
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_sections() {
        let text = "This is a clause. ".repeat(100);
        let sections = split_sections(&text, 200);
        assert!(sections.len() > 1);
        assert_eq!(sections[0].label, "Section 1");
        for section in &sections {
            assert!(section.content.chars().count() <= 200);
        }
    }

    #[test]
    fn test_empty_text() {
        assert!(split_sections("", 100).is_empty());
    }

    #[test]
    fn test_rank_prefers_overlap() {
        let sections = vec![
            Section {
                label: "Section 1".into(),
                content: "The term of this agreement is two years.".into(),
                start_pos: 0,
            },
            Section {
                label: "Section 2".into(),
                content: "Payment is due within thirty days of invoice.".into(),
                start_pos: 42,
            },
        ];
        let ranked = rank_sections(&sections, "When is payment due?", 3);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].0.label, "Section 2");
        assert!(ranked[0].1 > 0.5);
    }
}
