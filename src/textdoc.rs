use lazy_static::lazy_static;
use regex::Regex;
use std::sync::Mutex;

use crate::error::{ApiError, Result};
use crate::jobs::audiobook::Chapter;

lazy_static! {
    static ref SOFT_BREAK_RE: Regex = Regex::new(r"([^\n])\n([^\n])").unwrap();
    static ref GLUED_PUNCT_RE: Regex = Regex::new(r"([.!?;:,])([A-Za-z])").unwrap();
    static ref CAMEL_JOIN_RE: Regex = Regex::new(r"([a-z])([A-Z])").unwrap();
    static ref INLINE_WS_RE: Regex = Regex::new(r"[ \t]+").unwrap();
    static ref PARA_RUN_RE: Regex = Regex::new(r"\n{3,}").unwrap();
    static ref MD_HEADING_RE: Regex = Regex::new(r"(?m)^#{1,6}\s+(.+)$").unwrap();
}

/// A document reduced to synthesizable text plus an optional chapter TOC
#[derive(Debug, Clone)]
pub struct ExtractedDocument {
    pub text: String,
    pub chapters: Vec<Chapter>,
}

/// Converter for binary document formats (external collaborator)
pub trait TextExtractor: Send + Sync {
    fn extract(&self, file_name: &str, bytes: &[u8]) -> Result<ExtractedDocument>;
}

/// Dispatches uploads to the right extraction path
///
/// Plain text and Markdown are handled natively; PDF/EPUB/DOCX need an
/// installed extractor and report `service_unavailable` without one.
pub struct ExtractorSet {
    extractor: Mutex<Option<Box<dyn TextExtractor>>>,
}

impl ExtractorSet {
    pub fn new() -> Self {
        Self {
            extractor: Mutex::new(None),
        }
    }

    pub fn with_extractor(extractor: Box<dyn TextExtractor>) -> Self {
        Self {
            extractor: Mutex::new(Some(extractor)),
        }
    }

    pub fn extract(&self, file_name: &str, bytes: &[u8]) -> Result<ExtractedDocument> {
        let extension = file_name
            .rsplit('.')
            .next()
            .unwrap_or_default()
            .to_lowercase();

        match extension.as_str() {
            "txt" => {
                let raw = String::from_utf8_lossy(bytes);
                Ok(ExtractedDocument {
                    text: normalize_extracted_text(&raw),
                    chapters: Vec::new(),
                })
            }
            "md" | "markdown" => Ok(extract_markdown(&String::from_utf8_lossy(bytes))),
            "pdf" | "epub" | "docx" => {
                let guard = self.extractor.lock().unwrap();
                let extractor = guard.as_ref().ok_or_else(|| {
                    ApiError::ServiceUnavailable(format!(
                        "No {} extractor installed; install a document extraction backend",
                        extension
                    ))
                })?;
                let mut doc = extractor.extract(file_name, bytes)?;
                doc.text = normalize_extracted_text(&doc.text);
                for chapter in &mut doc.chapters {
                    chapter.text = normalize_extracted_text(&chapter.text);
                }
                Ok(doc)
            }
            other => Err(ApiError::BadRequest(format!(
                "Unsupported document type '.{}'; expected txt, md, pdf, epub or docx",
                other
            ))),
        }
    }
}

impl Default for ExtractorSet {
    fn default() -> Self {
        Self::new()
    }
}

/// Normalize extracted text for sentence parsing and read-aloud
///
/// Unwraps soft line breaks, splits punctuation glued to the next word,
/// breaks simple camel-case joins from bad extractors, and collapses
/// whitespace while keeping paragraph breaks.
pub fn normalize_extracted_text(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }

    // Two passes: the match consumes the following character, so alternating
    // single breaks need a second sweep
    let unwrapped = SOFT_BREAK_RE.replace_all(text, "$1 $2");
    let unwrapped = SOFT_BREAK_RE.replace_all(&unwrapped, "$1 $2");
    let unwrapped = unwrapped.replace('\u{00A0}', " ");
    let split_punct = GLUED_PUNCT_RE.replace_all(&unwrapped, "$1 $2");
    let split_camel = CAMEL_JOIN_RE.replace_all(&split_punct, "$1 $2");
    let collapsed = INLINE_WS_RE.replace_all(&split_camel, " ");
    let paragraphs = PARA_RUN_RE.replace_all(&collapsed, "\n\n");
    paragraphs.trim().to_string()
}

/// Markdown: headings become chapter boundaries
fn extract_markdown(raw: &str) -> ExtractedDocument {
    let mut chapters: Vec<Chapter> = Vec::new();
    let mut current_title: Option<String> = None;
    let mut current_body = String::new();

    for line in raw.lines() {
        if let Some(caps) = MD_HEADING_RE.captures(line) {
            if current_title.is_some() || !current_body.trim().is_empty() {
                chapters.push(Chapter {
                    title: current_title.take().unwrap_or_else(|| "Preface".to_string()),
                    text: normalize_extracted_text(&current_body),
                });
                current_body.clear();
            }
            current_title = Some(caps[1].trim().to_string());
        } else {
            current_body.push_str(line);
            current_body.push('\n');
        }
    }
    if current_title.is_some() || !current_body.trim().is_empty() {
        chapters.push(Chapter {
            title: current_title.unwrap_or_else(|| "Preface".to_string()),
            text: normalize_extracted_text(&current_body),
        });
    }

    let text = chapters
        .iter()
        .map(|c| c.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");

    // A single implicit chapter is no TOC at all
    if chapters.len() <= 1 {
        return ExtractedDocument {
            text,
            chapters: Vec::new(),
        };
    }
    ExtractedDocument { text, chapters }
}
