use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Mutex;

use crate::error::{ApiError, Result};

lazy_static! {
    static ref NON_WORD_RE: Regex = Regex::new(r"[^\w]").unwrap();
    static ref WHITESPACE_RE: Regex = Regex::new(r"\s+").unwrap();
}

#[derive(Debug, Clone, Deserialize)]
pub struct WordAlignmentRequest {
    pub text: String,
    pub audio_url: String,
    #[serde(default = "default_language")]
    pub language: String,
}

fn default_language() -> String {
    "en".to_string()
}

/// One recognized word with its start offset
#[derive(Debug, Clone, PartialEq)]
pub struct ObservedWord {
    pub token: String,
    pub start_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AlignedWord {
    pub word: String,
    pub start_ms: u64,
}

/// Speech recognizer used for forced alignment (external collaborator)
pub trait AlignmentBackend: Send + Sync {
    fn transcribe(&self, audio: &Path, language: &str) -> Result<Vec<ObservedWord>>;
}

/// Coordinates forced word alignment between expected text and ASR output
///
/// The recognizer loads lazily on first use; a build without one reports
/// `service_unavailable` with an install hint.
pub struct AlignmentService {
    backend: Mutex<Option<Box<dyn AlignmentBackend>>>,
}

impl AlignmentService {
    pub fn new() -> Self {
        Self {
            backend: Mutex::new(None),
        }
    }

    pub fn with_backend(backend: Box<dyn AlignmentBackend>) -> Self {
        Self {
            backend: Mutex::new(Some(backend)),
        }
    }

    /// Align the expected text against the audio's recognized words
    pub fn align(&self, text: &str, audio_path: &Path, language: &str) -> Result<Vec<AlignedWord>> {
        let expected = tokenize_alignment_text(text);
        if expected.is_empty() {
            return Err(ApiError::BadRequest(
                "Text has no alignable words".to_string(),
            ));
        }

        let guard = self.backend.lock().unwrap();
        let backend = guard.as_ref().ok_or_else(|| {
            ApiError::ServiceUnavailable(
                "Forced alignment backend unavailable; install an ASR runtime (e.g. whisper)"
                    .to_string(),
            )
        })?;
        let observed = backend.transcribe(audio_path, language)?;

        let starts = align_expected_to_observed(&expected, &observed);
        Ok(expected
            .into_iter()
            .zip(starts)
            .map(|(word, start_ms)| AlignedWord { word, start_ms })
            .collect())
    }
}

impl Default for AlignmentService {
    fn default() -> Self {
        Self::new()
    }
}

/// Normalize words for robust sentence-word alignment
pub fn normalize_alignment_token(token: &str) -> String {
    NON_WORD_RE.replace_all(token, "").to_lowercase()
}

/// Expected-token stream: normalized words of at least 2 characters
pub fn tokenize_alignment_text(text: &str) -> Vec<String> {
    WHITESPACE_RE
        .split(text)
        .map(normalize_alignment_token)
        .filter(|t| t.chars().count() >= 2)
        .collect()
}

/// Map expected tokens to observed ASR words with a monotonic greedy match
///
/// Unmatched tokens reuse the previous boundary so the output stays the
/// same length as the input.
pub fn align_expected_to_observed(expected: &[String], observed: &[ObservedWord]) -> Vec<u64> {
    let mut starts = Vec::with_capacity(expected.len());
    let mut cursor = 0usize;
    let mut last_ms = 0u64;

    for token in expected {
        let mut matched = None;
        for (i, word) in observed.iter().enumerate().skip(cursor) {
            if &word.token == token {
                matched = Some(word.start_ms);
                cursor = i + 1;
                last_ms = word.start_ms;
                break;
            }
        }
        starts.push(matched.unwrap_or(last_ms));
    }

    starts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn observed(words: &[(&str, u64)]) -> Vec<ObservedWord> {
        words
            .iter()
            .map(|(token, start_ms)| ObservedWord {
                token: (*token).to_string(),
                start_ms: *start_ms,
            })
            .collect()
    }

    #[test]
    fn test_normalize_token_strips_punctuation() {
        assert_eq!(normalize_alignment_token("Hello,"), "hello");
        assert_eq!(normalize_alignment_token("world!"), "world");
        assert_eq!(normalize_alignment_token("it's"), "its");
    }

    #[test]
    fn test_tokenize_drops_short_tokens() {
        let tokens = tokenize_alignment_text("I am a big dog.");
        assert_eq!(tokens, vec!["am", "big", "dog"]);
    }

    #[test]
    fn test_alignment_exact_match() {
        let expected = vec!["hello".to_string(), "world".to_string()];
        let obs = observed(&[("hello", 100), ("world", 600)]);
        assert_eq!(align_expected_to_observed(&expected, &obs), vec![100, 600]);
    }

    #[test]
    fn test_alignment_backfills_misses() {
        let expected = vec![
            "hello".to_string(),
            "missing".to_string(),
            "world".to_string(),
        ];
        let obs = observed(&[("hello", 100), ("world", 600)]);
        // The unmatched token reuses the previous boundary
        assert_eq!(
            align_expected_to_observed(&expected, &obs),
            vec![100, 100, 600]
        );
    }

    #[test]
    fn test_alignment_is_monotonic() {
        // A repeated word cannot match backwards
        let expected = vec!["the".to_string(), "cat".to_string(), "the".to_string()];
        let obs = observed(&[("the", 0), ("cat", 300), ("the", 700)]);
        assert_eq!(align_expected_to_observed(&expected, &obs), vec![0, 300, 700]);
    }

    #[test]
    fn test_alignment_output_length_stable() {
        let expected: Vec<String> = (0..10).map(|i| format!("word{}", i)).collect();
        let obs = observed(&[("word3", 900)]);
        let starts = align_expected_to_observed(&expected, &obs);
        assert_eq!(starts.len(), expected.len());
    }

    #[test]
    fn test_service_without_backend_is_503() {
        let service = AlignmentService::new();
        let err = service
            .align("hello world", Path::new("/tmp/none.wav"), "en")
            .unwrap_err();
        assert!(matches!(err, ApiError::ServiceUnavailable(_)));
    }

    struct FakeAsr;
    impl AlignmentBackend for FakeAsr {
        fn transcribe(&self, _audio: &Path, _language: &str) -> Result<Vec<ObservedWord>> {
            Ok(observed(&[("hello", 50), ("there", 450)]))
        }
    }

    #[test]
    fn test_service_aligns_with_backend() {
        let service = AlignmentService::with_backend(Box::new(FakeAsr));
        let aligned = service
            .align("Hello there!", Path::new("/tmp/audio.wav"), "en")
            .unwrap();
        assert_eq!(aligned.len(), 2);
        assert_eq!(aligned[0].word, "hello");
        assert_eq!(aligned[0].start_ms, 50);
        assert_eq!(aligned[1].start_ms, 450);
    }
}
