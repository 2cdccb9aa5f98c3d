/// Characters that end a sentence and make a preferred chunk boundary
const SENTENCE_TERMINATORS: &[char] = &[
    '.', '!', '?', ';', ':', '\u{3002}', '\u{FF01}', '\u{FF1F}', '\u{FF1B}', '\u{FF1A}',
];

/// Split text into engine-safe chunks
///
/// With smart chunking disabled the whole input comes back as one chunk
/// (still trimmed and dropped if empty). Otherwise chunks break on sentence
/// terminators, falling back to whitespace, and never split inside a word.
pub fn chunk_text(text: &str, max_chars: usize, smart: bool) -> Vec<String> {
    if !smart {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Vec::new();
        }
        return vec![trimmed.to_string()];
    }
    smart_chunk_text(text, max_chars)
}

/// Split text into chunks at sentence boundaries while respecting a size limit
///
/// Sizes are measured in characters, not bytes, so multi-byte scripts chunk
/// the same way ASCII does. A single word longer than the limit becomes its
/// own oversized chunk; breaking inside a word is never allowed.
pub fn smart_chunk_text(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }
    if trimmed.chars().count() <= max_chars {
        return vec![trimmed.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    for sentence in split_into_sentences(trimmed) {
        let sentence_len = sentence.chars().count();

        // A sentence that cannot fit on its own gets word-split
        if sentence_len > max_chars {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
                current_len = 0;
            }
            chunks.extend(split_by_words(&sentence, max_chars));
            continue;
        }

        // +1 for the joining space
        if !current.is_empty() && current_len + 1 + sentence_len > max_chars {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }

        if current.is_empty() {
            current_len = sentence_len;
            current = sentence;
        } else {
            current.push(' ');
            current.push_str(&sentence);
            current_len += 1 + sentence_len;
        }
    }

    if !current.is_empty() {
        chunks.push(current);
    }

    chunks.retain(|c| !c.trim().is_empty());
    chunks
}

/// Split text into sentences, keeping the terminator with its sentence
fn split_into_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();

    while let Some(ch) = chars.next() {
        current.push(ch);

        if SENTENCE_TERMINATORS.contains(&ch) {
            // Consume trailing quote/bracket characters into the sentence
            while let Some(&next) = chars.peek() {
                if matches!(next, '"' | '\'' | ')' | ']' | '\u{201D}' | '\u{2019}') {
                    current.push(next);
                    chars.next();
                } else {
                    break;
                }
            }
            let trimmed = current.trim();
            if !trimmed.is_empty() {
                sentences.push(trimmed.to_string());
            }
            current.clear();
        }
    }

    let trimmed = current.trim();
    if !trimmed.is_empty() {
        sentences.push(trimmed.to_string());
    }

    sentences
}

/// Whitespace fallback: pack whole words up to the limit
fn split_by_words(text: &str, max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    for word in text.split_whitespace() {
        let word_len = word.chars().count();

        if !current.is_empty() && current_len + 1 + word_len > max_chars {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }

        if current.is_empty() {
            current_len = word_len;
            current.push_str(word);
        } else {
            current.push(' ');
            current.push_str(word);
            current_len += 1 + word_len;
        }
    }

    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normalize_ws(s: &str) -> String {
        s.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    #[test]
    fn test_short_text_single_chunk() {
        let chunks = smart_chunk_text("Hello world!", 200);
        assert_eq!(chunks, vec!["Hello world!"]);
    }

    #[test]
    fn test_empty_text_yields_no_chunks() {
        assert!(smart_chunk_text("", 100).is_empty());
        assert!(smart_chunk_text("   \n\t ", 100).is_empty());
    }

    #[test]
    fn test_disabled_chunking_returns_whole_input() {
        let text = "One. Two. Three. Four. Five.";
        let chunks = chunk_text(text, 5, false);
        assert_eq!(chunks, vec![text.to_string()]);
    }

    #[test]
    fn test_sentence_boundaries_preferred() {
        let text = "This is sentence one. This is sentence two. This is sentence three.";
        let chunks = smart_chunk_text(text, 30);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.ends_with('.'), "chunk should end at a sentence: {:?}", chunk);
        }
    }

    #[test]
    fn test_never_splits_inside_word() {
        let text = "supercalifragilisticexpialidocious and more words follow here now";
        let chunks = smart_chunk_text(text, 10);
        let original_words: Vec<&str> = text.split_whitespace().collect();
        let chunked_words: Vec<String> = chunks
            .iter()
            .flat_map(|c| c.split_whitespace().map(|w| w.to_string()))
            .collect();
        assert_eq!(
            original_words,
            chunked_words.iter().map(String::as_str).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_oversized_word_becomes_own_chunk() {
        let long_word = "a".repeat(50);
        let text = format!("short {} short", long_word);
        let chunks = smart_chunk_text(&text, 10);
        assert!(chunks.contains(&long_word));
    }

    #[test]
    fn test_cjk_terminators() {
        let text = "\u{4ECA}\u{65E5}\u{306F}\u{3044}\u{3044}\u{5929}\u{6C17}\u{3067}\u{3059}\u{3002}\u{660E}\u{65E5}\u{3082}\u{305D}\u{3046}\u{3067}\u{3059}\u{3002}";
        let chunks = smart_chunk_text(text, 10);
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].ends_with('\u{3002}'));
    }

    #[test]
    fn test_round_trip_preserves_content() {
        let text = "The quick brown fox jumps over the lazy dog. Pack my box with five dozen liquor jugs! How vexingly quick daft zebras jump? A wizard's job is to vex chunks.";
        for max_chars in [1, 10, 25, 50, 200] {
            let chunks = smart_chunk_text(text, max_chars);
            let rejoined = chunks.join(" ");
            assert_eq!(
                normalize_ws(&rejoined),
                normalize_ws(text),
                "round trip failed at max_chars={}",
                max_chars
            );
        }
    }

    #[test]
    fn test_chunks_respect_limit_for_splittable_text() {
        let text = "one two three four five six seven eight nine ten. eleven twelve thirteen fourteen fifteen.";
        let chunks = smart_chunk_text(text, 20);
        for chunk in &chunks {
            assert!(
                chunk.chars().count() <= 20,
                "chunk exceeds limit: {:?}",
                chunk
            );
        }
    }

    #[test]
    fn test_no_empty_chunks() {
        let text = "... . ! ? words here. more words!";
        let chunks = smart_chunk_text(text, 8);
        for chunk in &chunks {
            assert!(!chunk.trim().is_empty());
        }
    }
}
