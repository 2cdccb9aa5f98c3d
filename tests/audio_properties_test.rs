use mimika_server::audio::chunking::{chunk_text, smart_chunk_text};
use mimika_server::audio::stitch::{merge_chunks, resample};
use mimika_server::audio::wav;

fn normalize_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[test]
fn test_chunking_round_trip_across_limits() {
    let texts = [
        "A single short line.",
        "The quick brown fox jumps over the lazy dog. Pack my box with five dozen liquor jugs! \
         How vexingly quick daft zebras jump? The five boxing wizards jump quickly.",
        "No terminators here just a very long run of words that keeps going and going and going \
         without any punctuation at all until it finally stops",
        "Mixed:   whitespace\tand\nnewlines. Second sentence!   Third   one?",
    ];

    for text in texts {
        for max_chars in [1, 5, 17, 40, 120, 10_000] {
            let chunks = smart_chunk_text(text, max_chars);
            assert!(!chunks.is_empty(), "non-empty text must chunk");
            for chunk in &chunks {
                assert!(!chunk.trim().is_empty());
            }
            let rejoined = chunks.join(" ");
            assert_eq!(
                normalize_ws(&rejoined),
                normalize_ws(text),
                "round trip failed for max_chars={} on {:?}",
                max_chars,
                text
            );
        }
    }
}

#[test]
fn test_chunking_empty_input_yields_no_chunks() {
    assert!(smart_chunk_text("", 100).is_empty());
    assert!(chunk_text("   ", 100, false).is_empty());
}

#[test]
fn test_merge_duration_matches_formula() {
    let sr = 24_000u32;
    for crossfade_ms in [0u32, 20, 40, 100] {
        let lengths = [4800usize, 2400, 7200, 3600];
        let chunks: Vec<Vec<f32>> = lengths.iter().map(|&l| vec![0.4; l]).collect();

        let merged = merge_chunks(&chunks, sr, crossfade_ms).unwrap();

        let overlap = (crossfade_ms as usize * sr as usize) / 1000;
        let mut expected = lengths[0];
        for window in lengths.windows(2) {
            let pair_overlap = overlap.min(window[0]).min(window[1]);
            expected += window[1] - pair_overlap;
        }
        let diff = merged.len() as i64 - expected as i64;
        assert!(
            diff.abs() <= 1,
            "crossfade={}ms: merged {} expected {}",
            crossfade_ms,
            merged.len(),
            expected
        );
    }
}

#[test]
fn test_resample_length_formula() {
    for (len, from, to) in [
        (24_000usize, 24_000u32, 48_000u32),
        (24_000, 48_000, 24_000),
        (44_100, 44_100, 24_000),
        (1_000, 22_050, 24_000),
        (7, 16_000, 24_000),
        (100_000, 8_000, 24_000),
    ] {
        let samples: Vec<f32> = (0..len).map(|i| ((i % 97) as f32 / 97.0) - 0.5).collect();
        let out = resample(&samples, from, to);
        let expected = ((len as f64) * (to as f64) / (from as f64)).round() as usize;
        assert_eq!(out.len(), expected, "len={} {}->{}", len, from, to);
    }
}

#[test]
fn test_pcm_serialization_clips_and_scales() {
    let bytes = wav::pcm16le_bytes(&[0.0, 1.0, -1.0, 1.5, -1.5]);
    let samples: Vec<i16> = bytes
        .chunks(2)
        .map(|c| i16::from_le_bytes([c[0], c[1]]))
        .collect();
    assert_eq!(samples, vec![0, 32767, -32767, 32767, -32767]);
}

#[test]
fn test_wav_duration_round_trip() {
    let seconds = 2.5f64;
    let samples = vec![0.25f32; (24_000.0 * seconds) as usize];
    let encoded = wav::encode_pcm16(&samples, 24_000).unwrap();
    let duration = wav::duration_ms(&encoded).unwrap();
    assert!((duration - seconds * 1000.0).abs() < 1.0);
}
