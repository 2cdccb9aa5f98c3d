use crate::error::{ApiError, Result};

/// Resample a mono waveform to a new rate
///
/// Output length is always `round(len * to_sr / from_sr)`. The FFT resampler
/// handles typical buffer sizes; very short buffers and oversized ones fall
/// back to linear interpolation, and the result is trimmed or padded to the
/// exact target length.
pub fn resample(samples: &[f32], from_sr: u32, to_sr: u32) -> Vec<f32> {
    if from_sr == to_sr || samples.is_empty() {
        return samples.to_vec();
    }

    let target_len =
        ((samples.len() as f64) * (to_sr as f64) / (from_sr as f64)).round() as usize;

    let resampled = if samples.len() >= 256 {
        resample_fft(samples, from_sr, to_sr, target_len)
            .unwrap_or_else(|| resample_linear(samples, target_len))
    } else {
        resample_linear(samples, target_len)
    };

    fix_length(resampled, target_len)
}

/// FFT-based resampling via rubato; None on construction/process failure
///
/// Feeds fixed-size chunks, flushes the delay line, and trims the filter
/// latency so the output lines up with the input.
fn resample_fft(samples: &[f32], from_sr: u32, to_sr: u32, target_len: usize) -> Option<Vec<f32>> {
    use rubato::{FftFixedIn, Resampler};

    const CHUNK: usize = 1024;
    let mut resampler =
        FftFixedIn::<f64>::new(from_sr as usize, to_sr as usize, CHUNK, 2, 1).ok()?;
    let delay = resampler.output_delay();

    let mut out: Vec<f32> = Vec::with_capacity(target_len + delay + CHUNK);
    for chunk in samples.chunks(CHUNK) {
        let input: Vec<f64> = chunk.iter().map(|&s| f64::from(s)).collect();
        let waves = if chunk.len() == CHUNK {
            resampler.process(&[input], None).ok()?
        } else {
            resampler.process_partial(Some(&[input]), None).ok()?
        };
        out.extend(waves.first()?.iter().map(|&s| s as f32));
    }

    // Flush until the delayed tail has fully drained
    let mut flushes = 0;
    while out.len() < target_len + delay && flushes < 8 {
        let waves = resampler
            .process_partial::<Vec<f64>>(None, None)
            .ok()?;
        let rendered = waves.first()?;
        if rendered.is_empty() {
            break;
        }
        out.extend(rendered.iter().map(|&s| s as f32));
        flushes += 1;
    }

    if out.len() <= delay {
        return None;
    }
    Some(out.split_off(delay))
}

/// Linear interpolation resampling to an exact output length
fn resample_linear(samples: &[f32], target_len: usize) -> Vec<f32> {
    if target_len == 0 {
        return Vec::new();
    }
    let ratio = samples.len() as f64 / target_len as f64;
    let mut out = Vec::with_capacity(target_len);
    for i in 0..target_len {
        let src = i as f64 * ratio;
        let idx = src.floor() as usize;
        let next = (idx + 1).min(samples.len() - 1);
        let frac = (src - idx as f64) as f32;
        out.push(samples[idx] * (1.0 - frac) + samples[next] * frac);
    }
    out
}

/// Trim or pad (repeating the final sample) to the exact length
fn fix_length(mut samples: Vec<f32>, target_len: usize) -> Vec<f32> {
    if samples.len() > target_len {
        samples.truncate(target_len);
    } else if samples.len() < target_len {
        let last = samples.last().copied().unwrap_or(0.0);
        samples.resize(target_len, last);
    }
    samples
}

/// Merge audio chunks into one waveform with a linear equal-power crossfade
///
/// With `crossfade_ms == 0` chunks are concatenated. Otherwise each adjacent
/// pair overlaps by `min(crossfade_ms * sr / 1000, len(a), len(b))` samples,
/// blended tail-out/head-in, so the merged duration is the sum of the chunk
/// durations minus the overlaps.
pub fn merge_chunks(chunks: &[Vec<f32>], sample_rate: u32, crossfade_ms: u32) -> Result<Vec<f32>> {
    if chunks.is_empty() {
        return Err(ApiError::Internal("No audio generated".to_string()));
    }

    let crossfade_samples = (crossfade_ms as u64 * sample_rate as u64 / 1000) as usize;

    let mut merged = chunks[0].clone();
    for chunk in &chunks[1..] {
        if crossfade_samples == 0 {
            merged.extend_from_slice(chunk);
            continue;
        }

        let overlap = crossfade_samples.min(merged.len()).min(chunk.len());
        let tail_start = merged.len() - overlap;
        for i in 0..overlap {
            let t = (i + 1) as f32 / (overlap + 1) as f32;
            merged[tail_start + i] = merged[tail_start + i] * (1.0 - t) + chunk[i] * t;
        }
        merged.extend_from_slice(&chunk[overlap..]);
    }

    Ok(merged)
}

/// Merge audio chunks with a fixed silence gap between them
///
/// Used by engines that sound better with a pause than a crossfade.
pub fn merge_with_silence(
    chunks: &[Vec<f32>],
    sample_rate: u32,
    silence_ms: u32,
) -> Result<Vec<f32>> {
    if chunks.is_empty() {
        return Err(ApiError::Internal("No audio generated".to_string()));
    }

    let gap = (silence_ms as u64 * sample_rate as u64 / 1000) as usize;

    let mut merged = chunks[0].clone();
    for chunk in &chunks[1..] {
        merged.extend(std::iter::repeat(0.0).take(gap));
        merged.extend_from_slice(chunk);
    }

    Ok(merged)
}
