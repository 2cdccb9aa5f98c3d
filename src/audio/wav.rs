use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use std::io::Cursor;
use std::path::Path;

use super::AudioBuffer;
use crate::error::{ApiError, Result};

/// Convert f32 samples to 16-bit little-endian PCM bytes
///
/// Samples are clipped to [-1.0, 1.0] before scaling by 32767.
pub fn pcm16le_bytes(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let clipped = sample.clamp(-1.0, 1.0);
        let value = (clipped * 32767.0) as i16;
        out.extend_from_slice(&value.to_le_bytes());
    }
    out
}

fn pcm16_spec(sample_rate: u32) -> WavSpec {
    WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    }
}

/// Write a mono waveform to disk as 16-bit PCM WAV
pub fn write_pcm16(path: &Path, samples: &[f32], sample_rate: u32) -> Result<()> {
    let mut writer = WavWriter::create(path, pcm16_spec(sample_rate))?;
    for &sample in samples {
        let clipped = sample.clamp(-1.0, 1.0);
        writer.write_sample((clipped * 32767.0) as i16)?;
    }
    writer.finalize()?;
    Ok(())
}

/// Encode a mono waveform into an in-memory 16-bit PCM WAV file
pub fn encode_pcm16(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = WavWriter::new(&mut cursor, pcm16_spec(sample_rate))?;
        for &sample in samples {
            let clipped = sample.clamp(-1.0, 1.0);
            writer.write_sample((clipped * 32767.0) as i16)?;
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}

/// Decode a WAV file into a mono f32 waveform
///
/// Multi-channel input is down-mixed by averaging; integer formats are
/// normalized by their bit depth.
pub fn read_mono(path: &Path) -> Result<AudioBuffer> {
    let reader = WavReader::open(path)
        .map_err(|e| ApiError::BadRequest(format!("Invalid or unsupported audio file ({})", e)))?;
    decode_mono(reader)
}

/// Decode in-memory WAV bytes into a mono f32 waveform
pub fn decode_mono_bytes(bytes: &[u8]) -> Result<AudioBuffer> {
    let reader = WavReader::new(Cursor::new(bytes))
        .map_err(|e| ApiError::BadRequest(format!("Invalid or unsupported audio file ({})", e)))?;
    decode_mono(reader)
}

fn decode_mono<R: std::io::Read>(mut reader: WavReader<R>) -> Result<AudioBuffer> {
    let spec = reader.spec();
    let channels = spec.channels as usize;
    if channels == 0 {
        return Err(ApiError::BadRequest(
            "Invalid audio: zero channels".to_string(),
        ));
    }

    let interleaved: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<_, _>>()?,
        SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<_, _>>()?
        }
    };

    let samples = if channels == 1 {
        interleaved
    } else {
        interleaved
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect()
    };

    if samples.is_empty() {
        return Err(ApiError::BadRequest("Uploaded audio is empty".to_string()));
    }
    if spec.sample_rate == 0 {
        return Err(ApiError::BadRequest(
            "Invalid audio sample rate".to_string(),
        ));
    }

    Ok(AudioBuffer::new(samples, spec.sample_rate))
}

/// Calculate duration in milliseconds from WAV file bytes
pub fn duration_ms(wav_bytes: &[u8]) -> Result<f64> {
    let reader = WavReader::new(Cursor::new(wav_bytes))?;

    let spec = reader.spec();
    let num_samples = reader.len() as f64;
    let sample_rate = spec.sample_rate as f64;
    let num_channels = spec.channels as f64;

    // reader.len() returns total samples across all channels;
    // frames (samples per channel) drive the duration calculation
    let num_frames = num_samples / num_channels;
    Ok((num_frames / sample_rate) * 1000.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pcm16le_clips_out_of_range() {
        let bytes = pcm16le_bytes(&[2.0, -2.0]);
        let hi = i16::from_le_bytes([bytes[0], bytes[1]]);
        let lo = i16::from_le_bytes([bytes[2], bytes[3]]);
        assert_eq!(hi, 32767);
        assert_eq!(lo, -32767);
    }

    #[test]
    fn test_pcm16le_length() {
        let bytes = pcm16le_bytes(&[0.0; 100]);
        assert_eq!(bytes.len(), 200);
    }

    #[test]
    fn test_encode_decode_round_trip() {
        let samples: Vec<f32> = (0..480).map(|i| (i as f32 / 480.0).sin() * 0.5).collect();
        let bytes = encode_pcm16(&samples, 24_000).unwrap();

        let decoded = decode_mono_bytes(&bytes).unwrap();
        assert_eq!(decoded.sample_rate, 24_000);
        assert_eq!(decoded.samples.len(), samples.len());
        for (a, b) in samples.iter().zip(decoded.samples.iter()) {
            assert!((a - b).abs() < 1.0 / 32000.0);
        }
    }

    #[test]
    fn test_decode_downmixes_stereo() {
        let spec = WavSpec {
            channels: 2,
            sample_rate: 48_000,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = WavWriter::new(&mut cursor, spec).unwrap();
            for _ in 0..100 {
                writer.write_sample(16384i16).unwrap();
                writer.write_sample(-16384i16).unwrap();
            }
            writer.finalize().unwrap();
        }

        let decoded = decode_mono_bytes(&cursor.into_inner()).unwrap();
        assert_eq!(decoded.samples.len(), 100);
        // Opposite-phase channels cancel out
        assert!(decoded.samples.iter().all(|s| s.abs() < 1e-4));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let result = decode_mono_bytes(&[0u8; 16]);
        assert!(matches!(result, Err(ApiError::BadRequest(_))));
    }

    #[test]
    fn test_duration_one_second() {
        let bytes = encode_pcm16(&vec![0.0; 24_000], 24_000).unwrap();
        let duration = duration_ms(&bytes).unwrap();
        assert!((duration - 1000.0).abs() < 1.0);
    }
}
