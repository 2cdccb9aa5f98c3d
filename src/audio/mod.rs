pub mod chunking;
pub mod stitch;
pub mod wav;

/// A mono waveform with its sample rate
///
/// All audio inside the service is mono f32 in [-1.0, 1.0]; conversion to
/// 16-bit PCM happens only at the serialization edges (WAV files, L16
/// streams).
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_secs() {
        let buf = AudioBuffer::new(vec![0.0; 24_000], 24_000);
        assert!((buf.duration_secs() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_duration_zero_rate_is_zero() {
        let buf = AudioBuffer::new(vec![0.0; 100], 0);
        assert_eq!(buf.duration_secs(), 0.0);
    }
}
