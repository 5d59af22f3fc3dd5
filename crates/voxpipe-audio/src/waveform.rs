//! Canonical waveform: mono i16 PCM at 16 kHz.

use voxpipe_foundation::SAMPLE_RATE_HZ;

#[derive(Debug, Clone)]
pub struct Waveform {
    samples: Vec<i16>,
}

impl Waveform {
    pub fn new(samples: Vec<i16>) -> Self {
        Self { samples }
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Total audio length in seconds, measured from the decoded samples.
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / SAMPLE_RATE_HZ as f64
    }

    pub fn duration_ms(&self) -> u64 {
        (self.samples.len() as u64 * 1000) / SAMPLE_RATE_HZ as u64
    }

    /// Samples for the span `[start_ms, end_ms)`, clamped to the
    /// waveform bounds.
    pub fn slice_ms(&self, start_ms: u64, end_ms: u64) -> &[i16] {
        let rate = SAMPLE_RATE_HZ as u64;
        let start = ((start_ms * rate) / 1000) as usize;
        let end = ((end_ms * rate) / 1000) as usize;
        let start = start.min(self.samples.len());
        let end = end.clamp(start, self.samples.len());
        &self.samples[start..end]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_from_sample_count() {
        let wf = Waveform::new(vec![0i16; 16_000 * 3]);
        assert!((wf.duration_secs() - 3.0).abs() < f64::EPSILON);
        assert_eq!(wf.duration_ms(), 3000);
    }

    #[test]
    fn slice_is_clamped_to_bounds() {
        let wf = Waveform::new((0..16_000).map(|i| i as i16).collect());
        assert_eq!(wf.slice_ms(0, 500).len(), 8000);
        assert_eq!(wf.slice_ms(900, 5000).len(), 16_000 - 14_400);
        assert!(wf.slice_ms(2000, 3000).is_empty());
        assert!(wf.slice_ms(800, 700).is_empty());
    }
}
