use serde::{Deserialize, Serialize};

/// Parameters for speech detection and segment planning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmenterConfig {
    /// When false, segmentation falls back to fixed-length spans with
    /// no silence skipping.
    pub vad_enabled: bool,
    /// A silence run at least this long closes a raw speech interval.
    pub min_silence_len_ms: u64,
    /// Raw intervals closer than this are grouped into one segment.
    /// Must exceed `min_silence_len_ms` to have any effect, since the
    /// detector never emits gaps shorter than that.
    pub merge_gap_ms: u64,
    /// Frames quieter than this (dBFS) count as silence.
    pub silence_thresh_dbfs: f32,
    /// Analysis frame length.
    pub frame_size_ms: u64,
    /// Upper bound on a merged segment span, and the stride of the
    /// fixed-length fallback.
    pub segment_length_ms: u64,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            vad_enabled: true,
            min_silence_len_ms: 500,
            merge_gap_ms: 2000,
            silence_thresh_dbfs: -40.0,
            frame_size_ms: 10,
            segment_length_ms: 60_000,
        }
    }
}
