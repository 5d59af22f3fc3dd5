//! Raw speech interval detection.
//!
//! Scans the waveform in fixed frames and reports maximal speech
//! intervals: a silence run of at least `min_silence_len_ms` closes an
//! interval, shorter dips stay inside it.

use voxpipe_audio::Waveform;
use voxpipe_foundation::SAMPLE_RATE_HZ;

use crate::config::SegmenterConfig;
use crate::energy::dbfs;
use crate::planner::SegmentSpan;

pub fn detect_speech(waveform: &Waveform, cfg: &SegmenterConfig) -> Vec<SegmentSpan> {
    let frame_ms = cfg.frame_size_ms.max(1);
    let frame_len = ((frame_ms * SAMPLE_RATE_HZ as u64) / 1000) as usize;
    if frame_len == 0 || waveform.is_empty() {
        return Vec::new();
    }

    let mut intervals = Vec::new();
    let mut interval_start: Option<u64> = None;
    let mut last_speech_end = 0u64;

    for (i, frame) in waveform.samples().chunks(frame_len).enumerate() {
        let t_ms = i as u64 * frame_ms;
        let frame_end_ms = t_ms + frame_ms;
        let is_speech = dbfs(frame) > cfg.silence_thresh_dbfs;

        if is_speech {
            if interval_start.is_none() {
                interval_start = Some(t_ms);
            }
            last_speech_end = frame_end_ms;
        } else if let Some(start) = interval_start {
            if frame_end_ms.saturating_sub(last_speech_end) >= cfg.min_silence_len_ms {
                intervals.push(SegmentSpan::new(start, last_speech_end));
                interval_start = None;
            }
        }
    }

    if let Some(start) = interval_start {
        intervals.push(SegmentSpan::new(start, last_speech_end.min(waveform.duration_ms())));
    }

    intervals
}
