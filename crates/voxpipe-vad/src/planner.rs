//! Segment planning: turns raw speech intervals into the bounded,
//! ordered task list handed to the decode pool.

use tracing::debug;
use voxpipe_audio::Waveform;

use crate::config::SegmenterConfig;
use crate::detector::detect_speech;

/// One bounded time span of audio, assigned a single decode call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentSpan {
    pub start_ms: u64,
    pub end_ms: u64,
}

impl SegmentSpan {
    pub fn new(start_ms: u64, end_ms: u64) -> Self {
        Self { start_ms, end_ms }
    }

    pub fn len_ms(&self) -> u64 {
        self.end_ms.saturating_sub(self.start_ms)
    }
}

pub struct SegmentPlanner {
    cfg: SegmenterConfig,
}

impl SegmentPlanner {
    pub fn new(cfg: SegmenterConfig) -> Self {
        Self { cfg }
    }

    /// Plan the ordered, non-overlapping segment spans for a waveform.
    ///
    /// With VAD enabled the plan follows detected speech; zero detected
    /// speech degenerates to one whole-file span so the transcript is
    /// never silently empty. With VAD disabled the file is covered by
    /// fixed-length spans at `segment_length_ms` stride.
    pub fn plan(&self, waveform: &Waveform) -> Vec<SegmentSpan> {
        let duration_ms = waveform.duration_ms();

        if !self.cfg.vad_enabled {
            let spans = fixed_segments(duration_ms, self.cfg.segment_length_ms);
            debug!(target: "vad", "VAD off: {} fixed segments", spans.len());
            return spans;
        }

        let raw = detect_speech(waveform, &self.cfg);
        if raw.is_empty() {
            debug!(target: "vad", "No speech detected, planning whole-file segment");
            return vec![SegmentSpan::new(0, duration_ms)];
        }

        let merged = merge_intervals(&raw, &self.cfg);
        debug!(
            target: "vad",
            "Planned {} segments from {} raw speech intervals",
            merged.len(),
            raw.len()
        );
        merged
    }
}

/// Greedily merge consecutive speech intervals.
///
/// A gap shorter than `merge_gap_ms` is absorbed as long as the merged
/// span stays within `segment_length_ms`; otherwise the gap starts a
/// new segment. The grouping threshold is deliberately larger than the
/// detector's split threshold, so nearby bursts share one decode call.
pub fn merge_intervals(raw: &[SegmentSpan], cfg: &SegmenterConfig) -> Vec<SegmentSpan> {
    let mut merged: Vec<SegmentSpan> = Vec::new();
    for &span in raw {
        match merged.last_mut() {
            Some(current) => {
                let gap = span.start_ms.saturating_sub(current.end_ms);
                let combined = span.end_ms.saturating_sub(current.start_ms);
                if gap < cfg.merge_gap_ms && combined <= cfg.segment_length_ms {
                    current.end_ms = span.end_ms;
                } else {
                    merged.push(span);
                }
            }
            None => merged.push(span),
        }
    }
    merged
}

/// Fixed-length spans covering `[0, duration_ms]` at `stride_ms`.
pub fn fixed_segments(duration_ms: u64, stride_ms: u64) -> Vec<SegmentSpan> {
    if duration_ms == 0 || stride_ms == 0 {
        return Vec::new();
    }
    let mut spans = Vec::new();
    let mut start = 0u64;
    while start < duration_ms {
        let end = (start + stride_ms).min(duration_ms);
        spans.push(SegmentSpan::new(start, end));
        start = end;
    }
    spans
}

#[cfg(test)]
mod tests {
    use super::*;
    use voxpipe_foundation::SAMPLE_RATE_HZ;

    fn span(start: u64, end: u64) -> SegmentSpan {
        SegmentSpan::new(start, end)
    }

    #[test]
    fn ten_minute_file_without_vad_yields_ten_segments() {
        let cfg = SegmenterConfig {
            vad_enabled: false,
            segment_length_ms: 60_000,
            ..Default::default()
        };
        let wf = Waveform::new(vec![0i16; 600 * SAMPLE_RATE_HZ as usize]);
        let spans = SegmentPlanner::new(cfg).plan(&wf);
        assert_eq!(spans.len(), 10);
        assert!(spans.iter().all(|s| s.len_ms() == 60_000));
        assert_eq!(spans.last().unwrap().end_ms, 600_000);
    }

    #[test]
    fn no_detected_speech_yields_whole_file_segment() {
        let wf = Waveform::new(vec![0i16; 42 * SAMPLE_RATE_HZ as usize]);
        let spans = SegmentPlanner::new(SegmenterConfig::default()).plan(&wf);
        assert_eq!(spans, vec![span(0, 42_000)]);
    }

    #[test]
    fn fixed_segments_cover_ragged_tail() {
        let spans = fixed_segments(150_000, 60_000);
        assert_eq!(
            spans,
            vec![span(0, 60_000), span(60_000, 120_000), span(120_000, 150_000)]
        );
    }

    #[test]
    fn merge_absorbs_short_gaps_up_to_length_bound() {
        let cfg = SegmenterConfig {
            merge_gap_ms: 2000,
            segment_length_ms: 10_000,
            ..Default::default()
        };
        let raw = vec![span(0, 4000), span(5000, 9000), span(9500, 14_000)];
        // First gap (1s) merges; the second would exceed the bound.
        let merged = merge_intervals(&raw, &cfg);
        assert_eq!(merged, vec![span(0, 9000), span(9500, 14_000)]);
    }

    #[test]
    fn merge_starts_new_segment_on_long_gap() {
        let cfg = SegmenterConfig::default();
        let raw = vec![span(0, 1000), span(3000, 4000)];
        assert_eq!(merge_intervals(&raw, &cfg), raw);
    }

    fn tone_ms(ms: u64) -> Vec<i16> {
        let n = (ms * SAMPLE_RATE_HZ as u64 / 1000) as usize;
        (0..n)
            .map(|i| {
                let phase = 2.0 * std::f32::consts::PI * 440.0 * i as f32 / SAMPLE_RATE_HZ as f32;
                (phase.sin() * 8000.0) as i16
            })
            .collect()
    }

    #[test]
    fn nearby_bursts_plan_as_one_segment() {
        // Two bursts split by the detector (600 ms > min_silence_len)
        // but close enough that grouping puts them in one decode call.
        let mut samples = tone_ms(1000);
        samples.extend(vec![0i16; (600 * SAMPLE_RATE_HZ as u64 / 1000) as usize]);
        samples.extend(tone_ms(1000));
        let wf = Waveform::new(samples);

        let spans = SegmentPlanner::new(SegmenterConfig::default()).plan(&wf);
        assert_eq!(spans.len(), 1);
        assert!(spans[0].start_ms < 100);
        assert!(spans[0].end_ms >= 2500);
    }

    #[test]
    fn distant_bursts_stay_separate_segments() {
        let mut samples = tone_ms(1000);
        samples.extend(vec![0i16; (3000 * SAMPLE_RATE_HZ as u64 / 1000) as usize]);
        samples.extend(tone_ms(1000));
        let wf = Waveform::new(samples);

        let spans = SegmentPlanner::new(SegmenterConfig::default()).plan(&wf);
        assert_eq!(spans.len(), 2);
    }

    #[test]
    fn planned_spans_are_sorted_and_disjoint() {
        let cfg = SegmenterConfig {
            segment_length_ms: 10_000,
            ..Default::default()
        };
        let raw: Vec<SegmentSpan> = (0..50)
            .map(|i| span(i * 1000, i * 1000 + 700))
            .collect();
        let merged = merge_intervals(&raw, &cfg);
        for pair in merged.windows(2) {
            assert!(pair[0].end_ms <= pair[1].start_ms);
            assert!(pair[0].start_ms < pair[0].end_ms);
        }
        let total: u64 = merged.iter().map(|s| s.len_ms()).sum();
        assert!(total <= 50_000);
    }
}
