//! Frame energy measurement for the energy-based VAD.

const EPSILON: f32 = 1e-10;

/// Root-mean-square amplitude of a frame, normalized to [0, 1].
pub fn rms(frame: &[i16]) -> f32 {
    if frame.is_empty() {
        return 0.0;
    }
    let sum_squares: i64 = frame
        .iter()
        .map(|&sample| {
            let s = sample as i64;
            s * s
        })
        .sum();
    let mean_square = sum_squares as f64 / frame.len() as f64;
    (mean_square.sqrt() / 32768.0) as f32
}

/// Frame level in dBFS; digital silence floors at -100 dB.
pub fn dbfs(frame: &[i16]) -> f32 {
    let rms = rms(frame);
    if rms <= EPSILON {
        return -100.0;
    }
    20.0 * rms.log10()
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAME: usize = 160;

    #[test]
    fn silence_returns_floor_dbfs() {
        let silence = vec![0i16; FRAME];
        assert!(dbfs(&silence) <= -100.0);
    }

    #[test]
    fn full_scale_returns_zero_dbfs() {
        let full_scale = vec![32767i16; FRAME];
        assert!(dbfs(&full_scale).abs() < 0.1);
    }

    #[test]
    fn sine_rms_matches_theory() {
        let sine: Vec<i16> = (0..FRAME)
            .map(|i| {
                let phase = 2.0 * std::f32::consts::PI * i as f32 / FRAME as f32;
                (phase.sin() * 16384.0) as i16
            })
            .collect();
        // Half-amplitude sine has RMS 0.5 / sqrt(2).
        assert!((rms(&sine) - 0.354).abs() < 0.01);
    }
}
