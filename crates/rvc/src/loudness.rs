//! Loudness matching between the source and the converted signal.

use crate::audio::interpolate_linear;
use crate::constants::RMS_FLOOR;

/// Centred frame-wise RMS with zero padding: `1 + len / hop` frames.
#[must_use]
pub fn frame_rms(samples: &[f32], frame_len: usize, hop: usize) -> Vec<f32> {
    let hop = hop.max(1);
    let half = frame_len / 2;
    let mut prefix = Vec::with_capacity(samples.len() + 1);
    prefix.push(0.0f64);
    let mut acc = 0.0f64;
    for &s in samples {
        acc += f64::from(s) * f64::from(s);
        prefix.push(acc);
    }

    let frames = 1 + samples.len() / hop;
    (0..frames)
        .map(|i| {
            // Frame i covers [i*hop - half, i*hop - half + frame_len) in signal coordinates.
            let start = (i * hop).saturating_sub(half).min(samples.len());
            let end = (i * hop + frame_len - half).min(samples.len());
            let energy = prefix[end.max(start)] - prefix[start];
            (energy / frame_len.max(1) as f64).sqrt() as f32
        })
        .collect()
}

/// Envelope of `samples` resampled to one value per output sample.
fn envelope(samples: &[f32], sample_rate_hz: u32, len: usize) -> Vec<f32> {
    let hop = (sample_rate_hz / 4).max(1) as usize;
    let rms = frame_rms(samples, hop * 2, hop);
    interpolate_linear(&rms, len)
}

/// Scale `target` so its envelope tracks `source`'s.
///
/// `rate = 1` leaves the target unchanged; `rate = 0` imposes the source
/// envelope fully.
pub fn match_loudness(
    source: &[f32],
    source_rate_hz: u32,
    target: &mut [f32],
    target_rate_hz: u32,
    rate: f32,
) {
    let len = target.len();
    let src = envelope(source, source_rate_hz, len);
    let tgt = envelope(target, target_rate_hz, len);

    for ((y, &s), &t) in target.iter_mut().zip(&src).zip(&tgt) {
        let t = t.max(RMS_FLOOR);
        *y *= s.powf(1.0 - rate) * t.powf(rate - 1.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rms_frame_count_and_value() {
        let x = vec![0.5f32; 1000];
        let rms = frame_rms(&x, 200, 100);
        assert_eq!(rms.len(), 11);
        // Interior frames are full.
        assert!((rms[5] - 0.5).abs() < 1e-6);
        // The first frame is half zero padding.
        assert!((rms[0] - (0.125f32).sqrt()).abs() < 1e-6);
    }

    #[test]
    fn rate_one_is_unchanged() {
        let source: Vec<f32> = (0..16_000).map(|i| (i as f32 * 0.01).sin() * 0.1).collect();
        let mut target: Vec<f32> = (0..8_000).map(|i| (i as f32 * 0.02).sin() * 0.8).collect();
        let before = target.clone();
        match_loudness(&source, 16_000, &mut target, 8_000, 1.0);
        for (a, b) in target.iter().zip(&before) {
            assert!((a - b).abs() < 1e-5);
        }
    }

    #[test]
    fn rate_zero_imposes_source_level() {
        let source = vec![0.1f32; 32_000];
        let mut target = vec![0.4f32; 48_000];
        match_loudness(&source, 16_000, &mut target, 24_000, 0.0);
        let mid = target[24_000];
        assert!((mid - 0.1).abs() < 1e-4, "got {mid}");
    }

    #[test]
    fn silent_target_stays_finite() {
        let source = vec![0.3f32; 16_000];
        let mut target = vec![0.0f32; 16_000];
        match_loudness(&source, 16_000, &mut target, 16_000, 0.0);
        assert!(target.iter().all(|v| v.is_finite() && *v == 0.0));
    }
}
