//! RMVPE pitch back-end: log-mel in, per-frame salience out, decoded to Hz.
//!
//! The network itself sits behind [`SalienceModel`]; everything around it
//! (front end, frame padding, chunking, decoding) lives here.

use anyhow::{Context, ensure};
use tracing::debug;

use crate::constants::{
    RMVPE_CENTS_BASE, RMVPE_CENTS_STEP, RMVPE_CHUNK_FRAMES, RMVPE_FRAME_MULTIPLE,
    RMVPE_SALIENCE_BINS,
};
use crate::mel::{LogMel, MelExtractor};
use crate::pitch::{F0Request, PitchEstimator, PitchMethod};

/// Threshold used by the plain `rmvpe` decoder.
pub const RMVPE_THRESHOLD: f32 = 0.03;
/// Threshold used by `rmvpe+`, which also range-filters and median-smooths.
pub const RMVPE_PLUS_THRESHOLD: f32 = 0.02;
const RMVPE_PLUS_MEDIAN_TAPS: usize = 5;

/// The salience network: band-major log-mel `[128, frames]` in,
/// frame-major salience `[frames, 360]` out.
///
/// `frames` is always a multiple of 32.
pub trait SalienceModel {
    fn salience(&mut self, mel: &LogMel, frames: usize) -> anyhow::Result<Vec<f32>>;
}

/// RMVPE estimator over any salience model.
#[derive(Debug)]
pub struct Rmvpe<M> {
    model: M,
    mel: MelExtractor,
}

impl<M: SalienceModel> Rmvpe<M> {
    #[must_use]
    pub fn new(model: M) -> Self {
        Self {
            model,
            mel: MelExtractor::new(),
        }
    }

    /// Run the model over `mel`, padded to a multiple of 32 frames and fed in
    /// bounded chunks. Returns `[mel.frames(), 360]`.
    pub fn mel_to_salience(&mut self, mel: &LogMel) -> anyhow::Result<Vec<f32>> {
        let n_frames = mel.frames();
        let padded_frames =
            RMVPE_FRAME_MULTIPLE * (n_frames.saturating_sub(1) / RMVPE_FRAME_MULTIPLE + 1);
        let padded = mel.reflect_pad_to(padded_frames);

        let mut hidden = Vec::with_capacity(padded_frames * RMVPE_SALIENCE_BINS);
        let mut start = 0usize;
        while start < padded_frames {
            let end = (start + RMVPE_CHUNK_FRAMES).min(padded_frames);
            let chunk = padded.slice_frames(start..end);
            let out = self
                .model
                .salience(&chunk, end - start)
                .with_context(|| format!("rmvpe salience for frames {start}..{end}"))?;
            ensure!(
                out.len() == (end - start) * RMVPE_SALIENCE_BINS,
                "rmvpe salience has {} values, expected {}",
                out.len(),
                (end - start) * RMVPE_SALIENCE_BINS
            );
            hidden.extend_from_slice(&out);
            start = end;
        }

        hidden.truncate(n_frames * RMVPE_SALIENCE_BINS);
        Ok(hidden)
    }

    pub fn infer(
        &mut self,
        audio: &[f32],
        method: PitchMethod,
        f0_min: f32,
        f0_max: f32,
    ) -> anyhow::Result<Vec<f32>> {
        let mel = self.mel.compute(audio);
        let salience = self.mel_to_salience(&mel)?;
        let frames = mel.frames();

        let f0 = match method {
            PitchMethod::RmvpePlus => {
                let mut f0 = decode_salience(&salience, frames, RMVPE_PLUS_THRESHOLD);
                for v in &mut f0 {
                    if *v < f0_min || *v > f0_max {
                        *v = 0.0;
                    }
                }
                median_filter(&f0, RMVPE_PLUS_MEDIAN_TAPS)
            }
            _ => decode_salience(&salience, frames, RMVPE_THRESHOLD),
        };
        debug!(frames, method = method.as_str(), "rmvpe decoded");
        Ok(f0)
    }
}

impl<M: SalienceModel> PitchEstimator for Rmvpe<M> {
    fn estimate(&mut self, request: &F0Request<'_>) -> anyhow::Result<Vec<f32>> {
        self.infer(request.waveform, request.method, request.f0_min, request.f0_max)
    }
}

#[inline]
fn cents_of_bin(bin: usize) -> f32 {
    RMVPE_CENTS_STEP * bin as f32 + RMVPE_CENTS_BASE
}

/// Decode frame-major salience `[frames, 360]` to F0 in Hz.
///
/// Local weighted average of the cents around each frame's peak (9 bins);
/// frames whose peak is at or below `threshold` decode to 0.
#[must_use]
pub fn decode_salience(salience: &[f32], frames: usize, threshold: f32) -> Vec<f32> {
    (0..frames)
        .map(|t| {
            let bins = t * RMVPE_SALIENCE_BINS..(t + 1) * RMVPE_SALIENCE_BINS;
            let Some(row) = salience.get(bins) else {
                return 0.0;
            };
            let (center, peak) = row
                .iter()
                .copied()
                .enumerate()
                .fold((0usize, f32::NEG_INFINITY), |acc, (i, v)| {
                    if v > acc.1 { (i, v) } else { acc }
                });
            if peak <= threshold {
                return 0.0;
            }

            let lo = center.saturating_sub(4);
            let hi = (center + 5).min(RMVPE_SALIENCE_BINS);
            let (mut num, mut den) = (0.0f32, 0.0f32);
            for (j, &w) in row.iter().enumerate().take(hi).skip(lo) {
                num += w * cents_of_bin(j);
                den += w;
            }
            if den <= 0.0 {
                return 0.0;
            }
            let cents = num / den;
            let f0 = 10.0 * 2f32.powf(cents / 1200.0);
            if f0 == 10.0 { 0.0 } else { f0 }
        })
        .collect()
}

/// Odd-length median filter with zero-padded edges.
#[must_use]
pub fn median_filter(values: &[f32], taps: usize) -> Vec<f32> {
    let half = taps / 2;
    let mut window = Vec::with_capacity(taps);
    (0..values.len())
        .map(|i| {
            window.clear();
            for k in 0..taps {
                let idx = (i + k).checked_sub(half);
                window.push(idx.and_then(|j| values.get(j)).copied().unwrap_or(0.0));
            }
            window.sort_by(f32::total_cmp);
            window[half]
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Salience model that puts a single peak at a fixed bin.
    struct PeakModel {
        bin: usize,
        height: f32,
        calls: Vec<usize>,
    }

    impl SalienceModel for PeakModel {
        fn salience(&mut self, mel: &LogMel, frames: usize) -> anyhow::Result<Vec<f32>> {
            assert_eq!(mel.frames(), frames);
            assert_eq!(frames % RMVPE_FRAME_MULTIPLE, 0);
            self.calls.push(frames);
            let mut out = vec![0.0f32; frames * RMVPE_SALIENCE_BINS];
            for t in 0..frames {
                out[t * RMVPE_SALIENCE_BINS + self.bin] = self.height;
            }
            Ok(out)
        }
    }

    fn hz_of_bin(bin: usize) -> f32 {
        10.0 * 2f32.powf(cents_of_bin(bin) / 1200.0)
    }

    #[test]
    fn single_peak_decodes_to_bin_frequency() {
        let mut sal = vec![0.0f32; 2 * RMVPE_SALIENCE_BINS];
        sal[100] = 0.9;
        sal[RMVPE_SALIENCE_BINS + 100] = 0.01;
        let f0 = decode_salience(&sal, 2, RMVPE_THRESHOLD);
        assert!((f0[0] - hz_of_bin(100)).abs() < 1e-2, "got {}", f0[0]);
        assert_eq!(f0[1], 0.0);
    }

    #[test]
    fn neighbours_pull_the_estimate() {
        let mut sal = vec![0.0f32; RMVPE_SALIENCE_BINS];
        sal[200] = 0.8;
        sal[201] = 0.8;
        let f0 = decode_salience(&sal, 1, RMVPE_THRESHOLD);
        let mid_cents = (cents_of_bin(200) + cents_of_bin(201)) / 2.0;
        let expect = 10.0 * 2f32.powf(mid_cents / 1200.0);
        assert!((f0[0] - expect).abs() < 1e-2);
    }

    #[test]
    fn edge_peak_ignores_out_of_range_bins() {
        let mut sal = vec![0.0f32; RMVPE_SALIENCE_BINS];
        sal[0] = 0.5;
        sal[1] = 0.5;
        let f0 = decode_salience(&sal, 1, RMVPE_THRESHOLD);
        let expect = 10.0 * 2f32.powf((cents_of_bin(0) + cents_of_bin(1)) / 2.0 / 1200.0);
        assert!((f0[0] - expect).abs() < 1e-2);
    }

    #[test]
    fn median_filter_zero_pads_edges() {
        let y = median_filter(&[5.0, 5.0, 5.0, 100.0, 5.0, 5.0], 5);
        assert_eq!(y, vec![5.0; 6]);

        // Zero padding wins at the edges once it holds the majority.
        assert_eq!(median_filter(&[5.0, 7.0, 0.0, 0.0, 0.0], 5), vec![0.0; 5]);
        assert_eq!(
            median_filter(&[2.0, 3.0, 4.0, 5.0, 6.0], 5),
            vec![2.0, 3.0, 4.0, 4.0, 4.0]
        );
        assert!(median_filter(&[], 5).is_empty());
    }

    #[test]
    fn pads_to_multiple_of_32_and_truncates() {
        let mut rmvpe = Rmvpe::new(PeakModel {
            bin: 150,
            height: 0.9,
            calls: Vec::new(),
        });
        let audio = vec![0.0f32; 16_000];
        let f0 = rmvpe
            .infer(&audio, PitchMethod::Rmvpe, 50.0, 1100.0)
            .expect("infer");
        assert_eq!(f0.len(), MelExtractor::frame_count(audio.len()));
        assert_eq!(rmvpe.model.calls, vec![128]);
        assert!(f0.iter().all(|&v| (v - hz_of_bin(150)).abs() < 1e-2));
    }

    #[test]
    fn rmvpe_plus_drops_out_of_range_pitch() {
        // Bin 10 decodes to roughly 35 Hz, below the 50 Hz floor.
        let mut rmvpe = Rmvpe::new(PeakModel {
            bin: 10,
            height: 0.9,
            calls: Vec::new(),
        });
        let audio = vec![0.0f32; 3_200];
        let f0 = rmvpe
            .infer(&audio, PitchMethod::RmvpePlus, 50.0, 1100.0)
            .expect("infer");
        assert!(hz_of_bin(10) < 50.0);
        assert!(f0.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn wrong_salience_shape_is_an_error() {
        struct Short;
        impl SalienceModel for Short {
            fn salience(&mut self, _mel: &LogMel, _frames: usize) -> anyhow::Result<Vec<f32>> {
                Ok(vec![0.0; 3])
            }
        }
        let mut rmvpe = Rmvpe::new(Short);
        assert!(rmvpe.infer(&[0.0; 320], PitchMethod::Rmvpe, 50.0, 1100.0).is_err());
    }
}
