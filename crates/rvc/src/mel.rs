//! Log-mel spectrogram for the RMVPE pitch model.
//!
//! - Periodic Hann window, centred STFT with reflect padding
//! - FFT via `rustfft`, magnitude (not power) spectrum
//! - HTK mel scale with Slaney area normalisation, 30-8000 Hz
//! - natural log after clamping at 1e-5
//!
//! Output is band-major (`[MEL_BINS, frames]`), the layout the model consumes.

use std::fmt;
use std::ops::Range;
use std::sync::Arc;

use num_complex::Complex32;
use rustfft::{Fft, FftPlanner};

use crate::audio::reflect_pad;
use crate::constants::{
    HOP_LENGTH, RMVPE_MEL_BINS, RMVPE_MEL_CLAMP, RMVPE_MEL_FMAX_HZ, RMVPE_MEL_FMIN_HZ,
    RMVPE_N_FFT, RMVPE_N_FREQ, RMVPE_WINDOW_SIZE, SAMPLE_RATE_HZ,
};

#[inline]
fn hertz_to_mel(freq: f32) -> f32 {
    2595.0 * (1.0 + freq / 700.0).log10()
}

#[inline]
fn mel_to_hertz(mels: f32) -> f32 {
    700.0 * (10.0f32.powf(mels / 2595.0) - 1.0)
}

fn build_mel_filters() -> Vec<f32> {
    let mut fft_freqs = vec![0.0f32; RMVPE_N_FREQ];
    for (f, v) in fft_freqs.iter_mut().enumerate() {
        *v = (f as f32) * (SAMPLE_RATE_HZ as f32) / (RMVPE_N_FFT as f32);
    }

    let mel_min = hertz_to_mel(RMVPE_MEL_FMIN_HZ);
    let mel_max = hertz_to_mel(RMVPE_MEL_FMAX_HZ);

    let mut filter_freqs = vec![0.0f32; RMVPE_MEL_BINS + 2];
    for (i, v) in filter_freqs.iter_mut().enumerate() {
        let mel = mel_min + (mel_max - mel_min) * (i as f32) / ((RMVPE_MEL_BINS + 1) as f32);
        *v = mel_to_hertz(mel);
    }

    let mut filter_diff = vec![0.0f32; RMVPE_MEL_BINS + 1];
    for (i, v) in filter_diff.iter_mut().enumerate() {
        *v = filter_freqs[i + 1] - filter_freqs[i];
        if *v == 0.0 {
            *v = 1e-6;
        }
    }

    let mut filters = vec![0.0f32; RMVPE_MEL_BINS * RMVPE_N_FREQ];
    for m in 0..RMVPE_MEL_BINS {
        let enorm = 2.0 / (filter_freqs[m + 2] - filter_freqs[m]);
        for f in 0..RMVPE_N_FREQ {
            let down = (fft_freqs[f] - filter_freqs[m]) / filter_diff[m];
            let up = (filter_freqs[m + 2] - fft_freqs[f]) / filter_diff[m + 1];
            let val = down.min(up).max(0.0);
            filters[m * RMVPE_N_FREQ + f] = val * enorm;
        }
    }

    filters
}

fn build_hann_window() -> Vec<f32> {
    (0..RMVPE_WINDOW_SIZE)
        .map(|i| {
            // Periodic Hann: 0.5*(1-cos(2*pi*i/N))
            let angle = 2.0 * std::f32::consts::PI * (i as f32) / (RMVPE_WINDOW_SIZE as f32);
            0.5 * (1.0 - angle.cos())
        })
        .collect()
}

/// Band-major log-mel spectrogram.
#[derive(Debug, Clone, PartialEq)]
pub struct LogMel {
    data: Vec<f32>, // [RMVPE_MEL_BINS * frames]
    frames: usize,
}

impl LogMel {
    #[must_use]
    pub fn from_band_major(data: Vec<f32>, frames: usize) -> Option<Self> {
        (data.len() == RMVPE_MEL_BINS * frames).then_some(Self { data, frames })
    }

    #[must_use]
    pub fn frames(&self) -> usize {
        self.frames
    }

    #[must_use]
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    #[must_use]
    pub fn band(&self, m: usize) -> &[f32] {
        &self.data[m * self.frames..(m + 1) * self.frames]
    }

    /// Extend every band to `frames` by reflecting along time.
    #[must_use]
    pub fn reflect_pad_to(&self, frames: usize) -> Self {
        if frames <= self.frames {
            return self.clone();
        }
        let extra = frames - self.frames;
        let mut data = Vec::with_capacity(RMVPE_MEL_BINS * frames);
        for m in 0..RMVPE_MEL_BINS {
            data.extend(reflect_pad(self.band(m), 0, extra));
        }
        Self { data, frames }
    }

    /// Copy of the frames in `range`, still band-major.
    #[must_use]
    pub fn slice_frames(&self, range: Range<usize>) -> Self {
        let start = range.start.min(self.frames);
        let end = range.end.clamp(start, self.frames);
        let mut data = Vec::with_capacity(RMVPE_MEL_BINS * (end - start));
        for m in 0..RMVPE_MEL_BINS {
            data.extend_from_slice(&self.band(m)[start..end]);
        }
        Self {
            data,
            frames: end - start,
        }
    }
}

/// Reusable STFT + mel projection state.
pub struct MelExtractor {
    mel_filters: Vec<f32>, // [RMVPE_MEL_BINS * RMVPE_N_FREQ]
    window: Vec<f32>,
    fft: Arc<dyn Fft<f32>>,
}

impl fmt::Debug for MelExtractor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MelExtractor")
            .field("bins", &RMVPE_MEL_BINS)
            .field("n_fft", &RMVPE_N_FFT)
            .finish_non_exhaustive()
    }
}

impl Default for MelExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl MelExtractor {
    #[must_use]
    pub fn new() -> Self {
        let fft = FftPlanner::<f32>::new().plan_fft_forward(RMVPE_N_FFT);
        Self {
            mel_filters: build_mel_filters(),
            window: build_hann_window(),
            fft,
        }
    }

    /// Number of frames produced for `samples` input samples.
    #[must_use]
    pub fn frame_count(samples: usize) -> usize {
        samples / HOP_LENGTH + 1
    }

    #[must_use]
    pub fn compute(&self, audio: &[f32]) -> LogMel {
        let half = RMVPE_N_FFT / 2;
        let padded = reflect_pad(audio, half, half);
        let frames = Self::frame_count(audio.len());

        let mut data = vec![0.0f32; RMVPE_MEL_BINS * frames];
        let mut buf = vec![Complex32::new(0.0, 0.0); RMVPE_N_FFT];
        let mut scratch = vec![Complex32::new(0.0, 0.0); self.fft.get_inplace_scratch_len()];
        let mut magnitude = [0.0f32; RMVPE_N_FREQ];

        for t in 0..frames {
            let start = t * HOP_LENGTH;
            for (i, out) in buf.iter_mut().enumerate() {
                let x = padded.get(start + i).copied().unwrap_or(0.0);
                *out = Complex32::new(x * self.window[i], 0.0);
            }
            self.fft.process_with_scratch(&mut buf, &mut scratch);

            for (k, mk) in magnitude.iter_mut().enumerate() {
                *mk = buf[k].norm();
            }

            for m in 0..RMVPE_MEL_BINS {
                let filt = &self.mel_filters[m * RMVPE_N_FREQ..(m + 1) * RMVPE_N_FREQ];
                let sum: f32 = filt.iter().zip(magnitude.iter()).map(|(w, v)| w * v).sum();
                data[m * frames + t] = sum.max(RMVPE_MEL_CLAMP).ln();
            }
        }

        LogMel { data, frames }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_clamps_to_floor() {
        let ext = MelExtractor::new();
        let mel = ext.compute(&vec![0.0f32; 1600]);
        assert_eq!(mel.frames(), 11);
        assert_eq!(mel.data().len(), RMVPE_MEL_BINS * 11);

        let expect = RMVPE_MEL_CLAMP.ln();
        for &v in mel.data() {
            assert!((v - expect).abs() < 1e-6, "got {v}, expected {expect}");
        }
    }

    #[test]
    fn frame_count_is_centred() {
        assert_eq!(MelExtractor::frame_count(0), 1);
        assert_eq!(MelExtractor::frame_count(159), 1);
        assert_eq!(MelExtractor::frame_count(160), 2);
        assert_eq!(MelExtractor::frame_count(32_000), 201);
    }

    #[test]
    fn filters_are_triangles_within_band() {
        let filters = build_mel_filters();
        let bin_hz = SAMPLE_RATE_HZ as f32 / RMVPE_N_FFT as f32;
        for m in 0..RMVPE_MEL_BINS {
            let row = &filters[m * RMVPE_N_FREQ..(m + 1) * RMVPE_N_FREQ];
            assert!(row.iter().all(|&v| v >= 0.0));
            for (f, &v) in row.iter().enumerate() {
                let hz = f as f32 * bin_hz;
                if hz < RMVPE_MEL_FMIN_HZ - 1.0 || hz > RMVPE_MEL_FMAX_HZ + 1.0 {
                    assert_eq!(v, 0.0, "band {m} leaks at {hz} Hz");
                }
            }
        }
        // Upper bands are wide enough to always cover an FFT bin.
        let top = &filters[(RMVPE_MEL_BINS - 1) * RMVPE_N_FREQ..];
        assert!(top.iter().any(|&v| v > 0.0));
    }

    #[test]
    fn tone_peaks_in_matching_band() {
        let ext = MelExtractor::new();
        let sr = SAMPLE_RATE_HZ as f32;
        let audio: Vec<f32> = (0..8000)
            .map(|i| (2.0 * std::f32::consts::PI * 1000.0 * i as f32 / sr).sin())
            .collect();
        let mel = ext.compute(&audio);
        let t = mel.frames() / 2;
        let (best, _) = (0..RMVPE_MEL_BINS)
            .map(|m| (m, mel.band(m)[t]))
            .fold((0, f32::MIN), |acc, x| if x.1 > acc.1 { x } else { acc });

        let target = hertz_to_mel(1000.0);
        let lo = mel_to_hertz(
            hertz_to_mel(RMVPE_MEL_FMIN_HZ)
                + (hertz_to_mel(RMVPE_MEL_FMAX_HZ) - hertz_to_mel(RMVPE_MEL_FMIN_HZ)) * best as f32
                    / (RMVPE_MEL_BINS + 1) as f32,
        );
        let hi = mel_to_hertz(
            hertz_to_mel(RMVPE_MEL_FMIN_HZ)
                + (hertz_to_mel(RMVPE_MEL_FMAX_HZ) - hertz_to_mel(RMVPE_MEL_FMIN_HZ))
                    * (best + 2) as f32
                    / (RMVPE_MEL_BINS + 1) as f32,
        );
        assert!(
            hertz_to_mel(lo) <= target && target <= hertz_to_mel(hi),
            "band {best} spans {lo}..{hi} Hz"
        );
    }

    #[test]
    fn reflect_pad_and_slice_frames() {
        let frames = 3;
        let data: Vec<f32> = (0..RMVPE_MEL_BINS * frames).map(|i| i as f32).collect();
        let mel = LogMel::from_band_major(data, frames).expect("shape");

        let padded = mel.reflect_pad_to(5);
        assert_eq!(padded.frames(), 5);
        // band 0 = [0,1,2] -> [0,1,2,1,0]
        assert_eq!(padded.band(0), &[0.0, 1.0, 2.0, 1.0, 0.0]);

        let sliced = padded.slice_frames(1..4);
        assert_eq!(sliced.frames(), 3);
        assert_eq!(sliced.band(0), &[1.0, 2.0, 1.0]);
        assert_eq!(sliced.band(1), &[4.0, 5.0, 4.0]);

        assert!(LogMel::from_band_major(vec![0.0; 7], 1).is_none());
    }
}
