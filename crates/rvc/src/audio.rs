//! Audio utilities.
//!
//! - mono f32 samples
//! - linear resampling to the 16 kHz analysis rate
//! - numpy-style reflect padding
//! - linear curve interpolation (half-pixel centres)
//! - peak normalisation
//! - WAV decoding to mono (integer PCM or 32-bit float)

use std::io::Read;
use std::path::Path;

use hound::WavReader;

/// Linearly resample `input` from `src_hz` to `dst_hz`.
#[must_use]
pub fn resample_linear_mono_f32(input: &[f32], src_hz: u32, dst_hz: u32) -> Vec<f32> {
    if src_hz == dst_hz || input.is_empty() {
        return input.to_vec();
    }

    let new_n_u64 = (input.len() as u64) * u64::from(dst_hz) / u64::from(src_hz);
    let new_n = usize::try_from(new_n_u64).unwrap_or(usize::MAX);
    let mut out = vec![0.0f32; new_n];

    for (i, y) in out.iter_mut().enumerate() {
        let src_pos = (i as f64) * f64::from(src_hz) / f64::from(dst_hz);
        let idx = src_pos.floor() as usize;
        let frac = (src_pos - (idx as f64)) as f32;

        let a = input.get(idx).copied().unwrap_or(0.0);
        let b = input.get(idx + 1).copied().unwrap_or(a);
        *y = a * (1.0 - frac) + b * frac;
    }

    out
}

/// Pad `input` with its mirror image (edge sample not repeated), like
/// `numpy.pad(mode="reflect")`. Pads longer than the signal keep reflecting.
#[must_use]
pub fn reflect_pad(input: &[f32], left: usize, right: usize) -> Vec<f32> {
    let n = input.len();
    if n == 0 {
        return vec![0.0; left + right];
    }

    let mut out = Vec::with_capacity(left + n + right);
    let at = |i: isize| -> f32 {
        if n == 1 {
            return input[0];
        }
        let period = 2 * (n as isize - 1);
        let mut j = i.rem_euclid(period);
        if j >= n as isize {
            j = period - j;
        }
        input[j as usize]
    };

    for i in -(left as isize)..0 {
        out.push(at(i));
    }
    out.extend_from_slice(input);
    for i in n as isize..(n + right) as isize {
        out.push(at(i));
    }
    out
}

/// Resize a curve to `size` points by linear interpolation with half-pixel
/// centres (`align_corners = false`).
#[must_use]
pub fn interpolate_linear(curve: &[f32], size: usize) -> Vec<f32> {
    if curve.is_empty() {
        return vec![0.0; size];
    }
    if curve.len() == size {
        return curve.to_vec();
    }

    let last = curve.len() - 1;
    let scale = (curve.len() as f64) / (size as f64);
    (0..size)
        .map(|i| {
            let src = (((i as f64) + 0.5) * scale - 0.5).max(0.0);
            let i0 = (src.floor() as usize).min(last);
            let i1 = (i0 + 1).min(last);
            let lambda = (src - i0 as f64) as f32;
            curve[i0] * (1.0 - lambda) + curve[i1] * lambda
        })
        .collect()
}

/// Attenuate `samples` so that the peak magnitude does not exceed `ceiling`.
///
/// Never amplifies. Returns the divisor that was applied (1.0 when untouched).
pub fn peak_normalize(samples: &mut [f32], ceiling: f32) -> f32 {
    let peak = samples.iter().fold(0.0f32, |m, &s| m.max(s.abs()));
    let divisor = peak / ceiling;
    if divisor > 1.0 {
        for s in samples.iter_mut() {
            *s /= divisor;
        }
        divisor
    } else {
        1.0
    }
}

#[derive(Debug, Clone)]
pub struct WavData {
    pub sample_rate_hz: u32,
    pub channels: u16,
    pub samples_mono: Vec<f32>,
}

#[derive(Debug, thiserror::Error)]
pub enum WavError {
    #[error("read wav: {0}")]
    Hound(#[from] hound::Error),
    #[error("unsupported WAV format ({bits}-bit {format:?})")]
    UnsupportedFormat {
        format: hound::SampleFormat,
        bits: u16,
    },
    #[error("WAV header declares zero channels")]
    NoChannels,
}

/// Decode a WAV stream to mono `f32` at the file's sample rate.
///
/// Integer PCM of any width up to 32 bits and 32-bit float are accepted;
/// channels are averaged.
pub fn read_wav<R: Read>(reader: R) -> Result<WavData, WavError> {
    decode_wav(WavReader::new(reader)?)
}

pub fn read_wav_file(path: impl AsRef<Path>) -> Result<WavData, WavError> {
    decode_wav(WavReader::open(path)?)
}

fn decode_wav<R: Read>(mut wav: WavReader<R>) -> Result<WavData, WavError> {
    let spec = wav.spec();
    if spec.channels == 0 {
        return Err(WavError::NoChannels);
    }

    let interleaved: Vec<f32> = match (spec.sample_format, spec.bits_per_sample) {
        (hound::SampleFormat::Float, 32) => wav.samples::<f32>().collect::<Result<Vec<_>, _>>()?,
        (hound::SampleFormat::Int, bits @ 1..=32) => {
            let scale = 1.0 / (1u64 << (bits - 1)) as f32;
            wav.samples::<i32>()
                .map(|s| s.map(|v| v as f32 * scale))
                .collect::<Result<Vec<_>, _>>()?
        }
        (format, bits) => return Err(WavError::UnsupportedFormat { format, bits }),
    };

    let channels = usize::from(spec.channels);
    let samples_mono = interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect();

    Ok(WavData {
        sample_rate_hz: spec.sample_rate,
        channels: spec.channels,
        samples_mono,
    })
}
