//! Chunk planning: quiet cut points and the padded segments they delimit.
//!
//! Long inputs are split where the running energy is lowest so that chunk
//! boundaries rarely land inside a phoneme. Each segment is taken from the
//! context-padded signal and overlaps its neighbours by the context margin,
//! which is trimmed from the synthesised output again.

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::audio::reflect_pad;
use crate::constants::{HOP_LENGTH, SAMPLE_RATE_HZ};
use crate::error::ConversionError;
use crate::filter::HighPassFilter;

/// Chunking thresholds, in whole seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkingProfile {
    /// Context margin added to each side of every chunk.
    pub x_pad: u32,
    /// Half-width of the window searched for a quiet cut point.
    pub x_query: u32,
    /// Spacing of the nominal cut points.
    pub x_center: u32,
    /// Inputs up to this length are converted as one chunk.
    pub x_max: u32,
}

impl Default for ChunkingProfile {
    fn default() -> Self {
        Self::standard()
    }
}

impl ChunkingProfile {
    #[must_use]
    pub const fn standard() -> Self {
        Self {
            x_pad: 1,
            x_query: 6,
            x_center: 38,
            x_max: 41,
        }
    }

    #[must_use]
    pub const fn low_memory() -> Self {
        Self {
            x_pad: 1,
            x_query: 5,
            x_center: 30,
            x_max: 32,
        }
    }

    #[must_use]
    pub const fn half_precision() -> Self {
        Self {
            x_pad: 3,
            x_query: 10,
            x_center: 60,
            x_max: 65,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.x_pad == 0 || self.x_query == 0 || self.x_center == 0 || self.x_max == 0 {
            return Err("chunking values must all be > 0".to_string());
        }
        if self.x_query >= self.x_center {
            return Err(format!(
                "x_query ({}) must be smaller than x_center ({})",
                self.x_query, self.x_center
            ));
        }
        if self.x_center > self.x_max {
            return Err(format!(
                "x_center ({}) must not exceed x_max ({})",
                self.x_center, self.x_max
            ));
        }
        Ok(())
    }

    /// Context margin in 16 kHz samples.
    #[must_use]
    pub fn t_pad(&self) -> usize {
        self.x_pad as usize * SAMPLE_RATE_HZ as usize
    }

    /// Context margin in samples at the synthesis rate.
    #[must_use]
    pub fn t_pad_target(&self, target_rate_hz: u32) -> usize {
        self.x_pad as usize * target_rate_hz as usize
    }

    #[must_use]
    pub fn t_query(&self) -> usize {
        self.x_query as usize * SAMPLE_RATE_HZ as usize
    }

    #[must_use]
    pub fn t_center(&self) -> usize {
        self.x_center as usize * SAMPLE_RATE_HZ as usize
    }

    #[must_use]
    pub fn t_max(&self) -> usize {
        self.x_max as usize * SAMPLE_RATE_HZ as usize
    }
}

/// One chunk of the context-padded signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// Sample range in the padded signal.
    pub samples: Range<usize>,
    /// Frame range in the padded signal's pitch curves.
    pub frames: Range<usize>,
}

/// Filtered source plus the cut points found in it.
#[derive(Debug, Clone)]
pub struct ChunkPlan {
    pub filtered: Vec<f32>,
    pub cut_points: Vec<usize>,
}

impl ChunkPlan {
    /// Split a signal padded by `t_pad` on both sides into segments.
    ///
    /// Every cut `t` closes a segment `[s, t + 2*t_pad + hop)` and opens the
    /// next one at `t`; a trailing segment runs to the end of the buffer.
    #[must_use]
    pub fn segments(&self, padded_len: usize, frame_count: usize, t_pad: usize) -> Vec<Segment> {
        let t_pad2 = 2 * t_pad;
        let mut out = Vec::with_capacity(self.cut_points.len() + 1);
        let mut s = 0usize;

        for &t in &self.cut_points {
            let end = (t + t_pad2 + HOP_LENGTH).min(padded_len);
            let frame_end = ((t + t_pad2) / HOP_LENGTH).min(frame_count);
            out.push(Segment {
                samples: s.min(end)..end,
                frames: (s / HOP_LENGTH).min(frame_end)..frame_end,
            });
            s = t;
        }

        let start = s.min(padded_len);
        out.push(Segment {
            samples: start..padded_len,
            frames: (start / HOP_LENGTH).min(frame_count)..frame_count,
        });
        out
    }
}

/// Finds quiet cut points in long inputs.
#[derive(Debug, Clone)]
pub struct ChunkPlanner {
    filter: HighPassFilter,
    t_query: usize,
    t_center: usize,
    t_max: usize,
}

impl ChunkPlanner {
    /// Fails unless `profile` passes [`ChunkingProfile::validate`].
    pub fn new(filter: HighPassFilter, profile: &ChunkingProfile) -> Result<Self, ConversionError> {
        profile.validate().map_err(ConversionError::InvalidConfig)?;
        Ok(Self {
            filter,
            t_query: profile.t_query(),
            t_center: profile.t_center(),
            t_max: profile.t_max(),
        })
    }

    /// High-pass the source and find its cut points.
    #[must_use]
    pub fn plan(&self, audio: &[f32]) -> ChunkPlan {
        let filtered = self.filter.filtfilt(audio);
        let cut_points = self.find_cut_points(&filtered);
        ChunkPlan {
            filtered,
            cut_points,
        }
    }

    /// Cut points (multiples of the hop) for an already filtered signal.
    #[must_use]
    pub fn find_cut_points(&self, audio: &[f32]) -> Vec<usize> {
        let half = HOP_LENGTH / 2;
        let padded = reflect_pad(audio, half, half);
        if padded.len() <= self.t_max {
            return Vec::new();
        }

        let running = running_sum(&padded, HOP_LENGTH, audio.len());
        let mut cuts = Vec::new();
        let mut t = self.t_center;
        while t < audio.len() {
            let lo = t.saturating_sub(self.t_query);
            let hi = (t + self.t_query).min(running.len());
            let offset = first_min_abs(&running[lo..hi]);
            let cut = lo + offset;
            cuts.push(cut / HOP_LENGTH * HOP_LENGTH);
            t += self.t_center;
        }
        cuts
    }
}

/// `out[k] = sum(padded[k..k + window])` for `k < len`, via prefix sums.
fn running_sum(padded: &[f32], window: usize, len: usize) -> Vec<f64> {
    let mut prefix = Vec::with_capacity(padded.len() + 1);
    prefix.push(0.0f64);
    let mut acc = 0.0f64;
    for &v in padded {
        acc += f64::from(v);
        prefix.push(acc);
    }
    (0..len).map(|k| prefix[k + window] - prefix[k]).collect()
}

/// Index of the first element with the smallest magnitude.
fn first_min_abs(values: &[f64]) -> usize {
    let mut best = 0usize;
    let mut best_val = f64::INFINITY;
    for (i, v) in values.iter().enumerate() {
        let a = v.abs();
        if a < best_val {
            best_val = a;
            best = i;
        }
    }
    best
}
