//! Model-facing types: feature batches, encoder profiles, the encoder and
//! vocoder traits, and model-directory layout.

use std::path::{Path, PathBuf};

use anyhow::{Result, bail};

/// Row-major `[frames, dim]` feature matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureBatch {
    frames: usize,
    dim: usize,
    data: Vec<f32>,
}

impl FeatureBatch {
    pub fn new(frames: usize, dim: usize, data: Vec<f32>) -> Result<Self> {
        if data.len() != frames * dim {
            bail!(
                "feature batch has {} values, expected {frames} x {dim}",
                data.len()
            );
        }
        Ok(Self { frames, dim, data })
    }

    #[must_use]
    pub fn frames(&self) -> usize {
        self.frames
    }

    #[must_use]
    pub fn dim(&self) -> usize {
        self.dim
    }

    #[must_use]
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    #[must_use]
    pub fn frame(&self, t: usize) -> &[f32] {
        &self.data[t * self.dim..(t + 1) * self.dim]
    }

    pub fn frame_mut(&mut self, t: usize) -> &mut [f32] {
        &mut self.data[t * self.dim..(t + 1) * self.dim]
    }

    /// Nearest-neighbour 2x upsampling along time.
    #[must_use]
    pub fn upsample2x(&self) -> Self {
        let mut data = Vec::with_capacity(self.data.len() * 2);
        for t in 0..self.frames {
            let row = self.frame(t);
            data.extend_from_slice(row);
            data.extend_from_slice(row);
        }
        Self {
            frames: self.frames * 2,
            dim: self.dim,
            data,
        }
    }

    /// Keep only the first `frames` frames.
    pub fn truncate(&mut self, frames: usize) {
        if frames < self.frames {
            self.frames = frames;
            self.data.truncate(frames * self.dim);
        }
    }
}

/// Which encoder layer feeds the vocoder, and how wide it is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderProfile {
    pub output_layer: usize,
    pub expected_dim: usize,
}

impl EncoderProfile {
    pub const V1: EncoderProfile = EncoderProfile {
        output_layer: 9,
        expected_dim: 256,
    };
    pub const V2: EncoderProfile = EncoderProfile {
        output_layer: 12,
        expected_dim: 768,
    };

    #[must_use]
    pub fn from_version(version: &str) -> Option<Self> {
        match version {
            "v1" => Some(Self::V1),
            "v2" => Some(Self::V2),
            _ => None,
        }
    }
}

/// Speech feature extractor (16 kHz audio in, one frame per 320 samples out).
pub trait FeatureEncoder {
    fn extract(&mut self, waveform: &[f32], output_layer: usize) -> Result<FeatureBatch>;
}

/// Generative vocoder conditioned on features and, optionally, pitch.
pub trait Vocoder {
    /// Output sample rate in Hz.
    fn sample_rate(&self) -> u32;

    /// Feature width the vocoder was trained on.
    fn feature_dim(&self) -> usize;

    fn infer(&mut self, features: &FeatureBatch, speaker: u32) -> Result<Vec<f32>>;

    /// `coarse` and `f0` hold exactly `features.frames()` values.
    fn infer_pitched(
        &mut self,
        features: &FeatureBatch,
        coarse: &[u8],
        f0: &[f32],
        speaker: u32,
    ) -> Result<Vec<f32>>;
}

/// Files expected in a model directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelFiles {
    pub encoder: PathBuf,
    pub vocoder: PathBuf,
    pub rmvpe: PathBuf,
    pub index: Option<PathBuf>,
}

fn encoder_path(dir: &Path) -> PathBuf {
    dir.join("encoder.onnx")
}

fn vocoder_path(dir: &Path) -> PathBuf {
    dir.join("vocoder.onnx")
}

fn rmvpe_path(dir: &Path) -> PathBuf {
    dir.join("rmvpe.onnx")
}

fn index_path(dir: &Path) -> PathBuf {
    dir.join("index.safetensors")
}

impl ModelFiles {
    /// Resolve the standard layout; the index is optional.
    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let files = Self {
            encoder: encoder_path(dir),
            vocoder: vocoder_path(dir),
            rmvpe: rmvpe_path(dir),
            index: Some(index_path(dir)).filter(|p| p.is_file()),
        };
        for required in [&files.encoder, &files.vocoder, &files.rmvpe] {
            if !required.is_file() {
                bail!("missing model file {}", required.display());
            }
        }
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use std::time::{SystemTime, UNIX_EPOCH};

    use super::*;

    #[test]
    fn upsample_repeats_each_frame() {
        let fb = FeatureBatch::new(2, 2, vec![1.0, 2.0, 3.0, 4.0]).expect("batch");
        let up = fb.upsample2x();
        assert_eq!(up.frames(), 4);
        assert_eq!(up.data(), &[1.0, 2.0, 1.0, 2.0, 3.0, 4.0, 3.0, 4.0]);
    }

    #[test]
    fn truncate_only_shrinks() {
        let mut fb = FeatureBatch::new(3, 1, vec![1.0, 2.0, 3.0]).expect("batch");
        fb.truncate(5);
        assert_eq!(fb.frames(), 3);
        fb.truncate(2);
        assert_eq!(fb.frames(), 2);
        assert_eq!(fb.data(), &[1.0, 2.0]);
    }

    #[test]
    fn new_rejects_wrong_length() {
        assert!(FeatureBatch::new(2, 3, vec![0.0; 5]).is_err());
    }

    #[test]
    fn encoder_profiles() {
        assert_eq!(EncoderProfile::from_version("v1"), Some(EncoderProfile::V1));
        assert_eq!(EncoderProfile::from_version("v2").map(|p| p.expected_dim), Some(768));
        assert_eq!(EncoderProfile::from_version("v3"), None);
    }

    #[test]
    fn model_files_from_dir() {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos();
        let dir = std::env::temp_dir().join(format!("rvc-model-dir-{nanos}"));
        std::fs::create_dir_all(&dir).expect("mkdir");

        assert!(ModelFiles::from_dir(&dir).is_err());

        for name in ["encoder.onnx", "vocoder.onnx", "rmvpe.onnx"] {
            std::fs::write(dir.join(name), b"").expect("write");
        }
        let files = ModelFiles::from_dir(&dir).expect("files");
        assert_eq!(files.index, None);

        std::fs::write(dir.join("index.safetensors"), b"").expect("write");
        let files = ModelFiles::from_dir(&dir).expect("files");
        assert_eq!(files.index, Some(dir.join("index.safetensors")));

        std::fs::remove_dir_all(dir).expect("cleanup");
    }
}
