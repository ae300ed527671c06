//! Conversion settings file (JSON) parsing and validation.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::chunk::ChunkingProfile;
use crate::constants::{F0_MAX_HZ, F0_MIN_HZ};
use crate::error::ConversionError;
use crate::model::EncoderProfile;
use crate::pitch::{PitchMethod, PitchSettings};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversionConfig {
    pub chunking: ChunkingProfile,
    /// Semitones.
    pub pitch_shift: i32,
    pub f0_min: f32,
    pub f0_max: f32,
    pub f0_method: String,
    pub pitch_guidance: bool,
    pub index_rate: f32,
    pub protect: f32,
    pub volume_envelope: f32,
    pub speaker_id: u32,
    pub autopitch: bool,
    pub autopitch_threshold: f32,
    pub autotune: bool,
    pub autotune_strength: f32,
    pub encoder_version: String,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            chunking: ChunkingProfile::standard(),
            pitch_shift: 0,
            f0_min: F0_MIN_HZ,
            f0_max: F0_MAX_HZ,
            f0_method: PitchMethod::Rmvpe.as_str().to_string(),
            pitch_guidance: true,
            index_rate: 0.5,
            protect: 0.5,
            volume_envelope: 1.0,
            speaker_id: 0,
            autopitch: false,
            autopitch_threshold: 155.0,
            autotune: false,
            autotune_strength: 1.0,
            encoder_version: "v2".to_string(),
        }
    }
}

/// Validated, typed form of [`ConversionConfig`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConversionParams {
    pub chunking: ChunkingProfile,
    pub pitch: PitchSettings,
    pub pitch_guidance: bool,
    pub index_rate: f32,
    pub protect: f32,
    pub volume_envelope: f32,
    pub speaker_id: u32,
    pub encoder: EncoderProfile,
}

fn unit_range(name: &str, v: f32) -> Result<(), ConversionError> {
    if (0.0..=1.0).contains(&v) {
        Ok(())
    } else {
        Err(ConversionError::InvalidConfig(format!(
            "{name} must be in [0, 1], got {v}"
        )))
    }
}

impl ConversionConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let cfg: Self = serde_json::from_str(json).context("parse conversion config")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path_ref = path.as_ref();
        let json = std::fs::read_to_string(path_ref)
            .with_context(|| format!("read {}", path_ref.display()))?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<(), ConversionError> {
        self.params().map(|_| ())
    }

    /// Check every field and produce the typed parameters.
    pub fn params(&self) -> Result<ConversionParams, ConversionError> {
        self.chunking
            .validate()
            .map_err(ConversionError::InvalidConfig)?;
        unit_range("index_rate", self.index_rate)?;
        unit_range("protect", self.protect)?;
        unit_range("volume_envelope", self.volume_envelope)?;
        unit_range("autotune_strength", self.autotune_strength)?;
        if !(self.f0_min > 0.0 && self.f0_max > self.f0_min) {
            return Err(ConversionError::InvalidConfig(format!(
                "need 0 < f0_min < f0_max, got {} and {}",
                self.f0_min, self.f0_max
            )));
        }
        if self.autopitch && !(self.autopitch_threshold > 0.0) {
            return Err(ConversionError::InvalidConfig(
                "autopitch_threshold must be > 0".to_string(),
            ));
        }
        let method: PitchMethod = self.f0_method.parse()?;
        let encoder = EncoderProfile::from_version(&self.encoder_version).ok_or_else(|| {
            ConversionError::InvalidConfig(format!(
                "unknown encoder version `{}` (expected v1 or v2)",
                self.encoder_version
            ))
        })?;

        Ok(ConversionParams {
            chunking: self.chunking,
            pitch: PitchSettings {
                shift: self.pitch_shift,
                f0_min: self.f0_min,
                f0_max: self.f0_max,
                method,
                autotune: self.autotune.then_some(self.autotune_strength),
                autopitch: self.autopitch.then_some(self.autopitch_threshold),
            },
            pitch_guidance: self.pitch_guidance,
            index_rate: self.index_rate,
            protect: self.protect,
            volume_envelope: self.volume_envelope,
            speaker_id: self.speaker_id,
            encoder,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_json_gives_defaults() {
        let cfg = ConversionConfig::from_json_str("{}").expect("config parse");
        assert_eq!(cfg, ConversionConfig::default());

        let p = cfg.params().expect("params");
        assert_eq!(p.pitch.method, PitchMethod::Rmvpe);
        assert_eq!(p.encoder, EncoderProfile::V2);
        assert_eq!(p.chunking, ChunkingProfile::standard());
        assert_eq!(p.pitch.autotune, None);
        assert_eq!((p.pitch.f0_min, p.pitch.f0_max), (F0_MIN_HZ, F0_MAX_HZ));
    }

    #[test]
    fn parse_config_smoke() {
        let json = r#"
        {
          "chunking": { "x_pad": 3, "x_query": 10, "x_center": 60, "x_max": 65 },
          "pitch_shift": -4,
          "f0_method": "rmvpe+",
          "index_rate": 0.75,
          "protect": 0.33,
          "autotune": true,
          "autotune_strength": 0.5,
          "encoder_version": "v1"
        }
        "#;
        let cfg = ConversionConfig::from_json_str(json).expect("config parse");
        let p = cfg.params().expect("params");
        assert_eq!(p.chunking, ChunkingProfile::half_precision());
        assert_eq!(p.pitch.shift, -4);
        assert_eq!(p.pitch.method, PitchMethod::RmvpePlus);
        assert_eq!(p.pitch.autotune, Some(0.5));
        assert_eq!(p.encoder, EncoderProfile::V1);
        assert!((p.index_rate - 0.75).abs() < 1e-6);
    }

    #[test]
    fn rejects_out_of_range_values() {
        for json in [
            r#"{ "index_rate": 1.5 }"#,
            r#"{ "protect": -0.1 }"#,
            r#"{ "f0_min": 500, "f0_max": 100 }"#,
            r#"{ "encoder_version": "v9" }"#,
            r#"{ "chunking": { "x_pad": 1, "x_query": 40, "x_center": 38, "x_max": 41 } }"#,
        ] {
            assert!(ConversionConfig::from_json_str(json).is_err(), "{json}");
        }
    }

    #[test]
    fn unknown_method_is_unsupported() {
        let cfg = ConversionConfig {
            f0_method: "pm".to_string(),
            ..ConversionConfig::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConversionError::UnsupportedMethod(_))
        ));
    }
}
