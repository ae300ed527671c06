//! Retrieval-based voice conversion core library.
//!
//! This crate provides:
//! - Chunk planning on a zero-phase high-passed signal
//! - Pitch analysis (pluggable back-ends, RMVPE decoding, quantisation)
//! - Timbre retrieval over a voice-print index and consonant protection
//! - The per-chunk conversion driver with loudness matching
//!
//! Neural networks stay behind traits ([`FeatureEncoder`], [`Vocoder`],
//! [`PitchEstimator`], [`rmvpe::SalienceModel`]); the `onnx` feature adds
//! ONNX Runtime implementations.

pub mod audio;
pub mod chunk;
pub mod config;
pub mod constants;
pub mod error;
pub mod filter;
pub mod index;
pub mod loudness;
pub mod mel;
pub mod model;
#[cfg(feature = "onnx")]
pub mod onnx;
pub mod pipeline;
pub mod pitch;
pub mod protect;
pub mod retrieval;
pub mod rmvpe;
pub mod tensors;

pub use chunk::{ChunkPlan, ChunkPlanner, ChunkingProfile, Segment};
pub use config::{ConversionConfig, ConversionParams};
pub use error::ConversionError;
pub use filter::HighPassFilter;
pub use index::{FlatIndex, IndexLoad, Neighbors, VoicePrintIndex, load_index};
pub use model::{EncoderProfile, FeatureBatch, FeatureEncoder, ModelFiles, Vocoder};
pub use pipeline::{Models, VoiceConverter};
pub use pitch::{
    AutoPitch, AutoTune, F0Request, MeanVoicedAutoPitch, NoteGridAutoTune, PitchAnalyzer,
    PitchBackends, PitchCurves, PitchEstimator, PitchMethod, PitchSettings,
};
