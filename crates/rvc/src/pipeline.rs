//! Conversion orchestrator.
//!
//! One call converts one 16 kHz source:
//! - plan quiet cut points on the high-passed signal
//! - estimate pitch once over the context-padded signal
//! - per chunk: encode, retrieve, upsample, align, protect, synthesise, trim
//! - stitch, match loudness, peak-normalise

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::audio::{peak_normalize, reflect_pad};
use crate::chunk::{ChunkPlanner, Segment};
use crate::config::ConversionParams;
use crate::constants::{HOP_LENGTH, PEAK_CEILING, SAMPLE_RATE_HZ};
use crate::error::ConversionError;
use crate::filter::HighPassFilter;
use crate::index::{FlatIndex, IndexLoad, VoicePrintIndex, load_index};
use crate::loudness::match_loudness;
use crate::model::{FeatureEncoder, Vocoder};
use crate::pitch::{PitchAnalyzer, PitchBackends, PitchCurves};
use crate::protect::protect_unvoiced;
use crate::retrieval::blend_features;

/// The caller's model handles for one conversion.
pub struct Models<'a> {
    pub encoder: &'a mut dyn FeatureEncoder,
    pub vocoder: &'a mut dyn Vocoder,
    pub pitch: PitchBackends<'a>,
}

/// Stateless driver; reuse it across calls.
#[derive(Debug)]
pub struct VoiceConverter {
    filter: HighPassFilter,
    analyzer: PitchAnalyzer,
}

impl Default for VoiceConverter {
    fn default() -> Self {
        Self::new()
    }
}

struct ChunkContext<'p> {
    params: &'p ConversionParams,
    index: Option<&'p dyn VoicePrintIndex>,
    pitch: Option<&'p PitchCurves>,
    trim: usize,
}

impl VoiceConverter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            filter: HighPassFilter::speech_default(),
            analyzer: PitchAnalyzer::default(),
        }
    }

    #[must_use]
    pub fn with_pitch_analyzer(mut self, analyzer: PitchAnalyzer) -> Self {
        self.analyzer = analyzer;
        self
    }

    pub fn convert(
        &self,
        models: &mut Models<'_>,
        audio: &[f32],
        params: &ConversionParams,
        index_path: Option<&Path>,
    ) -> Result<Vec<f32>, ConversionError> {
        let never = AtomicBool::new(false);
        self.convert_with_cancel(models, audio, params, index_path, &never)
    }

    /// Like [`Self::convert`], checking `cancel` before every chunk.
    pub fn convert_with_cancel(
        &self,
        models: &mut Models<'_>,
        audio: &[f32],
        params: &ConversionParams,
        index_path: Option<&Path>,
        cancel: &AtomicBool,
    ) -> Result<Vec<f32>, ConversionError> {
        let started = Instant::now();
        check_params(models, params)?;
        let planner = ChunkPlanner::new(self.filter.clone(), &params.chunking)?;

        let index = self.load_index(index_path, params);

        let plan = planner.plan(audio);
        let t_pad = params.chunking.t_pad();
        let padded = reflect_pad(&plan.filtered, t_pad, t_pad);
        let frame_count = padded.len() / HOP_LENGTH;

        let pitch = if params.pitch_guidance {
            Some(
                self.analyzer
                    .analyze(&mut models.pitch, &padded, frame_count, &params.pitch)?,
            )
        } else {
            None
        };

        let target_rate = models.vocoder.sample_rate();
        let ctx = ChunkContext {
            params,
            index: index.as_ref().map(|i| i as &dyn VoicePrintIndex),
            pitch: pitch.as_ref(),
            trim: params.chunking.t_pad_target(target_rate),
        };

        let segments = plan.segments(padded.len(), frame_count, t_pad);
        let mut output = Vec::new();
        for (i, seg) in segments.iter().enumerate() {
            if cancel.load(Ordering::Relaxed) {
                info!(chunk = i, "conversion cancelled");
                return Err(ConversionError::Cancelled);
            }
            let chunk = convert_chunk(models, &padded, seg, &ctx)?;
            debug!(
                chunk = i,
                start = seg.samples.start,
                end = seg.samples.end,
                produced = chunk.len(),
                "chunk converted"
            );
            output.extend_from_slice(&chunk);
        }

        if params.volume_envelope != 1.0 {
            match_loudness(
                &plan.filtered,
                SAMPLE_RATE_HZ,
                &mut output,
                target_rate,
                params.volume_envelope,
            );
        }
        let divisor = peak_normalize(&mut output, PEAK_CEILING);

        info!(
            source_secs = audio.len() as f32 / SAMPLE_RATE_HZ as f32,
            chunks = segments.len(),
            method = %params.pitch.method,
            pitch_guidance = params.pitch_guidance,
            retrieval = ctx.index.is_some(),
            peak_divisor = divisor,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "conversion finished"
        );
        Ok(output)
    }

    fn load_index(&self, path: Option<&Path>, params: &ConversionParams) -> Option<FlatIndex> {
        let path = path?;
        if params.index_rate == 0.0 {
            return None;
        }
        match load_index(path, params.encoder.expected_dim) {
            IndexLoad::Loaded(index) => {
                debug!(vectors = index.len(), dim = index.dim(), "index loaded");
                Some(index)
            }
            IndexLoad::Unavailable(reason) => {
                warn!(%reason, "index unavailable, converting without retrieval");
                None
            }
        }
    }
}

fn check_params(models: &Models<'_>, params: &ConversionParams) -> Result<(), ConversionError> {
    let vocoder_dim = models.vocoder.feature_dim();
    if params.encoder.expected_dim != vocoder_dim {
        return Err(ConversionError::InvalidConfig(format!(
            "encoder profile produces {} features, vocoder expects {vocoder_dim}",
            params.encoder.expected_dim
        )));
    }
    if params.pitch_guidance && !models.pitch.supports(params.pitch.method) {
        return Err(ConversionError::UnsupportedMethod(params.pitch.method.to_string()));
    }
    Ok(())
}

fn convert_chunk(
    models: &mut Models<'_>,
    padded: &[f32],
    seg: &Segment,
    ctx: &ChunkContext<'_>,
) -> Result<Vec<f32>, ConversionError> {
    let params = ctx.params;
    let audio = &padded[seg.samples.clone()];

    let feats = models
        .encoder
        .extract(audio, params.encoder.output_layer)
        .map_err(|e| ConversionError::inference("feature extraction", e))?;
    if feats.dim() != params.encoder.expected_dim {
        return Err(ConversionError::ShapeMismatch {
            stage: "feature extraction",
            expected: params.encoder.expected_dim,
            actual: feats.dim(),
        });
    }

    let blended = blend_features(&feats, ctx.index, params.index_rate);
    let mut upsampled = blended.upsample2x();

    let mut frames = (audio.len() / HOP_LENGTH).min(upsampled.frames());
    if ctx.pitch.is_some() {
        frames = frames.min(seg.frames.len());
    }
    upsampled.truncate(frames);

    let out = match ctx.pitch {
        Some(curves) => {
            let start = seg.frames.start;
            let coarse = &curves.coarse[start..start + frames];
            let f0 = &curves.f0[start..start + frames];

            let mut original = feats.upsample2x();
            original.truncate(frames);
            let protected = protect_unvoiced(&original, &upsampled, f0, params.protect);

            models
                .vocoder
                .infer_pitched(&protected, coarse, f0, params.speaker_id)
        }
        None => models.vocoder.infer(&upsampled, params.speaker_id),
    }
    .map_err(|e| ConversionError::inference("vocoder", e))?;

    let trim = ctx.trim;
    if out.len() <= 2 * trim {
        return Ok(Vec::new());
    }
    Ok(out[trim..out.len() - trim].to_vec())
}
