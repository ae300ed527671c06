//! ONNX Runtime back-ends for the encoder, the vocoder and the RMVPE salience
//! network.
//!
//! Exported graphs differ in input naming, so vocoder inputs are bound by
//! name. The encoder's output layer is normally baked into the export; graphs
//! that take it as an `output_layer` input get it fed.

use std::path::Path;

use anyhow::{Context, Result, bail, ensure};
use ort::session::{Session, SessionInputValue};
use ort::value::Tensor;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::constants::{RMVPE_MEL_BINS, RMVPE_SALIENCE_BINS};
use crate::mel::LogMel;
use crate::model::{FeatureBatch, FeatureEncoder, Vocoder};
use crate::rmvpe::SalienceModel;

type Inputs<'s> = Vec<(String, SessionInputValue<'s>)>;

fn open_session(path: &Path) -> Result<Session> {
    Session::builder()
        .context("create onnx session builder")?
        .commit_from_file(path)
        .with_context(|| format!("load onnx model {}", path.display()))
}

fn input_names(session: &Session) -> Vec<String> {
    session.inputs.iter().map(|i| i.name.clone()).collect()
}

fn f32_input(shape: Vec<usize>, data: Vec<f32>) -> Result<SessionInputValue<'static>> {
    let t = Tensor::from_array((shape, data))?;
    Ok(SessionInputValue::Owned(t.into_dyn()))
}

fn i64_input(shape: Vec<usize>, data: Vec<i64>) -> Result<SessionInputValue<'static>> {
    let t = Tensor::from_array((shape, data))?;
    Ok(SessionInputValue::Owned(t.into_dyn()))
}

/// Run `session` and return the first output as `(shape, values)`.
fn run_first_output(session: &mut Session, inputs: Inputs<'_>) -> Result<(Vec<usize>, Vec<f32>)> {
    let outputs = session.run(inputs).context("onnx run")?;
    let (shape, data) = outputs[0]
        .try_extract_tensor::<f32>()
        .context("extract f32 output")?;
    let shape = shape.iter().map(|&d| d.max(0) as usize).collect();
    Ok((shape, data.to_vec()))
}

/// Speech feature extractor: `[1, samples]` in, `[1, frames, dim]` out.
pub struct OnnxEncoder {
    session: Session,
    input: String,
    takes_layer: bool,
}

impl OnnxEncoder {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let session = open_session(path.as_ref())?;
        let names = input_names(&session);
        let Some(input) = names.iter().find(|n| n.as_str() != "output_layer").cloned() else {
            bail!("encoder graph has no audio input");
        };
        let takes_layer = names.iter().any(|n| n == "output_layer");
        Ok(Self {
            session,
            input,
            takes_layer,
        })
    }
}

impl FeatureEncoder for OnnxEncoder {
    fn extract(&mut self, waveform: &[f32], output_layer: usize) -> Result<FeatureBatch> {
        let mut inputs: Inputs<'_> = vec![(
            self.input.clone(),
            f32_input(vec![1, waveform.len()], waveform.to_vec())?,
        )];
        if self.takes_layer {
            inputs.push((
                "output_layer".to_string(),
                i64_input(vec![1], vec![output_layer as i64])?,
            ));
        }
        let (shape, data) = run_first_output(&mut self.session, inputs)?;
        let &[1, frames, dim] = shape.as_slice() else {
            bail!("encoder output shape {shape:?}, expected [1, frames, dim]");
        };
        FeatureBatch::new(frames, dim, data)
    }
}

/// Generative vocoder bound by input name.
///
/// Recognised inputs: `phone`/`feats`, `phone_lengths`/`lengths`/`p_len`, `pitch`,
/// `pitchf`, `ds`/`sid`, and the optional noise input `rnd` (`[1, 192, T]`).
pub struct OnnxVocoder {
    session: Session,
    inputs: Vec<String>,
    sample_rate: u32,
    feature_dim: usize,
    rng: StdRng,
}

const NOISE_CHANNELS: usize = 192;

impl OnnxVocoder {
    pub fn open(
        path: impl AsRef<Path>,
        sample_rate: u32,
        feature_dim: usize,
        seed: u64,
    ) -> Result<Self> {
        let session = open_session(path.as_ref())?;
        let inputs = input_names(&session);
        ensure!(
            inputs.iter().any(|n| n == "phone" || n == "feats"),
            "vocoder graph has no phone/feats input (inputs: {inputs:?})"
        );
        Ok(Self {
            session,
            inputs,
            sample_rate,
            feature_dim,
            rng: StdRng::seed_from_u64(seed),
        })
    }

    fn noise(&mut self, len: usize) -> Vec<f32> {
        // Box-Muller; the lower bound keeps ln() finite.
        (0..len)
            .map(|_| {
                let u1: f32 = self.rng.gen_range(f32::EPSILON..1.0);
                let u2: f32 = self.rng.gen_range(0.0..1.0);
                (-2.0 * u1.ln()).sqrt() * (2.0 * std::f32::consts::PI * u2).cos()
            })
            .collect()
    }

    fn run(
        &mut self,
        features: &FeatureBatch,
        pitch: Option<(&[u8], &[f32])>,
        speaker: u32,
    ) -> Result<Vec<f32>> {
        let frames = features.frames();
        let mut inputs: Inputs<'_> = Vec::with_capacity(self.inputs.len());
        for name in self.inputs.clone() {
            let value = match (name.as_str(), pitch) {
                ("phone" | "feats", _) => f32_input(
                    vec![1, frames, features.dim()],
                    features.data().to_vec(),
                )?,
                ("phone_lengths" | "lengths" | "p_len", _) => {
                    i64_input(vec![1], vec![frames as i64])?
                }
                ("pitch", Some((coarse, _))) => {
                    i64_input(vec![1, frames], coarse.iter().map(|&c| i64::from(c)).collect())?
                }
                ("pitchf", Some((_, f0))) => f32_input(vec![1, frames], f0.to_vec())?,
                ("ds" | "sid", _) => i64_input(vec![1], vec![i64::from(speaker)])?,
                ("rnd", _) => {
                    let noise = self.noise(NOISE_CHANNELS * frames);
                    f32_input(vec![1, NOISE_CHANNELS, frames], noise)?
                }
                ("pitch" | "pitchf", None) => {
                    bail!("vocoder graph needs `{name}` but the conversion has no pitch")
                }
                _ => bail!("unrecognised vocoder input `{name}`"),
            };
            inputs.push((name, value));
        }
        let (_, audio) = run_first_output(&mut self.session, inputs)?;
        Ok(audio)
    }
}

impl Vocoder for OnnxVocoder {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn feature_dim(&self) -> usize {
        self.feature_dim
    }

    fn infer(&mut self, features: &FeatureBatch, speaker: u32) -> Result<Vec<f32>> {
        self.run(features, None, speaker)
    }

    fn infer_pitched(
        &mut self,
        features: &FeatureBatch,
        coarse: &[u8],
        f0: &[f32],
        speaker: u32,
    ) -> Result<Vec<f32>> {
        ensure!(
            coarse.len() == features.frames() && f0.len() == features.frames(),
            "pitch curves ({}, {}) do not match {} feature frames",
            coarse.len(),
            f0.len(),
            features.frames()
        );
        self.run(features, Some((coarse, f0)), speaker)
    }
}

/// RMVPE network: `[1, 128, frames]` in, `[1, frames, 360]` out.
pub struct OnnxSalience {
    session: Session,
    input: String,
}

impl OnnxSalience {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let session = open_session(path.as_ref())?;
        let Some(input) = input_names(&session).into_iter().next() else {
            bail!("rmvpe graph has no inputs");
        };
        Ok(Self { session, input })
    }
}

impl SalienceModel for OnnxSalience {
    fn salience(&mut self, mel: &LogMel, frames: usize) -> Result<Vec<f32>> {
        let inputs: Inputs<'_> = vec![(
            self.input.clone(),
            f32_input(vec![1, RMVPE_MEL_BINS, frames], mel.data().to_vec())?,
        )];
        let (shape, data) = run_first_output(&mut self.session, inputs)?;
        ensure!(
            data.len() == frames * RMVPE_SALIENCE_BINS,
            "rmvpe output shape {shape:?}, expected [1, {frames}, {RMVPE_SALIENCE_BINS}]"
        );
        Ok(data)
    }
}
