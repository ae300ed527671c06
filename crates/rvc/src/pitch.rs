//! Pitch analysis: back-end dispatch, corrections and quantisation.
//!
//! One F0 curve is estimated over the whole padded input (10 ms frames), then
//! optionally snapped toward a note grid, transposed, and quantised into the
//! 1..=255 conditioning code the vocoder consumes.

use std::fmt;
use std::str::FromStr;

use tracing::debug;

use crate::constants::{F0_COARSE_MAX, F0_COARSE_MIN};
use crate::error::ConversionError;

/// Pitch back-end selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PitchMethod {
    Crepe,
    CrepeTiny,
    Fcpe,
    Rmvpe,
    RmvpePlus,
}

impl PitchMethod {
    pub const ALL: [PitchMethod; 5] = [
        PitchMethod::Crepe,
        PitchMethod::CrepeTiny,
        PitchMethod::Fcpe,
        PitchMethod::Rmvpe,
        PitchMethod::RmvpePlus,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            PitchMethod::Crepe => "crepe",
            PitchMethod::CrepeTiny => "crepe-tiny",
            PitchMethod::Fcpe => "fcpe",
            PitchMethod::Rmvpe => "rmvpe",
            PitchMethod::RmvpePlus => "rmvpe+",
        }
    }
}

impl fmt::Display for PitchMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PitchMethod {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PitchMethod::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| ConversionError::UnsupportedMethod(s.to_string()))
    }
}

/// Input handed to a pitch back-end.
#[derive(Debug, Clone, Copy)]
pub struct F0Request<'a> {
    /// 16 kHz audio.
    pub waveform: &'a [f32],
    pub f0_min: f32,
    pub f0_max: f32,
    /// Frames the caller needs; back-ends may return a few more or fewer.
    pub frame_count: usize,
    pub method: PitchMethod,
}

/// A pitch back-end producing one F0 value (Hz, 0 = unvoiced) per 10 ms frame.
pub trait PitchEstimator {
    fn estimate(&mut self, request: &F0Request<'_>) -> anyhow::Result<Vec<f32>>;
}

/// The caller's pitch back-ends, one slot per family.
#[derive(Default)]
pub struct PitchBackends<'a> {
    crepe: Option<&'a mut dyn PitchEstimator>,
    fcpe: Option<&'a mut dyn PitchEstimator>,
    rmvpe: Option<&'a mut dyn PitchEstimator>,
}

impl<'a> PitchBackends<'a> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Serves both `crepe` and `crepe-tiny`; the request carries the variant.
    #[must_use]
    pub fn with_crepe(mut self, estimator: &'a mut dyn PitchEstimator) -> Self {
        self.crepe = Some(estimator);
        self
    }

    #[must_use]
    pub fn with_fcpe(mut self, estimator: &'a mut dyn PitchEstimator) -> Self {
        self.fcpe = Some(estimator);
        self
    }

    /// Serves both `rmvpe` and `rmvpe+`.
    #[must_use]
    pub fn with_rmvpe(mut self, estimator: &'a mut dyn PitchEstimator) -> Self {
        self.rmvpe = Some(estimator);
        self
    }

    #[must_use]
    pub fn supports(&self, method: PitchMethod) -> bool {
        match method {
            PitchMethod::Crepe | PitchMethod::CrepeTiny => self.crepe.is_some(),
            PitchMethod::Fcpe => self.fcpe.is_some(),
            PitchMethod::Rmvpe | PitchMethod::RmvpePlus => self.rmvpe.is_some(),
        }
    }

    fn get(&mut self, method: PitchMethod) -> Option<&mut (dyn PitchEstimator + 'a)> {
        match method {
            PitchMethod::Crepe | PitchMethod::CrepeTiny => self.crepe.as_deref_mut(),
            PitchMethod::Fcpe => self.fcpe.as_deref_mut(),
            PitchMethod::Rmvpe | PitchMethod::RmvpePlus => self.rmvpe.as_deref_mut(),
        }
    }
}

impl fmt::Debug for PitchBackends<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PitchBackends")
            .field("crepe", &self.crepe.is_some())
            .field("fcpe", &self.fcpe.is_some())
            .field("rmvpe", &self.rmvpe.is_some())
            .finish()
    }
}

/// Pulls voiced F0 values toward musical notes.
pub trait AutoTune {
    /// `strength` in [0, 1]: 0 leaves the curve alone, 1 snaps to the note.
    fn autotune(&self, f0: &mut [f32], strength: f32);
}

/// Picks a transposition (semitones) from the analysed curve.
pub trait AutoPitch {
    fn semitone_offset(&self, f0: &[f32], threshold_hz: f32) -> i32;
}

/// Equal-tempered notes from G1 to C6.
#[derive(Debug, Clone)]
pub struct NoteGridAutoTune {
    notes: Vec<f32>,
}

impl Default for NoteGridAutoTune {
    fn default() -> Self {
        // MIDI 31 (G1, 49 Hz) ..= 84 (C6, 1046.5 Hz)
        let notes = (31..=84)
            .map(|n: i32| 440.0 * 2f32.powf((n - 69) as f32 / 12.0))
            .collect();
        Self { notes }
    }
}

impl NoteGridAutoTune {
    #[must_use]
    pub fn notes(&self) -> &[f32] {
        &self.notes
    }

    fn nearest(&self, freq: f32) -> f32 {
        self.notes
            .iter()
            .copied()
            .min_by(|a, b| (a - freq).abs().total_cmp(&(b - freq).abs()))
            .unwrap_or(freq)
    }
}

impl AutoTune for NoteGridAutoTune {
    fn autotune(&self, f0: &mut [f32], strength: f32) {
        let strength = strength.clamp(0.0, 1.0);
        for v in f0.iter_mut().filter(|v| **v > 0.0) {
            let note = self.nearest(*v);
            *v += (note - *v) * strength;
        }
    }
}

/// Shift so the mean voiced pitch lands on the threshold, within `±limit`.
#[derive(Debug, Clone, Copy)]
pub struct MeanVoicedAutoPitch {
    pub limit: i32,
}

impl Default for MeanVoicedAutoPitch {
    fn default() -> Self {
        Self { limit: 12 }
    }
}

impl AutoPitch for MeanVoicedAutoPitch {
    fn semitone_offset(&self, f0: &[f32], threshold_hz: f32) -> i32 {
        let (sum, count) = f0
            .iter()
            .filter(|v| **v > 0.0)
            .fold((0.0f64, 0usize), |(s, c), &v| (s + f64::from(v), c + 1));
        if count == 0 || threshold_hz <= 0.0 {
            return 0;
        }
        let mean = sum / count as f64;
        let shift = (12.0 * (f64::from(threshold_hz) / mean).log2()).round() as i32;
        shift.clamp(-self.limit, self.limit)
    }
}

/// Per-call pitch parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PitchSettings {
    /// Manual transposition in semitones.
    pub shift: i32,
    pub f0_min: f32,
    pub f0_max: f32,
    pub method: PitchMethod,
    /// Auto-tune strength, if enabled.
    pub autotune: Option<f32>,
    /// Auto-pitch target in Hz, if enabled.
    pub autopitch: Option<f32>,
}

/// Quantised and continuous pitch, both exactly one value per frame.
#[derive(Debug, Clone, PartialEq)]
pub struct PitchCurves {
    pub coarse: Vec<u8>,
    pub f0: Vec<f32>,
}

impl PitchCurves {
    #[must_use]
    pub fn len(&self) -> usize {
        self.f0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.f0.is_empty()
    }
}

/// Back-end dispatch plus the optional corrections.
pub struct PitchAnalyzer {
    autotune: Box<dyn AutoTune>,
    autopitch: Box<dyn AutoPitch>,
}

impl Default for PitchAnalyzer {
    fn default() -> Self {
        Self {
            autotune: Box::new(NoteGridAutoTune::default()),
            autopitch: Box::new(MeanVoicedAutoPitch::default()),
        }
    }
}

impl fmt::Debug for PitchAnalyzer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PitchAnalyzer").finish_non_exhaustive()
    }
}

impl PitchAnalyzer {
    #[must_use]
    pub fn with_autotune(mut self, autotune: Box<dyn AutoTune>) -> Self {
        self.autotune = autotune;
        self
    }

    #[must_use]
    pub fn with_autopitch(mut self, autopitch: Box<dyn AutoPitch>) -> Self {
        self.autopitch = autopitch;
        self
    }

    pub fn analyze(
        &self,
        backends: &mut PitchBackends<'_>,
        waveform: &[f32],
        frame_count: usize,
        settings: &PitchSettings,
    ) -> Result<PitchCurves, ConversionError> {
        let method = settings.method;
        let estimator = backends
            .get(method)
            .ok_or_else(|| ConversionError::UnsupportedMethod(method.to_string()))?;

        let request = F0Request {
            waveform,
            f0_min: settings.f0_min,
            f0_max: settings.f0_max,
            frame_count,
            method,
        };
        let mut f0 = estimator
            .estimate(&request)
            .map_err(|e| ConversionError::inference("pitch estimation", e))?;
        if f0.is_empty() {
            return Err(ConversionError::UnsupportedMethod(method.to_string()));
        }
        f0.resize(frame_count, 0.0);

        if let Some(strength) = settings.autotune {
            self.autotune.autotune(&mut f0, strength);
        }

        let mut shift = settings.shift;
        if let Some(threshold) = settings.autopitch {
            let offset = self.autopitch.semitone_offset(&f0, threshold);
            debug!(offset, threshold, "auto-pitch");
            shift += offset;
        }

        if shift != 0 {
            let factor = 2f32.powf(shift as f32 / 12.0);
            for v in &mut f0 {
                *v *= factor;
            }
        }

        let coarse = quantize_f0(&f0, settings.f0_min, settings.f0_max);
        Ok(PitchCurves { coarse, f0 })
    }
}

/// Mel-scale F0 quantisation into `1..=255`.
///
/// Unvoiced (0 Hz) frames map to 1; values outside the range clip.
#[must_use]
pub fn quantize_f0(f0: &[f32], f0_min: f32, f0_max: f32) -> Vec<u8> {
    let to_mel = |f: f32| 1127.0 * (1.0 + f / 700.0).ln();
    let mel_min = to_mel(f0_min);
    let mel_max = to_mel(f0_max);
    let span = mel_max - mel_min;

    f0.iter()
        .map(|&f| {
            let mut mel = to_mel(f);
            if mel > 0.0 {
                mel = (mel - mel_min) * 254.0 / span + 1.0;
            }
            if mel.is_nan() || mel <= f32::from(F0_COARSE_MIN) {
                F0_COARSE_MIN
            } else if mel > f32::from(F0_COARSE_MAX) {
                F0_COARSE_MAX
            } else {
                mel.round_ties_even() as u8
            }
        })
        .collect()
}
