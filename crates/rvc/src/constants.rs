//! Signal-processing and pipeline constants.

// Analysis front end (every model in the pipeline consumes 16 kHz audio).
pub const SAMPLE_RATE_HZ: u32 = 16_000;
pub const HOP_LENGTH: usize = 160; // 10ms @ 16kHz

// Rumble filter applied before chunk planning and inference.
pub const HIGHPASS_ORDER: usize = 5;
pub const HIGHPASS_CUTOFF_HZ: f64 = 48.0;

// Pitch quantisation.
pub const F0_MIN_HZ: f32 = 50.0;
pub const F0_MAX_HZ: f32 = 1100.0;
pub const F0_COARSE_MIN: u8 = 1;
pub const F0_COARSE_MAX: u8 = 255;

// RMVPE front end and decoder.
pub const RMVPE_MEL_BINS: usize = 128;
pub const RMVPE_N_FFT: usize = 1024;
pub const RMVPE_WINDOW_SIZE: usize = 1024;
pub const RMVPE_N_FREQ: usize = RMVPE_N_FFT / 2 + 1; // 513
pub const RMVPE_MEL_FMIN_HZ: f32 = 30.0;
pub const RMVPE_MEL_FMAX_HZ: f32 = 8000.0;
pub const RMVPE_MEL_CLAMP: f32 = 1e-5;
pub const RMVPE_SALIENCE_BINS: usize = 360;
pub const RMVPE_CENTS_BASE: f32 = 1997.379_4;
pub const RMVPE_CENTS_STEP: f32 = 20.0;
pub const RMVPE_FRAME_MULTIPLE: usize = 32;
pub const RMVPE_CHUNK_FRAMES: usize = 32_000;

// Timbre retrieval.
pub const RETRIEVAL_NEIGHBORS: usize = 8;
pub const RETRIEVAL_DISTANCE_FLOOR: f32 = 1e-6;

// Consonant protection: values at or above this disable it.
pub const PROTECT_DISABLED_AT: f32 = 0.5;

// Output stage.
pub const RMS_FLOOR: f32 = 1e-6;
pub const PEAK_CEILING: f32 = 0.99;
