use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::Parser;
use rvc::audio::{read_wav_file, resample_linear_mono_f32};
use rvc::constants::{HOP_LENGTH, SAMPLE_RATE_HZ};
use rvc::{ChunkPlanner, ConversionConfig, FlatIndex, HighPassFilter, VoicePrintIndex};

#[derive(Debug, Parser)]
#[command(name = "rvc")]
#[command(about = "Retrieval-based voice conversion", long_about = None)]
struct Args {
    /// Source WAV file to convert.
    #[arg(long)]
    input: Option<PathBuf>,

    /// Destination WAV file (32-bit float).
    #[arg(long)]
    output: Option<PathBuf>,

    /// Load a voice-print index and report its size.
    #[arg(long)]
    inspect_index: Option<PathBuf>,

    /// Print the chunk plan for a WAV file without converting it.
    #[arg(long)]
    plan: Option<PathBuf>,

    /// Directory with encoder.onnx / vocoder.onnx / rmvpe.onnx / index.safetensors.
    #[arg(long)]
    model_dir: Option<PathBuf>,

    #[arg(long)]
    encoder: Option<PathBuf>,

    #[arg(long)]
    vocoder: Option<PathBuf>,

    #[arg(long)]
    rmvpe: Option<PathBuf>,

    /// Voice-print index (safetensors with a `vectors` tensor).
    #[arg(long)]
    index: Option<PathBuf>,

    /// Conversion settings (JSON); flags below override it.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Pitch shift in semitones.
    #[arg(long, allow_hyphen_values = true)]
    pitch: Option<i32>,

    #[arg(long)]
    f0_method: Option<String>,

    #[arg(long)]
    index_rate: Option<f32>,

    #[arg(long)]
    protect: Option<f32>,

    #[arg(long)]
    speaker: Option<u32>,

    /// Vocoder output rate in Hz.
    #[arg(long, default_value_t = 40_000)]
    target_rate: u32,

    /// Seed for the vocoder noise input.
    #[arg(long, default_value_t = 0)]
    seed: u64,
}

fn main() -> Result<()> {
    init_tracing()?;
    let args = Args::parse();

    let modes = u32::from(args.input.is_some())
        + u32::from(args.inspect_index.is_some())
        + u32::from(args.plan.is_some());
    if modes != 1 {
        bail!("choose exactly one mode: --input, --inspect-index, or --plan");
    }

    if let Some(path) = &args.inspect_index {
        return inspect_index(path);
    }

    let config = load_config(&args)?;

    if let Some(path) = &args.plan {
        return print_plan(path, &config);
    }

    let output = args
        .output
        .as_ref()
        .context("--input requires --output")?;
    let input = args.input.as_ref().context("--input is required")?;
    run_conversion(&args, &config, input, output)
}

fn init_tracing() -> Result<()> {
    use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

    let _ = tracing_subscriber::registry()
        .with(
            EnvFilter::from_default_env()
                .add_directive("rvc=info".parse().context("parse tracing directive")?),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .try_init();
    Ok(())
}

fn load_config(args: &Args) -> Result<ConversionConfig> {
    let mut config = match &args.config {
        Some(path) => ConversionConfig::from_path(path)?,
        None => ConversionConfig::default(),
    };
    if let Some(shift) = args.pitch {
        config.pitch_shift = shift;
    }
    if let Some(method) = &args.f0_method {
        config.f0_method = method.clone();
    }
    if let Some(rate) = args.index_rate {
        config.index_rate = rate;
    }
    if let Some(protect) = args.protect {
        config.protect = protect;
    }
    if let Some(speaker) = args.speaker {
        config.speaker_id = speaker;
    }
    config.validate()?;
    Ok(config)
}

/// Read a WAV file as mono 16 kHz.
fn read_source(path: &Path) -> Result<Vec<f32>> {
    let wav = read_wav_file(path).with_context(|| format!("read wav {}", path.display()))?;
    tracing::debug!(
        rate = wav.sample_rate_hz,
        channels = wav.channels,
        samples = wav.samples_mono.len(),
        "loaded source"
    );
    Ok(if wav.sample_rate_hz == SAMPLE_RATE_HZ {
        wav.samples_mono
    } else {
        resample_linear_mono_f32(&wav.samples_mono, wav.sample_rate_hz, SAMPLE_RATE_HZ)
    })
}

#[cfg(feature = "onnx")]
fn write_output(path: &Path, samples: &[f32], sample_rate: u32) -> Result<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer = hound::WavWriter::create(path, spec)
        .with_context(|| format!("create {}", path.display()))?;
    for &s in samples {
        writer.write_sample(s).context("write sample")?;
    }
    writer.finalize().context("finalize wav")?;
    Ok(())
}

fn inspect_index(path: &Path) -> Result<()> {
    let index = FlatIndex::open(path).with_context(|| format!("load index {}", path.display()))?;
    eprintln!("index ok: vectors={} dim={}", index.len(), index.dim());
    Ok(())
}

fn print_plan(path: &Path, config: &ConversionConfig) -> Result<()> {
    let audio = read_source(path)?;
    let profile = config.chunking;
    let plan = ChunkPlanner::new(HighPassFilter::speech_default(), &profile)?.plan(&audio);

    let t_pad = profile.t_pad();
    let padded_len = audio.len() + 2 * t_pad;
    let segments = plan.segments(padded_len, padded_len / HOP_LENGTH, t_pad);

    let rate = SAMPLE_RATE_HZ as f32;
    println!(
        "duration={:.2}s cut_points={} segments={}",
        audio.len() as f32 / rate,
        plan.cut_points.len(),
        segments.len()
    );
    for t in &plan.cut_points {
        println!("cut {t} ({:.2}s)", *t as f32 / rate);
    }
    for (i, seg) in segments.iter().enumerate() {
        println!(
            "segment {i}: samples {}..{} frames {}..{}",
            seg.samples.start, seg.samples.end, seg.frames.start, seg.frames.end
        );
    }
    Ok(())
}

#[cfg(not(feature = "onnx"))]
fn run_conversion(_: &Args, _: &ConversionConfig, _: &Path, _: &Path) -> Result<()> {
    bail!("conversion needs ONNX models; rebuild with `--features onnx`")
}

#[cfg(feature = "onnx")]
fn run_conversion(
    args: &Args,
    config: &ConversionConfig,
    input: &Path,
    output: &Path,
) -> Result<()> {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use rvc::onnx::{OnnxEncoder, OnnxSalience, OnnxVocoder};
    use rvc::rmvpe::Rmvpe;
    use rvc::{Models, PitchBackends, PitchMethod, VoiceConverter};

    let params = config.params()?;

    let files = args
        .model_dir
        .as_ref()
        .map(rvc::ModelFiles::from_dir)
        .transpose()?;
    let pick = |flag: &Option<PathBuf>, from_dir: Option<&PathBuf>, name: &str| {
        flag.clone()
            .or_else(|| from_dir.cloned())
            .with_context(|| format!("--{name} (or --model-dir) is required"))
    };
    let encoder_path = pick(&args.encoder, files.as_ref().map(|f| &f.encoder), "encoder")?;
    let vocoder_path = pick(&args.vocoder, files.as_ref().map(|f| &f.vocoder), "vocoder")?;
    let index_path = args
        .index
        .clone()
        .or_else(|| files.as_ref().and_then(|f| f.index.clone()));

    let audio = read_source(input)?;

    let mut encoder = OnnxEncoder::open(&encoder_path)?;
    let mut vocoder = OnnxVocoder::open(
        &vocoder_path,
        args.target_rate,
        params.encoder.expected_dim,
        args.seed,
    )?;

    let needs_rmvpe = params.pitch_guidance
        && matches!(params.pitch.method, PitchMethod::Rmvpe | PitchMethod::RmvpePlus);
    let mut rmvpe = if needs_rmvpe {
        let path = pick(&args.rmvpe, files.as_ref().map(|f| &f.rmvpe), "rmvpe")?;
        Some(Rmvpe::new(OnnxSalience::open(&path)?))
    } else {
        None
    };

    let cancel = Arc::new(AtomicBool::new(false));
    {
        let cancel = Arc::clone(&cancel);
        ctrlc::set_handler(move || {
            cancel.store(true, Ordering::SeqCst);
        })
        .context("install ctrl-c handler")?;
    }

    let mut pitch = PitchBackends::new();
    if let Some(rmvpe) = rmvpe.as_mut() {
        pitch = pitch.with_rmvpe(rmvpe);
    }
    let mut models = Models {
        encoder: &mut encoder,
        vocoder: &mut vocoder,
        pitch,
    };

    let converted = VoiceConverter::new().convert_with_cancel(
        &mut models,
        &audio,
        &params,
        index_path.as_deref(),
        &cancel,
    )?;

    write_output(output, &converted, args.target_rate)?;
    eprintln!(
        "wrote {} ({:.2}s at {} Hz)",
        output.display(),
        converted.len() as f32 / args.target_rate as f32,
        args.target_rate
    );
    Ok(())
}
