//! FrameLock command line player
//!
//! Usage:
//!   framelock devices                 - List output devices
//!   framelock play <file.pcm> [opts]  - Play raw PCM against a video clock

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use fl_audio::{CpalBackend, FileClipStore, PcmFormat, list_output_devices};
use fl_core::{FrameBounds, LoopMode, StopPolicy, Ticks, Verdict};
use fl_engine::{ClipInfo, EngineSettings, PlaybackSession, StopReason};

const CLIP_ID: i64 = 1;

#[derive(Parser)]
#[command(name = "framelock", about = "Frame-accurate audio/video playback sync")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List output devices
    Devices {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Play a headerless PCM file in sync with a virtual video clip
    Play(PlayArgs),
}

#[derive(clap::Args)]
struct PlayArgs {
    /// Raw interleaved PCM file
    path: PathBuf,

    /// Source sample rate (Hz)
    #[arg(long, default_value_t = 48000)]
    rate: u32,

    #[arg(long, default_value_t = 2)]
    channels: u16,

    /// Bits per sample: 8, 16, 24 or 32
    #[arg(long, default_value_t = 16)]
    bits: u16,

    /// Samples are unsigned
    #[arg(long)]
    unsigned: bool,

    /// Samples are big-endian
    #[arg(long)]
    big_endian: bool,

    /// Video frame rate; negative plays in reverse
    #[arg(long, default_value_t = 25.0, allow_hyphen_values = true)]
    fps: f64,

    /// Video frames in the clip (default: as long as the audio)
    #[arg(long)]
    frames: Option<i64>,

    /// none, forward or pingpong
    #[arg(long, default_value = "none")]
    loop_mode: LoopMode,

    /// Play only frames FIRST..=LAST
    #[arg(long, num_args = 2, value_names = ["FIRST", "LAST"])]
    select: Option<Vec<i64>>,

    /// Output device name (default: host default)
    #[arg(short, long)]
    device: Option<String>,

    /// Engine settings JSON
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(long)]
    output_rate: Option<u32>,

    #[arg(long)]
    output_channels: Option<u16>,

    /// Stop when the audio ends instead of the video
    #[arg(long)]
    stop_on_audio_end: bool,

    /// Show every frame instead of skipping late ones
    #[arg(long)]
    no_frame_drop: bool,

    /// Master output volume (1.0 = unity)
    #[arg(long)]
    volume: Option<f32>,

    /// Start muted; audio still tracks the video
    #[arg(long)]
    mute: bool,

    /// Record device output to this file (16-bit PCM at the output rate)
    #[arg(long)]
    record: Option<PathBuf>,

    /// Stop after this many seconds
    #[arg(long)]
    seconds: Option<f64>,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Devices { json } => list_devices(json),
        Commands::Play(args) => play(args),
    }
}

fn list_devices(json: bool) -> Result<()> {
    let devices = list_output_devices().context("Failed to enumerate output devices")?;
    if json {
        println!("{}", serde_json::to_string_pretty(&devices)?);
        return Ok(());
    }
    if devices.is_empty() {
        println!("No output devices");
    }
    for device in devices {
        let marker = if device.is_default { "*" } else { " " };
        println!("{} {} (up to {} ch f32)", marker, device.name, device.max_channels());
        for range in &device.ranges {
            println!("      {} ch  {}-{} Hz", range.channels, range.min_rate, range.max_rate);
        }
    }
    Ok(())
}

fn settings_for(args: &PlayArgs) -> Result<EngineSettings> {
    let mut settings = match &args.config {
        Some(path) => EngineSettings::load(path).with_context(|| format!("Failed to load {}", path.display()))?,
        None => EngineSettings::default(),
    };
    if args.device.is_some() {
        settings.device = args.device.clone();
    }
    if let Some(rate) = args.output_rate {
        settings.output_rate = rate;
    }
    if let Some(channels) = args.output_channels {
        settings.output_channels = channels;
    }
    if args.stop_on_audio_end {
        settings.stop_policy = StopPolicy::OnAudioEnd;
    }
    if args.no_frame_drop {
        settings.no_frame_drop = true;
    }
    if let Some(volume) = args.volume {
        settings.master_volume = volume;
    }
    settings.validate()?;
    Ok(settings)
}

/// Warn when the chosen device lists no matching f32 config
fn warn_if_unplayable(settings: &EngineSettings) {
    let Ok(devices) = list_output_devices() else {
        return;
    };
    let spec = settings.output_spec();
    let chosen = devices.iter().find(|d| match &settings.device {
        Some(name) => &d.name == name,
        None => d.is_default,
    });
    if let Some(device) = chosen
        && !device.can_play(&spec)
    {
        log::warn!(
            "{} lists no f32 config for {} ch at {} Hz",
            device.name,
            spec.channels,
            spec.sample_rate
        );
    }
}

fn play(args: PlayArgs) -> Result<()> {
    if args.fps == 0.0 || !args.fps.is_finite() {
        bail!("--fps must be a non-zero number");
    }
    let settings = settings_for(&args)?;
    let audio = PcmFormat::new(args.rate, args.channels, args.bits)?
        .with_signed(!args.unsigned)
        .with_big_endian(args.big_endian);

    let audio_len = fs::metadata(&args.path)
        .with_context(|| format!("Cannot read {}", args.path.display()))?
        .len();
    let frames = args
        .frames
        .unwrap_or_else(|| ((audio_len as f64 / audio.bytes_per_second()) * args.fps.abs()).floor() as i64)
        .max(1);

    let store = FileClipStore::new();
    store.insert(CLIP_ID, &args.path);

    let info = ClipInfo {
        clip: CLIP_ID,
        audio,
        audio_len,
        fps: args.fps,
        frames,
        loop_mode: args.loop_mode,
    };
    warn_if_unplayable(&settings);
    let backend = CpalBackend::new(settings.device.clone());
    let mut session = PlaybackSession::start(settings.clone(), backend, Arc::new(store), info)?;

    if let Some(select) = &args.select {
        let bounds = FrameBounds::new(select[0], select[1])?;
        session.set_selection(Some(bounds))?;
    }
    if args.mute {
        session.set_mute(true)?;
    }
    if let Some(path) = &args.record {
        let file = File::create(path).with_context(|| format!("Cannot create {}", path.display()))?;
        let format = PcmFormat::s16le(settings.output_rate, settings.output_channels);
        session.start_recording(Box::new(BufWriter::new(file)), format)?;
        log::info!("Recording to {}", path.display());
    }

    let period = Duration::from_secs_f64(Ticks::frame_period(args.fps).to_seconds());
    let deadline = args.seconds.map(|s| Instant::now() + Duration::from_secs_f64(s.max(0.0)));
    let mut last_frame = session.current_frame();
    let mut last_report = Instant::now();

    loop {
        std::thread::sleep(period);
        if deadline.is_some_and(|d| Instant::now() >= d) {
            session.request_stop(StopReason::User)?;
            break;
        }

        let step = match session.tick() {
            Ok(step) => step,
            Err(e) if e.is_backend_failure() => {
                log::error!("{}", e);
                break;
            }
            Err(e) => return Err(e.into()),
        };
        if step.verdict != Verdict::Continue {
            break;
        }
        if step.frame != last_frame {
            log::debug!("frame {}", step.frame);
            last_frame = step.frame;
        }
        if last_report.elapsed() >= Duration::from_secs(1) {
            log::info!(
                "frame {} / {}, audio {:.3}s, fps {}",
                step.frame,
                frames,
                session.current_seek_seconds(),
                session.fps()
            );
            last_report = Instant::now();
        }
    }

    let report = session.finish();
    println!("{}", serde_json::to_string_pretty(&report)?);
    if let Some(error) = &report.recording_error {
        bail!("Recording is unusable: {}", error);
    }
    Ok(())
}
