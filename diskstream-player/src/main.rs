//! diskstream-player - Main entry point
//!
//! Plays one library track through the system audio device (or the software
//! clock with `--device null`). While playing, stdin accepts:
//! - `p` toggle pause
//! - `s <seconds>` seek
//! - `i` show position
//! - `q` quit

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use diskstream_common::events::{EventBus, PlaybackEvent};
use diskstream_player::audio::{
    AudioBackend, CpalBackend, FolderLibrary, FormatHint, FrameSource, NullBackend, SampleType, TrackId,
};
use diskstream_player::config::PlayerConfig;
use diskstream_player::playback::PlaybackController;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("GIT_HASH"),
    ", ",
    env!("BUILD_PROFILE"),
    ", built ",
    env!("BUILD_TIMESTAMP"),
    ")"
);

/// Command-line arguments for diskstream-player
#[derive(Parser, Debug)]
#[command(name = "diskstream-player")]
#[command(about = "Stream library tracks from disk to an audio device")]
#[command(version, long_version = LONG_VERSION)]
struct Cli {
    /// Configuration file (default: <config dir>/diskstream/config.toml)
    #[arg(short, long, global = true, env = "DISKSTREAM_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Play one track from the library
    Play(PlayArgs),
    /// List audio output devices
    Devices,
}

#[derive(Args, Debug)]
struct PlayArgs {
    /// Track identifier, relative to the library root
    track: String,

    /// Library root folder (overrides DISKSTREAM_LIBRARY and the config file)
    #[arg(short, long)]
    library: Option<PathBuf>,

    /// Output device name ("null" for the software clock)
    #[arg(short, long)]
    device: Option<String>,

    /// Frames per device callback
    #[arg(short, long)]
    frames: Option<u32>,

    /// Preferred device sample rate
    #[arg(long)]
    sample_rate: Option<u32>,

    /// Preferred device channel count
    #[arg(long)]
    channels: Option<u16>,

    /// Preferred device sample format (i16, i32, f32)
    #[arg(long)]
    sample_format: Option<SampleType>,

    /// Print playback events to stdout as JSON lines
    #[arg(long)]
    json_events: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = PlayerConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!(
                    "diskstream_player={level},diskstream_common={level}",
                    level = config.logging.level
                )
                .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    info!("diskstream-player {}", LONG_VERSION);

    match cli.command {
        Command::Devices => list_devices(),
        Command::Play(args) => play(args, config).await,
    }
}

fn list_devices() -> Result<()> {
    let devices = CpalBackend::list_devices().context("Failed to enumerate audio devices")?;
    let default = CpalBackend::default_device_name();

    for name in devices {
        let marker = if default.as_deref() == Some(name.as_str()) { " (default)" } else { "" };
        println!("{}{}", name, marker);
    }
    println!("null (software clock)");
    Ok(())
}

async fn play(args: PlayArgs, mut config: PlayerConfig) -> Result<()> {
    if args.device.is_some() {
        config.output.device = args.device.clone();
    }
    if let Some(frames) = args.frames {
        config.output.frames_per_buffer = frames.max(1);
    }

    let config_hint = config.output.format_hint()?;
    let hint = FormatHint {
        sample_rate: args.sample_rate.or(config_hint.sample_rate),
        channels: args.channels.or(config_hint.channels),
        sample_type: args.sample_format.or(config_hint.sample_type),
        layout: None,
    };

    let library_root = config.library_root(args.library.as_deref());
    info!("Library root: {}", library_root.display());

    let session = PlaySession {
        library_root,
        track: TrackId::new(args.track),
        hint,
        frames_per_buffer: config.output.frames_per_buffer,
        json_events: args.json_events,
    };

    if config.output.is_null_device() {
        session.run(NullBackend::flexible()).await
    } else {
        session.run(CpalBackend::new(config.output.device.clone())).await
    }
}

struct PlaySession {
    library_root: PathBuf,
    track: TrackId,
    hint: FormatHint,
    frames_per_buffer: u32,
    json_events: bool,
}

impl PlaySession {
    async fn run<B: AudioBackend>(self, backend: B) -> Result<()> {
        let source = FrameSource::new(FolderLibrary::new(&self.library_root));
        let mut controller = PlaybackController::new(source, backend, EventBus::new(256))
            .with_format_hint(self.hint)
            .with_frames_per_buffer(Some(self.frames_per_buffer));

        let mut events = controller.subscribe();

        let format = controller
            .select_track(&self.track)
            .with_context(|| format!("Failed to open track {}", self.track))?;
        controller.play().context("Failed to start playback")?;

        match controller.duration() {
            Some(duration) => info!("Playing {} ({}, {:.1}s)", self.track, format, duration.as_secs_f64()),
            None => info!("Playing {} ({})", self.track, format),
        }

        let shutdown = shutdown_signal();
        tokio::pin!(shutdown);

        let mut stdin = BufReader::new(tokio::io::stdin()).lines();
        let mut stdin_open = true;

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                event = events.recv() => match event {
                    Ok(event) => {
                        if self.json_events {
                            println!("{}", event.to_json_line());
                        }
                        match event {
                            PlaybackEvent::EndOfTrack { .. } => {
                                info!("End of track");
                                break;
                            }
                            PlaybackEvent::SourceError { message, .. } => {
                                warn!("Playback halted: {}", message);
                            }
                            PlaybackEvent::DeviceError { message, .. } => {
                                warn!("Audio device error: {}", message);
                            }
                            _ => {}
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => warn!("Missed {} playback events", skipped),
                    Err(RecvError::Closed) => break,
                },
                line = stdin.next_line(), if stdin_open => match line {
                    Ok(Some(line)) => {
                        if !handle_command(&mut controller, line.trim()) {
                            break;
                        }
                    }
                    Ok(None) | Err(_) => stdin_open = false,
                },
            }
        }

        controller.stop().context("Failed to stop playback")?;

        let stats = controller.stats();
        info!(
            "Delivered {} frames in {} callbacks ({} silent, {} contended)",
            stats.frames_delivered, stats.callbacks, stats.silent_frames, stats.contended
        );
        Ok(())
    }
}

/// Apply one stdin command; false means quit
fn handle_command<B: AudioBackend>(controller: &mut PlaybackController<B>, line: &str) -> bool {
    let mut parts = line.split_whitespace();
    let result = match parts.next() {
        None | Some("p") | Some("pause") => controller.toggle(),
        Some("q") | Some("quit") => return false,
        Some("i") | Some("info") => {
            let position = controller.position().unwrap_or_default();
            println!(
                "{} {:.1}s [{}]",
                controller.current_track().map(|t| t.to_string()).unwrap_or_default(),
                position.as_secs_f64(),
                controller.state()
            );
            Ok(())
        }
        Some("s") | Some("seek") => match parts.next().map(str::parse::<f64>) {
            Some(Ok(secs)) if secs.is_finite() && secs >= 0.0 => {
                controller.seek(Duration::from_secs_f64(secs))
            }
            _ => {
                warn!("usage: s <seconds>");
                Ok(())
            }
        },
        Some(other) => {
            warn!("Unknown command '{}' (p, s <seconds>, i, q)", other);
            Ok(())
        }
    };

    if let Err(e) = result {
        warn!("{}", e);
    }
    true
}

/// Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
