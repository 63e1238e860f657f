//! Manual-testing command-line harness for the capture engine.
//!
//! Grounded on the teacher's `cli.rs` dispatch (a handful of subcommands over
//! one config, each delegating straight into the core crate) but expressed
//! with `clap`'s derive API — already declared in the teacher's own
//! `Cargo.toml`, just unused by its hand-rolled `match` on `args[1]`.

use std::sync::Arc;

use capture_engine_core::capture_session::NoopToneRequester;
use capture_engine_core::cleanup::CleanupCollaborators;
use capture_engine_core::config::EngineConfig;
use capture_engine_core::domain::{BotId, CaptureMode};
use capture_engine_core::events::SessionEvent;
use capture_engine_core::streaming_sink::NullSink;
use capture_engine_core::{logging, Engine, Result, UserOutput};
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "capture-engine", about = "Manual test harness for the recording and sync core")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Root directory for temp/out/chunks/screenshots (defaults to a temp dir).
    #[arg(long, global = true)]
    root_dir: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Starts a capture session for the given bot id and waits for it to stop.
    Start {
        bot_id: String,
        #[arg(long, value_enum, default_value = "audio-video")]
        mode: ModeArg,
        /// Seconds to wait before issuing `stop()` automatically. Omit to wait for Ctrl-C.
        #[arg(long)]
        duration_secs: Option<u64>,
    },
}

#[derive(Clone, clap::ValueEnum)]
enum ModeArg {
    AudioOnly,
    AudioVideo,
}

impl From<ModeArg> for CaptureMode {
    fn from(m: ModeArg) -> Self {
        match m {
            ModeArg::AudioOnly => CaptureMode::AudioOnly,
            ModeArg::AudioVideo => CaptureMode::AudioVideo,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    if let Err(e) = logging::init_logging(None, true, true) {
        eprintln!("warning: failed to initialize logging: {e}");
    }

    let cli = Cli::parse();
    let output = UserOutput::new();

    match cli.command {
        Command::Start { bot_id, mode, duration_secs } => {
            run_start(&output, cli.root_dir, bot_id, mode.into(), duration_secs).await
        }
    }
}

async fn run_start(
    output: &UserOutput,
    root_dir: Option<String>,
    bot_id: String,
    mode: CaptureMode,
    duration_secs: Option<u64>,
) -> Result<()> {
    let root_dir = root_dir.unwrap_or_else(|| {
        std::env::temp_dir().join(format!("capture-engine-{bot_id}")).to_string_lossy().into_owned()
    });
    let config = EngineConfig::new(root_dir, mode);

    let (engine, mut events) = Engine::new(
        config,
        Arc::new(NullSink),
        Arc::new(NoopToneRequester),
        CleanupCollaborators::default(),
    );

    output.progress(1, 3, format!("starting capture for bot '{bot_id}' in {mode} mode"));
    engine.start(BotId::new(bot_id)).await?;

    let event_task = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                SessionEvent::Started { output_path, is_audio_only } => {
                    tracing::info!(?output_path, is_audio_only, "capture started");
                }
                SessionEvent::Stopped => {
                    tracing::info!("capture stopped");
                    break;
                }
                SessionEvent::Error { kind, cause } => {
                    tracing::error!(kind, cause, "capture session error");
                }
            }
        }
    });

    output.progress(2, 3, "recording (Ctrl-C or --duration-secs to stop)");
    match duration_secs {
        Some(secs) => tokio::time::sleep(std::time::Duration::from_secs(secs)).await,
        None => {
            let _ = tokio::signal::ctrl_c().await;
        }
    }

    output.progress(3, 3, "stopping and running cleanup");
    engine.shutdown().await?;
    let _ = event_task.await;

    output.success("done");
    Ok(())
}
