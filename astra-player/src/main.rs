//! # AstraPlay
//!
//! Headless driver for the playback core: plays a file or URL through libmpv
//! while logging the progress the UI would show, and runs the helper tools.

use anyhow::Result;
use std::path::PathBuf;
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use astra_core::engine::mpv::MpvEngine;
use astra_core::tools::{drive_job, MediaTools, ToolResult};
use astra_core::{
    EngineBackend, PlaybackController, PlayerConfig, PlayerEvent, ProgressIndicator,
};

// ============================================================================
// Command Line
// ============================================================================

#[derive(Debug, Default)]
struct CliOptions {
    input: Option<String>,
    url: Option<String>,
    seconds: u64,
    subtitle: Option<String>,
    screenshot: Option<PathBuf>,
    download: Option<String>,
    media_info: Option<String>,
    config: Option<PathBuf>,
    verbose: bool,
}

fn parse_args(args: &[String]) -> Result<CliOptions> {
    let mut options = CliOptions {
        seconds: 10,
        ..CliOptions::default()
    };

    let value = |i: usize, flag: &str| -> Result<String> {
        args.get(i + 1)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("Missing value for {}", flag))
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--input" | "-i" => {
                options.input = Some(value(i, "--input")?);
                i += 2;
            }
            "--url" | "-u" => {
                options.url = Some(value(i, "--url")?);
                i += 2;
            }
            "--seconds" | "-s" => {
                let raw = value(i, "--seconds")?;
                options.seconds = raw
                    .parse::<u64>()
                    .map_err(|e| anyhow::anyhow!("Invalid duration {}: {}", raw, e))?;
                i += 2;
            }
            "--subtitle" => {
                options.subtitle = Some(value(i, "--subtitle")?);
                i += 2;
            }
            "--screenshot" => {
                options.screenshot = Some(PathBuf::from(value(i, "--screenshot")?));
                i += 2;
            }
            "--download" | "-d" => {
                options.download = Some(value(i, "--download")?);
                i += 2;
            }
            "--media-info" | "-m" => {
                options.media_info = Some(value(i, "--media-info")?);
                i += 2;
            }
            "--config" | "-c" => {
                options.config = Some(PathBuf::from(value(i, "--config")?));
                i += 2;
            }
            "--verbose" | "-v" => {
                options.verbose = true;
                i += 1;
            }
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            _ => {
                i += 1;
            }
        }
    }

    if options.input.is_none()
        && options.url.is_none()
        && options.download.is_none()
        && options.media_info.is_none()
    {
        print_usage();
        anyhow::bail!("Nothing to do");
    }

    Ok(options)
}

fn print_usage() {
    eprintln!(
        "
Usage:
  astra --input <file> [--seconds <n>] [--subtitle <file>] [--screenshot <png>]
  astra --url <url> [--seconds <n>]
  astra --download <url>
  astra --media-info <file>

Options:
  --config <path>   settings file (default: user config dir)
  --verbose         debug logging
"
    );
}

// ============================================================================
// Progress Output
// ============================================================================

/// Stands in for the seek bar and time label.
#[derive(Default)]
struct LogIndicator {
    maximum: i64,
    value: i64,
}

impl ProgressIndicator for LogIndicator {
    fn set_maximum(&mut self, max: i64) {
        self.maximum = max;
        tracing::debug!("Indicator range 0..{}", max);
    }

    fn set_value(&mut self, value: i64) {
        self.value = value;
        tracing::trace!("Indicator at {}/{}", value, self.maximum);
    }

    fn value(&self) -> i64 {
        self.value
    }

    fn set_time_text(&mut self, text: &str) {
        tracing::info!("{}", text);
    }
}

fn log_events(events: Receiver<PlayerEvent>) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        for event in events {
            match event {
                PlayerEvent::EngineError { operation, message } => {
                    tracing::error!("{}: {}", operation, message)
                }
                PlayerEvent::ProcessNotice { command, message } => {
                    tracing::warn!("{}: {}", command, message.trim_end())
                }
                PlayerEvent::DownloadProgress(text) => tracing::info!("{}", text.trim_end()),
                PlayerEvent::DownloadFinished(path) => {
                    tracing::info!("Downloaded {}", path.display())
                }
                PlayerEvent::DownloadError(message) | PlayerEvent::MetadataError(message) => {
                    tracing::error!("{}", message)
                }
                PlayerEvent::SubtitleTracks(tracks) => {
                    for track in tracks {
                        tracing::info!("Subtitle #{}: {}", track.id, track.display_name());
                    }
                }
                other => tracing::debug!("{:?}", other),
            }
        }
    })
}

// ============================================================================
// Main
// ============================================================================

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let options = parse_args(&args)?;

    tracing_subscriber::fmt()
        .with_env_filter(if options.verbose {
            "astra=debug,astra_core=debug"
        } else {
            "astra=info,astra_core=info"
        })
        .init();

    tracing::info!("AstraPlay v{}", astra_core::VERSION);

    let config = match &options.config {
        Some(path) => PlayerConfig::load_from(path)?,
        None => PlayerConfig::load().unwrap_or_else(|e| {
            tracing::warn!("Using default settings: {}", e);
            PlayerConfig::default()
        }),
    };

    let runtime = tokio::runtime::Runtime::new()?;

    if let Some(file) = &options.media_info {
        return print_media_info(&runtime, &config, file);
    }

    let (tx, rx) = std::sync::mpsc::channel();
    let logger = log_events(rx);

    let needs_engine = options.input.is_some() || options.url.is_some();
    let backend = MpvEngine::load().map(|engine| Box::new(engine) as Box<dyn EngineBackend>);
    let controller = PlaybackController::new(
        backend,
        config,
        Box::new(LogIndicator::default()),
        tx,
        runtime.handle().clone(),
    );

    if let Some(url) = &options.download {
        let task = controller.download(url)?;
        match runtime.block_on(task)? {
            ToolResult::Success { path, .. } => println!("{}", path.display()),
            ToolResult::Failure { message } => anyhow::bail!(message),
        }
    }

    if needs_engine {
        play(&controller, &options)?;
    }

    drop(controller);
    let _ = logger.join();
    Ok(())
}

fn play(controller: &Arc<PlaybackController>, options: &CliOptions) -> Result<()> {
    if !controller.is_engine_ready() {
        anyhow::bail!("Playback engine unavailable");
    }

    let loaded = match (&options.input, &options.url) {
        (Some(file), _) => controller.open_file(file)?,
        (None, Some(url)) => controller.load_url(url)?,
        (None, None) => return Ok(()),
    };
    if !loaded.is_done() {
        anyhow::bail!("Nothing to play: {:?}", loaded);
    }

    if let Some(subtitle) = &options.subtitle {
        controller.load_subtitle(subtitle)?;
        controller.subtitle_tracks()?;
    }

    // The poller thread drives the indicator meanwhile.
    thread::sleep(Duration::from_secs(options.seconds));

    if let Some(path) = &options.screenshot {
        controller.screenshot(Some(path))?;
    }

    let session = controller.session();
    tracing::info!(
        "Stopped at {:.1}s of {:.1}s",
        session.position,
        session.duration
    );
    controller.command(&["stop"])?;
    Ok(())
}

fn print_media_info(
    runtime: &tokio::runtime::Runtime,
    config: &PlayerConfig,
    file: &str,
) -> Result<()> {
    let _guard = runtime.enter();
    let supervisor = astra_core::process::ProcessSupervisor::new(runtime.handle().clone());
    let tools = MediaTools::new(config.tools.clone(), supervisor);

    let mut job = tools.start_metadata(Some(file))?;
    let outcome = runtime.block_on(drive_job(&mut job, |_| {}));
    match MediaTools::metadata_result(&outcome, file, job.log()) {
        ToolResult::Success { output, .. } => {
            println!("{}", output);
            Ok(())
        }
        ToolResult::Failure { message } => anyhow::bail!(message),
    }
}
