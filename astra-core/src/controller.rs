//! # Playback Controller
//!
//! Composition root of the playback core. Owns the engine bridge, the
//! transform state, the synchronizer (and its poller thread) and the helper
//! tools, and exposes the operations the UI layer calls.
//!
//! Every operation returns `Result<Outcome<T>, EngineError>`:
//! - validation failures are resolved here: nothing is sent to the engine and
//!   the operation reports `Outcome::Skipped`
//! - engine failures are reported upward according to the [`ErrorPolicy`] and
//!   returned; the controller stays usable for the next call
//!
//! Lock order: `sync` before `indicator`. The engine lock is internal to the
//! bridge and always innermost.

use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::capture;
use crate::config::{ErrorPolicy, PlayerConfig};
use crate::engine::tracks::TrackInfo;
use crate::engine::{EngineBackend, EngineBridge, PropertyFormat, PropertyValue, SurfaceId};
use crate::error::{ControlError, ControlResult, EngineError, ValidationError};
use crate::process::{JobEvent, ProcessSupervisor};
use crate::subtitles::{self, SubtitleFont};
use crate::sync::{
    FrameStep, PlaybackSession, PlaybackSynchronizer, Poller, ProgressIndicator, SyncState,
};
use crate::tools::{drive_job, MediaTools, ToolResult};
use crate::transform::{PanDirection, TransformState};

const VOLUME_MAX: i64 = 100;

/// Result of an operation that reached a decision without an engine error.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T = ()> {
    Done(T),
    /// A precondition failed; nothing was sent to the engine
    Skipped(ValidationError),
}

impl<T> Outcome<T> {
    pub fn is_done(&self) -> bool {
        matches!(self, Outcome::Done(_))
    }

    pub fn done(self) -> Option<T> {
        match self {
            Outcome::Done(v) => Some(v),
            Outcome::Skipped(_) => None,
        }
    }
}

pub type OpResult<T = ()> = Result<Outcome<T>, EngineError>;

/// Notifications for the UI layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PlayerEvent {
    PlaybackStateChanged { playing: bool },
    MuteChanged { muted: bool },
    EngineError { operation: String, message: String },
    DownloadStarted { url: String },
    DownloadProgress(String),
    DownloadFinished(PathBuf),
    DownloadError(String),
    /// A helper wrote something to stderr the user should see
    ProcessNotice { command: String, message: String },
    MetadataReady(String),
    MetadataError(String),
    SubtitleTracks(Vec<TrackInfo>),
    SubtitleFont(SubtitleFont),
}

pub struct PlaybackController {
    engine: EngineBridge,
    transform: Mutex<TransformState>,
    sync: Mutex<PlaybackSynchronizer>,
    indicator: Mutex<Box<dyn ProgressIndicator>>,
    events: Mutex<Sender<PlayerEvent>>,
    current_media: Mutex<Option<String>>,
    error_policy: ErrorPolicy,
    tools: MediaTools,
    poller: Mutex<Option<Poller>>,
}

impl PlaybackController {
    /// Start the engine and the synchronizer poller.
    ///
    /// A backend that failed to load or start is reported once and leaves the
    /// controller with a detached bridge: every later engine call fails fast
    /// with `EngineError::NotInitialized`.
    pub fn new(
        backend: Result<Box<dyn EngineBackend>, EngineError>,
        config: PlayerConfig,
        indicator: Box<dyn ProgressIndicator>,
        events: Sender<PlayerEvent>,
        runtime: Handle,
    ) -> Arc<Self> {
        let started = backend.and_then(|b| EngineBridge::initialize(b, &config.engine));
        let (engine, init_error) = match started {
            Ok(engine) => (engine, None),
            Err(e) => (EngineBridge::detached(), Some(e)),
        };

        let controller = Arc::new(Self {
            engine,
            transform: Mutex::new(TransformState::new()),
            sync: Mutex::new(PlaybackSynchronizer::new()),
            indicator: Mutex::new(indicator),
            events: Mutex::new(events),
            current_media: Mutex::new(None),
            error_policy: config.error_policy,
            tools: MediaTools::new(config.tools.clone(), ProcessSupervisor::new(runtime)),
            poller: Mutex::new(None),
        });

        if let Some(e) = &init_error {
            controller.report_engine_error("initialize", e);
        }

        // No engine, nothing to poll.
        let interval = config.poll_interval().filter(|_| init_error.is_none());
        if let Some(interval) = interval {
            let tick = |c: &PlaybackController| {
                let _ = c.tick();
            };
            match Poller::spawn(Arc::downgrade(&controller), interval, tick) {
                Ok(poller) => *controller.poller.lock() = Some(poller),
                Err(e) => tracing::warn!("Synchronizer poller not started: {}", e),
            }
        }

        controller
    }

    // ========================================================================
    // Plumbing
    // ========================================================================

    fn emit(&self, event: PlayerEvent) {
        if self.events.lock().send(event).is_err() {
            tracing::debug!("Event receiver gone");
        }
    }

    fn report_engine_error(&self, operation: &str, error: &EngineError) {
        tracing::warn!("{} failed: {}", operation, error);
        if self.error_policy == ErrorPolicy::Notify {
            self.emit(PlayerEvent::EngineError {
                operation: operation.to_string(),
                message: error.to_string(),
            });
        }
    }

    fn settle<T>(&self, operation: &str, result: ControlResult<T>) -> OpResult<T> {
        match result {
            Ok(v) => Ok(Outcome::Done(v)),
            Err(ControlError::Validation(v)) => {
                tracing::debug!("{} skipped: {}", operation, v);
                Ok(Outcome::Skipped(v))
            }
            Err(ControlError::Engine(e)) => {
                self.report_engine_error(operation, &e);
                Err(e)
            }
        }
    }

    pub fn engine(&self) -> &EngineBridge {
        &self.engine
    }

    pub fn is_engine_ready(&self) -> bool {
        self.engine.is_initialized()
    }

    pub fn current_media(&self) -> Option<String> {
        self.current_media.lock().clone()
    }

    pub fn sync_state(&self) -> SyncState {
        self.sync.lock().state()
    }

    pub fn session(&self) -> PlaybackSession {
        self.sync.lock().session().clone()
    }

    pub fn transform(&self) -> TransformState {
        self.transform.lock().clone()
    }

    /// Stop the background poller. Ticks can still be driven with `tick()`.
    pub fn stop_polling(&self) {
        if let Some(poller) = self.poller.lock().take() {
            poller.stop();
        }
    }

    // ========================================================================
    // Output surface and raw access
    // ========================================================================

    pub fn bind_output_surface(&self, surface: SurfaceId) -> OpResult {
        let result = self.engine.bind_output_surface(surface).map_err(Into::into);
        self.settle("bind output surface", result)
    }

    pub fn command(&self, args: &[&str]) -> OpResult {
        self.settle("command", self.engine.send_command(args).map_err(Into::into))
    }

    pub fn get_property(&self, name: &str, format: PropertyFormat) -> OpResult<PropertyValue> {
        self.settle("get property", self.engine.get_property(name, format).map_err(Into::into))
    }

    pub fn set_property(&self, name: &str, value: PropertyValue) -> OpResult {
        self.settle("set property", self.engine.set_property(name, value).map_err(Into::into))
    }

    // ========================================================================
    // Loading and basic playback
    // ========================================================================

    fn load(&self, operation: &str, target: &str, empty: ValidationError) -> OpResult {
        let target = target.trim();
        let mut loaded = false;
        let result = (|| -> ControlResult {
            if target.is_empty() {
                return Err(empty.into());
            }
            self.engine.send_command(&["loadfile", target])?;
            *self.current_media.lock() = Some(target.to_string());
            loaded = true;
            tracing::info!("Loaded {}", target);

            let mut sync = self.sync.lock();
            let mut indicator = self.indicator.lock();
            sync.media_loaded(&self.engine, &mut **indicator)
        })();

        let outcome = self.settle(operation, result);
        if loaded {
            self.emit(PlayerEvent::PlaybackStateChanged { playing: true });
        }
        outcome
    }

    pub fn open_file(&self, path: &str) -> OpResult {
        self.load("open file", path, ValidationError::EmptyMediaPath)
    }

    pub fn load_url(&self, url: &str) -> OpResult {
        self.load("load url", url, ValidationError::EmptyUrl)
    }

    /// Returns whether playback is now running.
    pub fn toggle_play_pause(&self) -> OpResult<bool> {
        let result = (|| -> ControlResult<bool> {
            let paused = self.engine.get_flag("pause")?;
            self.engine.set_property("pause", !paused)?;
            Ok(paused)
        })();
        let outcome = self.settle("play/pause", result)?;
        if let Outcome::Done(playing) = outcome {
            self.emit(PlayerEvent::PlaybackStateChanged { playing });
        }
        Ok(outcome)
    }

    pub fn play(&self) -> OpResult {
        let result = self.engine.set_property("pause", false).map_err(Into::into);
        let outcome = self.settle("play", result)?;
        self.emit(PlayerEvent::PlaybackStateChanged { playing: true });
        Ok(outcome)
    }

    /// Returns whether audio is now muted.
    pub fn toggle_mute(&self) -> OpResult<bool> {
        let result = (|| -> ControlResult<bool> {
            let muted = self.engine.get_flag("mute")?;
            self.engine.set_property("mute", !muted)?;
            Ok(!muted)
        })();
        let outcome = self.settle("mute", result)?;
        if let Outcome::Done(muted) = outcome {
            self.emit(PlayerEvent::MuteChanged { muted });
        }
        Ok(outcome)
    }

    /// Absolute, or relative to the engine's current volume. Clamped to 0-100.
    pub fn set_volume(&self, value: i64, relative: bool) -> OpResult<i64> {
        let result = (|| -> ControlResult<i64> {
            let base = if relative { self.engine.get_i64("volume")? } else { 0 };
            let target = (base + value).clamp(0, VOLUME_MAX);
            self.engine.set_property("volume", target)?;
            Ok(target)
        })();
        self.settle("volume", result)
    }

    // ========================================================================
    // Seeking and the progress indicator
    // ========================================================================

    pub fn seek(&self, seconds: f64) -> OpResult {
        let result = self.sync.lock().seek_absolute(&self.engine, seconds);
        self.settle("seek", result)
    }

    /// Returns the target position.
    pub fn seek_relative(&self, delta: f64) -> OpResult<f64> {
        let result = self.sync.lock().seek_relative(&self.engine, delta);
        self.settle("seek", result)
    }

    pub fn step_frame(&self, step: FrameStep) -> OpResult<f64> {
        let result = self.sync.lock().step_frame(&self.engine, step);
        self.settle("frame step", result)
    }

    pub fn drag_started(&self) {
        self.sync.lock().drag_started();
    }

    /// End a drag and seek to the released position. Returns the seek target,
    /// or `None` when no media is active.
    pub fn drag_stopped(&self) -> OpResult<Option<f64>> {
        let mut sync = self.sync.lock();
        let target = {
            let indicator = self.indicator.lock();
            sync.drag_stopped(&**indicator)
        };
        let result = match target {
            Some(seconds) => sync.seek_absolute(&self.engine, seconds).map(|_| Some(seconds)),
            None => Ok(None),
        };
        drop(sync);
        self.settle("seek", result)
    }

    /// Run a closure against the UI indicator (e.g. to mirror a drag).
    pub fn with_indicator<R>(&self, f: impl FnOnce(&mut dyn ProgressIndicator) -> R) -> R {
        let mut indicator = self.indicator.lock();
        f(&mut **indicator)
    }

    /// One synchronizer poll. Called by the poller thread; may be called
    /// directly when polling is disabled. A no-op without an engine.
    pub fn tick(&self) -> OpResult {
        if !self.engine.is_initialized() {
            return Ok(Outcome::Done(()));
        }
        let result = {
            let mut sync = self.sync.lock();
            let mut indicator = self.indicator.lock();
            sync.tick(&self.engine, &mut **indicator)
        };
        self.settle("poll", result)
    }

    // ========================================================================
    // Transforms
    // ========================================================================

    pub fn zoom_in(&self) -> OpResult<f64> {
        let result = self.transform.lock().zoom_in(&self.engine);
        self.settle("zoom in", result)
    }

    pub fn zoom_out(&self) -> OpResult<f64> {
        let result = self.transform.lock().zoom_out(&self.engine);
        self.settle("zoom out", result)
    }

    pub fn zoom_reset(&self) -> OpResult {
        let result = self.transform.lock().zoom_reset(&self.engine);
        self.settle("zoom reset", result)
    }

    pub fn pan(&self, direction: PanDirection) -> OpResult<(f64, f64)> {
        let result = self.transform.lock().pan(&self.engine, direction);
        self.settle("pan", result)
    }

    pub fn pan_reset(&self) -> OpResult {
        let result = self.transform.lock().pan_reset(&self.engine);
        self.settle("pan reset", result)
    }

    pub fn set_speed_delta(&self, delta: f64) -> OpResult<f64> {
        let result = self.transform.lock().set_speed_delta(&self.engine, delta);
        self.settle("speed", result)
    }

    pub fn set_speed_multiplier(&self, multiple: f64) -> OpResult<f64> {
        let result = self.transform.lock().set_speed_multiplier(&self.engine, multiple);
        self.settle("speed", result)
    }

    pub fn adjust_audio_delay(&self, delta_seconds: f64) -> OpResult<f64> {
        let result = self.transform.lock().adjust_audio_delay(&self.engine, delta_seconds);
        self.settle("audio delay", result)
    }

    pub fn reset_audio_delay(&self) -> OpResult {
        let result = self.transform.lock().reset_audio_delay(&self.engine);
        self.settle("audio delay reset", result)
    }

    // ========================================================================
    // Subtitles
    // ========================================================================

    pub fn load_subtitle(&self, path: &str) -> OpResult {
        self.settle("load subtitle", subtitles::load_subtitle(&self.engine, path))
    }

    pub fn select_subtitle(&self, id: i64) -> OpResult {
        self.settle("select subtitle", subtitles::select_subtitle(&self.engine, id))
    }

    pub fn hide_subtitles(&self) -> OpResult {
        self.settle("hide subtitles", subtitles::hide_subtitles(&self.engine))
    }

    pub fn adjust_subtitle_delay(&self, delta: f64) -> OpResult<f64> {
        self.settle("subtitle delay", subtitles::adjust_subtitle_delay(&self.engine, delta))
    }

    pub fn set_subtitle_font(&self, font: &SubtitleFont) -> OpResult {
        self.settle("subtitle font", subtitles::set_subtitle_font(&self.engine, font))
    }

    pub fn subtitle_font(&self) -> OpResult<SubtitleFont> {
        let outcome = self.settle("subtitle font", subtitles::subtitle_font(&self.engine))?;
        if let Outcome::Done(font) = &outcome {
            self.emit(PlayerEvent::SubtitleFont(font.clone()));
        }
        Ok(outcome)
    }

    pub fn subtitle_tracks(&self) -> OpResult<Vec<TrackInfo>> {
        let outcome = self.settle("subtitle tracks", subtitles::subtitle_tracks(&self.engine))?;
        if let Outcome::Done(tracks) = &outcome {
            self.emit(PlayerEvent::SubtitleTracks(tracks.clone()));
        }
        Ok(outcome)
    }

    // ========================================================================
    // Capture
    // ========================================================================

    /// Save the current frame; `None` picks a timestamped file in the temp dir.
    pub fn screenshot(&self, path: Option<&Path>) -> OpResult<PathBuf> {
        let path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(capture::default_screenshot_path);
        self.settle("screenshot", capture::screenshot(&self.engine, &path))
    }

    pub fn capture_previews(
        &self,
        count: usize,
        dir: &Path,
        base_name: &str,
    ) -> OpResult<Vec<PathBuf>> {
        self.settle(
            "preview capture",
            capture::capture_previews(&self.engine, count, dir, base_name),
        )
    }

    // ========================================================================
    // Helper tools
    // ========================================================================

    pub fn tools(&self) -> &MediaTools {
        &self.tools
    }

    /// Download `url` with the external downloader. Progress and the terminal
    /// result arrive as events; the returned task resolves to the same result.
    pub fn download(&self, url: &str) -> Result<JoinHandle<ToolResult>, ValidationError> {
        let (mut job, dir) = self.tools.start_download(url)?;
        let events = self.events.lock().clone();
        let command = job.command().to_string();
        let _ = events.send(PlayerEvent::DownloadStarted { url: url.trim().to_string() });

        Ok(self.tools.supervisor().runtime().spawn(async move {
            let outcome = drive_job(&mut job, |event| {
                let forwarded = match event {
                    JobEvent::Stdout(text) | JobEvent::Stderr(text) => {
                        Some(PlayerEvent::DownloadProgress(text.clone()))
                    }
                    JobEvent::ErrorNotice(text) => Some(PlayerEvent::ProcessNotice {
                        command: command.clone(),
                        message: text.clone(),
                    }),
                    JobEvent::Exited(_) => None,
                };
                if let Some(event) = forwarded {
                    let _ = events.send(event);
                }
            })
            .await;

            let result = MediaTools::download_result(&outcome, &dir, job.log());
            let _ = events.send(match &result {
                ToolResult::Success { path, .. } => PlayerEvent::DownloadFinished(path.clone()),
                ToolResult::Failure { message } => PlayerEvent::DownloadError(message.clone()),
            });
            result
        }))
    }

    /// Dump metadata of the current media with the external metadata tool.
    pub fn read_metadata(&self) -> Result<JoinHandle<ToolResult>, ValidationError> {
        let media = self.current_media();
        let mut job = self.tools.start_metadata(media.as_deref())?;
        let media = media.unwrap_or_default();
        let events = self.events.lock().clone();
        let command = job.command().to_string();

        Ok(self.tools.supervisor().runtime().spawn(async move {
            let outcome = drive_job(&mut job, |event| {
                if let JobEvent::ErrorNotice(text) = event {
                    let _ = events.send(PlayerEvent::ProcessNotice {
                        command: command.clone(),
                        message: text.clone(),
                    });
                }
            })
            .await;

            let result = MediaTools::metadata_result(&outcome, &media, job.log());
            let _ = events.send(match &result {
                ToolResult::Success { output, .. } => PlayerEvent::MetadataReady(output.clone()),
                ToolResult::Failure { message } => PlayerEvent::MetadataError(message.clone()),
            });
            result
        }))
    }
}

impl Drop for PlaybackController {
    fn drop(&mut self) {
        // Not joined: the poller may be the thread dropping the last reference.
        self.stop_polling();
        self.engine.shutdown();
    }
}

// ============================================================================
// Tests
// ============================================================================
