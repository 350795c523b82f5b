//! Playback Synchronization
//!
//! Keeps a UI progress indicator in step with the engine's position and
//! duration. The engine is sampled on a fixed tick; while the user drags the
//! indicator, the indicator value is authoritative and ticks leave it alone.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::engine::EngineBridge;
use crate::error::{ControlResult, EngineError, ValidationError};

pub(crate) mod props {
    pub const TIME_POS: &str = "time-pos";
    pub const DURATION: &str = "duration";
    pub const FPS: &str = "container-fps";
}

/// UI-owned progress sink. The synchronizer only ever writes to it, except for
/// reading the released drag position.
pub trait ProgressIndicator: Send {
    fn set_maximum(&mut self, max: i64);
    fn set_value(&mut self, value: i64);
    fn value(&self) -> i64;
    fn set_time_text(&mut self, text: &str);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// No media, or duration not known yet
    Uninitialized,
    /// Engine position is pushed to the indicator
    Tracking,
    /// User is dragging the indicator
    Suspended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStep {
    Forward,
    Backward,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlaybackSession {
    pub duration: f64,
    pub position: f64,
    pub is_dragging: bool,
    pub is_initialized: bool,
}

/// Whole-second indicator scale. Fractions are truncated (125.4 -> 125).
pub fn indicator_units(seconds: f64) -> i64 {
    if seconds.is_finite() && seconds > 0.0 {
        seconds as i64
    } else {
        0
    }
}

/// HH:MM:SS
pub fn format_time(seconds: f64) -> String {
    let total = indicator_units(seconds);
    let hours = total / 3600;
    let mins = (total % 3600) / 60;
    let secs = total % 60;
    format!("{:02}:{:02}:{:02}", hours, mins, secs)
}

/// "elapsed/total"
pub fn format_time_text(position: f64, duration: f64) -> String {
    format!("{}/{}", format_time(position), format_time(duration))
}

/// Position/duration reconciler for one controller.
#[derive(Debug, Default)]
pub struct PlaybackSynchronizer {
    session: PlaybackSession,
    /// Last duration read from the engine; None until the first read
    last_duration: Option<f64>,
    /// Media was loaded and we are waiting for a usable duration
    awaiting_duration: bool,
}

impl PlaybackSynchronizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session(&self) -> &PlaybackSession {
        &self.session
    }

    pub fn state(&self) -> SyncState {
        if !self.session.is_initialized {
            SyncState::Uninitialized
        } else if self.session.is_dragging {
            SyncState::Suspended
        } else {
            SyncState::Tracking
        }
    }

    /// New media was handed to the engine. Tracking starts once a duration
    /// is readable, which may take several ticks for network streams.
    pub fn media_loaded(
        &mut self,
        engine: &EngineBridge,
        indicator: &mut dyn ProgressIndicator,
    ) -> ControlResult {
        self.session.is_initialized = false;
        self.session.position = 0.0;
        self.awaiting_duration = true;
        self.tick(engine, indicator)
    }

    /// One poll: refresh duration, then push position unless suspended.
    pub fn tick(
        &mut self,
        engine: &EngineBridge,
        indicator: &mut dyn ProgressIndicator,
    ) -> ControlResult {
        match engine.get_f64(props::DURATION) {
            Ok(duration) => {
                if self.last_duration != Some(duration) {
                    tracing::debug!("Duration changed: {:?} -> {}", self.last_duration, duration);
                    self.last_duration = Some(duration);
                    self.session.duration = duration;
                    indicator.set_maximum(indicator_units(duration));
                }
                if self.awaiting_duration && duration >= 0.0 {
                    self.awaiting_duration = false;
                    self.session.is_initialized = true;
                    tracing::debug!("Synchronizer tracking ({}s)", duration);
                }
            }
            Err(EngineError::PropertyUnavailable { .. }) => {}
            Err(e) => return Err(e.into()),
        }

        if self.state() != SyncState::Tracking {
            return Ok(());
        }

        match engine.get_f64(props::TIME_POS) {
            Ok(position) => {
                self.session.position = position;
                indicator.set_value(indicator_units(position));
                indicator.set_time_text(&format_time_text(position, self.session.duration));
                Ok(())
            }
            Err(EngineError::PropertyUnavailable { .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn drag_started(&mut self) {
        self.session.is_dragging = true;
    }

    /// Leave the suspended state. Returns the released indicator position to
    /// seek to, when media is active.
    pub fn drag_stopped(&mut self, indicator: &dyn ProgressIndicator) -> Option<f64> {
        self.session.is_dragging = false;
        if self.session.is_initialized {
            Some(indicator.value() as f64)
        } else {
            None
        }
    }

    pub fn seek_absolute(&mut self, engine: &EngineBridge, seconds: f64) -> ControlResult {
        let offset = seconds.to_string();
        engine.send_command(&["seek", offset.as_str(), "absolute"])?;
        Ok(())
    }

    /// Seek by `delta` only when the target stays inside [0, duration].
    pub fn seek_relative(&mut self, engine: &EngineBridge, delta: f64) -> ControlResult<f64> {
        let position = current_position(engine)?;
        let duration = match engine.get_f64(props::DURATION) {
            Ok(d) => d,
            Err(EngineError::PropertyUnavailable { .. }) => {
                return Err(ValidationError::UnknownDuration.into())
            }
            Err(e) => return Err(e.into()),
        };

        let target = position + delta;
        if !(0.0..=duration).contains(&target) {
            return Err(ValidationError::SeekOutOfRange { target, duration }.into());
        }

        let offset = delta.to_string();
        engine.send_command(&["seek", offset.as_str(), "relative"])?;
        Ok(target)
    }

    /// Step one frame by writing the position directly. The frame rate is
    /// re-read every call since containers may not report a stable one.
    pub fn step_frame(&mut self, engine: &EngineBridge, step: FrameStep) -> ControlResult<f64> {
        let fps = match engine.get_f64(props::FPS) {
            Ok(fps) => fps,
            Err(EngineError::PropertyUnavailable { .. }) => {
                return Err(ValidationError::InvalidFrameRate(0.0).into())
            }
            Err(e) => return Err(e.into()),
        };
        if !fps.is_finite() || fps <= 0.0 {
            return Err(ValidationError::InvalidFrameRate(fps).into());
        }

        let position = current_position(engine)?;
        let frame = 1.0 / fps;
        let target = match step {
            FrameStep::Forward => position + frame,
            FrameStep::Backward => (position - frame).max(0.0),
        };
        engine.set_property(props::TIME_POS, target)?;
        Ok(target)
    }
}

/// Playback position; an engine with nothing loaded reports none.
fn current_position(engine: &EngineBridge) -> ControlResult<f64> {
    match engine.get_f64(props::TIME_POS) {
        Ok(position) => Ok(position),
        Err(EngineError::PropertyUnavailable { .. }) => Err(ValidationError::NoActiveMedia.into()),
        Err(e) => Err(e.into()),
    }
}

// ============================================================================
// Background poller
// ============================================================================

/// Fixed-cadence ticker thread. Holds only a weak reference to its target and
/// exits when the target is dropped or `stop()` is called.
pub struct Poller {
    stop: Arc<AtomicBool>,
    ticks: Arc<AtomicU64>,
    thread: Option<JoinHandle<()>>,
}

impl Poller {
    pub fn spawn<T, F>(target: Weak<T>, interval: Duration, tick: F) -> std::io::Result<Self>
    where
        T: Send + Sync + 'static,
        F: Fn(&T) + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let ticks = Arc::new(AtomicU64::new(0));
        let thread_stop = stop.clone();
        let thread_ticks = ticks.clone();

        let thread = std::thread::Builder::new()
            .name("astra-sync".into())
            .spawn(move || loop {
                std::thread::sleep(interval);
                if thread_stop.load(Ordering::SeqCst) {
                    break;
                }
                let Some(target) = target.upgrade() else {
                    break;
                };
                tick(&target);
                thread_ticks.fetch_add(1, Ordering::Relaxed);
            })?;

        Ok(Self {
            stop,
            ticks,
            thread: Some(thread),
        })
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn tick_count(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// Stop and wait for the thread. Must not be called from the tick itself.
    pub fn join(mut self) {
        self.stop();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        self.stop();
    }
}
