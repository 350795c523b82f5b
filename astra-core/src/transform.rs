//! Client-side video transforms: zoom, pan, playback speed, audio offset.
//!
//! The engine stores absolute values only. Zoom and pan are accumulated here
//! and pushed as absolute writes; speed and audio delay are read back from the
//! engine before each change so external changes are respected.

use serde::{Deserialize, Serialize};

use crate::engine::EngineBridge;
use crate::error::{ControlResult, ValidationError};

pub const ZOOM_STEP: f64 = 0.1;
/// Zoom must stay strictly inside (-ZOOM_LIMIT, ZOOM_LIMIT).
pub const ZOOM_LIMIT: f64 = 3.0;
pub const PAN_STEP: f64 = 0.1;
pub const SPEED_MIN: f64 = 0.0;
pub const SPEED_MAX: f64 = 10.0;
pub const NORMAL_SPEED: f64 = 1.0;

/// Multiplier that doubles as "resume at normal speed" while paused.
const DOUBLE_SPEED: f64 = 2.0;

pub(crate) mod props {
    pub const ZOOM: &str = "video-zoom";
    pub const PAN_X: &str = "video-pan-x";
    pub const PAN_Y: &str = "video-pan-y";
    pub const SPEED: &str = "speed";
    pub const PAUSE: &str = "pause";
    pub const AUDIO_DELAY: &str = "audio-delay";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PanDirection {
    Left,
    Right,
    Up,
    Down,
}

/// Snap to the 0.1 grid so repeated steps don't drift (0.1 * 3 != 0.3).
fn snap(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransformState {
    pub zoom: f64,
    pub pan_x: f64,
    pub pan_y: f64,
    /// Last speed written or observed
    pub speed: f64,
    /// Last audio delay written, seconds
    pub audio_delay: f64,
}

impl Default for TransformState {
    fn default() -> Self {
        Self {
            zoom: 0.0,
            pan_x: 0.0,
            pan_y: 0.0,
            speed: NORMAL_SPEED,
            audio_delay: 0.0,
        }
    }
}

impl TransformState {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Zoom
    // ========================================================================

    pub fn zoom_in(&mut self, engine: &EngineBridge) -> ControlResult<f64> {
        self.zoom_to(engine, snap(self.zoom + ZOOM_STEP))
    }

    pub fn zoom_out(&mut self, engine: &EngineBridge) -> ControlResult<f64> {
        self.zoom_to(engine, snap(self.zoom - ZOOM_STEP))
    }

    fn zoom_to(&mut self, engine: &EngineBridge, target: f64) -> ControlResult<f64> {
        if target.abs() >= ZOOM_LIMIT {
            return Err(ValidationError::ZoomOutOfRange {
                requested: target,
                limit: ZOOM_LIMIT,
            }
            .into());
        }
        engine.set_property(props::ZOOM, target)?;
        self.zoom = target;
        Ok(target)
    }

    pub fn zoom_reset(&mut self, engine: &EngineBridge) -> ControlResult {
        self.zoom = 0.0;
        engine.set_property(props::ZOOM, 0.0)?;
        Ok(())
    }

    // ========================================================================
    // Pan
    // ========================================================================

    /// Move the picture one step. Pan is not bounded.
    pub fn pan(
        &mut self,
        engine: &EngineBridge,
        direction: PanDirection,
    ) -> ControlResult<(f64, f64)> {
        let (name, current, delta) = match direction {
            PanDirection::Left => (props::PAN_X, self.pan_x, -PAN_STEP),
            PanDirection::Right => (props::PAN_X, self.pan_x, PAN_STEP),
            PanDirection::Up => (props::PAN_Y, self.pan_y, -PAN_STEP),
            PanDirection::Down => (props::PAN_Y, self.pan_y, PAN_STEP),
        };
        let target = snap(current + delta);
        engine.set_property(name, target)?;

        match direction {
            PanDirection::Left | PanDirection::Right => self.pan_x = target,
            PanDirection::Up | PanDirection::Down => self.pan_y = target,
        }
        Ok((self.pan_x, self.pan_y))
    }

    pub fn pan_reset(&mut self, engine: &EngineBridge) -> ControlResult {
        self.pan_x = 0.0;
        self.pan_y = 0.0;
        engine.set_property(props::PAN_X, 0.0)?;
        engine.set_property(props::PAN_Y, 0.0)?;
        Ok(())
    }

    // ========================================================================
    // Speed
    // ========================================================================

    /// Add `delta` to the engine's current speed. A delta of exactly zero
    /// resets to normal speed.
    pub fn set_speed_delta(&mut self, engine: &EngineBridge, delta: f64) -> ControlResult<f64> {
        if delta == 0.0 {
            engine.set_property(props::SPEED, NORMAL_SPEED)?;
            self.speed = NORMAL_SPEED;
            return Ok(NORMAL_SPEED);
        }

        let current = engine.get_f64(props::SPEED)?;
        self.write_speed(engine, current + delta)
    }

    /// Multiply the engine's current speed. Doubling while paused resumes at
    /// normal speed instead.
    pub fn set_speed_multiplier(
        &mut self,
        engine: &EngineBridge,
        multiple: f64,
    ) -> ControlResult<f64> {
        let current = engine.get_f64(props::SPEED)?;

        if multiple == DOUBLE_SPEED && engine.get_flag(props::PAUSE)? {
            engine.set_property(props::SPEED, NORMAL_SPEED)?;
            self.speed = NORMAL_SPEED;
            return Ok(NORMAL_SPEED);
        }

        self.write_speed(engine, current * multiple)
    }

    fn write_speed(&mut self, engine: &EngineBridge, target: f64) -> ControlResult<f64> {
        if !(SPEED_MIN..=SPEED_MAX).contains(&target) {
            return Err(ValidationError::SpeedOutOfRange {
                requested: target,
                min: SPEED_MIN,
                max: SPEED_MAX,
            }
            .into());
        }
        engine.set_property(props::SPEED, target)?;
        self.speed = target;
        Ok(target)
    }

    // ========================================================================
    // Audio delay
    // ========================================================================

    pub fn adjust_audio_delay(
        &mut self,
        engine: &EngineBridge,
        delta_seconds: f64,
    ) -> ControlResult<f64> {
        let current = engine.get_f64(props::AUDIO_DELAY)?;
        let target = current + delta_seconds;
        engine.set_property(props::AUDIO_DELAY, target)?;
        self.audio_delay = target;
        Ok(target)
    }

    pub fn reset_audio_delay(&mut self, engine: &EngineBridge) -> ControlResult {
        engine.set_property(props::AUDIO_DELAY, 0.0)?;
        self.audio_delay = 0.0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::fake::FakeEngine;
    use crate::engine::PropertyValue;
    use crate::error::{ControlError, EngineError};

    fn setup() -> (FakeEngine, EngineBridge, TransformState) {
        let engine = FakeEngine::new();
        let bridge = engine.bridge();
        engine.clear_calls();
        (engine, bridge, TransformState::new())
    }

    #[test]
    fn test_zoom_steps_on_grid() {
        let (engine, bridge, mut t) = setup();
        for _ in 0..3 {
            t.zoom_in(&bridge).unwrap();
        }
        assert_eq!(t.zoom, 0.3);
        assert_eq!(engine.get_f64("video-zoom"), 0.3);
        t.zoom_out(&bridge).unwrap();
        assert_eq!(t.zoom, 0.2);
    }

    #[test]
    fn test_zoom_never_reaches_limit() {
        let (engine, bridge, mut t) = setup();
        for _ in 0..29 {
            t.zoom_in(&bridge).unwrap();
        }
        assert_eq!(t.zoom, 2.9);
        engine.clear_calls();

        let err = t.zoom_in(&bridge).unwrap_err();
        assert!(matches!(
            err,
            ControlError::Validation(ValidationError::ZoomOutOfRange { .. })
        ));
        assert_eq!(t.zoom, 2.9);
        assert!(engine.writes().is_empty());

        t.zoom_reset(&bridge).unwrap();
        for _ in 0..29 {
            t.zoom_out(&bridge).unwrap();
        }
        assert_eq!(t.zoom, -2.9);
        assert!(t.zoom_out(&bridge).is_err());
        assert_eq!(t.zoom, -2.9);
    }

    #[test]
    fn test_resets_always_write() {
        let (engine, bridge, mut t) = setup();
        t.zoom_reset(&bridge).unwrap();
        t.pan_reset(&bridge).unwrap();
        let names: Vec<_> = engine.writes().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["video-zoom", "video-pan-x", "video-pan-y"]);
    }

    #[test]
    fn test_pan_is_unbounded() {
        let (engine, bridge, mut t) = setup();
        for _ in 0..50 {
            t.pan(&bridge, PanDirection::Right).unwrap();
        }
        t.pan(&bridge, PanDirection::Up).unwrap();
        assert_eq!(t.pan_x, 5.0);
        assert_eq!(t.pan_y, -0.1);
        assert_eq!(engine.get_f64("video-pan-x"), 5.0);
    }

    #[test]
    fn test_speed_delta_zero_resets() {
        let (engine, bridge, mut t) = setup();
        engine.set("speed", PropertyValue::Double(3.5));
        assert_eq!(t.set_speed_delta(&bridge, 0.0).unwrap(), 1.0);
        assert_eq!(engine.get_f64("speed"), 1.0);
    }

    #[test]
    fn test_speed_delta_bounds() {
        let (engine, bridge, mut t) = setup();
        engine.set("speed", PropertyValue::Double(9.8));
        engine.clear_calls();
        let err = t.set_speed_delta(&bridge, 0.5).unwrap_err();
        assert!(matches!(
            err,
            ControlError::Validation(ValidationError::SpeedOutOfRange { .. })
        ));
        assert!(engine.writes().is_empty());
        assert_eq!(engine.get_f64("speed"), 9.8);

        engine.set("speed", PropertyValue::Double(0.25));
        assert!(t.set_speed_delta(&bridge, -0.5).is_err());
        assert_eq!(t.set_speed_delta(&bridge, 0.5).unwrap(), 0.75);
        assert_eq!(t.set_speed_delta(&bridge, -0.75).unwrap(), 0.0);
    }

    #[test]
    fn test_double_speed_while_paused_resumes_normal() {
        let (engine, bridge, mut t) = setup();
        engine.set("pause", PropertyValue::Flag(true));
        assert_eq!(t.set_speed_multiplier(&bridge, 2.0).unwrap(), 1.0);

        engine.set("pause", PropertyValue::Flag(false));
        assert_eq!(t.set_speed_multiplier(&bridge, 2.0).unwrap(), 2.0);
        assert_eq!(engine.get_f64("speed"), 2.0);
    }

    #[test]
    fn test_multiplier_out_of_range_rejected() {
        let (engine, bridge, mut t) = setup();
        engine.set("speed", PropertyValue::Double(8.0));
        engine.clear_calls();
        assert!(t.set_speed_multiplier(&bridge, 2.0).is_err());
        assert!(engine.writes().is_empty());
        assert_eq!(t.set_speed_multiplier(&bridge, 0.5).unwrap(), 4.0);
    }

    #[test]
    fn test_audio_delay_read_add_write() {
        let (engine, bridge, mut t) = setup();
        engine.set("audio-delay", PropertyValue::Double(0.25));
        assert_eq!(t.adjust_audio_delay(&bridge, 0.5).unwrap(), 0.75);
        assert_eq!(t.adjust_audio_delay(&bridge, -1.0).unwrap(), -0.25);
        t.reset_audio_delay(&bridge).unwrap();
        assert_eq!(engine.get_f64("audio-delay"), 0.0);
    }

    #[test]
    fn test_engine_failure_leaves_state() {
        let bridge = EngineBridge::detached();
        let mut t = TransformState::new();
        let err = t.zoom_in(&bridge).unwrap_err();
        assert_eq!(err, ControlError::Engine(EngineError::NotInitialized));
        assert_eq!(t.zoom, 0.0);
    }
}
