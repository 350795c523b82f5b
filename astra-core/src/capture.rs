//! Screenshots and preview strips.

use std::path::{Path, PathBuf};

use crate::engine::EngineBridge;
use crate::error::{ControlResult, EngineError, ValidationError};

/// `<temp>/AstraPlay_ScreenShot_<yyyyMMddHHmm>.png`
pub fn default_screenshot_path() -> PathBuf {
    let stamp = chrono::Local::now().format("%Y%m%d%H%M");
    std::env::temp_dir().join(format!("AstraPlay_ScreenShot_{}.png", stamp))
}

/// `<dir>/<base>_<NNN>.png`, 1-based.
pub fn preview_path(dir: &Path, base_name: &str, index: usize) -> PathBuf {
    dir.join(format!("{}_{:03}.png", base_name, index))
}

/// Save the current video frame (without OSD or subtitles).
pub fn screenshot(engine: &EngineBridge, path: &Path) -> ControlResult<PathBuf> {
    let target = path.to_string_lossy();
    engine.send_command(&["screenshot-to-file", target.as_ref(), "video"])?;
    tracing::info!("Screenshot saved to {}", path.display());
    Ok(path.to_path_buf())
}

/// Take `count` evenly spaced frames across the media. Frame `i` (1-based) is
/// taken at `i * duration / (count + 1)`. The playback position is restored
/// afterwards.
pub fn capture_previews(
    engine: &EngineBridge,
    count: usize,
    dir: &Path,
    base_name: &str,
) -> ControlResult<Vec<PathBuf>> {
    if count == 0 {
        return Err(ValidationError::NoPreviewFrames.into());
    }
    if base_name.trim().is_empty() {
        return Err(ValidationError::EmptyFileName.into());
    }
    let duration = match engine.get_f64("duration") {
        Ok(d) if d > 0.0 && d.is_finite() => d,
        Ok(_) | Err(EngineError::PropertyUnavailable { .. }) => {
            return Err(ValidationError::UnknownDuration.into())
        }
        Err(e) => return Err(e.into()),
    };

    let restore = engine.get_f64("time-pos").ok();
    let step = duration / (count as f64 + 1.0);
    let captured = capture_frames(engine, count, step, dir, base_name);

    // Put the position back even when a frame failed; the frame error wins.
    if let Some(position) = restore {
        let restored = engine.set_property("time-pos", position);
        match (&captured, restored) {
            (Ok(_), Err(e)) => return Err(e.into()),
            (Err(_), Err(e)) => tracing::warn!("Position not restored: {}", e),
            (_, Ok(())) => {}
        }
    }
    captured
}

fn capture_frames(
    engine: &EngineBridge,
    count: usize,
    step: f64,
    dir: &Path,
    base_name: &str,
) -> ControlResult<Vec<PathBuf>> {
    let mut written = Vec::with_capacity(count);
    for i in 1..=count {
        engine.set_property("time-pos", step * i as f64)?;
        let path = preview_path(dir, base_name, i);
        screenshot(engine, &path)?;
        written.push(path);
    }
    Ok(written)
}
