//! Subtitle Control
//!
//! Subtitle rendering belongs to the engine. This module only drives it:
//! - External subtitle loading
//! - Track listing and selection
//! - Timing adjustment
//! - Font family / size

use serde::{Deserialize, Serialize};

use crate::engine::tracks::{decode_track_list, TrackInfo, TrackKind};
use crate::engine::EngineBridge;
use crate::error::{ControlResult, ValidationError};

mod props {
    pub const TRACK_LIST: &str = "track-list";
    pub const SID: &str = "sid";
    pub const DELAY: &str = "sub-delay";
    pub const FONT: &str = "sub-font";
    pub const FONT_SIZE: &str = "sub-font-size";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubtitleFont {
    pub family: String,
    pub size: i64,
}

/// Add an external subtitle file to the current media.
pub fn load_subtitle(engine: &EngineBridge, path: &str) -> ControlResult {
    if path.trim().is_empty() {
        return Err(ValidationError::EmptyMediaPath.into());
    }
    engine.send_command(&["sub-add", path])?;
    tracing::info!("Loaded subtitle {}", path);
    Ok(())
}

pub fn select_subtitle(engine: &EngineBridge, id: i64) -> ControlResult {
    engine.set_property(props::SID, id)?;
    Ok(())
}

/// Turn subtitle display off.
pub fn hide_subtitles(engine: &EngineBridge) -> ControlResult {
    engine.set_property(props::SID, "no")?;
    Ok(())
}

/// Shift subtitle timing by `delta` seconds relative to the current delay.
pub fn adjust_subtitle_delay(engine: &EngineBridge, delta: f64) -> ControlResult<f64> {
    let current = engine.get_f64(props::DELAY)?;
    let target = current + delta;
    engine.set_property(props::DELAY, target)?;
    Ok(target)
}

pub fn set_subtitle_font(engine: &EngineBridge, font: &SubtitleFont) -> ControlResult {
    engine.set_property(props::FONT, font.family.as_str())?;
    engine.set_property(props::FONT_SIZE, font.size)?;
    Ok(())
}

pub fn subtitle_font(engine: &EngineBridge) -> ControlResult<SubtitleFont> {
    Ok(SubtitleFont {
        family: engine.get_string(props::FONT)?,
        size: engine.get_i64(props::FONT_SIZE)?,
    })
}

/// Subtitle tracks of the current media, decoded fresh from the engine.
pub fn subtitle_tracks(engine: &EngineBridge) -> ControlResult<Vec<TrackInfo>> {
    let node = engine.get_node(props::TRACK_LIST)?;
    Ok(decode_track_list(&node, TrackKind::Subtitle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::fake::FakeEngine;
    use crate::engine::{Node, PropertyValue};
    use crate::error::ControlError;

    #[test]
    fn test_load_and_list() {
        let engine = FakeEngine::new();
        let bridge = engine.bridge();
        assert!(subtitle_tracks(&bridge).unwrap().is_empty());

        load_subtitle(&bridge, "/subs/episode01.ass").unwrap();
        load_subtitle(&bridge, "/subs/episode01.en.srt").unwrap();
        let tracks = subtitle_tracks(&bridge).unwrap();
        assert_eq!(tracks.iter().map(|t| t.id).collect::<Vec<_>>(), vec![1, 2]);
        assert!(engine
            .commands()
            .contains(&vec!["sub-add".to_string(), "/subs/episode01.ass".to_string()]));
    }

    #[test]
    fn test_empty_path_skipped() {
        let engine = FakeEngine::new();
        let bridge = engine.bridge();
        engine.clear_calls();
        assert_eq!(
            load_subtitle(&bridge, " "),
            Err(ControlError::Validation(ValidationError::EmptyMediaPath))
        );
        assert!(engine.calls().is_empty());
    }

    #[test]
    fn test_tracks_ignore_other_kinds() {
        let engine = FakeEngine::new();
        let bridge = engine.bridge();
        engine.set(
            "track-list",
            PropertyValue::Node(Node::Array(vec![
                Node::Map(vec![
                    ("type".into(), Node::String("audio".into())),
                    ("id".into(), Node::Int64(1)),
                ]),
                Node::Map(vec![
                    ("lang".into(), Node::String("fre".into())),
                    ("id".into(), Node::Int64(2)),
                    ("type".into(), Node::String("sub".into())),
                ]),
            ])),
        );
        let tracks = subtitle_tracks(&bridge).unwrap();
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].language.as_deref(), Some("fre"));
    }

    #[test]
    fn test_delay_and_font() {
        let engine = FakeEngine::new();
        let bridge = engine.bridge();
        assert_eq!(adjust_subtitle_delay(&bridge, 0.5).unwrap(), 0.5);
        assert_eq!(adjust_subtitle_delay(&bridge, -1.0).unwrap(), -0.5);

        let font = SubtitleFont {
            family: "Noto Sans CJK SC".into(),
            size: 42,
        };
        set_subtitle_font(&bridge, &font).unwrap();
        assert_eq!(subtitle_font(&bridge).unwrap(), font);

        select_subtitle(&bridge, 2).unwrap();
        assert_eq!(engine.get("sid"), Some(PropertyValue::Int64(2)));
        hide_subtitles(&bridge).unwrap();
        assert_eq!(engine.get("sid"), Some(PropertyValue::String("no".into())));
    }
}
