//! Track list decoding.
//!
//! The engine's `track-list` property is an array of maps. Each map carries
//! unordered keys (`type`, `id`, `lang`, `title`, `selected`, ...). Entries are
//! projected into [`TrackInfo`] by key name; entries without a usable `id` or
//! `type` are skipped, and wrongly typed optional keys count as absent.

use serde::{Deserialize, Serialize};

use super::Node;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrackKind {
    Subtitle,
    Audio,
    Video,
    Other,
}

impl TrackKind {
    /// Map the engine's `type` string.
    pub fn from_engine(kind: &str) -> Self {
        match kind {
            "sub" => TrackKind::Subtitle,
            "audio" => TrackKind::Audio,
            "video" => TrackKind::Video,
            _ => TrackKind::Other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackInfo {
    pub id: i64,
    pub kind: TrackKind,
    pub language: Option<String>,
    pub title: Option<String>,
    pub selected: bool,
}

impl TrackInfo {
    /// Label for track menus: "title (lang)", falling back to the id.
    pub fn display_name(&self) -> String {
        match (&self.title, &self.language) {
            (Some(title), Some(lang)) => format!("{} ({})", title, lang),
            (Some(title), None) => title.clone(),
            (None, Some(lang)) => format!("Track {} ({})", self.id, lang),
            (None, None) => format!("Track {}", self.id),
        }
    }
}

fn decode_entry(entry: &Node) -> Option<TrackInfo> {
    let id = entry.get("id")?.as_i64()?;
    let kind = TrackKind::from_engine(entry.get("type")?.as_str()?);
    let text = |key: &str| {
        entry
            .get(key)
            .and_then(Node::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    Some(TrackInfo {
        id,
        kind,
        language: text("lang"),
        title: text("title"),
        selected: entry.get("selected").and_then(Node::as_bool).unwrap_or(false),
    })
}

/// Every decodable track, in engine order.
pub fn decode_all_tracks(root: &Node) -> Vec<TrackInfo> {
    let Some(entries) = root.as_array() else {
        return Vec::new();
    };
    entries.iter().filter_map(decode_entry).collect()
}

/// Tracks of one kind, in engine order.
pub fn decode_track_list(root: &Node, kind: TrackKind) -> Vec<TrackInfo> {
    decode_all_tracks(root)
        .into_iter()
        .filter(|t| t.kind == kind)
        .collect()
}
