//! # Engine Bridge
//!
//! Typed front door to the native playback engine.
//!
//! The engine speaks a narrow protocol: commands are ordered string lists,
//! properties are named and typed. Backends implement [`EngineBackend`] in the
//! engine's native call convention (status codes, no Rust errors); the
//! [`EngineBridge`] owns the single [`EngineHandle`], serializes every call
//! through one lock and turns native status codes into [`EngineError`]s.
//!
//! A bridge whose initialization failed holds no handle. Every call on it
//! short-circuits to `EngineError::NotInitialized` without touching the engine.

pub mod mpv;
pub mod tracks;

#[cfg(test)]
pub(crate) mod fake;

use std::collections::BTreeMap;
use std::num::NonZeroU32;

use parking_lot::Mutex;
use raw_window_handle::RawWindowHandle;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Native engine status codes (libmpv `mpv_error` values).
pub mod status {
    pub const SUCCESS: i32 = 0;
    pub const EVENT_QUEUE_FULL: i32 = -1;
    pub const NOMEM: i32 = -2;
    pub const UNINITIALIZED: i32 = -3;
    pub const INVALID_PARAMETER: i32 = -4;
    pub const OPTION_NOT_FOUND: i32 = -5;
    pub const OPTION_FORMAT: i32 = -6;
    pub const OPTION_ERROR: i32 = -7;
    pub const PROPERTY_NOT_FOUND: i32 = -8;
    pub const PROPERTY_FORMAT: i32 = -9;
    pub const PROPERTY_UNAVAILABLE: i32 = -10;
    pub const PROPERTY_ERROR: i32 = -11;
    pub const COMMAND: i32 = -12;
    pub const LOADING_FAILED: i32 = -13;
    pub const UNSUPPORTED: i32 = -18;
    pub const NOT_IMPLEMENTED: i32 = -19;
    pub const GENERIC: i32 = -20;
}

/// Status code as returned by a backend call.
pub type NativeStatus = i32;

// ============================================================================
// Property values
// ============================================================================

/// Engine node tree, decoded into owned memory.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    None,
    String(String),
    Flag(bool),
    Int64(i64),
    Double(f64),
    Array(Vec<Node>),
    /// Key/value pairs in engine order. Look keys up by name, never by position.
    Map(Vec<(String, Node)>),
    ByteArray(Vec<u8>),
}

impl Node {
    /// Look up a key in a map node.
    pub fn get(&self, key: &str) -> Option<&Node> {
        match self {
            Node::Map(entries) => entries.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Node::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Node::Int64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Node::Flag(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Node]> {
        match self {
            Node::Array(items) => Some(items),
            _ => None,
        }
    }
}

/// Format a caller asks the engine for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyFormat {
    Flag,
    Int64,
    Double,
    String,
    Node,
}

impl PropertyFormat {
    pub fn label(self) -> &'static str {
        match self {
            PropertyFormat::Flag => "flag",
            PropertyFormat::Int64 => "int64",
            PropertyFormat::Double => "double",
            PropertyFormat::String => "string",
            PropertyFormat::Node => "node",
        }
    }
}

/// Dynamically typed value exchanged with the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Flag(bool),
    Int64(i64),
    Double(f64),
    String(String),
    Node(Node),
}

impl PropertyValue {
    pub fn format(&self) -> PropertyFormat {
        match self {
            PropertyValue::Flag(_) => PropertyFormat::Flag,
            PropertyValue::Int64(_) => PropertyFormat::Int64,
            PropertyValue::Double(_) => PropertyFormat::Double,
            PropertyValue::String(_) => PropertyFormat::String,
            PropertyValue::Node(_) => PropertyFormat::Node,
        }
    }
}

impl From<bool> for PropertyValue {
    fn from(v: bool) -> Self {
        PropertyValue::Flag(v)
    }
}

impl From<i64> for PropertyValue {
    fn from(v: i64) -> Self {
        PropertyValue::Int64(v)
    }
}

impl From<f64> for PropertyValue {
    fn from(v: f64) -> Self {
        PropertyValue::Double(v)
    }
}

impl From<&str> for PropertyValue {
    fn from(v: &str) -> Self {
        PropertyValue::String(v.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(v: String) -> Self {
        PropertyValue::String(v)
    }
}

// ============================================================================
// Backend trait
// ============================================================================

/// A native playback engine, spoken to in its own call convention.
///
/// Implementations report failures as native status codes only; the bridge
/// owns the translation into typed errors.
pub trait EngineBackend: Send {
    /// Backend name for logs
    fn name(&self) -> &str;

    /// Apply an option. Valid before `initialize` and for runtime options after.
    fn set_option(&mut self, name: &str, value: &str) -> Result<(), NativeStatus>;

    /// Start the engine
    fn initialize(&mut self) -> Result<(), NativeStatus>;

    fn command(&mut self, args: &[&str]) -> Result<(), NativeStatus>;

    fn get_property(
        &mut self,
        name: &str,
        format: PropertyFormat,
    ) -> Result<PropertyValue, NativeStatus>;

    fn set_property(&mut self, name: &str, value: &PropertyValue) -> Result<(), NativeStatus>;

    /// Human-readable text for a status code
    fn error_string(&self, code: NativeStatus) -> String;

    /// Tear the engine down. Called exactly once by the bridge.
    fn destroy(&mut self);
}

/// Opaque handle to one running engine instance.
pub struct EngineHandle {
    backend: Box<dyn EngineBackend>,
}

impl std::fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHandle")
            .field("backend", &self.backend.name())
            .finish()
    }
}

// ============================================================================
// Engine options
// ============================================================================

/// Options applied before the engine starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineOptions {
    /// Video output driver (`vo`)
    #[serde(rename = "vo")]
    pub video_output: Option<String>,
    /// Audio output driver (`ao`)
    #[serde(rename = "ao")]
    pub audio_output: Option<String>,
    /// Hardware decode mode (`hwdec`)
    #[serde(rename = "hwdec")]
    pub hardware_decode: Option<String>,
    /// Sync mode (`video-sync`)
    #[serde(rename = "video-sync")]
    pub video_sync: Option<String>,
    /// `loop-file`
    #[serde(rename = "loop-file")]
    pub loop_file: Option<String>,
    /// Initial volume, 0-100
    pub volume: Option<i64>,
    /// Passed through verbatim after the typed options
    pub extra: BTreeMap<String, String>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            video_output: Some("gpu".to_string()),
            audio_output: None,
            hardware_decode: Some("auto".to_string()),
            video_sync: Some("display-resample".to_string()),
            loop_file: Some("inf".to_string()),
            volume: Some(80),
            extra: BTreeMap::new(),
        }
    }
}

impl EngineOptions {
    /// Options in application order.
    pub fn pairs(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::new();
        let typed = [
            ("vo", self.video_output.clone()),
            ("ao", self.audio_output.clone()),
            ("hwdec", self.hardware_decode.clone()),
            ("video-sync", self.video_sync.clone()),
            ("loop-file", self.loop_file.clone()),
            ("volume", self.volume.map(|v| v.to_string())),
        ];
        for (name, value) in typed {
            if let Some(value) = value {
                pairs.push((name.to_string(), value));
            }
        }
        for (name, value) in &self.extra {
            pairs.push((name.clone(), value.clone()));
        }
        pairs
    }
}

// ============================================================================
// Output surface
// ============================================================================

/// Platform window identifier the engine renders into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceId(i64);

impl SurfaceId {
    pub fn from_raw(id: i64) -> Self {
        Self(id)
    }

    /// Window id for platforms the engine can embed into.
    pub fn from_window_handle(handle: RawWindowHandle) -> Option<Self> {
        match handle {
            RawWindowHandle::Win32(h) => Some(Self(h.hwnd.get() as i64)),
            RawWindowHandle::Xlib(h) => Some(Self(h.window as i64)),
            RawWindowHandle::Xcb(h) => Some(Self(NonZeroU32::get(h.window) as i64)),
            RawWindowHandle::AppKit(h) => Some(Self(h.ns_view.as_ptr() as i64)),
            _ => None,
        }
    }

    pub fn get(self) -> i64 {
        self.0
    }

    pub fn is_valid(self) -> bool {
        self.0 != 0
    }
}

// ============================================================================
// Bridge
// ============================================================================

/// Owner of the engine handle. All engine access goes through here.
#[derive(Debug)]
pub struct EngineBridge {
    handle: Mutex<Option<EngineHandle>>,
}

impl EngineBridge {
    /// Apply `options` and start the engine.
    ///
    /// Option failures are logged and skipped; only a failing start call is
    /// fatal. The backend is destroyed when startup fails.
    pub fn initialize(
        mut backend: Box<dyn EngineBackend>,
        options: &EngineOptions,
    ) -> Result<Self, EngineError> {
        for (name, value) in options.pairs() {
            if let Err(code) = backend.set_option(&name, &value) {
                tracing::warn!(
                    "Engine option {}={} not applied: {}",
                    name,
                    value,
                    backend.error_string(code)
                );
            }
        }

        if let Err(code) = backend.initialize() {
            let message = backend.error_string(code);
            backend.destroy();
            return Err(EngineError::InitFailed { code, message });
        }

        tracing::info!("Engine '{}' initialized", backend.name());
        Ok(Self {
            handle: Mutex::new(Some(EngineHandle { backend })),
        })
    }

    /// A bridge with no engine behind it.
    pub fn detached() -> Self {
        Self {
            handle: Mutex::new(None),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.handle.lock().is_some()
    }

    fn with_backend<T>(
        &self,
        f: impl FnOnce(&mut dyn EngineBackend) -> Result<T, EngineError>,
    ) -> Result<T, EngineError> {
        let mut guard = self.handle.lock();
        let handle = guard.as_mut().ok_or(EngineError::NotInitialized)?;
        f(handle.backend.as_mut())
    }

    pub fn bind_output_surface(&self, surface: SurfaceId) -> Result<(), EngineError> {
        if !surface.is_valid() {
            return Err(EngineError::InvalidSurface(surface.get().to_string()));
        }
        self.with_backend(|backend| {
            backend
                .set_option("wid", &surface.get().to_string())
                .map_err(|code| EngineError::InvalidSurface(backend.error_string(code)))
        })
    }

    /// Send a command. `args[0]` is the verb; nothing is validated client-side.
    pub fn send_command<S: AsRef<str>>(&self, args: &[S]) -> Result<(), EngineError> {
        let args: Vec<&str> = args.iter().map(AsRef::as_ref).collect();
        self.with_backend(|backend| {
            backend.command(&args).map_err(|code| EngineError::CommandRejected {
                command: args.first().copied().unwrap_or_default().to_string(),
                code,
                message: backend.error_string(code),
            })
        })
    }

    pub fn get_property(
        &self,
        name: &str,
        format: PropertyFormat,
    ) -> Result<PropertyValue, EngineError> {
        let value = self.with_backend(|backend| {
            backend.get_property(name, format).map_err(|code| {
                if code == status::PROPERTY_UNAVAILABLE {
                    EngineError::PropertyUnavailable {
                        name: name.to_string(),
                    }
                } else {
                    EngineError::PropertyGet {
                        name: name.to_string(),
                        code,
                        message: backend.error_string(code),
                    }
                }
            })
        })?;

        if value.format() != format {
            return Err(EngineError::PropertyFormat {
                name: name.to_string(),
                expected: format.label(),
                found: value.format().label(),
            });
        }
        Ok(value)
    }

    pub fn set_property(
        &self,
        name: &str,
        value: impl Into<PropertyValue>,
    ) -> Result<(), EngineError> {
        let value = value.into();
        self.with_backend(|backend| {
            backend
                .set_property(name, &value)
                .map_err(|code| EngineError::PropertySet {
                    name: name.to_string(),
                    code,
                    message: backend.error_string(code),
                })
        })
    }

    pub fn get_flag(&self, name: &str) -> Result<bool, EngineError> {
        match self.get_property(name, PropertyFormat::Flag)? {
            PropertyValue::Flag(v) => Ok(v),
            other => Err(format_mismatch(name, PropertyFormat::Flag, &other)),
        }
    }

    pub fn get_i64(&self, name: &str) -> Result<i64, EngineError> {
        match self.get_property(name, PropertyFormat::Int64)? {
            PropertyValue::Int64(v) => Ok(v),
            other => Err(format_mismatch(name, PropertyFormat::Int64, &other)),
        }
    }

    pub fn get_f64(&self, name: &str) -> Result<f64, EngineError> {
        match self.get_property(name, PropertyFormat::Double)? {
            PropertyValue::Double(v) => Ok(v),
            other => Err(format_mismatch(name, PropertyFormat::Double, &other)),
        }
    }

    pub fn get_string(&self, name: &str) -> Result<String, EngineError> {
        match self.get_property(name, PropertyFormat::String)? {
            PropertyValue::String(v) => Ok(v),
            other => Err(format_mismatch(name, PropertyFormat::String, &other)),
        }
    }

    /// Read a node-valued property. The tree comes back fully owned; the
    /// backend has already released its native copy.
    pub fn get_node(&self, name: &str) -> Result<Node, EngineError> {
        match self.get_property(name, PropertyFormat::Node)? {
            PropertyValue::Node(v) => Ok(v),
            other => Err(format_mismatch(name, PropertyFormat::Node, &other)),
        }
    }

    /// Destroy the engine. Safe to call repeatedly or on a detached bridge.
    pub fn shutdown(&self) {
        if let Some(mut handle) = self.handle.lock().take() {
            tracing::info!("Shutting down engine '{}'", handle.backend.name());
            handle.backend.destroy();
        }
    }
}

impl Drop for EngineBridge {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn format_mismatch(name: &str, expected: PropertyFormat, found: &PropertyValue) -> EngineError {
    EngineError::PropertyFormat {
        name: name.to_string(),
        expected: expected.label(),
        found: found.format().label(),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::fake::{Call, FakeEngine};
    use super::*;

    #[test]
    fn test_options_applied_in_order_before_start() {
        let engine = FakeEngine::new();
        let mut options = EngineOptions::default();
        options.extra.insert("keep-open".into(), "yes".into());
        let _bridge = EngineBridge::initialize(engine.boxed(), &options).unwrap();

        let calls = engine.calls();
        let init_pos = calls.iter().position(|c| *c == Call::Initialize).unwrap();
        let options_set: Vec<_> = calls[..init_pos]
            .iter()
            .filter_map(|c| match c {
                Call::SetOption(name, _) => Some(name.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(
            options_set,
            vec!["vo", "hwdec", "video-sync", "loop-file", "volume", "keep-open"]
        );
    }

    #[test]
    fn test_unknown_option_does_not_fail_startup() {
        let engine = FakeEngine::new();
        engine.reject_option("no-such-option");
        let mut options = EngineOptions::default();
        options.extra.insert("no-such-option".into(), "1".into());
        assert!(EngineBridge::initialize(engine.boxed(), &options).is_ok());
    }

    #[test]
    fn test_failed_start_reports_init_failed() {
        let engine = FakeEngine::new();
        engine.fail_initialize(status::UNSUPPORTED);
        let err = EngineBridge::initialize(engine.boxed(), &EngineOptions::default()).unwrap_err();
        assert!(matches!(err, EngineError::InitFailed { code, .. } if code == status::UNSUPPORTED));
        assert!(engine.calls().contains(&Call::Destroy));
    }

    #[test]
    fn test_detached_bridge_short_circuits() {
        let bridge = EngineBridge::detached();
        assert!(!bridge.is_initialized());
        assert!(format!("{:?}", bridge).contains("None"));
        assert_eq!(bridge.send_command(&["stop"]), Err(EngineError::NotInitialized));
        assert_eq!(bridge.get_f64("time-pos"), Err(EngineError::NotInitialized));
        assert_eq!(bridge.set_property("pause", true), Err(EngineError::NotInitialized));
        bridge.shutdown();
        bridge.shutdown();
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let engine = FakeEngine::new();
        let bridge = engine.bridge();
        assert!(format!("{:?}", bridge).contains("fake"));
        bridge.shutdown();
        bridge.shutdown();
        drop(bridge);
        let destroys = engine.calls().iter().filter(|c| **c == Call::Destroy).count();
        assert_eq!(destroys, 1);
    }

    #[test]
    fn test_invalid_surface_rejected_without_engine_call() {
        let engine = FakeEngine::new();
        let bridge = engine.bridge();
        engine.clear_calls();
        let err = bridge.bind_output_surface(SurfaceId::from_raw(0)).unwrap_err();
        assert!(matches!(err, EngineError::InvalidSurface(_)));
        assert!(engine.calls().is_empty());

        bridge.bind_output_surface(SurfaceId::from_raw(0x3a00007)).unwrap();
        assert_eq!(
            engine.calls(),
            vec![Call::SetOption("wid".into(), (0x3a00007i64).to_string())]
        );
    }

    #[test]
    fn test_command_args_passed_verbatim() {
        let engine = FakeEngine::new();
        let bridge = engine.bridge();
        engine.clear_calls();
        bridge.send_command(&["frobnicate", "a", "", "b c"]).unwrap_or(());
        assert_eq!(
            engine.calls(),
            vec![Call::Command(vec![
                "frobnicate".into(),
                "a".into(),
                "".into(),
                "b c".into()
            ])]
        );
    }

    #[test]
    fn test_rejected_command_carries_code() {
        let engine = FakeEngine::new();
        let bridge = engine.bridge();
        let err = bridge.send_command(&["frobnicate"]).unwrap_err();
        match err {
            EngineError::CommandRejected { command, code, .. } => {
                assert_eq!(command, "frobnicate");
                assert_eq!(code, status::COMMAND);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_typed_reads() {
        let engine = FakeEngine::new();
        let bridge = engine.bridge();
        engine.set("speed", PropertyValue::Double(1.5));
        engine.set("sub-font", PropertyValue::String("Noto Sans".into()));
        assert_eq!(bridge.get_f64("speed").unwrap(), 1.5);
        assert_eq!(bridge.get_string("sub-font").unwrap(), "Noto Sans");
        let err = bridge.get_flag("sub-font").unwrap_err();
        assert!(matches!(err, EngineError::PropertyFormat { .. }));
    }

    #[test]
    fn test_unavailable_property_is_distinct() {
        let engine = FakeEngine::new();
        let bridge = engine.bridge();
        let err = bridge.get_f64("duration").unwrap_err();
        assert_eq!(
            err,
            EngineError::PropertyUnavailable {
                name: "duration".into()
            }
        );
    }

    #[test]
    fn test_options_pairs_skip_unset() {
        let options = EngineOptions {
            video_output: None,
            audio_output: Some("pulse".into()),
            hardware_decode: None,
            video_sync: None,
            loop_file: None,
            volume: None,
            extra: BTreeMap::new(),
        };
        assert_eq!(options.pairs(), vec![("ao".to_string(), "pulse".to_string())]);
    }

    #[test]
    fn test_node_lookup_by_name() {
        let node = Node::Map(vec![
            ("title".into(), Node::String("Commentary".into())),
            ("id".into(), Node::Int64(3)),
        ]);
        assert_eq!(node.get("id").and_then(Node::as_i64), Some(3));
        assert_eq!(node.get("lang"), None);
    }
}
