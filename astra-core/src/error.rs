//! Error taxonomy for the playback core.
//!
//! - `EngineError`: a bridge call failed (or the engine never came up)
//! - `ValidationError`: a client-side precondition failed, nothing was sent
//! - `ProcessError`: an external helper process failed
//! - `ConfigError`: the settings file could not be read or written

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::engine::status;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("Playback engine is not initialized")]
    NotInitialized,
    #[error("Playback engine library unavailable: {0}")]
    LibraryUnavailable(String),
    #[error("Playback engine failed to start ({code}): {message}")]
    InitFailed { code: i32, message: String },
    #[error("Invalid output surface: {0}")]
    InvalidSurface(String),
    #[error("Command '{command}' rejected ({code}): {message}")]
    CommandRejected {
        command: String,
        code: i32,
        message: String,
    },
    #[error("Property '{name}' is unavailable")]
    PropertyUnavailable { name: String },
    #[error("Reading property '{name}' failed ({code}): {message}")]
    PropertyGet {
        name: String,
        code: i32,
        message: String,
    },
    #[error("Writing property '{name}' failed ({code}): {message}")]
    PropertySet {
        name: String,
        code: i32,
        message: String,
    },
    #[error("Property '{name}' returned {found}, expected {expected}")]
    PropertyFormat {
        name: String,
        expected: &'static str,
        found: &'static str,
    },
}

impl EngineError {
    /// Native engine status code behind this error, if the engine produced one.
    pub fn code(&self) -> Option<i32> {
        match self {
            EngineError::NotInitialized => Some(status::UNINITIALIZED),
            EngineError::InitFailed { code, .. }
            | EngineError::CommandRejected { code, .. }
            | EngineError::PropertyGet { code, .. }
            | EngineError::PropertySet { code, .. } => Some(*code),
            EngineError::PropertyUnavailable { .. } => Some(status::PROPERTY_UNAVAILABLE),
            EngineError::PropertyFormat { .. } => Some(status::PROPERTY_FORMAT),
            EngineError::LibraryUnavailable(_) | EngineError::InvalidSurface(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("zoom {requested:.1} is outside (-{limit:.1}, {limit:.1})")]
    ZoomOutOfRange { requested: f64, limit: f64 },
    #[error("speed {requested:.2} is outside [{min}, {max}]")]
    SpeedOutOfRange { requested: f64, min: f64, max: f64 },
    #[error("seek target {target:.2}s is outside [0, {duration:.2}]")]
    SeekOutOfRange { target: f64, duration: f64 },
    #[error("frame rate {0} cannot be used for frame stepping")]
    InvalidFrameRate(f64),
    #[error("media duration is not known yet")]
    UnknownDuration,
    #[error("no media is loaded")]
    NoActiveMedia,
    #[error("empty media path")]
    EmptyMediaPath,
    #[error("empty download URL")]
    EmptyUrl,
    #[error("preview capture needs at least one frame")]
    NoPreviewFrames,
    #[error("empty file name")]
    EmptyFileName,
}

/// Failure raised by the transform/sync layers before the controller decides
/// how to surface it.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ControlError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

pub type ControlResult<T = ()> = Result<T, ControlError>;

/// Process-level failure categories, mirroring the engine's own process error
/// taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ProcessErrorKind {
    /// Executable missing or not runnable
    FailedToStart,
    Crashed,
    TimedOut,
    ReadError,
    WriteError,
    Unknown,
}

impl std::fmt::Display for ProcessErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ProcessErrorKind::FailedToStart => "the process failed to start",
            ProcessErrorKind::Crashed => "the process crashed after starting",
            ProcessErrorKind::TimedOut => "the process timed out",
            ProcessErrorKind::ReadError => "reading from the process failed",
            ProcessErrorKind::WriteError => "writing to the process failed",
            ProcessErrorKind::Unknown => "an unknown process error occurred",
        };
        write!(f, "{}", label)
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProcessError {
    #[error("{command}: {kind} ({reason})")]
    Spawn {
        command: String,
        kind: ProcessErrorKind,
        reason: String,
    },
    #[error("{command} crashed")]
    Crashed { command: String },
    #[error("{command} exited with code {code}")]
    NonZeroExit { command: String, code: i32 },
    #[error("{command} timed out after {after:?}")]
    TimedOut { command: String, after: Duration },
    #[error("{command}: output stream failed ({reason})")]
    Read { command: String, reason: String },
}

impl ProcessError {
    pub fn kind(&self) -> ProcessErrorKind {
        match self {
            ProcessError::Spawn { kind, .. } => *kind,
            ProcessError::Crashed { .. } => ProcessErrorKind::Crashed,
            ProcessError::NonZeroExit { .. } => ProcessErrorKind::Unknown,
            ProcessError::TimedOut { .. } => ProcessErrorKind::TimedOut,
            ProcessError::Read { .. } => ProcessErrorKind::ReadError,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("Failed to serialize settings: {0}")]
    Serialize(#[from] serde_json::Error),
}
