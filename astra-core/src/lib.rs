//! # Astra Core
//!
//! Playback-control core of the AstraPlay media player. Decoding and
//! rendering belong to libmpv; this crate drives it and keeps the UI in step.

// ============================================================================
// Engine
// ============================================================================
pub mod engine;
pub mod error;

// ============================================================================
// Playback Control
// ============================================================================
pub mod capture;
pub mod subtitles;
pub mod sync;
pub mod transform;

// ============================================================================
// Helper Processes
// ============================================================================
pub mod process;
pub mod tools;

// ============================================================================
// Composition
// ============================================================================
pub mod config;
pub mod controller;

pub use config::{ErrorPolicy, PlayerConfig};
pub use controller::{OpResult, Outcome, PlaybackController, PlayerEvent};
pub use engine::{EngineBackend, EngineBridge, EngineOptions, SurfaceId};
pub use error::{ControlError, EngineError, ProcessError, ValidationError};
pub use sync::{FrameStep, ProgressIndicator, SyncState};
pub use transform::PanDirection;

// ============================================================================
// Version
// ============================================================================
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
