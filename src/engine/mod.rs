//! Engine binding
//!
//! A wake-word engine is an opaque capability: it accepts a
//! `ListenerConfig`, runs its own listening loop, and calls back when the
//! trigger phrase is heard. The lifecycle controller only ever talks to it
//! through these two traits.

pub mod audio_feed;
pub mod energy;

use crate::config::ListenerConfig;
use crate::error::EngineError;
use std::sync::Arc;

pub use audio_feed::{AudioFeed, AudioFeedError, AudioSample, FRAME_LENGTH, SAMPLE_RATE};
pub use energy::{EnergyEngine, EnergyEngineConfig};

/// Index of the recognized keyword (always 0 with a single keyword)
pub type KeywordIndex = u32;

/// Invoked by the engine on its own thread once per detection
pub type DetectionCallback = Arc<dyn Fn(KeywordIndex) + Send + Sync>;

/// Factory side of an engine
pub trait WakeWordEngine: Send {
    /// Validate `config` against the engine's acceptance rules and allocate
    /// an instance. Nothing is listening until `EngineHandle::start`.
    fn create(
        &mut self,
        config: &ListenerConfig,
        on_detection: DetectionCallback,
    ) -> Result<Box<dyn EngineHandle>, EngineError>;
}

/// A live engine instance
pub trait EngineHandle: Send {
    /// Schedule the listening loop and return without waiting on it
    fn start(&mut self) -> Result<(), EngineError>;

    /// Stop listening. Must be a no-op on an already stopped handle.
    fn stop(&mut self) -> Result<(), EngineError>;

    /// Free all engine resources
    fn release(self: Box<Self>) -> Result<(), EngineError>;
}
