//! Soundy Core - Real-time PCM playback
//!
//! Streams synthesized samples to a playback device from a dedicated
//! real-time thread.
//!
//! # Architecture
//!
//! - [`DeviceHandle`] - One open PCM stream and its parameter negotiation
//! - [`StreamEngine`] - Playback state machine and the real-time thread, with
//!   underrun and suspend recovery
//! - [`Generator`] - Fills one period of samples per call
//! - [`queue`] - Lock-free SPSC queue for control events bound for the
//!   real-time thread
//! - [`MusicBox`] - Notes played through the queue at a fixed tempo
//! - [`SimulatedHost`] - In-memory driver; `CpalBackend` (feature `cpal`)
//!   drives real hardware

pub mod config;
pub mod device;
pub mod engine;
pub mod error;
pub mod generator;
#[cfg(test)]
mod integration;
pub mod music;
pub mod queue;
#[cfg(test)]
pub mod test_utils;

// Re-export core traits and types
#[cfg(feature = "cpal")]
pub use device::CpalBackend;
pub use device::{
    AccessPattern, DeviceHandle, HwCapabilities, HwConfig, HwParams, OpenMode, PcmBackend,
    PcmDriver, SampleFormat, SimProbe, SimulatedDevice, SimulatedHost, StreamDirection,
};
pub use engine::{EngineOptions, PlaybackState, StreamEngine, StreamStats, WaitPolicy};
pub use error::{DriverError, Result, SoundyError};
pub use generator::{AudioBuffer, FnGenerator, Generator, Silence, SineWave, from_fn};
pub use music::{MusicBox, Note, NoteValue};
pub use queue::{EventConsumer, EventProducer, event_queue};
