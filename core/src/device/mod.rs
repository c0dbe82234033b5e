//! PCM device access
//!
//! - [`DeviceHandle`] owns one open stream and its negotiated parameters
//! - [`HwParams`] narrows the capability space before the stream starts
//! - [`PcmBackend`]/[`PcmDriver`] are the driver contract
//! - [`SimulatedHost`] is an in-memory driver used for tests and headless runs
//! - `CpalBackend` (feature `cpal`) drives real hardware

use serde::{Deserialize, Serialize};

mod driver;
mod format;
mod handle;
#[cfg(feature = "cpal")]
mod hardware;
mod params;
mod sim;

pub use driver::{PcmBackend, PcmDriver};
pub use format::{AccessPattern, SampleFormat};
pub use handle::DeviceHandle;
#[cfg(feature = "cpal")]
pub use hardware::CpalBackend;
pub use params::{HwCapabilities, HwConfig, HwParams, HwRequest, frames_for};
pub use sim::{SimProbe, SimulatedDevice, SimulatedHost};

/// Direction of a PCM stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StreamDirection {
    /// Samples flow to the device
    #[default]
    Playback,
    /// Samples flow from the device
    Capture,
}

/// How driver calls behave when the device is not ready
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OpenMode {
    /// Calls wait until the device can proceed
    Blocking,
    /// Calls return [`DriverError::WouldBlock`](crate::DriverError::WouldBlock) instead of waiting
    #[default]
    NonBlocking,
}
