//! Driver contract
//!
//! The narrow synchronous interface the device handle is built on. Every call
//! blocks until the driver answers; none of them may be issued from two
//! threads at once on the same stream.

use super::params::{HwCapabilities, HwConfig, HwRequest};
use super::{OpenMode, StreamDirection};
use crate::error::DriverError;

/// Opens streams on a sound subsystem
pub trait PcmBackend {
    /// Short backend name for logs
    fn name(&self) -> &'static str;

    /// Open `device_id` for exclusive use.
    ///
    /// Returns [`DriverError::NoDevice`] for unknown identifiers and
    /// [`DriverError::Busy`] when the device is already claimed.
    fn open(
        &self,
        device_id: &str,
        direction: StreamDirection,
        mode: OpenMode,
    ) -> Result<Box<dyn PcmDriver>, DriverError>;
}

/// One open PCM stream
pub trait PcmDriver: Send {
    /// Capability space of the stream, before any parameter is applied
    fn capabilities(&self) -> Result<HwCapabilities, DriverError>;

    /// Commit parameters to the stream and report what the hardware chose
    fn apply(&mut self, request: &HwRequest) -> Result<HwConfig, DriverError>;

    /// Bring the stream into a writable state
    fn prepare(&mut self) -> Result<(), DriverError>;

    /// Write up to `frames` interleaved frames from `data`.
    ///
    /// Returns the number of frames accepted, which may be fewer than asked.
    fn write_interleaved(&mut self, data: &[u8], frames: usize) -> Result<usize, DriverError>;

    /// Leave the suspended state. [`DriverError::WouldBlock`] means try again.
    fn resume(&mut self) -> Result<(), DriverError>;

    /// Block until every written frame has been played, then stop
    fn drain(&mut self) -> Result<(), DriverError>;

    /// Stop immediately, discarding frames not yet played
    fn drop_pending(&mut self) -> Result<(), DriverError>;

    /// Release the stream. Called exactly once.
    fn close(&mut self);
}
