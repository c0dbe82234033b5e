//! Device handle: one open stream plus its parameter negotiation

use tracing::debug;

use super::driver::{PcmBackend, PcmDriver};
use super::format::{AccessPattern, SampleFormat};
use super::params::{HwConfig, HwParams};
use super::{OpenMode, StreamDirection};
use crate::error::{DriverError, Result, SoundyError};

/// Owns an open PCM stream and the parameters negotiated for it.
///
/// The `set_*` methods narrow the parameter space; [`apply`](Self::apply)
/// commits it exactly once. After that the parameters are frozen and the
/// stream primitives become usable. The stream is closed when the handle is
/// dropped.
pub struct DeviceHandle {
    id: String,
    direction: StreamDirection,
    mode: OpenMode,
    driver: Box<dyn PcmDriver>,
    params: HwParams,
    config: Option<HwConfig>,
    closed: bool,
}

impl DeviceHandle {
    /// Open a device with 8-bit unsigned samples
    pub fn open(
        backend: &dyn PcmBackend,
        device_id: &str,
        direction: StreamDirection,
        mode: OpenMode,
    ) -> Result<Self> {
        Self::open_with_format(backend, device_id, direction, mode, SampleFormat::U8)
    }

    /// Open a device and fix its sample format
    pub fn open_with_format(
        backend: &dyn PcmBackend,
        device_id: &str,
        direction: StreamDirection,
        mode: OpenMode,
        format: SampleFormat,
    ) -> Result<Self> {
        let mut driver = backend
            .open(device_id, direction, mode)
            .map_err(|source| SoundyError::DeviceUnavailable {
                device: device_id.to_string(),
                source,
            })?;

        let caps = match driver.capabilities() {
            Ok(caps) => caps,
            Err(source) => {
                driver.close();
                return Err(SoundyError::configuration("assign default hw params", source));
            }
        };

        let mut handle = Self {
            id: device_id.to_string(),
            direction,
            mode,
            driver,
            params: HwParams::any(caps),
            config: None,
            closed: false,
        };
        handle.params.set_format(format)?;

        debug!(
            "Opened '{}' via {} ({:?}, {:?}, {:?})",
            device_id,
            backend.name(),
            direction,
            mode,
            format
        );
        Ok(handle)
    }

    /// Device identifier this handle was opened with
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Stream direction
    pub fn direction(&self) -> StreamDirection {
        self.direction
    }

    /// Open mode
    pub fn open_mode(&self) -> OpenMode {
        self.mode
    }

    /// Parameter space as negotiated so far
    pub fn params(&self) -> &HwParams {
        &self.params
    }

    fn ensure_unapplied(&self, step: &'static str) -> Result<()> {
        if self.config.is_some() {
            return Err(SoundyError::configuration(step, DriverError::BadState));
        }
        Ok(())
    }

    /// See [`HwParams::set_access`]
    pub fn set_access(&mut self, access: AccessPattern) -> Result<()> {
        self.ensure_unapplied("set access mode")?;
        self.params.set_access(access)
    }

    /// See [`HwParams::set_channels`]
    pub fn set_channels(&mut self, channels: u32) -> Result<()> {
        self.ensure_unapplied("set number of channels")?;
        self.params.set_channels(channels)
    }

    /// See [`HwParams::set_rate_resample`]
    pub fn set_rate_resample(&mut self, enabled: bool) -> Result<()> {
        self.ensure_unapplied("set resample rate")?;
        self.params.set_rate_resample(enabled)
    }

    /// See [`HwParams::set_rate_near`]
    pub fn set_rate_near(&mut self, rate: u32) -> Result<u32> {
        self.ensure_unapplied("set rate near")?;
        self.params.set_rate_near(rate)
    }

    /// See [`HwParams::set_buffer_time_near`]
    pub fn set_buffer_time_near(&mut self, buffer_time_us: u32) -> Result<u32> {
        self.ensure_unapplied("set buffer time near")?;
        self.params.set_buffer_time_near(buffer_time_us)
    }

    /// See [`HwParams::set_period_time_near`]
    pub fn set_period_time_near(&mut self, period_time_us: u32) -> Result<u32> {
        self.ensure_unapplied("set period time near")?;
        self.params.set_period_time_near(period_time_us)
    }

    /// Commit the negotiated parameters to the stream.
    ///
    /// Allowed exactly once; a second call is a configuration error.
    pub fn apply(&mut self) -> Result<HwConfig> {
        const STEP: &str = "propagate hw params on device";
        self.ensure_unapplied(STEP)?;

        let request = self.params.resolve()?;
        let config = self
            .driver
            .apply(&request)
            .map_err(|source| SoundyError::configuration(STEP, source))?;

        debug!(
            "Applied hw params on '{}': {} Hz, {} ch, {:?}",
            self.id, config.rate, config.channels, config.format
        );
        debug!(
            "Period {} frames / {} µs, buffer {} frames / {} µs",
            config.period_size, config.period_time_us, config.buffer_size, config.buffer_time_us
        );

        self.config = Some(config);
        Ok(config)
    }

    /// Committed parameters, once [`apply`](Self::apply) succeeded
    pub fn config(&self) -> Option<HwConfig> {
        self.config
    }

    /// Whether parameters have been committed
    pub fn is_applied(&self) -> bool {
        self.config.is_some()
    }

    /// Actual sample format
    pub fn format(&self) -> Option<SampleFormat> {
        self.config.map(|c| c.format)
    }

    /// Actual access pattern
    pub fn access(&self) -> Option<AccessPattern> {
        self.config.map(|c| c.access)
    }

    /// Actual sample rate
    pub fn rate(&self) -> Option<u32> {
        self.config.map(|c| c.rate)
    }

    /// Actual channel count
    pub fn channels(&self) -> Option<u32> {
        self.config.map(|c| c.channels)
    }

    /// Actual ring buffer duration (µs)
    pub fn buffer_time(&self) -> Option<u32> {
        self.config.map(|c| c.buffer_time_us)
    }

    /// Actual period duration (µs)
    pub fn period_time(&self) -> Option<u32> {
        self.config.map(|c| c.period_time_us)
    }

    /// Ring buffer size in frames
    pub fn buffer_size(&self) -> Option<usize> {
        self.config.map(|c| c.buffer_size)
    }

    /// Period size in frames
    pub fn period_size(&self) -> Option<usize> {
        self.config.map(|c| c.period_size)
    }

    fn applied(&self) -> std::result::Result<HwConfig, DriverError> {
        self.config.ok_or(DriverError::BadState)
    }

    /// Make the stream writable. Needed after apply and after an underrun.
    pub fn prepare(&mut self) -> std::result::Result<(), DriverError> {
        self.applied()?;
        self.driver.prepare()
    }

    /// Write up to `frames` interleaved frames from the front of `data`.
    ///
    /// May accept fewer frames than asked; the caller loops.
    pub fn write_frames(
        &mut self,
        data: &[u8],
        frames: usize,
    ) -> std::result::Result<usize, DriverError> {
        let config = self.applied()?;
        if data.len() < frames * config.frame_bytes() {
            return Err(DriverError::InvalidArgument);
        }
        self.driver.write_interleaved(data, frames)
    }

    /// Try to leave the suspended state; `WouldBlock` means try again later
    pub fn resume(&mut self) -> std::result::Result<(), DriverError> {
        self.driver.resume()
    }

    /// Play out everything written so far, then stop
    pub fn drain(&mut self) -> std::result::Result<(), DriverError> {
        self.applied()?;
        self.driver.drain()
    }

    /// Stop now and discard pending frames
    pub fn drop_stream(&mut self) -> std::result::Result<(), DriverError> {
        self.applied()?;
        self.driver.drop_pending()
    }
}

impl Drop for DeviceHandle {
    fn drop(&mut self) {
        if !self.closed {
            self.closed = true;
            self.driver.close();
            debug!("Closed device '{}'", self.id);
        }
    }
}

impl std::fmt::Debug for DeviceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceHandle")
            .field("id", &self.id)
            .field("direction", &self.direction)
            .field("mode", &self.mode)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
