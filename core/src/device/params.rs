//! Hardware parameter negotiation
//!
//! [`HwParams`] starts as the full capability space a driver reports and is
//! narrowed one step at a time. Every `*_near` call may move the requested
//! value; the returned value is the one that counts for all later sizing.
//!
//! Order matters: format first (fixed at open), then access, then channels and
//! rate, then buffer and period durations.

use std::ops::RangeInclusive;

use super::format::{AccessPattern, SampleFormat};
use crate::error::{DriverError, Result, SoundyError};

/// Capability space reported by a driver for one open stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HwCapabilities {
    /// Supported sample encodings
    pub formats: Vec<SampleFormat>,
    /// Supported access patterns
    pub access: Vec<AccessPattern>,
    /// Supported channel counts
    pub channels: RangeInclusive<u32>,
    /// Rates reachable with resampling enabled (Hz)
    pub rates: RangeInclusive<u32>,
    /// Rates the hardware runs natively (Hz); the only choices without resampling
    pub native_rates: Vec<u32>,
    /// Ring buffer duration range (µs)
    pub buffer_time_us: RangeInclusive<u32>,
    /// Period duration range (µs)
    pub period_time_us: RangeInclusive<u32>,
}

/// Fully specified parameter set handed to the driver on apply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HwRequest {
    pub format: SampleFormat,
    pub access: AccessPattern,
    pub channels: u32,
    pub rate: u32,
    pub buffer_time_us: u32,
    pub period_time_us: u32,
}

/// Parameters as committed by the driver
///
/// Period and buffer sizes come from the driver after apply; they are never
/// derived from the requested values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HwConfig {
    pub format: SampleFormat,
    pub access: AccessPattern,
    pub channels: u32,
    pub rate: u32,
    pub buffer_time_us: u32,
    pub period_time_us: u32,
    /// Frames per period
    pub period_size: usize,
    /// Frames in the device ring buffer
    pub buffer_size: usize,
}

impl HwConfig {
    /// Bytes per interleaved frame
    pub fn frame_bytes(&self) -> usize {
        self.format.frame_bytes(self.channels)
    }

    /// Bytes in one period
    pub fn period_bytes(&self) -> usize {
        self.period_size * self.frame_bytes()
    }
}

/// Frames covered by `time_us` at `rate`, rounded to nearest, at least one
pub fn frames_for(rate: u32, time_us: u32) -> usize {
    let frames = (rate as u64 * time_us as u64 + 500_000) / 1_000_000;
    frames.max(1) as usize
}

/// Configuration space being narrowed
#[derive(Debug, Clone)]
pub struct HwParams {
    caps: HwCapabilities,
    format: Option<SampleFormat>,
    access: Option<AccessPattern>,
    channels: Option<u32>,
    resample: bool,
    rate: Option<u32>,
    buffer_time: Option<u32>,
    period_time: Option<u32>,
}

impl HwParams {
    /// Start from the full capability space
    pub fn any(caps: HwCapabilities) -> Self {
        Self {
            caps,
            format: None,
            access: None,
            channels: None,
            resample: true,
            rate: None,
            buffer_time: None,
            period_time: None,
        }
    }

    /// The capability space this negotiation started from
    pub fn capabilities(&self) -> &HwCapabilities {
        &self.caps
    }

    /// Fix the sample encoding. Allowed exactly once.
    pub fn set_format(&mut self, format: SampleFormat) -> Result<()> {
        const STEP: &str = "set format";
        if self.format.is_some() {
            return Err(SoundyError::configuration(STEP, DriverError::BadState));
        }
        if !self.caps.formats.contains(&format) {
            return Err(SoundyError::configuration(STEP, DriverError::InvalidArgument));
        }
        self.format = Some(format);
        Ok(())
    }

    /// Choose the access pattern. Must come before channels and rate.
    pub fn set_access(&mut self, access: AccessPattern) -> Result<()> {
        const STEP: &str = "set access mode";
        if self.access.is_some() || self.channels.is_some() || self.rate.is_some() {
            return Err(SoundyError::configuration(STEP, DriverError::BadState));
        }
        if !self.caps.access.contains(&access) {
            return Err(SoundyError::configuration(STEP, DriverError::InvalidArgument));
        }
        self.access = Some(access);
        Ok(())
    }

    /// Fix the channel count
    pub fn set_channels(&mut self, channels: u32) -> Result<()> {
        const STEP: &str = "set number of channels";
        if self.access.is_none() {
            return Err(SoundyError::configuration(STEP, DriverError::BadState));
        }
        if !self.caps.channels.contains(&channels) {
            return Err(SoundyError::configuration(STEP, DriverError::InvalidArgument));
        }
        self.channels = Some(channels);
        Ok(())
    }

    /// Allow or forbid software resampling. Must come before the rate.
    pub fn set_rate_resample(&mut self, enabled: bool) -> Result<()> {
        const STEP: &str = "set resample rate";
        if self.rate.is_some() {
            return Err(SoundyError::configuration(STEP, DriverError::BadState));
        }
        if !enabled && self.caps.native_rates.is_empty() {
            return Err(SoundyError::configuration(STEP, DriverError::InvalidArgument));
        }
        self.resample = enabled;
        Ok(())
    }

    /// Pick the supported rate closest to `requested` and return it
    pub fn set_rate_near(&mut self, requested: u32) -> Result<u32> {
        const STEP: &str = "set rate near";
        if self.access.is_none() {
            return Err(SoundyError::configuration(STEP, DriverError::BadState));
        }
        let actual = if self.resample {
            let (min, max) = (*self.caps.rates.start(), *self.caps.rates.end());
            if min > max {
                return Err(SoundyError::configuration(STEP, DriverError::InvalidArgument));
            }
            requested.clamp(min, max)
        } else {
            self.caps
                .native_rates
                .iter()
                .copied()
                .min_by_key(|&rate| (rate.abs_diff(requested), rate))
                .ok_or_else(|| SoundyError::configuration(STEP, DriverError::InvalidArgument))?
        };
        self.rate = Some(actual);
        Ok(actual)
    }

    /// Pick the ring buffer duration closest to `requested_us` and return it.
    /// If a period is already fixed, the buffer must stay strictly longer.
    pub fn set_buffer_time_near(&mut self, requested_us: u32) -> Result<u32> {
        const STEP: &str = "set buffer time near";
        let mut min = *self.caps.buffer_time_us.start();
        let max = *self.caps.buffer_time_us.end();
        if let Some(period) = self.period_time {
            min = min.max(period.saturating_add(1));
        }
        if min > max {
            return Err(SoundyError::configuration(STEP, DriverError::InvalidArgument));
        }
        let actual = requested_us.clamp(min, max);
        self.buffer_time = Some(actual);
        Ok(actual)
    }

    /// Pick the period duration closest to `requested_us` and return it.
    /// The period is kept strictly shorter than the buffer.
    pub fn set_period_time_near(&mut self, requested_us: u32) -> Result<u32> {
        const STEP: &str = "set period time near";
        let min = *self.caps.period_time_us.start();
        let mut max = *self.caps.period_time_us.end();
        if let Some(buffer) = self.buffer_time {
            max = max.min(buffer.saturating_sub(1));
        }
        if min > max {
            return Err(SoundyError::configuration(STEP, DriverError::InvalidArgument));
        }
        let actual = requested_us.clamp(min, max);
        self.period_time = Some(actual);
        Ok(actual)
    }

    /// Resolve the remaining choices into a concrete request.
    ///
    /// Format, access, channels and rate must be fixed. An unset buffer time
    /// defaults to the device maximum, an unset period to a quarter of the
    /// buffer.
    pub fn resolve(&self) -> Result<HwRequest> {
        const STEP: &str = "propagate hw params";
        let incomplete = || SoundyError::configuration(STEP, DriverError::BadState);

        let format = self.format.ok_or_else(incomplete)?;
        let access = self.access.ok_or_else(incomplete)?;
        let channels = self.channels.ok_or_else(incomplete)?;
        let rate = self.rate.ok_or_else(incomplete)?;

        let mut params = self.clone();
        let buffer_time_us = match params.buffer_time {
            Some(buffer) => buffer,
            None => params.set_buffer_time_near(*self.caps.buffer_time_us.end())?,
        };
        let period_time_us = match params.period_time {
            Some(period) => period,
            None => params.set_period_time_near(buffer_time_us / 4)?,
        };

        if period_time_us >= buffer_time_us {
            return Err(SoundyError::configuration(STEP, DriverError::InvalidArgument));
        }

        Ok(HwRequest {
            format,
            access,
            channels,
            rate,
            buffer_time_us,
            period_time_us,
        })
    }

    /// Currently fixed format
    pub fn format(&self) -> Option<SampleFormat> {
        self.format
    }

    /// Currently fixed access pattern
    pub fn access(&self) -> Option<AccessPattern> {
        self.access
    }

    /// Currently fixed channel count
    pub fn channels(&self) -> Option<u32> {
        self.channels
    }

    /// Currently fixed rate
    pub fn rate(&self) -> Option<u32> {
        self.rate
    }

    /// Whether resampling is allowed
    pub fn resample(&self) -> bool {
        self.resample
    }

    /// Currently fixed buffer duration
    pub fn buffer_time(&self) -> Option<u32> {
        self.buffer_time
    }

    /// Currently fixed period duration
    pub fn period_time(&self) -> Option<u32> {
        self.period_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps() -> HwCapabilities {
        HwCapabilities {
            formats: vec![SampleFormat::U8, SampleFormat::S16Le],
            access: vec![AccessPattern::Interleaved],
            channels: 1..=2,
            rates: 8_000..=48_000,
            native_rates: vec![44_100, 48_000],
            buffer_time_us: 10_000..=1_000_000,
            period_time_us: 5_000..=250_000,
        }
    }

    fn ready() -> HwParams {
        let mut params = HwParams::any(caps());
        params.set_format(SampleFormat::U8).unwrap();
        params.set_access(AccessPattern::Interleaved).unwrap();
        params.set_channels(1).unwrap();
        params
    }

    fn step_code(err: SoundyError) -> DriverError {
        match err {
            SoundyError::Configuration { source, .. } => source,
            other => panic!("expected configuration error, got {other:?}"),
        }
    }

    #[test]
    fn test_format_fixed_once() {
        let mut params = HwParams::any(caps());
        params.set_format(SampleFormat::U8).unwrap();
        let err = params.set_format(SampleFormat::S16Le).unwrap_err();
        assert_eq!(step_code(err), DriverError::BadState);
        assert_eq!(params.format(), Some(SampleFormat::U8));
    }

    #[test]
    fn test_unsupported_format_and_access() {
        let mut params = HwParams::any(caps());
        let err = params.set_format(SampleFormat::F32Le).unwrap_err();
        assert_eq!(step_code(err), DriverError::InvalidArgument);

        let err = params.set_access(AccessPattern::NonInterleaved);
        assert_eq!(step_code(err.unwrap_err()), DriverError::InvalidArgument);
    }

    #[test]
    fn test_access_must_precede_channels_and_rate() {
        let mut params = HwParams::any(caps());
        assert_eq!(
            step_code(params.set_channels(1).unwrap_err()),
            DriverError::BadState
        );
        assert_eq!(
            step_code(params.set_rate_near(44_100).unwrap_err()),
            DriverError::BadState
        );

        params.set_access(AccessPattern::Interleaved).unwrap();
        params.set_channels(2).unwrap();
        assert_eq!(
            step_code(params.set_access(AccessPattern::Interleaved).unwrap_err()),
            DriverError::BadState
        );
    }

    #[test]
    fn test_channels_out_of_range() {
        let mut params = HwParams::any(caps());
        params.set_access(AccessPattern::Interleaved).unwrap();
        let err = params.set_channels(6).unwrap_err();
        assert_eq!(step_code(err), DriverError::InvalidArgument);
        assert_eq!(params.channels(), None);
    }

    #[test]
    fn test_rate_near_stays_within_range() {
        for requested in [0, 1, 7_999, 8_000, 22_050, 44_100, 48_000, 96_000, u32::MAX] {
            let mut params = ready();
            let actual = params.set_rate_near(requested).unwrap();
            assert!(caps().rates.contains(&actual), "{requested} -> {actual}");
            assert_eq!(params.rate(), Some(actual));
        }
    }

    #[test]
    fn test_rate_near_rejects_inverted_range() {
        let mut params = HwParams::any(HwCapabilities {
            rates: 48_000..=44_100,
            ..caps()
        });
        params.set_format(SampleFormat::U8).unwrap();
        params.set_access(AccessPattern::Interleaved).unwrap();

        let err = params.set_rate_near(44_100).unwrap_err();
        assert_eq!(step_code(err), DriverError::InvalidArgument);
        assert_eq!(params.rate(), None);
    }

    #[test]
    fn test_rate_near_without_resample_picks_native() {
        let mut params = ready();
        params.set_rate_resample(false).unwrap();
        assert_eq!(params.set_rate_near(22_050).unwrap(), 44_100);
        assert_eq!(params.set_rate_near(47_000).unwrap(), 48_000);
    }

    #[test]
    fn test_resample_after_rate_rejected() {
        let mut params = ready();
        params.set_rate_near(44_100).unwrap();
        let err = params.set_rate_resample(false).unwrap_err();
        assert_eq!(step_code(err), DriverError::BadState);
    }

    #[test]
    fn test_period_kept_below_buffer() {
        let mut params = ready();
        params.set_rate_near(44_100).unwrap();
        let buffer = params.set_buffer_time_near(100_000).unwrap();
        let period = params.set_period_time_near(200_000).unwrap();
        assert_eq!(buffer, 100_000);
        assert!(period < buffer);
    }

    #[test]
    fn test_buffer_kept_above_period() {
        let mut params = ready();
        params.set_rate_near(44_100).unwrap();
        let period = params.set_period_time_near(200_000).unwrap();
        let buffer = params.set_buffer_time_near(50_000).unwrap();
        assert!(period < buffer);
    }

    #[test]
    fn test_impossible_period_is_rejected() {
        let mut tight = HwParams::any(HwCapabilities {
            period_time_us: 20_000..=40_000,
            ..caps()
        });
        tight.set_format(SampleFormat::U8).unwrap();
        tight.set_access(AccessPattern::Interleaved).unwrap();
        tight.set_buffer_time_near(10_000).unwrap();
        let err = tight.set_period_time_near(10_000).unwrap_err();
        assert_eq!(step_code(err), DriverError::InvalidArgument);
    }

    #[test]
    fn test_resolve_requires_core_parameters() {
        let mut params = HwParams::any(caps());
        params.set_format(SampleFormat::U8).unwrap();
        params.set_access(AccessPattern::Interleaved).unwrap();
        let err = params.resolve().unwrap_err();
        assert_eq!(step_code(err), DriverError::BadState);
    }

    #[test]
    fn test_resolve_defaults_buffer_and_period() {
        let mut params = ready();
        params.set_rate_near(44_100).unwrap();
        let request = params.resolve().unwrap();
        assert_eq!(request.buffer_time_us, 1_000_000);
        assert_eq!(request.period_time_us, 250_000);
        assert!(request.period_time_us < request.buffer_time_us);
    }

    #[test]
    fn test_frames_for_rounds_and_floors_at_one() {
        assert_eq!(frames_for(44_100, 100_000), 4_410);
        assert_eq!(frames_for(44_100, 500_000), 22_050);
        assert_eq!(frames_for(8_000, 1), 1);
    }
}
