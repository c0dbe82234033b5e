//! Write-path fault recovery
//!
//! - Underrun: `prepare` once, then keep writing
//! - Suspended: `resume` until it stops answering `WouldBlock`; a hard resume
//!   failure falls back to `prepare`
//! - Anything else ends the stream

use std::time::Duration;

use tracing::{debug, warn};

use super::metrics::SharedStats;
use crate::device::DeviceHandle;
use crate::error::{DriverError, Result, SoundyError};

/// How a recovery attempt ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Recovery {
    /// The device accepts writes again
    Recovered,
    /// A stop was requested while waiting on the device
    Abandoned,
}

pub(super) fn recover(
    device: &mut DeviceHandle,
    err: DriverError,
    stats: &SharedStats,
    resume_backoff: Duration,
    stop_requested: impl Fn() -> bool,
) -> Result<Recovery> {
    match err {
        DriverError::Underrun => {
            SharedStats::bump(&stats.underruns, 1);
            warn!("Underrun on '{}', re-preparing", device.id());
            device
                .prepare()
                .map_err(|source| SoundyError::fault("prepare after underrun", source))?;
            Ok(Recovery::Recovered)
        }
        DriverError::Suspended => {
            SharedStats::bump(&stats.suspends, 1);
            warn!("'{}' suspended, waiting for resume", device.id());
            resume(device, resume_backoff, stop_requested)
        }
        other => Err(SoundyError::fault("write", other)),
    }
}

fn resume(
    device: &mut DeviceHandle,
    backoff: Duration,
    stop_requested: impl Fn() -> bool,
) -> Result<Recovery> {
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        match device.resume() {
            Ok(()) => {
                debug!("'{}' resumed after {} attempt(s)", device.id(), attempts);
                return Ok(Recovery::Recovered);
            }
            Err(DriverError::WouldBlock) => {
                if stop_requested() {
                    debug!("Stop requested while '{}' was suspended", device.id());
                    return Ok(Recovery::Abandoned);
                }
                std::thread::sleep(backoff);
            }
            Err(source) => {
                warn!(
                    "Resume failed on '{}' ({}), falling back to prepare",
                    device.id(),
                    source
                );
                device
                    .prepare()
                    .map_err(|source| SoundyError::DeviceUnavailable {
                        device: device.id().to_string(),
                        source,
                    })?;
                return Ok(Recovery::Recovered);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{applied_device, sim_host};

    /// Recover without backoff and without a pending stop
    fn recover_now(
        device: &mut DeviceHandle,
        err: DriverError,
        stats: &SharedStats,
    ) -> Result<Recovery> {
        recover(device, err, stats, Duration::ZERO, || false)
    }

    #[test]
    fn test_underrun_prepares_once() {
        let (host, mut device) = applied_device(1, 8_000, 100_000, 10_000);
        let stats = SharedStats::default();
        let probe = host.probe("default").unwrap();

        let outcome = recover_now(&mut device, DriverError::Underrun, &stats);
        assert_eq!(outcome, Ok(Recovery::Recovered));
        assert_eq!(probe.prepare_calls(), 1);
        assert_eq!(stats.snapshot().underruns, 1);
    }

    #[test]
    fn test_resume_retries_would_block() {
        let (host, mut device) = applied_device(1, 8_000, 100_000, 10_000);
        let probe = host.probe("default").unwrap();
        device.prepare().unwrap();
        probe.suspend();
        probe.inject_resume_result(Err(DriverError::WouldBlock));
        probe.inject_resume_result(Err(DriverError::WouldBlock));

        let stats = SharedStats::default();
        let outcome = recover_now(&mut device, DriverError::Suspended, &stats);
        assert_eq!(outcome, Ok(Recovery::Recovered));
        assert_eq!(probe.resume_calls(), 3);
        assert_eq!(probe.prepare_calls(), 1);
    }

    #[test]
    fn test_hard_resume_failure_falls_back_to_prepare() {
        let (host, mut device) = applied_device(1, 8_000, 100_000, 10_000);
        let probe = host.probe("default").unwrap();
        probe.inject_resume_result(Err(DriverError::Code(-5)));

        let stats = SharedStats::default();
        let outcome = recover_now(&mut device, DriverError::Suspended, &stats);
        assert_eq!(outcome, Ok(Recovery::Recovered));
        assert_eq!(probe.prepare_calls(), 1);
    }

    #[test]
    fn test_failed_fallback_is_device_unavailable() {
        let (host, mut device) = applied_device(1, 8_000, 100_000, 10_000);
        let probe = host.probe("default").unwrap();
        probe.inject_resume_result(Err(DriverError::Code(-5)));
        probe.inject_prepare_error(DriverError::NoDevice);

        let stats = SharedStats::default();
        let err = recover_now(&mut device, DriverError::Suspended, &stats).unwrap_err();
        assert!(matches!(
            err,
            SoundyError::DeviceUnavailable {
                source: DriverError::NoDevice,
                ..
            }
        ));
    }

    #[test]
    fn test_stop_request_abandons_resume_wait() {
        let (host, mut device) = applied_device(1, 8_000, 100_000, 10_000);
        let probe = host.probe("default").unwrap();
        probe.inject_resume_result(Err(DriverError::WouldBlock));

        let stats = SharedStats::default();
        let outcome = recover(
            &mut device,
            DriverError::Suspended,
            &stats,
            Duration::ZERO,
            || true,
        );
        assert_eq!(outcome, Ok(Recovery::Abandoned));
        assert_eq!(probe.resume_calls(), 1);
    }

    #[test]
    fn test_other_errors_are_faults() {
        let host = sim_host();
        let mut device = crate::test_utils::apply_on(&host, 1, 8_000, 100_000, 10_000);
        let stats = SharedStats::default();
        let err = recover_now(&mut device, DriverError::Busy, &stats).unwrap_err();
        assert_eq!(err, SoundyError::fault("write", DriverError::Busy));
    }
}
