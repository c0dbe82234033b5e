//! Real-time PCM thread
//!
//! Pulls one period from the generator, writes it to the device and repeats
//! until the engine leaves `Starting`/`Running`. The device and generator are
//! taken out of the engine when the thread starts and handed back before it
//! exits, so only one thread ever touches them.

use std::io;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use tracing::{debug, error, trace};

use super::metrics::{IntervalMetrics, SharedStats};
use super::recovery::{Recovery, recover};
use super::{EngineOptions, PlaybackState, Shared, WaitPolicy, lock};
use crate::device::{DeviceHandle, HwConfig};
use crate::error::{DriverError, Result};
use crate::generator::{AudioBuffer, BoundGenerator};

/// Thread name, visible in debuggers and `top -H`
pub(super) const THREAD_NAME: &str = "soundy-pcm";

/// How a period write ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PeriodOutcome {
    Written,
    /// Stop requested part-way through
    Abandoned,
}

pub(super) struct PcmThread {
    shared: Arc<Shared>,
    device: DeviceHandle,
    generator: Box<dyn BoundGenerator>,
    config: HwConfig,
    options: EngineOptions,

    /// One period of interleaved bytes, allocated once
    buffer: Vec<u8>,

    metrics: IntervalMetrics,
}

impl PcmThread {
    /// Spawn the real-time thread.
    ///
    /// The device and generator stay in the engine until the thread picks
    /// them up, so a failed spawn leaves the engine intact.
    pub fn spawn(
        shared: Arc<Shared>,
        config: HwConfig,
        options: EngineOptions,
    ) -> io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name(THREAD_NAME.into())
            .spawn(move || {
                let parts = lock(&shared.parts).take();
                let Some((device, generator)) = parts else {
                    error!("PCM thread started without a device or generator");
                    return;
                };

                let mut pcm = Self {
                    shared,
                    device,
                    generator,
                    config,
                    options,
                    buffer: vec![0; config.period_bytes()],
                    metrics: IntervalMetrics::new(),
                };
                pcm.run();
                pcm.hand_back();
            })
    }

    fn state(&self) -> PlaybackState {
        self.shared.state.load(Ordering::Acquire)
    }

    fn run(&mut self) {
        debug!(
            "PCM thread started on '{}' ({} frames/period, {} bytes)",
            self.device.id(),
            self.config.period_size,
            self.buffer.len()
        );

        while self.state().is_active() {
            let started = Instant::now();
            self.generator
                .fill(&mut AudioBuffer::new(&mut self.buffer, &self.config));
            self.metrics.record_fill(started);

            match self.write_period() {
                Ok(PeriodOutcome::Written) => {
                    SharedStats::bump(&self.shared.stats.periods, 1);
                    self.metrics.periods += 1;
                }
                Ok(PeriodOutcome::Abandoned) => break,
                Err(err) => {
                    error!("PCM thread stopping on '{}': {}", self.device.id(), err);
                    SharedStats::bump(&self.shared.stats.faults, 1);
                    *lock(&self.shared.fault) = Some(err);
                    break;
                }
            }

            self.metrics.maybe_log();
        }

        debug!("PCM thread finished ({:?})", self.state());
    }

    /// Write the whole period buffer, looping on partial writes and
    /// replaying whatever is left after a recovery
    fn write_period(&mut self) -> Result<PeriodOutcome> {
        let frame_bytes = self.config.frame_bytes();
        let total = self.config.period_size;
        let mut written = 0;

        while written < total {
            if self.state() == PlaybackState::Dropped {
                trace!("Dropping {} unwritten frames", total - written);
                return Ok(PeriodOutcome::Abandoned);
            }

            let remaining = total - written;
            match self
                .device
                .write_frames(&self.buffer[written * frame_bytes..], remaining)
            {
                Ok(0) => self.wait(),
                Ok(frames) => {
                    if frames < remaining {
                        trace!("Partial write: {} of {} frames", frames, remaining);
                        self.metrics.partial_writes += 1;
                    }
                    written += frames;
                    self.metrics.frames += frames as u64;
                    SharedStats::bump(&self.shared.stats.frames_written, frames as u64);
                }
                Err(DriverError::WouldBlock) => {
                    self.metrics.would_block += 1;
                    SharedStats::bump(&self.shared.stats.would_block_retries, 1);
                    self.wait();
                }
                Err(err) => {
                    self.metrics.recoveries += 1;
                    let shared = &self.shared;
                    let outcome = recover(
                        &mut self.device,
                        err,
                        &shared.stats,
                        self.options.resume_backoff,
                        || !shared.state.load(Ordering::Acquire).is_active(),
                    )?;
                    if outcome == Recovery::Abandoned {
                        return Ok(PeriodOutcome::Abandoned);
                    }
                }
            }
        }

        Ok(PeriodOutcome::Written)
    }

    fn wait(&self) {
        match self.options.wait_policy {
            WaitPolicy::Spin => std::hint::spin_loop(),
            WaitPolicy::Yield => thread::yield_now(),
            WaitPolicy::Sleep => thread::sleep(self.options.wait_sleep),
        }
    }

    fn hand_back(self) {
        let mut parts = lock(&self.shared.parts);
        parts.device = Some(self.device);
        parts.generator = Some(self.generator);
    }
}
