//! Streaming engine
//!
//! Owns the playback lifecycle and the real-time thread.
//!
//! # Architecture
//!
//! ```text
//! Control Thread                       soundy-pcm Thread                Driver
//!     │                                       │                            │
//! [start]──CAS Stopped→Starting               │                            │
//!     │    prepare, spawn ──────────────────►[take device + generator]     │
//!     │    store Running                     [fill period]                 │
//!     │                                      [write, partial → loop]──────►│
//!     │                                      [underrun → prepare]─────────►│
//!     │                                      [suspend → resume loop]──────►│
//! [drain]──CAS Running→Draining              │                             │
//!     │    join ◄────────────────────────────[hand back, exit]             │
//!     │    device drain ─────────────────────────────────────────────────►│
//!     │    store Stopped                                                   │
//! ```
//!
//! # Usage
//!
//! ```ignore
//! let engine = StreamEngine::new(device);
//! engine.register_generator(SineWave::new(220.0))?;
//! engine.start()?;
//! // ...
//! engine.drain()?;
//! ```

mod metrics;
mod recovery;
mod state;
mod thread;


use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub use metrics::StreamStats;
pub use state::PlaybackState;

use crate::device::{AccessPattern, DeviceHandle, HwConfig, StreamDirection};
use crate::error::{DriverError, Result, SoundyError};
use crate::generator::{AudioBuffer, Bound, BoundGenerator, Generator, from_fn};
use metrics::SharedStats;
use state::AtomicState;
use thread::PcmThread;

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| {
        warn!("Engine mutex poisoned; continuing");
        e.into_inner()
    })
}

/// What the real-time thread does while the device answers `WouldBlock`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WaitPolicy {
    /// Busy-wait with a spin hint
    #[default]
    Spin,
    /// Yield the time slice
    Yield,
    /// Sleep for [`EngineOptions::wait_sleep`]
    Sleep,
}

/// Engine tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineOptions {
    pub wait_policy: WaitPolicy,
    /// Sleep used by [`WaitPolicy::Sleep`]
    pub wait_sleep: Duration,
    /// Pause between `resume` attempts while the device is suspended
    pub resume_backoff: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            wait_policy: WaitPolicy::Spin,
            wait_sleep: Duration::from_millis(1),
            resume_backoff: Duration::from_millis(50),
        }
    }
}

/// Device and generator, parked here whenever the real-time thread is not running
#[derive(Default)]
pub(crate) struct Parts {
    device: Option<DeviceHandle>,
    generator: Option<Box<dyn BoundGenerator>>,
}

impl Parts {
    /// Take both, or nothing if either is missing
    fn take(&mut self) -> Option<(DeviceHandle, Box<dyn BoundGenerator>)> {
        if self.device.is_none() || self.generator.is_none() {
            return None;
        }
        Some((self.device.take()?, self.generator.take()?))
    }
}

/// State shared with the real-time thread
pub(crate) struct Shared {
    state: AtomicState,
    stats: SharedStats,
    fault: Mutex<Option<SoundyError>>,
    parts: Mutex<Parts>,
}

/// Drives one playback device from a dedicated real-time thread.
///
/// All lifecycle calls take `&self`, so the engine can be shared between
/// control threads; the state machine settles races (exactly one concurrent
/// `start` wins).
pub struct StreamEngine {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
    device_id: String,
    config: Option<HwConfig>,
    options: EngineOptions,
}

impl StreamEngine {
    /// Take ownership of a negotiated device
    pub fn new(device: DeviceHandle) -> Self {
        Self::with_options(device, EngineOptions::default())
    }

    pub fn with_options(device: DeviceHandle, options: EngineOptions) -> Self {
        let device_id = device.id().to_string();
        let config = device.config();
        Self {
            shared: Arc::new(Shared {
                state: AtomicState::new(PlaybackState::Stopped),
                stats: SharedStats::default(),
                fault: Mutex::new(None),
                parts: Mutex::new(Parts {
                    device: Some(device),
                    generator: None,
                }),
            }),
            worker: Mutex::new(None),
            device_id,
            config,
            options,
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> PlaybackState {
        self.shared.state.load(Ordering::Acquire)
    }

    /// Parameters the device was applied with
    pub fn config(&self) -> Option<HwConfig> {
        self.config
    }

    pub fn options(&self) -> EngineOptions {
        self.options
    }

    /// Counters published by the real-time thread
    pub fn stats(&self) -> StreamStats {
        self.shared.stats.snapshot()
    }

    /// Fault that ended the real-time loop, if any.
    ///
    /// Also returned by the next [`drain`](Self::drain) or
    /// [`drop_stream`](Self::drop_stream).
    pub fn fault(&self) -> Option<SoundyError> {
        lock(&self.shared.fault).clone()
    }

    /// Whether the real-time thread is running
    pub fn is_alive(&self) -> bool {
        lock(&self.worker)
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Install the generator used for every period. Only while stopped.
    ///
    /// Replaces any previous generator and starts from a fresh cursor.
    pub fn register_generator<G: Generator>(&self, generator: G) -> Result<()> {
        let mut parts = lock(&self.shared.parts);
        let state = self.state();
        if state != PlaybackState::Stopped {
            return Err(SoundyError::InvalidState {
                operation: "register generator",
                state,
            });
        }
        parts.generator = Some(Box::new(Bound::new(generator)));
        Ok(())
    }

    /// Install a closure as the generator, with `C` as its cursor
    pub fn register_fn<C, F>(&self, f: F) -> Result<()>
    where
        C: Default + Send + 'static,
        F: FnMut(&mut AudioBuffer<'_>, &mut C) + Send + 'static,
    {
        self.register_generator(from_fn(f))
    }

    /// Prepare the device and spawn the real-time thread.
    ///
    /// Fails with [`SoundyError::AlreadyStarted`] if another `start` got there
    /// first or playback is already running.
    pub fn start(&self) -> Result<()> {
        if let Err(state) = self
            .shared
            .state
            .transition(PlaybackState::Stopped, PlaybackState::Starting)
        {
            return Err(match state {
                PlaybackState::Starting | PlaybackState::Running => SoundyError::AlreadyStarted,
                state => SoundyError::InvalidState {
                    operation: "start",
                    state,
                },
            });
        }

        match self.launch() {
            Ok(()) => {
                self.shared
                    .state
                    .store(PlaybackState::Running, Ordering::Release);
                debug!("Playback started on '{}'", self.device_id);
                Ok(())
            }
            Err(err) => {
                self.shared
                    .state
                    .store(PlaybackState::Stopped, Ordering::Release);
                Err(err)
            }
        }
    }

    fn launch(&self) -> Result<()> {
        const STEP: &str = "start playback";

        let config = {
            let mut parts = lock(&self.shared.parts);
            if parts.generator.is_none() {
                return Err(SoundyError::NoGenerator);
            }
            let device = parts
                .device
                .as_mut()
                .ok_or_else(|| SoundyError::DeviceUnavailable {
                    device: self.device_id.clone(),
                    source: DriverError::NoDevice,
                })?;
            let config = device
                .config()
                .ok_or_else(|| SoundyError::configuration(STEP, DriverError::BadState))?;
            if device.direction() != StreamDirection::Playback
                || config.access != AccessPattern::Interleaved
            {
                return Err(SoundyError::configuration(STEP, DriverError::InvalidArgument));
            }
            device
                .prepare()
                .map_err(|source| SoundyError::DeviceUnavailable {
                    device: self.device_id.clone(),
                    source,
                })?;
            config
        };

        *lock(&self.shared.fault) = None;

        let handle = PcmThread::spawn(self.shared.clone(), config, self.options)
            .map_err(|e| SoundyError::Spawn(e.to_string()))?;
        *lock(&self.worker) = Some(handle);
        Ok(())
    }

    /// Finish the current period, play out everything written, then stop.
    ///
    /// A no-op when already stopped. Returns the fault that ended the
    /// real-time loop, if there was one.
    pub fn drain(&self) -> Result<()> {
        self.stop(PlaybackState::Draining)
    }

    /// Stop now, discarding the period in flight and everything queued.
    ///
    /// A no-op when already stopped. Returns the fault that ended the
    /// real-time loop, if there was one.
    pub fn drop_stream(&self) -> Result<()> {
        self.stop(PlaybackState::Dropped)
    }

    fn stop(&self, target: PlaybackState) -> Result<()> {
        let operation = match target {
            PlaybackState::Draining => "drain",
            _ => "drop",
        };

        loop {
            match self.shared.state.transition(PlaybackState::Running, target) {
                Ok(()) => break,
                Err(PlaybackState::Stopped) => return Ok(()),
                // start is between its CAS and spawning the thread
                Err(PlaybackState::Starting) => std::thread::yield_now(),
                Err(state) => return Err(SoundyError::InvalidState { operation, state }),
            }
        }

        let result = self.quiesce(target, operation);
        self.shared
            .state
            .store(PlaybackState::Stopped, Ordering::Release);
        debug!("Playback stopped on '{}' ({})", self.device_id, operation);
        result
    }

    fn quiesce(&self, target: PlaybackState, operation: &'static str) -> Result<()> {
        let handle = lock(&self.worker).take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                return Err(SoundyError::WorkerPanicked);
            }
        }

        let mut parts = lock(&self.shared.parts);
        let device = parts.device.as_mut().ok_or(SoundyError::WorkerPanicked)?;
        let quiesced = match target {
            PlaybackState::Draining => device.drain(),
            _ => device.drop_stream(),
        };

        if let Some(fault) = lock(&self.shared.fault).take() {
            if let Err(err) = quiesced {
                debug!("Ignoring {} error after fault: {}", operation, err);
            }
            return Err(fault);
        }
        quiesced.map_err(|source| SoundyError::fault(operation, source))
    }
}

impl Drop for StreamEngine {
    fn drop(&mut self) {
        if self.state() != PlaybackState::Stopped {
            if let Err(err) = self.drop_stream() {
                warn!("Error stopping playback on drop: {}", err);
            }
        }
    }
}

impl std::fmt::Debug for StreamEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamEngine")
            .field("device", &self.device_id)
            .field("state", &self.state())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
