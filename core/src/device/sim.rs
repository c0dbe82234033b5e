//! In-memory PCM driver
//!
//! Behaves like a small ALSA-style stream state machine without touching any
//! hardware. Used by the test-suite and for headless runs of the CLI.
//!
//! - Devices are registered on a [`SimulatedHost`] and claimed exclusively on open
//! - With pacing enabled, written frames drain at the configured rate: a full
//!   ring blocks (or reports `WouldBlock`) and a ring that runs dry reports an
//!   underrun on the next write
//! - A [`SimProbe`] inspects call counters and captured output, and scripts
//!   faults while the stream is owned by a running engine

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing::trace;

use super::driver::{PcmBackend, PcmDriver};
use super::format::{AccessPattern, SampleFormat};
use super::params::{HwCapabilities, HwConfig, HwRequest, frames_for};
use super::{OpenMode, StreamDirection};
use crate::error::DriverError;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Description of a simulated device
#[derive(Debug, Clone)]
pub struct SimulatedDevice {
    id: String,
    caps: HwCapabilities,
    max_frames_per_write: Option<usize>,
    paced: bool,
    capture: bool,
}

impl SimulatedDevice {
    /// A device with broad capabilities: all formats and access patterns,
    /// 1-8 channels, 4-192 kHz, 1 ms - 2 s buffers
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            caps: HwCapabilities {
                formats: vec![SampleFormat::U8, SampleFormat::S16Le, SampleFormat::F32Le],
                access: vec![AccessPattern::Interleaved, AccessPattern::NonInterleaved],
                channels: 1..=8,
                rates: 4_000..=192_000,
                native_rates: vec![44_100, 48_000],
                buffer_time_us: 1_000..=2_000_000,
                period_time_us: 500..=1_000_000,
            },
            max_frames_per_write: None,
            paced: false,
            capture: false,
        }
    }

    /// Replace the full capability space
    pub fn with_capabilities(mut self, caps: HwCapabilities) -> Self {
        self.caps = caps;
        self
    }

    /// Restrict the supported sample formats
    pub fn with_formats(mut self, formats: Vec<SampleFormat>) -> Self {
        self.caps.formats = formats;
        self
    }

    /// Accept at most `frames` per write call, forcing partial writes
    pub fn with_max_frames_per_write(mut self, frames: usize) -> Self {
        self.max_frames_per_write = Some(frames.max(1));
        self
    }

    /// Consume written frames in real time at the negotiated rate
    pub fn with_pacing(mut self, paced: bool) -> Self {
        self.paced = paced;
        self
    }

    /// Keep a copy of every byte written
    pub fn with_capture(mut self, capture: bool) -> Self {
        self.capture = capture;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PcmState {
    Open,
    Setup,
    Prepared,
    Running,
    Xrun,
    Suspended,
}

#[derive(Debug, Default, Clone, Copy)]
struct Calls {
    apply: u32,
    prepare: u32,
    write: u64,
    resume: u32,
    drain: u32,
    drop: u32,
    close: u32,
}

struct SimState {
    setup: SimulatedDevice,
    claimed: bool,
    direction: StreamDirection,
    mode: OpenMode,
    config: Option<HwConfig>,
    pcm: PcmState,
    calls: Calls,
    frames_written: u64,
    /// Frames written since the last prepare (pacing)
    queued_since_prepare: u64,
    /// When the first frame after prepare was written (pacing)
    started_at: Option<Instant>,
    captured: Vec<u8>,
    /// Per-write script; `None` entries let a write through
    write_faults: VecDeque<Option<DriverError>>,
    resume_results: VecDeque<Result<(), DriverError>>,
    prepare_faults: VecDeque<DriverError>,
}

impl SimState {
    fn new(setup: SimulatedDevice) -> Self {
        Self {
            setup,
            claimed: false,
            direction: StreamDirection::Playback,
            mode: OpenMode::NonBlocking,
            config: None,
            pcm: PcmState::Open,
            calls: Calls::default(),
            frames_written: 0,
            queued_since_prepare: 0,
            started_at: None,
            captured: Vec::new(),
            write_faults: VecDeque::new(),
            resume_results: VecDeque::new(),
            prepare_faults: VecDeque::new(),
        }
    }

    /// Frames still waiting in the simulated ring, or `None` if it ran dry
    fn queued_frames(&self, config: &HwConfig) -> Option<u64> {
        let Some(started) = self.started_at else {
            return Some(self.queued_since_prepare);
        };
        let played = (started.elapsed().as_micros() as u64 * config.rate as u64) / 1_000_000;
        if played > self.queued_since_prepare {
            None
        } else {
            Some(self.queued_since_prepare - played)
        }
    }

    fn reset_ring(&mut self) {
        self.queued_since_prepare = 0;
        self.started_at = None;
    }
}

type Shared = Arc<Mutex<SimState>>;

/// A set of simulated devices that can be opened by identifier
#[derive(Clone, Default)]
pub struct SimulatedHost {
    devices: Arc<Mutex<HashMap<String, Shared>>>,
}

impl SimulatedHost {
    /// Host with no devices
    pub fn new() -> Self {
        Self::default()
    }

    /// Host with a single `"default"` device
    pub fn with_default_device() -> Self {
        let host = Self::new();
        host.add_device(SimulatedDevice::new("default"));
        host
    }

    /// Register a device, replacing any device with the same identifier
    pub fn add_device(&self, device: SimulatedDevice) {
        let id = device.id.clone();
        lock(&self.devices).insert(id, Arc::new(Mutex::new(SimState::new(device))));
    }

    /// Inspection and fault-injection handle for a registered device
    pub fn probe(&self, id: &str) -> Option<SimProbe> {
        lock(&self.devices)
            .get(id)
            .map(|state| SimProbe {
                state: state.clone(),
            })
    }
}

impl PcmBackend for SimulatedHost {
    fn name(&self) -> &'static str {
        "sim"
    }

    fn open(
        &self,
        device_id: &str,
        direction: StreamDirection,
        mode: OpenMode,
    ) -> Result<Box<dyn PcmDriver>, DriverError> {
        let shared = lock(&self.devices)
            .get(device_id)
            .cloned()
            .ok_or(DriverError::NoDevice)?;

        {
            let mut state = lock(&shared);
            if state.claimed {
                return Err(DriverError::Busy);
            }
            state.claimed = true;
            state.direction = direction;
            state.mode = mode;
            state.config = None;
            state.pcm = PcmState::Open;
            state.reset_ring();
        }

        Ok(Box::new(SimulatedDriver {
            state: shared,
            closed: false,
        }))
    }
}

struct SimulatedDriver {
    state: Shared,
    closed: bool,
}

impl SimulatedDriver {
    fn frames_to_duration(frames: u64, rate: u32) -> Duration {
        Duration::from_micros(frames * 1_000_000 / rate.max(1) as u64)
    }
}

impl PcmDriver for SimulatedDriver {
    fn capabilities(&self) -> Result<HwCapabilities, DriverError> {
        Ok(lock(&self.state).setup.caps.clone())
    }

    fn apply(&mut self, request: &HwRequest) -> Result<HwConfig, DriverError> {
        let mut state = lock(&self.state);
        state.calls.apply += 1;

        let caps = &state.setup.caps;
        let valid = caps.formats.contains(&request.format)
            && caps.access.contains(&request.access)
            && caps.channels.contains(&request.channels)
            && caps.rates.contains(&request.rate)
            && caps.buffer_time_us.contains(&request.buffer_time_us)
            && caps.period_time_us.contains(&request.period_time_us)
            && request.period_time_us < request.buffer_time_us;
        if !valid {
            return Err(DriverError::InvalidArgument);
        }

        let config = HwConfig {
            format: request.format,
            access: request.access,
            channels: request.channels,
            rate: request.rate,
            buffer_time_us: request.buffer_time_us,
            period_time_us: request.period_time_us,
            period_size: frames_for(request.rate, request.period_time_us),
            buffer_size: frames_for(request.rate, request.buffer_time_us),
        };
        state.config = Some(config);
        state.pcm = PcmState::Setup;
        Ok(config)
    }

    fn prepare(&mut self) -> Result<(), DriverError> {
        let mut state = lock(&self.state);
        state.calls.prepare += 1;
        if let Some(err) = state.prepare_faults.pop_front() {
            return Err(err);
        }
        if state.config.is_none() {
            return Err(DriverError::BadState);
        }
        state.pcm = PcmState::Prepared;
        state.reset_ring();
        Ok(())
    }

    fn write_interleaved(&mut self, data: &[u8], frames: usize) -> Result<usize, DriverError> {
        loop {
            let mut state = lock(&self.state);
            state.calls.write += 1;

            if let Some(Some(err)) = state.write_faults.pop_front() {
                match err {
                    DriverError::Underrun => state.pcm = PcmState::Xrun,
                    DriverError::Suspended => state.pcm = PcmState::Suspended,
                    _ => {}
                }
                trace!("sim: injected write fault {:?}", err);
                return Err(err);
            }

            match state.pcm {
                PcmState::Xrun => return Err(DriverError::Underrun),
                PcmState::Suspended => return Err(DriverError::Suspended),
                PcmState::Open | PcmState::Setup => return Err(DriverError::BadState),
                PcmState::Prepared | PcmState::Running => {}
            }
            if state.direction != StreamDirection::Playback {
                return Err(DriverError::BadState);
            }
            let config = state.config.ok_or(DriverError::BadState)?;

            let mut accepted = frames;
            if let Some(max) = state.setup.max_frames_per_write {
                accepted = accepted.min(max);
            }

            if state.setup.paced {
                let Some(queued) = state.queued_frames(&config) else {
                    state.pcm = PcmState::Xrun;
                    return Err(DriverError::Underrun);
                };
                let space = (config.buffer_size as u64).saturating_sub(queued) as usize;
                if space == 0 {
                    if state.mode == OpenMode::NonBlocking {
                        return Err(DriverError::WouldBlock);
                    }
                    let wait = Self::frames_to_duration(config.period_size as u64, config.rate) / 4;
                    drop(state);
                    std::thread::sleep(wait.max(Duration::from_micros(100)));
                    continue;
                }
                accepted = accepted.min(space);
            }

            if state.setup.capture {
                let bytes = accepted * config.frame_bytes();
                state.captured.extend_from_slice(&data[..bytes]);
            }
            state.frames_written += accepted as u64;
            state.queued_since_prepare += accepted as u64;
            if state.pcm == PcmState::Prepared {
                state.pcm = PcmState::Running;
                state.started_at = Some(Instant::now());
            }
            return Ok(accepted);
        }
    }

    fn resume(&mut self) -> Result<(), DriverError> {
        let mut state = lock(&self.state);
        state.calls.resume += 1;
        match state.resume_results.pop_front() {
            Some(Ok(())) | None if state.pcm == PcmState::Suspended => {
                state.pcm = PcmState::Prepared;
                state.reset_ring();
                Ok(())
            }
            Some(Err(err)) => Err(err),
            _ => Err(DriverError::BadState),
        }
    }

    fn drain(&mut self) -> Result<(), DriverError> {
        let (remaining, rate) = {
            let mut state = lock(&self.state);
            state.calls.drain += 1;
            let config = state.config.ok_or(DriverError::BadState)?;
            let remaining = if state.setup.paced && state.pcm == PcmState::Running {
                state.queued_frames(&config).unwrap_or(0)
            } else {
                0
            };
            (remaining, config.rate)
        };

        if remaining > 0 {
            std::thread::sleep(Self::frames_to_duration(remaining, rate));
        }

        let mut state = lock(&self.state);
        state.pcm = PcmState::Setup;
        state.reset_ring();
        Ok(())
    }

    fn drop_pending(&mut self) -> Result<(), DriverError> {
        let mut state = lock(&self.state);
        state.calls.drop += 1;
        if state.config.is_none() {
            return Err(DriverError::BadState);
        }
        state.pcm = PcmState::Setup;
        state.reset_ring();
        Ok(())
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let mut state = lock(&self.state);
        state.calls.close += 1;
        state.claimed = false;
        state.config = None;
        state.pcm = PcmState::Open;
        state.reset_ring();
    }
}

/// Inspection and fault-injection handle for one simulated device
#[derive(Clone)]
pub struct SimProbe {
    state: Shared,
}

impl SimProbe {
    /// Make the next write fail with `err`. Underrun and suspend faults also
    /// move the stream into the matching state, as real hardware would.
    pub fn inject_write_error(&self, err: DriverError) {
        self.inject_write_error_after(0, err);
    }

    /// Let `successes` more writes through, then fail one with `err`
    pub fn inject_write_error_after(&self, successes: usize, err: DriverError) {
        let mut state = lock(&self.state);
        state.write_faults.extend(std::iter::repeat_n(None, successes));
        state.write_faults.push_back(Some(err));
    }

    /// Script the result of the next `resume` call
    pub fn inject_resume_result(&self, result: Result<(), DriverError>) {
        lock(&self.state).resume_results.push_back(result);
    }

    /// Make the next `prepare` call fail with `err`
    pub fn inject_prepare_error(&self, err: DriverError) {
        lock(&self.state).prepare_faults.push_back(err);
    }

    /// Put the stream into the suspended state, as power management would
    pub fn suspend(&self) {
        let mut state = lock(&self.state);
        if state.config.is_some() {
            state.pcm = PcmState::Suspended;
        }
    }

    /// Capability space of the device
    pub fn capabilities(&self) -> HwCapabilities {
        lock(&self.state).setup.caps.clone()
    }

    /// Committed parameters, if any
    pub fn config(&self) -> Option<HwConfig> {
        lock(&self.state).config
    }

    /// Whether a handle currently holds the device
    pub fn is_claimed(&self) -> bool {
        lock(&self.state).claimed
    }

    /// Everything written so far (capture must be enabled)
    pub fn captured(&self) -> Vec<u8> {
        lock(&self.state).captured.clone()
    }

    /// Total frames accepted
    pub fn frames_written(&self) -> u64 {
        lock(&self.state).frames_written
    }

    pub fn apply_calls(&self) -> u32 {
        lock(&self.state).calls.apply
    }

    pub fn prepare_calls(&self) -> u32 {
        lock(&self.state).calls.prepare
    }

    pub fn write_calls(&self) -> u64 {
        lock(&self.state).calls.write
    }

    pub fn resume_calls(&self) -> u32 {
        lock(&self.state).calls.resume
    }

    pub fn drain_calls(&self) -> u32 {
        lock(&self.state).calls.drain
    }

    pub fn drop_calls(&self) -> u32 {
        lock(&self.state).calls.drop
    }

    pub fn close_calls(&self) -> u32 {
        lock(&self.state).calls.close
    }
}
