//! Hardware output using cpal and a byte ring buffer
//!
//! cpal pulls samples from a callback; the driver contract pushes them with
//! blocking or non-blocking writes. A `HeapRb<u8>` sized to the negotiated
//! ring buffer sits in between: writes push whole frames, the callback pops
//! and decodes them in the negotiated format, padding with silence.
//!
//! `cpal::Stream` may not leave the thread that built it, so each open device
//! gets a small owner thread holding the cpal device and stream. The driver
//! talks to it over a command channel.
//!
//! - The callback running dry while playing is reported as an underrun
//! - `DeviceNotAvailable` from the stream is reported as a suspend that
//!   never resumes, which the engine turns into `DeviceUnavailable`

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use tracing::{debug, error, warn};

use super::driver::{PcmBackend, PcmDriver};
use super::format::{AccessPattern, SampleFormat};
use super::params::{HwCapabilities, HwConfig, HwRequest, frames_for};
use super::{OpenMode, StreamDirection};
use crate::error::DriverError;

/// Generic I/O failure (`-EIO`)
const EIO: i32 = -5;

/// Buffer and period ranges offered for every cpal device (µs)
const BUFFER_TIME_US: std::ops::RangeInclusive<u32> = 10_000..=2_000_000;
const PERIOD_TIME_US: std::ops::RangeInclusive<u32> = 1_000..=500_000;

/// Opens cpal output devices by name; `"default"` is the host default
#[derive(Debug, Clone, Copy, Default)]
pub struct CpalBackend;

impl CpalBackend {
    pub fn new() -> Self {
        Self
    }

    /// Names of the output devices on the default host
    pub fn device_names(&self) -> Vec<String> {
        cpal::default_host()
            .output_devices()
            .map(|devices| devices.filter_map(|d| d.name().ok()).collect())
            .unwrap_or_default()
    }
}

impl PcmBackend for CpalBackend {
    fn name(&self) -> &'static str {
        "cpal"
    }

    fn open(
        &self,
        device_id: &str,
        direction: StreamDirection,
        mode: OpenMode,
    ) -> Result<Box<dyn PcmDriver>, DriverError> {
        if direction != StreamDirection::Playback {
            return Err(DriverError::InvalidArgument);
        }

        let flags = Arc::new(StreamFlags::default());
        let (commands, rx) = mpsc::channel();
        let (opened_tx, opened_rx) = mpsc::channel();

        let owner = thread::Builder::new()
            .name("soundy-cpal".into())
            .spawn({
                let flags = flags.clone();
                let device_id = device_id.to_string();
                move || stream_owner(device_id, flags, opened_tx, rx)
            })
            .map_err(|_| DriverError::Code(EIO))?;

        match opened_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                let _ = owner.join();
                return Err(err);
            }
            Err(_) => return Err(DriverError::NoDevice),
        }

        Ok(Box::new(CpalDriver {
            mode,
            commands: Some(commands),
            owner: Some(owner),
            flags,
            ring: None,
            config: None,
        }))
    }
}

/// Signals between the driver, the owner thread and the cpal callback
#[derive(Debug, Default)]
struct StreamFlags {
    /// The stream has been started since the last prepare
    playing: AtomicBool,
    /// The callback has played written frames since the last start
    primed: AtomicBool,
    /// The callback ran dry while playing
    underrun: AtomicBool,
    /// The device went away
    lost: AtomicBool,
    /// Stale bytes at the front of the ring the callback must skip
    discard: AtomicUsize,
}

type Reply<T> = mpsc::Sender<Result<T, DriverError>>;

enum Command {
    Capabilities(Reply<HwCapabilities>),
    Apply(HwRequest, Reply<(HwConfig, HeapProd<u8>)>),
    Play(Reply<()>),
    Pause(Reply<()>),
}

// ============================================================================
// Owner thread
// ============================================================================

fn stream_owner(
    device_id: String,
    flags: Arc<StreamFlags>,
    opened: mpsc::Sender<Result<(), DriverError>>,
    commands: mpsc::Receiver<Command>,
) {
    let host = cpal::default_host();
    let Some(device) = find_device(&host, &device_id) else {
        let _ = opened.send(Err(DriverError::NoDevice));
        return;
    };
    let _ = opened.send(Ok(()));
    debug!("cpal device '{}' opened", device_id);

    let mut stream: Option<cpal::Stream> = None;

    // Ends when the driver drops its sender on close
    for command in commands {
        match command {
            Command::Capabilities(reply) => {
                let _ = reply.send(capabilities(&device));
            }
            Command::Apply(request, reply) => {
                // the previous stream must release the device first
                stream = None;
                let result = build_stream(&device, &request, &flags).map(|(built, config, ring)| {
                    stream = Some(built);
                    (config, ring)
                });
                let _ = reply.send(result);
            }
            Command::Play(reply) => {
                let result = match &stream {
                    Some(stream) => stream.play().map_err(|e| {
                        warn!("Failed to play audio stream: {}", e);
                        match e {
                            cpal::PlayStreamError::DeviceNotAvailable => DriverError::NoDevice,
                            _ => DriverError::Code(EIO),
                        }
                    }),
                    None => Err(DriverError::BadState),
                };
                let _ = reply.send(result);
            }
            Command::Pause(reply) => {
                let result = match &stream {
                    Some(stream) => stream.pause().map_err(|e| {
                        warn!("Failed to pause audio stream: {}", e);
                        DriverError::Code(EIO)
                    }),
                    None => Err(DriverError::BadState),
                };
                let _ = reply.send(result);
            }
        }
    }

    debug!("cpal device '{}' closed", device_id);
}

fn find_device(host: &cpal::Host, device_id: &str) -> Option<cpal::Device> {
    if device_id == "default" {
        return host.default_output_device();
    }
    host.output_devices()
        .ok()?
        .find(|d| d.name().map(|name| name == device_id).unwrap_or(false))
}

fn sample_format(format: cpal::SampleFormat) -> Option<SampleFormat> {
    match format {
        cpal::SampleFormat::U8 => Some(SampleFormat::U8),
        cpal::SampleFormat::I16 => Some(SampleFormat::S16Le),
        cpal::SampleFormat::F32 => Some(SampleFormat::F32Le),
        _ => None,
    }
}

fn capabilities(device: &cpal::Device) -> Result<HwCapabilities, DriverError> {
    let ranges = device.supported_output_configs().map_err(|e| {
        warn!("Failed to query output configs: {}", e);
        DriverError::Code(EIO)
    })?;

    let mut formats = Vec::new();
    let mut channels = (u32::MAX, 0);
    let mut rates = (u32::MAX, 0);
    let mut native_rates = Vec::new();

    for range in ranges {
        let Some(format) = sample_format(range.sample_format()) else {
            continue;
        };
        if !formats.contains(&format) {
            formats.push(format);
        }
        let ch = range.channels() as u32;
        channels = (channels.0.min(ch), channels.1.max(ch));
        let (min, max) = (range.min_sample_rate().0, range.max_sample_rate().0);
        rates = (rates.0.min(min), rates.1.max(max));
        native_rates.extend([min, max]);
    }

    if formats.is_empty() {
        return Err(DriverError::InvalidArgument);
    }
    if let Ok(default) = device.default_output_config() {
        native_rates.push(default.sample_rate().0);
    }
    native_rates.sort_unstable();
    native_rates.dedup();

    Ok(HwCapabilities {
        formats,
        access: vec![AccessPattern::Interleaved],
        channels: channels.0..=channels.1,
        rates: rates.0..=rates.1,
        native_rates,
        buffer_time_us: BUFFER_TIME_US,
        period_time_us: PERIOD_TIME_US,
    })
}

fn build_stream(
    device: &cpal::Device,
    request: &HwRequest,
    flags: &Arc<StreamFlags>,
) -> Result<(cpal::Stream, HwConfig, HeapProd<u8>), DriverError> {
    if request.access != AccessPattern::Interleaved {
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
    let stream_config = cpal::StreamConfig {
        channels: request.channels as u16,
        sample_rate: cpal::SampleRate(request.rate),
        buffer_size: cpal::BufferSize::Fixed(config.period_size as u32),
    };

    let ring = HeapRb::<u8>::new(config.buffer_size * config.frame_bytes());
    let (producer, consumer) = ring.split();
    flags.playing.store(false, Ordering::Release);
    flags.primed.store(false, Ordering::Release);
    flags.underrun.store(false, Ordering::Release);
    flags.discard.store(0, Ordering::Release);

    let stream = match request.format {
        SampleFormat::U8 => {
            build_typed::<u8>(device, &stream_config, consumer, flags, 0x80, |b| b[0])
        }
        SampleFormat::S16Le => build_typed::<i16>(device, &stream_config, consumer, flags, 0, |b| {
            i16::from_le_bytes([b[0], b[1]])
        }),
        SampleFormat::F32Le => {
            build_typed::<f32>(device, &stream_config, consumer, flags, 0.0, |b| {
                f32::from_le_bytes([b[0], b[1], b[2], b[3]])
            })
        }
    }?;

    // some hosts start streams on build
    let _ = stream.pause();

    debug!(
        "cpal stream built: {} Hz, {} ch, {:?}, {} frame ring",
        config.rate, config.channels, config.format, config.buffer_size
    );
    Ok((stream, config, producer))
}

fn build_typed<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut consumer: HeapCons<u8>,
    flags: &Arc<StreamFlags>,
    silence: T,
    decode: fn(&[u8]) -> T,
) -> Result<cpal::Stream, DriverError>
where
    T: cpal::SizedSample + Send + 'static,
{
    // Pre-allocate buffer for batch reads
    let mut scratch: Vec<u8> = vec![0; 4096 * std::mem::size_of::<T>()];
    let shared = flags.clone();
    let error_flags = flags.clone();

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                render(data, &mut consumer, &mut scratch, &shared, silence, decode);
            },
            move |err| match err {
                cpal::StreamError::DeviceNotAvailable => {
                    error!("Audio device lost");
                    error_flags.lost.store(true, Ordering::Release);
                }
                other => error!("Audio stream error: {}", other),
            },
            None,
        )
        .map_err(|e| {
            warn!("Failed to build audio stream: {}", e);
            match e {
                cpal::BuildStreamError::DeviceNotAvailable => DriverError::NoDevice,
                _ => DriverError::InvalidArgument,
            }
        })
}

/// Callback body: skip stale bytes, decode what is queued, pad with silence
fn render<T: Copy>(
    data: &mut [T],
    consumer: &mut HeapCons<u8>,
    scratch: &mut Vec<u8>,
    flags: &StreamFlags,
    silence: T,
    decode: fn(&[u8]) -> T,
) {
    let width = std::mem::size_of::<T>();

    let stale = flags.discard.swap(0, Ordering::AcqRel);
    if stale > 0 {
        consumer.skip(stale.min(consumer.occupied_len()));
    }

    let needed = data.len() * width;
    if scratch.len() < needed {
        scratch.resize(needed, 0);
    }
    // Batch read, then decode whole samples
    let popped = consumer.pop_slice(&mut scratch[..needed]) / width;
    let decoded = scratch[..popped * width].chunks_exact(width).map(decode);
    for (sample, value) in data.iter_mut().zip(decoded) {
        *sample = value;
    }
    // Fill any remaining samples with silence
    data[popped..].fill(silence);

    if popped > 0 {
        flags.primed.store(true, Ordering::Release);
    }
    // Silence before the first written frame is not an underrun
    if popped < data.len()
        && flags.playing.load(Ordering::Acquire)
        && flags.primed.load(Ordering::Acquire)
    {
        flags.underrun.store(true, Ordering::Release);
    }
}

// ============================================================================
// Driver
// ============================================================================

struct CpalDriver {
    mode: OpenMode,
    commands: Option<mpsc::Sender<Command>>,
    owner: Option<JoinHandle<()>>,
    flags: Arc<StreamFlags>,
    /// Producer side of the ring buffer (write path pushes here)
    ring: Option<HeapProd<u8>>,
    config: Option<HwConfig>,
}

impl CpalDriver {
    fn request<T>(&self, command: impl FnOnce(Reply<T>) -> Command) -> Result<T, DriverError> {
        let commands = self.commands.as_ref().ok_or(DriverError::BadState)?;
        let (reply, rx) = mpsc::channel();
        commands
            .send(command(reply))
            .map_err(|_| DriverError::NoDevice)?;
        rx.recv().map_err(|_| DriverError::NoDevice)?
    }

    fn config(&self) -> Result<HwConfig, DriverError> {
        self.config.ok_or(DriverError::BadState)
    }

    fn poll_interval(config: &HwConfig) -> Duration {
        Duration::from_micros((config.period_time_us / 4).max(250) as u64)
    }

    fn is_lost(&self) -> bool {
        self.flags.lost.load(Ordering::Acquire)
    }

    fn start_stream(&mut self) -> Result<(), DriverError> {
        self.request(Command::Play)?;
        self.flags.playing.store(true, Ordering::Release);
        Ok(())
    }

    fn stop_stream(&mut self) -> Result<(), DriverError> {
        self.request(Command::Pause)?;
        self.flags.playing.store(false, Ordering::Release);
        self.flags.primed.store(false, Ordering::Release);
        self.flags.underrun.store(false, Ordering::Release);
        Ok(())
    }

    fn discard_queued(&self) {
        if let Some(ring) = &self.ring {
            self.flags
                .discard
                .store(ring.occupied_len(), Ordering::Release);
        }
    }
}

impl PcmDriver for CpalDriver {
    fn capabilities(&self) -> Result<HwCapabilities, DriverError> {
        self.request(Command::Capabilities)
    }

    fn apply(&mut self, request: &HwRequest) -> Result<HwConfig, DriverError> {
        let request = *request;
        let (config, ring) = self.request(|reply| Command::Apply(request, reply))?;
        self.ring = Some(ring);
        self.config = Some(config);
        Ok(config)
    }

    fn prepare(&mut self) -> Result<(), DriverError> {
        self.config()?;
        if self.is_lost() {
            return Err(DriverError::NoDevice);
        }
        self.stop_stream()?;
        self.discard_queued();
        Ok(())
    }

    fn write_interleaved(&mut self, data: &[u8], frames: usize) -> Result<usize, DriverError> {
        let config = self.config()?;
        let frame_bytes = config.frame_bytes();

        let accepted = loop {
            if self.is_lost() {
                return Err(DriverError::Suspended);
            }
            if self.flags.underrun.load(Ordering::Acquire) {
                return Err(DriverError::Underrun);
            }

            let ring = self.ring.as_mut().ok_or(DriverError::BadState)?;
            let vacant = ring.vacant_len() / frame_bytes;
            if vacant > 0 {
                let accepted = vacant.min(frames);
                ring.push_slice(&data[..accepted * frame_bytes]);
                break accepted;
            }

            // Only the callback frees space, and it never runs while paused
            if !self.flags.playing.load(Ordering::Acquire) {
                self.start_stream()?;
                continue;
            }

            match self.mode {
                OpenMode::NonBlocking => return Err(DriverError::WouldBlock),
                OpenMode::Blocking => thread::sleep(Self::poll_interval(&config)),
            }
        };

        if !self.flags.playing.load(Ordering::Acquire) {
            self.start_stream()?;
        }
        Ok(accepted)
    }

    fn resume(&mut self) -> Result<(), DriverError> {
        // cpal has no suspend of its own; a lost device never comes back
        if self.is_lost() {
            return Err(DriverError::NoDevice);
        }
        Ok(())
    }

    fn drain(&mut self) -> Result<(), DriverError> {
        let config = self.config()?;
        while self.flags.playing.load(Ordering::Acquire) && !self.is_lost() {
            let queued = self.ring.as_ref().map(|r| r.occupied_len()).unwrap_or(0);
            if queued == 0 {
                // the last callback's worth is still in the device
                thread::sleep(Duration::from_micros(config.period_time_us as u64));
                break;
            }
            thread::sleep(Self::poll_interval(&config));
        }
        self.stop_stream()
    }

    fn drop_pending(&mut self) -> Result<(), DriverError> {
        self.config()?;
        self.stop_stream()?;
        self.discard_queued();
        Ok(())
    }

    fn close(&mut self) {
        // Dropping the sender ends the owner thread, which drops the stream
        drop(self.commands.take());
        if let Some(owner) = self.owner.take() {
            let _ = owner.join();
        }
    }
}

impl Drop for CpalDriver {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    const SILENCE: u8 = 0x80;

    /// 8 kHz mono U8: 20-frame periods in an 80-frame ring
    fn hw() -> HwConfig {
        HwConfig {
            format: SampleFormat::U8,
            access: AccessPattern::Interleaved,
            channels: 1,
            rate: 8_000,
            buffer_time_us: 10_000,
            period_time_us: 2_500,
            period_size: 20,
            buffer_size: 80,
        }
    }

    /// Answers play/pause and pulls one period per millisecond while
    /// playing, the way cpal's callback would. Returns everything rendered.
    fn spawn_callback_thread(
        mut consumer: HeapCons<u8>,
        flags: Arc<StreamFlags>,
        commands: mpsc::Receiver<Command>,
    ) -> JoinHandle<Vec<u8>> {
        thread::spawn(move || {
            let mut played = Vec::new();
            let mut running = false;
            loop {
                match commands.recv_timeout(Duration::from_millis(1)) {
                    Ok(Command::Play(reply)) => {
                        running = true;
                        let _ = reply.send(Ok(()));
                    }
                    Ok(Command::Pause(reply)) => {
                        running = false;
                        let _ = reply.send(Ok(()));
                    }
                    Ok(Command::Capabilities(reply)) => {
                        let _ = reply.send(Err(DriverError::BadState));
                    }
                    Ok(Command::Apply(_, reply)) => {
                        let _ = reply.send(Err(DriverError::BadState));
                    }
                    Err(mpsc::RecvTimeoutError::Timeout) if running => {
                        let mut data = [0u8; 20];
                        render_u8(&mut data, &mut consumer, &flags);
                        played.extend_from_slice(&data);
                    }
                    Err(mpsc::RecvTimeoutError::Timeout) => {}
                    Err(mpsc::RecvTimeoutError::Disconnected) => return played,
                }
            }
        })
    }

    fn render_u8(data: &mut [u8], consumer: &mut HeapCons<u8>, flags: &StreamFlags) {
        render(data, consumer, &mut Vec::new(), flags, SILENCE, |b| b[0]);
    }

    fn driver(mode: OpenMode) -> (CpalDriver, JoinHandle<Vec<u8>>) {
        let config = hw();
        let (producer, consumer) = HeapRb::<u8>::new(config.buffer_size).split();
        let flags = Arc::new(StreamFlags::default());
        let (commands, rx) = mpsc::channel();
        let callback = spawn_callback_thread(consumer, flags.clone(), rx);
        let driver = CpalDriver {
            mode,
            commands: Some(commands),
            owner: None,
            flags,
            ring: Some(producer),
            config: Some(config),
        };
        (driver, callback)
    }

    fn write_until_accepted(driver: &mut CpalDriver, data: &[u8]) -> usize {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            match driver.write_interleaved(data, data.len()) {
                Ok(frames) => return frames,
                Err(DriverError::WouldBlock) => thread::sleep(Duration::from_millis(1)),
                Err(err) => panic!("unexpected write error: {err}"),
            }
        }
        panic!("write never accepted a frame");
    }

    #[test]
    fn test_render_skips_stale_bytes_and_pads_silence() {
        let (mut producer, mut consumer) = HeapRb::<u8>::new(16).split();
        producer.push_slice(&[1, 2, 3, 4, 5]);
        let flags = StreamFlags::default();
        flags.discard.store(3, Ordering::Release);

        let mut data = [0u8; 4];
        render_u8(&mut data, &mut consumer, &flags);
        assert_eq!(data, [4, 5, SILENCE, SILENCE]);
        assert_eq!(flags.discard.load(Ordering::Acquire), 0);
    }

    #[test]
    fn test_silence_before_first_frame_is_not_an_underrun() {
        let (mut producer, mut consumer) = HeapRb::<u8>::new(16).split();
        let flags = StreamFlags::default();
        flags.playing.store(true, Ordering::Release);

        let mut data = [0u8; 4];
        render_u8(&mut data, &mut consumer, &flags);
        assert!(!flags.underrun.load(Ordering::Acquire));

        producer.push_slice(&[9, 9]);
        render_u8(&mut data, &mut consumer, &flags);
        assert_eq!(data, [9, 9, SILENCE, SILENCE]);
        assert!(flags.underrun.load(Ordering::Acquire));
    }

    #[test]
    fn test_restart_after_drop_with_full_ring() {
        for mode in [OpenMode::NonBlocking, OpenMode::Blocking] {
            let (mut driver, callback) = driver(mode);

            // A running stream keeps the ring full; drop it in that state
            let stale = [0x10u8; 80];
            assert_eq!(driver.ring.as_mut().unwrap().push_slice(&stale), 80);
            driver.drop_pending().unwrap();
            assert_eq!(driver.flags.discard.load(Ordering::Acquire), 80);

            driver.prepare().unwrap();
            let fresh = [0x20u8; 20];
            assert!(write_until_accepted(&mut driver, &fresh) > 0);
            thread::sleep(Duration::from_millis(50));

            drop(driver);
            let played = callback.join().unwrap();
            assert!(played.contains(&0x20));
            assert!(!played.contains(&0x10));
        }
    }

    #[test]
    fn test_dry_ring_after_playback_reports_underrun() {
        let (mut driver, callback) = driver(OpenMode::NonBlocking);
        assert_eq!(write_until_accepted(&mut driver, &[0x30u8; 20]), 20);

        let deadline = Instant::now() + Duration::from_secs(5);
        let err = loop {
            match driver.write_interleaved(&[], 0) {
                Err(err) => break err,
                Ok(_) if Instant::now() < deadline => thread::sleep(Duration::from_millis(1)),
                Ok(_) => panic!("underrun never reported"),
            }
        };
        assert_eq!(err, DriverError::Underrun);

        driver.prepare().unwrap();
        assert!(!driver.flags.underrun.load(Ordering::Acquire));
        drop(driver);
        callback.join().unwrap();
    }
}
