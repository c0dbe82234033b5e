//! Music box: notes fed to the real-time thread through the event queue
//!
//! The control thread enqueues one note per period of the note's length; the
//! [`NotePlayer`] generator dequeues one note per period and renders it as a
//! sine on every channel. An empty queue plays silence.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::device::DeviceHandle;
use crate::engine::{EngineOptions, StreamEngine};
use crate::error::{DriverError, Result, SoundyError};
use crate::generator::{AudioBuffer, Generator, write_sine};
use crate::queue::{EventConsumer, EventProducer, event_queue};

/// Slots in the note queue
pub const NOTE_QUEUE_SIZE: usize = 1024;

/// Equal-tempered pitches C4..B5, plus an explicit rest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Note {
    C4,
    Cs4,
    D4,
    Ds4,
    E4,
    F4,
    Fs4,
    G4,
    Gs4,
    A4,
    As4,
    B4,
    C5,
    Cs5,
    D5,
    Ds5,
    E5,
    F5,
    Fs5,
    G5,
    Gs5,
    A5,
    As5,
    B5,
    /// Silence for the note's length
    Rest,
}

const FREQUENCIES: [f64; 24] = [
    261.63, 277.18, 293.66, 311.13, 329.63, 349.23, 369.99, 392.00, 415.30, 440.00, 466.16, 493.88,
    523.25, 554.37, 587.33, 622.25, 659.26, 698.46, 739.99, 783.99, 830.61, 880.00, 932.33, 987.77,
];

impl Note {
    /// Pitch in Hz; `None` for a rest
    pub fn frequency(self) -> Option<f64> {
        match self {
            Note::Rest => None,
            pitch => FREQUENCIES.get(pitch as usize).copied(),
        }
    }
}

impl fmt::Display for Note {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Note::Rest => f.write_str("rest"),
            pitch => f.write_str(&format!("{pitch:?}").replace('s', "#")),
        }
    }
}

/// Note length as a fraction of a whole note (one bar of 4/4)
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NoteValue {
    Whole = 1,
    Half = 2,
    Quarter = 4,
    Eighth = 8,
    Sixteenth = 16,
    ThirtySecond = 32,
}

impl NoteValue {
    /// Length in microseconds at `tempo` quarter notes per minute
    pub fn duration_us(self, tempo: u32) -> u64 {
        let bar_seconds = 240.0 / tempo.max(1) as f64;
        ((1_000_000 / self as u64) as f64 * bar_seconds) as u64
    }

    /// Periods of `period_time_us` needed to cover the note, at least one
    pub fn periods(self, tempo: u32, period_time_us: u32) -> u64 {
        self.duration_us(tempo)
            .div_ceil(period_time_us.max(1) as u64)
            .max(1)
    }
}

/// Generator that plays one queued note per period
pub struct NotePlayer {
    notes: EventConsumer<Option<Note>, NOTE_QUEUE_SIZE>,
    played: Arc<AtomicU64>,
    amplitude: f32,
}

impl Generator for NotePlayer {
    /// Oscillator phase in radians
    type Cursor = f64;

    fn fill(&mut self, buf: &mut AudioBuffer<'_>, phase: &mut f64) {
        let Some(note) = self.notes.dequeue() else {
            buf.fill_silence();
            return;
        };

        match note.frequency() {
            Some(frequency) => write_sine(buf, frequency, self.amplitude, phase),
            None => buf.fill_silence(),
        }
        self.played.fetch_add(1, Ordering::Relaxed);
    }
}

/// Plays notes on a device at a fixed tempo
///
/// Tracks how many periods were queued and how many the real-time thread has
/// played, so [`finish`](Self::finish) can wait for the tail of the melody.
pub struct MusicBox {
    engine: StreamEngine,
    notes: EventProducer<Option<Note>, NOTE_QUEUE_SIZE>,
    played: Arc<AtomicU64>,
    expected: u64,
    tempo: u32,
    period_time_us: u32,
}

impl MusicBox {
    /// Start playback on an applied device at `tempo` beats per minute
    pub fn new(device: DeviceHandle, tempo: u32) -> Result<Self> {
        Self::with_options(device, tempo, EngineOptions::default())
    }

    pub fn with_options(device: DeviceHandle, tempo: u32, options: EngineOptions) -> Result<Self> {
        let period_time_us = device.period_time().ok_or_else(|| {
            SoundyError::configuration("start music box", DriverError::BadState)
        })?;

        let (notes, consumer) = event_queue::<Option<Note>, NOTE_QUEUE_SIZE>(None);
        let played = Arc::new(AtomicU64::new(0));

        let engine = StreamEngine::with_options(device, options);
        engine.register_generator(NotePlayer {
            notes: consumer,
            played: played.clone(),
            amplitude: 1.0,
        })?;
        engine.start()?;

        debug!(
            "Music box started: tempo {}, period {} µs",
            tempo, period_time_us
        );
        Ok(Self {
            engine,
            notes,
            played,
            expected: 0,
            tempo,
            period_time_us,
        })
    }

    /// Queue `note` for its full length.
    ///
    /// Spins while the queue is full. Fails if the real-time thread has
    /// stopped, since nothing would ever make room.
    pub fn play_note(&mut self, note: Note, value: NoteValue) -> Result<()> {
        for _ in 0..value.periods(self.tempo, self.period_time_us) {
            let mut item = Some(note);
            while let Err(rejected) = self.notes.try_enqueue(item) {
                if !self.engine.is_alive() {
                    return Err(self.engine.fault().unwrap_or(SoundyError::WorkerPanicked));
                }
                item = rejected;
                std::thread::yield_now();
            }
            self.expected += 1;
        }
        Ok(())
    }

    /// Periods queued so far
    pub fn expected_periods(&self) -> u64 {
        self.expected
    }

    /// Note periods the real-time thread has rendered
    pub fn played_periods(&self) -> u64 {
        self.played.load(Ordering::Relaxed)
    }

    pub fn tempo(&self) -> u32 {
        self.tempo
    }

    pub fn engine(&self) -> &StreamEngine {
        &self.engine
    }

    /// Wait until every queued note has been played, then drain
    pub fn finish(self) -> Result<()> {
        let poll = Duration::from_micros(self.period_time_us as u64);
        let mut last_log = Instant::now();

        while self.played_periods() < self.expected && self.engine.is_alive() {
            if last_log.elapsed().as_secs() >= 1 {
                debug!(
                    "Music box: played {} of {} periods",
                    self.played_periods(),
                    self.expected
                );
                last_log = Instant::now();
            }
            std::thread::sleep(poll);
        }

        self.engine.drain()
    }
}
