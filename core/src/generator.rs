//! Sample generators
//!
//! A [`Generator`] fills one period of interleaved samples per call. The
//! engine owns the generator together with its cursor, so state carried
//! between periods (oscillator phase, note position) lives in the cursor
//! rather than in globals.

use std::f64::consts::TAU;
use std::marker::PhantomData;

use crate::device::{HwConfig, SampleFormat};

/// One period of interleaved samples, lent to a generator for a single call
pub struct AudioBuffer<'a> {
    samples: &'a mut [u8],
    format: SampleFormat,
    channels: u32,
    rate: u32,
    period_size: usize,
    buffer_size: usize,
}

impl<'a> AudioBuffer<'a> {
    /// Wrap `samples`, which must hold exactly one period for `config`
    pub fn new(samples: &'a mut [u8], config: &HwConfig) -> Self {
        debug_assert_eq!(samples.len(), config.period_bytes());
        Self {
            samples,
            format: config.format,
            channels: config.channels,
            rate: config.rate,
            period_size: config.period_size,
            buffer_size: config.buffer_size,
        }
    }

    /// Raw interleaved bytes
    pub fn samples(&self) -> &[u8] {
        self.samples
    }

    /// Raw interleaved bytes, for generators that encode themselves
    pub fn samples_mut(&mut self) -> &mut [u8] {
        self.samples
    }

    /// Frames in this buffer (one period)
    pub fn frames(&self) -> usize {
        self.period_size
    }

    /// Frames per period
    pub fn period_size(&self) -> usize {
        self.period_size
    }

    /// Frames in the device ring buffer
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn channels(&self) -> u32 {
        self.channels
    }

    pub fn rate(&self) -> u32 {
        self.rate
    }

    pub fn format(&self) -> SampleFormat {
        self.format
    }

    /// Encode a normalized sample into one channel of one frame
    pub fn put_sample(&mut self, frame: usize, channel: u32, value: f32) {
        let width = self.format.width();
        let offset = (frame * self.channels as usize + channel as usize) * width;
        self.format
            .encode(value, &mut self.samples[offset..offset + width]);
    }

    /// Encode the same normalized sample into every channel of one frame
    pub fn put_frame(&mut self, frame: usize, value: f32) {
        for channel in 0..self.channels {
            self.put_sample(frame, channel, value);
        }
    }

    /// Fill the whole period with silence
    pub fn fill_silence(&mut self) {
        self.format.fill_silence(self.samples);
    }
}

/// Produces audio one period at a time on the real-time thread.
///
/// `fill` must not block or allocate: it runs between device writes and any
/// stall shows up as an underrun.
pub trait Generator: Send + 'static {
    /// State carried from one period to the next, owned by the engine
    type Cursor: Default + Send + 'static;

    /// Fill every frame of `buf`
    fn fill(&mut self, buf: &mut AudioBuffer<'_>, cursor: &mut Self::Cursor);
}

/// A generator bound to its cursor, with the cursor type erased
pub(crate) trait BoundGenerator: Send {
    fn fill(&mut self, buf: &mut AudioBuffer<'_>);
}

pub(crate) struct Bound<G: Generator> {
    generator: G,
    cursor: G::Cursor,
}

impl<G: Generator> Bound<G> {
    pub(crate) fn new(generator: G) -> Self {
        Self {
            generator,
            cursor: G::Cursor::default(),
        }
    }
}

impl<G: Generator> BoundGenerator for Bound<G> {
    fn fill(&mut self, buf: &mut AudioBuffer<'_>) {
        self.generator.fill(buf, &mut self.cursor);
    }
}

// ============================================================================
// Stock generators
// ============================================================================

/// Writes silence
#[derive(Debug, Clone, Copy, Default)]
pub struct Silence;

impl Generator for Silence {
    type Cursor = ();

    fn fill(&mut self, buf: &mut AudioBuffer<'_>, _cursor: &mut ()) {
        buf.fill_silence();
    }
}

/// Continuous sine tone on every channel. The cursor is the phase in radians.
#[derive(Debug, Clone, Copy)]
pub struct SineWave {
    pub frequency: f64,
    pub amplitude: f32,
}

impl SineWave {
    pub fn new(frequency: f64) -> Self {
        Self {
            frequency,
            amplitude: 1.0,
        }
    }

    pub fn with_amplitude(mut self, amplitude: f32) -> Self {
        self.amplitude = amplitude;
        self
    }
}

/// Write `frequency` Hz into every frame of `buf`, advancing `phase`
pub(crate) fn write_sine(
    buf: &mut AudioBuffer<'_>,
    frequency: f64,
    amplitude: f32,
    phase: &mut f64,
) {
    let step = TAU * frequency / buf.rate() as f64;
    for frame in 0..buf.frames() {
        buf.put_frame(frame, phase.sin() as f32 * amplitude);
        *phase += step;
        if *phase >= TAU {
            *phase -= TAU;
        }
    }
}

impl Generator for SineWave {
    type Cursor = f64;

    fn fill(&mut self, buf: &mut AudioBuffer<'_>, phase: &mut f64) {
        write_sine(buf, self.frequency, self.amplitude, phase);
    }
}

/// Adapts a closure into a [`Generator`] with cursor type `C`
pub struct FnGenerator<C, F> {
    f: F,
    _cursor: PhantomData<fn() -> C>,
}

/// Build a generator from a closure
pub fn from_fn<C, F>(f: F) -> FnGenerator<C, F>
where
    C: Default + Send + 'static,
    F: FnMut(&mut AudioBuffer<'_>, &mut C) + Send + 'static,
{
    FnGenerator {
        f,
        _cursor: PhantomData,
    }
}

impl<C, F> Generator for FnGenerator<C, F>
where
    C: Default + Send + 'static,
    F: FnMut(&mut AudioBuffer<'_>, &mut C) + Send + 'static,
{
    type Cursor = C;

    fn fill(&mut self, buf: &mut AudioBuffer<'_>, cursor: &mut C) {
        (self.f)(buf, cursor)
    }
}
