//! Full playback path: config → negotiation → engine → device

use std::time::Duration;

use crate::config::{Config, open_device};
use crate::device::{OpenMode, SampleFormat};
use crate::engine::{EngineOptions, PlaybackState, StreamEngine, WaitPolicy};
use crate::generator::{AudioBuffer, SineWave};
use crate::test_utils::{sim_host_with, wait_until};

/// 8 kHz mono U8, 20 ms periods (160 frames), 100 ms buffer
fn small_config() -> Config {
    let mut config = Config::default();
    config.stream.rate = 8_000;
    config.stream.buffer_time_us = 100_000;
    config.stream.period_time_us = 20_000;
    config.engine.wait_policy = WaitPolicy::Sleep;
    config.engine.wait_sleep_us = 200;
    config
}

#[test]
fn test_sine_reaches_device() {
    let host = sim_host_with(|d| d.with_pacing(true));
    let probe = host.probe("default").unwrap();
    let config = small_config();

    let device = open_device(&host, &config).unwrap();
    let engine = StreamEngine::with_options(device, config.engine.options());
    engine.register_generator(SineWave::new(400.0)).unwrap();
    engine.start().unwrap();
    assert!(wait_until(|| engine.stats().periods >= 10));
    engine.drain().unwrap();

    // 400 Hz at 8 kHz repeats every 20 samples
    let captured = probe.captured();
    assert!(captured.len() >= 10 * 160);
    for i in 0..1_000 {
        let a = captured[i] as i32;
        let b = captured[i + 20] as i32;
        assert!((a - b).abs() <= 1, "sample {i}: {a} vs {b}");
    }
    let max = captured.iter().copied().max().unwrap();
    let min = captured.iter().copied().min().unwrap();
    assert!(max >= 250 && min <= 5);
}

#[test]
fn test_stereo_channels_match() {
    let host = sim_host_with(|d| d.with_pacing(true));
    let probe = host.probe("default").unwrap();
    let mut config = small_config();
    config.stream.channels = 2;
    config.stream.format = SampleFormat::S16Le;

    let device = open_device(&host, &config).unwrap();
    assert_eq!(device.config().unwrap().frame_bytes(), 4);
    let engine = StreamEngine::with_options(device, config.engine.options());
    engine.register_generator(SineWave::new(250.0)).unwrap();
    engine.start().unwrap();
    assert!(wait_until(|| engine.stats().periods >= 4));
    engine.drain().unwrap();

    let captured = probe.captured();
    assert_eq!(captured.len() % (160 * 4), 0);
    for frame in captured.chunks_exact(4) {
        assert_eq!(frame[0..2], frame[2..4]);
    }
}

#[test]
fn test_slow_generator_underrun_recovers() {
    let host = sim_host_with(|d| d.with_pacing(true));
    let probe = host.probe("default").unwrap();
    let config = small_config();

    let device = open_device(&host, &config).unwrap();
    let engine = StreamEngine::with_options(device, config.engine.options());
    let mut calls = 0u32;
    engine
        .register_fn(move |buf: &mut AudioBuffer<'_>, next: &mut u64| {
            calls += 1;
            if calls == 8 {
                // longer than the whole 100 ms ring
                std::thread::sleep(Duration::from_millis(250));
            }
            for byte in buf.samples_mut() {
                *byte = (*next % 251) as u8;
                *next += 1;
            }
        })
        .unwrap();

    engine.start().unwrap();
    assert!(wait_until(|| engine.stats().periods >= 12));
    engine.drain().unwrap();

    assert!(engine.stats().underruns >= 1);
    assert_eq!(engine.fault(), None);
    assert_eq!(probe.prepare_calls() as u64, 1 + engine.stats().underruns);
    for (i, &byte) in probe.captured().iter().enumerate() {
        assert_eq!(byte, (i as u64 % 251) as u8);
    }
}

#[test]
fn test_blocking_device_never_reports_would_block() {
    let host = sim_host_with(|d| d.with_pacing(true));
    let mut config = small_config();
    config.device.mode = OpenMode::Blocking;

    let device = open_device(&host, &config).unwrap();
    let engine = StreamEngine::with_options(device, EngineOptions::default());
    engine.register_generator(SineWave::new(440.0)).unwrap();
    engine.start().unwrap();
    // ring holds five periods; anything past that had to wait on the device
    assert!(wait_until(|| engine.stats().periods >= 8));
    engine.drop_stream().unwrap();

    assert_eq!(engine.stats().would_block_retries, 0);
    assert_eq!(engine.state(), PlaybackState::Stopped);
}
