//! Music box accounting through the event queue

use crate::engine::{EngineOptions, WaitPolicy};
use crate::error::{DriverError, SoundyError};
use crate::music::{MusicBox, NOTE_QUEUE_SIZE, Note, NoteValue};
use crate::test_utils::{apply_on, sim_host_with, wait_until};

use std::time::Duration;

fn options() -> EngineOptions {
    EngineOptions {
        wait_policy: WaitPolicy::Sleep,
        wait_sleep: Duration::from_micros(100),
        resume_backoff: Duration::from_millis(1),
    }
}

#[test]
fn test_every_queued_period_is_played() {
    let host = sim_host_with(|d| d.with_pacing(true));
    let probe = host.probe("default").unwrap();
    // 8 kHz mono, 1 ms periods (8 frames), 20 ms ring
    let device = apply_on(&host, 1, 8_000, 20_000, 1_000);
    let mut music = MusicBox::with_options(device, 240, options()).unwrap();

    // 32 periods per note; more than the queue holds in total
    let melody = [Note::E4, Note::A4, Note::Rest, Note::B4, Note::C5];
    let mut notes = 0;
    while music.expected_periods() <= NOTE_QUEUE_SIZE as u64 {
        music
            .play_note(melody[notes % melody.len()], NoteValue::ThirtySecond)
            .unwrap();
        notes += 1;
    }
    assert_eq!(music.expected_periods(), notes as u64 * 32);

    let expected = music.expected_periods();
    assert!(wait_until(|| music.played_periods() >= expected));
    assert_eq!(music.played_periods(), expected);
    music.finish().unwrap();
    assert!(probe.frames_written() >= expected * 8);
}

#[test]
fn test_notes_render_as_tones_and_rests_as_silence() {
    let host = sim_host_with(|d| d.with_pacing(true));
    let probe = host.probe("default").unwrap();
    let device = apply_on(&host, 1, 8_000, 20_000, 10_000);
    let mut music = MusicBox::with_options(device, 240, options()).unwrap();

    music.play_note(Note::A4, NoteValue::Quarter).unwrap();
    music.play_note(Note::Rest, NoteValue::Quarter).unwrap();
    music.finish().unwrap();

    let captured = probe.captured();
    let loud = captured.iter().filter(|&&b| b > 0xf0 || b < 0x10).count();
    assert!(loud > 0);
    // the tail is the rest plus idle periods, all silence
    assert!(captured[captured.len() - 80..].iter().all(|&b| b == 0x80));
}

#[test]
fn test_play_note_fails_once_stream_is_dead() {
    let host = sim_host_with(|d| d.with_pacing(true));
    let probe = host.probe("default").unwrap();
    let device = apply_on(&host, 1, 8_000, 20_000, 1_000);
    let mut music = MusicBox::with_options(device, 240, options()).unwrap();

    probe.inject_write_error(DriverError::Code(-5));
    assert!(wait_until(|| !music.engine().is_alive()));

    // a whole note is 1000 periods; the second one no longer fits
    music.play_note(Note::C4, NoteValue::Whole).unwrap();
    let err = music.play_note(Note::C4, NoteValue::Whole).unwrap_err();
    assert_eq!(
        err,
        SoundyError::StreamFault {
            during: "write",
            source: DriverError::Code(-5),
        }
    );
    assert!(music.finish().is_err());
}

#[test]
fn test_tempo_drives_period_count() {
    let host = sim_host_with(|d| d.with_pacing(true));
    let device = apply_on(&host, 1, 8_000, 20_000, 1_000);
    let mut music = MusicBox::with_options(device, 120, options()).unwrap();
    assert_eq!(music.tempo(), 120);

    // sixteenth at 120 bpm = 125 ms = 125 periods of 1 ms
    music.play_note(Note::G4, NoteValue::Sixteenth).unwrap();
    assert_eq!(music.expected_periods(), 125);
    music.finish().unwrap();
}
