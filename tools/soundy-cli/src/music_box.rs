//! Music box command - play the bundled melody through the note queue

use anyhow::{Context, Result};
use clap::Args;
use soundy_core::{MusicBox, NoteValue};
use tracing::info;

use crate::GlobalArgs;
use crate::backend::Session;
use crate::melody::{MELODY, TEMPO};

/// Arguments for the music-box command
#[derive(Args)]
pub struct MusicBoxArgs {
    /// Beats per minute
    #[arg(short, long, default_value_t = TEMPO)]
    pub tempo: u32,

    /// How many times to repeat the melody
    #[arg(short, long, default_value = "8")]
    pub loops: u32,
}

pub fn execute(global: &GlobalArgs, args: MusicBoxArgs) -> Result<()> {
    let session = Session::new(global)?;
    let device = session.open_device()?;
    let hw = device.config();
    let mut music = MusicBox::with_options(device, args.tempo, session.config.engine.options())
        .context("Failed to start the music box")?;

    info!(
        "Playing {} notes x {} loops at {} bpm",
        MELODY.len(),
        args.loops,
        args.tempo
    );
    for _ in 0..args.loops {
        for &note in MELODY {
            music
                .play_note(note, NoteValue::Sixteenth)
                .with_context(|| format!("Failed to queue {}", note))?;
        }
    }

    let expected = music.expected_periods();
    music.finish().context("Playback failed")?;
    info!("Played {} periods", expected);

    if let Some(hw) = hw {
        session.finish(&hw)?;
    }
    Ok(())
}
