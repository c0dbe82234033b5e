//! Sine command - play a tone for a while or until Enter

use std::io::BufRead;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use soundy_core::{SineWave, StreamEngine};
use tracing::info;

use crate::GlobalArgs;
use crate::backend::Session;

/// Arguments for the sine command
#[derive(Args)]
pub struct SineArgs {
    /// Tone frequency in Hz
    #[arg(short, long, default_value = "440")]
    pub frequency: f64,

    /// Amplitude, 0.0 to 1.0
    #[arg(short, long, default_value = "0.8")]
    pub amplitude: f32,

    /// Play for this many seconds (default: until Enter is pressed)
    #[arg(short, long)]
    pub seconds: Option<f64>,
}

pub fn execute(global: &GlobalArgs, args: SineArgs) -> Result<()> {
    let session = Session::new(global)?;
    let device = session.open_device()?;
    let engine = StreamEngine::with_options(device, session.config.engine.options());

    let sine = SineWave::new(args.frequency).with_amplitude(args.amplitude);
    engine.register_generator(sine)?;
    engine.start().context("Failed to start playback")?;

    match args.seconds {
        Some(seconds) => {
            info!("Playing {} Hz for {} s", args.frequency, seconds);
            std::thread::sleep(Duration::from_secs_f64(seconds.max(0.0)));
        }
        None => {
            info!("Playing {} Hz, press Enter to stop", args.frequency);
            let mut line = String::new();
            std::io::stdin().lock().read_line(&mut line)?;
        }
    }

    engine.drain().context("Playback failed")?;
    let stats = engine.stats();
    info!(
        "Played {} periods ({} frames), {} underruns, {} suspends",
        stats.periods, stats.frames_written, stats.underruns, stats.suspends
    );

    if let Some(hw) = engine.config() {
        session.finish(&hw)?;
    }
    Ok(())
}
