//! Soundy CLI - Play synthesized audio through the soundy PCM engine
//!
//! # Commands
//!
//! - `soundy probe` - Negotiate stream parameters and print what the device chose
//! - `soundy sine` - Play a sine wave
//! - `soundy music-box` - Play the bundled melody through the note queue
//!
//! # Usage
//!
//! ```bash
//! # Three seconds of A4 on the simulated device, captured to a WAV file
//! soundy --wav a4.wav sine --seconds 3
//!
//! # The melody on real hardware (built with `--features hardware`)
//! soundy --backend cpal --format s16-le music-box
//! ```
//!
//! Settings come from `config.toml` in the platform config directory (or
//! `--config`); command-line flags override them.

mod backend;
mod melody;
mod music_box;
mod probe;
mod sine;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand, ValueEnum};
use soundy_core::SampleFormat;

/// Soundy - Real-time PCM playback
#[derive(Parser)]
#[command(name = "soundy")]
#[command(about = "Play synthesized audio through the soundy PCM engine")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

/// Device and stream selection shared by every command
#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Sound backend to open the device on
    #[arg(long, value_enum, default_value = "sim", global = true)]
    pub backend: BackendKind,

    /// Device identifier (overrides the config file)
    #[arg(short, long, global = true)]
    pub device: Option<String>,

    /// Path to a config.toml (defaults to the platform config directory)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Sample rate in Hz
    #[arg(long, global = true)]
    pub rate: Option<u32>,

    /// Channel count
    #[arg(long, global = true)]
    pub channels: Option<u32>,

    /// Ring buffer duration in µs
    #[arg(long, global = true)]
    pub buffer_time: Option<u32>,

    /// Period duration in µs
    #[arg(long, global = true)]
    pub period_time: Option<u32>,

    /// Sample encoding
    #[arg(long, value_enum, global = true)]
    pub format: Option<FormatArg>,

    /// Write what the simulated device received to a WAV file
    #[arg(long, global = true)]
    pub wav: Option<PathBuf>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// In-memory device, paced in real time
    Sim,
    /// Hardware output (requires the `hardware` feature)
    Cpal,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatArg {
    U8,
    S16Le,
    F32Le,
}

impl From<FormatArg> for SampleFormat {
    fn from(format: FormatArg) -> Self {
        match format {
            FormatArg::U8 => SampleFormat::U8,
            FormatArg::S16Le => SampleFormat::S16Le,
            FormatArg::F32Le => SampleFormat::F32Le,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Negotiate stream parameters and print what the device chose
    Probe(probe::ProbeArgs),

    /// Play a sine wave
    Sine(sine::SineArgs),

    /// Play the bundled melody through the note queue
    MusicBox(music_box::MusicBoxArgs),
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Probe(args) => probe::execute(&cli.global, args),
        Commands::Sine(args) => sine::execute(&cli.global, args),
        Commands::MusicBox(args) => music_box::execute(&cli.global, args),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "soundy",
            "sine",
            "--rate",
            "48000",
            "--format",
            "s16-le",
            "--frequency",
            "220",
        ])
        .unwrap();
        assert_eq!(cli.global.rate, Some(48_000));
        assert_eq!(cli.global.format, Some(FormatArg::S16Le));
        assert_eq!(cli.global.backend, BackendKind::Sim);
        match cli.command {
            Commands::Sine(args) => assert_eq!(args.frequency, 220.0),
            _ => panic!("expected sine"),
        }
    }

    #[test]
    fn test_music_box_defaults() {
        let cli = Cli::try_parse_from(["soundy", "music-box"]).unwrap();
        match cli.command {
            Commands::MusicBox(args) => {
                assert_eq!(args.tempo, 90);
                assert_eq!(args.loops, 8);
            }
            _ => panic!("expected music-box"),
        }
    }
}
