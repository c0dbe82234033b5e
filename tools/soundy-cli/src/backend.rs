//! Backend selection, config layering and WAV capture

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use soundy_core::config::{self, Config};
use soundy_core::{
    DeviceHandle, HwConfig, PcmBackend, SampleFormat, SimProbe, SimulatedDevice, SimulatedHost,
};
use tracing::info;

use crate::{BackendKind, GlobalArgs};

/// The opened backend plus everything needed to report on it afterwards
pub struct Session {
    backend: Box<dyn PcmBackend>,
    probe: Option<SimProbe>,
    wav: Option<PathBuf>,
    pub config: Config,
}

impl Session {
    pub fn new(args: &GlobalArgs) -> Result<Self> {
        let config = load_config(args)?;

        if args.wav.is_some() && args.backend != BackendKind::Sim {
            bail!("--wav only works with the sim backend");
        }

        let (backend, probe): (Box<dyn PcmBackend>, Option<SimProbe>) = match args.backend {
            BackendKind::Sim => {
                let host = SimulatedHost::new();
                host.add_device(
                    SimulatedDevice::new(config.device.id.clone())
                        .with_pacing(true)
                        .with_capture(args.wav.is_some()),
                );
                let probe = host.probe(&config.device.id);
                (Box::new(host), probe)
            }
            BackendKind::Cpal => (hardware_backend()?, None),
        };

        Ok(Self {
            backend,
            probe,
            wav: args.wav.clone(),
            config,
        })
    }

    /// Open the configured device and negotiate the configured stream
    pub fn open_device(&self) -> Result<DeviceHandle> {
        let device = config::open_device(self.backend.as_ref(), &self.config).with_context(|| {
            format!(
                "Failed to open '{}' on the {} backend",
                self.config.device.id,
                self.backend.name()
            )
        })?;
        if let Some(hw) = device.config() {
            info!(
                "Opened '{}': {:?}, {} ch, {} Hz, period {} frames, buffer {} frames",
                device.id(),
                hw.format,
                hw.channels,
                hw.rate,
                hw.period_size,
                hw.buffer_size
            );
        }
        Ok(device)
    }

    /// Write the captured stream if `--wav` was given
    pub fn finish(&self, hw: &HwConfig) -> Result<()> {
        let (Some(path), Some(probe)) = (&self.wav, &self.probe) else {
            return Ok(());
        };
        let captured = probe.captured();
        write_wav(path, hw, &captured)?;
        info!(
            "Wrote {} frames to {}",
            captured.len() / hw.frame_bytes(),
            path.display()
        );
        Ok(())
    }
}

/// Config file (explicit path or platform default) with flag overrides on top
pub fn load_config(args: &GlobalArgs) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => config::load_from(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => config::load(),
    };

    if let Some(device) = &args.device {
        config.device.id = device.clone();
    }
    if let Some(rate) = args.rate {
        config.stream.rate = rate;
    }
    if let Some(channels) = args.channels {
        config.stream.channels = channels;
    }
    if let Some(buffer_time) = args.buffer_time {
        config.stream.buffer_time_us = buffer_time;
    }
    if let Some(period_time) = args.period_time {
        config.stream.period_time_us = period_time;
    }
    if let Some(format) = args.format {
        config.stream.format = format.into();
    }
    Ok(config)
}

#[cfg(feature = "hardware")]
fn hardware_backend() -> Result<Box<dyn PcmBackend>> {
    Ok(Box::new(soundy_core::CpalBackend::new()))
}

#[cfg(not(feature = "hardware"))]
fn hardware_backend() -> Result<Box<dyn PcmBackend>> {
    bail!("soundy was built without hardware output; rebuild with `--features hardware`")
}

/// Names of the hardware output devices, when hardware output is built in
#[cfg(feature = "hardware")]
pub fn hardware_devices() -> Vec<String> {
    soundy_core::CpalBackend::new().device_names()
}

#[cfg(not(feature = "hardware"))]
pub fn hardware_devices() -> Vec<String> {
    Vec::new()
}

fn write_wav(path: &Path, hw: &HwConfig, data: &[u8]) -> Result<()> {
    let sample_format = match hw.format {
        SampleFormat::F32Le => hound::SampleFormat::Float,
        SampleFormat::U8 | SampleFormat::S16Le => hound::SampleFormat::Int,
    };
    let spec = hound::WavSpec {
        channels: hw.channels as u16,
        sample_rate: hw.rate,
        bits_per_sample: hw.format.bits(),
        sample_format,
    };
    let mut writer = hound::WavWriter::create(path, spec)
        .with_context(|| format!("Failed to create {}", path.display()))?;

    match hw.format {
        // hound takes signed 8-bit values and stores them offset by 128
        SampleFormat::U8 => {
            for &byte in data {
                writer.write_sample((byte as i16 - 128) as i8)?;
            }
        }
        SampleFormat::S16Le => {
            for chunk in data.chunks_exact(2) {
                writer.write_sample(i16::from_le_bytes([chunk[0], chunk[1]]))?;
            }
        }
        SampleFormat::F32Le => {
            for chunk in data.chunks_exact(4) {
                writer.write_sample(f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))?;
            }
        }
    }
    writer.finalize().context("Failed to finalize WAV file")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use soundy_core::AccessPattern;

    fn args() -> GlobalArgs {
        GlobalArgs {
            backend: BackendKind::Sim,
            device: None,
            config: None,
            rate: None,
            channels: None,
            buffer_time: None,
            period_time: None,
            format: None,
            wav: None,
        }
    }

    #[test]
    fn test_flags_override_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[stream]\nrate = 22050\nchannels = 2\n").unwrap();

        let mut args = args();
        args.config = Some(path);
        args.channels = Some(1);
        args.device = Some("speaker".into());

        let config = load_config(&args).unwrap();
        assert_eq!(config.stream.rate, 22_050);
        assert_eq!(config.stream.channels, 1);
        assert_eq!(config.device.id, "speaker");
    }

    #[test]
    fn test_wav_requires_sim_backend() {
        let mut args = args();
        args.backend = BackendKind::Cpal;
        args.wav = Some("out.wav".into());
        assert!(Session::new(&args).is_err());
    }

    #[test]
    fn test_write_wav_u8() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.wav");
        let hw = HwConfig {
            format: SampleFormat::U8,
            access: AccessPattern::Interleaved,
            channels: 1,
            rate: 8_000,
            buffer_time_us: 100_000,
            period_time_us: 20_000,
            period_size: 160,
            buffer_size: 800,
        };
        write_wav(&path, &hw, &[0x80, 0xff, 0x00]).unwrap();

        let mut reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().bits_per_sample, 8);
        let samples: Vec<i8> = reader.samples::<i8>().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![0, 127, -128]);
    }
}
