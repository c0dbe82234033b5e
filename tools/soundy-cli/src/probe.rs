//! Probe command - negotiate and report the actual stream parameters

use anyhow::{Context, Result};
use clap::Args;

use crate::backend::{self, Session};
use crate::{BackendKind, GlobalArgs};

/// Arguments for the probe command
#[derive(Args)]
pub struct ProbeArgs {
    /// List hardware output devices instead of probing one
    #[arg(long)]
    pub list: bool,
}

pub fn execute(global: &GlobalArgs, args: ProbeArgs) -> Result<()> {
    if args.list {
        if global.backend == BackendKind::Sim {
            println!("default");
            return Ok(());
        }
        let devices = backend::hardware_devices();
        if devices.is_empty() {
            println!("No output devices found");
        }
        for name in devices {
            println!("{}", name);
        }
        return Ok(());
    }

    let session = Session::new(global)?;
    let device = session.open_device()?;
    let hw = device
        .config()
        .context("Device reported no configuration after negotiation")?;
    let requested = &session.config.stream;

    println!("Device:       {}", device.id());
    println!("Format:       {:?}", hw.format);
    println!("Access:       {:?}", hw.access);
    println!("Channels:     {}", hw.channels);
    println!(
        "Rate:         {} Hz (requested {})",
        hw.rate, requested.rate
    );
    println!(
        "Buffer time:  {} µs (requested {})",
        hw.buffer_time_us, requested.buffer_time_us
    );
    println!(
        "Period time:  {} µs (requested {})",
        hw.period_time_us, requested.period_time_us
    );
    println!("Buffer size:  {} frames", hw.buffer_size);
    println!("Period size:  {} frames", hw.period_size);
    Ok(())
}
