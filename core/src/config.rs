//! Configuration management (`<config dir>/config.toml`)
//!
//! Handles loading, saving, and providing defaults for device, stream and
//! engine settings. Settings are stored in TOML format in the
//! platform-specific config directory.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::device::{
    AccessPattern, DeviceHandle, HwConfig, OpenMode, PcmBackend, SampleFormat, StreamDirection,
};
use crate::engine::{EngineOptions, WaitPolicy};
use crate::error::{Result, SoundyError};

/// Playback configuration.
///
/// Contains all user-configurable settings organized into sections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Config {
    /// Which device to open and how
    #[serde(default)]
    pub device: DeviceConfig,
    /// Parameters to negotiate
    #[serde(default)]
    pub stream: StreamSettings,
    /// Real-time thread tuning
    #[serde(default)]
    pub engine: EngineConfig,
}

/// Device selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Device identifier (default: "default")
    #[serde(default = "default_device_id")]
    pub id: String,
    /// Open mode (default: non_blocking)
    #[serde(default)]
    pub mode: OpenMode,
}

/// Requested stream parameters. The device may adjust every `*_near` value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StreamSettings {
    /// Sample encoding (default: u8)
    #[serde(default)]
    pub format: SampleFormat,
    /// Sample layout (default: interleaved)
    #[serde(default)]
    pub access: AccessPattern,
    /// Channel count (default: 1)
    #[serde(default = "default_channels")]
    pub channels: u32,
    /// Requested rate in Hz (default: 44100)
    #[serde(default = "default_rate")]
    pub rate: u32,
    /// Allow software resampling (default: true)
    #[serde(default = "default_true")]
    pub resample: bool,
    /// Requested ring buffer duration in µs (default: 500000)
    #[serde(default = "default_buffer_time_us")]
    pub buffer_time_us: u32,
    /// Requested period duration in µs (default: 100000)
    #[serde(default = "default_period_time_us")]
    pub period_time_us: u32,
}

/// Engine tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// What to do while the device is full (default: spin)
    #[serde(default)]
    pub wait_policy: WaitPolicy,
    /// Sleep for the `sleep` wait policy, in µs (default: 1000)
    #[serde(default = "default_wait_sleep_us")]
    pub wait_sleep_us: u64,
    /// Pause between resume attempts while suspended, in ms (default: 50)
    #[serde(default = "default_resume_backoff_ms")]
    pub resume_backoff_ms: u64,
}

fn default_device_id() -> String {
    "default".to_string()
}
fn default_channels() -> u32 {
    1
}
fn default_rate() -> u32 {
    44_100
}
fn default_true() -> bool {
    true
}
fn default_buffer_time_us() -> u32 {
    500_000
}
fn default_period_time_us() -> u32 {
    100_000
}
fn default_wait_sleep_us() -> u64 {
    1_000
}
fn default_resume_backoff_ms() -> u64 {
    50
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            id: default_device_id(),
            mode: OpenMode::default(),
        }
    }
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            format: SampleFormat::default(),
            access: AccessPattern::default(),
            channels: default_channels(),
            rate: default_rate(),
            resample: default_true(),
            buffer_time_us: default_buffer_time_us(),
            period_time_us: default_period_time_us(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            wait_policy: WaitPolicy::default(),
            wait_sleep_us: default_wait_sleep_us(),
            resume_backoff_ms: default_resume_backoff_ms(),
        }
    }
}

impl EngineConfig {
    pub fn options(&self) -> EngineOptions {
        EngineOptions {
            wait_policy: self.wait_policy,
            wait_sleep: Duration::from_micros(self.wait_sleep_us),
            resume_backoff: Duration::from_millis(self.resume_backoff_ms),
        }
    }
}

/// Returns the platform-specific configuration directory.
///
/// On Windows: `%APPDATA%\soundy\config`
/// On macOS: `~/Library/Application Support/io.soundy.soundy`
/// On Linux: `~/.config/soundy`
///
/// Returns `None` if the home directory cannot be determined.
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("io.soundy", "", "soundy")
        .map(|dirs| dirs.config_dir().to_path_buf())
}

/// Loads the configuration from the platform config directory.
///
/// Returns default values if the file doesn't exist or cannot be parsed.
pub fn load() -> Config {
    config_dir()
        .and_then(|dir| load_from(&dir.join("config.toml")).ok())
        .unwrap_or_default()
}

/// Loads the configuration from `path`, reporting read and parse errors.
pub fn load_from(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| SoundyError::ConfigFile(format!("{}: {}", path.display(), e)))?;
    toml::from_str(&content)
        .map_err(|e| SoundyError::ConfigFile(format!("{}: {}", path.display(), e)))
}

/// Saves the configuration to the platform config directory.
///
/// Creates the directory if it doesn't exist. Does nothing if the home
/// directory cannot be determined.
pub fn save(config: &Config) -> Result<()> {
    match config_dir() {
        Some(dir) => save_to(config, &dir.join("config.toml")),
        None => Ok(()),
    }
}

/// Saves the configuration to `path`, creating parent directories.
pub fn save_to(config: &Config, path: &Path) -> Result<()> {
    let io_err = |e: std::io::Error| SoundyError::ConfigFile(format!("{}: {}", path.display(), e));

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }
    let content = toml::to_string_pretty(config)
        .map_err(|e| SoundyError::ConfigFile(e.to_string()))?;
    std::fs::write(path, content).map_err(io_err)
}

/// Run the whole negotiation sequence on `device` and apply it.
///
/// Returns the parameters the device actually chose.
pub fn negotiate(device: &mut DeviceHandle, settings: &StreamSettings) -> Result<HwConfig> {
    device.set_access(settings.access)?;
    device.set_rate_resample(settings.resample)?;
    device.set_channels(settings.channels)?;
    let rate = device.set_rate_near(settings.rate)?;
    let buffer = device.set_buffer_time_near(settings.buffer_time_us)?;
    let period = device.set_period_time_near(settings.period_time_us)?;
    debug!(
        "Negotiated '{}': rate {} (asked {}), buffer {} µs (asked {}), period {} µs (asked {})",
        device.id(),
        rate,
        settings.rate,
        buffer,
        settings.buffer_time_us,
        period,
        settings.period_time_us
    );
    device.apply()
}

/// Open the configured playback device and negotiate the configured stream
pub fn open_device(backend: &dyn PcmBackend, config: &Config) -> Result<DeviceHandle> {
    let mut device = DeviceHandle::open_with_format(
        backend,
        &config.device.id,
        StreamDirection::Playback,
        config.device.mode,
        config.stream.format,
    )?;
    negotiate(&mut device, &config.stream)?;
    Ok(device)
}
