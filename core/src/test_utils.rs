//! Shared test utilities for integration and unit tests

use crate::device::{
    AccessPattern, DeviceHandle, OpenMode, SimulatedDevice, SimulatedHost, StreamDirection,
};

// ============================================================================
// Hosts
// ============================================================================

/// Host with one unpaced `"default"` device that records everything written
pub fn sim_host() -> SimulatedHost {
    let host = SimulatedHost::new();
    host.add_device(SimulatedDevice::new("default").with_capture(true));
    host
}

/// Host whose `"default"` device is built by `configure`
pub fn sim_host_with(configure: impl FnOnce(SimulatedDevice) -> SimulatedDevice) -> SimulatedHost {
    let host = SimulatedHost::new();
    host.add_device(configure(SimulatedDevice::new("default").with_capture(true)));
    host
}

// ============================================================================
// Devices
// ============================================================================

/// Open `"default"` on `host` for non-blocking playback, nothing negotiated
pub fn open_default(host: &SimulatedHost) -> crate::Result<DeviceHandle> {
    DeviceHandle::open(
        host,
        "default",
        StreamDirection::Playback,
        OpenMode::NonBlocking,
    )
}

/// Open `"default"` on `host` and negotiate U8 interleaved parameters
pub fn apply_on(
    host: &SimulatedHost,
    channels: u32,
    rate: u32,
    buffer_time_us: u32,
    period_time_us: u32,
) -> DeviceHandle {
    let mut device = open_default(host).unwrap();
    device.set_access(AccessPattern::Interleaved).unwrap();
    device.set_channels(channels).unwrap();
    device.set_rate_near(rate).unwrap();
    device.set_buffer_time_near(buffer_time_us).unwrap();
    device.set_period_time_near(period_time_us).unwrap();
    device.apply().unwrap();
    device
}

/// Fresh [`sim_host`] plus an applied handle on its `"default"` device
pub fn applied_device(
    channels: u32,
    rate: u32,
    buffer_time_us: u32,
    period_time_us: u32,
) -> (SimulatedHost, DeviceHandle) {
    let host = sim_host();
    let device = apply_on(&host, channels, rate, buffer_time_us, period_time_us);
    (host, device)
}

// ============================================================================
// Waiting
// ============================================================================

/// Poll `condition` until it holds or a few seconds pass
pub fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
    while std::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(std::time::Duration::from_millis(1));
    }
    condition()
}
