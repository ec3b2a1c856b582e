// cadence-output/src/device.rs
//
// Output device enumeration and lookup by name

use cpal::traits::{DeviceTrait, HostTrait};
use serde::{Deserialize, Serialize};

use crate::backend::AudioBackend;
use crate::error::{OutputError, Result};

/// Information about an audio output device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioDeviceInfo {
    /// Device name (human-readable)
    pub name: String,

    /// Backend/host this device belongs to
    pub backend: AudioBackend,

    /// Is this the system default device for this backend?
    pub is_default: bool,

    /// Default sample rate (Hz)
    pub sample_rate: u32,

    /// Number of output channels
    pub channels: u16,

    /// Supported sample rates (min, max)
    pub sample_rate_range: Option<(u32, u32)>,
}

/// Human-readable device name
pub(crate) fn device_name(device: &cpal::Device) -> Option<String> {
    device.description().ok().map(|d| d.name().to_string())
}

fn describe(device: &cpal::Device, backend: AudioBackend, is_default: bool) -> Option<AudioDeviceInfo> {
    let name = device_name(device)?;
    let config = device.default_output_config().ok()?;

    let sample_rate_range = device.supported_output_configs().ok().and_then(|configs| {
        configs
            .map(|c| (c.min_sample_rate(), c.max_sample_rate()))
            .reduce(|(lo, hi), (min, max)| (lo.min(min), hi.max(max)))
    });

    Some(AudioDeviceInfo {
        name,
        backend,
        is_default,
        sample_rate: config.sample_rate(),
        channels: config.channels(),
        sample_rate_range,
    })
}

/// Enumerate all output devices for a backend
///
/// The default device comes first, the rest alphabetically. Devices that
/// cannot report a name or default config are skipped.
pub fn list_devices(backend: AudioBackend) -> Result<Vec<AudioDeviceInfo>> {
    let host = backend.to_cpal_host()?;
    let default_name = host.default_output_device().as_ref().and_then(device_name);

    let mut device_list: Vec<AudioDeviceInfo> = host
        .output_devices()?
        .filter_map(|device| {
            let is_default = default_name.is_some() && device_name(&device) == default_name;
            describe(&device, backend, is_default)
        })
        .collect();

    device_list.sort_by(|a, b| match (a.is_default, b.is_default) {
        (true, false) => std::cmp::Ordering::Less,
        (false, true) => std::cmp::Ordering::Greater,
        _ => a.name.cmp(&b.name),
    });

    Ok(device_list)
}

/// Information about the default output device for a backend
pub fn default_device(backend: AudioBackend) -> Result<AudioDeviceInfo> {
    let host = backend.to_cpal_host()?;
    let device = host
        .default_output_device()
        .ok_or_else(|| OutputError::DeviceNotFound("default".into()))?;
    describe(&device, backend, true)
        .ok_or_else(|| OutputError::Config("default device has no usable output config".into()))
}

/// Find a device by exact name within a backend
pub fn find_device_by_name(backend: AudioBackend, name: &str) -> Result<cpal::Device> {
    let host = backend.to_cpal_host()?;
    host.output_devices()?
        .find(|device| device_name(device).as_deref() == Some(name))
        .ok_or_else(|| OutputError::DeviceNotFound(name.to_string()))
}

/// Device for a configured name; empty means the backend default
pub fn resolve_device(backend: AudioBackend, name: &str) -> Result<cpal::Device> {
    if name.is_empty() {
        backend
            .to_cpal_host()?
            .default_output_device()
            .ok_or_else(|| OutputError::DeviceNotFound("default".into()))
    } else {
        find_device_by_name(backend, name)
    }
}
