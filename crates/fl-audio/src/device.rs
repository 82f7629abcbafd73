//! Output device discovery
//!
//! The engine renders interleaved f32, so a device is only useful when one
//! of its configs offers f32 output at the session rate and channel count.

use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{Device, Host, SampleFormat as CpalSampleFormat};
use serde::Serialize;

use crate::backend::OutputSpec;
use crate::{AudioError, AudioResult};

/// One f32 output config range: channels and inclusive rate span
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OutputRange {
    pub channels: u16,
    pub min_rate: u32,
    pub max_rate: u32,
}

impl OutputRange {
    #[inline]
    pub fn accepts(&self, channels: u16, rate: u32) -> bool {
        self.channels == channels && (self.min_rate..=self.max_rate).contains(&rate)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DeviceInfo {
    pub name: String,
    pub is_default: bool,
    /// f32 output configs only
    pub ranges: Vec<OutputRange>,
}

impl DeviceInfo {
    pub fn max_channels(&self) -> u16 {
        self.ranges.iter().map(|r| r.channels).max().unwrap_or(0)
    }

    /// Whether the engine can open this device with `spec`
    pub fn can_play(&self, spec: &OutputSpec) -> bool {
        self.ranges.iter().any(|r| r.accepts(spec.channels, spec.sample_rate))
    }
}

/// Audio host. JACK wins on Linux when it is running.
pub fn get_host() -> Host {
    #[cfg(target_os = "linux")]
    {
        let jack = cpal::available_hosts()
            .into_iter()
            .find(|h| *h == cpal::HostId::Jack)
            .and_then(|id| cpal::host_from_id(id).ok());
        if let Some(host) = jack {
            return host;
        }
    }
    cpal::default_host()
}

pub fn list_output_devices() -> AudioResult<Vec<DeviceInfo>> {
    let host = get_host();
    let default_name = host.default_output_device().and_then(|d| d.name().ok());

    let devices = host
        .output_devices()
        .map_err(|e| AudioError::BackendError(e.to_string()))?
        .filter_map(|device| {
            let name = device.name().ok()?;
            Some(DeviceInfo {
                is_default: default_name.as_deref() == Some(name.as_str()),
                ranges: f32_ranges(&device),
                name,
            })
        })
        .collect();
    Ok(devices)
}

/// Named device, or the host default when `name` is `None`
pub fn resolve_output_device(name: Option<&str>) -> AudioResult<Device> {
    let host = get_host();
    let Some(name) = name else {
        return host.default_output_device().ok_or(AudioError::NoDevice);
    };

    let mut devices = host
        .output_devices()
        .map_err(|e| AudioError::BackendError(e.to_string()))?;
    devices
        .find(|device| device.name().is_ok_and(|n| n == name))
        .ok_or_else(|| AudioError::DeviceNotFound(name.to_string()))
}

fn f32_ranges(device: &Device) -> Vec<OutputRange> {
    let Ok(configs) = device.supported_output_configs() else {
        return Vec::new();
    };
    merge_ranges(
        configs
            .filter(|c| c.sample_format() == CpalSampleFormat::F32)
            .map(|c| OutputRange {
                channels: c.channels(),
                min_rate: c.min_sample_rate().0,
                max_rate: c.max_sample_rate().0,
            }),
    )
}

/// Sort by channel count and drop exact duplicates
fn merge_ranges(ranges: impl Iterator<Item = OutputRange>) -> Vec<OutputRange> {
    let mut ranges: Vec<_> = ranges.collect();
    ranges.sort_unstable_by_key(|r| (r.channels, r.min_rate, r.max_rate));
    ranges.dedup();
    ranges
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SampleFormat;

    fn range(channels: u16, min_rate: u32, max_rate: u32) -> OutputRange {
        OutputRange {
            channels,
            min_rate,
            max_rate,
        }
    }

    #[test]
    fn test_can_play_checks_channels_and_rate() {
        let info = DeviceInfo {
            name: "test".into(),
            is_default: true,
            ranges: merge_ranges(
                [range(2, 44100, 48000), range(1, 8000, 96000), range(2, 44100, 48000)].into_iter(),
            ),
        };
        assert_eq!(info.ranges.len(), 2);
        assert_eq!(info.max_channels(), 2);

        let spec = |channels, sample_rate| OutputSpec {
            sample_rate,
            channels,
            sample_format: SampleFormat::F32,
            buffer_frames: None,
        };
        assert!(info.can_play(&spec(2, 48000)));
        assert!(info.can_play(&spec(1, 8000)));
        assert!(!info.can_play(&spec(2, 96000)));
        assert!(!info.can_play(&spec(6, 48000)));
    }
}
