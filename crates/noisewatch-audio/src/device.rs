use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{BufferSize, Device, Host, SampleFormat, SampleRate, StreamConfig, SupportedBufferSize};

use noisewatch_foundation::AudioError;

use crate::capture::CaptureConfig;

/// Input-device discovery and stream-format negotiation.
pub struct DeviceManager {
    host: Host,
}

#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub name: String,
    pub is_default: bool,
}

impl DeviceManager {
    pub fn new() -> Result<Self, AudioError> {
        Ok(Self {
            host: cpal::default_host(),
        })
    }

    pub fn enumerate_devices(&self) -> Vec<DeviceInfo> {
        let default_name = self.default_input_device_name();
        let mut devices = Vec::new();

        if let Ok(inputs) = self.host.input_devices() {
            for device in inputs {
                if let Ok(name) = device.name() {
                    let is_default = default_name.as_deref() == Some(name.as_str());
                    devices.push(DeviceInfo { name, is_default });
                }
            }
        }

        devices
    }

    pub fn default_input_device_name(&self) -> Option<String> {
        self.host.default_input_device().and_then(|d| d.name().ok())
    }

    /// Open the named input device, or the host default when no name is
    /// given. A specific name that does not match exactly is an error; the
    /// caller asked for that device, not a lookalike.
    pub fn open_device(&self, name: Option<&str>) -> Result<Device, AudioError> {
        if let Some(requested) = name {
            let devices = self.host.input_devices()?;
            for device in devices {
                if device.name().map(|n| n == requested).unwrap_or(false) {
                    return Ok(device);
                }
            }
            return Err(AudioError::DeviceNotFound {
                name: Some(requested.to_string()),
            });
        }

        self.host
            .default_input_device()
            .ok_or(AudioError::DeviceNotFound { name: None })
    }

    /// Pick a stream config for the requested capture format.
    ///
    /// Prefers the requested rate at the requested channel count, then the
    /// requested rate at any channel count (the callback downmixes), then
    /// the device default. The stream buffer is the platform-reported
    /// minimum scaled by the safety factor when the platform reports one.
    pub fn negotiate_config(
        &self,
        device: &Device,
        requested: &CaptureConfig,
    ) -> Result<(StreamConfig, SampleFormat), AudioError> {
        let rate = SampleRate(requested.sample_rate_hz);
        let ranges: Vec<_> = device.supported_input_configs()?.collect();

        let supports_rate =
            |r: &cpal::SupportedStreamConfigRange| r.min_sample_rate() <= rate && rate <= r.max_sample_rate();

        let chosen = ranges
            .iter()
            .find(|r| r.channels() == requested.channels && supports_rate(r))
            .or_else(|| ranges.iter().find(|r| supports_rate(r)))
            .map(|r| r.clone().with_sample_rate(rate));

        let supported = match chosen {
            Some(config) => config,
            None => device.default_input_config()?,
        };

        let sample_format = supported.sample_format();
        if !matches!(
            sample_format,
            SampleFormat::I16 | SampleFormat::U16 | SampleFormat::F32
        ) {
            return Err(AudioError::FormatNotSupported {
                format: format!("{:?}", sample_format),
            });
        }

        let buffer_size = match supported.buffer_size() {
            SupportedBufferSize::Range { min, max } if *min > 0 => {
                let scaled = min
                    .saturating_mul(requested.buffer_safety_factor.max(1))
                    .min(*max);
                BufferSize::Fixed(scaled)
            }
            _ => BufferSize::Default,
        };

        let config = StreamConfig {
            channels: supported.channels(),
            sample_rate: supported.sample_rate(),
            buffer_size,
        };

        Ok((config, sample_format))
    }
}
