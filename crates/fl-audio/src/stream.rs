//! cpal output backend

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{BufferSize as CpalBufferSize, Device, SampleFormat as CpalSampleFormat, Stream, StreamConfig};

use crate::backend::{AudioBackend, DeviceHandle, OutputSpec, RenderCallback, SampleFormat};
use crate::device::resolve_output_device;
use crate::{AudioError, AudioResult};

struct OpenStream {
    device: Device,
    config: StreamConfig,
    stream: Option<Stream>,
    disconnected: Arc<AtomicBool>,
}

/// Plays through a cpal output device
pub struct CpalBackend {
    /// `None` selects the host default
    device_name: Option<String>,
    streams: HashMap<u64, OpenStream>,
    next_id: u64,
}

impl CpalBackend {
    pub fn new(device_name: Option<String>) -> Self {
        Self {
            device_name,
            streams: HashMap::new(),
            next_id: 1,
        }
    }
}

impl AudioBackend for CpalBackend {
    fn name(&self) -> &str {
        "cpal"
    }

    fn open(&mut self, spec: &OutputSpec) -> AudioResult<DeviceHandle> {
        let device = resolve_output_device(self.device_name.as_deref())?;
        let device_name = device.name().unwrap_or_else(|_| "<unnamed>".into());
        let sample_rate = cpal::SampleRate(spec.sample_rate);
        let wanted = match spec.sample_format {
            SampleFormat::F32 => CpalSampleFormat::F32,
        };

        let configs = device
            .supported_output_configs()
            .map_err(|e| AudioError::BackendError(e.to_string()))?;

        let mut matched = None;
        for supported in configs {
            if supported.channels() == spec.channels
                && supported.min_sample_rate() <= sample_rate
                && supported.max_sample_rate() >= sample_rate
                && supported.sample_format() == wanted
            {
                matched = Some(supported.with_sample_rate(sample_rate));
                break;
            }
        }
        let Some(supported) = matched else {
            return Err(AudioError::FormatMismatch {
                channels: spec.channels,
                sample_rate: spec.sample_rate,
                detail: format!("{} offers no matching f32 output config", device_name),
            });
        };

        let config = StreamConfig {
            channels: supported.channels(),
            sample_rate: supported.sample_rate(),
            buffer_size: match spec.buffer_frames {
                Some(frames) => CpalBufferSize::Fixed(frames),
                None => CpalBufferSize::Default,
            },
        };

        let id = self.next_id;
        self.next_id += 1;
        self.streams.insert(
            id,
            OpenStream {
                device,
                config,
                stream: None,
                disconnected: Arc::new(AtomicBool::new(false)),
            },
        );
        log::debug!("Opened cpal device {} as stream {}", device_name, id);

        Ok(DeviceHandle {
            id,
            device_name,
            spec: *spec,
        })
    }

    fn register_callback(&mut self, handle: &DeviceHandle, mut callback: RenderCallback) -> AudioResult<()> {
        let open = self
            .streams
            .get_mut(&handle.id)
            .ok_or_else(|| AudioError::StreamError(format!("unknown stream {}", handle.id)))?;

        let channels = open.config.channels.max(1) as usize;
        let disconnected = Arc::clone(&open.disconnected);
        let stream = open
            .device
            .build_output_stream(
                &open.config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let frames = data.len() / channels;
                    callback(data, frames);
                },
                move |err| {
                    if matches!(err, cpal::StreamError::DeviceNotAvailable) {
                        disconnected.store(true, Ordering::Release);
                    }
                    log::error!("Audio output stream error: {}", err);
                },
                None,
            )
            .map_err(|e| AudioError::StreamBuildError(e.to_string()))?;
        open.stream = Some(stream);
        Ok(())
    }

    fn activate(&mut self, handle: &DeviceHandle) -> AudioResult<()> {
        let stream = self
            .streams
            .get(&handle.id)
            .and_then(|open| open.stream.as_ref())
            .ok_or_else(|| AudioError::StreamError(format!("stream {} has no callback", handle.id)))?;
        stream.play().map_err(|e| AudioError::StreamError(e.to_string()))
    }

    fn close(&mut self, handle: DeviceHandle) {
        if let Some(open) = self.streams.remove(&handle.id)
            && let Some(stream) = open.stream
        {
            let _ = stream.pause();
        }
    }

    fn is_alive(&self, handle: &DeviceHandle) -> bool {
        self.streams
            .get(&handle.id)
            .is_some_and(|open| !open.disconnected.load(Ordering::Acquire))
    }
}
