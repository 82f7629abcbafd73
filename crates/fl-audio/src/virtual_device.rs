//! In-process output device
//!
//! Renders on demand instead of on a hardware clock: `render(frames)` drives
//! the registered callback once and returns what it wrote. Clones share one
//! device, so a test can keep a handle after moving the backend into a
//! driver. Disconnects and open failures can be injected.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use crate::backend::{AudioBackend, DeviceHandle, OutputSpec, RenderCallback, SampleFormat};
use crate::{AudioError, AudioResult};

struct VirtualState {
    sample_rates: Vec<u32>,
    max_channels: u16,
    callback: Option<RenderCallback>,
    current: Option<u64>,
    active: bool,
    alive: bool,
    fail_opens: u32,
    open_attempts: Vec<Instant>,
    next_id: u64,
}

#[derive(Clone)]
pub struct VirtualBackend {
    state: Arc<Mutex<VirtualState>>,
}

impl Default for VirtualBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl VirtualBackend {
    /// Stereo and mono at common rates
    pub fn new() -> Self {
        Self::with_formats(vec![8000, 22050, 44100, 48000, 96000], 2)
    }

    pub fn with_formats(sample_rates: Vec<u32>, max_channels: u16) -> Self {
        Self {
            state: Arc::new(Mutex::new(VirtualState {
                sample_rates,
                max_channels,
                callback: None,
                current: None,
                active: false,
                alive: true,
                fail_opens: 0,
                open_attempts: Vec::new(),
                next_id: 1,
            })),
        }
    }

    /// Run the device callback for `frames` frames
    pub fn render(&self, frames: usize, channels: usize) -> Vec<f32> {
        let mut out = vec![0.0; frames * channels];
        self.render_into(&mut out, frames);
        out
    }

    /// Run the device callback into `out`. Returns `false` (and leaves `out`
    /// untouched) when the stream is not active.
    pub fn render_into(&self, out: &mut [f32], frames: usize) -> bool {
        // Take the callback out so it runs without the state lock held
        let callback = {
            let mut state = self.state.lock();
            if !state.active || !state.alive {
                return false;
            }
            state.callback.take()
        };
        let Some(mut callback) = callback else {
            return false;
        };
        callback(out, frames);
        let mut state = self.state.lock();
        if state.callback.is_none() && state.active {
            state.callback = Some(callback);
        }
        true
    }

    /// Simulate the device being unplugged
    pub fn disconnect(&self) {
        let mut state = self.state.lock();
        state.alive = false;
        state.active = false;
    }

    /// Make the device available again
    pub fn reconnect_device(&self) {
        self.state.lock().alive = true;
    }

    /// The next `count` opens fail
    pub fn fail_next_opens(&self, count: u32) {
        self.state.lock().fail_opens = count;
    }

    pub fn open_attempts(&self) -> usize {
        self.state.lock().open_attempts.len()
    }

    /// When each open was attempted
    pub fn open_times(&self) -> Vec<Instant> {
        self.state.lock().open_attempts.clone()
    }

    pub fn is_active(&self) -> bool {
        self.state.lock().active
    }
}

impl AudioBackend for VirtualBackend {
    fn name(&self) -> &str {
        "virtual"
    }

    fn open(&mut self, spec: &OutputSpec) -> AudioResult<DeviceHandle> {
        let mut state = self.state.lock();
        state.open_attempts.push(Instant::now());
        if state.fail_opens > 0 {
            state.fail_opens -= 1;
            return Err(AudioError::BackendError("virtual device unavailable".into()));
        }
        if !state.alive {
            return Err(AudioError::NoDevice);
        }
        if spec.sample_format != SampleFormat::F32
            || spec.channels == 0
            || spec.channels > state.max_channels
            || !state.sample_rates.contains(&spec.sample_rate)
        {
            return Err(AudioError::FormatMismatch {
                channels: spec.channels,
                sample_rate: spec.sample_rate,
                detail: "virtual device".into(),
            });
        }

        let id = state.next_id;
        state.next_id += 1;
        state.current = Some(id);
        state.callback = None;
        state.active = false;
        Ok(DeviceHandle {
            id,
            device_name: format!("virtual-{}", id),
            spec: *spec,
        })
    }

    fn register_callback(&mut self, handle: &DeviceHandle, callback: RenderCallback) -> AudioResult<()> {
        let mut state = self.state.lock();
        if state.current != Some(handle.id) {
            return Err(AudioError::StreamError(format!("stream {} is not open", handle.id)));
        }
        state.callback = Some(callback);
        Ok(())
    }

    fn activate(&mut self, handle: &DeviceHandle) -> AudioResult<()> {
        let mut state = self.state.lock();
        if state.current != Some(handle.id) || state.callback.is_none() {
            return Err(AudioError::StreamError(format!("stream {} has no callback", handle.id)));
        }
        state.active = true;
        Ok(())
    }

    fn close(&mut self, handle: DeviceHandle) {
        let mut state = self.state.lock();
        if state.current == Some(handle.id) {
            state.current = None;
            state.callback = None;
            state.active = false;
        }
    }

    fn is_alive(&self, handle: &DeviceHandle) -> bool {
        let state = self.state.lock();
        state.alive && state.current == Some(handle.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_drives_callback() {
        let mut backend = VirtualBackend::new();
        let spec = OutputSpec::default();
        let handle = backend.open(&spec).unwrap();
        backend
            .register_callback(&handle, Box::new(|out: &mut [f32], _: usize| out.fill(0.25)))
            .unwrap();
        assert!(backend.render(4, 2).iter().all(|&s| s == 0.0));

        backend.activate(&handle).unwrap();
        assert!(backend.render(4, 2).iter().all(|&s| s == 0.25));
    }

    #[test]
    fn test_unsupported_rate_is_format_mismatch() {
        let mut backend = VirtualBackend::with_formats(vec![48000], 2);
        let spec = OutputSpec {
            sample_rate: 44100,
            ..OutputSpec::default()
        };
        assert!(matches!(backend.open(&spec), Err(AudioError::FormatMismatch { .. })));
    }

    #[test]
    fn test_disconnect_and_injected_failures() {
        let mut backend = VirtualBackend::new();
        let handle = backend.open(&OutputSpec::default()).unwrap();
        assert!(backend.is_alive(&handle));
        backend.disconnect();
        assert!(!backend.is_alive(&handle));

        backend.reconnect_device();
        backend.fail_next_opens(1);
        assert!(backend.open(&OutputSpec::default()).is_err());
        assert!(backend.open(&OutputSpec::default()).is_ok());
        assert_eq!(backend.open_attempts(), 3);
    }
}
