//! Output backend abstraction and the driver that keeps a device alive
//!
//! Provides:
//! - `AudioBackend`: open / register callback / activate / close a device
//! - `OutputDriver`: owns one backend stream, routes device callbacks into
//!   the shared `DeviceCallbackEngine`, and reconnects on loss with a fixed
//!   retry budget

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::callback::DeviceCallbackEngine;
use crate::{AudioError, AudioResult};

/// Device callback: interleaved output buffer and its frame count
pub type RenderCallback = Box<dyn FnMut(&mut [f32], usize) + Send + 'static>;

/// Renderer shared between the control thread and the device callback
pub type SharedRenderer = Arc<Mutex<DeviceCallbackEngine>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleFormat {
    F32,
}

/// Stream format requested from a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputSpec {
    pub channels: u16,
    pub sample_rate: u32,
    pub sample_format: SampleFormat,
    /// Preferred device buffer size in frames
    pub buffer_frames: Option<u32>,
}

impl Default for OutputSpec {
    fn default() -> Self {
        Self {
            channels: 2,
            sample_rate: 48000,
            sample_format: SampleFormat::F32,
            buffer_frames: None,
        }
    }
}

/// An opened output stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceHandle {
    pub id: u64,
    pub device_name: String,
    pub spec: OutputSpec,
}

pub trait AudioBackend {
    fn name(&self) -> &str;

    /// Open a stream in exactly `spec`'s format. A device that cannot
    /// supply it fails with `FormatMismatch`.
    fn open(&mut self, spec: &OutputSpec) -> AudioResult<DeviceHandle>;

    fn register_callback(&mut self, handle: &DeviceHandle, callback: RenderCallback) -> AudioResult<()>;

    fn activate(&mut self, handle: &DeviceHandle) -> AudioResult<()>;

    fn close(&mut self, handle: DeviceHandle);

    /// `false` once the device reported itself gone
    fn is_alive(&self, handle: &DeviceHandle) -> bool;
}

// ═══════════════════════════════════════════════════════════════════════════════
// OUTPUT DRIVER
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    /// Fixed wait before each attempt
    pub backoff: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(250),
        }
    }
}

pub struct OutputDriver<B: AudioBackend> {
    backend: B,
    spec: OutputSpec,
    renderer: SharedRenderer,
    policy: ReconnectPolicy,
    handle: Option<DeviceHandle>,
    unusable: bool,
    reconnects: u32,
}

impl<B: AudioBackend> OutputDriver<B> {
    pub fn new(backend: B, spec: OutputSpec, renderer: SharedRenderer, policy: ReconnectPolicy) -> Self {
        Self {
            backend,
            spec,
            renderer,
            policy,
            handle: None,
            unusable: false,
            reconnects: 0,
        }
    }

    /// Open, register and activate the device
    pub fn start(&mut self) -> AudioResult<()> {
        if self.unusable {
            return Err(AudioError::BackendUnusable {
                attempts: self.policy.max_attempts,
            });
        }
        let handle = self.bring_up()?;
        log::info!(
            "Output started on {} ({} Hz, {} ch) via {}",
            handle.device_name,
            handle.spec.sample_rate,
            handle.spec.channels,
            self.backend.name()
        );
        self.handle = Some(handle);
        Ok(())
    }

    fn bring_up(&mut self) -> AudioResult<DeviceHandle> {
        let handle = self.backend.open(&self.spec)?;
        let renderer = Arc::clone(&self.renderer);
        let callback: RenderCallback = Box::new(move |out: &mut [f32], frames: usize| match renderer.try_lock() {
            Some(mut engine) => engine.process(out, frames),
            None => out.fill(0.0),
        });
        let result = self
            .backend
            .register_callback(&handle, callback)
            .and_then(|_| self.backend.activate(&handle));
        if let Err(e) = result {
            self.backend.close(handle);
            return Err(e);
        }
        Ok(handle)
    }

    /// Tear down the current stream and retry with fixed backoff. After the
    /// policy's attempts are spent the driver is unusable until reset.
    pub fn reconnect(&mut self) -> AudioResult<()> {
        if self.unusable {
            return Err(AudioError::BackendUnusable {
                attempts: self.policy.max_attempts,
            });
        }
        if let Some(handle) = self.handle.take() {
            self.backend.close(handle);
        }

        for attempt in 1..=self.policy.max_attempts {
            std::thread::sleep(self.policy.backoff);
            log::warn!("Reconnecting output (attempt {}/{})", attempt, self.policy.max_attempts);
            match self.bring_up() {
                Ok(handle) => {
                    log::info!("Output reconnected to {}", handle.device_name);
                    self.handle = Some(handle);
                    self.reconnects += 1;
                    return Ok(());
                }
                Err(e) if e.is_fatal() => {
                    log::error!("Output reconnect failed permanently: {}", e);
                    self.unusable = true;
                    return Err(e);
                }
                Err(e) => log::warn!("Reconnect attempt {} failed: {}", attempt, e),
            }
        }

        self.unusable = true;
        log::error!(
            "Output unusable after {} reconnect attempts; select another device",
            self.policy.max_attempts
        );
        Err(AudioError::BackendUnusable {
            attempts: self.policy.max_attempts,
        })
    }

    /// Reconnect if the device went away. Returns `true` when the stream was
    /// healthy, `false` when it had to be reconnected.
    pub fn check_liveness(&mut self) -> AudioResult<bool> {
        if let Some(handle) = &self.handle {
            if self.backend.is_alive(handle) {
                return Ok(true);
            }
            log::warn!("Output device {} disconnected", handle.device_name);
        }
        self.reconnect().map(|_| false)
    }

    #[inline]
    pub fn is_unusable(&self) -> bool {
        self.unusable
    }

    /// Allow another start / reconnect cycle (new device selected)
    pub fn reset_unusable(&mut self) {
        self.unusable = false;
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    pub fn reconnect_count(&self) -> u32 {
        self.reconnects
    }

    pub fn handle(&self) -> Option<&DeviceHandle> {
        self.handle.as_ref()
    }

    pub fn spec(&self) -> &OutputSpec {
        &self.spec
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn renderer(&self) -> &SharedRenderer {
        &self.renderer
    }

    pub fn shutdown(&mut self) {
        if let Some(handle) = self.handle.take() {
            log::info!("Closing output {}", handle.device_name);
            self.backend.close(handle);
        }
    }
}

impl<B: AudioBackend> Drop for OutputDriver<B> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
