//! OutputDriver Integration Tests
//!
//! Tests for:
//! - Bringing a virtual device up and routing its callback to the engine
//! - Bounded reconnect with fixed backoff after a disconnect
//! - No further retries once the driver is unusable, recovery after reset
//! - Format mismatch is reported at open and never retried
//! - Renderer contention renders silence instead of blocking

use std::sync::Arc;
use std::time::Duration;

use fl_audio::{
    AudioError, AudioStreamDescriptor, CachePool, CallbackHooks, ControlSender, DeviceCallbackEngine, OutputDriver,
    OutputSpec, PcmFormat, ReconnectPolicy, SharedRenderer, VirtualBackend, control_queue,
};
use parking_lot::Mutex;

// ═══════════════════════════════════════════════════════════════════════════════
// HELPERS
// ═══════════════════════════════════════════════════════════════════════════════

const BACKOFF: Duration = Duration::from_millis(20);

fn spec() -> OutputSpec {
    OutputSpec {
        channels: 2,
        sample_rate: 48000,
        ..OutputSpec::default()
    }
}

fn policy() -> ReconnectPolicy {
    ReconnectPolicy {
        max_attempts: 3,
        backoff: BACKOFF,
    }
}

/// Idle engine (no clip) behind a shared renderer
fn renderer() -> (SharedRenderer, ControlSender) {
    let format = PcmFormat::s16le(48000, 2);
    let desc = Arc::new(AudioStreamDescriptor::new(format, 48000, 2, 48000 * 4));
    let (control, receiver) = control_queue(8);
    let (requester, _filler) = CachePool::create(4, 256, &format, 2);
    let engine = DeviceCallbackEngine::new(desc, receiver, requester, Arc::new(CallbackHooks::new()));
    (Arc::new(Mutex::new(engine)), control)
}

fn started_driver(device: &VirtualBackend) -> OutputDriver<VirtualBackend> {
    let (renderer, _control) = renderer();
    let mut driver = OutputDriver::new(device.clone(), spec(), renderer, policy());
    driver.start().unwrap();
    driver
}

// ═══════════════════════════════════════════════════════════════════════════════
// START
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_start_routes_callback_to_engine() {
    let device = VirtualBackend::new();
    let driver = started_driver(&device);
    assert!(driver.is_running());
    assert!(device.is_active());

    let out = device.render(64, 2);
    assert_eq!(out.len(), 128);
    assert!(out.iter().all(|&s| s == 0.0));

    let engine = driver.renderer().lock();
    assert_eq!(engine.status().callbacks(), 1);
    assert_eq!(engine.status().frames_written(), 64);
}

#[test]
fn test_healthy_liveness_check_does_nothing() {
    let device = VirtualBackend::new();
    let mut driver = started_driver(&device);
    assert!(driver.check_liveness().unwrap());
    assert_eq!(device.open_attempts(), 1);
    assert_eq!(driver.reconnect_count(), 0);
}

#[test]
fn test_format_mismatch_is_fatal_at_open() {
    let device = VirtualBackend::with_formats(vec![44100], 2);
    let (renderer, _control) = renderer();
    let mut driver = OutputDriver::new(device.clone(), spec(), renderer, policy());

    let err = driver.start().unwrap_err();
    assert!(matches!(err, AudioError::FormatMismatch { sample_rate: 48000, .. }));
    assert!(err.is_fatal());
    assert!(!driver.is_running());
    assert_eq!(device.open_attempts(), 1);
}

// ═══════════════════════════════════════════════════════════════════════════════
// RECONNECT
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_disconnect_exhausts_three_attempts() {
    let _ = env_logger::builder().is_test(true).try_init();
    let device = VirtualBackend::new();
    let mut driver = started_driver(&device);

    device.disconnect();
    let err = driver.check_liveness().unwrap_err();
    assert!(matches!(err, AudioError::BackendUnusable { attempts: 3 }));
    assert!(driver.is_unusable());
    assert!(!driver.is_running());

    // One initial open plus three retries
    assert_eq!(device.open_attempts(), 4);
    let times = device.open_times();
    for pair in times[1..].windows(2) {
        assert!(pair[1].duration_since(pair[0]) >= BACKOFF);
    }
}

#[test]
fn test_unusable_driver_does_not_retry_again() {
    let device = VirtualBackend::new();
    let mut driver = started_driver(&device);
    device.disconnect();
    assert!(driver.check_liveness().is_err());
    assert_eq!(device.open_attempts(), 4);

    assert!(matches!(
        driver.check_liveness(),
        Err(AudioError::BackendUnusable { attempts: 3 })
    ));
    assert!(matches!(driver.start(), Err(AudioError::BackendUnusable { .. })));
    assert_eq!(device.open_attempts(), 4);
}

#[test]
fn test_reset_allows_a_new_session() {
    let device = VirtualBackend::new();
    let mut driver = started_driver(&device);
    device.disconnect();
    assert!(driver.check_liveness().is_err());

    device.reconnect_device();
    driver.reset_unusable();
    driver.start().unwrap();
    assert!(driver.is_running());
    assert!(device.is_active());
    assert_eq!(device.open_attempts(), 5);
}

#[test]
fn test_forced_reconnect_recovers_on_second_attempt() {
    let device = VirtualBackend::new();
    let mut driver = started_driver(&device);

    device.fail_next_opens(1);
    driver.reconnect().unwrap();
    assert_eq!(driver.reconnect_count(), 1);
    assert!(!driver.is_unusable());
    assert_eq!(device.open_attempts(), 3);

    device.render(16, 2);
    assert_eq!(driver.renderer().lock().status().callbacks(), 1);
}

// ═══════════════════════════════════════════════════════════════════════════════
// CONTENTION
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_locked_renderer_renders_silence() {
    let device = VirtualBackend::new();
    let driver = started_driver(&device);

    let renderer = Arc::clone(driver.renderer());
    let guard = renderer.lock();
    let out = device.render(32, 2);
    assert!(out.iter().all(|&s| s == 0.0));
    assert_eq!(guard.status().callbacks(), 0);
}
