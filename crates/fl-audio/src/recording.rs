//! Recording tap
//!
//! The callback forks its final output through a second conversion pass
//! (rate + sample format of the recording) and pushes the encoded bytes into
//! a lock-free ring. A flush thread drains the ring into a `RecordingSink`.
//!
//! Ring overflow or a sink write error marks the recording corrupt; the
//! caller learns about it from `Recorder::finish`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use rtrb::{Consumer, Producer, RingBuffer};
use serde::Serialize;

use crate::convert::{Resampler, encode_into};
use crate::source::RecordingSink;
use crate::{AudioError, AudioResult, PcmFormat};

/// Largest callback block the tap converts without reallocating
const MAX_BLOCK_FRAMES: usize = 8192;

/// Flush thread wake-up interval
const FLUSH_INTERVAL: Duration = Duration::from_millis(5);

#[derive(Debug, Default)]
struct RecordingShared {
    corrupt: AtomicBool,
    overflowed: AtomicBool,
    bytes_written: AtomicU64,
    write_error: Mutex<Option<String>>,
}

impl RecordingShared {
    fn reason(&self) -> String {
        if let Some(e) = self.write_error.lock().as_ref() {
            return format!("sink write failed: {}", e);
        }
        if self.overflowed.load(Ordering::Acquire) {
            return "recording ring overflowed".into();
        }
        "unknown".into()
    }
}

/// Summary of a completed recording
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordingReport {
    pub format: PcmFormat,
    pub bytes_written: u64,
}

impl RecordingReport {
    pub fn frames(&self) -> u64 {
        self.bytes_written / self.format.frame_bytes().max(1) as u64
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// REALTIME TAP
// ═══════════════════════════════════════════════════════════════════════════════

/// Realtime half: converts and enqueues output blocks
pub struct RecordingTap {
    producer: Producer<u8>,
    format: PcmFormat,
    channels: usize,
    shrink: f64,
    resampler: Resampler,
    converted: Vec<f32>,
    encoded: Vec<u8>,
    shared: Arc<RecordingShared>,
}

impl RecordingTap {
    /// Convert one interleaved output block and enqueue it
    pub fn push(&mut self, block: &[f32]) {
        if self.shared.corrupt.load(Ordering::Relaxed) {
            return;
        }
        let frames = block.len() / self.channels.max(1);
        let needed = ((frames as f64 / self.shrink).ceil() as usize + 1) * self.channels;
        if self.converted.len() < needed {
            self.converted.resize(needed, 0.0);
        }

        let (written, _) = self
            .resampler
            .process(block, self.channels, self.shrink, &mut self.converted);
        self.encoded.clear();
        encode_into(
            &self.converted[..written * self.channels],
            self.channels,
            &self.format,
            &mut self.encoded,
        );

        match self.producer.write_chunk(self.encoded.len()) {
            Ok(mut chunk) => {
                let (first, second) = chunk.as_mut_slices();
                let split = first.len();
                first.copy_from_slice(&self.encoded[..split]);
                second.copy_from_slice(&self.encoded[split..]);
                chunk.commit_all();
            }
            Err(_) => {
                self.shared.overflowed.store(true, Ordering::Release);
                self.shared.corrupt.store(true, Ordering::Release);
            }
        }
    }

    #[inline]
    pub fn is_corrupt(&self) -> bool {
        self.shared.corrupt.load(Ordering::Relaxed)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// FLUSH THREAD
// ═══════════════════════════════════════════════════════════════════════════════

/// Control half: owns the flush thread
pub struct Recorder {
    format: PcmFormat,
    thread: Option<JoinHandle<()>>,
    running: Arc<AtomicBool>,
    shared: Arc<RecordingShared>,
}

impl Recorder {
    /// Start a recording of audio rendered at `source_rate` with
    /// `channels` interleaved channels. Rate, channel layout and sample
    /// encoding are converted to `format`.
    pub fn start(
        sink: Box<dyn RecordingSink>,
        format: PcmFormat,
        source_rate: u32,
        channels: u16,
        ring_seconds: f64,
    ) -> AudioResult<(Self, RecordingTap)> {
        format.validate()?;

        let ring_bytes = ((format.bytes_per_second() * ring_seconds.max(0.05)) as usize).max(format.frame_bytes());
        let (producer, consumer) = RingBuffer::new(ring_bytes);
        let shared = Arc::new(RecordingShared::default());
        let running = Arc::new(AtomicBool::new(true));

        let shrink = source_rate.max(1) as f64 / format.rate as f64;
        let block_samples = MAX_BLOCK_FRAMES * channels as usize;
        let encoded_frame_bytes = format.frame_bytes();
        let tap = RecordingTap {
            producer,
            format,
            channels: channels as usize,
            shrink,
            resampler: Resampler::new(0x7265_636f_7264),
            converted: vec![0.0; (block_samples as f64 / shrink).ceil() as usize + channels as usize],
            encoded: Vec::with_capacity(
                (MAX_BLOCK_FRAMES as f64 / shrink).ceil() as usize * encoded_frame_bytes + encoded_frame_bytes,
            ),
            shared: Arc::clone(&shared),
        };

        let thread_running = Arc::clone(&running);
        let thread_shared = Arc::clone(&shared);
        let thread = thread::Builder::new()
            .name("fl-recording-flush".into())
            .spawn(move || flush_loop(consumer, sink, thread_running, thread_shared))
            .map_err(|e| AudioError::Thread("recording flush", e))?;

        log::info!(
            "Recording started: {} Hz, {} ch, {}-bit",
            format.rate,
            format.channels,
            format.sample_width_bits
        );
        Ok((
            Self {
                format,
                thread: Some(thread),
                running,
                shared,
            },
            tap,
        ))
    }

    pub fn bytes_written(&self) -> u64 {
        self.shared.bytes_written.load(Ordering::Acquire)
    }

    pub fn is_corrupt(&self) -> bool {
        self.shared.corrupt.load(Ordering::Acquire)
    }

    /// Stop the flush thread after draining what is queued
    pub fn finish(mut self) -> AudioResult<RecordingReport> {
        self.stop();
        if self.is_corrupt() {
            let reason = self.shared.reason();
            log::error!("Recording corrupt: {}", reason);
            return Err(AudioError::RecordingCorrupt(reason));
        }
        let report = RecordingReport {
            format: self.format,
            bytes_written: self.bytes_written(),
        };
        log::info!("Recording finished: {} bytes", report.bytes_written);
        Ok(report)
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        self.stop();
    }
}

fn flush_loop(
    mut consumer: Consumer<u8>,
    mut sink: Box<dyn RecordingSink>,
    running: Arc<AtomicBool>,
    shared: Arc<RecordingShared>,
) {
    log::debug!("Recording flush thread started");
    loop {
        // Read `running` before draining so the final pass sees everything
        let keep_going = running.load(Ordering::Acquire);
        let available = consumer.slots();
        if available > 0 {
            if let Ok(chunk) = consumer.read_chunk(available) {
                let (first, second) = chunk.as_slices();
                if !shared.corrupt.load(Ordering::Acquire) {
                    let result = sink.write(first).and_then(|_| sink.write(second));
                    match result {
                        Ok(()) => {
                            shared.bytes_written.fetch_add(available as u64, Ordering::AcqRel);
                        }
                        Err(e) => {
                            log::error!("Recording sink write failed: {}", e);
                            *shared.write_error.lock() = Some(e.to_string());
                            shared.corrupt.store(true, Ordering::Release);
                        }
                    }
                }
                chunk.commit_all();
            }
        }
        if !keep_going {
            break;
        }
        thread::sleep(FLUSH_INTERVAL);
    }

    if let Err(e) = sink.flush() {
        log::error!("Recording sink flush failed: {}", e);
        if !shared.corrupt.swap(true, Ordering::AcqRel) {
            *shared.write_error.lock() = Some(e.to_string());
        }
    }
    log::debug!("Recording flush thread stopped");
}
