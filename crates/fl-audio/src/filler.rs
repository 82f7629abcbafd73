//! Cache filler thread
//!
//! Services cache requests off the realtime thread: opens the clip's audio
//! through a `ClipStore`, reads the requested byte range and decodes it to
//! f32 at the output channel count. Short reads mark the buffer `eof`;
//! open failures produce empty `eof` buffers so the callback plays silence
//! instead of stalling.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use fl_core::{ClipId, NO_CLIP};

use crate::cache::{CacheBuffer, CacheFillerEnd};
use crate::convert::decode_into;
use crate::source::{ClipAudioSource, ClipStore};
use crate::{AudioError, AudioResult, AudioStreamDescriptor};

/// Idle wait between request polls
pub const DEFAULT_FILLER_POLL: Duration = Duration::from_millis(1);

/// Result of filling one buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillStatus {
    /// Every requested frame was decoded
    Full,
    /// Source ended early; `frames` decoded
    Short { frames: usize },
    /// Read failed outright
    Failed,
}

/// Read and decode `requested_frames` for the range described in `buffer`
/// (`clip_id`, `seek_offset`, `shrink_factor`). Overwrites the fill results
/// (`byte_size`, `sample_count`, `eof`, `payload`).
pub fn fill(
    buffer: &mut CacheBuffer,
    source: &mut dyn ClipAudioSource,
    descriptor: &AudioStreamDescriptor,
    requested_frames: usize,
) -> FillStatus {
    let input = descriptor.input();
    let frame_bytes = input.frame_bytes();
    buffer.byte_size = requested_frames * frame_bytes;
    buffer.eof = false;
    let (start, len) = buffer.read_range();

    buffer.raw.clear();
    buffer.raw.resize(len, 0);
    let read = if start < 0 {
        Ok(0)
    } else {
        source.read_at(start as u64, &mut buffer.raw[..len])
    };

    let status = match read {
        Ok(n) if n >= len => FillStatus::Full,
        Ok(n) => {
            buffer.eof = true;
            FillStatus::Short { frames: n / frame_bytes.max(1) }
        }
        Err(e) => {
            log::warn!("Clip {} read at {} failed: {}", buffer.clip_id, start, e);
            buffer.eof = true;
            buffer.raw.clear();
            FillStatus::Failed
        }
    };

    let usable = match status {
        FillStatus::Full => len,
        FillStatus::Short { frames } => frames * frame_bytes,
        FillStatus::Failed => 0,
    };
    buffer.sample_count = decode_into(
        &buffer.raw[..usable],
        input,
        buffer.swap_sign,
        buffer.swap_endian,
        buffer.out_channels as usize,
        &mut buffer.payload,
    );
    status
}

// ═══════════════════════════════════════════════════════════════════════════════
// FILLER THREAD
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy)]
enum FillerCommand {
    Shutdown,
}

/// Counters readable from the control thread
#[derive(Debug, Default)]
pub struct FillerStats {
    pub buffers_filled: AtomicU64,
    pub short_reads: AtomicU64,
    pub open_failures: AtomicU64,
}

pub struct CacheFiller {
    thread: Option<JoinHandle<()>>,
    commands: Sender<FillerCommand>,
    running: Arc<AtomicBool>,
    stats: Arc<FillerStats>,
}

impl CacheFiller {
    pub fn spawn(
        end: CacheFillerEnd,
        store: Arc<dyn ClipStore>,
        descriptor: Arc<AudioStreamDescriptor>,
        poll: Duration,
    ) -> AudioResult<Self> {
        let (commands, command_rx) = bounded(4);
        let running = Arc::new(AtomicBool::new(true));
        let stats = Arc::new(FillerStats::default());

        let worker = FillerWorker {
            end,
            store,
            descriptor,
            stats: Arc::clone(&stats),
            open: None,
            failed_clip: NO_CLIP,
        };
        let thread_running = Arc::clone(&running);
        let thread = thread::Builder::new()
            .name("fl-cache-filler".into())
            .spawn(move || worker.run(command_rx, thread_running, poll))
            .map_err(|e| AudioError::Thread("cache filler", e))?;

        log::info!("Cache filler started");
        Ok(Self {
            thread: Some(thread),
            commands,
            running,
            stats,
        })
    }

    #[inline]
    pub fn stats(&self) -> &FillerStats {
        &self.stats
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    pub fn shutdown(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        let _ = self.commands.try_send(FillerCommand::Shutdown);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for CacheFiller {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct FillerWorker {
    end: CacheFillerEnd,
    store: Arc<dyn ClipStore>,
    descriptor: Arc<AudioStreamDescriptor>,
    stats: Arc<FillerStats>,
    open: Option<(ClipId, Box<dyn ClipAudioSource>)>,
    /// Last clip whose open failed; logged once
    failed_clip: ClipId,
}

impl FillerWorker {
    fn run(mut self, commands: Receiver<FillerCommand>, running: Arc<AtomicBool>, poll: Duration) {
        while running.load(Ordering::Relaxed) {
            match self.end.next_request() {
                Some(index) => self.service(index),
                None => match commands.recv_timeout(poll) {
                    Ok(FillerCommand::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
                    Err(RecvTimeoutError::Timeout) => {}
                },
            }
        }
        log::info!("Cache filler exiting");
    }

    fn service(&mut self, index: usize) {
        let pool = self.end.shared_pool();
        let descriptor = Arc::clone(&self.descriptor);
        let slot = pool.slot(index);
        if slot.is_ready() {
            log::error!("Cache slot {} requested while still holding data", index);
            return;
        }

        {
            let mut buffer = slot.buffer();
            let frame_bytes = descriptor.input().frame_bytes().max(1);
            let requested_frames = buffer.byte_size / frame_bytes;

            match self.source_for(buffer.clip_id) {
                Some(source) => match fill(&mut buffer, source, &descriptor, requested_frames) {
                    FillStatus::Full => {}
                    FillStatus::Short { frames } => {
                        self.stats.short_reads.fetch_add(1, Ordering::Relaxed);
                        if !buffer.final_segment {
                            log::warn!(
                                "Short read on clip {} at {}: {} of {} frames",
                                buffer.clip_id,
                                buffer.seek_offset,
                                frames,
                                requested_frames
                            );
                        }
                    }
                    FillStatus::Failed => {
                        self.stats.short_reads.fetch_add(1, Ordering::Relaxed);
                    }
                },
                None => {
                    buffer.sample_count = 0;
                    buffer.payload.clear();
                    buffer.eof = true;
                }
            }
        }

        self.stats.buffers_filled.fetch_add(1, Ordering::Relaxed);
        self.end.publish(index);
    }

    /// Open (or reuse) the source for `clip`
    fn source_for(&mut self, clip: ClipId) -> Option<&mut dyn ClipAudioSource> {
        let cached = matches!(&self.open, Some((id, _)) if *id == clip);
        if !cached {
            self.open = None;
            match self.store.open(clip) {
                Ok(source) => {
                    log::debug!("Opened audio for clip {} ({} bytes)", clip, source.len());
                    self.failed_clip = NO_CLIP;
                    self.open = Some((clip, source));
                }
                Err(e) => {
                    self.stats.open_failures.fetch_add(1, Ordering::Relaxed);
                    if self.failed_clip != clip {
                        log::error!("Cannot open audio for clip {}: {}", clip, e);
                        self.failed_clip = clip;
                    }
                    return None;
                }
            }
        }
        self.open.as_mut().map(|(_, source)| source.as_mut() as &mut dyn ClipAudioSource)
    }
}
