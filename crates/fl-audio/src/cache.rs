//! Cache buffer pool
//!
//! Fixed arena of decoded audio buffers shared by the realtime callback and
//! the filler thread. Ownership of a slot moves between the two sides
//! through a pair of SPSC index rings:
//!
//! ```text
//!   RT (CacheRequester)                 Filler (CacheFillerEnd)
//!   ───────────────────                 ──────────────────────
//!   free stack ──issue──► request ring ──► next_request
//!                                              │ fill
//!   take_ready ◄──────── ready ring ◄──── publish (ready = true)
//!       │ consume
//!   release (ready = false) ──► free stack
//! ```
//!
//! A slot is in exactly one place at a time, so the data mutex is never
//! contended in steady state. The callback still only ever `try_lock`s it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use fl_core::{ClipId, NO_CLIP};
use parking_lot::Mutex;
use rtrb::{Consumer, Producer, RingBuffer};

use crate::PcmFormat;

/// Output samples are always f32
pub const OUTPUT_SAMPLE_WIDTH: u16 = 32;

// ═══════════════════════════════════════════════════════════════════════════════
// CACHE BUFFER
// ═══════════════════════════════════════════════════════════════════════════════

/// One chunk of decoded clip audio
#[derive(Debug)]
pub struct CacheBuffer {
    pub clip_id: ClipId,
    /// Byte offset where playback of this chunk starts: the lower end of
    /// the range when playing forward, the upper end when reversed
    pub seek_offset: i64,
    /// Bytes requested
    pub byte_size: usize,
    /// Frames actually decoded into `payload`
    pub sample_count: usize,
    pub in_channels: u16,
    pub out_channels: u16,
    pub in_sample_width: u16,
    pub out_sample_width: u16,
    /// Signed input/output rate ratio; negative means reverse playback
    pub shrink_factor: f64,
    pub swap_sign: bool,
    pub swap_endian: bool,
    /// The read came back short
    pub eof: bool,
    /// Last chunk before the audio ends (no looping)
    pub final_segment: bool,
    /// Request generation; stale buffers are dropped on arrival
    pub epoch: u32,
    /// Interleaved f32 at `out_channels`, input sample rate
    pub payload: Vec<f32>,
    /// Raw read scratch
    pub(crate) raw: Vec<u8>,
}

impl CacheBuffer {
    fn with_capacity(frames: usize, input: &PcmFormat, out_channels: u16) -> Self {
        Self {
            clip_id: NO_CLIP,
            seek_offset: 0,
            byte_size: 0,
            sample_count: 0,
            in_channels: input.channels,
            out_channels,
            in_sample_width: input.sample_width_bits,
            out_sample_width: OUTPUT_SAMPLE_WIDTH,
            shrink_factor: 1.0,
            swap_sign: input.needs_sign_swap(),
            swap_endian: input.needs_endian_swap(),
            eof: false,
            final_segment: false,
            epoch: 0,
            payload: Vec::with_capacity(frames * out_channels as usize),
            raw: Vec::with_capacity(frames * input.frame_bytes()),
        }
    }

    #[inline]
    pub fn is_reverse(&self) -> bool {
        self.shrink_factor < 0.0
    }

    /// `(start, len)` of the requested bytes in file order
    #[inline]
    pub fn read_range(&self) -> (i64, usize) {
        if self.is_reverse() {
            (self.seek_offset - self.byte_size as i64, self.byte_size)
        } else {
            (self.seek_offset, self.byte_size)
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// POOL
// ═══════════════════════════════════════════════════════════════════════════════

pub struct CacheSlot {
    ready: AtomicBool,
    buffer: Mutex<CacheBuffer>,
}

impl CacheSlot {
    /// Filled and not yet released by the consumer
    #[inline]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Non-blocking access (realtime side)
    #[inline]
    pub fn try_buffer(&self) -> Option<parking_lot::MutexGuard<'_, CacheBuffer>> {
        self.buffer.try_lock()
    }

    /// Blocking access (filler side)
    #[inline]
    pub fn buffer(&self) -> parking_lot::MutexGuard<'_, CacheBuffer> {
        self.buffer.lock()
    }
}

pub struct CachePool {
    slots: Box<[CacheSlot]>,
    frames_per_buffer: usize,
}

impl CachePool {
    /// Allocate `capacity` buffers of `frames_per_buffer` input frames each
    /// and return the two endpoints.
    pub fn create(
        capacity: usize,
        frames_per_buffer: usize,
        input: &PcmFormat,
        out_channels: u16,
    ) -> (CacheRequester, CacheFillerEnd) {
        let capacity = capacity.max(1);
        let frames_per_buffer = frames_per_buffer.max(1);
        let slots = (0..capacity)
            .map(|_| CacheSlot {
                ready: AtomicBool::new(false),
                buffer: Mutex::new(CacheBuffer::with_capacity(frames_per_buffer, input, out_channels)),
            })
            .collect();
        let pool = Arc::new(Self {
            slots,
            frames_per_buffer,
        });

        let (request_tx, request_rx) = RingBuffer::new(capacity);
        let (ready_tx, ready_rx) = RingBuffer::new(capacity);
        // Pop order 0, 1, 2...
        let free = (0..capacity).rev().collect();

        (
            CacheRequester {
                pool: Arc::clone(&pool),
                requests: request_tx,
                ready: ready_rx,
                free,
            },
            CacheFillerEnd {
                pool,
                requests: request_rx,
                ready: ready_tx,
            },
        )
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn frames_per_buffer(&self) -> usize {
        self.frames_per_buffer
    }

    #[inline]
    pub fn slot(&self, index: usize) -> &CacheSlot {
        &self.slots[index]
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// REALTIME END
// ═══════════════════════════════════════════════════════════════════════════════

/// Consumer side: issues requests and takes filled buffers
pub struct CacheRequester {
    pool: Arc<CachePool>,
    requests: Producer<usize>,
    ready: Consumer<usize>,
    /// Slots owned by this side and idle; capacity fixed at creation
    free: Vec<usize>,
}

impl CacheRequester {
    #[inline]
    pub fn pool(&self) -> &CachePool {
        &self.pool
    }

    #[inline]
    pub fn slot(&self, index: usize) -> &CacheSlot {
        self.pool.slot(index)
    }

    /// Take an idle slot to describe a new request in
    #[inline]
    pub fn free_slot(&mut self) -> Option<usize> {
        self.free.pop()
    }

    /// Give back a slot taken with `free_slot` but not issued
    #[inline]
    pub fn return_slot(&mut self, index: usize) {
        self.free.push(index);
    }

    /// Hand a described slot to the filler
    #[inline]
    pub fn issue(&mut self, index: usize) -> bool {
        if self.requests.push(index).is_err() {
            self.free.push(index);
            return false;
        }
        true
    }

    /// Next filled buffer, in request order
    #[inline]
    pub fn take_ready(&mut self) -> Option<usize> {
        let index = self.ready.pop().ok()?;
        // Published with Release before the index was pushed
        debug_assert!(self.pool.slot(index).is_ready());
        Some(index)
    }

    /// Done with a buffer; the slot becomes free for the next request
    #[inline]
    pub fn release(&mut self, index: usize) {
        self.pool.slot(index).ready.store(false, Ordering::Release);
        self.free.push(index);
    }

    /// Slots currently requested or filled but not yet released
    #[inline]
    pub fn outstanding(&self) -> usize {
        self.pool.capacity() - self.free.len()
    }

    #[inline]
    pub fn has_free(&self) -> bool {
        !self.free.is_empty()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// FILLER END
// ═══════════════════════════════════════════════════════════════════════════════

/// Producer side: receives requests and publishes filled buffers
pub struct CacheFillerEnd {
    pool: Arc<CachePool>,
    requests: Consumer<usize>,
    ready: Producer<usize>,
}

impl CacheFillerEnd {
    #[inline]
    pub fn pool(&self) -> &CachePool {
        &self.pool
    }

    #[inline]
    pub fn shared_pool(&self) -> Arc<CachePool> {
        Arc::clone(&self.pool)
    }

    /// Next slot needing a fill, if the consumer has released and reissued one
    #[inline]
    pub fn next_request(&mut self) -> Option<usize> {
        self.requests.pop().ok()
    }

    /// Mark a slot filled and hand it to the consumer
    pub fn publish(&mut self, index: usize) {
        self.pool.slot(index).ready.store(true, Ordering::Release);
        if self.ready.push(index).is_err() {
            // Ring holds every slot; a full ring means the index was published twice
            log::error!("cache slot {} published while the ready ring is full", index);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(capacity: usize) -> (CacheRequester, CacheFillerEnd) {
        CachePool::create(capacity, 64, &PcmFormat::s16le(48000, 2), 2)
    }

    #[test]
    fn test_slot_cycle_with_four_buffers() {
        let (mut rt, mut filler) = pool(4);

        for expected in 0..4 {
            let index = rt.free_slot().unwrap();
            assert_eq!(index, expected);
            assert!(rt.issue(index));
        }
        assert!(rt.free_slot().is_none());

        for expected in 0..4 {
            let index = filler.next_request().unwrap();
            assert_eq!(index, expected);
            filler.publish(index);
        }
        // Everything filled, nothing released: filler has no work
        assert!(filler.next_request().is_none());
        assert_eq!(rt.outstanding(), 4);

        let first = rt.take_ready().unwrap();
        assert_eq!(first, 0);
        assert!(rt.slot(first).is_ready());
        rt.release(first);
        assert!(!rt.slot(first).is_ready());

        let index = rt.free_slot().unwrap();
        assert_eq!(index, 0);
        rt.issue(index);
        assert_eq!(filler.next_request(), Some(0));
        assert!(!filler.pool().slot(0).is_ready());
    }

    #[test]
    fn test_ready_order_is_request_order() {
        let (mut rt, mut filler) = pool(3);
        for _ in 0..3 {
            let i = rt.free_slot().unwrap();
            rt.issue(i);
        }
        let a = filler.next_request().unwrap();
        let b = filler.next_request().unwrap();
        filler.publish(a);
        filler.publish(b);
        assert_eq!(rt.take_ready(), Some(a));
        assert_eq!(rt.take_ready(), Some(b));
        assert_eq!(rt.take_ready(), None);
    }

    #[test]
    fn test_reverse_read_range() {
        let (rt, _filler) = pool(1);
        let mut buf = rt.slot(0).try_buffer().unwrap();
        buf.seek_offset = 4096;
        buf.byte_size = 1024;
        buf.shrink_factor = -1.0;
        assert_eq!(buf.read_range(), (3072, 1024));
        buf.shrink_factor = 1.0;
        assert_eq!(buf.read_range(), (4096, 1024));
    }
}
