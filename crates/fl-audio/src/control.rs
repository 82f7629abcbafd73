//! Control message queue
//!
//! Single writer (control thread), single reader (realtime callback).
//! Messages travel through an rtrb ring; a pending counter lets the writer
//! confirm the reader has drained everything before issuing the next seek,
//! without the reader ever waiting on a lock.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use crossbeam_utils::Backoff;
use parking_lot::Mutex;
use rtrb::{Consumer, Producer, RingBuffer};

use fl_core::{ClipId, Direction};

use crate::{AudioError, AudioResult};

/// Default queue depth
pub const DEFAULT_CONTROL_CAPACITY: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ControlCommand {
    /// arg: clip id
    Open,
    /// arg: absolute byte offset
    Seek,
    /// arg: signed byte delta relative to the current position
    SeekAdjust,
    /// arg: +1 forward, -1 reverse
    SetDirection,
    Pause,
    Resume,
    /// Keep consuming audio but output silence
    Mute,
    Unmute,
    Close,
}

/// `{command, clip_id_or_offset}` shared by value between threads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlMessage {
    pub command: ControlCommand,
    pub arg: i64,
}

impl Default for ControlMessage {
    fn default() -> Self {
        Self::close()
    }
}

impl ControlMessage {
    pub fn open(clip: ClipId) -> Self {
        Self {
            command: ControlCommand::Open,
            arg: clip,
        }
    }

    pub fn seek(offset: i64) -> Self {
        Self {
            command: ControlCommand::Seek,
            arg: offset,
        }
    }

    pub fn seek_adjust(delta_bytes: i64) -> Self {
        Self {
            command: ControlCommand::SeekAdjust,
            arg: delta_bytes,
        }
    }

    pub fn set_direction(direction: Direction) -> Self {
        Self {
            command: ControlCommand::SetDirection,
            arg: direction.signum(),
        }
    }

    pub fn pause() -> Self {
        Self {
            command: ControlCommand::Pause,
            arg: 0,
        }
    }

    pub fn resume() -> Self {
        Self {
            command: ControlCommand::Resume,
            arg: 0,
        }
    }

    pub fn mute(muted: bool) -> Self {
        Self {
            command: if muted { ControlCommand::Mute } else { ControlCommand::Unmute },
            arg: 0,
        }
    }

    pub fn close() -> Self {
        Self {
            command: ControlCommand::Close,
            arg: 0,
        }
    }
}

#[derive(Debug, Default)]
struct QueueShared {
    /// Enqueued but not yet processed
    pending: AtomicUsize,
    /// Total processed by the reader
    processed: AtomicU64,
}

/// Create a connected sender/receiver pair
pub fn control_queue(capacity: usize) -> (ControlSender, ControlReceiver) {
    let (producer, consumer) = RingBuffer::new(capacity.max(1));
    let shared = Arc::new(QueueShared::default());
    (
        ControlSender {
            producer: Mutex::new(producer),
            shared: Arc::clone(&shared),
        },
        ControlReceiver { consumer, shared },
    )
}

// ═══════════════════════════════════════════════════════════════════════════════
// SENDER (control side)
// ═══════════════════════════════════════════════════════════════════════════════

pub struct ControlSender {
    producer: Mutex<Producer<ControlMessage>>,
    shared: Arc<QueueShared>,
}

impl ControlSender {
    /// Append a message; fails only if the ring is full
    pub fn send(&self, message: ControlMessage) -> AudioResult<()> {
        let mut producer = self.producer.lock();
        self.shared.pending.fetch_add(1, Ordering::AcqRel);
        if producer.push(message).is_err() {
            self.shared.pending.fetch_sub(1, Ordering::AcqRel);
            return Err(AudioError::BackendError(format!(
                "control queue full, dropped {:?}",
                message.command
            )));
        }
        Ok(())
    }

    /// Messages not yet processed by the callback
    #[inline]
    pub fn pending(&self) -> usize {
        self.shared.pending.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_drained(&self) -> bool {
        self.pending() == 0
    }

    /// Messages processed since the queue was created
    pub fn processed(&self) -> u64 {
        self.shared.processed.load(Ordering::Acquire)
    }

    /// Wait until the callback has processed everything, up to `timeout`.
    ///
    /// Returns `false` on timeout.
    pub fn wait_drained(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let backoff = Backoff::new();
        loop {
            if self.is_drained() {
                return true;
            }
            if Instant::now() >= deadline {
                return self.is_drained();
            }
            if backoff.is_completed() {
                std::thread::sleep(Duration::from_micros(200));
            } else {
                backoff.snooze();
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// RECEIVER (realtime side)
// ═══════════════════════════════════════════════════════════════════════════════

pub struct ControlReceiver {
    consumer: Consumer<ControlMessage>,
    shared: Arc<QueueShared>,
}

impl ControlReceiver {
    /// Next queued message. Call `ack` once it has been applied.
    #[inline]
    pub fn try_recv(&mut self) -> Option<ControlMessage> {
        self.consumer.pop().ok()
    }

    /// Mark one received message as processed
    #[inline]
    pub fn ack(&self) {
        self.shared.processed.fetch_add(1, Ordering::Relaxed);
        self.shared.pending.fetch_sub(1, Ordering::AcqRel);
    }

    /// Apply every queued message in order. Returns how many were handled.
    #[inline]
    pub fn drain(&mut self, mut handler: impl FnMut(ControlMessage)) -> usize {
        let mut handled = 0;
        while let Some(message) = self.try_recv() {
            handler(message);
            self.ack();
            handled += 1;
        }
        handled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_arrive_in_order() {
        let (tx, mut rx) = control_queue(8);
        tx.send(ControlMessage::open(4)).unwrap();
        tx.send(ControlMessage::seek(4096)).unwrap();
        tx.send(ControlMessage::close()).unwrap();
        assert_eq!(tx.pending(), 3);

        let mut seen = Vec::new();
        assert_eq!(rx.drain(|m| seen.push(m)), 3);
        assert_eq!(
            seen,
            vec![ControlMessage::open(4), ControlMessage::seek(4096), ControlMessage::close()]
        );
        assert!(tx.is_drained());
        assert_eq!(tx.processed(), 3);
    }

    #[test]
    fn test_full_queue_rejects() {
        let (tx, _rx) = control_queue(1);
        tx.send(ControlMessage::pause()).unwrap();
        assert!(tx.send(ControlMessage::resume()).is_err());
        assert_eq!(tx.pending(), 1);
    }

    #[test]
    fn test_wait_drained_times_out_without_reader() {
        let (tx, _rx) = control_queue(4);
        tx.send(ControlMessage::seek(0)).unwrap();
        let start = Instant::now();
        assert!(!tx.wait_drained(Duration::from_millis(20)));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_wait_drained_sees_reader() {
        let (tx, mut rx) = control_queue(4);
        tx.send(ControlMessage::seek(8)).unwrap();
        let reader = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(5));
            rx.drain(|_| {})
        });
        assert!(tx.wait_drained(Duration::from_secs(2)));
        assert_eq!(reader.join().unwrap(), 1);
    }
}
