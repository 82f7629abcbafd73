//! Collaborator interfaces: clip audio stores, live generators, recording sinks

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;

use fl_core::ClipId;

// ═══════════════════════════════════════════════════════════════════════════════
// CLIP AUDIO
// ═══════════════════════════════════════════════════════════════════════════════

/// Raw PCM bytes of one clip
pub trait ClipAudioSource: Send {
    /// Read up to `buf.len()` bytes starting at `offset`. A short count means
    /// the source ended (or hit a hole) before the requested range did.
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<usize>;

    /// Total length in bytes
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Opens clip audio by id (called from the filler thread only)
pub trait ClipStore: Send + Sync {
    fn open(&self, clip: ClipId) -> io::Result<Box<dyn ClipAudioSource>>;
}

/// Headerless PCM file on disk
pub struct FileAudioSource {
    file: File,
    len: u64,
}

impl FileAudioSource {
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = File::open(path.as_ref())?;
        let len = file.metadata()?.len();
        Ok(Self { file, len })
    }
}

impl ClipAudioSource for FileAudioSource {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        self.file.seek(SeekFrom::Start(offset))?;
        let mut filled = 0;
        while filled < buf.len() {
            match self.file.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(filled)
    }

    fn len(&self) -> u64 {
        self.len
    }
}

/// In-memory PCM (generated material, tests)
#[derive(Clone)]
pub struct MemoryAudioSource {
    data: Arc<Vec<u8>>,
}

impl MemoryAudioSource {
    pub fn new(data: Arc<Vec<u8>>) -> Self {
        Self { data }
    }
}

impl ClipAudioSource for MemoryAudioSource {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let start = (offset as usize).min(self.data.len());
        let n = buf.len().min(self.data.len() - start);
        buf[..n].copy_from_slice(&self.data[start..start + n]);
        Ok(n)
    }

    fn len(&self) -> u64 {
        self.data.len() as u64
    }
}

/// Clip id → file path
#[derive(Default)]
pub struct FileClipStore {
    paths: RwLock<HashMap<ClipId, PathBuf>>,
}

impl FileClipStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, clip: ClipId, path: impl Into<PathBuf>) {
        self.paths.write().insert(clip, path.into());
    }
}

impl ClipStore for FileClipStore {
    fn open(&self, clip: ClipId) -> io::Result<Box<dyn ClipAudioSource>> {
        let path = self.paths.read().get(&clip).cloned().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("clip {} has no audio file", clip))
        })?;
        Ok(Box::new(FileAudioSource::open(path)?))
    }
}

/// Clip id → shared byte buffer
#[derive(Default)]
pub struct MemoryClipStore {
    clips: RwLock<HashMap<ClipId, Arc<Vec<u8>>>>,
}

impl MemoryClipStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, clip: ClipId, data: Vec<u8>) {
        self.clips.write().insert(clip, Arc::new(data));
    }
}

impl ClipStore for MemoryClipStore {
    fn open(&self, clip: ClipId) -> io::Result<Box<dyn ClipAudioSource>> {
        let data = self.clips.read().get(&clip).cloned().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("clip {} not in memory store", clip))
        })?;
        Ok(Box::new(MemoryAudioSource::new(data)))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// LIVE GENERATOR / RECORDING SINK
// ═══════════════════════════════════════════════════════════════════════════════

/// Synchronous audio generator pulled from the realtime callback.
///
/// Implementations must be non-blocking and allocation-free.
pub trait LiveGenerator: Send {
    /// Fill `out` (interleaved, `channels` wide, `frames` long) at the device
    /// rate. Returning `false` means "nothing this time" and the callback
    /// falls back to the cache.
    fn pull(&mut self, out: &mut [f32], frames: usize, channels: usize) -> bool;
}

/// Destination for recorded audio; written from the recorder thread
pub trait RecordingSink: Send {
    fn write(&mut self, bytes: &[u8]) -> io::Result<()>;

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<W: Write + Send> RecordingSink for io::BufWriter<W> {
    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.write_all(bytes)
    }

    fn flush(&mut self) -> io::Result<()> {
        Write::flush(self)
    }
}

/// Collects recorded bytes in memory
#[derive(Clone, Default)]
pub struct MemorySink {
    bytes: Arc<parking_lot::Mutex<Vec<u8>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> Vec<u8> {
        self.bytes.lock().clone()
    }
}

impl RecordingSink for MemorySink {
    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.bytes.lock().extend_from_slice(bytes);
        Ok(())
    }
}
