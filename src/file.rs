//! Positioned byte access to an MXF file.
//!
//! [`MxfFile`] wraps any random-access store behind a single cursor
//! with tell/seek/read/write operations. KLV cursors and partitions
//! share one file through a [`FileRef`]; the access model is
//! single-threaded and cooperative, so the shared handle is an
//! `Rc<RefCell<..>>` rather than a lock.

use crate::error::{MxfError, Result};
use crate::ul::Ul;
use std::cell::RefCell;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::rc::Rc;

/// A byte offset into a file. Signed; `-1` is the unknown sentinel.
pub type Position = i64;

/// Reserved "unknown" position. Never valid as a seek target.
pub const UNKNOWN_POSITION: Position = -1;

/// Largest run-in permitted before the first partition pack.
pub const MAX_RUN_IN: u64 = 64 * 1024;

/// Random-access backing store for an MXF file.
pub trait RandomAccess: Read + Write + Seek {}

impl<T: Read + Write + Seek> RandomAccess for T {}

/// Shared handle to an open MXF file.
pub type FileRef = Rc<RefCell<MxfFile>>;

/// A positioned cursor over a random-access store.
pub struct MxfFile {
    inner: Box<dyn RandomAccess>,
    name: String,
    run_in: u64,
}

impl MxfFile {
    /// Wrap an arbitrary store.
    pub fn new(store: Box<dyn RandomAccess>, name: impl Into<String>) -> Self {
        MxfFile {
            inner: store,
            name: name.into(),
            run_in: 0,
        }
    }

    /// Open an existing file for reading (and in-place rewrite).
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let name = path.as_ref().display().to_string();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path.as_ref())
            .or_else(|_| File::open(path.as_ref()))?;
        Ok(MxfFile::new(Box::new(file), name))
    }

    /// Create (or truncate) a file for writing.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let name = path.as_ref().display().to_string();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Ok(MxfFile::new(Box::new(file), name))
    }

    /// Create an empty in-memory file.
    ///
    /// The returned [`SharedBuffer`] clone keeps the bytes inspectable
    /// after the file has been consumed.
    pub fn memory() -> (Self, SharedBuffer) {
        let buffer = SharedBuffer::new();
        let file = MxfFile::new(Box::new(buffer.clone()), "<memory>");
        (file, buffer)
    }

    /// Create an in-memory file seeded with `bytes`, positioned at 0.
    pub fn from_bytes(bytes: Vec<u8>) -> (Self, SharedBuffer) {
        let buffer = SharedBuffer::from_bytes(bytes);
        let file = MxfFile::new(Box::new(buffer.clone()), "<memory>");
        (file, buffer)
    }

    /// Move into a shared handle.
    pub fn shared(self) -> FileRef {
        Rc::new(RefCell::new(self))
    }

    /// Name of the backing store, for diagnostics.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Size of the run-in found by [`MxfFile::locate_run_in`].
    pub fn run_in(&self) -> u64 {
        self.run_in
    }

    /// Current position.
    pub fn tell(&mut self) -> Result<Position> {
        Ok(self.inner.stream_position()? as Position)
    }

    /// Seek to an absolute position. The unknown sentinel is rejected.
    pub fn seek(&mut self, position: Position) -> Result<()> {
        if position < 0 {
            return Err(MxfError::BadPosition(position));
        }
        self.inner.seek(SeekFrom::Start(position as u64))?;
        Ok(())
    }

    /// Read up to `count` bytes. A short read at end of file is not an
    /// error; the returned buffer holds the bytes actually read.
    pub fn read(&mut self, count: usize) -> Result<Vec<u8>> {
        let offset = self.tell()?;
        let mut buffer = vec![0u8; count];
        let mut filled = 0;
        while filled < count {
            match self.inner.read(&mut buffer[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    return Err(MxfError::ReadFailed {
                        offset: offset + filled as Position,
                        source: e,
                    })
                }
            }
        }
        buffer.truncate(filled);
        Ok(buffer)
    }

    /// Write all of `data` at the current position.
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        let offset = self.tell()?;
        self.inner
            .write_all(data)
            .map_err(|e| MxfError::WriteFailed { offset, source: e })
    }

    /// Total size of the store. Restores the current position.
    pub fn size(&mut self) -> Result<u64> {
        let position = self.inner.stream_position()?;
        let size = self.inner.seek(SeekFrom::End(0))?;
        self.inner.seek(SeekFrom::Start(position))?;
        Ok(size)
    }

    /// Check whether the cursor is at (or past) end of file.
    pub fn at_eof(&mut self) -> Result<bool> {
        Ok(self.tell()? as u64 >= self.size()?)
    }

    /// Find the first partition pack, tolerating a run-in of up to
    /// 64 KiB before it. Records the run-in size and leaves the cursor
    /// at the pack key.
    pub fn locate_run_in(&mut self) -> Result<u64> {
        self.seek(0)?;
        let window = self.read(MAX_RUN_IN as usize + 16)?;

        for start in 0..window.len().saturating_sub(15) {
            if start as u64 > MAX_RUN_IN {
                break;
            }
            if let Some(ul) = Ul::from_slice(&window[start..start + 16]) {
                if ul.is_partition_pack() {
                    self.run_in = start as u64;
                    self.seek(start as Position)?;
                    return Ok(self.run_in);
                }
            }
        }

        Err(MxfError::InvalidPartition(
            "no partition pack within the first 64 KiB".into(),
        ))
    }

    /// Scan forward from the current position for the next partition
    /// pack key. On success the cursor is left at the key and its
    /// offset returned; `None` means end of file was reached first.
    ///
    /// This is the recovery path after a structural decode failure.
    pub fn resync(&mut self) -> Result<Option<Position>> {
        const CHUNK: usize = 64 * 1024;
        let mut base = self.tell()?;

        loop {
            self.seek(base)?;
            let window = self.read(CHUNK + 15)?;
            if window.len() < 16 {
                return Ok(None);
            }

            for start in 0..window.len() - 15 {
                if let Some(ul) = Ul::from_slice(&window[start..start + 16]) {
                    if ul.is_partition_pack() {
                        let found = base + start as Position;
                        log::debug!("resynchronised to partition pack at {}", found);
                        self.seek(found)?;
                        return Ok(Some(found));
                    }
                }
            }

            base += CHUNK as Position;
        }
    }
}

impl Read for MxfFile {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.inner.read(buf)
    }
}

impl Write for MxfFile {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

impl Seek for MxfFile {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        self.inner.seek(pos)
    }
}

/// Growable in-memory store whose contents remain visible through any
/// clone. Each clone keeps its own cursor over the shared bytes.
#[derive(Clone, Default)]
pub struct SharedBuffer {
    data: Rc<RefCell<Vec<u8>>>,
    position: u64,
}

impl SharedBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a buffer seeded with `bytes`.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        SharedBuffer {
            data: Rc::new(RefCell::new(bytes)),
            position: 0,
        }
    }

    /// Snapshot of the current contents.
    pub fn contents(&self) -> Vec<u8> {
        self.data.borrow().clone()
    }

    /// Current length of the contents.
    pub fn len(&self) -> usize {
        self.data.borrow().len()
    }

    /// Check whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.data.borrow().is_empty()
    }
}

impl Read for SharedBuffer {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let data = self.data.borrow();
        let start = (self.position as usize).min(data.len());
        let count = buf.len().min(data.len() - start);
        buf[..count].copy_from_slice(&data[start..start + count]);
        drop(data);
        self.position += count as u64;
        Ok(count)
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut data = self.data.borrow_mut();
        let start = self.position as usize;
        if start > data.len() {
            data.resize(start, 0);
        }
        let overlap = buf.len().min(data.len().saturating_sub(start));
        data[start..start + overlap].copy_from_slice(&buf[..overlap]);
        data.extend_from_slice(&buf[overlap..]);
        drop(data);
        self.position += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Seek for SharedBuffer {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        let len = self.data.borrow().len() as i64;
        let target = match pos {
            SeekFrom::Start(offset) => offset as i64,
            SeekFrom::End(offset) => len + offset,
            SeekFrom::Current(offset) => self.position as i64 + offset,
        };
        if target < 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "seek before start",
            ));
        }
        self.position = target as u64;
        Ok(self.position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ul::labels;

    #[test]
    fn test_shared_buffer_roundtrip() {
        let (mut file, buffer) = MxfFile::memory();
        file.write(b"hello").unwrap();
        file.seek(0).unwrap();

        assert_eq!(file.read(5).unwrap(), b"hello");
        assert_eq!(buffer.contents(), b"hello");
    }

    #[test]
    fn test_short_read_at_eof() {
        let (mut file, _buffer) = MxfFile::from_bytes(vec![1, 2, 3]);
        assert_eq!(file.read(10).unwrap(), vec![1, 2, 3]);
        assert_eq!(file.read(10).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_seek_rejects_sentinel() {
        let (mut file, _buffer) = MxfFile::memory();
        assert!(matches!(
            file.seek(UNKNOWN_POSITION),
            Err(MxfError::BadPosition(-1))
        ));
    }

    #[test]
    fn test_tell_and_size() {
        let (mut file, _buffer) = MxfFile::from_bytes(vec![0; 100]);
        file.seek(40).unwrap();
        assert_eq!(file.tell().unwrap(), 40);
        assert_eq!(file.size().unwrap(), 100);
        assert_eq!(file.tell().unwrap(), 40);
        assert!(!file.at_eof().unwrap());

        file.seek(100).unwrap();
        assert!(file.at_eof().unwrap());
    }

    #[test]
    fn test_locate_run_in() {
        let mut bytes = vec![0x55u8; 300];
        bytes.extend_from_slice(labels::HEADER_PARTITION_CLOSED_COMPLETE.as_bytes());
        bytes.extend_from_slice(&[0u8; 8]);

        let (mut file, _buffer) = MxfFile::from_bytes(bytes);
        assert_eq!(file.locate_run_in().unwrap(), 300);
        assert_eq!(file.tell().unwrap(), 300);
    }

    #[test]
    fn test_locate_run_in_missing() {
        let (mut file, _buffer) = MxfFile::from_bytes(vec![0u8; 128]);
        assert!(file.locate_run_in().is_err());
    }

    #[test]
    fn test_resync() {
        let mut bytes = vec![0xaau8; 1000];
        bytes.extend_from_slice(labels::BODY_PARTITION_CLOSED_COMPLETE.as_bytes());

        let (mut file, _buffer) = MxfFile::from_bytes(bytes);
        file.seek(10).unwrap();
        assert_eq!(file.resync().unwrap(), Some(1000));

        file.seek(1001).unwrap();
        assert_eq!(file.resync().unwrap(), None);
    }
}
