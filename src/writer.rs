//! Single-threaded synchronous writer
//!
//! [`SerialWriter`] shares the block, frame, and blob machinery with the
//! parallel path but compresses inline on the calling thread: each block is
//! deflated and written the moment it fills, so blocks are always written in
//! submission order and no waiting is ever needed. This is the zero-thread
//! mode of [`BgzfFactory`](crate::BgzfFactory).

use std::collections::{BTreeMap, VecDeque};
use std::io::Write;
use std::path::PathBuf;

use crate::blob::{resolve_ready, Blob};
use crate::block::{Block, BlockStatus};
use crate::deflate::{BlockDeflater, MAX_COMPRESSION_LEVEL};
use crate::error::{Result, WriteError};
use crate::frame::{check_termination, write_frame, EOF_BLOCK};
use crate::offset::VirtualOffset;

pub struct SerialWriter<W: Write> {
    sink: Option<W>,
    /// When set, the finished file is re-opened after close to verify the
    /// terminator block
    path: Option<PathBuf>,
    deflater: BlockDeflater,
    current: Block,
    /// On-disk offset of the next frame; never includes the terminator
    cursor: u64,
    /// Blocks with smaller ids have been written
    next_write_id: u64,
    blobs: VecDeque<Blob>,
    /// Start offsets of written blocks still referenced by pending blobs
    starts: BTreeMap<u64, u64>,
    poisoned: bool,
    closed: bool,
}

impl<W: Write> SerialWriter<W> {
    pub fn new(sink: W, level: u32) -> Result<Self> {
        if level > MAX_COMPRESSION_LEVEL {
            return Err(WriteError::InvalidCompressionLevel(level).into());
        }
        Ok(Self {
            sink: Some(sink),
            path: None,
            deflater: BlockDeflater::new(level),
            current: Block::new(0),
            cursor: 0,
            next_write_id: 0,
            blobs: VecDeque::new(),
            starts: BTreeMap::new(),
            poisoned: false,
            closed: false,
        })
    }

    /// Enables the close-time terminator verification against `path`
    #[must_use]
    pub fn with_termination_check(mut self, path: PathBuf) -> Self {
        self.path = Some(path);
        self
    }

    /// Appends `buf` to the uncompressed stream, compressing and writing
    /// each block as it fills.
    pub fn write(&mut self, buf: &[u8]) -> Result<()> {
        self.check()?;
        let mut rem = buf;
        while !rem.is_empty() {
            let n = self.current.fill(rem);
            rem = &rem[n..];
            if self.current.status() == BlockStatus::Full {
                self.commit_current()?;
            }
        }
        Ok(())
    }

    /// Writes out the current partial block, if any, and flushes the sink.
    pub fn flush(&mut self) -> Result<()> {
        self.check()?;
        if !self.current.is_empty() {
            self.commit_current()?;
        }
        let result = match self.sink.as_mut() {
            Some(sink) => sink.flush(),
            None => return Err(WriteError::Poisoned.into()),
        };
        result.map_err(|e| self.poison(e.into()))
    }

    /// Finishes the stream: writes the final partial block, the terminator,
    /// flushes and drops the sink, and verifies the terminator on disk when
    /// a path was given. Calling close again is a no-op.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        if self.poisoned {
            return Err(WriteError::Poisoned.into());
        }
        self.finish().map_err(|e| self.poison(e))
    }

    fn finish(&mut self) -> Result<()> {
        if !self.current.is_empty() {
            self.commit_current()?;
        }
        // Blobs ending in the empty current block resolve against the
        // position the block would occupy
        if !self.blobs.is_empty() {
            self.starts.insert(self.current.id(), self.cursor);
            resolve_ready(&mut self.blobs, &mut self.starts, self.current.id() + 1);
        }
        let sink = self.sink.as_mut().ok_or(WriteError::Poisoned)?;
        sink.write_all(&EOF_BLOCK)?;
        sink.flush()?;
        self.sink = None;
        if let Some(path) = &self.path {
            check_termination(path)?;
        }
        Ok(())
    }

    /// The virtual offset of the next byte to be written
    pub fn position(&self) -> Result<VirtualOffset> {
        if self.poisoned {
            return Err(WriteError::Poisoned.into());
        }
        Ok(VirtualOffset::new(self.cursor, self.current.len() as u16))
    }

    /// Opens a span at the current position; `callback` receives the span's
    /// final virtual offsets once both of its boundary blocks are written.
    pub fn start_blob<F>(&mut self, callback: F) -> Result<()>
    where
        F: FnOnce(VirtualOffset, VirtualOffset) + Send + 'static,
    {
        self.check()?;
        self.blobs.push_back(Blob::new(
            self.current.id(),
            self.current.len() as u16,
            Box::new(callback),
        ));
        Ok(())
    }

    /// Closes the most recently opened span at the current position.
    pub fn end_blob(&mut self) -> Result<()> {
        self.check()?;
        match self.blobs.back_mut() {
            Some(blob) if !blob.is_closed() => {
                blob.close(self.current.id(), self.current.len() as u16);
                Ok(())
            }
            _ => Err(WriteError::NoOpenBlob.into()),
        }
    }

    fn check(&self) -> Result<()> {
        if self.poisoned {
            return Err(WriteError::Poisoned.into());
        }
        if self.closed {
            return Err(WriteError::Closed.into());
        }
        Ok(())
    }

    fn poison(&mut self, cause: crate::Error) -> crate::Error {
        self.poisoned = true;
        self.sink = None;
        cause
    }

    /// Swaps in a fresh block and takes the old one through the whole
    /// pipeline inline: deflate, frame, blob resolution.
    fn commit_current(&mut self) -> Result<()> {
        let next = Block::new(self.current.id() + 1);
        let block = std::mem::replace(&mut self.current, next);
        self.commit(block).map_err(|e| self.poison(e))
    }

    fn commit(&mut self, mut block: Block) -> Result<()> {
        block.set_status(BlockStatus::Submitted);
        block.set_status(BlockStatus::Deflating);
        self.deflater.deflate_block(&mut block)?;
        block.set_status(BlockStatus::Deflated);

        let sink = self.sink.as_mut().ok_or(WriteError::Poisoned)?;
        let total = write_frame(sink, &block)?;
        block.set_block_start(self.cursor);
        block.set_status(BlockStatus::Written);

        if !self.blobs.is_empty() {
            self.starts.insert(block.id(), self.cursor);
        }
        self.cursor += total as u64;
        self.next_write_id = block.id() + 1;
        resolve_ready(&mut self.blobs, &mut self.starts, self.next_write_id);
        Ok(())
    }
}

impl<W: Write> Drop for SerialWriter<W> {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::UNCOMPRESSED_BLOCK_SIZE;
    use crate::deflate::DEFAULT_COMPRESSION_LEVEL;
    use parking_lot::Mutex;
    use std::io::Read;
    use std::sync::Arc;

    /// A sink whose bytes outlive the writer
    #[derive(Clone, Default)]
    struct SharedVec(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedVec {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl SharedVec {
        fn bytes(&self) -> Vec<u8> {
            self.0.lock().clone()
        }
    }

    /// Fails with a broken-pipe error after `limit` bytes
    struct FailingSink {
        written: usize,
        limit: usize,
    }

    impl Write for FailingSink {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if self.written + buf.len() > self.limit {
                return Err(std::io::Error::from(std::io::ErrorKind::BrokenPipe));
            }
            self.written += buf.len();
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn inflate_all(compressed: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        flate2::read::MultiGzDecoder::new(compressed)
            .read_to_end(&mut out)
            .unwrap();
        out
    }

    #[test]
    fn test_roundtrip_multiple_blocks() -> crate::Result<()> {
        let sink = SharedVec::default();
        let mut writer = SerialWriter::new(sink.clone(), DEFAULT_COMPRESSION_LEVEL)?;

        let payload = b"serial block-compressed payload ".repeat(5000);
        writer.write(&payload)?;
        writer.close()?;

        let bytes = sink.bytes();
        assert!(bytes.ends_with(&EOF_BLOCK));
        assert_eq!(inflate_all(&bytes), payload);
        Ok(())
    }

    #[test]
    fn test_position_tracks_block_boundaries() -> crate::Result<()> {
        let sink = SharedVec::default();
        let mut writer = SerialWriter::new(sink.clone(), DEFAULT_COMPRESSION_LEVEL)?;
        assert_eq!(writer.position()?, VirtualOffset::new(0, 0));

        // One full block plus 4720 trailing bytes
        writer.write(&vec![0x42u8; UNCOMPRESSED_BLOCK_SIZE + 4720])?;

        let pos = writer.position()?;
        // The first frame has been written, so its length is the block start
        let first_frame_len = sink.bytes().len() as u64;
        assert_eq!(pos.block_start(), first_frame_len);
        assert_eq!(pos.intra_offset(), 4720);

        writer.close()?;
        Ok(())
    }

    #[test]
    fn test_blob_spanning_blocks() -> crate::Result<()> {
        let sink = SharedVec::default();
        let mut writer = SerialWriter::new(sink.clone(), DEFAULT_COMPRESSION_LEVEL)?;

        writer.write(b"hello")?;
        let fired = Arc::new(Mutex::new(Vec::new()));
        {
            let fired = Arc::clone(&fired);
            writer.start_blob(move |start, end| fired.lock().push((start, end)))?;
        }
        // Crosses into the second block
        writer.write(&vec![0u8; UNCOMPRESSED_BLOCK_SIZE])?;
        writer.end_blob()?;
        writer.close()?;

        let spans = fired.lock();
        assert_eq!(spans.len(), 1);
        let (start, end) = spans[0];
        assert_eq!(start, VirtualOffset::new(0, 5));
        assert_eq!(end.intra_offset(), 5);
        assert!(start < end);
        assert!(end.block_start() > 0);
        Ok(())
    }

    #[test]
    fn test_end_blob_without_open() -> crate::Result<()> {
        let mut writer = SerialWriter::new(SharedVec::default(), DEFAULT_COMPRESSION_LEVEL)?;
        assert!(matches!(
            writer.end_blob(),
            Err(crate::Error::WriteError(WriteError::NoOpenBlob))
        ));
        Ok(())
    }

    #[test]
    fn test_sink_failure_poisons_stream() -> crate::Result<()> {
        let sink = FailingSink {
            written: 0,
            limit: 10,
        };
        let mut writer = SerialWriter::new(sink, DEFAULT_COMPRESSION_LEVEL)?;
        writer.write(b"buffered, no frame written yet")?;

        // The flush-forced frame hits the failing sink
        assert!(writer.flush().is_err());
        // Every later operation fails fast
        assert!(matches!(
            writer.write(b"more"),
            Err(crate::Error::WriteError(WriteError::Poisoned))
        ));
        assert!(writer.close().is_err());
        Ok(())
    }

    #[test]
    fn test_close_is_idempotent() -> crate::Result<()> {
        let mut writer = SerialWriter::new(SharedVec::default(), DEFAULT_COMPRESSION_LEVEL)?;
        writer.write(b"payload")?;
        writer.close()?;
        writer.close()?;
        assert!(matches!(
            writer.write(b"late"),
            Err(crate::Error::WriteError(WriteError::Closed))
        ));
        Ok(())
    }

    #[test]
    fn test_termination_check_on_real_file() -> crate::Result<()> {
        let path = std::env::temp_dir().join(format!("bgzf-serial-{}", std::process::id()));
        let file = std::fs::File::create(&path)?;
        let mut writer = SerialWriter::new(std::io::BufWriter::new(file), 1)?
            .with_termination_check(path.clone());
        writer.write(b"terminated properly")?;
        writer.close()?;

        assert!(check_termination(&path).is_ok());
        std::fs::remove_file(&path)?;
        Ok(())
    }
}
