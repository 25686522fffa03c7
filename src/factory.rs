//! Writer construction and pool lifecycle
//!
//! [`BgzfFactory`] owns the compression configuration and the optional
//! worker pool shared by every writer it creates. Thread count and level are
//! reconfigured by tearing the pool down (joining its workers) and building
//! a new one; writers created earlier keep the pool they were born with
//! alive through their own handle.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::deflate::{DeflatePool, DEFAULT_COMPRESSION_LEVEL, MAX_COMPRESSION_LEVEL};
use crate::error::{Result, WriteError};
use crate::offset::VirtualOffset;
use crate::parallel::ParallelWriter;
use crate::writer::SerialWriter;

/// Creates block-compressed writers, serial or pool-backed.
///
/// With zero threads (the default) writers compress inline on the calling
/// thread; with one or more threads they share one [`DeflatePool`].
pub struct BgzfFactory {
    level: u32,
    pool: Option<Arc<DeflatePool>>,
}

impl Default for BgzfFactory {
    fn default() -> Self {
        Self {
            level: DEFAULT_COMPRESSION_LEVEL,
            pool: None,
        }
    }
}

impl BgzfFactory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the compression level for writers created from now on,
    /// rebuilding the pool when one is running.
    pub fn set_compression_level(&mut self, level: u32) -> Result<()> {
        if level > MAX_COMPRESSION_LEVEL {
            return Err(WriteError::InvalidCompressionLevel(level).into());
        }
        self.level = level;
        if let Some(pool) = self.pool.take() {
            let threads = pool.num_threads();
            drop(pool);
            self.pool = Some(Arc::new(DeflatePool::new(threads, level)?));
        }
        Ok(())
    }

    /// Resizes the worker pool; zero switches to serial mode.
    ///
    /// The old pool is shut down and joined first. Existing writers are
    /// unaffected: they hold their own handle to the pool they started with.
    pub fn set_threads(&mut self, threads: usize) -> Result<()> {
        self.pool = None;
        if threads > 0 {
            self.pool = Some(Arc::new(DeflatePool::new(threads, self.level)?));
        }
        Ok(())
    }

    #[must_use]
    pub fn compression_level(&self) -> u32 {
        self.level
    }

    #[must_use]
    pub fn num_threads(&self) -> usize {
        self.pool.as_ref().map_or(0, |pool| pool.num_threads())
    }

    /// Creates a writer over a new file at `path`, with the close-time
    /// terminator verification enabled.
    pub fn create<P: AsRef<Path>>(&self, path: P) -> Result<BgzfWriter<BufWriter<File>>> {
        let path = path.as_ref();
        let sink = BufWriter::new(File::create(path)?);
        self.create_from_writer(sink, Some(path.to_path_buf()))
    }

    /// Creates a writer over an arbitrary sink. Pass a path only when it
    /// names the regular file the sink writes to; it enables the
    /// close-time terminator verification, which is skipped otherwise.
    pub fn create_from_writer<W: Write + Send + 'static>(
        &self,
        sink: W,
        path: Option<PathBuf>,
    ) -> Result<BgzfWriter<W>> {
        match &self.pool {
            Some(pool) => {
                let mut writer = ParallelWriter::new(sink, Arc::clone(pool));
                if let Some(path) = path {
                    writer = writer.with_termination_check(path);
                }
                Ok(BgzfWriter::Parallel(writer))
            }
            None => {
                let mut writer = SerialWriter::new(sink, self.level)?;
                if let Some(path) = path {
                    writer = writer.with_termination_check(path);
                }
                Ok(BgzfWriter::Serial(writer))
            }
        }
    }
}

/// A block-compressed writer in either mode, dispatching the common surface
pub enum BgzfWriter<W: Write + Send + 'static> {
    Serial(SerialWriter<W>),
    Parallel(ParallelWriter<W>),
}

impl<W: Write + Send + 'static> BgzfWriter<W> {
    pub fn write(&mut self, buf: &[u8]) -> Result<()> {
        match self {
            Self::Serial(writer) => writer.write(buf),
            Self::Parallel(writer) => writer.write(buf),
        }
    }

    pub fn flush(&mut self) -> Result<()> {
        match self {
            Self::Serial(writer) => writer.flush(),
            Self::Parallel(writer) => writer.flush(),
        }
    }

    pub fn close(&mut self) -> Result<()> {
        match self {
            Self::Serial(writer) => writer.close(),
            Self::Parallel(writer) => writer.close(),
        }
    }

    pub fn position(&self) -> Result<VirtualOffset> {
        match self {
            Self::Serial(writer) => writer.position(),
            Self::Parallel(writer) => writer.position(),
        }
    }

    pub fn start_blob<F>(&mut self, callback: F) -> Result<()>
    where
        F: FnOnce(VirtualOffset, VirtualOffset) + Send + 'static,
    {
        match self {
            Self::Serial(writer) => writer.start_blob(callback),
            Self::Parallel(writer) => writer.start_blob(callback),
        }
    }

    pub fn end_blob(&mut self) -> Result<()> {
        match self {
            Self::Serial(writer) => writer.end_blob(),
            Self::Parallel(writer) => writer.end_blob(),
        }
    }

    /// True when backed by the worker pool
    #[must_use]
    pub fn is_parallel(&self) -> bool {
        matches!(self, Self::Parallel(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::check_termination;

    fn temp_path(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!("bgzf-factory-{tag}-{}", std::process::id()))
    }

    #[test]
    fn test_mode_selection() -> crate::Result<()> {
        let mut factory = BgzfFactory::new();
        assert_eq!(factory.num_threads(), 0);
        let writer = factory.create_from_writer(Vec::<u8>::new(), None)?;
        assert!(!writer.is_parallel());

        factory.set_threads(2)?;
        assert_eq!(factory.num_threads(), 2);
        let writer = factory.create_from_writer(Vec::<u8>::new(), None)?;
        assert!(writer.is_parallel());

        factory.set_threads(0)?;
        let writer = factory.create_from_writer(Vec::<u8>::new(), None)?;
        assert!(!writer.is_parallel());
        Ok(())
    }

    #[test]
    fn test_invalid_level_rejected() {
        let mut factory = BgzfFactory::new();
        assert!(factory.set_compression_level(10).is_err());
        assert!(factory.set_compression_level(9).is_ok());
    }

    #[test]
    fn test_serial_and_parallel_outputs_are_identical() -> crate::Result<()> {
        let payload: Vec<u8> = (0..200_000u32).flat_map(u32::to_le_bytes).collect();

        let serial_path = temp_path("serial");
        let parallel_path = temp_path("parallel");

        let mut factory = BgzfFactory::new();
        let mut writer = factory.create(&serial_path)?;
        writer.write(&payload)?;
        writer.close()?;

        factory.set_threads(3)?;
        let mut writer = factory.create(&parallel_path)?;
        writer.write(&payload)?;
        writer.close()?;

        // Same level, same block split, same deflate backend: the two modes
        // produce byte-identical files
        let serial_bytes = std::fs::read(&serial_path)?;
        let parallel_bytes = std::fs::read(&parallel_path)?;
        assert_eq!(serial_bytes, parallel_bytes);

        assert!(check_termination(&serial_path).is_ok());
        assert!(check_termination(&parallel_path).is_ok());

        std::fs::remove_file(&serial_path)?;
        std::fs::remove_file(&parallel_path)?;
        Ok(())
    }
}
