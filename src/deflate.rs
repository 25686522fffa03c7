//! Deflate workers and the shared worker pool
//!
//! Each worker owns two compressors for its whole lifetime: a primary one at
//! the pool's configured level, reset between blocks, and a fallback at
//! store level. When primary output does not fit the bounded compressed
//! buffer (pathological or incompressible input), the block is recompressed
//! with the fallback, whose fixed overhead over the input length is small
//! enough that it always fits. Recompressing the full block beats shrinking
//! the input ("downshifting"), which would make virtual offsets inaccurate.

use std::sync::Arc;
use std::thread::JoinHandle;

use flate2::{Compress, Compression, FlushCompress, Status};

use crate::block::{Block, BlockStatus};
use crate::error::{Result, WriteError};
use crate::queue::{Job, TaskQueue};

/// Compression level used when a writer does not specify one
pub const DEFAULT_COMPRESSION_LEVEL: u32 = 5;

/// Highest level accepted by the DEFLATE backend
pub const MAX_COMPRESSION_LEVEL: u32 = 9;

/// One worker's pair of compressors
pub struct BlockDeflater {
    primary: Compress,
    /// Store-level compressor: predictable output of input length plus a
    /// small fixed overhead, so the block size bound guarantees a fit
    fallback: Compress,
}

impl BlockDeflater {
    #[must_use]
    pub fn new(level: u32) -> Self {
        Self {
            primary: Compress::new(Compression::new(level), false),
            fallback: Compress::new(Compression::none(), false),
        }
    }

    /// Computes the CRC and fills the block's compressed buffer.
    ///
    /// Compression of a given block is attempted at most twice: primary,
    /// then the guaranteed-fit fallback.
    pub fn deflate_block(&mut self, block: &mut Block) -> Result<()> {
        block.set_crc(crc32fast::hash(block.uncompressed()));

        let (input, output) = block.split_buffers();
        let zlen = match deflate_into(&mut self.primary, input, output)? {
            Some(zlen) => zlen,
            // Primary output overflowed the buffer: discard and store
            None => deflate_into(&mut self.fallback, input, output)?
                .ok_or(WriteError::BlockTooLarge(input.len()))?,
        };
        block.set_compressed_len(zlen);
        Ok(())
    }
}

/// Runs one full-input deflate into a bounded output buffer.
///
/// Returns the compressed length, or `None` when the stream could not be
/// finished within the buffer.
fn deflate_into(comp: &mut Compress, input: &[u8], output: &mut [u8]) -> Result<Option<usize>> {
    comp.reset();
    loop {
        let consumed = comp.total_in() as usize;
        let produced = comp.total_out() as usize;
        let status = comp.compress(
            &input[consumed..],
            &mut output[produced..],
            FlushCompress::Finish,
        )?;
        match status {
            Status::StreamEnd => return Ok(Some(comp.total_out() as usize)),
            Status::Ok | Status::BufError => {
                let stalled = comp.total_in() as usize == consumed
                    && comp.total_out() as usize == produced;
                if comp.total_out() as usize == output.len() || stalled {
                    return Ok(None);
                }
            }
        }
    }
}

/// The worker loop: dequeue, deflate, report.
///
/// Any failure during processing is reported back with its cause so the
/// owning stream poisons itself instead of stalling. A panic anywhere in
/// the job (the deflater or the stream's own hook) is caught: it fails the
/// whole pool, is reported to the owning stream, and kills this worker,
/// since the deflater state cannot be trusted after an unwind. Exits when
/// the queue reports exhaustion or a pool-wide error.
fn worker_loop(queue: &TaskQueue, mut deflater: BlockDeflater) {
    while let Some(Job { mut block, owner }) = queue.pop() {
        let id = block.id();
        let report = Arc::clone(&owner);
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            block.set_status(BlockStatus::Deflating);
            match deflater.deflate_block(&mut block) {
                Ok(()) => {
                    block.set_status(BlockStatus::Deflated);
                    owner.deflate_complete(block);
                }
                Err(error) => {
                    block.set_status(BlockStatus::Error);
                    owner.deflate_failed(id, error);
                }
            }
        }));
        if outcome.is_err() {
            queue.set_error();
            // The hook itself may be the panicker, so the report is guarded
            // too; waking the stream matters more than the message landing
            let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                report.deflate_failed(id, anyhow::anyhow!("deflate worker panicked").into());
            }));
            return;
        }
    }
}

/// A fixed pool of deflate worker threads with its bounded work queue.
///
/// Created explicitly and injected into each parallel writer; reconfiguring
/// thread count or level means dropping the pool and creating a new one.
/// Dropping sets `done`, drains in-flight work, and joins the workers.
pub struct DeflatePool {
    queue: Arc<TaskQueue>,
    workers: Vec<JoinHandle<()>>,
    level: u32,
}

impl DeflatePool {
    /// Spawns `threads` workers (clamped to available CPUs, minimum one)
    /// compressing at `level`, with a queue bounded to the worker count.
    pub fn new(threads: usize, level: u32) -> Result<Self> {
        if level > MAX_COMPRESSION_LEVEL {
            return Err(WriteError::InvalidCompressionLevel(level).into());
        }
        let threads = threads.clamp(1, num_cpus::get().max(1));
        let queue = Arc::new(TaskQueue::new(threads));

        let mut workers = Vec::with_capacity(threads);
        for i in 0..threads {
            let queue = Arc::clone(&queue);
            let handle = std::thread::Builder::new()
                .name(format!("bgzf-deflate-{i}"))
                .spawn(move || worker_loop(&queue, BlockDeflater::new(level)))?;
            workers.push(handle);
        }

        Ok(Self {
            queue,
            workers,
            level,
        })
    }

    #[must_use]
    pub fn compression_level(&self) -> u32 {
        self.level
    }

    #[must_use]
    pub fn num_threads(&self) -> usize {
        self.workers.len()
    }

    pub(crate) fn queue(&self) -> &Arc<TaskQueue> {
        &self.queue
    }

    /// Stops accepting new blocks, drains in-flight work, and joins the
    /// workers. Equivalent to dropping the pool.
    pub fn shutdown(self) {
        drop(self);
    }
}

impl Drop for DeflatePool {
    fn drop(&mut self) {
        self.queue.set_done();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}
