//! Parallel writer: the stream coordinator
//!
//! [`ParallelWriter`] produces blocks on the calling thread, submits them to
//! a shared [`DeflatePool`], and reassembles the out-of-order completions
//! into in-order frames on disk. Blocks are moved along the pipeline
//! (producer -> queue -> worker -> completion hook), never shared; the only
//! concurrently shared state is the pool's queue and one mutex domain here
//! holding the sink, the on-disk cursor, the pending reassembly map, and the
//! blob bookkeeping. A condvar signals every pipeline advance, so flush,
//! close, and position waits never spin.
//!
//! Any failure (a worker's deflate error, a sink write error, a pool
//! shutdown) poisons the stream: the error flag is raised, the sink is
//! dropped, and every subsequent operation fails. The first operation to
//! observe the poisoning receives the root cause; later ones get
//! [`WriteError::Poisoned`].

use std::collections::{BTreeMap, VecDeque};
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::blob::{resolve_ready, Blob};
use crate::block::{Block, BlockStatus};
use crate::deflate::DeflatePool;
use crate::error::{Error, Result, WriteError};
use crate::frame::{check_termination, write_frame, EOF_BLOCK};
use crate::offset::VirtualOffset;
use crate::queue::{CompletionSink, Job};

/// Everything guarded by the coordinator's single lock
struct DrainState<W> {
    /// Dropped on close and on poisoning
    sink: Option<W>,
    /// On-disk offset of the next frame; never includes the terminator
    cursor: u64,
    /// Number of blocks handed to the pool; also the id of the producer's
    /// current block
    submitted: u64,
    /// Blocks with smaller ids have been written; all submitted blocks are
    /// on disk exactly when this equals `submitted`
    next_write_id: u64,
    /// Deflated blocks completed ahead of their turn, keyed by id
    pending: BTreeMap<u64, Block>,
    blobs: VecDeque<Blob>,
    /// Start offsets of written blocks still referenced by pending blobs
    starts: BTreeMap<u64, u64>,
    /// Root cause of a poisoning, taken by its first observer
    failure: Option<Error>,
}

/// State shared between the producer and the pool's worker threads
struct Shared<W> {
    drain: Mutex<DrainState<W>>,
    /// Signalled on every write-order advance and on poisoning
    advanced: Condvar,
    flushing: AtomicBool,
    closing: AtomicBool,
    closed: AtomicBool,
    /// Monotone; once set the stream is unusable
    error: AtomicBool,
}

impl<W: Write + Send> Shared<W> {
    fn new(sink: W) -> Self {
        Self {
            drain: Mutex::new(DrainState {
                sink: Some(sink),
                cursor: 0,
                submitted: 0,
                next_write_id: 0,
                pending: BTreeMap::new(),
                blobs: VecDeque::new(),
                starts: BTreeMap::new(),
                failure: None,
            }),
            advanced: Condvar::new(),
            flushing: AtomicBool::new(false),
            closing: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            error: AtomicBool::new(false),
        }
    }

    /// Marks the stream unusable. Records `failure` as the root cause when
    /// one is given and none is recorded yet; a producer-side caller passes
    /// `None` and returns the cause directly instead.
    fn poison(&self, state: &mut DrainState<W>, failure: Option<Error>) {
        self.error.store(true, Ordering::SeqCst);
        if state.failure.is_none() {
            state.failure = failure;
        }
        state.sink = None;
        state.pending.clear();
        self.advanced.notify_all();
    }

    fn take_failure(&self, state: &mut DrainState<W>) -> Error {
        state
            .failure
            .take()
            .unwrap_or_else(|| WriteError::Poisoned.into())
    }
}

impl<W: Write + Send> CompletionSink for Shared<W> {
    /// Runs on a worker thread. Inserts the block into the reassembly map,
    /// then drains every contiguous block starting at `next_write_id` to
    /// disk, resolves any blobs that became resolvable, and wakes waiters.
    fn deflate_complete(&self, block: Block) {
        let mut guard = self.drain.lock();
        if self.error.load(Ordering::SeqCst) {
            // Poisoned: the block is dropped, nothing to report
            return;
        }
        let state = &mut *guard;
        state.pending.insert(block.id(), block);

        while let Some(mut block) = state.pending.remove(&state.next_write_id) {
            let start = state.cursor;
            let Some(sink) = state.sink.as_mut() else {
                return;
            };
            match write_frame(sink, &block) {
                Ok(total) => {
                    block.set_block_start(start);
                    block.set_status(BlockStatus::Written);
                    if !state.blobs.is_empty() {
                        state.starts.insert(block.id(), start);
                    }
                    state.cursor += total as u64;
                    state.next_write_id += 1;
                }
                Err(error) => {
                    self.poison(state, Some(error));
                    return;
                }
            }
        }

        let next_write_id = state.next_write_id;
        resolve_ready(&mut state.blobs, &mut state.starts, next_write_id);
        self.advanced.notify_all();
    }

    fn deflate_failed(&self, _id: u64, error: Error) {
        let mut guard = self.drain.lock();
        if !self.error.load(Ordering::SeqCst) {
            self.poison(&mut guard, Some(error));
        }
    }
}

/// A writer compressing blocks on a shared worker pool.
///
/// All public operations take `&mut self`: the producer side is serialized
/// by ownership, exactly like the single-threaded writer.
pub struct ParallelWriter<W: Write + Send + 'static> {
    shared: Arc<Shared<W>>,
    pool: Arc<DeflatePool>,
    /// The block currently being filled; its id always equals the shared
    /// `submitted` counter
    current: Block,
    path: Option<PathBuf>,
}

impl<W: Write + Send + 'static> ParallelWriter<W> {
    #[must_use]
    pub fn new(sink: W, pool: Arc<DeflatePool>) -> Self {
        Self {
            shared: Arc::new(Shared::new(sink)),
            pool,
            current: Block::new(0),
            path: None,
        }
    }

    /// Enables the close-time terminator verification against `path`
    #[must_use]
    pub fn with_termination_check(mut self, path: PathBuf) -> Self {
        self.path = Some(path);
        self
    }

    /// Appends `buf` to the uncompressed stream, submitting each block to
    /// the pool as it fills. Blocks on the pool queue's backpressure when
    /// the workers fall behind.
    pub fn write(&mut self, buf: &[u8]) -> Result<()> {
        self.check()?;
        let mut rem = buf;
        while !rem.is_empty() {
            let n = self.current.fill(rem);
            rem = &rem[n..];
            if self.current.status() == BlockStatus::Full {
                self.submit_current()?;
            }
        }
        Ok(())
    }

    /// Submits the current partial block, if any, waits until every
    /// submitted block is on disk, and flushes the sink.
    pub fn flush(&mut self) -> Result<()> {
        self.check()?;
        if !self.current.is_empty() {
            self.submit_current()?;
        }
        self.shared.flushing.store(true, Ordering::SeqCst);
        let result = self.wait_and_flush_sink();
        self.shared.flushing.store(false, Ordering::SeqCst);
        result
    }

    fn wait_and_flush_sink(&self) -> Result<()> {
        let mut guard = self.shared.drain.lock();
        while guard.next_write_id < guard.submitted && !self.shared.error.load(Ordering::SeqCst) {
            self.shared.advanced.wait(&mut guard);
        }
        let state = &mut *guard;
        if self.shared.error.load(Ordering::SeqCst) {
            return Err(self.shared.take_failure(state));
        }
        let result = match state.sink.as_mut() {
            Some(sink) => sink.flush(),
            None => return Err(WriteError::Poisoned.into()),
        };
        if let Err(error) = result {
            self.shared.poison(state, None);
            return Err(error.into());
        }
        Ok(())
    }

    /// Finishes the stream: submits the final partial block, waits for all
    /// blocks to land, appends the terminator, flushes and drops the sink,
    /// and verifies the terminator on disk when a path was given. Calling
    /// close again is a no-op.
    pub fn close(&mut self) -> Result<()> {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if self.shared.error.load(Ordering::SeqCst) {
            let mut guard = self.shared.drain.lock();
            return Err(self.shared.take_failure(&mut guard));
        }
        self.shared.closing.store(true, Ordering::SeqCst);
        let result = self.finish();
        self.shared.closing.store(false, Ordering::SeqCst);
        result
    }

    fn finish(&mut self) -> Result<()> {
        if !self.current.is_empty() {
            self.submit_current()?;
        }
        let current_id = self.current.id();
        {
            let mut guard = self.shared.drain.lock();
            while guard.next_write_id < guard.submitted
                && !self.shared.error.load(Ordering::SeqCst)
            {
                self.shared.advanced.wait(&mut guard);
            }
            let state = &mut *guard;
            if self.shared.error.load(Ordering::SeqCst) {
                return Err(self.shared.take_failure(state));
            }

            // Blobs ending in the empty current block resolve against the
            // position the block would occupy
            if !state.blobs.is_empty() {
                state.starts.insert(current_id, state.cursor);
                resolve_ready(&mut state.blobs, &mut state.starts, current_id + 1);
            }

            // The terminator goes out only after the last real block; the
            // cursor deliberately excludes it, so the final position points
            // at the terminator's first byte
            let Some(sink) = state.sink.as_mut() else {
                return Err(WriteError::Poisoned.into());
            };
            let result = sink.write_all(&EOF_BLOCK).and_then(|()| sink.flush());
            if let Err(error) = result {
                self.shared.poison(state, None);
                return Err(error.into());
            }
            state.sink = None;
        }
        if let Some(path) = &self.path {
            check_termination(path)?;
        }
        Ok(())
    }

    /// The virtual offset of the next byte to be written.
    ///
    /// Waits until every submitted block is on disk so the reported block
    /// start is final. After close this points at the terminator block.
    pub fn position(&self) -> Result<VirtualOffset> {
        let mut guard = self.shared.drain.lock();
        while guard.next_write_id < guard.submitted && !self.shared.error.load(Ordering::SeqCst) {
            self.shared.advanced.wait(&mut guard);
        }
        if self.shared.error.load(Ordering::SeqCst) {
            return Err(self.shared.take_failure(&mut guard));
        }
        Ok(VirtualOffset::new(guard.cursor, self.current.len() as u16))
    }

    /// Opens a span at the current position; `callback` receives the span's
    /// final virtual offsets once both of its boundary blocks are written.
    /// Callbacks run on whichever thread writes the resolving block.
    pub fn start_blob<F>(&mut self, callback: F) -> Result<()>
    where
        F: FnOnce(VirtualOffset, VirtualOffset) + Send + 'static,
    {
        self.check()?;
        let blob = Blob::new(
            self.current.id(),
            self.current.len() as u16,
            Box::new(callback),
        );
        self.shared.drain.lock().blobs.push_back(blob);
        Ok(())
    }

    /// Closes the most recently opened span at the current position.
    pub fn end_blob(&mut self) -> Result<()> {
        self.check()?;
        let mut guard = self.shared.drain.lock();
        match guard.blobs.back_mut() {
            Some(blob) if !blob.is_closed() => {
                blob.close(self.current.id(), self.current.len() as u16);
                Ok(())
            }
            _ => Err(WriteError::NoOpenBlob.into()),
        }
    }

    fn check(&self) -> Result<()> {
        if self.shared.error.load(Ordering::SeqCst) {
            let mut guard = self.shared.drain.lock();
            return Err(self.shared.take_failure(&mut guard));
        }
        if self.shared.closed.load(Ordering::SeqCst) || self.shared.closing.load(Ordering::SeqCst)
        {
            return Err(WriteError::Closed.into());
        }
        if self.shared.flushing.load(Ordering::SeqCst) {
            return Err(WriteError::Flushing.into());
        }
        Ok(())
    }

    /// Swaps in a fresh block and hands the full one to the pool.
    ///
    /// The submitted counter is advanced under the lock before the push, so
    /// waiters always see the block as outstanding; the push itself happens
    /// without the lock, since a full queue blocks.
    fn submit_current(&mut self) -> Result<()> {
        let next = Block::new(self.current.id() + 1);
        let mut block = std::mem::replace(&mut self.current, next);
        block.set_status(BlockStatus::Submitted);
        {
            let mut guard = self.shared.drain.lock();
            guard.submitted = block.id() + 1;
        }

        let job = Job {
            block,
            owner: Arc::clone(&self.shared) as Arc<dyn CompletionSink>,
        };
        if self.pool.queue().push(job).is_err() {
            let mut guard = self.shared.drain.lock();
            self.shared.poison(&mut guard, None);
            return Err(WriteError::PoolShutdown.into());
        }
        Ok(())
    }
}

impl<W: Write + Send + 'static> Drop for ParallelWriter<W> {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
