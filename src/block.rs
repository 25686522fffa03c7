//! The compressed block: the pipeline's unit of work
//!
//! A [`Block`] owns a fixed-capacity uncompressed buffer and the compressed
//! buffer derived from it, together with its CRC, its eventual on-disk start
//! offset, and a [`BlockStatus`] that is the single source of truth for the
//! block's lifecycle. Ownership of a block moves along the pipeline
//! (producer -> worker -> coordinator); no two threads ever hold it at once.

/// Uncompressed payload capacity of one block.
///
/// 64 KiB minus a 256-byte margin, so that even incompressible input
/// recompressed at store level (fixed, small overhead) still yields a frame
/// within [`MAX_BLOCK_SIZE`].
pub const UNCOMPRESSED_BLOCK_SIZE: usize = 64 * 1024 - 256;

/// Hard upper bound on one on-disk frame (header + payload + trailer)
pub const MAX_BLOCK_SIZE: usize = 64 * 1024;

/// Fixed length of the gzip/BGZF frame header
pub const BLOCK_HEADER_LENGTH: usize = 18;

/// Fixed length of the gzip frame trailer (CRC32 + ISIZE)
pub const BLOCK_FOOTER_LENGTH: usize = 8;

/// Capacity of the compressed buffer: the largest payload that still frames
/// within [`MAX_BLOCK_SIZE`]
pub const MAX_COMPRESSED_SIZE: usize = MAX_BLOCK_SIZE - BLOCK_HEADER_LENGTH - BLOCK_FOOTER_LENGTH;

/// Lifecycle of a block as it moves through the pipeline
///
/// `New -> Partial -> Full -> Submitted -> Deflating -> {Deflated | Error}
/// -> Written`. Partial blocks are submitted only on flush/close. `Error` is
/// terminal and poisons the whole stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockStatus {
    New,
    Partial,
    Full,
    Submitted,
    Deflating,
    Deflated,
    Written,
    Error,
}

/// One fixed-capacity block of the stream
pub struct Block {
    /// Sequence number: submission order and required write order
    id: u64,
    status: BlockStatus,

    ubuf: Box<[u8]>,
    ulen: usize,

    zbuf: Box<[u8]>,
    zlen: usize,

    /// CRC-32 of the uncompressed bytes, set by the worker
    crc: u32,

    /// On-disk offset of the frame, assigned when the block is written
    block_start: u64,
}

impl Block {
    #[must_use]
    pub fn new(id: u64) -> Self {
        Self {
            id,
            status: BlockStatus::New,
            ubuf: vec![0u8; UNCOMPRESSED_BLOCK_SIZE].into_boxed_slice(),
            ulen: 0,
            zbuf: vec![0u8; MAX_COMPRESSED_SIZE].into_boxed_slice(),
            zlen: 0,
            crc: 0,
            block_start: 0,
        }
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub fn status(&self) -> BlockStatus {
        self.status
    }

    pub fn set_status(&mut self, status: BlockStatus) {
        self.status = status;
    }

    /// Appends bytes from `src`, consuming at most the remaining capacity.
    ///
    /// Returns the number of bytes actually consumed; the caller must loop
    /// until its input is exhausted, rolling over to a fresh block whenever
    /// this one fills. The status flips to `Full` exactly when the buffer
    /// reaches capacity.
    pub fn fill(&mut self, src: &[u8]) -> usize {
        debug_assert!(self.ulen < UNCOMPRESSED_BLOCK_SIZE);
        self.status = BlockStatus::Partial;

        let n = src.len().min(UNCOMPRESSED_BLOCK_SIZE - self.ulen);
        self.ubuf[self.ulen..self.ulen + n].copy_from_slice(&src[..n]);
        self.ulen += n;
        if self.ulen == UNCOMPRESSED_BLOCK_SIZE {
            self.status = BlockStatus::Full;
        }
        n
    }

    /// Number of uncompressed bytes currently buffered
    #[must_use]
    pub fn len(&self) -> usize {
        self.ulen
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ulen == 0
    }

    /// The valid uncompressed payload
    #[must_use]
    pub fn uncompressed(&self) -> &[u8] {
        &self.ubuf[..self.ulen]
    }

    /// The full compressed buffer for the worker to deflate into
    pub(crate) fn compressed_buf_mut(&mut self) -> &mut [u8] {
        &mut self.zbuf
    }

    /// Simultaneous borrow of the valid uncompressed payload and the whole
    /// compressed buffer, for in-place deflation
    pub(crate) fn split_buffers(&mut self) -> (&[u8], &mut [u8]) {
        (&self.ubuf[..self.ulen], &mut self.zbuf)
    }

    /// The valid compressed payload, once deflated
    #[must_use]
    pub fn compressed(&self) -> &[u8] {
        &self.zbuf[..self.zlen]
    }

    #[must_use]
    pub fn compressed_len(&self) -> usize {
        self.zlen
    }

    pub(crate) fn set_compressed_len(&mut self, zlen: usize) {
        debug_assert!(zlen <= MAX_COMPRESSED_SIZE);
        self.zlen = zlen;
    }

    #[must_use]
    pub fn crc(&self) -> u32 {
        self.crc
    }

    pub(crate) fn set_crc(&mut self, crc: u32) {
        self.crc = crc;
    }

    #[must_use]
    pub fn block_start(&self) -> u64 {
        self.block_start
    }

    pub(crate) fn set_block_start(&mut self, block_start: u64) {
        self.block_start = block_start;
    }
}

impl std::fmt::Debug for Block {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Block")
            .field("id", &self.id)
            .field("status", &self.status)
            .field("ulen", &self.ulen)
            .field("zlen", &self.zlen)
            .field("block_start", &self.block_start)
            .finish_non_exhaustive()
    }
}
