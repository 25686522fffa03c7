//! # bgzf
//!
//! A writer for the BGZF container: a gzip-compatible stream of
//! independently decompressible blocks, each at most 64 KiB on disk, ending
//! in a fixed 28-byte terminator block. Because every block records its own
//! compressed length in a gzip extra subfield, a reader can seek to any
//! block directly; positions in the uncompressed stream are addressed by a
//! 64-bit [`VirtualOffset`] packing the block's file offset with an offset
//! inside the block.
//!
//! ## Stream layout
//!
//! ```text
//! ┌────────────┬────────────┬─────┬────────────┬──────────────┐
//! │  block 0   │  block 1   │ ... │  block N   │  terminator  │
//! └────────────┴────────────┴─────┴────────────┴──────────────┘
//!   each block: 18-byte gzip header (with BSIZE extra subfield),
//!   deflate payload, 8-byte CRC32 + ISIZE trailer
//! ```
//!
//! ## Writing
//!
//! Writers are created through a [`BgzfFactory`], which owns the compression
//! level and an optional pool of deflate worker threads shared by all of its
//! writers. With zero threads each block is compressed inline; otherwise
//! full blocks are fanned out to the pool and reassembled in order on disk,
//! so the output is byte-identical in both modes.
//!
//! ```no_run
//! use bgzf::BgzfFactory;
//!
//! fn main() -> bgzf::Result<()> {
//!     let mut factory = BgzfFactory::new();
//!     factory.set_threads(4)?;
//!
//!     let mut writer = factory.create("records.bgzf")?;
//!     let record_start = writer.position()?;
//!     writer.write(b"first record")?;
//!     writer.close()?;
//!
//!     println!("first record at {record_start}");
//!     Ok(())
//! }
//! ```
//!
//! Spans of the uncompressed stream whose final virtual offsets are needed
//! (for building an external index, say) can be tracked without stalling the
//! pipeline: [`BgzfWriter::start_blob`] and [`BgzfWriter::end_blob`] mark
//! the span, and the callback fires with both offsets once the underlying
//! blocks have been written.

mod blob;
mod block;
mod deflate;
mod error;
mod factory;
mod frame;
mod offset;
mod parallel;
mod queue;
mod writer;

pub use blob::BlobCallback;
pub use block::{
    Block, BlockStatus, BLOCK_FOOTER_LENGTH, BLOCK_HEADER_LENGTH, MAX_BLOCK_SIZE,
    MAX_COMPRESSED_SIZE, UNCOMPRESSED_BLOCK_SIZE,
};
pub use deflate::{BlockDeflater, DeflatePool, DEFAULT_COMPRESSION_LEVEL, MAX_COMPRESSION_LEVEL};
pub use error::{Error, Result, WriteError};
pub use factory::{BgzfFactory, BgzfWriter};
pub use frame::{check_termination, EOF_BLOCK};
pub use offset::VirtualOffset;
pub use parallel::ParallelWriter;
pub use writer::SerialWriter;
