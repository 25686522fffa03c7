//! On-disk frame codec
//!
//! Each block lands on disk as one gzip member with a fixed-layout header
//! whose extra subfield carries the total frame length minus one:
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ ID1 ID2 CM FLG MTIME(4) XFL OS  XLEN(2)      │ 12 bytes
//! │ SI1 SI2 SLEN(2) BSIZE(2)                     │ 6 bytes (extra subfield)
//! ├──────────────────────────────────────────────┤
//! │ compressed payload                           │ BSIZE+1 - 26 bytes
//! ├──────────────────────────────────────────────┤
//! │ CRC32(4) ISIZE(4)                            │ 8 bytes
//! └──────────────────────────────────────────────┘
//! ```
//!
//! All multi-byte fields are little-endian. A stream is terminated by one
//! fixed empty frame ([`EOF_BLOCK`]); files lacking it are treated as
//! improperly terminated.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use byteorder::{LittleEndian, WriteBytesExt};

use crate::block::{Block, BLOCK_FOOTER_LENGTH, BLOCK_HEADER_LENGTH, MAX_BLOCK_SIZE};
use crate::error::{Result, WriteError};

const GZIP_ID1: u8 = 0x1f;
const GZIP_ID2: u8 = 0x8b;
const GZIP_CM_DEFLATE: u8 = 8;
const GZIP_FLG_FEXTRA: u8 = 4;
const GZIP_XFL: u8 = 0;
const GZIP_OS_UNKNOWN: u8 = 0xff;
const GZIP_XLEN: u16 = 6;
const BGZF_ID1: u8 = b'B';
const BGZF_ID2: u8 = b'C';
const BGZF_SLEN: u16 = 2;

/// The fixed empty frame appended verbatim at end of stream
pub const EOF_BLOCK: [u8; 28] = [
    0x1f, 0x8b, 0x08, 0x04, 0x00, 0x00, 0x00, 0x00, 0x00, 0xff, 0x06, 0x00, 0x42, 0x43, 0x02,
    0x00, 0x1b, 0x00, 0x03, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
];

/// Writes one deflated block as a complete frame.
///
/// Returns the total frame length (header + payload + trailer) so the caller
/// can advance its on-disk cursor.
pub(crate) fn write_frame<W: Write>(sink: &mut W, block: &Block) -> Result<usize> {
    let total = block.compressed_len() + BLOCK_HEADER_LENGTH + BLOCK_FOOTER_LENGTH;
    debug_assert!(total <= MAX_BLOCK_SIZE);

    sink.write_u8(GZIP_ID1)?;
    sink.write_u8(GZIP_ID2)?;
    sink.write_u8(GZIP_CM_DEFLATE)?;
    sink.write_u8(GZIP_FLG_FEXTRA)?;
    sink.write_u32::<LittleEndian>(0)?; // modification time
    sink.write_u8(GZIP_XFL)?;
    sink.write_u8(GZIP_OS_UNKNOWN)?;
    sink.write_u16::<LittleEndian>(GZIP_XLEN)?;
    sink.write_u8(BGZF_ID1)?;
    sink.write_u8(BGZF_ID2)?;
    sink.write_u16::<LittleEndian>(BGZF_SLEN)?;
    // The subfield stores total length minus one, per the format
    sink.write_u16::<LittleEndian>((total - 1) as u16)?;

    sink.write_all(block.compressed())?;

    sink.write_u32::<LittleEndian>(block.crc())?;
    sink.write_u32::<LittleEndian>(block.len() as u32)?;

    Ok(total)
}

/// Verifies that a finished file ends with the terminator frame.
///
/// Only regular files can be re-read and seeked; anything else (a pipe, a
/// device, a missing path) passes without inspection.
pub fn check_termination<P: AsRef<Path>>(path: P) -> Result<()> {
    let path = path.as_ref();
    if !path.metadata().is_ok_and(|m| m.is_file()) {
        return Ok(());
    }
    let mut file = File::open(path)?;
    let len = file.metadata()?.len();
    if len < EOF_BLOCK.len() as u64 {
        return Err(WriteError::MissingTerminator(path.to_path_buf()).into());
    }

    file.seek(SeekFrom::End(-(EOF_BLOCK.len() as i64)))?;
    let mut tail = [0u8; EOF_BLOCK.len()];
    file.read_exact(&mut tail)?;
    if tail == EOF_BLOCK {
        Ok(())
    } else {
        Err(WriteError::MissingTerminator(path.to_path_buf()).into())
    }
}
