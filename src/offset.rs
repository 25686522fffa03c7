//! Virtual file pointer arithmetic
//!
//! A virtual offset packs the on-disk start offset of a compressed block
//! (high 48 bits) together with an uncompressed byte offset inside that
//! block (low 16 bits). Ordering on the raw integer matches logical byte
//! order in the decompressed stream, so virtual offsets can be stored and
//! compared directly by external indexers.

/// Number of low-order bits carrying the intra-block offset
const SHIFT: u32 = 16;

/// Mask selecting the intra-block offset
const INTRA_MASK: u64 = 0xFFFF;

/// A 64-bit virtual file pointer into a BGZF stream
///
/// ```
/// use bgzf::VirtualOffset;
///
/// let v = VirtualOffset::new(1024, 37);
/// assert_eq!(v.block_start(), 1024);
/// assert_eq!(v.intra_offset(), 37);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VirtualOffset(u64);

impl VirtualOffset {
    /// Largest representable on-disk block start offset (48 bits)
    pub const MAX_BLOCK_START: u64 = (1 << 48) - 1;

    /// Combines a block start offset and an intra-block uncompressed byte
    /// offset into a single virtual pointer.
    #[must_use]
    pub fn new(block_start: u64, intra_offset: u16) -> Self {
        debug_assert!(block_start <= Self::MAX_BLOCK_START);
        Self((block_start << SHIFT) | u64::from(intra_offset))
    }

    /// On-disk offset of the first byte of the containing compressed block
    #[must_use]
    pub fn block_start(self) -> u64 {
        self.0 >> SHIFT
    }

    /// Uncompressed byte offset within the containing block
    #[must_use]
    pub fn intra_offset(self) -> u16 {
        (self.0 & INTRA_MASK) as u16
    }

    /// The raw 64-bit representation
    #[must_use]
    pub fn raw(self) -> u64 {
        self.0
    }

    /// Reconstructs a virtual offset from its raw representation
    #[must_use]
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

impl std::fmt::Display for VirtualOffset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.block_start(), self.intra_offset())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let v = VirtualOffset::new(0xDEAD_BEEF, 0x1234);
        assert_eq!(v.block_start(), 0xDEAD_BEEF);
        assert_eq!(v.intra_offset(), 0x1234);
        assert_eq!(VirtualOffset::from_raw(v.raw()), v);
    }

    #[test]
    fn test_zero() {
        let v = VirtualOffset::new(0, 0);
        assert_eq!(v.raw(), 0);
        assert_eq!(v, VirtualOffset::default());
    }

    #[test]
    fn test_ordering_matches_logical_order() {
        // Same block, increasing intra offsets
        assert!(VirtualOffset::new(100, 1) < VirtualOffset::new(100, 2));
        // A later block always compares greater, regardless of intra offset
        assert!(VirtualOffset::new(100, 0xFFFF) < VirtualOffset::new(101, 0));
        // Raw ordering is total ordering
        let a = VirtualOffset::new(7, 65_279);
        let b = VirtualOffset::new(8, 0);
        assert!(a.raw() < b.raw());
    }

    #[test]
    fn test_max_block_start() {
        let v = VirtualOffset::new(VirtualOffset::MAX_BLOCK_START, 0xFFFF);
        assert_eq!(v.raw(), u64::MAX);
        assert_eq!(v.block_start(), VirtualOffset::MAX_BLOCK_START);
    }
}
