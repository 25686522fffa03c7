/// Custom Result type for bgzf operations, wrapping the custom [`Error`] type
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for the bgzf library, encompassing all possible error
/// cases that can occur while writing block-compressed streams.
#[derive(thiserror::Error, Debug)]
#[error(transparent)]
pub enum Error {
    /// Errors that occur during write operations
    WriteError(#[from] WriteError),
    /// Standard I/O errors from the Rust standard library
    IoError(#[from] std::io::Error),
    /// Errors from the underlying DEFLATE implementation
    CompressError(#[from] flate2::CompressError),
    /// Generic errors that can occur in any part of the system
    AnyhowError(#[from] anyhow::Error),
}

/// Errors that can occur while writing block-compressed data
#[derive(thiserror::Error, Debug)]
pub enum WriteError {
    /// The stream has been poisoned by an earlier compression or write
    /// failure and can no longer be used
    #[error("Stream has been corrupted")]
    Poisoned,

    /// The shared worker pool has been shut down or has failed; no further
    /// blocks can be submitted
    #[error("The deflate workers are no longer accepting blocks")]
    PoolShutdown,

    /// An operation was attempted while the stream is flushing buffered data
    #[error("The stream is flushing data")]
    Flushing,

    /// An operation was attempted on a closed (or closing) stream
    #[error("The stream has been closed")]
    Closed,

    /// The store-level fallback compressor overflowed the compressed buffer.
    /// The block size bound makes this unreachable for valid inputs.
    #[error("Fallback compression overflowed the compressed buffer ({0} bytes)")]
    BlockTooLarge(usize),

    /// `end_blob` was called with no open blob to close
    #[error("No open blob to end")]
    NoOpenBlob,

    /// The terminator block was not found when re-reading the output file
    /// after close
    #[error("Terminator block not found after closing BGZF file {0}")]
    MissingTerminator(std::path::PathBuf),

    /// The requested compression level is outside the supported range
    ///
    /// # Arguments
    /// * `u32` - The invalid level that was requested
    #[error("Invalid compression level: {0}")]
    InvalidCompressionLevel(u32),
}
