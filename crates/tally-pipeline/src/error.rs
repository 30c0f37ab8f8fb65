//! Error types for the archive and stream pipeline.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while persisting or forwarding events.
#[derive(Error, Debug)]
pub enum Error {
    /// An archived object exists but its contents failed validation.
    ///
    /// Nothing from the object is forwarded. The source error carries
    /// the per-field validation detail.
    #[error("invalid archive data at {key}: {source}")]
    InvalidArchiveData {
        key: String,
        source: tally_core::Error,
    },

    /// The archive object could not be read (missing, access denied,
    /// transport failure).
    #[error("archive read failed for {key}: {message}")]
    ArchiveRead { key: String, message: String },

    /// An archive write failed. Sibling group writes from the same
    /// batch are not rolled back.
    #[error("archive write failed for {key}: {message}")]
    ArchiveWrite { key: String, message: String },

    /// Listing a page of the archive failed.
    #[error("archive listing failed: {message}")]
    ArchiveList { message: String },

    /// The stream rejected records. In fatal-policy forwarding this
    /// aborts the invocation before the redrive cursor advances.
    #[error("stream write failed: {failed} record(s) rejected: {message}")]
    StreamWrite { failed: usize, message: String },

    /// A shard-scaling request was rejected. Always recoverable; the
    /// caller proceeds with the last known shard count.
    #[error("capacity control failed: {message}")]
    CapacityControl { message: String },

    /// Core model error (serialization).
    #[error(transparent)]
    Core(#[from] tally_core::Error),
}
