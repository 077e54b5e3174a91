//! Error types for the precache library.

use thiserror::Error;

/// Errors that can occur during cache synchronization.
#[derive(Error, Debug)]
pub enum Error {
    /// Fetching a resource during an install pass failed.
    ///
    /// Timeouts are reported through this variant too. A single fetch
    /// failure aborts the whole install; the active generation is untouched.
    #[error("fetch failed for {name}: {reason}")]
    Fetch {
        /// Logical name of the resource that failed to fetch.
        name: String,
        /// Human-readable failure reason.
        reason: String,
    },

    /// HTTP request error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// I/O error from blob storage or record persistence.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Promoting a staged generation failed.
    ///
    /// The active-generation pointer is never left half-updated: either the
    /// old generation is still fully active (record persistence failed
    /// before the swap) or the new one is (eviction failed after it).
    #[error("activation failed: {0}")]
    Activation(String),

    /// An install pass is already in flight or awaiting activation.
    #[error("an install is already in progress")]
    InstallInProgress,

    /// `activate` was called with no staged generation.
    #[error("no staged generation awaiting activation")]
    NoStagedGeneration,

    /// The manifest is malformed (duplicate logical names, bad JSON).
    #[error("invalid manifest: {0}")]
    Manifest(String),

    /// The control channel was closed before a reply arrived.
    #[error("control channel closed")]
    ControlClosed,
}

/// A specialized `Result` type for precache operations.
pub type Result<T> = std::result::Result<T, Error>;
