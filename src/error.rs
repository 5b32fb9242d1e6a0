// src/error.rs
//
//! Crate-wide error type.
//!
//! One variant per failure kind the gateway distinguishes. The enum is
//! `Clone` so a writer's sticky error can be handed back from every
//! subsequent `write_at`/`close` call; object-store SDK errors are rendered
//! into `Upstream` at the `S3ObjectStore` boundary.

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Operation disallowed by per-bucket permissions.
    #[error("{0} operation not allowed as per configuration")]
    PermissionDenied(&'static str),

    /// Read/list cursor fell below the adapter's discardable-history boundary.
    #[error("supplied position is out of range")]
    OutOfRange,

    /// Stat resolution exhausted ACL, HEAD, and the listing probe.
    #[error("no such file or directory")]
    NotExist,

    /// Read attempted on a key with an in-flight upload.
    #[error("trying to download an uploading file")]
    PhantomConflict,

    /// Session or request context ended.
    #[error("operation canceled")]
    Cancelled,

    /// The memory buffer pool is closed and cannot block further.
    #[error("upload memory buffer pool exhausted")]
    Exhausted,

    /// Multipart create/upload/complete failed, or a gap was found at close.
    #[error("{0}")]
    UploadFailure(String),

    /// Write past the configured maximum object size.
    #[error("file too large: maximum allowed size is {0} bytes")]
    TooLarge(i64),

    /// Unknown list-family protocol method.
    #[error("unsupported method: {0}")]
    Unsupported(String),

    /// Any other object-store error.
    #[error("{0}")]
    Upstream(String),
}

impl Error {
    /// Render an object-store SDK error into the `Upstream` kind.
    pub fn upstream(err: impl std::fmt::Display) -> Self {
        Error::Upstream(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
