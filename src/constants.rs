// src/constants.rs
//
// Centralized tuning defaults to avoid hardcoded values throughout the codebase.

/// Default upload part size (5 MiB - the S3 minimum for multipart parts).
/// This is also the size of every buffer handed out by the memory pool.
pub const DEFAULT_PART_SIZE: usize = 5 * 1024 * 1024;

/// Default number of part buffers in the upload memory pool.
/// Total upload memory is capped at `pool_capacity * part_size`.
pub const DEFAULT_POOL_CAPACITY: usize = 16;

/// Default number of upload workers draining the part channel.
pub const DEFAULT_UPLOAD_WORKERS: usize = 4;

/// Default reader lookback (1 MiB).
/// Bytes retained behind the read cursor so slightly backward re-reads
/// succeed without re-issuing a GET.
pub const DEFAULT_READER_LOOKBACK_BUFFER_SIZE: usize = 1024 * 1024;

/// Default minimum chunk for reader fills (64 KiB).
/// Forward progress costs one merged network read of at least this size.
pub const DEFAULT_READER_MIN_CHUNK_SIZE: usize = 64 * 1024;

/// Default lister lookback, in directory entries.
pub const DEFAULT_LISTER_LOOKBACK_BUFFER_SIZE: usize = 100;

/// Page size for ListObjectsV2 requests.
pub const LIST_MAX_KEYS: i32 = 10000;

/// Delimiter used for all directory-style listings.
pub const LIST_DELIMITER: &str = "/";
