// src/config.rs
//
//! Configuration surface for the I/O engine.
//!
//! These are plain structs filled in by the embedding server (config-file
//! parsing lives outside this crate). Defaults come from `constants`.

use crate::constants::{
    DEFAULT_LISTER_LOOKBACK_BUFFER_SIZE, DEFAULT_PART_SIZE, DEFAULT_POOL_CAPACITY,
    DEFAULT_READER_LOOKBACK_BUFFER_SIZE, DEFAULT_READER_MIN_CHUNK_SIZE, DEFAULT_UPLOAD_WORKERS,
};
use crate::path::ObjectKey;

/// Per-bucket operation gates.
#[derive(Debug, Clone, Copy)]
pub struct Perms {
    pub readable: bool,
    pub listable: bool,
    pub writable: bool,
}

impl Default for Perms {
    fn default() -> Self {
        Self { readable: true, listable: true, writable: true }
    }
}

/// Server-side encryption mode for objects this gateway creates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServerSideEncryptionType {
    #[default]
    None,
    Kms,
    CustomerKey,
}

/// SSE parameters attached to every mutating object-store call.
#[derive(Debug, Clone, Default)]
pub struct ServerSideEncryptionConfig {
    pub sse_type: ServerSideEncryptionType,
    pub customer_key: String,
    pub customer_key_md5: String,
    pub kms_key_id: String,
}

impl ServerSideEncryptionConfig {
    /// Customer-key algorithm; only AES256 is supported.
    pub fn customer_algorithm(&self) -> Option<&'static str> {
        match self.sse_type {
            ServerSideEncryptionType::CustomerKey => Some("AES256"),
            _ => None,
        }
    }
}

/// One exposed bucket: where it lives and what sessions may do with it.
#[derive(Debug, Clone)]
pub struct BucketConfig {
    pub bucket: String,
    /// Key prefix under which this bucket's tree is rooted.
    pub key_prefix: ObjectKey,
    pub perms: Perms,
    pub server_side_encryption: ServerSideEncryptionConfig,
    /// Maximum object size in bytes; negative means unlimited.
    pub max_object_size: i64,
}

impl BucketConfig {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key_prefix: ObjectKey::root(),
            perms: Perms::default(),
            server_side_encryption: ServerSideEncryptionConfig::default(),
            max_object_size: -1,
        }
    }
}

/// Engine-wide tuning knobs shared by all sessions.
#[derive(Debug, Clone)]
pub struct TuningConfig {
    /// Bytes the reader keeps behind its cursor for backward re-reads.
    pub reader_lookback_buffer_size: usize,
    /// Minimum bytes fetched per underlying reader fill.
    pub reader_min_chunk_size: usize,
    /// Directory entries the lister keeps behind its cursor.
    pub lister_lookback_buffer_size: usize,
    /// Upload part size; also the pool buffer size.
    pub part_size: usize,
    /// Number of part buffers in the upload memory pool.
    pub pool_capacity: usize,
    /// Number of upload workers.
    pub workers: usize,
}

impl Default for TuningConfig {
    fn default() -> Self {
        Self {
            reader_lookback_buffer_size: DEFAULT_READER_LOOKBACK_BUFFER_SIZE,
            reader_min_chunk_size: DEFAULT_READER_MIN_CHUNK_SIZE,
            lister_lookback_buffer_size: DEFAULT_LISTER_LOOKBACK_BUFFER_SIZE,
            part_size: DEFAULT_PART_SIZE,
            pool_capacity: DEFAULT_POOL_CAPACITY,
            workers: DEFAULT_UPLOAD_WORKERS,
        }
    }
}

/// Per-session user identity, resolved by the protocol server.
#[derive(Debug, Clone, Default)]
pub struct UserInfo {
    /// Path prefix (relative to the bucket's key prefix) this user is
    /// rooted at.
    pub root_path: String,
}
