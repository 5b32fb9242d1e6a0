// src/lib.rs
//
// Crate root - module list plus public re-exports.
//
// s3gate is the object-store I/O engine of an SFTP-to-S3 gateway. The
// protocol server hands each session a `BucketIO`; the adapters below turn
// its random-access reads, writes and listings into one-shot GET streams,
// multipart uploads and paginated delimiter listings.

pub mod bucketio;
pub mod config;
pub mod constants;
pub mod error;
pub mod lister;
pub mod memory;
pub mod multipart;
pub mod path;
pub mod phantom;
pub mod ranges;
pub mod reader;
pub mod s3_client;
pub mod store;

pub use crate::bucketio::{BucketIO, Gateway, Request};
pub use crate::config::{
    BucketConfig, Perms, ServerSideEncryptionConfig, ServerSideEncryptionType, TuningConfig,
    UserInfo,
};
pub use crate::error::{Error, Result};
pub use crate::lister::{
    acl_to_mode, DirectoryLister, FileMode, ListerAt, ObjectFileInfo, ObjectStat,
};
pub use crate::memory::MemoryBufferPool;
pub use crate::multipart::{MultipartUploadWriter, PartUploadState, UploadWorkers};
pub use crate::path::ObjectKey;
pub use crate::phantom::{PhantomObjectEntry, PhantomObjectInfo, PhantomObjectMap};
pub use crate::ranges::OffsetRanges;
pub use crate::reader::ObjectReader;
pub use crate::store::{
    AclGrant, CompletedPartInfo, HeadObjectInfo, ListObjectsPage, ListedObject, ObjectAcl,
    ObjectBody, ObjectStore, S3ObjectStore,
};
