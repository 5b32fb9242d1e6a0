// src/bucketio.rs
//
//! Gateway wiring and the per-session facade.
//!
//! [`Gateway`] constructs the process-wide collaborators once (memory
//! pool, phantom map, upload workers and their channel) and injects them
//! into every [`BucketIO`]. A `BucketIO` serves one client session: it
//! gates each protocol request on the bucket's permissions, resolves the
//! request path under the session's key prefix, and hands back the
//! matching adapter.

use std::sync::Arc;
use std::time::SystemTime;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::{BucketConfig, TuningConfig, UserInfo};
use crate::error::{Error, Result};
use crate::lister::{DirectoryLister, ListerAt, ObjectStat};
use crate::memory::MemoryBufferPool;
use crate::multipart::{MultipartUploadWriter, UploadJob, UploadWorkers};
use crate::path::ObjectKey;
use crate::phantom::{PhantomObjectInfo, PhantomObjectMap};
use crate::reader::ObjectReader;
use crate::store::ObjectStore;

/// One protocol request as the file-transfer server hands it over.
#[derive(Debug, Clone)]
pub struct Request {
    /// Protocol method: `Get`, `Put`, `Rename`, `Remove`, `Mkdir`,
    /// `Rmdir`, `Stat`, `ReadLink`, `List`.
    pub method: String,
    pub filepath: String,
    /// Rename destination; empty otherwise.
    pub target: String,
    /// Cancelled when the request is abandoned.
    pub token: CancellationToken,
}

impl Request {
    pub fn new(method: impl Into<String>, filepath: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            filepath: filepath.into(),
            target: String::new(),
            token: CancellationToken::new(),
        }
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = target.into();
        self
    }
}

/// A token cancelled as soon as either input token is.
fn combine_tokens(a: &CancellationToken, b: &CancellationToken) -> CancellationToken {
    let combined = CancellationToken::new();
    let child = combined.clone();
    let a = a.clone();
    let b = b.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = a.cancelled() => {}
            _ = b.cancelled() => {}
        }
        child.cancel();
    });
    combined
}

/// Process-wide engine state, built once and shared by all sessions.
pub struct Gateway {
    tuning: TuningConfig,
    token: CancellationToken,
    pool: Arc<MemoryBufferPool>,
    phantoms: Arc<PhantomObjectMap>,
    upload_tx: mpsc::Sender<UploadJob>,
    workers: Option<UploadWorkers>,
}

impl Gateway {
    pub fn new(tuning: TuningConfig, token: CancellationToken) -> Self {
        let pool = MemoryBufferPool::new(tuning.pool_capacity, tuning.part_size);
        let phantoms = PhantomObjectMap::new();
        let (workers, upload_tx) = UploadWorkers::start(token.clone(), tuning.workers);
        Self {
            tuning,
            token,
            pool,
            phantoms,
            upload_tx,
            workers: Some(workers),
        }
    }

    pub fn pool(&self) -> &Arc<MemoryBufferPool> {
        &self.pool
    }

    pub fn phantoms(&self) -> &Arc<PhantomObjectMap> {
        &self.phantoms
    }

    /// Build the facade for one client session.
    pub fn bucket_io(
        &self,
        session_token: CancellationToken,
        bucket: Arc<BucketConfig>,
        store: Arc<dyn ObjectStore>,
        user: &UserInfo,
    ) -> BucketIO {
        let key_prefix = bucket.key_prefix.join(&ObjectKey::parse(&user.root_path));
        BucketIO {
            token: session_token,
            bucket,
            store,
            tuning: self.tuning.clone(),
            pool: Arc::clone(&self.pool),
            phantoms: Arc::clone(&self.phantoms),
            upload_tx: self.upload_tx.clone(),
            key_prefix,
        }
    }

    /// Stop the workers and wait for them to drain.
    pub async fn shutdown(mut self) {
        self.token.cancel();
        self.pool.close();
        if let Some(workers) = self.workers.take() {
            workers.wait_for_completion().await;
        }
    }
}

/// Per-session I/O facade over one bucket.
pub struct BucketIO {
    token: CancellationToken,
    bucket: Arc<BucketConfig>,
    store: Arc<dyn ObjectStore>,
    tuning: TuningConfig,
    pool: Arc<MemoryBufferPool>,
    phantoms: Arc<PhantomObjectMap>,
    upload_tx: mpsc::Sender<UploadJob>,
    key_prefix: ObjectKey,
}

impl BucketIO {
    fn build_key(&self, path: &str) -> ObjectKey {
        self.key_prefix.join(&ObjectKey::parse(path))
    }

    /// `Get`: open a streaming random-access reader for the object.
    /// Rejected while the key has an in-flight upload.
    pub async fn file_read(&self, req: &Request) -> Result<ObjectReader> {
        if !self.bucket.perms.readable {
            return Err(Error::PermissionDenied("read"));
        }
        let key = self.build_key(&req.filepath);
        if self.phantoms.get(&key).is_some() {
            return Err(Error::PhantomConflict);
        }

        let key_str = key.to_string();
        let token = combine_tokens(&self.token, &req.token);
        info!(method = %req.method, bucket = %self.bucket.bucket, key = %key_str, "user downloading key");
        let body = self
            .store
            .get_object(&self.bucket.bucket, &key_str, &self.bucket.server_side_encryption)
            .await?;
        Ok(ObjectReader::new(
            token,
            body,
            self.tuning.reader_lookback_buffer_size,
            self.tuning.reader_min_chunk_size,
        ))
    }

    /// `Put`: open a random-access upload writer. The key becomes visible
    /// as a phantom until the writer is closed.
    pub async fn file_write(&self, req: &Request) -> Result<MultipartUploadWriter> {
        if !self.bucket.perms.writable {
            return Err(Error::PermissionDenied("write"));
        }
        let key = self.build_key(&req.filepath);
        let info = PhantomObjectInfo::new(key.clone(), SystemTime::now());
        info!(method = %req.method, bucket = %self.bucket.bucket, key = %key, "user uploading key");
        let writer = MultipartUploadWriter::new(
            combine_tokens(&self.token, &req.token),
            Arc::clone(&self.store),
            self.bucket.bucket.clone(),
            self.bucket.server_side_encryption.clone(),
            self.bucket.max_object_size,
            Arc::clone(&self.pool),
            Arc::clone(&self.phantoms),
            Arc::clone(&info),
            self.upload_tx.clone(),
        );
        self.phantoms.add(&info);
        Ok(writer)
    }

    /// `Rename`/`Remove`/`Mkdir`/`Rmdir`. Operations on phantom keys never
    /// touch the object store.
    pub async fn file_cmd(&self, req: &Request) -> Result<()> {
        match req.method.as_str() {
            "Rename" => {
                if !self.bucket.perms.writable {
                    return Err(Error::PermissionDenied("write"));
                }
                let src = self.build_key(&req.filepath);
                let dest = self.build_key(&req.target);
                if self.phantoms.rename(&src, &dest) {
                    debug!(src = %src, dest = %dest, "renamed phantom object");
                    return Ok(());
                }
                let src_str = src.to_string();
                let dest_str = dest.to_string();
                info!(bucket = %self.bucket.bucket, key = %src_str, dest = %dest_str, "renaming key");
                self.store
                    .copy_object(
                        &self.bucket.bucket,
                        &src_str,
                        &dest_str,
                        &self.bucket.server_side_encryption,
                    )
                    .await?;
                self.store.delete_object(&self.bucket.bucket, &src_str).await?;
                Ok(())
            }
            "Remove" => {
                if !self.bucket.perms.writable {
                    return Err(Error::PermissionDenied("write"));
                }
                let key = self.build_key(&req.filepath);
                if self.phantoms.remove(&key).is_some() {
                    debug!(key = %key, "removed phantom object");
                    return Ok(());
                }
                let key_str = key.to_string();
                info!(bucket = %self.bucket.bucket, key = %key_str, "deleting key");
                self.store.delete_object(&self.bucket.bucket, &key_str).await
            }
            "Mkdir" => {
                if !self.bucket.perms.writable {
                    return Err(Error::PermissionDenied("write"));
                }
                let key_str = format!("{}/", self.build_key(&req.filepath));
                info!(bucket = %self.bucket.bucket, key = %key_str, "creating directory");
                self.store
                    .put_object(
                        &self.bucket.bucket,
                        &key_str,
                        &[],
                        &self.bucket.server_side_encryption,
                    )
                    .await
            }
            "Rmdir" => {
                if !self.bucket.perms.writable {
                    return Err(Error::PermissionDenied("write"));
                }
                // Deletes the placeholder object only; emptiness of the
                // prefix is not checked.
                let key_str = format!("{}/", self.build_key(&req.filepath));
                info!(bucket = %self.bucket.bucket, key = %key_str, "deleting directory");
                self.store.delete_object(&self.bucket.bucket, &key_str).await
            }
            _ => Ok(()),
        }
    }

    /// `Stat`/`ReadLink`/`List`: hand back the matching lister.
    pub async fn file_list(&self, req: &Request) -> Result<Box<dyn ListerAt>> {
        match req.method.as_str() {
            "Stat" | "ReadLink" => {
                if !self.bucket.perms.readable && !self.bucket.perms.listable {
                    return Err(Error::PermissionDenied("stat"));
                }
                let key = self.build_key(&req.filepath);
                info!(method = %req.method, bucket = %self.bucket.bucket, key = %key, "user read path stats");
                Ok(Box::new(ObjectStat {
                    token: combine_tokens(&self.token, &req.token),
                    store: Arc::clone(&self.store),
                    bucket: self.bucket.bucket.clone(),
                    root: key == self.bucket.key_prefix,
                    key,
                    phantoms: Arc::clone(&self.phantoms),
                }))
            }
            "List" => {
                if !self.bucket.perms.listable {
                    return Err(Error::PermissionDenied("listing"));
                }
                let prefix = self.build_key(&req.filepath);
                info!(method = %req.method, bucket = %self.bucket.bucket, prefix = %prefix, "user listed path");
                Ok(Box::new(DirectoryLister::new(
                    combine_tokens(&self.token, &req.token),
                    Arc::clone(&self.store),
                    self.bucket.bucket.clone(),
                    prefix,
                    self.tuning.lister_lookback_buffer_size,
                    Arc::clone(&self.phantoms),
                )))
            }
            method => Err(Error::Unsupported(method.to_string())),
        }
    }
}
