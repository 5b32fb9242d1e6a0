// src/store.rs
//
//! Object-store seam.
//!
//! [`ObjectStore`] is the exact set of object-store operations the engine
//! consumes, expressed with plain output records so adapters and tests do
//! not depend on SDK types. [`S3ObjectStore`] is the production
//! implementation over `aws-sdk-s3`; it owns ACL/SSE attachment and the
//! rendering of SDK errors into [`Error::Upstream`].

use std::pin::Pin;
use std::time::SystemTime;

use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{
    CompletedMultipartUpload, CompletedPart, ObjectCannedAcl, ServerSideEncryption,
};
use aws_sdk_s3::Client;
use bytes::Bytes;
use tokio::io::AsyncRead;
use tracing::debug;

use crate::config::{ServerSideEncryptionConfig, ServerSideEncryptionType};
use crate::constants::{LIST_DELIMITER, LIST_MAX_KEYS};
use crate::error::{Error, Result};

/// One-shot streaming body of a GET.
pub type ObjectBody = Pin<Box<dyn AsyncRead + Send>>;

/// HEAD result.
#[derive(Debug, Clone)]
pub struct HeadObjectInfo {
    pub content_length: i64,
    pub last_modified: Option<SystemTime>,
}

/// A single ACL grant, reduced to what mode derivation needs.
#[derive(Debug, Clone)]
pub struct AclGrant {
    pub grantee_id: Option<String>,
    pub grantee_uri: Option<String>,
    pub permission: String,
}

/// Object ACL: owner plus grants.
#[derive(Debug, Clone)]
pub struct ObjectAcl {
    pub owner_id: Option<String>,
    pub grants: Vec<AclGrant>,
}

/// One object row from a listing page.
#[derive(Debug, Clone)]
pub struct ListedObject {
    pub key: String,
    pub size: i64,
    pub last_modified: Option<SystemTime>,
}

/// One page of a delimiter listing.
#[derive(Debug, Clone, Default)]
pub struct ListObjectsPage {
    pub common_prefixes: Vec<String>,
    pub contents: Vec<ListedObject>,
    pub next_continuation_token: Option<String>,
}

/// ETag + part number of a successfully uploaded part.
#[derive(Debug, Clone)]
pub struct CompletedPartInfo {
    pub part_number: i32,
    pub etag: String,
}

/// The object-store operations the engine uses. Listing always applies the
/// `/` delimiter and the crate page size; bodies are borrowed slices (the
/// S3 impl owns the copy the SDK requires, keeping the pool's memory bound
/// exact).
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
        sse: &ServerSideEncryptionConfig,
    ) -> Result<ObjectBody>;

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: &[u8],
        sse: &ServerSideEncryptionConfig,
    ) -> Result<()>;

    /// Returns the upload id.
    async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        sse: &ServerSideEncryptionConfig,
    ) -> Result<String>;

    /// Returns the part's ETag.
    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: &[u8],
        sse: &ServerSideEncryptionConfig,
    ) -> Result<String>;

    /// `parts` must already be in part-number order.
    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPartInfo],
    ) -> Result<()>;

    async fn abort_multipart_upload(&self, bucket: &str, key: &str, upload_id: &str) -> Result<()>;

    async fn copy_object(
        &self,
        bucket: &str,
        src_key: &str,
        dest_key: &str,
        sse: &ServerSideEncryptionConfig,
    ) -> Result<()>;

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()>;

    async fn get_object_acl(&self, bucket: &str, key: &str) -> Result<ObjectAcl>;

    async fn head_object(&self, bucket: &str, key: &str) -> Result<HeadObjectInfo>;

    async fn list_objects_v2(
        &self,
        bucket: &str,
        prefix: &str,
        continuation: Option<&str>,
    ) -> Result<ListObjectsPage>;
}

/// Production implementation over the AWS SDK.
#[derive(Debug, Clone)]
pub struct S3ObjectStore {
    client: Client,
}

impl S3ObjectStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build from environment configuration (see `s3_client`).
    pub async fn from_env() -> Result<Self> {
        let client = crate::s3_client::aws_s3_client()
            .await
            .map_err(Error::upstream)?;
        Ok(Self::new(client))
    }
}

fn nil_if_empty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

fn sse_kind(sse: &ServerSideEncryptionConfig) -> Option<ServerSideEncryption> {
    match sse.sse_type {
        ServerSideEncryptionType::Kms => Some(ServerSideEncryption::AwsKms),
        _ => None,
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
        sse: &ServerSideEncryptionConfig,
    ) -> Result<ObjectBody> {
        debug!(bucket, key, "GetObject");
        let out = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .set_sse_customer_algorithm(sse.customer_algorithm().map(str::to_string))
            .set_sse_customer_key(nil_if_empty(&sse.customer_key))
            .set_sse_customer_key_md5(nil_if_empty(&sse.customer_key_md5))
            .send()
            .await
            .map_err(Error::upstream)?;
        Ok(Box::pin(out.body.into_async_read()))
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: &[u8],
        sse: &ServerSideEncryptionConfig,
    ) -> Result<()> {
        debug!(bucket, key, len = body.len(), "PutObject");
        self.client
            .put_object()
            .acl(ObjectCannedAcl::Private)
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(Bytes::copy_from_slice(body)))
            .set_server_side_encryption(sse_kind(sse))
            .set_sse_customer_algorithm(sse.customer_algorithm().map(str::to_string))
            .set_sse_customer_key(nil_if_empty(&sse.customer_key))
            .set_sse_customer_key_md5(nil_if_empty(&sse.customer_key_md5))
            .set_ssekms_key_id(nil_if_empty(&sse.kms_key_id))
            .send()
            .await
            .map_err(Error::upstream)?;
        Ok(())
    }

    async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        sse: &ServerSideEncryptionConfig,
    ) -> Result<String> {
        debug!(bucket, key, "CreateMultipartUpload");
        let out = self
            .client
            .create_multipart_upload()
            .acl(ObjectCannedAcl::Private)
            .bucket(bucket)
            .key(key)
            .set_server_side_encryption(sse_kind(sse))
            .set_sse_customer_algorithm(sse.customer_algorithm().map(str::to_string))
            .set_sse_customer_key(nil_if_empty(&sse.customer_key))
            .set_sse_customer_key_md5(nil_if_empty(&sse.customer_key_md5))
            .set_ssekms_key_id(nil_if_empty(&sse.kms_key_id))
            .send()
            .await
            .map_err(Error::upstream)?;
        let upload_id = out.upload_id().unwrap_or_default().to_string();
        if upload_id.is_empty() {
            return Err(Error::UploadFailure(
                "CreateMultipartUpload returned empty upload id".to_string(),
            ));
        }
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: &[u8],
        sse: &ServerSideEncryptionConfig,
    ) -> Result<String> {
        debug!(bucket, key, upload_id, part_number, len = body.len(), "UploadPart");
        let out = self
            .client
            .upload_part()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .body(ByteStream::from(Bytes::copy_from_slice(body)))
            .set_sse_customer_algorithm(sse.customer_algorithm().map(str::to_string))
            .set_sse_customer_key(nil_if_empty(&sse.customer_key))
            .set_sse_customer_key_md5(nil_if_empty(&sse.customer_key_md5))
            .send()
            .await
            .map_err(Error::upstream)?;
        Ok(out.e_tag().unwrap_or_default().to_string())
    }

    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPartInfo],
    ) -> Result<()> {
        debug!(bucket, key, upload_id, parts = parts.len(), "CompleteMultipartUpload");
        let completed: Vec<CompletedPart> = parts
            .iter()
            .map(|p| {
                CompletedPart::builder()
                    .set_e_tag(Some(p.etag.clone()))
                    .set_part_number(Some(p.part_number))
                    .build()
            })
            .collect();
        let cmu = CompletedMultipartUpload::builder()
            .set_parts(Some(completed))
            .build();
        self.client
            .complete_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(cmu)
            .send()
            .await
            .map_err(Error::upstream)?;
        Ok(())
    }

    async fn abort_multipart_upload(&self, bucket: &str, key: &str, upload_id: &str) -> Result<()> {
        debug!(bucket, key, upload_id, "AbortMultipartUpload");
        self.client
            .abort_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(Error::upstream)?;
        Ok(())
    }

    async fn copy_object(
        &self,
        bucket: &str,
        src_key: &str,
        dest_key: &str,
        sse: &ServerSideEncryptionConfig,
    ) -> Result<()> {
        let copy_source = format!("{}/{}", bucket, src_key);
        debug!(bucket, copy_source, dest_key, "CopyObject");
        self.client
            .copy_object()
            .acl(ObjectCannedAcl::Private)
            .bucket(bucket)
            .copy_source(copy_source)
            .key(dest_key)
            .set_server_side_encryption(sse_kind(sse))
            .set_sse_customer_algorithm(sse.customer_algorithm().map(str::to_string))
            .set_sse_customer_key(nil_if_empty(&sse.customer_key))
            .set_sse_customer_key_md5(nil_if_empty(&sse.customer_key_md5))
            .set_ssekms_key_id(nil_if_empty(&sse.kms_key_id))
            .send()
            .await
            .map_err(Error::upstream)?;
        Ok(())
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        debug!(bucket, key, "DeleteObject");
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(Error::upstream)?;
        Ok(())
    }

    async fn get_object_acl(&self, bucket: &str, key: &str) -> Result<ObjectAcl> {
        debug!(bucket, key, "GetObjectAcl");
        let out = self
            .client
            .get_object_acl()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(Error::upstream)?;
        let owner_id = out.owner().and_then(|o| o.id()).map(str::to_string);
        let grants = out
            .grants()
            .iter()
            .map(|g| AclGrant {
                grantee_id: g.grantee().and_then(|x| x.id()).map(str::to_string),
                grantee_uri: g.grantee().and_then(|x| x.uri()).map(str::to_string),
                permission: g
                    .permission()
                    .map(|p| p.as_str().to_string())
                    .unwrap_or_default(),
            })
            .collect();
        Ok(ObjectAcl { owner_id, grants })
    }

    async fn head_object(&self, bucket: &str, key: &str) -> Result<HeadObjectInfo> {
        debug!(bucket, key, "HeadObject");
        let out = self
            .client
            .head_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(Error::upstream)?;
        Ok(HeadObjectInfo {
            content_length: out.content_length().unwrap_or_default(),
            last_modified: out
                .last_modified()
                .and_then(|t| SystemTime::try_from(*t).ok()),
        })
    }

    async fn list_objects_v2(
        &self,
        bucket: &str,
        prefix: &str,
        continuation: Option<&str>,
    ) -> Result<ListObjectsPage> {
        debug!(bucket, prefix, continuation, "ListObjectsV2");
        let out = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .prefix(prefix)
            .delimiter(LIST_DELIMITER)
            .max_keys(LIST_MAX_KEYS)
            .set_continuation_token(continuation.map(str::to_string))
            .send()
            .await
            .map_err(Error::upstream)?;
        let common_prefixes = out
            .common_prefixes()
            .iter()
            .filter_map(|p| p.prefix().map(str::to_string))
            .collect();
        let contents = out
            .contents()
            .iter()
            .map(|o| ListedObject {
                key: o.key().unwrap_or_default().to_string(),
                size: o.size().unwrap_or_default(),
                last_modified: o
                    .last_modified()
                    .and_then(|t| SystemTime::try_from(*t).ok()),
            })
            .collect();
        Ok(ListObjectsPage {
            common_prefixes,
            contents,
            next_continuation_token: out.next_continuation_token().map(str::to_string),
        })
    }
}
