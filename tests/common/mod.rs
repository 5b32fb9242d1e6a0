// tests/common/mod.rs
//
// Common test utilities: an in-memory ObjectStore with a recorded call log,
// scripted listings/ACL/HEAD responses and failure injection.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;

use s3gate::config::ServerSideEncryptionConfig;
use s3gate::error::{Error, Result};
use s3gate::store::{
    AclGrant, CompletedPartInfo, HeadObjectInfo, ListObjectsPage, ObjectAcl, ObjectBody,
    ObjectStore,
};

/// One recorded object-store call.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    GetObject { key: String },
    PutObject { key: String, body: Vec<u8> },
    CreateMultipartUpload { key: String },
    UploadPart { key: String, upload_id: String, part_number: i32, body: Vec<u8> },
    CompleteMultipartUpload { key: String, upload_id: String, parts: Vec<(i32, String)> },
    AbortMultipartUpload { key: String, upload_id: String },
    CopyObject { src: String, dest: String },
    DeleteObject { key: String },
    GetObjectAcl { key: String },
    HeadObject { key: String },
    ListObjectsV2 { prefix: String, continuation: Option<String> },
}

impl Call {
    pub fn name(&self) -> &'static str {
        match self {
            Call::GetObject { .. } => "GetObject",
            Call::PutObject { .. } => "PutObject",
            Call::CreateMultipartUpload { .. } => "CreateMultipartUpload",
            Call::UploadPart { .. } => "UploadPart",
            Call::CompleteMultipartUpload { .. } => "CompleteMultipartUpload",
            Call::AbortMultipartUpload { .. } => "AbortMultipartUpload",
            Call::CopyObject { .. } => "CopyObject",
            Call::DeleteObject { .. } => "DeleteObject",
            Call::GetObjectAcl { .. } => "GetObjectAcl",
            Call::HeadObject { .. } => "HeadObject",
            Call::ListObjectsV2 { .. } => "ListObjectsV2",
        }
    }
}

#[derive(Default)]
struct MockState {
    calls: Vec<Call>,
    objects: HashMap<String, Vec<u8>>,
    acls: HashMap<String, ObjectAcl>,
    heads: HashMap<String, HeadObjectInfo>,
    /// Pages served in order: continuation `None` serves page 0, `Some(i)`
    /// serves page i.
    list_pages: Vec<ListObjectsPage>,
    uploads: HashMap<String, Vec<(i32, Vec<u8>)>>,
    next_upload_id: usize,
    fail_put: bool,
    fail_create: bool,
    fail_complete: bool,
    fail_list: bool,
    fail_part_numbers: Vec<i32>,
}

/// In-memory object store with scripted responses.
#[derive(Default)]
pub struct MockObjectStore {
    state: Mutex<MockState>,
}

impl MockObjectStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_object(self: &Arc<Self>, key: &str, body: &[u8]) -> Arc<Self> {
        self.lock().objects.insert(key.to_string(), body.to_vec());
        Arc::clone(self)
    }

    pub fn set_acl(&self, key: &str, acl: ObjectAcl) {
        self.lock().acls.insert(key.to_string(), acl);
    }

    pub fn set_head(&self, key: &str, head: HeadObjectInfo) {
        self.lock().heads.insert(key.to_string(), head);
    }

    /// Script listing pages; continuation tokens are chained automatically.
    pub fn script_list_pages(&self, mut pages: Vec<ListObjectsPage>) {
        let n = pages.len();
        for (i, page) in pages.iter_mut().enumerate() {
            page.next_continuation_token =
                if i + 1 < n { Some((i + 1).to_string()) } else { None };
        }
        self.lock().list_pages = pages;
    }

    pub fn fail_put(&self) {
        self.lock().fail_put = true;
    }

    pub fn fail_create(&self) {
        self.lock().fail_create = true;
    }

    pub fn fail_complete(&self) {
        self.lock().fail_complete = true;
    }

    pub fn fail_list(&self) {
        self.lock().fail_list = true;
    }

    pub fn fail_upload_part(&self, part_number: i32) {
        self.lock().fail_part_numbers.push(part_number);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    pub fn call_count(&self, name: &str) -> usize {
        self.lock().calls.iter().filter(|c| c.name() == name).count()
    }

    /// Final materialized bytes of an object, if any.
    pub fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.lock().objects.get(key).cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().expect("mock store lock poisoned")
    }
}

#[async_trait]
impl ObjectStore for MockObjectStore {
    async fn get_object(
        &self,
        _bucket: &str,
        key: &str,
        _sse: &ServerSideEncryptionConfig,
    ) -> Result<ObjectBody> {
        let mut state = self.lock();
        state.calls.push(Call::GetObject { key: key.to_string() });
        match state.objects.get(key) {
            Some(body) => {
                let body: ObjectBody = Box::pin(Cursor::new(body.clone()));
                Ok(body)
            }
            None => Err(Error::Upstream("NoSuchKey".to_string())),
        }
    }

    async fn put_object(
        &self,
        _bucket: &str,
        key: &str,
        body: &[u8],
        _sse: &ServerSideEncryptionConfig,
    ) -> Result<()> {
        let mut state = self.lock();
        state.calls.push(Call::PutObject { key: key.to_string(), body: body.to_vec() });
        if state.fail_put {
            return Err(Error::Upstream("injected PutObject failure".to_string()));
        }
        state.objects.insert(key.to_string(), body.to_vec());
        Ok(())
    }

    async fn create_multipart_upload(
        &self,
        _bucket: &str,
        key: &str,
        _sse: &ServerSideEncryptionConfig,
    ) -> Result<String> {
        let mut state = self.lock();
        state.calls.push(Call::CreateMultipartUpload { key: key.to_string() });
        if state.fail_create {
            return Err(Error::Upstream("injected CreateMultipartUpload failure".to_string()));
        }
        state.next_upload_id += 1;
        let upload_id = format!("upload-{}", state.next_upload_id);
        state.uploads.insert(upload_id.clone(), Vec::new());
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        _bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: &[u8],
        _sse: &ServerSideEncryptionConfig,
    ) -> Result<String> {
        let mut state = self.lock();
        state.calls.push(Call::UploadPart {
            key: key.to_string(),
            upload_id: upload_id.to_string(),
            part_number,
            body: body.to_vec(),
        });
        if state.fail_part_numbers.contains(&part_number) {
            return Err(Error::Upstream(format!(
                "injected UploadPart failure for part {part_number}"
            )));
        }
        if let Some(parts) = state.uploads.get_mut(upload_id) {
            parts.push((part_number, body.to_vec()));
        }
        Ok(format!("etag-{part_number}"))
    }

    async fn complete_multipart_upload(
        &self,
        _bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPartInfo],
    ) -> Result<()> {
        let mut state = self.lock();
        state.calls.push(Call::CompleteMultipartUpload {
            key: key.to_string(),
            upload_id: upload_id.to_string(),
            parts: parts.iter().map(|p| (p.part_number, p.etag.clone())).collect(),
        });
        if state.fail_complete {
            return Err(Error::Upstream("injected CompleteMultipartUpload failure".to_string()));
        }
        let uploaded = state.uploads.remove(upload_id).unwrap_or_default();
        let mut body = Vec::new();
        for part in parts {
            if let Some((_, bytes)) = uploaded.iter().find(|(n, _)| *n == part.part_number) {
                body.extend_from_slice(bytes);
            }
        }
        state.objects.insert(key.to_string(), body);
        Ok(())
    }

    async fn abort_multipart_upload(
        &self,
        _bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> Result<()> {
        let mut state = self.lock();
        state.calls.push(Call::AbortMultipartUpload {
            key: key.to_string(),
            upload_id: upload_id.to_string(),
        });
        state.uploads.remove(upload_id);
        Ok(())
    }

    async fn copy_object(
        &self,
        _bucket: &str,
        src_key: &str,
        dest_key: &str,
        _sse: &ServerSideEncryptionConfig,
    ) -> Result<()> {
        let mut state = self.lock();
        state.calls.push(Call::CopyObject {
            src: src_key.to_string(),
            dest: dest_key.to_string(),
        });
        match state.objects.get(src_key).cloned() {
            Some(body) => {
                state.objects.insert(dest_key.to_string(), body);
                Ok(())
            }
            None => Err(Error::Upstream("NoSuchKey".to_string())),
        }
    }

    async fn delete_object(&self, _bucket: &str, key: &str) -> Result<()> {
        let mut state = self.lock();
        state.calls.push(Call::DeleteObject { key: key.to_string() });
        state.objects.remove(key);
        Ok(())
    }

    async fn get_object_acl(&self, _bucket: &str, key: &str) -> Result<ObjectAcl> {
        let mut state = self.lock();
        state.calls.push(Call::GetObjectAcl { key: key.to_string() });
        state
            .acls
            .get(key)
            .cloned()
            .ok_or_else(|| Error::Upstream("AccessDenied".to_string()))
    }

    async fn head_object(&self, _bucket: &str, key: &str) -> Result<HeadObjectInfo> {
        let mut state = self.lock();
        state.calls.push(Call::HeadObject { key: key.to_string() });
        state
            .heads
            .get(key)
            .cloned()
            .ok_or_else(|| Error::Upstream("NotFound".to_string()))
    }

    async fn list_objects_v2(
        &self,
        _bucket: &str,
        prefix: &str,
        continuation: Option<&str>,
    ) -> Result<ListObjectsPage> {
        let mut state = self.lock();
        state.calls.push(Call::ListObjectsV2 {
            prefix: prefix.to_string(),
            continuation: continuation.map(str::to_string),
        });
        if state.fail_list {
            return Err(Error::Upstream("injected ListObjectsV2 failure".to_string()));
        }
        let index = match continuation {
            None => 0,
            Some(token) => token.parse::<usize>().expect("scripted continuation token"),
        };
        Ok(state.list_pages.get(index).cloned().unwrap_or_default())
    }
}

/// Owner FULL_CONTROL grant for ACL scripting.
pub fn owner_full_control(owner_id: &str) -> ObjectAcl {
    ObjectAcl {
        owner_id: Some(owner_id.to_string()),
        grants: vec![AclGrant {
            grantee_id: Some(owner_id.to_string()),
            grantee_uri: None,
            permission: "FULL_CONTROL".to_string(),
        }],
    }
}

pub fn all_users_read_grant() -> AclGrant {
    AclGrant {
        grantee_id: None,
        grantee_uri: Some("http://acs.amazonaws.com/groups/global/AllUsers".to_string()),
        permission: "READ".to_string(),
    }
}

pub fn epoch_secs(secs: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(secs)
}
