// src/lister.rs
//
//! Directory listing and stat resolution.
//!
//! [`DirectoryLister`] folds paginated delimiter listings plus in-flight
//! uploads into one random-access `list_at` sequence with the same
//! lookback discipline as the reader. [`ObjectStat`] resolves a single key
//! to a file entry, consulting the phantom map first and falling back to
//! ACL+HEAD, then to a listing probe for directories.

use std::ops::{BitOr, BitOrAssign};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{Error, Result};
use crate::path::ObjectKey;
use crate::phantom::PhantomObjectMap;
use crate::store::{AclGrant, ObjectStore};

const AUTHENTICATED_USERS_URI: &str =
    "http://acs.amazonaws.com/groups/global/AuthenticatedUsers";
const ALL_USERS_URI: &str = "http://acs.amazonaws.com/groups/global/AllUsers";

/// POSIX-style mode bits synthesized for object entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FileMode(pub u32);

impl FileMode {
    pub const DIR: FileMode = FileMode(0o040000);

    pub fn is_dir(self) -> bool {
        self.0 & Self::DIR.0 != 0
    }

    pub fn bits(self) -> u32 {
        self.0
    }
}

impl BitOr for FileMode {
    type Output = FileMode;
    fn bitor(self, rhs: FileMode) -> FileMode {
        FileMode(self.0 | rhs.0)
    }
}

impl BitOrAssign for FileMode {
    fn bitor_assign(&mut self, rhs: FileMode) {
        self.0 |= rhs.0;
    }
}

/// One entry returned by `list_at`.
#[derive(Debug, Clone, Default)]
pub struct ObjectFileInfo {
    pub name: String,
    pub last_modified: Option<SystemTime>,
    pub size: i64,
    pub mode: FileMode,
}

impl ObjectFileInfo {
    pub fn is_dir(&self) -> bool {
        self.mode.is_dir()
    }

    fn dir(name: impl Into<String>, last_modified: Option<SystemTime>) -> Self {
        Self {
            name: name.into(),
            last_modified,
            size: 0,
            mode: FileMode(0o755) | FileMode::DIR,
        }
    }

    fn phantom(name: impl Into<String>, last_modified: SystemTime, size: i64) -> Self {
        Self {
            name: name.into(),
            last_modified: Some(last_modified),
            size,
            mode: FileMode(0o600),
        }
    }
}

/// Synthetic timestamp for `.`/`..` and directory entries (epoch + 1s).
fn synthetic_time() -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(1)
}

/// Last path segment of a listing key or common prefix.
fn base_name(key: &str) -> &str {
    let trimmed = key.trim_end_matches('/');
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}

/// Derive mode bits from an object ACL: grants matching the owner add
/// owner bits, the well-known group URIs add group/world bits, everything
/// else is ignored.
pub fn acl_to_mode(owner_id: Option<&str>, grants: &[AclGrant]) -> FileMode {
    let mut mode = FileMode(0);
    for grant in grants {
        if grant.grantee_id.is_some() && grant.grantee_id.as_deref() == owner_id {
            mode |= match grant.permission.as_str() {
                "READ" => FileMode(0o400),
                "WRITE" => FileMode(0o200),
                "FULL_CONTROL" => FileMode(0o600),
                _ => FileMode(0),
            };
        } else if let Some(uri) = grant.grantee_uri.as_deref() {
            match uri {
                AUTHENTICATED_USERS_URI => {
                    mode |= match grant.permission.as_str() {
                        "READ" => FileMode(0o440),
                        "WRITE" => FileMode(0o220),
                        "FULL_CONTROL" => FileMode(0o660),
                        _ => FileMode(0),
                    };
                }
                ALL_USERS_URI => {
                    mode |= match grant.permission.as_str() {
                        "READ" => FileMode(0o444),
                        "WRITE" => FileMode(0o222),
                        "FULL_CONTROL" => FileMode(0o666),
                        _ => FileMode(0),
                    };
                }
                _ => {}
            }
        }
    }
    mode
}

/// Random-access listing surface handed to the protocol server.
/// `Ok(0)` marks end of stream.
#[async_trait]
pub trait ListerAt: Send + Sync {
    async fn list_at(&self, result: &mut [ObjectFileInfo], offset: u64) -> Result<usize>;
}

struct ListerState {
    spooled: Vec<ObjectFileInfo>,
    spool_offset: usize,
    continuation: Option<String>,
    started: bool,
    no_more: bool,
}

/// Lists one directory level: `.` and `..` first, then in-flight uploads
/// directly under the prefix, then common prefixes and objects from the
/// paginated listing in store order.
pub struct DirectoryLister {
    pub(crate) token: CancellationToken,
    pub(crate) store: Arc<dyn ObjectStore>,
    pub(crate) bucket: String,
    pub(crate) prefix: ObjectKey,
    pub(crate) lookback: usize,
    pub(crate) phantoms: Arc<PhantomObjectMap>,
    state: Mutex<ListerState>,
}

impl DirectoryLister {
    pub fn new(
        token: CancellationToken,
        store: Arc<dyn ObjectStore>,
        bucket: String,
        prefix: ObjectKey,
        lookback: usize,
        phantoms: Arc<PhantomObjectMap>,
    ) -> Self {
        Self {
            token,
            store,
            bucket,
            prefix,
            lookback,
            phantoms,
            state: Mutex::new(ListerState {
                spooled: Vec::new(),
                spool_offset: 0,
                continuation: None,
                started: false,
                no_more: false,
            }),
        }
    }
}

#[async_trait]
impl ListerAt for DirectoryLister {
    async fn list_at(&self, result: &mut [ObjectFileInfo], offset: u64) -> Result<usize> {
        if self.token.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let mut state = self.state.lock().await;

        let offset = offset as usize;
        if offset < state.spool_offset {
            return Err(Error::OutOfRange);
        }

        let mut s = offset - state.spool_offset;
        let mut i = 0;
        if s < state.spooled.len() {
            let n = result.len().min(state.spooled.len() - s);
            result[i..i + n].clone_from_slice(&state.spooled[s..s + n]);
            i += n;
            s = state.spooled.len();
        }
        if i >= result.len() {
            return Ok(i);
        }
        if state.no_more {
            return Ok(i);
        }

        if s <= state.spooled.len() && s >= self.lookback {
            let drop_len = s - self.lookback;
            state.spooled.drain(..drop_len);
            state.spool_offset += drop_len;
            s = self.lookback;
        }

        let first_page = !state.started;
        if first_page {
            state.started = true;
            let time = synthetic_time();
            state.spooled.push(ObjectFileInfo::dir(".", Some(time)));
            state.spooled.push(ObjectFileInfo::dir("..", Some(time)));
            for info in self.phantoms.list(&self.prefix) {
                let entry = info.snapshot();
                state.spooled.push(ObjectFileInfo::phantom(
                    entry.key.base(),
                    entry.last_modified,
                    entry.size,
                ));
            }
        }

        let mut prefix = self.prefix.to_string();
        if !prefix.is_empty() {
            prefix.push('/');
        }
        debug!(
            bucket = %self.bucket,
            prefix = %prefix,
            continuation = state.continuation.as_deref(),
            "ListObjectsV2"
        );
        let page = self
            .store
            .list_objects_v2(&self.bucket, &prefix, state.continuation.as_deref())
            .await?;
        debug!(
            common_prefixes = page.common_prefixes.len(),
            contents = page.contents.len(),
            "ListObjectsV2 page"
        );

        if first_page {
            for common in &page.common_prefixes {
                state
                    .spooled
                    .push(ObjectFileInfo::dir(base_name(common), Some(synthetic_time())));
            }
        }
        for obj in &page.contents {
            state.spooled.push(ObjectFileInfo {
                name: base_name(&obj.key).to_string(),
                last_modified: obj.last_modified,
                size: obj.size,
                mode: FileMode(0o644),
            });
        }
        state.continuation = page.next_continuation_token;
        if state.continuation.is_none() {
            state.no_more = true;
        }

        let n = state.spooled.len().saturating_sub(s).min(result.len() - i);
        result[i..i + n].clone_from_slice(&state.spooled[s..s + n]);
        Ok(i + n)
    }
}

/// Resolves one key to a file entry. Only offset 0 is valid; the result is
/// a single entry.
pub struct ObjectStat {
    pub(crate) token: CancellationToken,
    pub(crate) store: Arc<dyn ObjectStore>,
    pub(crate) bucket: String,
    pub(crate) key: ObjectKey,
    /// The caller asked about the session root (the bucket key prefix).
    pub(crate) root: bool,
    pub(crate) phantoms: Arc<PhantomObjectMap>,
}

#[async_trait]
impl ListerAt for ObjectStat {
    async fn list_at(&self, result: &mut [ObjectFileInfo], offset: u64) -> Result<usize> {
        debug!(len = result.len(), offset, key = %self.key, "stat");
        if self.token.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if result.is_empty() {
            return Ok(0);
        }
        if offset > 0 {
            return Err(Error::OutOfRange);
        }

        if self.key.is_root() {
            result[0] = ObjectFileInfo::dir("/", None);
            return Ok(1);
        }

        if let Some(info) = self.phantoms.get(&self.key) {
            let entry = info.snapshot();
            result[0] =
                ObjectFileInfo::phantom(entry.key.base(), entry.last_modified, entry.size);
            return Ok(1);
        }

        let key = self.key.to_string();
        match self.store.get_object_acl(&self.bucket, &key).await {
            Ok(acl) => {
                let mut info = ObjectFileInfo {
                    name: self.key.base().to_string(),
                    last_modified: None,
                    size: 0,
                    mode: acl_to_mode(acl.owner_id.as_deref(), &acl.grants),
                };
                match self.store.head_object(&self.bucket, &key).await {
                    Ok(head) => {
                        info.size = head.content_length;
                        info.last_modified = head.last_modified;
                    }
                    Err(err) => {
                        debug!(exception = %err, "error getting head object");
                    }
                }
                result[0] = info;
            }
            Err(acl_err) => {
                debug!(exception = %acl_err, "error getting object acl");
                let page = self
                    .store
                    .list_objects_v2(&self.bucket, &key, None)
                    .await
                    .map_err(|_| Error::NotExist)?;
                if !self.root && page.common_prefixes.is_empty() {
                    return Err(Error::NotExist);
                }
                result[0] = ObjectFileInfo::dir(self.key.base(), None);
            }
        }
        Ok(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner_grant(permission: &str) -> AclGrant {
        AclGrant {
            grantee_id: Some("owner-1".to_string()),
            grantee_uri: None,
            permission: permission.to_string(),
        }
    }

    fn uri_grant(uri: &str, permission: &str) -> AclGrant {
        AclGrant {
            grantee_id: None,
            grantee_uri: Some(uri.to_string()),
            permission: permission.to_string(),
        }
    }

    #[test]
    fn owner_full_control_and_world_read() {
        let mode = acl_to_mode(
            Some("owner-1"),
            &[owner_grant("FULL_CONTROL"), uri_grant(ALL_USERS_URI, "READ")],
        );
        assert_eq!(mode.bits(), 0o644);
    }

    #[test]
    fn grants_accumulate() {
        let mode = acl_to_mode(
            Some("owner-1"),
            &[
                owner_grant("READ"),
                owner_grant("WRITE"),
                uri_grant(AUTHENTICATED_USERS_URI, "FULL_CONTROL"),
            ],
        );
        assert_eq!(mode.bits(), 0o660);
    }

    #[test]
    fn foreign_grants_are_ignored() {
        let mode = acl_to_mode(
            Some("owner-1"),
            &[
                AclGrant {
                    grantee_id: Some("someone-else".to_string()),
                    grantee_uri: None,
                    permission: "FULL_CONTROL".to_string(),
                },
                uri_grant("http://acs.amazonaws.com/groups/s3/LogDelivery", "WRITE"),
            ],
        );
        assert_eq!(mode.bits(), 0);
    }

    #[test]
    fn base_name_handles_prefixes() {
        assert_eq!(base_name("a/b/c"), "c");
        assert_eq!(base_name("a/b/"), "b");
        assert_eq!(base_name("top/"), "top");
        assert_eq!(base_name("plain"), "plain");
    }

    #[test]
    fn dir_entries_have_directory_bit() {
        let d = ObjectFileInfo::dir("sub", Some(synthetic_time()));
        assert!(d.is_dir());
        assert_eq!(d.mode.bits() & 0o777, 0o755);
        let p = ObjectFileInfo::phantom("up", synthetic_time(), 3);
        assert!(!p.is_dir());
        assert_eq!(p.mode.bits(), 0o600);
    }
}
