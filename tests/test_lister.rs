// tests/test_lister.rs
//
// DirectoryLister pagination, phantom injection and lookback; ObjectStat
// resolution order (root, phantom, ACL+HEAD, directory probe).

mod common;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use common::{all_users_read_grant, epoch_secs, owner_full_control, Call, MockObjectStore};
use s3gate::bucketio::{BucketIO, Gateway, Request};
use s3gate::config::{BucketConfig, TuningConfig, UserInfo};
use s3gate::error::Error;
use s3gate::lister::{DirectoryLister, ListerAt, ObjectFileInfo};
use s3gate::path::ObjectKey;
use s3gate::phantom::PhantomObjectInfo;
use s3gate::store::{HeadObjectInfo, ListObjectsPage, ListedObject, ObjectStore};

fn gateway() -> Gateway {
    Gateway::new(TuningConfig::default(), CancellationToken::new())
}

fn session(gw: &Gateway, store: &Arc<MockObjectStore>, bucket: BucketConfig) -> BucketIO {
    gw.bucket_io(
        CancellationToken::new(),
        Arc::new(bucket),
        Arc::clone(store) as Arc<dyn ObjectStore>,
        &UserInfo::default(),
    )
}

fn object(key: &str, size: i64) -> ListedObject {
    ListedObject { key: key.to_string(), size, last_modified: Some(epoch_secs(1_000)) }
}

async fn drain(lister: &dyn ListerAt, chunk: usize) -> Vec<ObjectFileInfo> {
    let mut all = Vec::new();
    let mut buf = vec![ObjectFileInfo::default(); chunk];
    loop {
        let n = lister.list_at(&mut buf, all.len() as u64).await.unwrap();
        if n == 0 {
            return all;
        }
        all.extend_from_slice(&buf[..n]);
    }
}

#[tokio::test]
async fn listing_folds_dots_phantoms_dirs_and_files() {
    let store = MockObjectStore::new();
    store.script_list_pages(vec![ListObjectsPage {
        common_prefixes: vec!["docs/sub1/".to_string(), "docs/sub2/".to_string()],
        contents: vec![object("docs/a.txt", 5), object("docs/b.txt", 9)],
        next_continuation_token: None,
    }]);
    let gw = gateway();
    gw.phantoms()
        .add(&PhantomObjectInfo::new(ObjectKey::parse("docs/upload.bin"), epoch_secs(7)));
    let io = session(&gw, &store, BucketConfig::new("test-bucket"));

    let lister = io.file_list(&Request::new("List", "docs")).await.unwrap();
    let entries = drain(lister.as_ref(), 16).await;

    let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec![".", "..", "upload.bin", "sub1", "sub2", "a.txt", "b.txt"]);

    assert!(entries[0].is_dir());
    assert!(entries[1].is_dir());
    assert_eq!(entries[2].mode.bits(), 0o600, "in-flight upload marker");
    assert!(entries[3].is_dir());
    assert_eq!(entries[3].mode.bits() & 0o777, 0o755);
    assert_eq!(entries[5].mode.bits(), 0o644);
    assert_eq!(entries[5].size, 5);

    // listed with a trailing-slash prefix, first page unconditioned
    assert!(store
        .calls()
        .iter()
        .any(|c| *c == Call::ListObjectsV2 { prefix: "docs/".to_string(), continuation: None }));
}

#[tokio::test]
async fn listing_paginates_until_token_runs_out() {
    let store = MockObjectStore::new();
    store.script_list_pages(vec![
        ListObjectsPage {
            contents: vec![object("k0", 0), object("k1", 0), object("k2", 0)],
            ..Default::default()
        },
        ListObjectsPage {
            contents: vec![object("k3", 0), object("k4", 0)],
            ..Default::default()
        },
    ]);
    let gw = gateway();
    let io = session(&gw, &store, BucketConfig::new("test-bucket"));

    let lister = io.file_list(&Request::new("List", "")).await.unwrap();
    let entries = drain(lister.as_ref(), 2).await;

    let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec![".", "..", "k0", "k1", "k2", "k3", "k4"]);

    assert_eq!(store.call_count("ListObjectsV2"), 2);
    assert!(store
        .calls()
        .iter()
        .any(|c| *c
            == Call::ListObjectsV2 { prefix: "".to_string(), continuation: Some("1".to_string()) }));
}

#[tokio::test]
async fn listing_position_behind_lookback_is_out_of_range() {
    let store = MockObjectStore::new();
    store.script_list_pages(vec![
        ListObjectsPage {
            contents: (0..4).map(|i| object(&format!("c{i}"), 0)).collect(),
            ..Default::default()
        },
        ListObjectsPage {
            contents: vec![object("c4", 0), object("c5", 0)],
            ..Default::default()
        },
    ]);
    let gw = gateway();
    let lister = DirectoryLister::new(
        CancellationToken::new(),
        Arc::clone(&store) as Arc<dyn ObjectStore>,
        "test-bucket".to_string(),
        ObjectKey::root(),
        1, // single-entry lookback forces early history discard
        Arc::clone(gw.phantoms()),
    );

    let mut buf = vec![ObjectFileInfo::default(); 4];
    assert_eq!(lister.list_at(&mut buf, 0).await.unwrap(), 4);
    assert_eq!(lister.list_at(&mut buf, 4).await.unwrap(), 4);

    let res = lister.list_at(&mut buf, 0).await;
    assert!(matches!(res, Err(Error::OutOfRange)), "got {res:?}");
}

#[tokio::test]
async fn stat_of_root_is_synthetic_directory() {
    let store = MockObjectStore::new();
    let gw = gateway();
    let io = session(&gw, &store, BucketConfig::new("test-bucket"));

    let stat = io.file_list(&Request::new("Stat", "/")).await.unwrap();
    let mut buf = vec![ObjectFileInfo::default(); 1];
    assert_eq!(stat.list_at(&mut buf, 0).await.unwrap(), 1);
    assert_eq!(buf[0].name, "/");
    assert!(buf[0].is_dir());
    assert_eq!(store.call_count("GetObjectAcl"), 0, "root never hits the store");
}

#[tokio::test]
async fn stat_of_phantom_shows_upload_in_progress() {
    let store = MockObjectStore::new();
    let gw = gateway();
    let info = PhantomObjectInfo::new(ObjectKey::parse("up.bin"), epoch_secs(11));
    info.set_size_if_greater(7);
    gw.phantoms().add(&info);
    let io = session(&gw, &store, BucketConfig::new("test-bucket"));

    let stat = io.file_list(&Request::new("Stat", "up.bin")).await.unwrap();
    let mut buf = vec![ObjectFileInfo::default(); 1];
    assert_eq!(stat.list_at(&mut buf, 0).await.unwrap(), 1);
    assert_eq!(buf[0].name, "up.bin");
    assert_eq!(buf[0].size, 7);
    assert_eq!(buf[0].mode.bits(), 0o600);
    assert_eq!(store.call_count("GetObjectAcl"), 0);
}

#[tokio::test]
async fn stat_derives_mode_from_acl_and_size_from_head() {
    let store = MockObjectStore::new();
    let mut acl = owner_full_control("owner-1");
    acl.grants.push(all_users_read_grant());
    store.set_acl("f.txt", acl);
    store.set_head(
        "f.txt",
        HeadObjectInfo { content_length: 42, last_modified: Some(epoch_secs(1_234)) },
    );
    let gw = gateway();
    let io = session(&gw, &store, BucketConfig::new("test-bucket"));

    let stat = io.file_list(&Request::new("Stat", "f.txt")).await.unwrap();
    let mut buf = vec![ObjectFileInfo::default(); 1];
    assert_eq!(stat.list_at(&mut buf, 0).await.unwrap(), 1);
    assert_eq!(buf[0].name, "f.txt");
    assert_eq!(buf[0].size, 42);
    assert_eq!(buf[0].last_modified, Some(epoch_secs(1_234)));
    assert_eq!(buf[0].mode.bits(), 0o644, "owner FULL_CONTROL | AllUsers READ");
}

#[tokio::test]
async fn stat_survives_head_failure() {
    let store = MockObjectStore::new();
    store.set_acl("f.txt", owner_full_control("owner-1"));
    // no HEAD scripted: the call fails, stat still succeeds
    let gw = gateway();
    let io = session(&gw, &store, BucketConfig::new("test-bucket"));

    let stat = io.file_list(&Request::new("Stat", "f.txt")).await.unwrap();
    let mut buf = vec![ObjectFileInfo::default(); 1];
    assert_eq!(stat.list_at(&mut buf, 0).await.unwrap(), 1);
    assert_eq!(buf[0].size, 0);
    assert_eq!(buf[0].last_modified, None);
    assert_eq!(buf[0].mode.bits(), 0o600);
}

#[tokio::test]
async fn stat_falls_back_to_directory_probe() {
    let store = MockObjectStore::new();
    store.script_list_pages(vec![ListObjectsPage {
        common_prefixes: vec!["sub/x/".to_string()],
        ..Default::default()
    }]);
    let gw = gateway();
    let io = session(&gw, &store, BucketConfig::new("test-bucket"));

    let stat = io.file_list(&Request::new("Stat", "sub")).await.unwrap();
    let mut buf = vec![ObjectFileInfo::default(); 1];
    assert_eq!(stat.list_at(&mut buf, 0).await.unwrap(), 1);
    assert_eq!(buf[0].name, "sub");
    assert!(buf[0].is_dir());
}

#[tokio::test]
async fn stat_of_missing_key_is_not_exist() {
    let store = MockObjectStore::new();
    let gw = gateway();
    let io = session(&gw, &store, BucketConfig::new("test-bucket"));

    let stat = io.file_list(&Request::new("Stat", "missing")).await.unwrap();
    let mut buf = vec![ObjectFileInfo::default(); 1];
    let res = stat.list_at(&mut buf, 0).await;
    assert!(matches!(res, Err(Error::NotExist)), "got {res:?}");
}

#[tokio::test]
async fn stat_of_session_root_prefix_is_directory_even_when_empty() {
    let store = MockObjectStore::new();
    let gw = gateway();
    let mut bucket = BucketConfig::new("test-bucket");
    bucket.key_prefix = ObjectKey::parse("base");
    let io = session(&gw, &store, bucket);

    // "base" has no ACL and the probe returns nothing, but it is the
    // session root, so it still resolves as a directory.
    let stat = io.file_list(&Request::new("Stat", "")).await.unwrap();
    let mut buf = vec![ObjectFileInfo::default(); 1];
    assert_eq!(stat.list_at(&mut buf, 0).await.unwrap(), 1);
    assert_eq!(buf[0].name, "base");
    assert!(buf[0].is_dir());
}

#[tokio::test]
async fn stat_rejects_nonzero_offset() {
    let store = MockObjectStore::new();
    let gw = gateway();
    let io = session(&gw, &store, BucketConfig::new("test-bucket"));

    let stat = io.file_list(&Request::new("Stat", "x")).await.unwrap();
    let mut buf = vec![ObjectFileInfo::default(); 1];
    let res = stat.list_at(&mut buf, 3).await;
    assert!(matches!(res, Err(Error::OutOfRange)), "got {res:?}");
}
