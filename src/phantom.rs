// src/phantom.rs
//
//! Registry of in-flight uploads.
//!
//! A phantom object is a key that has an open upload writer but no
//! materialized object yet. The map makes those keys visible to listings
//! and stat (with a distinguishing mode) and lets rename/remove intercept
//! operations on them before they ever reach the object store. Entries
//! exist strictly between `file_write` and the writer's close.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use crate::path::ObjectKey;

/// Stable snapshot of a phantom entry.
#[derive(Debug, Clone)]
pub struct PhantomObjectEntry {
    pub key: ObjectKey,
    pub size: i64,
    pub last_modified: SystemTime,
}

/// Shared, mutable record of one in-flight upload.
///
/// The writer bumps `size` as `write_at` calls land (out of order, so the
/// update is set-if-greater); readers take a [`snapshot`](Self::snapshot).
#[derive(Debug)]
pub struct PhantomObjectInfo {
    inner: Mutex<PhantomObjectEntry>,
}

impl PhantomObjectInfo {
    pub fn new(key: ObjectKey, last_modified: SystemTime) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(PhantomObjectEntry { key, size: 0, last_modified }),
        })
    }

    pub fn snapshot(&self) -> PhantomObjectEntry {
        self.inner.lock().expect("phantom info lock poisoned").clone()
    }

    /// Raise the recorded size to `size` if it is larger than the current
    /// value. Out-of-order writes make plain assignment incorrect.
    pub fn set_size_if_greater(&self, size: i64) {
        let mut inner = self.inner.lock().expect("phantom info lock poisoned");
        if size > inner.size {
            inner.size = size;
        }
    }

    fn set_key(&self, key: ObjectKey) {
        self.inner.lock().expect("phantom info lock poisoned").key = key;
    }

    fn key_string(&self) -> String {
        self.inner.lock().expect("phantom info lock poisoned").key.to_string()
    }
}

/// Process-wide map `key -> PhantomObjectInfo`. All operations are atomic
/// under one mutex.
#[derive(Debug, Default)]
pub struct PhantomObjectMap {
    objects: Mutex<HashMap<String, Arc<PhantomObjectInfo>>>,
}

impl PhantomObjectMap {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add(&self, info: &Arc<PhantomObjectInfo>) {
        let key = info.key_string();
        self.lock().insert(key, Arc::clone(info));
    }

    pub fn get(&self, key: &ObjectKey) -> Option<Arc<PhantomObjectInfo>> {
        self.lock().get(&key.to_string()).cloned()
    }

    pub fn remove(&self, key: &ObjectKey) -> Option<Arc<PhantomObjectInfo>> {
        self.lock().remove(&key.to_string())
    }

    /// Remove the entry holding exactly this info (pointer identity), if it
    /// is still registered under its current key. A writer that was renamed
    /// away and replaced must not remove its replacement.
    pub fn remove_by_info_ptr(&self, info: &Arc<PhantomObjectInfo>) -> Option<Arc<PhantomObjectInfo>> {
        let key = info.key_string();
        let mut objects = self.lock();
        match objects.get(&key) {
            Some(existing) if Arc::ptr_eq(existing, info) => objects.remove(&key),
            _ => None,
        }
    }

    /// Atomically move `src` to `dst`. Returns true when `src` existed;
    /// the caller then skips the object-store copy+delete entirely.
    pub fn rename(&self, src: &ObjectKey, dst: &ObjectKey) -> bool {
        let mut objects = self.lock();
        match objects.remove(&src.to_string()) {
            Some(info) => {
                info.set_key(dst.clone());
                objects.insert(dst.to_string(), info);
                true
            }
            None => false,
        }
    }

    /// Entries directly under `prefix` (one segment deeper).
    pub fn list(&self, prefix: &ObjectKey) -> Vec<Arc<PhantomObjectInfo>> {
        self.lock()
            .values()
            .filter(|info| info.snapshot().key.is_child_of(prefix))
            .cloned()
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<PhantomObjectInfo>>> {
        self.objects.lock().expect("phantom map lock poisoned")
    }
}
