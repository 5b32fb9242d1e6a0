// src/path.rs
//
//! Normalized object-key paths.
//!
//! An [`ObjectKey`] is an ordered sequence of non-empty segments joined by
//! `/` with no leading or trailing slash. Protocol-supplied paths are
//! normalized through [`ObjectKey::parse`]; bucket prefixes and per-user
//! roots are combined with [`ObjectKey::join`].

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct ObjectKey {
    segments: Vec<String>,
}

impl ObjectKey {
    /// The empty key (bucket root).
    pub fn root() -> Self {
        Self::default()
    }

    /// Normalize a slash-separated path into a key: empty segments and `.`
    /// are dropped, `..` pops the previous segment (never escaping the root).
    pub fn parse(path: &str) -> Self {
        let mut segments: Vec<String> = Vec::new();
        for seg in path.split('/') {
            match seg {
                "" | "." => {}
                ".." => {
                    segments.pop();
                }
                _ => segments.push(seg.to_string()),
            }
        }
        Self { segments }
    }

    /// Concatenate `other`'s segments after this key's.
    pub fn join(&self, other: &ObjectKey) -> ObjectKey {
        let mut segments = Vec::with_capacity(self.segments.len() + other.segments.len());
        segments.extend_from_slice(&self.segments);
        segments.extend_from_slice(&other.segments);
        ObjectKey { segments }
    }

    /// Last segment, or the empty string for the root key.
    pub fn base(&self) -> &str {
        self.segments.last().map(String::as_str).unwrap_or("")
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// True if `self` is `prefix` plus exactly one trailing segment.
    pub fn is_child_of(&self, prefix: &ObjectKey) -> bool {
        self.segments.len() == prefix.segments.len() + 1
            && self.segments[..prefix.segments.len()] == prefix.segments[..]
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("/"))
    }
}
