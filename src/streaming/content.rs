use std::collections::{HashMap, VecDeque};
use std::fmt::Write as _;

use bytes::Bytes;
use sha2::{Digest, Sha256};

use crate::transport::MediaKind;

/// Encoded content ready to serve
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedContent {
    /// Encoded bytes
    pub data: Bytes,
    /// Media kind
    pub kind: MediaKind,
    /// Content hash of the inputs and output parameters
    pub key: String,
}

impl PreparedContent {
    /// MIME type of the bytes
    #[must_use]
    pub fn content_type(&self) -> &'static str {
        self.kind.content_type()
    }
}

/// SHA-256 hex digest over several parts
#[must_use]
pub fn content_key(parts: &[&[u8]]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update((part.len() as u64).to_le_bytes());
        hasher.update(part);
    }
    let digest = hasher.finalize();

    let mut key = String::with_capacity(digest.len() * 2);
    for byte in digest.as_slice() {
        let _ = write!(key, "{byte:02x}");
    }
    key
}

/// Bounded cache of prepared content, evicting the oldest insert
#[derive(Debug)]
pub struct ContentCache {
    capacity: usize,
    entries: HashMap<String, PreparedContent>,
    order: VecDeque<String>,
}

impl ContentCache {
    /// Cache holding at most `capacity` items (0 disables caching)
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    /// Look up by key
    #[must_use]
    pub fn get(&self, key: &str) -> Option<PreparedContent> {
        self.entries.get(key).cloned()
    }

    /// Insert, evicting the oldest entries beyond capacity
    pub fn insert(&mut self, content: PreparedContent) {
        if self.capacity == 0 {
            return;
        }
        if self.entries.contains_key(&content.key) {
            return;
        }

        self.order.push_back(content.key.clone());
        self.entries.insert(content.key.clone(), content);

        while self.entries.len() > self.capacity {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            self.entries.remove(&oldest);
        }
    }

    /// Number of cached items
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the cache is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
