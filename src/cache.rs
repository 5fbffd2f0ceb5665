//! Storage for fetched message content.
//!
//! Payloads are keyed by folder, UID and IMAP section specifier; an empty specifier is the
//! whole message. A hit saves a round trip to the server.

use std::collections::HashMap;

use crate::types::Uid;

/// Where fetched content is kept between fetches.
pub trait MessageCache: Send {
    /// A previously stored payload.
    fn get(&self, folder: &str, uid: Uid, part_spec: &str) -> Option<Vec<u8>>;

    /// Store a payload, replacing any earlier one for the same key.
    fn put(&mut self, folder: &str, uid: Uid, part_spec: &str, payload: &[u8]);

    /// Drop every payload of one message.
    fn remove_message(&mut self, folder: &str, uid: Uid);

    /// Drop everything stored for a folder.
    fn clear_folder(&mut self, folder: &str);
}

/// A [`MessageCache`] held in memory.
#[derive(Clone, Debug, Default)]
pub struct MemoryCache {
    parts: HashMap<(String, Uid, String), Vec<u8>>,
}

impl MemoryCache {
    /// An empty cache.
    pub fn new() -> Self {
        MemoryCache::default()
    }

    /// Number of stored payloads.
    pub fn len(&self) -> usize {
        self.parts.len()
    }

    /// Whether nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }
}

impl MessageCache for MemoryCache {
    fn get(&self, folder: &str, uid: Uid, part_spec: &str) -> Option<Vec<u8>> {
        self.parts
            .get(&(folder.to_string(), uid, part_spec.to_string()))
            .cloned()
    }

    fn put(&mut self, folder: &str, uid: Uid, part_spec: &str, payload: &[u8]) {
        self.parts.insert(
            (folder.to_string(), uid, part_spec.to_string()),
            payload.to_vec(),
        );
    }

    fn remove_message(&mut self, folder: &str, uid: Uid) {
        self.parts.retain(|(f, u, _), _| !(f == folder && *u == uid));
    }

    fn clear_folder(&mut self, folder: &str) {
        self.parts.retain(|(f, _, _), _| f != folder);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyed_by_folder_uid_and_part() {
        let mut cache = MemoryCache::new();
        cache.put("INBOX", 7, "1", b"one");
        cache.put("INBOX", 7, "2", b"two");
        cache.put("Sent", 7, "1", b"other");
        assert_eq!(cache.get("INBOX", 7, "1").as_deref(), Some(&b"one"[..]));
        assert_eq!(cache.get("INBOX", 8, "1"), None);

        cache.remove_message("INBOX", 7);
        assert_eq!(cache.get("INBOX", 7, "2"), None);
        assert_eq!(cache.get("Sent", 7, "1").as_deref(), Some(&b"other"[..]));

        cache.clear_folder("Sent");
        assert!(cache.is_empty());
    }
}
