//! The folder summary the reconciler keeps in agreement with the server.
//!
//! The engine does not persist anything itself. An application supplies a [`SummaryStore`] that
//! hands out one [`FolderSummary`] per folder, and decides how (and whether) those are written
//! to disk. [`MemoryStore`] keeps everything in memory.

use std::cmp::Ordering;
use std::collections::HashMap;

use tracing::warn;

use crate::types::{Flags, MessageRecord, Uid};

/// The synchronization state of one message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SummaryEntry {
    /// The message's UID.
    pub uid: Uid,
    /// The flags the server last reported.
    pub server_flags: Flags,
    /// The flags as the user sees them, including edits not yet sent to the server.
    pub flags: Flags,
}

/// The ordered message list of one folder.
///
/// Index `i` holds the message the client believes to have sequence number `i + 1`. UIDs
/// increase strictly from index 0 upwards.
pub trait FolderSummary: Send {
    /// Number of messages.
    fn count(&self) -> usize;

    /// The message at `index`.
    fn entry(&self, index: usize) -> Option<SummaryEntry>;

    /// Add a message after the last one. Its UID must be larger than every UID already present.
    fn append(&mut self, record: MessageRecord);

    /// Remove the message at `index`; every later message moves down by one.
    fn remove_at(&mut self, index: usize) -> Option<SummaryEntry>;

    /// Replace the server and local flags of the message with `uid`. Returns `false` if there is
    /// no such message.
    fn update_flags(&mut self, uid: Uid, server_flags: Flags, flags: Flags) -> bool;

    /// The last high-water modseq stored for this folder.
    fn highest_mod_seq(&self) -> Option<u64>;

    /// Store (or forget) the high-water modseq.
    fn set_highest_mod_seq(&mut self, modseq: Option<u64>);

    /// The UIDVALIDITY the stored UIDs belong to.
    fn uid_validity(&self) -> Option<u32>;

    /// Record the UIDVALIDITY the stored UIDs belong to.
    fn set_uid_validity(&mut self, validity: Option<u32>);

    /// Drop every message.
    fn clear(&mut self);

    /// Called after each batch of changes. Persistent implementations write here.
    fn flush(&mut self) {}

    /// The index of the message with `uid`. Relies on UIDs increasing with the index.
    fn position(&self, uid: Uid) -> Option<usize> {
        let (mut lo, mut hi) = (0, self.count());
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            match self.entry(mid)?.uid.cmp(&uid) {
                Ordering::Less => lo = mid + 1,
                Ordering::Greater => hi = mid,
                Ordering::Equal => return Some(mid),
            }
        }
        None
    }

    /// The UID of the last message.
    fn last_uid(&self) -> Option<Uid> {
        self.count()
            .checked_sub(1)
            .and_then(|i| self.entry(i))
            .map(|e| e.uid)
    }
}

/// Hands out the summary of each folder.
pub trait SummaryStore: Send {
    /// The summary of `folder`, created empty on first use.
    fn folder(&mut self, folder: &str) -> &mut dyn FolderSummary;
}

/// A [`FolderSummary`] held in memory.
#[derive(Clone, Debug, Default)]
pub struct MemorySummary {
    records: Vec<MessageRecord>,
    highest_mod_seq: Option<u64>,
    uid_validity: Option<u32>,
}

impl MemorySummary {
    /// The full records, in sequence order.
    pub fn records(&self) -> &[MessageRecord] {
        &self.records
    }

    /// The UIDs, in sequence order.
    pub fn uids(&self) -> Vec<Uid> {
        self.records.iter().map(|r| r.uid).collect()
    }
}

fn entry(record: &MessageRecord) -> SummaryEntry {
    SummaryEntry {
        uid: record.uid,
        server_flags: record.server_flags,
        flags: record.flags,
    }
}

impl FolderSummary for MemorySummary {
    fn count(&self) -> usize {
        self.records.len()
    }

    fn entry(&self, index: usize) -> Option<SummaryEntry> {
        self.records.get(index).map(entry)
    }

    fn append(&mut self, record: MessageRecord) {
        if let Some(last) = self.records.last() {
            if record.uid <= last.uid {
                warn!(
                    "ignoring message {} appended after message {}",
                    record.uid, last.uid
                );
                return;
            }
        }
        self.records.push(record);
    }

    fn remove_at(&mut self, index: usize) -> Option<SummaryEntry> {
        if index < self.records.len() {
            Some(entry(&self.records.remove(index)))
        } else {
            None
        }
    }

    fn update_flags(&mut self, uid: Uid, server_flags: Flags, flags: Flags) -> bool {
        match self.records.binary_search_by_key(&uid, |r| r.uid) {
            Ok(i) => {
                self.records[i].server_flags = server_flags;
                self.records[i].flags = flags;
                true
            }
            Err(_) => false,
        }
    }

    fn highest_mod_seq(&self) -> Option<u64> {
        self.highest_mod_seq
    }

    fn set_highest_mod_seq(&mut self, modseq: Option<u64>) {
        self.highest_mod_seq = modseq;
    }

    fn uid_validity(&self) -> Option<u32> {
        self.uid_validity
    }

    fn set_uid_validity(&mut self, validity: Option<u32>) {
        self.uid_validity = validity;
    }

    fn clear(&mut self) {
        self.records.clear();
    }

    fn position(&self, uid: Uid) -> Option<usize> {
        self.records.binary_search_by_key(&uid, |r| r.uid).ok()
    }
}

/// A [`SummaryStore`] held in memory.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    folders: HashMap<String, MemorySummary>,
}

impl MemoryStore {
    /// An empty store.
    pub fn new() -> Self {
        MemoryStore::default()
    }

    /// The summary of `folder`, if one was created.
    pub fn get(&self, folder: &str) -> Option<&MemorySummary> {
        self.folders.get(folder)
    }

    /// Put a prepared summary in place, e.g. one loaded from disk.
    pub fn insert(&mut self, folder: &str, summary: MemorySummary) {
        self.folders.insert(folder.to_string(), summary);
    }
}

impl SummaryStore for MemoryStore {
    fn folder(&mut self, folder: &str) -> &mut dyn FolderSummary {
        self.folders.entry(folder.to_string()).or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Flag;
    use std::cell::Cell;

    fn summary(uids: &[Uid]) -> MemorySummary {
        let mut s = MemorySummary::default();
        for &uid in uids {
            s.append(MessageRecord::new(uid, Flags::empty()));
        }
        s
    }

    #[test]
    fn appends_keep_uids_increasing() {
        let mut s = summary(&[3, 5, 9]);
        s.append(MessageRecord::new(9, Flags::empty()));
        s.append(MessageRecord::new(4, Flags::empty()));
        assert_eq!(s.uids(), vec![3, 5, 9]);
        assert_eq!(s.last_uid(), Some(9));
        assert_eq!(s.position(5), Some(1));
        assert_eq!(s.position(6), None);
    }

    // Uses the provided `position`, counting how many entries it looks at.
    #[derive(Default)]
    struct Counting {
        inner: MemorySummary,
        reads: Cell<usize>,
    }

    impl FolderSummary for Counting {
        fn count(&self) -> usize {
            self.inner.count()
        }
        fn entry(&self, index: usize) -> Option<SummaryEntry> {
            self.reads.set(self.reads.get() + 1);
            self.inner.entry(index)
        }
        fn append(&mut self, record: MessageRecord) {
            self.inner.append(record)
        }
        fn remove_at(&mut self, index: usize) -> Option<SummaryEntry> {
            self.inner.remove_at(index)
        }
        fn update_flags(&mut self, uid: Uid, server_flags: Flags, flags: Flags) -> bool {
            self.inner.update_flags(uid, server_flags, flags)
        }
        fn highest_mod_seq(&self) -> Option<u64> {
            self.inner.highest_mod_seq()
        }
        fn set_highest_mod_seq(&mut self, modseq: Option<u64>) {
            self.inner.set_highest_mod_seq(modseq)
        }
        fn uid_validity(&self) -> Option<u32> {
            self.inner.uid_validity()
        }
        fn set_uid_validity(&mut self, validity: Option<u32>) {
            self.inner.set_uid_validity(validity)
        }
        fn clear(&mut self) {
            self.inner.clear()
        }
    }

    #[test]
    fn default_position_bisects() {
        let mut s = Counting::default();
        for uid in (2..=2000).step_by(2) {
            s.append(MessageRecord::new(uid, Flags::empty()));
        }
        for (uid, expected) in [(2, Some(0)), (1000, Some(499)), (2000, Some(999)), (1001, None)] {
            s.reads.set(0);
            assert_eq!(s.position(uid), expected);
            assert!(s.reads.get() <= 11, "{} entries read for {}", s.reads.get(), uid);
        }
        assert_eq!(s.position(1), None);
        assert_eq!(s.position(4000), None);
        assert_eq!(Counting::default().position(1), None);
    }

    #[test]
    fn removal_renumbers() {
        let mut s = summary(&[1, 2, 3, 4]);
        assert_eq!(s.remove_at(1).map(|e| e.uid), Some(2));
        assert_eq!(s.entry(1).map(|e| e.uid), Some(3));
        assert_eq!(s.remove_at(7), None);
        assert_eq!(s.count(), 3);
    }

    #[test]
    fn flags_are_updated_by_uid() {
        let mut s = summary(&[10, 20]);
        let seen = Flags::only(Flag::Seen);
        assert!(s.update_flags(20, seen, seen | Flag::Flagged));
        assert!(!s.update_flags(15, seen, seen));
        let e = s.entry(1).unwrap();
        assert_eq!(e.server_flags, seen);
        assert_eq!(e.flags, seen | Flag::Flagged);
    }

    #[test]
    fn store_creates_folders_on_demand() {
        let mut store = MemoryStore::new();
        store.folder("INBOX").append(MessageRecord::new(1, Flags::empty()));
        store.folder("INBOX").set_highest_mod_seq(Some(7));
        assert_eq!(store.get("INBOX").map(|s| s.count()), Some(1));
        assert_eq!(store.folder("INBOX").highest_mod_seq(), Some(7));
        assert!(store.get("Sent").is_none());
        assert_eq!(store.folder("Sent").last_uid(), None);
    }
}
