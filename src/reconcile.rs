//! Bringing a folder summary back in line with the server.
//!
//! The server tells us what changed in three ways: through QRESYNC (`VANISHED` and `FETCH`
//! responses naming UIDs, which can be applied directly), through CONDSTORE (we ask for every
//! flag change since a stored modseq, and apply them by sequence number), and through the
//! `EXISTS` count alone. When the evidence does not add up, the summary is compared against a
//! complete UID list with a full rescan, which is slow but always correct.
//!
//! Every strategy only removes messages the server no longer has, updates flags, and appends
//! messages with larger UIDs than the local tail. UIDs are never invented.

use std::io::{Read, Write};
use std::ops::RangeInclusive;

use tracing::{debug, warn};

use crate::cache::MessageCache;
use crate::channel::{Channel, SelectMode};
use crate::codec::{self, Arg};
use crate::error::{Error, Result};
use crate::extensions::idle::SetReadTimeout;
use crate::parse::{self, FetchFlags, Push};
use crate::summary::{FolderSummary, SummaryEntry};
use crate::types::{merge_flags, Capability, Flags, Mailbox, Seq, Uid};
use crate::utils::uid_set_batches;

/// How the reconciler brought a folder up to date.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Strategy {
    /// UID-addressed `VANISHED`/`FETCH` data was applied as it arrived.
    QresyncApply,
    /// Flag changes since the stored modseq were fetched and applied by sequence number.
    CondstoreIncremental,
    /// The complete UID list was fetched and compared with the summary.
    FullRescan,
}

/// What one reconciliation cycle changed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// The strategies used, in the order they ran.
    pub strategies: Vec<Strategy>,
    /// UIDs removed from the summary.
    pub removed: Vec<Uid>,
    /// Sequence numbers of removed messages, numbered the way `EXPUNGE` responses are: each
    /// one is valid after the removals before it.
    pub expunged: Vec<Seq>,
    /// UIDs whose flags changed.
    pub flags_changed: Vec<Uid>,
    /// UIDs appended to the summary.
    pub added: Vec<Uid>,
    /// The high-water modseq stored at the end of the cycle.
    pub highest_mod_seq: Option<u64>,
    /// Whether a UIDVALIDITY change voided the summary.
    pub invalidated: bool,
}

impl SyncReport {
    /// Whether the summary was left as it was.
    pub fn is_empty(&self) -> bool {
        self.removed.is_empty()
            && self.flags_changed.is_empty()
            && self.added.is_empty()
            && !self.invalidated
    }
}

/// Folder state changes collected from one or more responses, in arrival order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct ChangeSet {
    events: Vec<Push>,
}

impl ChangeSet {
    pub(crate) fn from_units<'a>(units: impl IntoIterator<Item = &'a Vec<u8>>) -> ChangeSet {
        let mut changes = ChangeSet::default();
        for unit in units {
            if let Some(push) = parse::push(unit) {
                changes.record(push);
            }
        }
        changes
    }

    pub(crate) fn from_response(response: &codec::Response) -> ChangeSet {
        ChangeSet::from_units(&response.untagged)
    }

    pub(crate) fn record(&mut self, push: Push) {
        self.events.push(push);
    }

    /// Add the changes reported with another command.
    pub(crate) fn extend(&mut self, response: &codec::Response) {
        self.events.extend(response.untagged.iter().filter_map(|u| parse::push(u)));
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// The message count after these changes, given the count before them.
    pub(crate) fn exists(&self, before: u32) -> u32 {
        self.events.iter().fold(before, |n, event| match event {
            Push::Exists(e) => *e,
            Push::Expunge(_) => n.saturating_sub(1),
            Push::Vanished {
                earlier: false,
                uids,
            } => n.saturating_sub(range_len(uids)),
            _ => n,
        })
    }
}

fn range_len(ranges: &[RangeInclusive<Uid>]) -> u32 {
    ranges
        .iter()
        .map(|r| r.end().saturating_sub(*r.start()).saturating_add(1))
        .fold(0u32, u32::saturating_add)
}

/// What made the reconciler run.
#[derive(Clone, Copy, Debug)]
pub(crate) enum Trigger<'m> {
    /// The folder was just opened.
    Select {
        mailbox: &'m Mailbox,
        mode: SelectMode,
    },
    /// Changes arrived on an open folder (NOOP, EXPUNGE, IDLE).
    Poll,
    /// The caller asked for a full comparison.
    Rescan,
}

/// One reconciliation cycle over one folder.
pub(crate) struct Reconciler<'a, T: Read + Write> {
    channel: &'a mut Channel<T>,
    summary: &'a mut dyn FolderSummary,
    cache: &'a mut dyn MessageCache,
    folder: &'a str,
    uid_set_limit: usize,
    high_water: Option<u64>,
    report: SyncReport,
}

impl<'a, T: Read + Write + SetReadTimeout> Reconciler<'a, T> {
    pub(crate) fn new(
        channel: &'a mut Channel<T>,
        summary: &'a mut dyn FolderSummary,
        cache: &'a mut dyn MessageCache,
        folder: &'a str,
        uid_set_limit: usize,
    ) -> Self {
        Reconciler {
            channel,
            summary,
            cache,
            folder,
            uid_set_limit,
            high_water: None,
            report: SyncReport::default(),
        }
    }

    /// Run one cycle. `exists` is the server's message count once `changes` are taken into
    /// account.
    ///
    /// The stored modseq only moves when the whole cycle succeeds. On error the summary keeps
    /// every change made so far, each of which is consistent with the server on its own.
    pub(crate) fn run(
        mut self,
        trigger: Trigger<'_>,
        changes: &ChangeSet,
        exists: u32,
    ) -> Result<SyncReport> {
        match trigger {
            Trigger::Select { mailbox, mode } => {
                self.check_validity(mailbox.uid_validity);
                self.bump(mailbox.highest_mod_seq);
                self.apply(changes);
                self.after_select(mode, exists)?;
            }
            Trigger::Poll => {
                self.apply(changes);
                if self.summary.count() > exists as usize {
                    self.rescan()?;
                }
                self.fetch_new_if_needed(exists)?;
            }
            Trigger::Rescan => {
                self.apply(changes);
                self.rescan()?;
                self.fetch_new_if_needed(exists)?;
            }
        }
        if let Some(m) = self.high_water {
            let stored = self.summary.highest_mod_seq().unwrap_or(0);
            self.summary.set_highest_mod_seq(Some(m.max(stored)));
        }
        self.summary.flush();
        self.report.highest_mod_seq = self.summary.highest_mod_seq();
        debug!(folder = self.folder, report = ?self.report, "reconciled");
        Ok(self.report)
    }

    fn after_select(&mut self, mode: SelectMode, exists: u32) -> Result<()> {
        let count = self.summary.count();
        if count == 0 {
            return self.fetch_new_if_needed(exists);
        }
        if count > exists as usize || mode != SelectMode::Qresync {
            let mut rescan = count != exists as usize || !self.tail_matches(count)?;
            if !rescan && self.channel.capabilities.has(Capability::Condstore) {
                if let Some(since) = self.summary.highest_mod_seq() {
                    rescan = self.condstore(since)?;
                }
            }
            if rescan {
                self.rescan()?;
            }
        }
        self.fetch_new_if_needed(exists)
    }

    fn check_validity(&mut self, validity: Option<u32>) {
        let validity = match validity {
            Some(v) => v,
            None => return,
        };
        let known = self.summary.uid_validity();
        if known == Some(validity) {
            return;
        }
        if known.is_some() || self.summary.count() > 0 {
            warn!(
                folder = self.folder,
                "UIDVALIDITY changed from {:?} to {}, dropping the summary", known, validity
            );
            self.summary.clear();
            self.summary.set_highest_mod_seq(None);
            self.cache.clear_folder(self.folder);
            self.report.invalidated = true;
        }
        self.summary.set_uid_validity(Some(validity));
    }

    fn bump(&mut self, modseq: Option<u64>) {
        if let Some(m) = modseq {
            self.high_water = Some(self.high_water.map_or(m, |h| h.max(m)));
        }
    }

    fn strategy(&mut self, strategy: Strategy) {
        if !self.report.strategies.contains(&strategy) {
            debug!(folder = self.folder, "using {:?}", strategy);
            self.report.strategies.push(strategy);
        }
    }

    fn remove_at(&mut self, index: usize) {
        if let Some(entry) = self.summary.remove_at(index) {
            self.cache.remove_message(self.folder, entry.uid);
            self.report.removed.push(entry.uid);
            self.report.expunged.push(index as Seq + 1);
        }
    }

    fn merge(&mut self, entry: SummaryEntry, server: Flags) {
        let local = merge_flags(entry.flags, entry.server_flags, server);
        if server == entry.server_flags && local == entry.flags {
            return;
        }
        if self.summary.update_flags(entry.uid, server, local)
            && !self.report.flags_changed.contains(&entry.uid)
        {
            self.report.flags_changed.push(entry.uid);
        }
    }

    // Apply pushed changes in the order they arrived.
    fn apply(&mut self, changes: &ChangeSet) {
        for event in &changes.events {
            match event {
                Push::Vanished { uids, .. } => {
                    self.strategy(Strategy::QresyncApply);
                    for index in (0..self.summary.count()).rev() {
                        let uid = match self.summary.entry(index) {
                            Some(e) => e.uid,
                            None => continue,
                        };
                        if uids.iter().any(|r| r.contains(&uid)) {
                            self.remove_at(index);
                        }
                    }
                }
                Push::Expunge(seq) => {
                    let index = (*seq as usize).wrapping_sub(1);
                    if index < self.summary.count() {
                        self.remove_at(index);
                    } else {
                        warn!(folder = self.folder, "EXPUNGE of unknown message {}", seq);
                    }
                }
                Push::Fetch(fetch) => self.apply_fetch(fetch),
                Push::Exists(_) | Push::Recent(_) => {}
            }
        }
    }

    fn apply_fetch(&mut self, fetch: &FetchFlags) {
        self.bump(fetch.modseq);
        let flags = match fetch.flags {
            Some(flags) => flags,
            None => return,
        };
        let index = match fetch.uid {
            Some(uid) => {
                if fetch.modseq.is_some() {
                    self.strategy(Strategy::QresyncApply);
                }
                match self.summary.position(uid) {
                    Some(index) => index,
                    // not fetched yet
                    None => return,
                }
            }
            None => (fetch.seq as usize).wrapping_sub(1),
        };
        if let Some(entry) = self.summary.entry(index) {
            self.merge(entry, flags);
        }
    }

    // Whether the server has our last UID at our last sequence number.
    fn tail_matches(&mut self, count: usize) -> Result<bool> {
        let last = self.summary.last_uid();
        let response = match self
            .channel
            .run_fmt("FETCH %d (UID)", &[Arg::Num(count as u64)])
        {
            Ok(r) => r,
            Err(e @ Error::No(_)) | Err(e @ Error::Bad(_)) => {
                warn!(folder = self.folder, "tail check failed: {}", e);
                return Ok(false);
            }
            Err(e) => return Err(e),
        };
        let reported = parse::fetches(&response)
            .into_iter()
            .find(|f| f.seq as usize == count)
            .and_then(|f| f.uid);
        if reported != last {
            debug!(
                folder = self.folder,
                "message {} is UID {:?} on the server but UID {:?} locally", count, reported, last
            );
        }
        Ok(reported.is_some() && reported == last)
    }

    /// Apply every flag change since `since`. Returns `true` if the summary turned out not to
    /// match the server, and a rescan is needed.
    fn condstore(&mut self, since: u64) -> Result<bool> {
        self.strategy(Strategy::CondstoreIncremental);
        let response = match self.channel.run_fmt(
            "UID FETCH 1:* (UID FLAGS) (CHANGEDSINCE %d)",
            &[Arg::Num(since)],
        ) {
            Ok(r) => r,
            Err(e @ Error::No(_)) | Err(e @ Error::Bad(_)) => {
                warn!(folder = self.folder, "CONDSTORE fetch failed, rescanning: {}", e);
                return Ok(true);
            }
            Err(e) => return Err(e),
        };
        let count = self.summary.count();
        for fetch in parse::fetches(&response) {
            let uid = match fetch.uid {
                Some(uid) => uid,
                None => continue,
            };
            self.bump(fetch.modseq);
            let seq = fetch.seq as usize;
            if seq == 0 || seq > count {
                continue;
            }
            let entry = match self.summary.entry(seq - 1) {
                Some(entry) => entry,
                None => continue,
            };
            if entry.uid != uid {
                warn!(
                    folder = self.folder,
                    "message {} is UID {} on the server but UID {} locally, rescanning",
                    seq,
                    uid,
                    entry.uid
                );
                return Ok(true);
            }
            if let Some(flags) = fetch.flags {
                self.merge(entry, flags);
            }
        }
        Ok(false)
    }

    /// Compare the summary with the server's UID list and drop what the server no longer has.
    ///
    /// The server list covers `1:<last local UID>`, so a local UID it lacks is gone. Sequence
    /// numbers in the reply are not trusted to line up with local positions.
    fn rescan(&mut self) -> Result<()> {
        self.strategy(Strategy::FullRescan);
        let last = match self.summary.last_uid() {
            Some(last) => last,
            None => return Ok(()),
        };
        let response = self
            .channel
            .run_fmt("UID FETCH 1:%d (UID FLAGS)", &[Arg::Num(u64::from(last))])?;

        let mut server: Vec<(Uid, Option<Flags>)> = Vec::new();
        for fetch in parse::fetches(&response) {
            self.bump(fetch.modseq);
            if let Some(uid) = fetch.uid {
                server.push((uid, fetch.flags));
            }
        }
        server.sort_by_key(|&(uid, _)| uid);
        server.dedup_by_key(|&mut (uid, _)| uid);

        let (mut li, mut si) = (0, 0);
        while li < self.summary.count() {
            let local = match self.summary.entry(li) {
                Some(entry) => entry,
                None => break,
            };
            match server.get(si).copied() {
                Some((uid, flags)) if uid == local.uid => {
                    if let Some(flags) = flags {
                        self.merge(local, flags);
                    }
                    li += 1;
                    si += 1;
                }
                Some((uid, _)) if uid < local.uid => {
                    warn!(
                        folder = self.folder,
                        "server has UID {} which the summary lacks", uid
                    );
                    si += 1;
                }
                // gone from the server
                _ => self.remove_at(li),
            }
        }
        self.summary.flush();
        Ok(())
    }

    fn fetch_new_if_needed(&mut self, exists: u32) -> Result<()> {
        if exists as usize > self.summary.count() {
            self.fetch_new()?;
        }
        Ok(())
    }

    /// Append every message past the local tail, in batches.
    fn fetch_new(&mut self) -> Result<()> {
        let last = self.summary.last_uid().unwrap_or(0);
        let response = self.channel.run_fmt(
            "UID SEARCH UID %d:*",
            &[Arg::Num(u64::from(last) + 1)],
        )?;
        // `n:*` always matches the largest UID, even when it is below n
        let mut uids: Vec<Uid> = parse::search_ids(&response)
            .into_iter()
            .filter(|&uid| uid > last)
            .collect();
        uids.sort_unstable();
        uids.dedup();
        if uids.is_empty() {
            return Ok(());
        }
        debug!(folder = self.folder, "fetching {} new messages", uids.len());

        let template = format!(
            "UID FETCH %s (UID FLAGS RFC822.SIZE INTERNALDATE BODY.PEEK[HEADER.FIELDS ({})])",
            parse::HEADER_FIELDS
        );
        for batch in uid_set_batches(&uids, self.uid_set_limit) {
            let response = self.channel.run_fmt(&template, &[Arg::Raw(&batch)])?;
            let mut records = Vec::new();
            for unit in &response.untagged {
                match parse::message_record(unit)? {
                    Some(record) => records.push(record),
                    None if parse::push(unit).is_none() => warn!(
                        folder = self.folder,
                        "skipping unexpected response: {}",
                        String::from_utf8_lossy(unit).trim_end()
                    ),
                    None => {}
                }
            }
            records.sort_by_key(|r| r.uid);
            for record in records {
                if Some(record.uid) <= self.summary.last_uid() {
                    continue;
                }
                self.report.added.push(record.uid);
                self.summary.append(record);
            }
            self.summary.flush();
        }
        Ok(())
    }
}
