use std::cell::{RefCell, RefMut};
use std::collections::BTreeSet;
use std::fmt;
use std::io::{Read, Write};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard, ReentrantMutex, ReentrantMutexGuard};
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, instrument, warn};

use crate::bodystructure::{bodystructure_in_fetch, envelope_in_fetch};
use crate::cache::{MemoryCache, MessageCache};
use crate::channel::{CancelHandle, Channel};
use crate::client::Client;
use crate::codec::{Arg, Namespace};
use crate::error::{Error, ParseError, Result, ValidateError};
use crate::extensions::idle::{self, Coordinator, IdleState, SetReadTimeout};
use crate::parse;
use crate::reconcile::{ChangeSet, Reconciler, SyncReport, Trigger};
use crate::summary::{FolderSummary, MemoryStore, SummaryStore};
use crate::types::{
    BodyStructure, Capabilities, Capability, Envelope, Flags, FolderInfo, Mailbox, Notification,
    NotificationCategory, Uid,
};
use crate::unsolicited_responses::NotificationSender;
use crate::utils::{iter_join, uid_set_batches};

/// Re-establishes the transport of a session: connects, negotiates TLS, and reads the greeting.
pub(crate) type Connector<T> = Box<dyn FnMut() -> Result<Client<T>> + Send>;

/// Knobs that shape how a [`Session`] talks to its server.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct SessionConfig {
    /// The character every command tag starts with.
    pub tag_prefix: char,
    /// Whether a background thread keeps the selected folder in IDLE.
    pub idle: bool,
    /// How long one IDLE command may run before it is re-issued.
    pub idle_interval: Duration,
    /// How often the idle thread looks at the socket and at waiting callers.
    pub idle_tick: Duration,
    /// The longest UID set sent in one command, in bytes.
    pub uid_set_limit: usize,
    /// Overrides `NAMESPACE` discovery.
    pub namespace: Option<Namespace>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            tag_prefix: 'A',
            idle: true,
            idle_interval: Duration::from_secs(28 * 60),
            idle_tick: Duration::from_millis(500),
            uid_set_limit: 768,
            namespace: None,
        }
    }
}

/// A user name and password, kept for logging in again after a reconnect.
#[derive(Clone)]
pub(crate) struct Credentials {
    pub(crate) user: String,
    pub(crate) password: SecretString,
}

impl Credentials {
    pub(crate) fn new(user: &str, password: &str) -> Self {
        Credentials {
            user: user.to_string(),
            password: SecretString::from(password.to_string()),
        }
    }

    pub(crate) fn password(&self) -> &str {
        self.password.expose_secret()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// How [`Session::store_flags`] changes flags.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreOp {
    /// `+FLAGS.SILENT`
    Add,
    /// `-FLAGS.SILENT`
    Remove,
}

impl StoreOp {
    fn item(self) -> &'static str {
        match self {
            StoreOp::Add => "+FLAGS.SILENT",
            StoreOp::Remove => "-FLAGS.SILENT",
        }
    }

    fn apply(self, flags: Flags, change: Flags) -> Flags {
        match self {
            StoreOp::Add => flags | change,
            StoreOp::Remove => flags - change,
        }
    }
}

#[derive(Clone, Debug)]
struct Selected {
    folder: String,
    mailbox: Mailbox,
}

#[derive(Clone, Copy, Debug)]
enum Cycle {
    Select(crate::channel::SelectMode),
    Poll,
    Rescan,
}

/// All mutable state of a session. Only reached through the session's exclusive-use lock.
pub(crate) struct Engine<T: Read + Write + SetReadTimeout + Send + 'static> {
    pub(crate) channel: Option<Channel<T>>,
    selected: Option<Selected>,
    summaries: Box<dyn SummaryStore>,
    cache: Box<dyn MessageCache>,
    connector: Option<Connector<T>>,
    credentials: Option<Credentials>,
    config: SessionConfig,
    notifier: NotificationSender,
    cancel: CancelHandle,
}

impl<T: Read + Write + SetReadTimeout + Send + 'static> Engine<T> {
    fn online(&self) -> bool {
        self.channel.as_ref().map_or(false, |c| c.is_open())
    }

    fn channel(&mut self) -> Result<&mut Channel<T>> {
        self.channel.as_mut().ok_or(Error::Offline)
    }

    fn selected(&self) -> Result<&Selected> {
        self.selected.as_ref().ok_or(Error::NoSelectedFolder)
    }

    fn install(&mut self, mut channel: Channel<T>) {
        channel.notifier = self.notifier.clone();
        channel.cancel = self.cancel.clone();
        self.channel = Some(channel);
    }

    /// Whether the idle thread has something to do.
    pub(crate) fn can_idle(&self) -> bool {
        self.config.idle
            && self.selected.is_some()
            && self
                .channel
                .as_ref()
                .map_or(false, |c| c.is_open() && c.capabilities.has(Capability::Idle))
    }

    pub(crate) fn selected_exists(&self) -> u32 {
        self.selected.as_ref().map_or(0, |s| s.mailbox.exists)
    }

    pub(crate) fn drop_connection(&mut self) {
        if let Some(mut channel) = self.channel.take() {
            channel.close();
        }
    }

    /// Reconcile changes the server pushed, and announce them.
    pub(crate) fn apply_changes(&mut self, changes: &ChangeSet) -> Result<SyncReport> {
        let report = self.reconcile(Cycle::Poll, changes)?;
        self.announce(&report);
        Ok(report)
    }

    fn announce(&self, report: &SyncReport) {
        if report.is_empty() {
            return;
        }
        if let Some(selected) = &self.selected {
            self.notifier.send(Notification::FolderChanged {
                folder: selected.folder.clone(),
                report: report.clone(),
            });
        }
    }

    fn reconcile(&mut self, cycle: Cycle, changes: &ChangeSet) -> Result<SyncReport> {
        let Engine {
            channel,
            selected,
            summaries,
            cache,
            config,
            ..
        } = self;
        let channel = channel.as_mut().ok_or(Error::Offline)?;
        let selected = selected.as_mut().ok_or(Error::NoSelectedFolder)?;
        let exists = changes.exists(selected.mailbox.exists);
        selected.mailbox.exists = exists;
        let trigger = match cycle {
            Cycle::Select(mode) => Trigger::Select {
                mailbox: &selected.mailbox,
                mode,
            },
            Cycle::Poll => Trigger::Poll,
            Cycle::Rescan => Trigger::Rescan,
        };
        let summary = summaries.folder(&selected.folder);
        Reconciler::new(
            channel,
            summary,
            &mut **cache,
            &selected.folder,
            config.uid_set_limit,
        )
        .run(trigger, changes, exists)
    }

    fn open_folder(&mut self, folder: &str, read_only: bool) -> Result<(Mailbox, SyncReport)> {
        let resync = {
            let summary = self.summaries.folder(folder);
            summary.uid_validity().zip(summary.highest_mod_seq())
        };
        self.selected = None;
        let (response, mode) = match self.channel()?.run_select(folder, resync, read_only) {
            Ok(selected) => selected,
            Err(Error::No(text)) => {
                warn!(folder, "server refused to open the folder: {}", text);
                return Err(Error::FolderGone(folder.to_string()));
            }
            Err(e) => return Err(e),
        };
        let mailbox = parse::mailbox(&response, read_only);
        self.selected = Some(Selected {
            folder: folder.to_string(),
            mailbox,
        });
        let report = self.reconcile(Cycle::Select(mode), &ChangeSet::from_response(&response))?;
        let mailbox = self.selected()?.mailbox.clone();
        Ok((mailbox, report))
    }

    #[instrument(skip(self))]
    pub(crate) fn reconnect(&mut self) -> Result<()> {
        self.drop_connection();
        let connector = match self.connector.as_mut() {
            Some(connector) => connector,
            None => return Err(Error::Offline),
        };
        debug!("reconnecting");
        let client = connector()?;
        let channel = client.establish(self.credentials.as_ref())?;
        self.install(channel);
        if let Some(selected) = self.selected.take() {
            let read_only = selected.mailbox.read_only;
            self.open_folder(&selected.folder, read_only)?;
        }
        self.notifier.send(Notification::Reconnected);
        Ok(())
    }

    fn store_flags(&mut self, uids: &[Uid], op: StoreOp, flags: Flags) -> Result<()> {
        let storable: Vec<String> = flags
            .iter()
            .filter(|f| f.is_storable())
            .map(|f| f.to_string())
            .collect();
        if storable.is_empty() || uids.is_empty() {
            return Ok(());
        }
        let folder = self.selected()?.folder.clone();
        let uids: Vec<Uid> = uids.iter().copied().collect::<BTreeSet<_>>().into_iter().collect();
        let list = iter_join(storable.iter(), " ");
        let mut changes = ChangeSet::default();
        for batch in uid_set_batches(&uids, self.config.uid_set_limit) {
            let response = self.channel()?.run_fmt(
                "UID STORE %s %s (%s)",
                &[Arg::Raw(&batch), Arg::Raw(op.item()), Arg::Raw(&list)],
            )?;
            for unit in &response.untagged {
                if let Some(push) = parse::push(unit) {
                    changes.record(push);
                }
            }
        }
        let flags = flags.iter().filter(|f| f.is_storable()).collect::<Flags>();
        let summary = self.summaries.folder(&folder);
        for &uid in &uids {
            if let Some(entry) = summary.position(uid).and_then(|i| summary.entry(i)) {
                summary.update_flags(
                    uid,
                    op.apply(entry.server_flags, flags),
                    op.apply(entry.flags, flags),
                );
            }
        }
        summary.flush();
        if !changes.is_empty() {
            let report = self.reconcile(Cycle::Poll, &changes)?;
            self.announce(&report);
        }
        Ok(())
    }

    fn expunge_uids(&mut self, uids: &[Uid]) -> Result<SyncReport> {
        self.selected()?;
        let uids: Vec<Uid> = uids.iter().copied().collect::<BTreeSet<_>>().into_iter().collect();
        let mut changes = ChangeSet::default();
        for batch in uid_set_batches(&uids, self.config.uid_set_limit) {
            let channel = self.channel()?;
            let stored =
                channel.run_fmt("UID STORE %s +FLAGS.SILENT (\\Deleted)", &[Arg::Raw(&batch)])?;
            changes.extend(&stored);
            let expunged = if channel.capabilities.has(Capability::UidPlus) {
                match channel.run_fmt("UID EXPUNGE %s", &[Arg::Raw(&batch)]) {
                    Err(Error::No(text)) | Err(Error::Bad(text)) => {
                        warn!("UID EXPUNGE refused, falling back to EXPUNGE: {}", text);
                        channel.capabilities.remove(Capability::UidPlus);
                        channel.run("EXPUNGE")?
                    }
                    result => result?,
                }
            } else {
                channel.run("EXPUNGE")?
            };
            changes.extend(&expunged);
        }
        self.reconcile(Cycle::Poll, &changes)
    }

    fn list_folders(&mut self, pattern: &str) -> Result<Vec<FolderInfo>> {
        let channel = self.channel()?;
        let response = channel.run_fmt("LIST \"\" %G", &[Arg::Str(pattern)])?;
        Ok(parse::folders(&response, &channel.namespace))
    }

    fn fetch_part(&mut self, uid: Uid, part_spec: &str) -> Result<Vec<u8>> {
        if let Some(c) = part_spec
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '.'))
        {
            return Err(ValidateError::InvalidChar(c).into());
        }
        let folder = self.selected()?.folder.clone();
        if let Some(payload) = self.cache.get(&folder, uid, part_spec) {
            debug!(uid, part_spec, "served from the cache");
            return Ok(payload);
        }
        let channel = self.channel()?;
        let args = [Arg::Num(u64::from(uid)), Arg::Raw(part_spec)];
        let binary = if channel.capabilities.has(Capability::Binary) {
            match channel.run_fmt("UID FETCH %d (BINARY.PEEK[%s])", &args) {
                Ok(response) => Some(response),
                Err(Error::No(text)) => {
                    debug!("BINARY refused ({}), fetching the encoded part", text);
                    None
                }
                Err(e) => return Err(e),
            }
        } else {
            None
        };
        let (response, marker) = match binary {
            Some(response) => (response, "BINARY["),
            None => (
                channel.run_fmt("UID FETCH %d (BODY.PEEK[%s])", &args)?,
                "BODY[",
            ),
        };
        for unit in &response.untagged {
            if let Some(payload) = parse::section(unit, marker)? {
                self.cache.put(&folder, uid, part_spec, &payload);
                return Ok(payload);
            }
        }
        Err(Error::Parse(ParseError::Unexpected(format!(
            "no {}{}] data for message {}",
            marker, part_spec, uid
        ))))
    }
}

/// State shared between a session handle and its idle thread.
pub(crate) struct Shared<T: Read + Write + SetReadTimeout + Send + 'static> {
    pub(crate) engine: ReentrantMutex<RefCell<Engine<T>>>,
    pub(crate) idle: Coordinator,
}

/// Exclusive use of the connection, held for the lifetime of the guard.
///
/// Taking it registers a wait reason first, so that a running IDLE is ended before the lock is
/// granted. Guards nest on the same thread.
struct Exclusive<'a, T: Read + Write + SetReadTimeout + Send + 'static> {
    guard: Option<ReentrantMutexGuard<'a, RefCell<Engine<T>>>>,
    idle: &'a Coordinator,
}

impl<'a, T: Read + Write + SetReadTimeout + Send + 'static> Exclusive<'a, T> {
    fn new(shared: &'a Shared<T>) -> Self {
        shared.idle.begin_wait();
        let guard = shared.engine.lock();
        Exclusive {
            guard: Some(guard),
            idle: &shared.idle,
        }
    }

    fn engine(&self) -> Result<RefMut<'_, Engine<T>>> {
        match &self.guard {
            Some(guard) => guard.try_borrow_mut().map_err(|_| Error::Busy),
            None => Err(Error::Busy),
        }
    }
}

impl<'a, T: Read + Write + SetReadTimeout + Send + 'static> Drop for Exclusive<'a, T> {
    fn drop(&mut self) {
        self.guard.take();
        self.idle.end_wait();
    }
}

/// An authenticated IMAP session.
///
/// A session owns one connection, and keeps the folder it has selected in agreement with a local
/// [`FolderSummary`]. When the server advertises `IDLE`, a background thread keeps the selected
/// folder in IDLE whenever no method of the session is running, and reconciles what the server
/// pushes. Every method takes the connection away from that thread first, so methods can be
/// called from any thread at any time.
///
/// Transport failures and cancellations make the session try once to connect again, log in again
/// and re-open the selected folder before the error is returned. A session that could not
/// reconnect is offline; its next call tries again.
pub struct Session<T: Read + Write + SetReadTimeout + Send + 'static> {
    shared: Arc<Shared<T>>,
    idle_thread: Mutex<Option<JoinHandle<()>>>,
    notifications: Mutex<mpsc::Receiver<Notification>>,
    cancel: CancelHandle,
}

impl<T: Read + Write + SetReadTimeout + Send + 'static> Session<T> {
    pub(crate) fn new(
        channel: Channel<T>,
        config: SessionConfig,
        credentials: Option<Credentials>,
        connector: Option<Connector<T>>,
    ) -> Session<T> {
        let (tx, rx) = mpsc::channel();
        let cancel = CancelHandle::default();
        let mut engine = Engine {
            channel: None,
            selected: None,
            summaries: Box::new(MemoryStore::new()),
            cache: Box::new(MemoryCache::new()),
            connector,
            credentials,
            config: config.clone(),
            notifier: NotificationSender::new(tx),
            cancel: cancel.clone(),
        };
        engine.install(channel);
        let shared = Arc::new(Shared {
            engine: ReentrantMutex::new(RefCell::new(engine)),
            idle: Coordinator::new(config.idle_tick, config.idle_interval),
        });
        let idle_thread = if config.idle {
            let thread_shared = Arc::clone(&shared);
            match thread::Builder::new()
                .name("imap-idle".to_string())
                .spawn(move || idle::run(thread_shared))
            {
                Ok(handle) => Some(handle),
                Err(e) => {
                    warn!("unable to start the idle thread: {}", e);
                    None
                }
            }
        } else {
            None
        };
        Session {
            shared,
            idle_thread: Mutex::new(idle_thread),
            notifications: Mutex::new(rx),
            cancel,
        }
    }

    fn exclusive(&self) -> Exclusive<'_, T> {
        Exclusive::new(&self.shared)
    }

    // Run `op` on a live connection. A transport error or a cancellation makes the session
    // reconnect once before the error is returned.
    fn with_engine<R>(
        &self,
        what: &str,
        op: impl FnOnce(&mut Engine<T>) -> Result<R>,
    ) -> Result<R> {
        let exclusive = self.exclusive();
        let mut engine = exclusive.engine()?;
        if !engine.online() {
            if let Err(e) = engine.reconnect() {
                warn!("{}: session is offline: {}", what, e);
                return Err(Error::Offline);
            }
        }
        match op(&mut *engine) {
            Err(e) if e.triggers_reconnect() => {
                warn!("{} failed: {}", what, e);
                if let Err(re) = engine.reconnect() {
                    warn!("reconnect failed: {}", re);
                }
                Err(e)
            }
            result => result,
        }
    }

    /// Run several operations without letting IDLE, or any other thread, use the connection in
    /// between.
    pub fn atomically<R>(&self, f: impl FnOnce(&Self) -> R) -> R {
        let _exclusive = self.exclusive();
        f(self)
    }

    /// Replace the summary store. Folders opened afterwards are reconciled against it.
    pub fn set_summary_store(&self, store: Box<dyn SummaryStore>) -> Result<()> {
        self.exclusive().engine()?.summaries = store;
        Ok(())
    }

    /// Replace the content cache.
    pub fn set_cache(&self, cache: Box<dyn MessageCache>) -> Result<()> {
        self.exclusive().engine()?.cache = cache;
        Ok(())
    }

    /// Look at the summary of `folder`.
    pub fn with_summary<R>(
        &self,
        folder: &str,
        f: impl FnOnce(&mut dyn FolderSummary) -> R,
    ) -> Result<R> {
        let exclusive = self.exclusive();
        let mut engine = exclusive.engine()?;
        Ok(f(engine.summaries.folder(folder)))
    }

    /// The capabilities the server advertised after authentication.
    pub fn capabilities(&self) -> Result<Capabilities> {
        let exclusive = self.exclusive();
        let mut engine = exclusive.engine()?;
        Ok(engine.channel()?.capabilities.clone())
    }

    /// The selected folder and what is known about it.
    pub fn selected(&self) -> Result<Option<(String, Mailbox)>> {
        let exclusive = self.exclusive();
        let engine = exclusive.engine()?;
        Ok(engine
            .selected
            .as_ref()
            .map(|s| (s.folder.clone(), s.mailbox.clone())))
    }

    /// Open `folder` read-write and reconcile its summary.
    ///
    /// `folder` is a `/`-separated path; the namespace prefix and hierarchy delimiter are
    /// applied on the wire. A folder the server refuses to open yields
    /// [`Error::FolderGone`], and leaves no folder selected.
    #[instrument(skip(self))]
    pub fn select(&self, folder: &str) -> Result<(Mailbox, SyncReport)> {
        self.with_engine("select", |e| e.open_folder(folder, false))
    }

    /// Open `folder` read-only and reconcile its summary.
    #[instrument(skip(self))]
    pub fn examine(&self, folder: &str) -> Result<(Mailbox, SyncReport)> {
        self.with_engine("examine", |e| e.open_folder(folder, true))
    }

    /// Send `NOOP`, and reconcile whatever the server reports with it.
    #[instrument(skip(self))]
    pub fn noop(&self) -> Result<SyncReport> {
        self.with_engine("noop", |e| {
            let response = e.channel()?.run("NOOP")?;
            if e.selected.is_none() {
                return Ok(SyncReport::default());
            }
            e.apply_changes(&ChangeSet::from_response(&response))
        })
    }

    /// Compare the whole summary of the selected folder with the server.
    #[instrument(skip(self))]
    pub fn refresh(&self) -> Result<SyncReport> {
        self.with_engine("refresh", |e| {
            e.selected()?;
            e.reconcile(Cycle::Rescan, &ChangeSet::default())
        })
    }

    /// Permanently remove the messages marked `\Deleted` from the selected folder.
    #[instrument(skip(self))]
    pub fn expunge(&self) -> Result<SyncReport> {
        self.with_engine("expunge", |e| {
            e.selected()?;
            let response = e.channel()?.run("EXPUNGE")?;
            e.reconcile(Cycle::Poll, &ChangeSet::from_response(&response))
        })
    }

    /// Permanently remove the given messages from the selected folder.
    ///
    /// The messages are marked `\Deleted` first. With `UIDPLUS` only those messages are expunged;
    /// without it, or when the server refuses `UID EXPUNGE`, every message marked `\Deleted` goes.
    #[instrument(skip(self))]
    pub fn expunge_uids(&self, uids: &[Uid]) -> Result<SyncReport> {
        if uids.is_empty() {
            return Ok(SyncReport::default());
        }
        self.with_engine("expunge uids", |e| e.expunge_uids(uids))
    }

    /// The folders matching a `LIST` pattern such as `*` or `%`.
    ///
    /// The pattern is sent as it is, in modified UTF-7; it is not prefixed with the personal
    /// namespace.
    #[instrument(skip(self))]
    pub fn list_folders(&self, pattern: &str) -> Result<Vec<FolderInfo>> {
        self.with_engine("list", |e| e.list_folders(pattern))
    }

    /// Add or remove flags on messages of the selected folder.
    ///
    /// `\Recent` cannot be stored and is left out. The summary records the result as the new
    /// server state of each message.
    #[instrument(skip(self))]
    pub fn store_flags(&self, uids: &[Uid], op: StoreOp, flags: Flags) -> Result<()> {
        self.with_engine("store", |e| e.store_flags(uids, op, flags))
    }

    /// The MIME structure of a message in the selected folder.
    #[instrument(skip(self))]
    pub fn fetch_structure(&self, uid: Uid) -> Result<BodyStructure> {
        self.with_engine("fetch structure", |e| {
            e.selected()?;
            let response = e
                .channel()?
                .run_fmt("UID FETCH %d (BODYSTRUCTURE)", &[Arg::Num(u64::from(uid))])?;
            for unit in &response.untagged {
                if let Some(structure) = bodystructure_in_fetch(unit)? {
                    return Ok(structure);
                }
            }
            Err(Error::Parse(ParseError::Unexpected(format!(
                "no BODYSTRUCTURE for message {}",
                uid
            ))))
        })
    }

    /// The envelope of a message in the selected folder.
    #[instrument(skip(self))]
    pub fn fetch_envelope(&self, uid: Uid) -> Result<Envelope> {
        self.with_engine("fetch envelope", |e| {
            e.selected()?;
            let response = e
                .channel()?
                .run_fmt("UID FETCH %d (ENVELOPE)", &[Arg::Num(u64::from(uid))])?;
            for unit in &response.untagged {
                if let Some(envelope) = envelope_in_fetch(unit)? {
                    return Ok(envelope);
                }
            }
            Err(Error::Parse(ParseError::Unexpected(format!(
                "no ENVELOPE for message {}",
                uid
            ))))
        })
    }

    /// The content of one part of a message, e.g. `1.2`; an empty `part_spec` is the whole
    /// message.
    ///
    /// Parts come from the cache when possible. Otherwise they are fetched decoded with
    /// `BINARY` where the server supports it, and in their transfer encoding if not.
    #[instrument(skip(self))]
    pub fn fetch_part(&self, uid: Uid, part_spec: &str) -> Result<Vec<u8>> {
        self.with_engine("fetch part", |e| e.fetch_part(uid, part_spec))
    }

    /// Log out and stop the idle thread.
    #[instrument(skip(self))]
    pub fn logout(&self) -> Result<()> {
        let result = {
            let exclusive = self.exclusive();
            let mut engine = exclusive.engine()?;
            engine.connector = None;
            match engine.channel.as_mut() {
                Some(channel) if channel.is_open() => channel.logout(),
                _ => Ok(()),
            }
        };
        self.stop_idle();
        result
    }

    /// Drop the connection at once, without ending IDLE politely. The next call reconnects.
    pub fn kill(&self) {
        if self.idle_thread.lock().is_some() {
            self.shared.idle.kill();
        } else if let Ok(mut engine) = self.exclusive().engine() {
            engine.drop_connection();
        }
    }

    /// A handle that cancels the operation running on this session from another thread.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Where the background IDLE stands.
    pub fn idle_state(&self) -> IdleState {
        self.shared.idle.state()
    }

    /// Events the session reports outside of method results.
    pub fn notifications(&self) -> MutexGuard<'_, mpsc::Receiver<Notification>> {
        self.notifications.lock()
    }

    /// Only report notifications of the given categories. Queued notifications of other
    /// categories are dropped.
    pub fn set_notification_filter(
        &self,
        categories: crate::types::EnumSet<NotificationCategory>,
    ) -> Result<()> {
        let exclusive = self.exclusive();
        let mut engine = exclusive.engine()?;
        let rx = self.notifications.lock();
        engine.notifier.request(&rx, categories);
        let notifier = engine.notifier.clone();
        if let Some(channel) = engine.channel.as_mut() {
            channel.notifier = notifier;
        }
        Ok(())
    }

    fn stop_idle(&self) {
        self.shared.idle.shutdown();
        if let Some(handle) = self.idle_thread.lock().take() {
            if handle.join().is_err() {
                warn!("idle thread panicked");
            }
        }
    }
}

impl<T: Read + Write + SetReadTimeout + Send + 'static> Drop for Session<T> {
    fn drop(&mut self) {
        self.stop_idle();
    }
}

impl<T: Read + Write + SetReadTimeout + Send + 'static> fmt::Debug for Session<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("idle", &self.shared.idle.state())
            .finish()
    }
}
