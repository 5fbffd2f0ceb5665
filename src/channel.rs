//! The command channel: one tagged command and its complete response at a time.

use std::io::{self, BufRead, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bufstream::BufStream;
use tracing::{debug, trace, warn};

use crate::codec::{self, Arg, Completion, Kind, Namespace, Response, Status};
use crate::error::{Error, Result};
use crate::extensions::idle::SetReadTimeout;
use crate::parse;
use crate::types::{Capabilities, Capability, Notification};
use crate::unsolicited_responses::NotificationSender;

const INITIAL_TAG: u32 = 0;
const CR: u8 = 0x0d;
const LF: u8 = 0x0a;

/// How long the channel waits for leftover input before it writes a new command.
const STRAY_WAIT: Duration = Duration::from_millis(1);

/// A handle that asks the operation running on a session to give up.
///
/// Cancellation is observed before each write and before each response unit is read. The
/// operation then fails with [`Error::Cancelled`](crate::Error::Cancelled) and, because the state
/// of the wire is unknown at that point, the connection is dropped and re-established.
#[derive(Clone, Debug, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    /// Ask the running operation to stop.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether a cancellation is pending.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    // Consume a pending cancellation.
    fn take(&self) -> bool {
        self.0.swap(false, Ordering::SeqCst)
    }
}

/// Which SELECT variant was sent.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SelectMode {
    /// `SELECT folder`
    Plain,
    /// `SELECT folder (CONDSTORE)`
    Condstore,
    /// `SELECT folder (QRESYNC (validity modseq))`
    Qresync,
}

/// Pick the SELECT/EXAMINE variant for a folder.
///
/// `resync` is the folder's last known `(UIDVALIDITY, HIGHESTMODSEQ)`, if any; QRESYNC is only
/// usable once it has been enabled on the connection.
pub(crate) fn select_command(
    capabilities: &Capabilities,
    qresync_enabled: bool,
    resync: Option<(u32, u64)>,
    read_only: bool,
) -> (String, SelectMode) {
    let verb = if read_only { "EXAMINE" } else { "SELECT" };
    match resync {
        Some(_) if qresync_enabled && capabilities.has(Capability::Qresync) => (
            format!("{} %F (QRESYNC (%d %d))", verb),
            SelectMode::Qresync,
        ),
        _ if capabilities.has(Capability::Condstore) => {
            (format!("{} %F (CONDSTORE)", verb), SelectMode::Condstore)
        }
        _ => (format!("{} %F", verb), SelectMode::Plain),
    }
}

/// The greeting a server opened the connection with.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Greeting {
    /// The connection is already authenticated.
    pub(crate) preauth: bool,
    pub(crate) capabilities: Option<Capabilities>,
}

/// Owns the transport and runs commands on it.
///
/// Everything read or written goes through here; callers serialize access with the session's
/// exclusive-use lock.
#[derive(Debug)]
pub(crate) struct Channel<T: Read + Write> {
    stream: BufStream<T>,
    tag: u32,
    tag_prefix: char,
    read_timeout: Option<Duration>,
    open: bool,
    // untagged units that arrived between commands
    pending: Vec<Vec<u8>>,
    pub(crate) capabilities: Capabilities,
    pub(crate) namespace: Namespace,
    pub(crate) qresync_enabled: bool,
    pub(crate) notifier: NotificationSender,
    pub(crate) cancel: CancelHandle,
    // set while the idle thread drives the channel; a cancellation is left for the caller
    pub(crate) background: bool,
}

impl<T: Read + Write + SetReadTimeout> Channel<T> {
    pub(crate) fn new(stream: T, tag_prefix: char) -> Channel<T> {
        Channel {
            stream: BufStream::new(stream),
            tag: INITIAL_TAG,
            tag_prefix,
            read_timeout: None,
            open: true,
            pending: Vec::new(),
            capabilities: Capabilities::default(),
            namespace: Namespace::default(),
            qresync_enabled: false,
            notifier: NotificationSender::detached(),
            cancel: CancelHandle::default(),
            background: false,
        }
    }

    /// Whether the transport is still usable.
    pub(crate) fn is_open(&self) -> bool {
        self.open
    }

    /// Mark the transport unusable. Nothing more is written to it.
    pub(crate) fn close(&mut self) {
        if self.open {
            debug!("closing connection");
        }
        self.open = false;
    }

    pub(crate) fn into_inner(self) -> Result<T> {
        Ok(self.stream.into_inner()?)
    }

    pub(crate) fn next_tag(&mut self) -> String {
        self.tag += 1;
        format!("{}{:05}", self.tag_prefix, self.tag)
    }

    fn check_cancel(&mut self) -> Result<()> {
        if self.background {
            return Ok(());
        }
        if self.cancel.take() {
            debug!("operation cancelled");
            self.close();
            return Err(Error::Cancelled);
        }
        Ok(())
    }

    fn check_open(&self) -> Result<()> {
        if self.open {
            Ok(())
        } else {
            Err(Error::ConnectionLost)
        }
    }

    // Any transport failure leaves the wire in an unknown state.
    fn fail<R>(&mut self, err: Error) -> Result<R> {
        if err.triggers_reconnect() {
            self.close();
        }
        Err(err)
    }

    pub(crate) fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        if self.read_timeout != timeout {
            self.stream.get_mut().set_read_timeout(timeout)?;
            self.read_timeout = timeout;
        }
        Ok(())
    }

    pub(crate) fn read_greeting(&mut self) -> Result<Greeting> {
        let unit = self.read_unit()?;
        if let Some(text) = codec::bye_text(&unit) {
            self.close();
            return Err(Error::Bye(text));
        }
        let preauth = unit.len() >= 9 && unit[2..9].eq_ignore_ascii_case(b"PREAUTH");
        if !preauth && !(unit.len() >= 4 && unit[2..4].eq_ignore_ascii_case(b"OK")) {
            return Err(Error::Parse(crate::error::ParseError::Unexpected(
                String::from_utf8_lossy(&unit).trim_end().to_string(),
            )));
        }
        Ok(Greeting {
            preauth,
            capabilities: parse::capabilities_code(&unit),
        })
    }

    pub(crate) fn write_line(&mut self, buf: &[u8], redacted: bool) -> Result<()> {
        self.check_cancel()?;
        self.check_open()?;
        let written = self
            .stream
            .write_all(buf)
            .and_then(|_| self.stream.write_all(&[CR, LF]))
            .and_then(|_| self.stream.flush());
        if let Err(e) = written {
            let err = match e.kind() {
                io::ErrorKind::WriteZero
                | io::ErrorKind::BrokenPipe
                | io::ErrorKind::ConnectionReset
                | io::ErrorKind::ConnectionAborted => Error::ConnectionLost,
                _ => Error::Io(e),
            };
            return self.fail(err);
        }
        if !redacted {
            trace!("C: {}", String::from_utf8_lossy(buf));
        }
        Ok(())
    }

    /// Write a tagged command and return its tag.
    pub(crate) fn send_command(&mut self, command: &str) -> Result<String> {
        self.check_cancel()?;
        self.check_open()?;
        self.drain_stray()?;
        let tag = self.next_tag();
        let line = format!("{} {}", tag, command);
        let redacted = command.len() >= 6 && command[..6].eq_ignore_ascii_case("LOGIN ");
        if redacted {
            trace!("C: {} LOGIN <redacted>", tag);
        }
        self.write_line(line.as_bytes(), redacted)?;
        Ok(tag)
    }

    /// Read one response unit, blocking.
    pub(crate) fn read_unit(&mut self) -> Result<Vec<u8>> {
        self.check_cancel()?;
        self.check_open()?;
        match codec::read_unit(&mut self.stream) {
            Ok(unit) => Ok(unit),
            Err(e) => self.fail(e),
        }
    }

    /// Wait up to `tick` for the start of a response unit, then read all of it.
    ///
    /// Returns `None` if nothing arrived in time. Once the first byte is there the rest of the
    /// unit is read with the previous timeout, so a unit is never split across polls.
    pub(crate) fn poll_unit(&mut self, tick: Duration) -> Result<Option<Vec<u8>>> {
        self.check_cancel()?;
        self.check_open()?;
        let previous = self.read_timeout;
        self.set_read_timeout(Some(tick))?;
        let filled = self.stream.fill_buf().map(|buf| buf.len());
        self.set_read_timeout(previous)?;
        match filled {
            Ok(0) => self.fail(Error::ConnectionLost),
            Ok(_) => self.read_unit().map(Some),
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                Ok(None)
            }
            Err(e) => self.fail(Error::Io(e)),
        }
    }

    // Pick up anything the server sent since the last command completed. Untagged data is kept
    // for the next response; a BYE ends the connection.
    fn drain_stray(&mut self) -> Result<()> {
        while let Some(unit) = self.poll_unit(STRAY_WAIT)? {
            match codec::classify(&unit, "") {
                Kind::Untagged => {
                    self.screen_untagged(&unit)?;
                    debug!("keeping untagged data received between commands");
                    self.pending.push(unit);
                }
                _ => warn!(
                    "discarding stray input: {}",
                    String::from_utf8_lossy(&unit).trim_end()
                ),
            }
        }
        Ok(())
    }

    fn screen_alert(&self, unit: &[u8]) {
        if let Some(alert) = codec::alert_text(unit) {
            warn!("server alert: {}", alert);
            self.notifier.send(Notification::Alert(alert));
        }
    }

    // Alerts are reported, BYE ends the connection.
    pub(crate) fn screen_untagged(&mut self, unit: &[u8]) -> Result<()> {
        self.screen_alert(unit);
        if let Some(text) = codec::bye_text(unit) {
            warn!("server closed the connection: {}", text);
            self.close();
            self.notifier.send(Notification::Bye(text.clone()));
            return Err(Error::Bye(text));
        }
        Ok(())
    }

    /// Collect untagged units until the completion of `tag`.
    pub(crate) fn read_until_tagged(&mut self, tag: &str) -> Result<Response> {
        let mut untagged = std::mem::take(&mut self.pending);
        loop {
            let unit = self.read_unit()?;
            match codec::classify(&unit, tag) {
                Kind::Continuation(text) => {
                    return Ok(Response {
                        untagged,
                        completion: Completion::Continue(text),
                    })
                }
                Kind::Tagged(status, text) => {
                    self.screen_alert(&unit);
                    return match status {
                        Status::Ok => Ok(Response {
                            untagged,
                            completion: Completion::Ok(text),
                        }),
                        Status::No => Err(Error::No(text)),
                        Status::Bad => Err(Error::Bad(text)),
                    };
                }
                Kind::Untagged => {
                    self.screen_untagged(&unit)?;
                    untagged.push(unit);
                }
                Kind::Foreign => warn!(
                    "ignoring completion of another command: {}",
                    String::from_utf8_lossy(&unit).trim_end()
                ),
            }
        }
    }

    /// Run one command to completion.
    pub(crate) fn run(&mut self, command: &str) -> Result<Response> {
        let tag = self.send_command(command)?;
        self.read_until_tagged(&tag)
    }

    /// Expand a command template and run it.
    pub(crate) fn run_fmt(&mut self, template: &str, args: &[Arg<'_>]) -> Result<Response> {
        let command = codec::format_command(
            template,
            args,
            self.capabilities.has(Capability::LiteralPlus),
            &self.namespace,
        )?;
        self.run(&command)
    }

    /// Open `folder` with the best SELECT variant the server and the local state allow.
    pub(crate) fn run_select(
        &mut self,
        folder: &str,
        resync: Option<(u32, u64)>,
        read_only: bool,
    ) -> Result<(Response, SelectMode)> {
        let (template, mode) =
            select_command(&self.capabilities, self.qresync_enabled, resync, read_only);
        debug!("opening {} with {:?}", folder, mode);
        let response = match (mode, resync) {
            (SelectMode::Qresync, Some((validity, modseq))) => self.run_fmt(
                &template,
                &[
                    Arg::Str(folder),
                    Arg::Num(u64::from(validity)),
                    Arg::Num(modseq),
                ],
            )?,
            _ => self.run_fmt(&template, &[Arg::Str(folder)])?,
        };
        Ok((response, mode))
    }

    /// Send LOGOUT, accept the BYE that comes with it and close the channel.
    pub(crate) fn logout(&mut self) -> Result<()> {
        let tag = self.send_command("LOGOUT")?;
        let result = loop {
            let unit = match self.read_unit() {
                Ok(unit) => unit,
                // some servers hang up right after the BYE
                Err(Error::ConnectionLost) => break Ok(()),
                Err(e) => break Err(e),
            };
            match codec::classify(&unit, &tag) {
                Kind::Tagged(Status::Ok, _) => break Ok(()),
                Kind::Tagged(Status::No, text) => break Err(Error::No(text)),
                Kind::Tagged(Status::Bad, text) => break Err(Error::Bad(text)),
                _ => self.screen_alert(&unit),
            }
        };
        self.close();
        result
    }
}
