//! Background use of the IMAP IDLE command specified in [RFC
//! 2177](https://tools.ietf.org/html/rfc2177).
//!
//! A [`Session`](crate::Session) runs one thread that puts the connection into IDLE whenever no
//! caller needs it, so the server can push new mail instead of being polled. Callers never see
//! IDLE directly: every session operation first registers a *wait reason*, which makes the
//! thread send `DONE`, apply what the server pushed, and let go of the connection. Once the
//! last caller is done, and the connection has been left alone for a tick, IDLE starts again.
//!
//! Note that the server MAY consider a client inactive if it has an IDLE command running, and if
//! such a server has an inactivity timeout it MAY log the client off implicitly at the end of its
//! timeout period. Because of that, IDLE is re-issued every
//! [`idle_interval`](crate::ClientBuilder::idle_interval), 28 minutes by default.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use crate::channel::Channel;
use crate::codec::{self, Completion, Kind, Status};
use crate::error::{Error, Result};
use crate::parse;
use crate::reconcile::ChangeSet;
use crate::session::{Engine, Shared};

#[cfg(feature = "native-tls")]
use native_tls::TlsStream;
#[cfg(feature = "rustls-tls")]
use rustls_connector::TlsStream as RustlsStream;

/// Must be implemented for a transport in order for a `Session` using that transport to support
/// background IDLE, which polls the connection with short read timeouts.
pub trait SetReadTimeout {
    /// Set the timeout for subsequent reads to the given one.
    ///
    /// If `timeout` is `None`, the read timeout should be removed.
    ///
    /// See also `std::net::TcpStream::set_read_timeout`.
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<()>;
}

impl SetReadTimeout for TcpStream {
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        TcpStream::set_read_timeout(self, timeout).map_err(Error::Io)
    }
}

#[cfg(feature = "native-tls")]
impl<T: SetReadTimeout + Read + Write> SetReadTimeout for TlsStream<T> {
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        self.get_mut().set_read_timeout(timeout)
    }
}

#[cfg(feature = "rustls-tls")]
impl<T: SetReadTimeout + Read + Write> SetReadTimeout for RustlsStream<T> {
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        self.sock.set_read_timeout(timeout)
    }
}

/// Where the background IDLE of a session stands.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IdleState {
    /// No IDLE command is running.
    Inactive,
    /// `IDLE` was sent and the server's continuation is awaited.
    Starting,
    /// The server is pushing changes; `DONE` has not been sent.
    Active,
    /// `DONE` was sent and the pushed changes are being applied.
    Stopping,
}

#[derive(Debug)]
struct Control {
    state: IdleState,
    wait_reasons: usize,
    kill: bool,
    shutdown: bool,
    // nothing to idle on until a caller touches the session again
    parked: bool,
    last_release: Instant,
}

/// What woke the idle thread up.
#[derive(Debug, PartialEq, Eq)]
enum Wake {
    Ready,
    Kill,
    Shutdown,
}

/// Why an active IDLE is being ended.
#[derive(Debug, PartialEq, Eq)]
enum Stop {
    Kill,
    Shutdown,
    Yield,
    Reissue,
    NewMail,
    Quiet,
    ServerDone,
}

/// The wait-reasons counter and IDLE state of one session, shared between callers and the idle
/// thread.
#[derive(Debug)]
pub(crate) struct Coordinator {
    control: Mutex<Control>,
    changed: Condvar,
    pub(crate) tick: Duration,
    pub(crate) interval: Duration,
}

impl Coordinator {
    pub(crate) fn new(tick: Duration, interval: Duration) -> Self {
        Coordinator {
            control: Mutex::new(Control {
                state: IdleState::Inactive,
                wait_reasons: 0,
                kill: false,
                shutdown: false,
                parked: false,
                last_release: Instant::now(),
            }),
            changed: Condvar::new(),
            tick,
            interval,
        }
    }

    /// Register a caller that needs the connection. An active IDLE ends within a tick.
    pub(crate) fn begin_wait(&self) {
        self.control.lock().wait_reasons += 1;
        self.changed.notify_all();
    }

    /// Unregister a caller. When the last one is gone, IDLE may start again after a tick.
    pub(crate) fn end_wait(&self) {
        let mut c = self.control.lock();
        c.wait_reasons = c.wait_reasons.saturating_sub(1);
        if c.wait_reasons == 0 {
            c.last_release = Instant::now();
            c.parked = false;
        }
        drop(c);
        self.changed.notify_all();
    }

    pub(crate) fn state(&self) -> IdleState {
        self.control.lock().state
    }

    pub(crate) fn wait_reasons(&self) -> usize {
        self.control.lock().wait_reasons
    }

    /// Drop the connection instead of ending IDLE gracefully.
    pub(crate) fn kill(&self) {
        self.control.lock().kill = true;
        self.changed.notify_all();
    }

    /// Stop the idle thread.
    pub(crate) fn shutdown(&self) {
        self.control.lock().shutdown = true;
        self.changed.notify_all();
    }

    fn clear_kill(&self) {
        self.control.lock().kill = false;
    }

    fn park(&self) {
        self.control.lock().parked = true;
    }

    fn set_state(&self, state: IdleState) {
        let mut c = self.control.lock();
        if c.state != state {
            debug!("IDLE {:?} -> {:?}", c.state, state);
            c.state = state;
        }
    }

    fn wait_for_quiet(&self) -> Wake {
        let mut c = self.control.lock();
        loop {
            if c.shutdown {
                return Wake::Shutdown;
            }
            if c.kill {
                return Wake::Kill;
            }
            if c.wait_reasons == 0 && !c.parked {
                let since = c.last_release.elapsed();
                if since >= self.tick {
                    return Wake::Ready;
                }
                self.changed.wait_for(&mut c, self.tick - since);
            } else {
                self.changed.wait(&mut c);
            }
        }
    }

    // Enter Starting, unless a caller showed up in the meantime.
    fn try_start(&self) -> bool {
        let mut c = self.control.lock();
        if c.wait_reasons > 0 || c.kill || c.shutdown {
            return false;
        }
        debug!("IDLE {:?} -> {:?}", c.state, IdleState::Starting);
        c.state = IdleState::Starting;
        true
    }

    fn interruption(&self) -> Option<Stop> {
        let c = self.control.lock();
        if c.kill {
            Some(Stop::Kill)
        } else if c.shutdown {
            Some(Stop::Shutdown)
        } else if c.wait_reasons > 0 {
            Some(Stop::Yield)
        } else {
            None
        }
    }
}

/// The body of a session's idle thread. Returns once the session shuts the coordinator down.
pub(crate) fn run<T>(shared: Arc<Shared<T>>)
where
    T: Read + Write + SetReadTimeout + Send + 'static,
{
    let idle = &shared.idle;
    debug!("idle thread started");
    loop {
        match idle.wait_for_quiet() {
            Wake::Shutdown => break,
            Wake::Kill => {
                // callers may hold the connection for a while; keep the request until we get it
                match shared.engine.try_lock() {
                    Some(guard) => {
                        if let Ok(mut engine) = guard.try_borrow_mut() {
                            engine.drop_connection();
                        }
                        idle.clear_kill();
                    }
                    None => thread::sleep(idle.tick),
                }
                continue;
            }
            Wake::Ready => {}
        }

        let guard = match shared.engine.try_lock() {
            Some(guard) => guard,
            None => {
                thread::sleep(idle.tick);
                continue;
            }
        };
        let mut engine = match guard.try_borrow_mut() {
            Ok(engine) => engine,
            Err(_) => continue,
        };
        if !engine.can_idle() {
            idle.park();
            continue;
        }
        if !idle.try_start() {
            continue;
        }
        set_background(&mut engine, true);
        let result = idle_once(&mut engine, idle);
        set_background(&mut engine, false);
        idle.set_state(IdleState::Inactive);
        if let Err(e) = result {
            warn!("IDLE ended with an error: {}", e);
            if !e.triggers_reconnect() {
                idle.park();
            } else if let Err(e) = engine.reconnect() {
                warn!("reconnect after IDLE failed: {}", e);
                idle.park();
            }
        }
    }
    idle.set_state(IdleState::Inactive);
    debug!("idle thread stopped");
}

fn set_background<T>(engine: &mut Engine<T>, on: bool)
where
    T: Read + Write + SetReadTimeout + Send + 'static,
{
    if let Some(channel) = engine.channel.as_mut() {
        channel.background = on;
    }
}

// One IDLE command, from `IDLE` to the tagged completion, followed by reconciliation.
fn idle_once<T>(engine: &mut Engine<T>, idle: &Coordinator) -> Result<()>
where
    T: Read + Write + SetReadTimeout + Send + 'static,
{
    let before = engine.selected_exists();
    let mut changes;
    {
        let channel = match engine.channel.as_mut() {
            Some(channel) => channel,
            None => return Ok(()),
        };
        let tag = channel.send_command("IDLE")?;
        let response = channel.read_until_tagged(&tag)?;
        changes = ChangeSet::from_response(&response);
        if let Completion::Continue(_) = response.completion {
            idle.set_state(IdleState::Active);
            let stop = watch(channel, idle, &tag, before, &mut changes)?;
            debug!("leaving IDLE: {:?}", stop);
            match stop {
                Stop::Kill => {
                    channel.close();
                    idle.clear_kill();
                    return Ok(());
                }
                Stop::ServerDone => {}
                _ => {
                    idle.set_state(IdleState::Stopping);
                    channel.write_line(b"DONE", false)?;
                    let response = channel.read_until_tagged(&tag)?;
                    for unit in &response.untagged {
                        if let Some(push) = parse::push(unit) {
                            changes.record(push);
                        }
                    }
                }
            }
        }
    }
    idle.set_state(IdleState::Stopping);
    if !changes.is_empty() {
        engine.apply_changes(&changes)?;
    }
    Ok(())
}

// Collect pushed changes until something ends the IDLE.
fn watch<T>(
    channel: &mut Channel<T>,
    idle: &Coordinator,
    tag: &str,
    before: u32,
    changes: &mut ChangeSet,
) -> Result<Stop>
where
    T: Read + Write + SetReadTimeout,
{
    let started = Instant::now();
    loop {
        if let Some(stop) = idle.interruption() {
            return Ok(stop);
        }
        if started.elapsed() >= idle.interval {
            return Ok(Stop::Reissue);
        }
        let unit = match channel.poll_unit(idle.tick)? {
            Some(unit) => unit,
            None if !changes.is_empty() => return Ok(Stop::Quiet),
            None => continue,
        };
        match codec::classify(&unit, tag) {
            Kind::Untagged => {
                channel.screen_untagged(&unit)?;
                if let Some(push) = parse::push(&unit) {
                    changes.record(push);
                    if changes.exists(before) > before {
                        return Ok(Stop::NewMail);
                    }
                }
            }
            Kind::Tagged(Status::Ok, _) => return Ok(Stop::ServerDone),
            Kind::Tagged(_, text) => {
                warn!("server ended IDLE: {}", text);
                return Ok(Stop::ServerDone);
            }
            Kind::Continuation(_) | Kind::Foreign => warn!(
                "unexpected input during IDLE: {}",
                String::from_utf8_lossy(&unit).trim_end()
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coordinator() -> Coordinator {
        Coordinator::new(Duration::from_millis(5), Duration::from_secs(60))
    }

    #[test]
    fn ready_once_the_last_caller_is_gone() {
        let idle = coordinator();
        idle.begin_wait();
        idle.begin_wait();
        idle.end_wait();
        assert_eq!(idle.wait_reasons(), 1);
        assert_eq!(idle.interruption(), Some(Stop::Yield));
        assert!(!idle.try_start());
        idle.end_wait();
        assert_eq!(idle.interruption(), None);
        assert_eq!(idle.wait_for_quiet(), Wake::Ready);
        assert!(idle.try_start());
        assert_eq!(idle.state(), IdleState::Starting);
    }

    #[test]
    fn kill_and_shutdown_wake_the_thread() {
        let idle = Arc::new(coordinator());
        idle.begin_wait();
        let waiter = {
            let idle = Arc::clone(&idle);
            thread::spawn(move || idle.wait_for_quiet())
        };
        thread::sleep(Duration::from_millis(20));
        idle.kill();
        assert_eq!(waiter.join().unwrap(), Wake::Kill);
        assert_eq!(idle.interruption(), Some(Stop::Kill));
        idle.clear_kill();

        idle.shutdown();
        assert_eq!(idle.wait_for_quiet(), Wake::Shutdown);
    }

    #[test]
    fn parked_until_a_caller_comes_and_goes() {
        let idle = Arc::new(coordinator());
        idle.park();
        let waiter = {
            let idle = Arc::clone(&idle);
            thread::spawn(move || idle.wait_for_quiet())
        };
        thread::sleep(Duration::from_millis(20));
        idle.begin_wait();
        idle.end_wait();
        assert_eq!(waiter.join().unwrap(), Wake::Ready);
    }
}
