use std::cmp::min;
use std::collections::VecDeque;
use std::io::{Error, ErrorKind, Read, Result, Write};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::extensions::idle::SetReadTimeout;

type Responder = Box<dyn FnMut(&str) -> Vec<u8> + Send>;

#[derive(Default)]
struct Inner {
    read_buf: Vec<u8>,
    read_pos: usize,
    written_buf: Vec<u8>,
    // the command line being written, until its CRLF arrives
    line: Vec<u8>,
    // payload bytes of a non-synchronizing literal still to come
    literal_left: usize,
    script: VecDeque<Vec<u8>>,
    responder: Option<Responder>,
    err_on_read: bool,
    eof_on_read: bool,
    read_delay: usize,
    timeout: Option<Duration>,
}

impl Inner {
    fn command_complete(&mut self) {
        let line = std::mem::take(&mut self.line);
        let text = String::from_utf8_lossy(&line);
        let text = text.trim_end_matches("\r\n");
        if let Some(responder) = self.responder.as_mut() {
            let reply = responder(text);
            self.read_buf.extend_from_slice(&reply);
        } else if let Some(reply) = self.script.pop_front() {
            self.read_buf.extend_from_slice(&reply);
        }
    }

    fn push_written(&mut self, b: u8) {
        self.written_buf.push(b);
        self.line.push(b);
        if self.literal_left > 0 {
            self.literal_left -= 1;
            return;
        }
        if !self.line.ends_with(b"\r\n") {
            return;
        }
        // `{n+}\r\n` continues the same command after n bytes
        let before = &self.line[..self.line.len() - 2];
        if before.ends_with(b"+}") {
            if let Some(open) = before.iter().rposition(|&c| c == b'{') {
                let digits = &before[open + 1..before.len() - 2];
                if let Some(n) = std::str::from_utf8(digits)
                    .ok()
                    .and_then(|d| d.parse::<usize>().ok())
                {
                    self.literal_left = n;
                    return;
                }
            }
        }
        self.command_complete();
    }
}

/// An in-memory transport.
///
/// Clones share the same state, so a test can keep a handle to inspect what was written after
/// the stream has been moved into a channel.
#[derive(Clone, Default)]
pub(crate) struct MockStream {
    inner: Arc<Mutex<Inner>>,
}

impl MockStream {
    /// A stream whose read side holds `read_buf` from the start.
    pub(crate) fn new(read_buf: Vec<u8>) -> MockStream {
        MockStream::default().with_buf(read_buf)
    }

    /// A stream that starts out with `greeting` and releases one reply per command written.
    pub(crate) fn scripted<I, S>(greeting: &str, replies: I) -> MockStream
    where
        I: IntoIterator<Item = S>,
        S: AsRef<[u8]>,
    {
        let stream = MockStream::new(greeting.as_bytes().to_vec());
        stream.inner.lock().script = replies
            .into_iter()
            .map(|r| r.as_ref().to_vec())
            .collect();
        stream
    }

    /// A stream that answers every command line with what `responder` returns.
    pub(crate) fn interactive<F>(greeting: &str, responder: F) -> MockStream
    where
        F: FnMut(&str) -> Vec<u8> + Send + 'static,
    {
        let stream = MockStream::new(greeting.as_bytes().to_vec());
        stream.inner.lock().responder = Some(Box::new(responder));
        stream
    }

    pub(crate) fn with_buf(self, read_buf: Vec<u8>) -> MockStream {
        {
            let mut inner = self.inner.lock();
            inner.read_buf = read_buf;
            inner.read_pos = 0;
        }
        self
    }

    pub(crate) fn with_eof(self) -> MockStream {
        self.inner.lock().eof_on_read = true;
        self
    }

    pub(crate) fn with_err(self) -> MockStream {
        self.inner.lock().err_on_read = true;
        self
    }

    pub(crate) fn with_delay(self) -> MockStream {
        self.inner.lock().read_delay = 1;
        self
    }

    /// Make more bytes readable, as if the server had pushed them.
    pub(crate) fn push(&self, bytes: &[u8]) {
        self.inner.lock().read_buf.extend_from_slice(bytes);
    }

    /// Everything written so far.
    pub(crate) fn written(&self) -> Vec<u8> {
        self.inner.lock().written_buf.clone()
    }

    pub(crate) fn written_str(&self) -> String {
        String::from_utf8_lossy(&self.written()).into_owned()
    }

    /// The last read timeout the stream was given.
    pub(crate) fn read_timeout(&self) -> Option<Duration> {
        self.inner.lock().timeout
    }
}

impl std::fmt::Debug for MockStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("MockStream")
            .field("unread", &(inner.read_buf.len() - inner.read_pos))
            .field("written", &inner.written_buf.len())
            .finish()
    }
}

impl Read for MockStream {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut inner = self.inner.lock();
        if inner.eof_on_read {
            return Ok(0);
        }
        if inner.err_on_read {
            return Err(Error::new(ErrorKind::Other, "MockStream Error"));
        }
        if inner.read_pos >= inner.read_buf.len() {
            if let Some(timeout) = inner.timeout {
                drop(inner);
                std::thread::sleep(min(timeout, Duration::from_millis(10)));
            }
            return Err(Error::new(ErrorKind::WouldBlock, "no data"));
        }
        let mut write_len = min(buf.len(), inner.read_buf.len() - inner.read_pos);
        if inner.read_delay > 0 {
            inner.read_delay -= 1;
            write_len = min(write_len, 1);
        }
        let start = inner.read_pos;
        buf[..write_len].copy_from_slice(&inner.read_buf[start..start + write_len]);
        inner.read_pos += write_len;
        Ok(write_len)
    }
}

impl Write for MockStream {
    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let mut inner = self.inner.lock();
        for &b in buf {
            inner.push_written(b);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

impl SetReadTimeout for MockStream {
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> crate::error::Result<()> {
        self.inner.lock().timeout = timeout;
        Ok(())
    }
}
