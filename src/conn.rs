use crate::error::Result;
use crate::extensions::idle::SetReadTimeout;

use std::fmt::{Debug, Formatter};
use std::io::{Read, Write};
use std::time::Duration;

/// A transport a [`Session`](crate::Session) can run on: a read/write stream that can be sent to
/// the idle thread and polled with read timeouts.
pub trait ImapConnection: Read + Write + Send + SetReadTimeout + private::Sealed {}

impl<T> ImapConnection for T where T: Read + Write + Send + SetReadTimeout {}

impl Debug for dyn ImapConnection {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Imap connection")
    }
}

/// A boxed connection type, whatever TLS backend is behind it.
pub type Connection = Box<dyn ImapConnection>;

impl SetReadTimeout for Connection {
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        (**self).set_read_timeout(timeout)
    }
}

mod private {
    use super::{Read, SetReadTimeout, Write};

    pub trait Sealed {}

    impl<T> Sealed for T where T: Read + Write + SetReadTimeout {}
}
