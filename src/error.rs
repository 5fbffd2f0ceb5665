//! IMAP engine error types.

use std::io::Error as IoError;
#[cfg(any(feature = "native-tls", feature = "rustls-tls"))]
use std::net::TcpStream;
use std::result;
use std::str::Utf8Error;

use bufstream::IntoInnerError as BufError;
#[cfg(feature = "native-tls")]
use native_tls::Error as TlsError;
#[cfg(feature = "native-tls")]
use native_tls::HandshakeError as TlsHandshakeError;
#[cfg(feature = "rustls-tls")]
use rustls_connector::HandshakeError as RustlsHandshakeError;
use thiserror::Error;

/// A convenience wrapper around `Result` for `imap_engine::Error`.
pub type Result<T> = result::Result<T, Error>;

/// The broad class an [`Error`] belongs to.
///
/// Transport and cancellation errors make a [`Session`](crate::Session) attempt to reconnect
/// before the error is handed back; the other kinds leave the connection alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The socket failed, the peer went away, or the server sent `BYE`.
    Transport,
    /// The server answered `NO`/`BAD`, or sent something that could not be understood.
    Protocol,
    /// The caller asked for the running operation to be abandoned.
    Cancellation,
    /// The operation does not make sense in the current session state.
    State,
    /// The caller passed something that can never be sent to a server.
    Usage,
}

/// A set of errors that can occur in the IMAP engine.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// An `io::Error` that occurred while trying to read or write to a network stream.
    #[error(transparent)]
    Io(#[from] IoError),
    /// An error from the `native_tls` library during the TLS handshake.
    #[cfg(feature = "native-tls")]
    #[error(transparent)]
    TlsHandshake(#[from] TlsHandshakeError<TcpStream>),
    /// An error from the `native_tls` library while managing the socket.
    #[cfg(feature = "native-tls")]
    #[error(transparent)]
    Tls(#[from] TlsError),
    /// An error from the `rustls` library during the TLS handshake.
    #[cfg(feature = "rustls-tls")]
    #[error(transparent)]
    RustlsHandshake(#[from] RustlsHandshakeError<TcpStream>),
    /// The connection was terminated unexpectedly.
    #[error("connection lost")]
    ConnectionLost,
    /// The server closed the connection with an untagged `BYE`.
    #[error("server closed the connection: {0}")]
    Bye(String),
    /// The running operation was cancelled through a [`CancelHandle`](crate::CancelHandle).
    #[error("operation cancelled")]
    Cancelled,
    /// A tagged `NO` response. Carries the server's status text verbatim.
    #[error("NO response: {0}")]
    No(String),
    /// A tagged `BAD` response. Carries the server's status text verbatim.
    #[error("BAD response: {0}")]
    Bad(String),
    /// Error parsing a server response.
    #[error(transparent)]
    Parse(#[from] ParseError),
    /// Error validating input data.
    #[error(transparent)]
    Validate(#[from] ValidateError),
    /// There is no live connection and the session was unable to establish one.
    #[error("session is offline")]
    Offline,
    /// A session method was called from inside a closure that already has the session's state,
    /// such as the one given to [`Session::with_summary`](crate::Session::with_summary).
    #[error("session state is already borrowed by this thread")]
    Busy,
    /// The operation needs a selected folder.
    #[error("no folder is selected")]
    NoSelectedFolder,
    /// The server refused to select a folder that the caller expected to exist.
    #[error("folder {0:?} no longer exists on the server")]
    FolderGone(String),
}

impl<T> From<BufError<T>> for Error {
    fn from(err: BufError<T>) -> Error {
        Error::Io(err.into())
    }
}

impl Error {
    /// Classify this error according to the engine's error taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Io(_) | Error::ConnectionLost | Error::Bye(_) => ErrorKind::Transport,
            #[cfg(feature = "native-tls")]
            Error::TlsHandshake(_) | Error::Tls(_) => ErrorKind::Transport,
            #[cfg(feature = "rustls-tls")]
            Error::RustlsHandshake(_) => ErrorKind::Transport,
            Error::Cancelled => ErrorKind::Cancellation,
            Error::No(_) | Error::Bad(_) | Error::Parse(_) => ErrorKind::Protocol,
            Error::Offline | Error::Busy | Error::NoSelectedFolder | Error::FolderGone(_) => {
                ErrorKind::State
            }
            Error::Validate(_) => ErrorKind::Usage,
        }
    }

    /// Whether a session should try to re-establish its connection after seeing this error.
    pub fn triggers_reconnect(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transport | ErrorKind::Cancellation)
    }

    /// Whether this is a read that gave up because of a socket read timeout.
    pub(crate) fn is_timeout(&self) -> bool {
        match self {
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
            ),
            _ => false,
        }
    }
}

/// An error parsing a server response.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ParseError {
    /// The wire bytes could not be parsed at all.
    #[error("unable to parse response: {}", String::from_utf8_lossy(.0))]
    Invalid(Vec<u8>),
    /// A response was well-formed but not what the command calls for.
    #[error("unexpected response: {0}")]
    Unexpected(String),
    /// A literal length marker did not hold a number we can read.
    #[error("invalid literal length in {0:?}")]
    LiteralLength(String),
    /// BODYSTRUCTURE or ENVELOPE data was malformed at the given byte offset.
    #[error("malformed {what} at offset {offset}: {reason}")]
    BodyStructure {
        /// Which grammar was being decoded.
        what: &'static str,
        /// Offset of the failure from the start of the list.
        offset: usize,
        /// What the parser expected to find there.
        reason: String,
    },
    /// Authentication challenges could not be decoded.
    #[error("unable to parse authentication response: {0}")]
    Authentication(String),
    /// Server data was expected to be UTF-8.
    #[error("unable to parse data as UTF-8 text")]
    DataNotUtf8(#[from] Utf8Error),
}

/// An error validating the arguments of a command before anything reaches the wire.
#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum ValidateError {
    /// A character that cannot be encoded in a quoted string.
    // print character in debug form because invalid ones are often whitespaces
    #[error("invalid character in input: {0:?}")]
    InvalidChar(char),
    /// The command template used an escape other than `%d %s %S %F %G %%`.
    #[error("unknown command template escape %{0}")]
    UnknownEscape(char),
    /// The command template ended in a lone `%`.
    #[error("command template ends with a lone '%'")]
    TrailingPercent,
    /// The command template names more arguments than were supplied.
    #[error("command template is missing argument #{0}")]
    MissingArgument(usize),
    /// An argument does not fit the escape it was paired with.
    #[error("argument #{index} does not fit escape %{escape}")]
    WrongArgument {
        /// Zero-based position of the argument.
        index: usize,
        /// The escape character it was paired with.
        escape: char,
    },
    /// More arguments were supplied than the command template uses.
    #[error("{0} command argument(s) left unused")]
    UnusedArguments(usize),
    /// `LOGIN` was requested against a server that advertises `LOGINDISABLED`.
    #[error("server has disabled LOGIN")]
    LoginDisabled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy() {
        assert_eq!(Error::ConnectionLost.kind(), ErrorKind::Transport);
        assert_eq!(Error::Bye("bye".into()).kind(), ErrorKind::Transport);
        assert_eq!(Error::Cancelled.kind(), ErrorKind::Cancellation);
        assert_eq!(Error::No("nope".into()).kind(), ErrorKind::Protocol);
        assert_eq!(Error::FolderGone("x".into()).kind(), ErrorKind::State);
        assert_eq!(
            Error::Validate(ValidateError::UnknownEscape('q')).kind(),
            ErrorKind::Usage
        );
    }

    #[test]
    fn only_transport_and_cancellation_reconnect() {
        assert!(Error::ConnectionLost.triggers_reconnect());
        assert!(Error::Cancelled.triggers_reconnect());
        assert!(!Error::Bad("syntax".into()).triggers_reconnect());
        let err = Error::Parse(ParseError::BodyStructure {
            what: "BODYSTRUCTURE",
            offset: 7,
            reason: "expected '('".into(),
        });
        assert!(!err.triggers_reconnect());
        assert_eq!(
            err.to_string(),
            "malformed BODYSTRUCTURE at offset 7: expected '('"
        );
    }

    #[test]
    fn no_text_is_verbatim() {
        let err = Error::No("[TRYCREATE] Mailbox doesn't exist".into());
        assert_eq!(
            err.to_string(),
            "NO response: [TRYCREATE] Mailbox doesn't exist"
        );
    }
}
