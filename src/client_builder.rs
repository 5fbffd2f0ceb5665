use crate::client::Client;
use crate::codec::Namespace;
use crate::conn::Connection;
use crate::error::Result;
use crate::extensions::idle::SetReadTimeout;
use crate::session::{Connector, Credentials, Session, SessionConfig};

use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;

#[cfg(feature = "native-tls")]
use native_tls::{TlsConnector, TlsStream};
#[cfg(feature = "rustls-tls")]
use rustls_connector::{RustlsConnector, TlsStream as RustlsStream};
use tracing::debug;

/// How the connection to the server is secured.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TlsMode {
    /// No encryption. Only for testing and for tunnels that are already secure.
    Plain,
    /// Connect in the clear and upgrade with `STARTTLS` before logging in.
    StartTls,
    /// TLS from the first byte, usually on port 993.
    Tls,
}

/// A convenience builder for [`Client`] and [`Session`] structs over various encrypted
/// transports.
///
/// Creating a [`Client`] using `native-tls` transport is straightforward:
/// ```no_run
/// # use imap_engine::ClientBuilder;
/// # fn main() -> Result<(), imap_engine::Error> {
/// let client = ClientBuilder::new("imap.example.com", 993).native_tls()?;
/// # Ok(())
/// # }
/// ```
///
/// To use `STARTTLS`, just call `starttls()` before one of the [`Client`]-yielding
/// functions:
/// ```no_run
/// # use imap_engine::ClientBuilder;
/// # fn main() -> Result<(), imap_engine::Error> {
/// let client = ClientBuilder::new("imap.example.com", 143)
///     .starttls()
///     .native_tls()?;
/// # Ok(())
/// # }
/// ```
///
/// A session that reconnects by itself after a transport failure comes from
/// [`login`](Self::login), which keeps the connection settings and the credentials:
/// ```no_run
/// # use imap_engine::ClientBuilder;
/// # use std::time::Duration;
/// # fn main() -> Result<(), imap_engine::Error> {
/// let session = ClientBuilder::new("imap.example.com", 993)
///     .credentials("me@example.com", "secret")
///     .idle_interval(Duration::from_secs(20 * 60))
///     .login()?;
/// session.select("INBOX")?;
/// # Ok(())
/// # }
/// ```
pub struct ClientBuilder<D>
where
    D: AsRef<str>,
{
    domain: D,
    port: u16,
    mode: TlsMode,
    credentials: Option<Credentials>,
    config: SessionConfig,
}

impl<D> ClientBuilder<D>
where
    D: AsRef<str>,
{
    /// Make a new `ClientBuilder` using the given domain and port.
    pub fn new(domain: D, port: u16) -> Self {
        ClientBuilder {
            domain,
            port,
            mode: TlsMode::Tls,
            credentials: None,
            config: SessionConfig::default(),
        }
    }

    /// How the connection is secured. The default is [`TlsMode::Tls`].
    pub fn tls_mode(&mut self, mode: TlsMode) -> &mut Self {
        self.mode = mode;
        self
    }

    /// Use `STARTTLS` for this connection.
    pub fn starttls(&mut self) -> &mut Self {
        self.tls_mode(TlsMode::StartTls)
    }

    /// The user name and password [`login`](Self::login) uses, now and after every reconnect.
    pub fn credentials(&mut self, user: &str, password: &str) -> &mut Self {
        self.credentials = Some(Credentials::new(user, password));
        self
    }

    /// How long one IDLE command may run before it is re-issued. Defaults to 28 minutes, just
    /// under the 30 minute inactivity timeout servers are allowed to enforce.
    pub fn idle_interval(&mut self, interval: Duration) -> &mut Self {
        self.config.idle_interval = interval;
        self
    }

    /// How often the idle thread polls the socket. Defaults to 500 ms.
    pub fn idle_tick(&mut self, tick: Duration) -> &mut Self {
        self.config.idle_tick = tick;
        self
    }

    /// Whether sessions keep the selected folder in IDLE in the background. On by default.
    pub fn idle(&mut self, enabled: bool) -> &mut Self {
        self.config.idle = enabled;
        self
    }

    /// The longest UID set sent in one command, in bytes. Defaults to 768.
    pub fn uid_set_limit(&mut self, limit: usize) -> &mut Self {
        self.config.uid_set_limit = limit;
        self
    }

    /// The first character of every command tag. Defaults to `A`.
    pub fn tag_prefix(&mut self, prefix: char) -> &mut Self {
        self.config.tag_prefix = prefix;
        self
    }

    /// Use this personal namespace instead of asking the server with `NAMESPACE`.
    pub fn namespace(&mut self, prefix: &str, delimiter: Option<char>) -> &mut Self {
        self.config.namespace = Some(Namespace::new(prefix, delimiter));
        self
    }

    /// Return a new [`Client`] using a `native-tls` transport.
    #[cfg(feature = "native-tls")]
    #[cfg_attr(docsrs, doc(cfg(feature = "native-tls")))]
    pub fn native_tls(&mut self) -> Result<Client<TlsStream<TcpStream>>> {
        self.connect(|domain, tcp| {
            let ssl_conn = TlsConnector::builder().build()?;
            Ok(TlsConnector::connect(&ssl_conn, domain, tcp)?)
        })
    }

    /// Return a new [`Client`] using `rustls` transport.
    #[cfg(feature = "rustls-tls")]
    #[cfg_attr(docsrs, doc(cfg(feature = "rustls-tls")))]
    pub fn rustls(&mut self) -> Result<Client<RustlsStream<TcpStream>>> {
        self.connect(|domain, tcp| {
            let ssl_conn = RustlsConnector::new_with_native_certs()?;
            Ok(ssl_conn.connect(domain, tcp)?)
        })
    }

    /// Make a [`Client`] using a custom TLS initialization. This function is intended
    /// to be used if your TLS setup requires custom work such as adding private CAs
    /// or other specific TLS parameters.
    ///
    /// The `handshake` argument should accept two parameters:
    ///
    /// - domain: [`&str`]
    /// - tcp: [`TcpStream`]
    ///
    /// and yield a `Result<C>` where `C` is `Read + Write + SetReadTimeout`. It should only
    /// perform TLS initialization over the given `tcp` socket and return the encrypted stream
    /// object, such as a [`native_tls::TlsStream`] or a [`rustls_connector::TlsStream`].
    ///
    /// If the caller is using `STARTTLS` and previously called [`starttls`](Self::starttls)
    /// then the `tcp` socket given to the `handshake` function will be connected and will
    /// have initiated the `STARTTLS` handshake.
    pub fn connect<F, C>(&mut self, handshake: F) -> Result<Client<C>>
    where
        F: FnOnce(&str, TcpStream) -> Result<C>,
        C: Read + Write + SetReadTimeout + Send + 'static,
    {
        let domain = self.domain.as_ref();
        let tcp = TcpStream::connect((domain, self.port))?;
        if self.mode == TlsMode::StartTls {
            let tcp = starttls(tcp, &self.config)?;
            Ok(Client::with_config(handshake(domain, tcp)?, self.config.clone()))
        } else {
            let mut client = Client::with_config(handshake(domain, tcp)?, self.config.clone());
            client.read_greeting()?;
            Ok(client)
        }
    }

    /// Connect, log in with the configured [`credentials`](Self::credentials), and return a
    /// session that re-establishes its connection by itself.
    ///
    /// Without credentials, only a server that greets with `PREAUTH` can be used.
    pub fn login(&mut self) -> Result<Session<Connection>> {
        let mut connector = self.connector();
        let client = connector()?;
        let channel = client.establish(self.credentials.as_ref())?;
        Ok(Session::new(
            channel,
            self.config.clone(),
            self.credentials.clone(),
            Some(connector),
        ))
    }

    fn connector(&self) -> Connector<Connection> {
        let domain = self.domain.as_ref().to_string();
        let (port, mode, config) = (self.port, self.mode, self.config.clone());
        Box::new(move || open(&domain, port, mode, &config))
    }
}

// Plain connection up to the end of STARTTLS; the server sends no new greeting afterwards.
fn starttls(tcp: TcpStream, config: &SessionConfig) -> Result<TcpStream> {
    let mut client = Client::with_config(tcp, config.clone());
    client.read_greeting()?;
    client.starttls()?;
    client.into_inner()
}

fn open(domain: &str, port: u16, mode: TlsMode, config: &SessionConfig) -> Result<Client<Connection>> {
    debug!("connecting to {}:{} ({:?})", domain, port, mode);
    let tcp = TcpStream::connect((domain, port))?;
    let stream: Connection = match mode {
        TlsMode::Plain => Box::new(tcp),
        TlsMode::StartTls => tls_handshake(domain, starttls(tcp, config)?)?,
        TlsMode::Tls => tls_handshake(domain, tcp)?,
    };
    let mut client = Client::with_config(stream, config.clone());
    if mode != TlsMode::StartTls {
        client.read_greeting()?;
    }
    Ok(client)
}

#[cfg(feature = "native-tls")]
fn tls_handshake(domain: &str, tcp: TcpStream) -> Result<Connection> {
    let ssl_conn = TlsConnector::builder().build()?;
    Ok(Box::new(TlsConnector::connect(&ssl_conn, domain, tcp)?))
}

#[cfg(all(feature = "rustls-tls", not(feature = "native-tls")))]
fn tls_handshake(domain: &str, tcp: TcpStream) -> Result<Connection> {
    let ssl_conn = RustlsConnector::new_with_native_certs()?;
    Ok(Box::new(ssl_conn.connect(domain, tcp)?))
}

#[cfg(not(any(feature = "native-tls", feature = "rustls-tls")))]
fn tls_handshake(_domain: &str, _tcp: TcpStream) -> Result<Connection> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "built without a TLS backend",
    )
    .into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_reach_the_session_config() {
        let mut builder = ClientBuilder::new("imap.example.com", 143);
        builder
            .starttls()
            .credentials("me", "secret")
            .idle(false)
            .idle_tick(Duration::from_millis(50))
            .uid_set_limit(100)
            .tag_prefix('x')
            .namespace("INBOX.", Some('.'));
        assert_eq!(builder.mode, TlsMode::StartTls);
        assert!(!builder.config.idle);
        assert_eq!(builder.config.idle_tick, Duration::from_millis(50));
        assert_eq!(builder.config.idle_interval, Duration::from_secs(28 * 60));
        assert_eq!(builder.config.uid_set_limit, 100);
        assert_eq!(builder.config.tag_prefix, 'x');
        assert_eq!(
            builder.config.namespace,
            Some(Namespace::new("INBOX.", Some('.')))
        );
        let debug = format!("{:?}", builder.credentials);
        assert!(debug.contains("me"));
        assert!(!debug.contains("secret"));
    }
}
