use std::io::{Read, Write};

use base64::{engine::general_purpose, Engine as _};
use tracing::{debug, warn};

use super::authenticator::Authenticator;
use super::channel::Channel;
use super::codec::{self, Arg, Kind, Status};
use super::error::{Error, ParseError, Result, ValidateError};
use super::extensions::idle::SetReadTimeout;
use super::parse;
use super::session::{Credentials, Session, SessionConfig};
use super::types::{Capabilities, Capability};

macro_rules! ok_or_unauth_client_err {
    ($r:expr, $self:expr) => {
        match $r {
            Ok(o) => o,
            Err(e) => return Err((e, $self)),
        }
    };
}

/// An unauthenticated connection to an IMAP server.
///
/// Most users get one from [`ClientBuilder`](crate::ClientBuilder), which also takes care of TLS.
/// A `Client` can be built over any transport, e.g. a stream set up by other means, and then
/// logged in with [`Client::login`] or [`Client::authenticate`], or turned into a session
/// directly with [`Client::preauthenticated`] when the server greeted with `PREAUTH`.
#[derive(Debug)]
pub struct Client<T: Read + Write + SetReadTimeout + Send + 'static> {
    channel: Channel<T>,
    preauth: bool,
    config: SessionConfig,
}

impl<T: Read + Write + SetReadTimeout + Send + 'static> Client<T> {
    /// Creates a new client over the given stream.
    ///
    /// This method primarily exists for writing tests that mock the underlying transport, but can
    /// also be used to support IMAP over custom tunnels. The server greeting is not read; call
    /// [`read_greeting`](Self::read_greeting) unless it was consumed elsewhere (as after
    /// `STARTTLS`).
    pub fn new(stream: T) -> Client<T> {
        Client::with_config(stream, SessionConfig::default())
    }

    /// Like [`new`](Self::new), with the configuration the resulting session will use.
    pub fn with_config(stream: T, config: SessionConfig) -> Client<T> {
        Client {
            channel: Channel::new(stream, config.tag_prefix),
            preauth: false,
            config,
        }
    }

    /// Read the server greeting. A `BYE` greeting is an error.
    pub fn read_greeting(&mut self) -> Result<()> {
        let greeting = self.channel.read_greeting()?;
        self.preauth = greeting.preauth;
        if let Some(caps) = greeting.capabilities {
            self.channel.capabilities = caps;
        }
        Ok(())
    }

    /// Whether the server greeted with `PREAUTH`.
    pub fn is_preauth(&self) -> bool {
        self.preauth
    }

    /// Ask the server for its capabilities.
    pub fn capabilities(&mut self) -> Result<&Capabilities> {
        self.refresh_capabilities()?;
        Ok(&self.channel.capabilities)
    }

    fn refresh_capabilities(&mut self) -> Result<()> {
        let response = self.channel.run("CAPABILITY")?;
        match parse::capabilities(&response) {
            Some(caps) => {
                debug!("server capabilities: {}", caps.iter().collect::<Vec<_>>().join(" "));
                self.channel.capabilities = caps;
                Ok(())
            }
            None => Err(Error::Parse(ParseError::Unexpected(
                "no CAPABILITY data in response".to_string(),
            ))),
        }
    }

    /// Send `STARTTLS`. The caller performs the TLS handshake on the stream it gets back from
    /// [`into_inner`](Self::into_inner).
    pub fn starttls(&mut self) -> Result<()> {
        self.channel.run("STARTTLS")?;
        Ok(())
    }

    /// Gives up ownership of the underlying stream.
    pub fn into_inner(self) -> Result<T> {
        self.channel.into_inner()
    }

    /// Log in to the IMAP server. Upon success a [`Session`] is returned.
    ///
    /// The username and password are sent as atoms when they can be, as quoted strings
    /// otherwise. If the server advertises `LOGINDISABLED`, nothing is sent.
    ///
    /// A session made here cannot reconnect on its own; use
    /// [`ClientBuilder::login`](crate::ClientBuilder::login) for that.
    ///
    /// On failure the client is handed back together with the error, so that the caller can try
    /// again.
    pub fn login<U: AsRef<str>, P: AsRef<str>>(
        mut self,
        username: U,
        password: P,
    ) -> ::std::result::Result<Session<T>, (Error, Client<T>)> {
        let credentials = Credentials::new(username.as_ref(), password.as_ref());
        ok_or_unauth_client_err!(self.do_login(&credentials), self);
        ok_or_unauth_client_err!(self.prepare(), self);
        let config = self.config.clone();
        Ok(Session::new(self.channel, config, Some(credentials), None))
    }

    /// Authenticate with the server using the given custom `authenticator` to handle the server's
    /// challenge.
    ///
    /// ```no_run
    /// struct OAuth2 {
    ///     user: String,
    ///     access_token: String,
    /// }
    ///
    /// impl imap_engine::Authenticator for OAuth2 {
    ///     type Response = String;
    ///     fn process(&self, _: &[u8]) -> Self::Response {
    ///         format!(
    ///             "user={}\x01auth=Bearer {}\x01\x01",
    ///             self.user, self.access_token
    ///         )
    ///     }
    /// }
    ///
    /// fn main() {
    ///     let auth = OAuth2 {
    ///         user: String::from("me@example.com"),
    ///         access_token: String::from("<access_token>"),
    ///     };
    ///     let client = imap_engine::ClientBuilder::new("imap.example.com", 993)
    ///         .native_tls()
    ///         .expect("Could not connect to server");
    ///
    ///     match client.authenticate("XOAUTH2", &auth) {
    ///         Ok(session) => {
    ///             // you are successfully authenticated!
    ///         },
    ///         Err((e, orig_client)) => {
    ///             eprintln!("error authenticating: {}", e);
    ///             // prompt user and try again with orig_client here
    ///             return;
    ///         }
    ///     };
    /// }
    /// ```
    pub fn authenticate<A: Authenticator, S: AsRef<str>>(
        mut self,
        auth_type: S,
        authenticator: &A,
    ) -> ::std::result::Result<Session<T>, (Error, Client<T>)> {
        ok_or_unauth_client_err!(
            self.do_auth_handshake(auth_type.as_ref(), authenticator),
            self
        );
        ok_or_unauth_client_err!(self.prepare(), self);
        let config = self.config.clone();
        Ok(Session::new(self.channel, config, None, None))
    }

    /// Start a session on a connection the server authenticated with `PREAUTH`.
    pub fn preauthenticated(mut self) -> ::std::result::Result<Session<T>, (Error, Client<T>)> {
        if !self.preauth {
            return Err((
                Error::Parse(ParseError::Unexpected(
                    "server did not greet with PREAUTH".to_string(),
                )),
                self,
            ));
        }
        ok_or_unauth_client_err!(self.prepare(), self);
        let config = self.config.clone();
        Ok(Session::new(self.channel, config, None, None))
    }

    /// This func does the handshake process once the authenticate command is made.
    fn do_auth_handshake<A: Authenticator>(&mut self, auth_type: &str, authenticator: &A) -> Result<()> {
        let tag = self
            .channel
            .send_command(&format!("AUTHENTICATE {}", auth_type))?;
        loop {
            let unit = self.channel.read_unit()?;
            match codec::classify(&unit, &tag) {
                Kind::Continuation(data) => {
                    let challenge = general_purpose::STANDARD
                        .decode(data.trim())
                        .map_err(|e| Error::Parse(ParseError::Authentication(e.to_string())))?;
                    let response = authenticator.process(&challenge);
                    let encoded = general_purpose::STANDARD.encode(response.as_ref());
                    self.channel.write_line(encoded.as_bytes(), true)?;
                }
                Kind::Tagged(Status::Ok, _) => {
                    debug!("authenticated with {}", auth_type);
                    return Ok(());
                }
                Kind::Tagged(Status::No, text) => return Err(Error::No(text)),
                Kind::Tagged(Status::Bad, text) => return Err(Error::Bad(text)),
                Kind::Untagged => self.channel.screen_untagged(&unit)?,
                Kind::Foreign => warn!(
                    "ignoring completion of another command: {}",
                    String::from_utf8_lossy(&unit).trim_end()
                ),
            }
        }
    }

    fn do_login(&mut self, credentials: &Credentials) -> Result<()> {
        if self.channel.capabilities.is_empty() {
            self.refresh_capabilities()?;
        }
        if self.channel.capabilities.has(Capability::LoginDisabled) {
            return Err(ValidateError::LoginDisabled.into());
        }
        self.channel.run_fmt(
            "LOGIN %S %S",
            &[Arg::Str(&credentials.user), Arg::Str(credentials.password())],
        )?;
        debug!("logged in as {}", credentials.user);
        Ok(())
    }

    // Everything a fresh session needs to know: post-login capabilities, the personal namespace,
    // and QRESYNC.
    fn prepare(&mut self) -> Result<()> {
        self.refresh_capabilities()?;
        let caps = &self.channel.capabilities;
        let namespace = if let Some(namespace) = &self.config.namespace {
            Some(namespace.clone())
        } else if caps.has(Capability::Namespace) {
            let response = self.channel.run("NAMESPACE")?;
            parse::namespace(&response)
        } else {
            None
        };
        if let Some(namespace) = namespace {
            debug!("personal namespace {:?}", namespace);
            self.channel.namespace = namespace;
        }
        let caps = &self.channel.capabilities;
        if caps.has(Capability::Enable) && caps.has(Capability::Qresync) {
            match self.channel.run("ENABLE QRESYNC") {
                Ok(_) => self.channel.qresync_enabled = true,
                Err(e @ Error::No(_)) | Err(e @ Error::Bad(_)) => {
                    warn!("server refused to enable QRESYNC: {}", e)
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Log in (unless the server pre-authenticated us) and prepare the connection, for a session
    /// that reconnects.
    pub(crate) fn establish(mut self, credentials: Option<&Credentials>) -> Result<Channel<T>> {
        if !self.preauth {
            let credentials = credentials.ok_or(Error::Offline)?;
            self.do_login(credentials)?;
        }
        self.prepare()?;
        Ok(self.channel)
    }
}
