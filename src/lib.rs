//! An IMAP4rev1 client engine that keeps a local picture of a folder in step with the server.
//!
//! The engine talks to one server over one connection. It sends tagged commands through a
//! single [command channel](crate::channel), keeps the selected folder in `IDLE` between
//! requests on a background thread, and reconciles the server's view of the folder with a
//! local [summary](crate::summary) using `QRESYNC`, `CONDSTORE`, or a plain UID rescan,
//! whichever the server allows.
//!
//! # Usage
//!
//! A [`Session`] is what most callers want. [`ClientBuilder::login`] connects, logs in, and
//! remembers how it did so, so that the session can re-establish itself after the connection
//! drops:
//!
//! ```no_run
//! use imap_engine::{ClientBuilder, Flag, Flags, StoreOp};
//!
//! fn main() -> imap_engine::Result<()> {
//!     let session = ClientBuilder::new("imap.example.com", 993)
//!         .credentials("me@example.com", "password")
//!         .login()?;
//!
//!     let (mailbox, report) = session.select("INBOX")?;
//!     println!("{} messages, synchronised with {:?}", mailbox.exists, report.strategies);
//!
//!     let newest = session.with_summary("INBOX", |summary| summary.last_uid())?;
//!     if let Some(uid) = newest {
//!         let structure = session.fetch_structure(uid)?;
//!         println!("{:?}", structure);
//!         session.store_flags(&[uid], StoreOp::Add, Flags::only(Flag::Seen))?;
//!     }
//!
//!     // Changes the server pushes while the session idles arrive here.
//!     for notification in session.notifications().try_iter() {
//!         println!("{:?}", notification);
//!     }
//!
//!     session.logout()
//! }
//! ```
//!
//! Every public method on [`Session`] takes `&self`. Callers on several threads are
//! serialised, and the idle thread gives way whenever one of them is waiting. To run several
//! calls without the idle thread slipping in between them, use [`Session::atomically`].
//!
//! A lower-level [`Client`] is also available for setups where the stream is made by hand,
//! for example over a custom TLS configuration with [`ClientBuilder::connect`]. Sessions made
//! from a bare [`Client`] do not reconnect by themselves.

#![cfg_attr(docsrs, feature(doc_cfg))]

mod channel;
mod parse;
mod reconcile;
mod types;
mod unsolicited_responses;
mod utils;

pub mod authenticator;
pub mod bodystructure;
pub mod cache;
pub mod codec;
pub mod error;
pub mod summary;
pub mod utf7;

mod client;
mod client_builder;
mod conn;
mod session;

pub mod extensions {
    //! Implementations of IMAP extensions that need their own machinery.
    pub mod idle;
}

pub use crate::authenticator::Authenticator;
pub use crate::bodystructure::{parse_bodystructure, parse_envelope};
pub use crate::cache::{MemoryCache, MessageCache};
pub use crate::channel::{CancelHandle, SelectMode};
pub use crate::client::Client;
pub use crate::client_builder::{ClientBuilder, TlsMode};
pub use crate::codec::Namespace;
pub use crate::conn::{Connection, ImapConnection};
pub use crate::error::{Error, ErrorKind, Result};
pub use crate::extensions::idle::{IdleState, SetReadTimeout};
pub use crate::reconcile::{Strategy, SyncReport};
pub use crate::session::{Session, SessionConfig, StoreOp};
pub use crate::summary::{FolderSummary, MemoryStore, MemorySummary, SummaryEntry, SummaryStore};
pub use crate::types::*;

#[cfg(test)]
mod mock_stream;
