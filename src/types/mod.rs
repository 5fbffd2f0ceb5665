//! This module contains types used throughout the IMAP engine.
//!
//! Messages in a folder are addressed in two ways, and a lot of the engine is about keeping the
//! two in agreement:
//!
//!  - A **unique identifier** ([`Uid`]) is a 32-bit value assigned to each message. UIDs are
//!    strictly ascending within a folder: a message added later gets a larger UID than every
//!    message added before it, so local summaries can be kept sorted by UID. UIDs persist across
//!    sessions, unless the folder's `UIDVALIDITY` value changes, in which case every UID the
//!    client knows about for that folder is void.
//!
//!  - A **message sequence number** ([`Seq`]) is the 1-based position of a message in the folder.
//!    Sequence numbers are renumbered whenever a message is expunged: every message after the
//!    expunged one moves down by one. This is why an `EXPUNGE` of `5` followed by an `EXPUNGE`
//!    of `5` removes two different messages.
//!
//! The local summary keeps its records in sequence order, so position `i` in the summary is
//! sequence number `i + 1` as far as the client knows. When that assumption breaks, the
//! [reconciler](crate::reconcile) repairs it.

pub use enumset::EnumSet;

/// A unique identifier of a message within a folder. See the [module documentation](self).
pub type Uid = u32;

/// A message sequence number: the 1-based position of a message within the folder as
/// currently known. See the [module documentation](self).
pub type Seq = u32;

mod flag;
pub use self::flag::{merge_flags, Flag, Flags};

mod capabilities;
pub use self::capabilities::{Capabilities, Capability};

mod mailbox;
pub use self::mailbox::Mailbox;

mod folder;
pub use self::folder::{FolderAttribute, FolderInfo};

mod fetch;
pub use self::fetch::{HeaderSummary, MessageRecord};

pub(crate) mod body;
pub use self::body::{Address, BodyNode, BodyStructure, Disposition, Envelope, NodeId, Params};

mod unsolicited_response;
pub use self::unsolicited_response::{Notification, NotificationCategory};
