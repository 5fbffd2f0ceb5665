use chrono::{DateTime, FixedOffset};

use super::{Flags, Uid};

/// The header fields a summary record keeps, decoded from the header allow-list fetched for new
/// messages.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HeaderSummary {
    /// `Subject`, with encoded-words decoded.
    pub subject: Option<String>,
    /// `From`, with encoded-words decoded.
    pub from: Option<String>,
    /// `To`, with encoded-words decoded.
    pub to: Option<String>,
    /// `Cc`, with encoded-words decoded.
    pub cc: Option<String>,
    /// `Date`, verbatim.
    pub date: Option<String>,
    /// `Message-ID`, verbatim.
    pub message_id: Option<String>,
    /// `Content-Type`, verbatim.
    pub content_type: Option<String>,
    /// Message priority, folded from `X-Priority`, `X-MSMail-Priority` and `Importance`.
    pub priority: Option<String>,
    /// Whether `X-MS-Has-Attach` claims the message has attachments.
    pub has_attachments: bool,
}

/// One message of a folder summary, as first learned from the server.
///
/// `server_flags` is the last flag set the server reported; `flags` is what the user sees and
/// may carry local edits that have not reached the server yet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageRecord {
    /// The message's unique identifier.
    pub uid: Uid,
    /// The last flags reported by the server.
    pub server_flags: Flags,
    /// The local flags.
    pub flags: Flags,
    /// `RFC822.SIZE`
    pub size: Option<u32>,
    /// `INTERNALDATE`
    pub internal_date: Option<DateTime<FixedOffset>>,
    /// Selected header fields.
    pub headers: HeaderSummary,
}

impl MessageRecord {
    /// A record that only knows a UID and the server's flags.
    pub fn new(uid: Uid, server_flags: Flags) -> Self {
        MessageRecord {
            uid,
            server_flags,
            flags: server_flags,
            size: None,
            internal_date: None,
            headers: HeaderSummary::default(),
        }
    }
}
