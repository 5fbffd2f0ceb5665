use std::fmt;

use super::{Flags, Uid};

/// Meta-information about an IMAP folder, as returned by
/// [`SELECT`](https://tools.ietf.org/html/rfc3501#section-6.3.1) and friends.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Default)]
#[non_exhaustive]
pub struct Mailbox {
    /// Defined flags in the folder. Keywords the engine does not track are left out.
    pub flags: Flags,

    /// The number of messages in the folder.
    pub exists: u32,

    /// The number of messages with the `\Recent` flag set.
    pub recent: u32,

    /// The message sequence number of the first unseen message in the folder.
    pub unseen: Option<u32>,

    /// A list of message flags that the client can change permanently.
    pub permanent_flags: Flags,

    /// The next unique identifier value.
    pub uid_next: Option<Uid>,

    /// The unique identifier validity value. See [`Uid`] for more details.
    pub uid_validity: Option<u32>,

    /// The highest mod sequence of the folder (CONDSTORE).
    pub highest_mod_seq: Option<u64>,

    /// Whether the folder was opened read-only, either through `EXAMINE` or because the server
    /// answered `[READ-ONLY]`.
    pub read_only: bool,
}

impl fmt::Display for Mailbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "flags: {:?}, exists: {}, recent: {}, unseen: {:?}, permanent_flags: {:?},\
             uid_next: {:?}, uid_validity: {:?}, highest_mod_seq: {:?}, read_only: {}",
            self.flags,
            self.exists,
            self.recent,
            self.unseen,
            self.permanent_flags,
            self.uid_next,
            self.uid_validity,
            self.highest_mod_seq,
            self.read_only,
        )
    }
}
