use enumset::{EnumSet, EnumSetType};
use std::fmt;

/// A message flag the engine tracks.
///
/// The first six are the system flags pre-defined in [RFC 3501 section
/// 2.3.2](https://tools.ietf.org/html/rfc3501#section-2.3.2); they begin with `\` on the wire.
/// The rest are widely deployed keywords that mail clients treat as first-class flags. Any other
/// keyword a server reports is ignored: the summary stores flags as a bitset, not as strings.
///
/// > Note: The `\Recent` system flag is a special case of a session flag.  `\Recent` can not be
/// > used as an argument in a `STORE` or `APPEND` command, and thus can not be changed at all.
#[derive(Debug, Hash, EnumSetType)]
pub enum Flag {
    /// Message has been read
    Seen,
    /// Message has been answered
    Answered,
    /// Message is "flagged" for urgent/special attention
    Flagged,
    /// Message is "deleted" for removal by later EXPUNGE
    Deleted,
    /// Message has not completed composition (marked as a draft).
    Draft,
    /// Message is "recently" arrived in this folder.
    Recent,
    /// `$Forwarded`
    Forwarded,
    /// `$MDNSent`
    MdnSent,
    /// `$Junk`
    Junk,
    /// `$NotJunk`
    NotJunk,
}

/// A set of [`Flag`]s.
pub type Flags = EnumSet<Flag>;

impl Flag {
    /// Map a wire flag to a tracked flag, ignoring case. Returns `None` for keywords the
    /// engine does not track.
    pub fn from_wire(s: &str) -> Option<Flag> {
        let flag = match s.to_ascii_lowercase().as_str() {
            "\\seen" => Flag::Seen,
            "\\answered" => Flag::Answered,
            "\\flagged" => Flag::Flagged,
            "\\deleted" => Flag::Deleted,
            "\\draft" => Flag::Draft,
            "\\recent" => Flag::Recent,
            "$forwarded" => Flag::Forwarded,
            "$mdnsent" => Flag::MdnSent,
            "$junk" | "junk" => Flag::Junk,
            "$notjunk" | "notjunk" | "nonjunk" => Flag::NotJunk,
            _ => return None,
        };
        Some(flag)
    }

    /// Collect the tracked flags out of a server flag list.
    pub fn parse_list<S: AsRef<str>>(flags: impl IntoIterator<Item = S>) -> Flags {
        flags
            .into_iter()
            .filter_map(|f| Flag::from_wire(f.as_ref()))
            .collect()
    }

    /// Whether a client may change this flag with `STORE`.
    pub fn is_storable(self) -> bool {
        self != Flag::Recent
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match *self {
            Flag::Seen => "\\Seen",
            Flag::Answered => "\\Answered",
            Flag::Flagged => "\\Flagged",
            Flag::Deleted => "\\Deleted",
            Flag::Draft => "\\Draft",
            Flag::Recent => "\\Recent",
            Flag::Forwarded => "$Forwarded",
            Flag::MdnSent => "$MDNSent",
            Flag::Junk => "$Junk",
            Flag::NotJunk => "$NotJunk",
        })
    }
}

/// Fold a new server flag snapshot into a message's local flags.
///
/// Flags the server set since `old_server` are added, flags it cleared are removed, and local
/// edits to flags the server did not touch survive. Returns the new local flags; the caller
/// stores `new_server` as the next snapshot.
pub fn merge_flags(local: Flags, old_server: Flags, new_server: Flags) -> Flags {
    let server_set = new_server - old_server;
    let server_cleared = old_server - new_server;
    (local | server_set) - server_cleared
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_list_ignores_unknown_keywords() {
        let flags = Flag::parse_list(["\\Seen", "\\ANSWERED", "$label1", "$Junk"]);
        assert_eq!(flags, Flag::Seen | Flag::Answered | Flag::Junk);
    }

    #[test]
    fn merge_keeps_local_edits() {
        // the user flagged the message locally; the server then marked it seen
        let local = Flag::Flagged | Flag::Draft;
        let old = EnumSet::only(Flag::Draft);
        let new = EnumSet::only(Flag::Seen);
        assert_eq!(merge_flags(local, old, new), Flag::Flagged | Flag::Seen);
    }

    #[test]
    fn merge_from_empty() {
        let merged = merge_flags(Flags::empty(), Flags::empty(), EnumSet::only(Flag::Seen));
        assert_eq!(merged, EnumSet::only(Flag::Seen));
    }

    #[test]
    fn display() {
        assert_eq!(Flag::MdnSent.to_string(), "$MDNSent");
        assert_eq!(Flag::Deleted.to_string(), "\\Deleted");
    }
}
