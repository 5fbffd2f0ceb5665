//! Interpretation of untagged response units.
//!
//! `imap-proto` does the grammar; this module turns what it finds into the engine's types.
//! Units `imap-proto` cannot make sense of are skipped with a warning rather than failing the
//! command they arrived with.

use std::ops::RangeInclusive;

use chrono::{DateTime, FixedOffset};
use imap_proto::{self, AttributeValue, MailboxDatum, Response, ResponseCode};
use lazy_static::lazy_static;
use mailparse::MailHeaderMap;
use regex::Regex;
use tracing::warn;

use crate::bodystructure::Cursor;
use crate::codec::{self, Namespace};
use crate::error::Result;
use crate::types::{
    Capabilities, Flag, Flags, FolderAttribute, FolderInfo, HeaderSummary, Mailbox, MessageRecord,
    Seq, Uid,
};
use crate::utf7;

lazy_static! {
    static ref CAPABILITY_CODE: Regex = Regex::new(r"(?i)\[CAPABILITY ([^\]]*)\]").unwrap();
    static ref READ_ONLY_CODE: Regex = Regex::new(r"(?i)\[READ-ONLY\]").unwrap();
    static ref NAMESPACE: Regex =
        Regex::new(r#"(?i)^\* NAMESPACE \(\("([^"]*)" (?:"\\?(.)"|NIL)\)"#).unwrap();
    static ref SEARCH: Regex = Regex::new(r"(?i)^\* SEARCH((?: \d+)*)\s*$").unwrap();
}

/// The headers requested for every new message.
pub(crate) const HEADER_FIELDS: &str = "DATE FROM TO CC SUBJECT MESSAGE-ID X-PRIORITY \
                                        X-MSMAIL-PRIORITY IMPORTANCE X-MS-HAS-ATTACH CONTENT-TYPE";

const INTERNALDATE_FORMAT: &str = "%d-%b-%Y %H:%M:%S %z";

fn text(unit: &[u8]) -> String {
    String::from_utf8_lossy(unit).trim_end().to_string()
}

fn parse_unit(unit: &[u8]) -> Option<Response<'_>> {
    match imap_proto::parser::parse_response(unit) {
        Ok((_, response)) => Some(response),
        Err(_) => {
            warn!("skipping unparsable response: {}", text(unit));
            None
        }
    }
}

/// The capabilities carried by a `[CAPABILITY ...]` response code.
pub(crate) fn capabilities_code(line: &[u8]) -> Option<Capabilities> {
    let line = String::from_utf8_lossy(line);
    CAPABILITY_CODE
        .captures(&line)
        .and_then(|caps| caps.get(1))
        .map(|atoms| Capabilities::from_atoms(atoms.as_str().split_whitespace()))
}

/// The capabilities a command reported, from an untagged `CAPABILITY` or the completion code.
pub(crate) fn capabilities(response: &codec::Response) -> Option<Capabilities> {
    for unit in &response.untagged {
        if let Some(Response::Capabilities(caps)) = parse_unit(unit) {
            let atoms = caps.iter().map(|c| match c {
                imap_proto::Capability::Imap4rev1 => "IMAP4rev1".to_string(),
                imap_proto::Capability::Auth(mech) => format!("AUTH={}", mech),
                imap_proto::Capability::Atom(atom) => atom.to_string(),
            });
            return Some(Capabilities::from_atoms(atoms));
        }
    }
    capabilities_code(response.text().as_bytes())
}

/// The personal namespace from a `NAMESPACE` response.
pub(crate) fn namespace(response: &codec::Response) -> Option<Namespace> {
    response.lines().find_map(|line| {
        NAMESPACE.captures(&line).map(|caps| Namespace {
            prefix: caps.get(1).map(|m| m.as_str().to_string()).unwrap_or_default(),
            delimiter: caps.get(2).and_then(|m| m.as_str().chars().next()),
        })
    })
}

/// The folder information in a `SELECT`/`EXAMINE` response.
pub(crate) fn mailbox(response: &codec::Response, read_only: bool) -> Mailbox {
    let mut mailbox = Mailbox {
        read_only: read_only || READ_ONLY_CODE.is_match(response.text()),
        ..Mailbox::default()
    };
    for unit in &response.untagged {
        match parse_unit(unit) {
            Some(Response::Data { code: Some(code), .. }) => match code {
                ResponseCode::UidValidity(v) => mailbox.uid_validity = Some(v),
                ResponseCode::UidNext(n) => mailbox.uid_next = Some(n),
                ResponseCode::Unseen(n) => mailbox.unseen = Some(n),
                ResponseCode::HighestModSeq(m) => mailbox.highest_mod_seq = Some(m),
                ResponseCode::PermanentFlags(flags) => {
                    mailbox.permanent_flags = Flag::parse_list(flags.iter())
                }
                ResponseCode::ReadOnly => mailbox.read_only = true,
                _ => {}
            },
            Some(Response::MailboxData(MailboxDatum::Exists(n))) => mailbox.exists = n,
            Some(Response::MailboxData(MailboxDatum::Recent(n))) => mailbox.recent = n,
            Some(Response::MailboxData(MailboxDatum::Flags(flags))) => {
                mailbox.flags = Flag::parse_list(flags.iter())
            }
            _ => {}
        }
    }
    mailbox
}

/// The flag-related content of one `FETCH` response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct FetchFlags {
    pub(crate) seq: Seq,
    pub(crate) uid: Option<Uid>,
    pub(crate) modseq: Option<u64>,
    pub(crate) flags: Option<Flags>,
}

/// Folder state changes a server can report in any response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Push {
    Exists(u32),
    Recent(u32),
    Expunge(Seq),
    Vanished {
        earlier: bool,
        uids: Vec<RangeInclusive<Uid>>,
    },
    Fetch(FetchFlags),
}

fn fetch_flags(seq: Seq, attrs: &[AttributeValue<'_>]) -> FetchFlags {
    let mut fetch = FetchFlags {
        seq,
        uid: None,
        modseq: None,
        flags: None,
    };
    for attr in attrs {
        match attr {
            AttributeValue::Uid(uid) => fetch.uid = Some(*uid),
            AttributeValue::ModSeq(m) => fetch.modseq = Some(*m),
            AttributeValue::Flags(flags) => fetch.flags = Some(Flag::parse_list(flags.iter())),
            _ => {}
        }
    }
    fetch
}

/// Interpret a unit as a folder state change, if it is one.
pub(crate) fn push(unit: &[u8]) -> Option<Push> {
    match parse_unit(unit)? {
        Response::MailboxData(MailboxDatum::Exists(n)) => Some(Push::Exists(n)),
        Response::MailboxData(MailboxDatum::Recent(n)) => Some(Push::Recent(n)),
        Response::Expunge(seq) => Some(Push::Expunge(seq)),
        Response::Vanished { earlier, uids } => Some(Push::Vanished { earlier, uids }),
        Response::Fetch(seq, attrs) => Some(Push::Fetch(fetch_flags(seq, &attrs))),
        _ => None,
    }
}

/// Every `FETCH` in a response, reduced to UID, MODSEQ and FLAGS.
pub(crate) fn fetches(response: &codec::Response) -> Vec<FetchFlags> {
    response
        .untagged
        .iter()
        .filter_map(|unit| match push(unit) {
            Some(Push::Fetch(f)) => Some(f),
            _ => None,
        })
        .collect()
}

/// The ids of a `SEARCH` response.
pub(crate) fn search_ids(response: &codec::Response) -> Vec<u32> {
    let mut ids = Vec::new();
    for line in response.lines() {
        if let Some(caps) = SEARCH.captures(&line) {
            ids.extend(
                caps.get(1)
                    .map(|m| m.as_str())
                    .unwrap_or("")
                    .split_whitespace()
                    .filter_map(|n| n.parse::<u32>().ok()),
            );
        }
    }
    ids
}

/// The folders of a `LIST` response. Names that are not valid modified UTF-7 are kept as sent.
pub(crate) fn folders(response: &codec::Response, namespace: &Namespace) -> Vec<FolderInfo> {
    let mut folders = Vec::new();
    for unit in &response.untagged {
        if let Some(Response::MailboxData(MailboxDatum::List {
            flags,
            delimiter,
            name,
        })) = parse_unit(unit)
        {
            let name = utf7::decode(&name).unwrap_or_else(|| {
                warn!("folder name is not modified UTF-7: {}", name);
                name.to_string()
            });
            let delimiter = delimiter.and_then(|d| d.chars().next());
            let namespace = Namespace {
                delimiter: delimiter.or(namespace.delimiter),
                ..namespace.clone()
            };
            folders.push(FolderInfo {
                path: namespace.path(&name),
                name,
                delimiter,
                attributes: flags.iter().map(|f| FolderAttribute::from(&**f)).collect(),
            });
        }
    }
    folders
}

fn priority(headers: &[mailparse::MailHeader<'_>]) -> Option<String> {
    let level = |v: &str| -> Option<&'static str> {
        let v = v.trim().to_ascii_lowercase();
        match v.as_str() {
            "high" | "urgent" => Some("high"),
            "normal" => Some("normal"),
            "low" | "non-urgent" => Some("low"),
            _ => match v.chars().next() {
                Some('1') | Some('2') => Some("high"),
                Some('3') => Some("normal"),
                Some('4') | Some('5') => Some("low"),
                _ => None,
            },
        }
    };
    ["X-Priority", "X-MSMail-Priority", "Importance"]
        .iter()
        .filter_map(|name| headers.get_first_value(name))
        .find_map(|v| level(&v))
        .map(str::to_string)
}

/// Decode the allow-listed header block of a new message.
pub(crate) fn header_summary(raw: &[u8]) -> HeaderSummary {
    let headers = match mailparse::parse_headers(raw) {
        Ok((headers, _)) => headers,
        Err(e) => {
            warn!("unable to parse message headers: {}", e);
            return HeaderSummary::default();
        }
    };
    HeaderSummary {
        subject: headers.get_first_value("Subject"),
        from: headers.get_first_value("From"),
        to: headers.get_first_value("To"),
        cc: headers.get_first_value("Cc"),
        date: headers.get_first_value("Date"),
        message_id: headers.get_first_value("Message-ID"),
        content_type: headers.get_first_value("Content-Type"),
        priority: priority(&headers),
        has_attachments: headers
            .get_first_value("X-MS-Has-Attach")
            .map(|v| v.trim().eq_ignore_ascii_case("yes"))
            .unwrap_or(false),
    }
}

pub(crate) fn internal_date(s: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_str(s.trim(), INTERNALDATE_FORMAT).ok()
}

/// Turn the answer to a new-message `UID FETCH` into a summary record.
pub(crate) fn message_record(unit: &[u8]) -> Result<Option<MessageRecord>> {
    let attrs = match parse_unit(unit) {
        Some(Response::Fetch(_, attrs)) => attrs,
        _ => return Ok(None),
    };
    let mut uid = None;
    let mut record = MessageRecord::new(0, Flags::empty());
    for attr in &attrs {
        match attr {
            AttributeValue::Uid(u) => uid = Some(*u),
            AttributeValue::Flags(flags) => {
                record.server_flags = Flag::parse_list(flags.iter());
                record.flags = record.server_flags;
            }
            AttributeValue::Rfc822Size(size) => record.size = Some(*size),
            AttributeValue::InternalDate(date) => record.internal_date = internal_date(date),
            _ => {}
        }
    }
    let uid = match uid {
        Some(uid) => uid,
        None => return Ok(None),
    };
    record.uid = uid;
    if let Some(raw) = section(unit, "BODY[HEADER")? {
        record.headers = header_summary(&raw);
    }
    Ok(Some(record))
}

/// The payload of the first `<marker>...]` section in a FETCH unit, e.g. `BODY[1.2]` or
/// `BINARY[2]`. `marker` is matched without regard to case.
///
/// Returns `None` if the section is absent or `NIL`.
pub(crate) fn section(unit: &[u8], marker: &str) -> Result<Option<Vec<u8>>> {
    let upper = unit.to_ascii_uppercase();
    let marker = marker.to_ascii_uppercase();
    let start = match find(&upper, marker.as_bytes()) {
        Some(start) => start,
        None => return Ok(None),
    };
    let close = match find(&unit[start..], b"]") {
        Some(close) => start + close + 1,
        None => return Ok(None),
    };
    let mut cursor = Cursor::new(unit, "section");
    cursor.seek(close);
    // an origin octet, for partial fetches
    if cursor.peek() == Some(b'<') {
        cursor.skip_until(b'>');
    }
    cursor.skip_spaces();
    cursor.nstring_bytes()
}

pub(crate) fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{Completion, Response as Resp};

    fn response(lines: &[&str], text: &str) -> Resp {
        Resp {
            untagged: lines.iter().map(|l| l.as_bytes().to_vec()).collect(),
            completion: Completion::Ok(text.to_string()),
        }
    }

    #[test]
    fn list_names_are_decoded() {
        let r = response(
            &[
                "* LIST (\\HasNoChildren) \".\" INBOX\r\n",
                "* LIST (\\Noselect \\HasChildren) \".\" \"INBOX.Entw&APw-rfe\"\r\n",
                "* LIST () \".\" {12}\r\nINBOX.a b&-c\r\n",
                "* 3 EXISTS\r\n",
            ],
            "LIST completed",
        );
        let folders = folders(&r, &Namespace::new("INBOX.", Some('.')));
        assert_eq!(folders.len(), 3);
        assert_eq!(folders[0].path, "INBOX");
        assert_eq!(folders[0].attributes, vec![FolderAttribute::HasNoChildren]);
        assert!(folders[0].is_selectable());
        assert_eq!(folders[1].name, "INBOX.Entwürfe");
        assert_eq!(folders[1].path, "Entwürfe");
        assert_eq!(folders[1].delimiter, Some('.'));
        assert!(!folders[1].is_selectable());
        assert_eq!(folders[2].path, "a b&c");
    }

    #[test]
    fn parse_capability() {
        let resp = response(&["* CAPABILITY IMAP4rev1 STARTTLS AUTH=GSSAPI LOGINDISABLED\r\n"], "");
        let caps = capabilities(&resp).unwrap();
        assert!(caps.has(crate::types::Capability::StartTls));
        assert!(caps.has(crate::types::Capability::LoginDisabled));
        assert!(caps.has_auth("GSSAPI"));
        assert!(!caps.has_auth("PLAIN"));

        let resp = response(&[], "[CAPABILITY IMAP4rev1 IDLE CONDSTORE] Logged in");
        let caps = capabilities(&resp).unwrap();
        assert!(caps.has(crate::types::Capability::Condstore));
    }

    #[test]
    fn parse_select() {
        let resp = response(
            &[
                "* FLAGS (\\Answered \\Flagged \\Deleted \\Seen \\Draft $Forwarded)\r\n",
                "* OK [PERMANENTFLAGS (\\Deleted \\Seen \\*)] Limited\r\n",
                "* 18 EXISTS\r\n",
                "* 2 RECENT\r\n",
                "* OK [UNSEEN 17] Message 17 is the first unseen message\r\n",
                "* OK [UIDVALIDITY 3857529045] UIDs valid\r\n",
                "* OK [UIDNEXT 4392] Predicted next UID\r\n",
                "* OK [HIGHESTMODSEQ 715194045007] Highest\r\n",
            ],
            "[READ-ONLY] EXAMINE completed",
        );
        let mailbox = mailbox(&resp, false);
        assert_eq!(mailbox.exists, 18);
        assert_eq!(mailbox.recent, 2);
        assert_eq!(mailbox.unseen, Some(17));
        assert_eq!(mailbox.uid_validity, Some(3857529045));
        assert_eq!(mailbox.uid_next, Some(4392));
        assert_eq!(mailbox.highest_mod_seq, Some(715194045007));
        assert_eq!(mailbox.permanent_flags, Flag::Deleted | Flag::Seen);
        assert!(mailbox.flags.contains(Flag::Forwarded));
        assert!(mailbox.read_only);
    }

    #[test]
    fn parse_pushes() {
        assert_eq!(push(b"* 22 EXISTS\r\n"), Some(Push::Exists(22)));
        assert_eq!(push(b"* 3 RECENT\r\n"), Some(Push::Recent(3)));
        assert_eq!(push(b"* 8 EXPUNGE\r\n"), Some(Push::Expunge(8)));
        assert_eq!(
            push(b"* VANISHED (EARLIER) 41,43:116\r\n"),
            Some(Push::Vanished {
                earlier: true,
                uids: vec![41..=41, 43..=116]
            })
        );
        assert_eq!(
            push(b"* 5 FETCH (UID 12 MODSEQ (100) FLAGS (\\Seen))\r\n"),
            Some(Push::Fetch(FetchFlags {
                seq: 5,
                uid: Some(12),
                modseq: Some(100),
                flags: Some(Flag::Seen.into()),
            }))
        );
        assert_eq!(push(b"* OK still here\r\n"), None);
    }

    #[test]
    fn parse_search() {
        let resp = response(&["* SEARCH 2 84 882\r\n"], "");
        assert_eq!(search_ids(&resp), vec![2, 84, 882]);
        let resp = response(&["* SEARCH\r\n"], "");
        assert!(search_ids(&resp).is_empty());
    }

    #[test]
    fn parse_namespace() {
        let resp = response(&["* NAMESPACE ((\"INBOX.\" \".\")) NIL NIL\r\n"], "");
        assert_eq!(namespace(&resp), Some(Namespace::new("INBOX.", Some('.'))));
        let resp = response(&["* NAMESPACE ((\"\" \"\\\\\")) NIL NIL\r\n"], "");
        assert_eq!(namespace(&resp), Some(Namespace::new("", Some('\\'))));
        let resp = response(&["* NAMESPACE ((\"\" NIL)) NIL NIL\r\n"], "");
        assert_eq!(namespace(&resp), Some(Namespace::new("", None)));
    }

    #[test]
    fn parse_new_message() {
        let headers = "Date: Wed, 17 Jul 1996 02:23:25 -0700\n\
                       From: =?ISO-8859-1?Q?Keld_J=F8rn_Simonsen?= <keld@dkuug.dk>\n\
                       Subject: IMAP4rev1 WG mtg summary and minutes\n\
                       Message-ID: <B27397-0100000@cac.washington.edu>\n\
                       X-Priority: 1 (Highest)\n\
                       X-MS-Has-Attach: yes\n\n";
        let unit = format!(
            "* 12 FETCH (UID 4827313 FLAGS (\\Seen) RFC822.SIZE 4286 \
             INTERNALDATE \"17-Jul-1996 02:44:25 -0700\" \
             BODY[HEADER.FIELDS (DATE FROM SUBJECT)] {{{}}}\r\n{})\r\n",
            headers.len(),
            headers
        );
        let record = message_record(unit.as_bytes()).unwrap().unwrap();
        assert_eq!(record.uid, 4827313);
        assert_eq!(record.server_flags, Into::<crate::types::Flags>::into(Flag::Seen));
        assert_eq!(record.flags, Into::<crate::types::Flags>::into(Flag::Seen));
        assert_eq!(record.size, Some(4286));
        assert_eq!(
            record.internal_date.unwrap().to_rfc3339(),
            "1996-07-17T02:44:25-07:00"
        );
        assert_eq!(
            record.headers.from.as_deref(),
            Some("Keld Jørn Simonsen <keld@dkuug.dk>")
        );
        assert_eq!(
            record.headers.subject.as_deref(),
            Some("IMAP4rev1 WG mtg summary and minutes")
        );
        assert_eq!(record.headers.priority.as_deref(), Some("high"));
        assert!(record.headers.has_attachments);
    }

    #[test]
    fn section_payloads() {
        let unit = b"* 1 FETCH (UID 4 BINARY[2] {5}\r\nhello)\r\n";
        assert_eq!(section(unit, "BINARY[").unwrap(), Some(b"hello".to_vec()));
        let unit = b"* 1 FETCH (UID 4 BODY[1]<0> \"hi there\")\r\n";
        assert_eq!(section(unit, "BODY[").unwrap(), Some(b"hi there".to_vec()));
        let unit = b"* 1 FETCH (UID 4 BODY[1] NIL)\r\n";
        assert_eq!(section(unit, "body[").unwrap(), None);
        let unit = b"* 1 FETCH (UID 4 FLAGS ())\r\n";
        assert_eq!(section(unit, "BODY[").unwrap(), None);
    }
}
