//! The wire codec: turns command templates into wire bytes, and wire bytes into response units.
//!
//! A *response unit* is one complete server response: a single CRLF-terminated line, or several
//! lines glued together by literals (`{n}\r\n` followed by `n` raw bytes). Units are handed out
//! as raw bytes that still end in CRLF, so that they can be fed to `imap-proto` as they are.

use std::fmt::Write as _;
use std::io::{BufRead, Read};

use lazy_static::lazy_static;
use regex::bytes::Regex;
use regex::Regex as TextRegex;
use tracing::{trace, warn};

use crate::error::{Error, ParseError, Result, ValidateError};
use crate::utf7;

const CR: u8 = b'\r';
const LF: u8 = b'\n';

lazy_static! {
    static ref LITERAL_MARKER: Regex = Regex::new(r"\{(\d+)(\+)?\}$").unwrap();
    static ref ALERT: TextRegex = TextRegex::new(r"(?i)^\S+ (?:OK|NO|BAD) \[ALERT\] ?(.*)$").unwrap();
}

/// An argument for a command template.
///
/// | escape | argument | wire form |
/// |---|---|---|
/// | `%d` | [`Arg::Num`] | decimal |
/// | `%s` | [`Arg::Raw`] or [`Arg::Num`] | verbatim |
/// | `%S` | [`Arg::Str`] | atom, quoted string or literal |
/// | `%F` | [`Arg::Str`] | folder path, namespace-qualified, modified UTF-7, then as `%S` |
/// | `%G` | [`Arg::Str`] | full folder name, modified UTF-7, then as `%S` |
///
/// `%%` is a literal `%`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Arg<'a> {
    /// A number.
    Num(u64),
    /// Text that is already in wire form, such as a UID set or a parenthesized list.
    Raw(&'a str),
    /// A string that needs encoding.
    Str(&'a str),
}

/// The personal namespace of the account: the prefix and hierarchy delimiter that turn a
/// `/`-separated folder path into the name the server knows it by.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Namespace {
    /// Prefix of every personal folder, e.g. `INBOX.`; often empty.
    pub prefix: String,
    /// The hierarchy delimiter, if the server has one.
    pub delimiter: Option<char>,
}

impl Namespace {
    /// Make a namespace from a prefix and a delimiter.
    pub fn new<S: Into<String>>(prefix: S, delimiter: Option<char>) -> Self {
        Namespace {
            prefix: prefix.into(),
            delimiter,
        }
    }

    /// The server-side name of a `/`-separated folder path.
    ///
    /// `INBOX` is special and never takes the prefix.
    pub fn full_name(&self, path: &str) -> String {
        if path.eq_ignore_ascii_case("INBOX") {
            return "INBOX".to_string();
        }
        let name = match self.delimiter {
            Some(d) if d != '/' => path.replace('/', &d.to_string()),
            _ => path.to_string(),
        };
        if self.prefix.is_empty() || name.starts_with(&self.prefix) {
            name
        } else {
            format!("{}{}", self.prefix, name)
        }
    }

    /// The `/`-separated path of a server-side folder name; the reverse of
    /// [`full_name`](Self::full_name).
    pub fn path(&self, name: &str) -> String {
        if name.eq_ignore_ascii_case("INBOX") {
            return "INBOX".to_string();
        }
        let name = name
            .strip_prefix(self.prefix.as_str())
            .filter(|rest| !rest.is_empty())
            .unwrap_or(name);
        match self.delimiter {
            Some(d) if d != '/' => name.replace(d, "/"),
            _ => name.to_string(),
        }
    }
}

/// Whether `s` can be sent as a bare atom.
pub fn is_atom(s: &str) -> bool {
    !s.is_empty()
        && s.bytes().all(|b| {
            b > 0x20
                && b < 0x7f
                && !matches!(b, b'(' | b')' | b'{' | b'%' | b'*' | b'"' | b'\\' | b']')
        })
}

/// Encode a string argument.
///
/// Atoms are sent as they are. Anything else becomes a non-synchronizing literal when the server
/// has `LITERAL+`, and a quoted string otherwise. A quoted string cannot hold CR or LF.
pub fn encode_string(s: &str, literal_plus: bool) -> std::result::Result<String, ValidateError> {
    if is_atom(s) {
        return Ok(s.to_string());
    }
    if literal_plus && !s.is_empty() {
        return Ok(format!("{{{}+}}\r\n{}", s.len(), s));
    }
    let mut quoted = String::with_capacity(s.len() + 2);
    quoted.push('"');
    for c in s.chars() {
        match c {
            '\r' | '\n' | '\0' => return Err(ValidateError::InvalidChar(c)),
            '"' | '\\' => {
                quoted.push('\\');
                quoted.push(c);
            }
            c => quoted.push(c),
        }
    }
    quoted.push('"');
    Ok(quoted)
}

/// Expand a command template.
pub fn format_command(
    template: &str,
    args: &[Arg<'_>],
    literal_plus: bool,
    namespace: &Namespace,
) -> std::result::Result<String, ValidateError> {
    let mut out = String::with_capacity(template.len() + 16);
    let mut args_used = 0;
    let mut chars = template.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        let escape = chars.next().ok_or(ValidateError::TrailingPercent)?;
        if escape == '%' {
            out.push('%');
            continue;
        }
        if !matches!(escape, 'd' | 's' | 'S' | 'F' | 'G') {
            return Err(ValidateError::UnknownEscape(escape));
        }
        let index = args_used;
        let arg = args
            .get(index)
            .ok_or(ValidateError::MissingArgument(index))?;
        args_used += 1;
        let wrong = ValidateError::WrongArgument { index, escape };
        match (escape, arg) {
            ('d', Arg::Num(n)) | ('s', Arg::Num(n)) => {
                let _ = write!(out, "{}", n);
            }
            ('s', Arg::Raw(s)) => out.push_str(s),
            ('S', Arg::Str(s)) => out.push_str(&encode_string(s, literal_plus)?),
            ('F', Arg::Str(s)) => {
                let name = utf7::encode(&namespace.full_name(s));
                out.push_str(&encode_string(&name, literal_plus)?);
            }
            ('G', Arg::Str(s)) => {
                out.push_str(&encode_string(&utf7::encode(s), literal_plus)?);
            }
            _ => return Err(wrong),
        }
    }
    if args_used < args.len() {
        return Err(ValidateError::UnusedArguments(args.len() - args_used));
    }
    Ok(out)
}

/// Read one LF-terminated line onto `into`, making sure it ends in CRLF.
pub(crate) fn read_line<R: BufRead>(r: &mut R, into: &mut Vec<u8>) -> Result<usize> {
    let read = r.read_until(LF, into)?;
    if read == 0 {
        return Err(Error::ConnectionLost);
    }
    if into.last() != Some(&LF) {
        // the peer went away in the middle of a line
        return Err(Error::ConnectionLost);
    }
    let len = into.len();
    if read < 2 || into[len - 2] != CR {
        into.insert(len - 1, CR);
        return Ok(read + 1);
    }
    Ok(read)
}

/// Drop NULs and collapse CRLF into LF.
pub(crate) fn normalize_literal(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len());
    for &b in payload {
        if b == 0 {
            continue;
        }
        if b == LF && out.last() == Some(&CR) {
            out.pop();
        }
        out.push(b);
    }
    out
}

/// Tracks parenthesis nesting outside quoted strings, across the lines of one unit.
#[derive(Default)]
struct Depth {
    depth: i64,
    in_quote: bool,
}

impl Depth {
    fn scan(&mut self, line: &[u8]) {
        let mut escaped = false;
        for &b in line {
            if self.in_quote {
                match b {
                    _ if escaped => escaped = false,
                    b'\\' => escaped = true,
                    b'"' => self.in_quote = false,
                    _ => {}
                }
                continue;
            }
            match b {
                b'"' => self.in_quote = true,
                b'(' => self.depth += 1,
                b')' => self.depth -= 1,
                _ => {}
            }
        }
        // quoted strings never span lines
        self.in_quote = false;
    }
}

fn strip_crlf(line: &[u8]) -> &[u8] {
    line.strip_suffix(b"\r\n")
        .or_else(|| line.strip_suffix(b"\n"))
        .unwrap_or(line)
}

/// Read one complete response unit, pulling in every literal it contains.
///
/// Literal payloads are normalized with [`normalize_literal`] and their `{n}` marker is rewritten
/// to the normalized length. An empty line inside an open parenthesized list is noise and skipped.
pub(crate) fn read_unit<R: BufRead>(r: &mut R) -> Result<Vec<u8>> {
    let mut unit = Vec::new();
    let mut depth = Depth::default();
    loop {
        let start = unit.len();
        read_line(r, &mut unit)?;
        let body = strip_crlf(&unit[start..]);
        trace!("S: {}", String::from_utf8_lossy(body));
        if body.is_empty() && depth.depth > 0 {
            warn!("skipping empty line inside a parenthesized list");
            unit.truncate(start);
            continue;
        }
        depth.scan(body);
        let body_len = body.len();

        let marker = LITERAL_MARKER.captures(body).map(|caps| {
            let whole = caps.get(0).map(|m| m.start()).unwrap_or(body_len);
            (whole, caps.get(1).map(|m| m.as_bytes().to_vec()))
        });
        match marker {
            Some((marker_start, Some(digits))) => {
                let len: u64 = std::str::from_utf8(&digits)
                    .ok()
                    .and_then(|d| d.parse().ok())
                    .ok_or_else(|| {
                        ParseError::LiteralLength(String::from_utf8_lossy(&digits).into_owned())
                    })?;
                // grows with what actually arrives, not with what the server announced
                let mut payload = Vec::new();
                (&mut *r).take(len).read_to_end(&mut payload)?;
                if (payload.len() as u64) < len {
                    return Err(Error::ConnectionLost);
                }
                trace!("S: <literal of {} bytes>", len);
                let normalized = normalize_literal(&payload);
                unit.truncate(start + marker_start);
                unit.extend_from_slice(format!("{{{}}}\r\n", normalized.len()).as_bytes());
                unit.extend_from_slice(&normalized);
            }
            _ => return Ok(unit),
        }
    }
}

/// The status of a tagged completion.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Status {
    Ok,
    No,
    Bad,
}

/// What a unit is, relative to the command in flight.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Kind {
    /// `+ text`
    Continuation(String),
    /// `<tag> OK|NO|BAD text` for the current tag.
    Tagged(Status, String),
    /// `* ...`
    Untagged,
    /// A tagged line for some other command.
    Foreign,
}

/// Classify a unit against the tag of the command in flight.
pub(crate) fn classify(unit: &[u8], tag: &str) -> Kind {
    let body = strip_crlf(unit);
    if body.starts_with(b"+") {
        let text = String::from_utf8_lossy(&body[1..]).trim_start().to_string();
        return Kind::Continuation(text);
    }
    if body.starts_with(b"*") {
        return Kind::Untagged;
    }
    let rest = match body
        .strip_prefix(tag.as_bytes())
        .and_then(|r| r.strip_prefix(b" "))
    {
        Some(rest) => String::from_utf8_lossy(rest),
        None => return Kind::Foreign,
    };
    let (word, text) = match rest.find(' ') {
        Some(sp) => (&rest[..sp], rest[sp + 1..].to_string()),
        None => (&rest[..], String::new()),
    };
    let status = match word.to_ascii_uppercase().as_str() {
        "OK" => Status::Ok,
        "NO" => Status::No,
        "BAD" => Status::Bad,
        _ => return Kind::Foreign,
    };
    Kind::Tagged(status, text)
}

/// The text of an untagged `BYE`, if `unit` is one.
pub(crate) fn bye_text(unit: &[u8]) -> Option<String> {
    let body = strip_crlf(unit);
    let rest = body.strip_prefix(b"* ")?;
    if rest.len() < 3 || !rest[..3].eq_ignore_ascii_case(b"BYE") {
        return None;
    }
    if rest.len() > 3 && rest[3] != b' ' {
        return None;
    }
    Some(String::from_utf8_lossy(&rest[3..]).trim().to_string())
}

/// The user-facing text of an `[ALERT]` response, tagged or untagged.
pub(crate) fn alert_text(unit: &[u8]) -> Option<String> {
    let body = String::from_utf8_lossy(strip_crlf(unit));
    ALERT
        .captures(&body)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// How a command finished.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Completion {
    /// A tagged `OK`, with the text after the status word.
    Ok(String),
    /// A continuation request, with its text.
    Continue(String),
}

/// The accumulated result of one command: every untagged unit, in arrival order, and how the
/// command finished. A tagged `NO` or `BAD` is reported as an [`Error`] instead.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Response {
    /// Untagged units, CRLF-terminated, with literal payloads normalized.
    pub untagged: Vec<Vec<u8>>,
    /// The completion.
    pub completion: Completion,
}

impl Response {
    /// The status text of the completion.
    pub fn text(&self) -> &str {
        match &self.completion {
            Completion::Ok(t) | Completion::Continue(t) => t,
        }
    }

    /// Iterate over the untagged units as lossy text, without the trailing CRLF.
    pub fn lines(&self) -> impl Iterator<Item = String> + '_ {
        self.untagged
            .iter()
            .map(|u| String::from_utf8_lossy(strip_crlf(u)).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn unit(wire: &[u8]) -> Vec<u8> {
        read_unit(&mut Cursor::new(wire.to_vec())).unwrap()
    }

    #[test]
    fn atoms() {
        assert!(is_atom("INBOX"));
        assert!(is_atom("\\Seen"));
        assert!(!is_atom(""));
        assert!(!is_atom("Sent Items"));
        assert!(!is_atom("a(b"));
        assert!(!is_atom("a{b"));
        assert!(!is_atom("Entwürfe"));
    }

    #[test]
    fn string_encoding_is_deterministic() {
        for lp in [false, true] {
            for s in ["INBOX", "two words", "say \"hi\"", "back\\slash", "(paren", ""] {
                let first = encode_string(s, lp).unwrap();
                assert_eq!(first, encode_string(s, lp).unwrap());
                if s.contains('(') {
                    assert_ne!(first, s);
                }
            }
        }
        assert_eq!(encode_string("two words", false).unwrap(), "\"two words\"");
        assert_eq!(encode_string("say \"hi\"", false).unwrap(), r#""say \"hi\"""#);
        assert_eq!(encode_string("back\\slash", false).unwrap(), r#""back\\slash""#);
        assert_eq!(encode_string("", true).unwrap(), "\"\"");
        assert_eq!(encode_string("two words", true).unwrap(), "{9+}\r\ntwo words");
    }

    #[test]
    fn quoted_rejects_line_breaks() {
        assert_eq!(
            encode_string("a\r\nb", false),
            Err(ValidateError::InvalidChar('\r'))
        );
        assert_eq!(encode_string("a\nb", false), Err(ValidateError::InvalidChar('\n')));
        // a literal can carry anything
        assert_eq!(encode_string("a\nb", true).unwrap(), "{3+}\r\na\nb");
    }

    #[test]
    fn templates() {
        let ns = Namespace::new("INBOX.", Some('.'));
        let cmd = format_command(
            "UID FETCH %s (FLAGS) (CHANGEDSINCE %d) %%",
            &[Arg::Raw("1:*"), Arg::Num(90)],
            false,
            &ns,
        )
        .unwrap();
        assert_eq!(cmd, "UID FETCH 1:* (FLAGS) (CHANGEDSINCE 90) %");

        let cmd = format_command("SELECT %F", &[Arg::Str("Work/Projects")], false, &ns).unwrap();
        assert_eq!(cmd, "SELECT INBOX.Work.Projects");
        let cmd = format_command("SELECT %F", &[Arg::Str("inbox")], false, &ns).unwrap();
        assert_eq!(cmd, "SELECT INBOX");
        let cmd = format_command("LIST \"\" %G", &[Arg::Str("Entwürfe")], false, &ns).unwrap();
        assert_eq!(cmd, "LIST \"\" Entw&APw-rfe");
    }

    #[test]
    fn template_misuse_fails_fast() {
        let ns = Namespace::default();
        assert_eq!(
            format_command("NOOP %q", &[], false, &ns),
            Err(ValidateError::UnknownEscape('q'))
        );
        assert_eq!(
            format_command("NOOP %", &[], false, &ns),
            Err(ValidateError::TrailingPercent)
        );
        assert_eq!(
            format_command("FETCH %d %d", &[Arg::Num(1)], false, &ns),
            Err(ValidateError::MissingArgument(1))
        );
        assert_eq!(
            format_command("FETCH %d", &[Arg::Str("1")], false, &ns),
            Err(ValidateError::WrongArgument {
                index: 0,
                escape: 'd'
            })
        );
        assert_eq!(
            format_command("NOOP", &[Arg::Num(1)], false, &ns),
            Err(ValidateError::UnusedArguments(1))
        );
    }

    #[test]
    fn namespace_prefix_is_not_doubled() {
        let ns = Namespace::new("INBOX.", Some('.'));
        assert_eq!(ns.full_name("INBOX.Sent"), "INBOX.Sent");
        assert_eq!(ns.full_name("Sent"), "INBOX.Sent");
        let flat = Namespace::default();
        assert_eq!(flat.full_name("a/b"), "a/b");
    }

    #[test]
    fn server_names_map_back_to_paths() {
        let ns = Namespace::new("INBOX.", Some('.'));
        assert_eq!(ns.path("INBOX.Lists.rust"), "Lists/rust");
        assert_eq!(ns.path("inbox"), "INBOX");
        assert_eq!(ns.path("Shared.x"), "Shared/x");
        assert_eq!(ns.full_name(&ns.path("INBOX.Lists.rust")), "INBOX.Lists.rust");
    }

    #[test]
    fn single_line_unit() {
        assert_eq!(unit(b"* 3 EXISTS\r\n* 1 RECENT\r\n"), b"* 3 EXISTS\r\n");
        // bare LF line endings are repaired
        assert_eq!(unit(b"* 3 EXISTS\n"), b"* 3 EXISTS\r\n");
    }

    #[test]
    fn literal_is_normalized_and_length_rewritten() {
        let wire = b"* 1 FETCH (BODY[] {12}\r\nab\r\nc\0d\r\ne\0f)\r\n";
        assert_eq!(unit(wire), b"* 1 FETCH (BODY[] {8}\r\nab\ncd\nef)\r\n");
    }

    #[test]
    fn literal_round_trip() {
        let payload = "line one\r\nline\0 two\r\n\r\nend";
        let encoded = encode_string(payload, true).unwrap();
        // what a server echoing the string back in a FETCH would send
        let wire = format!(
            "* 1 FETCH (BODY[] {})\r\n",
            encoded.replacen('+', "", 1)
        );
        let got = unit(wire.as_bytes());

        let expected_payload = b"line one\nline two\n\nend";
        let mut expected = format!("* 1 FETCH (BODY[] {{{}}}\r\n", expected_payload.len()).into_bytes();
        expected.extend_from_slice(expected_payload);
        expected.extend_from_slice(b")\r\n");
        assert_eq!(got, expected);
    }

    #[test]
    fn literal_plus_marker_and_several_literals() {
        let wire = b"* 2 FETCH (BODY[1] {3+}\r\nabc BODY[2] {2}\r\nde)\r\n";
        assert_eq!(unit(wire), b"* 2 FETCH (BODY[1] {3}\r\nabc BODY[2] {2}\r\nde)\r\n");
    }

    #[test]
    fn empty_line_inside_list_is_skipped() {
        let wire = b"* 1 FETCH (FLAGS (\\Seen) BODY[] {2}\r\nhi\r\n\r\n)\r\n* 2 EXISTS\r\n";
        let mut cursor = Cursor::new(wire.to_vec());
        assert_eq!(
            read_unit(&mut cursor).unwrap(),
            b"* 1 FETCH (FLAGS (\\Seen) BODY[] {2}\r\nhi)\r\n"
        );
        assert_eq!(read_unit(&mut cursor).unwrap(), b"* 2 EXISTS\r\n");
    }

    #[test]
    fn parens_in_quotes_do_not_count() {
        let wire = b"* OK \"(((\" done\r\n";
        assert_eq!(unit(wire), wire.to_vec());
    }

    #[test]
    fn truncated_literal_is_connection_lost() {
        let mut cursor = Cursor::new(b"* 1 FETCH (BODY[] {10}\r\nabc".to_vec());
        assert!(matches!(read_unit(&mut cursor), Err(Error::ConnectionLost)));
        let mut empty = Cursor::new(Vec::new());
        assert!(matches!(read_unit(&mut empty), Err(Error::ConnectionLost)));
    }

    #[test]
    fn huge_literal_length_does_not_allocate_up_front() {
        let mut cursor = Cursor::new(b"* 1 FETCH (BODY[] {18446744073709551615}\r\nabc".to_vec());
        assert!(matches!(read_unit(&mut cursor), Err(Error::ConnectionLost)));
        let mut cursor = Cursor::new(b"* 1 FETCH (BODY[] {99999999999999999999999}\r\n".to_vec());
        assert!(matches!(
            read_unit(&mut cursor),
            Err(Error::Parse(ParseError::LiteralLength(_)))
        ));
    }

    #[test]
    fn classification() {
        assert_eq!(
            classify(b"+ idling\r\n", "A00001"),
            Kind::Continuation("idling".into())
        );
        assert_eq!(classify(b"* 3 EXISTS\r\n", "A00001"), Kind::Untagged);
        assert_eq!(
            classify(b"A00001 OK [READ-WRITE] SELECT completed\r\n", "A00001"),
            Kind::Tagged(Status::Ok, "[READ-WRITE] SELECT completed".into())
        );
        assert_eq!(
            classify(b"A00001 no Mailbox doesn't exist\r\n", "A00001"),
            Kind::Tagged(Status::No, "Mailbox doesn't exist".into())
        );
        assert_eq!(classify(b"A00000 OK done\r\n", "A00001"), Kind::Foreign);
    }

    #[test]
    fn bye_and_alert() {
        assert_eq!(bye_text(b"* BYE shutting down\r\n").as_deref(), Some("shutting down"));
        assert_eq!(bye_text(b"* bye\r\n").as_deref(), Some(""));
        assert_eq!(bye_text(b"* BYEBYE\r\n"), None);
        assert_eq!(bye_text(b"* OK BYE\r\n"), None);

        assert_eq!(
            alert_text(b"* OK [ALERT] Mailbox is at 95% of quota\r\n").as_deref(),
            Some("Mailbox is at 95% of quota")
        );
        assert_eq!(
            alert_text(b"A00002 NO [ALERT] Account locked\r\n").as_deref(),
            Some("Account locked")
        );
        assert_eq!(alert_text(b"* OK [UIDNEXT 4] Predicted\r\n"), None);
    }
}
