//! A parser for the `BODYSTRUCTURE` and `ENVELOPE` FETCH items.
//!
//! Both are parenthesized lists ([RFC 3501 section
//! 7.4.2](https://tools.ietf.org/html/rfc3501#section-7.4.2)). The parser walks a [`Cursor`]
//! forward over the bytes and never goes back past a field it has accepted. Failures carry the
//! byte offset at which they happened.
//!
//! Servers append their own extension fields to body lists now and then. Anything the parser
//! does not recognize in an extension position is skipped up to the `)` that closes the body,
//! and the fields it could not read are left empty.

use std::str;

use nom::bytes::complete::{tag, tag_no_case, take_while1};
use nom::character::complete::{char, digit1};
use nom::combinator::map_res;
use nom::sequence::{delimited, terminated};
use nom::IResult;
use tracing::warn;

use crate::error::{Error, ParseError, Result};
use crate::types::{
    Address, BodyNode, BodyStructure, Disposition, Envelope, NodeId, Params,
};

const MAX_DEPTH: usize = 64;

fn number(i: &[u8]) -> IResult<&[u8], u32> {
    map_res(map_res(digit1, str::from_utf8), str::parse)(i)
}

fn literal_len(i: &[u8]) -> IResult<&[u8], usize> {
    delimited(
        char('{'),
        map_res(map_res(digit1, str::from_utf8), str::parse),
        terminated(tag("}"), tag("\r\n")),
    )(i)
}

fn nil(i: &[u8]) -> IResult<&[u8], &[u8]> {
    tag_no_case("NIL")(i)
}

fn atom(i: &[u8]) -> IResult<&[u8], &[u8]> {
    take_while1(|b: u8| b > b' ' && b < 0x7f && !b"(){\"\\".contains(&b))(i)
}

/// A position in a response, moving forward only.
#[derive(Debug)]
pub(crate) struct Cursor<'a> {
    input: &'a [u8],
    pos: usize,
    what: &'static str,
}

impl<'a> Cursor<'a> {
    pub(crate) fn new(input: &'a [u8], what: &'static str) -> Self {
        Cursor {
            input,
            pos: 0,
            what,
        }
    }

    fn rest(&self) -> &'a [u8] {
        &self.input[self.pos..]
    }

    pub(crate) fn seek(&mut self, pos: usize) {
        self.pos = pos.min(self.input.len());
    }

    pub(crate) fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn error(&self, reason: &str) -> Error {
        Error::Parse(ParseError::BodyStructure {
            what: self.what,
            offset: self.pos,
            reason: reason.to_string(),
        })
    }

    fn run<O>(
        &mut self,
        mut parser: impl FnMut(&'a [u8]) -> IResult<&'a [u8], O>,
        expected: &str,
    ) -> Result<O> {
        match parser(self.rest()) {
            Ok((rest, out)) => {
                self.pos = self.input.len() - rest.len();
                Ok(out)
            }
            Err(_) => Err(self.error(expected)),
        }
    }

    pub(crate) fn skip_spaces(&mut self) {
        while self.peek() == Some(b' ') {
            self.pos += 1;
        }
    }

    pub(crate) fn skip_until(&mut self, end: u8) {
        while let Some(b) = self.peek() {
            self.pos += 1;
            if b == end {
                break;
            }
        }
    }

    fn expect(&mut self, b: u8) -> Result<()> {
        self.skip_spaces();
        if self.peek() == Some(b) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(&format!("expected '{}'", b as char)))
        }
    }

    // Consume a NIL if one is next.
    fn nil(&mut self) -> bool {
        self.skip_spaces();
        self.run(nil, "NIL").is_ok()
    }

    /// Whether the enclosing list ends here.
    fn at_close(&mut self) -> bool {
        self.skip_spaces();
        matches!(self.peek(), Some(b')') | None)
    }

    fn quoted(&mut self) -> Result<Vec<u8>> {
        self.expect(b'"')?;
        let mut out = Vec::new();
        loop {
            match self.peek() {
                None | Some(b'\r') | Some(b'\n') => {
                    return Err(self.error("unterminated quoted string"))
                }
                Some(b'"') => {
                    self.pos += 1;
                    return Ok(out);
                }
                Some(b'\\') => {
                    self.pos += 1;
                    match self.peek() {
                        Some(b) => out.push(b),
                        None => return Err(self.error("unterminated quoted string")),
                    }
                    self.pos += 1;
                }
                Some(b) => {
                    out.push(b);
                    self.pos += 1;
                }
            }
        }
    }

    fn literal(&mut self) -> Result<Vec<u8>> {
        let len = self.run(literal_len, "literal length")?;
        if self.rest().len() < len {
            return Err(self.error("literal runs past the end of the response"));
        }
        let data = self.rest()[..len].to_vec();
        self.pos += len;
        Ok(data)
    }

    /// A string, or `NIL`.
    pub(crate) fn nstring_bytes(&mut self) -> Result<Option<Vec<u8>>> {
        self.skip_spaces();
        match self.peek() {
            Some(b'"') => self.quoted().map(Some),
            Some(b'{') => self.literal().map(Some),
            _ if self.nil() => Ok(None),
            // some servers leave well-known tokens unquoted
            Some(_) => self.run(atom, "expected string or NIL").map(|a| Some(a.to_vec())),
            None => Err(self.error("expected string or NIL")),
        }
    }

    fn nstring(&mut self) -> Result<Option<String>> {
        Ok(self
            .nstring_bytes()?
            .map(|b| String::from_utf8_lossy(&b).into_owned()))
    }

    fn string(&mut self) -> Result<String> {
        Ok(self.nstring()?.unwrap_or_default())
    }

    fn number(&mut self) -> Result<u32> {
        self.skip_spaces();
        self.run(number, "expected a number")
    }

    fn skip_quoted_or_literal(&mut self) -> Result<()> {
        match self.peek() {
            Some(b'"') => self.quoted().map(|_| ()),
            Some(b'{') => self.literal().map(|_| ()),
            _ => Ok(()),
        }
    }

    /// Move to the `)` that closes the current list, without consuming it.
    fn skip_to_close(&mut self) -> Result<()> {
        let mut depth = 0usize;
        loop {
            match self.peek() {
                None => return Err(self.error("unterminated list")),
                Some(b'"') | Some(b'{') => {
                    let at = self.pos;
                    if self.skip_quoted_or_literal().is_err() {
                        self.pos = at + 1;
                    }
                }
                Some(b'(') => {
                    depth += 1;
                    self.pos += 1;
                }
                Some(b')') if depth == 0 => return Ok(()),
                Some(b')') => {
                    depth -= 1;
                    self.pos += 1;
                }
                Some(_) => self.pos += 1,
            }
        }
    }

    // Step over one value: a string, a list, or an atom such as `BODY[HEADER.FIELDS (DATE)]<0>`.
    fn skip_value(&mut self) -> Result<()> {
        self.skip_spaces();
        match self.peek() {
            None => Err(self.error("expected a value")),
            Some(b'"') | Some(b'{') => self.skip_quoted_or_literal(),
            Some(b'(') => {
                self.pos += 1;
                self.skip_to_close()?;
                self.pos += 1;
                Ok(())
            }
            Some(_) => {
                let start = self.pos;
                let mut brackets = 0usize;
                while let Some(b) = self.peek() {
                    match b {
                        b'[' => brackets += 1,
                        b']' => brackets = brackets.saturating_sub(1),
                        b'\r' | b'\n' => break,
                        b' ' | b')' if brackets == 0 => break,
                        _ => {}
                    }
                    self.pos += 1;
                }
                if self.pos == start {
                    return Err(self.error("expected a value"));
                }
                Ok(())
            }
        }
    }

    fn params(&mut self) -> Result<Params> {
        let mut params = Params::default();
        if self.nil() {
            return Ok(params);
        }
        self.expect(b'(')?;
        while !self.at_close() {
            let name = self.string()?;
            let value = self.string()?;
            params.push(name, decode_words(&value));
        }
        self.expect(b')')?;
        Ok(params)
    }

    fn disposition(&mut self) -> Result<Option<Disposition>> {
        if self.nil() {
            return Ok(None);
        }
        self.skip_spaces();
        if self.peek() != Some(b'(') {
            // a bare disposition type
            return Ok(Some(Disposition {
                kind: self.string()?.to_ascii_lowercase(),
                params: Params::default(),
            }));
        }
        self.expect(b'(')?;
        let kind = self.string()?.to_ascii_lowercase();
        let params = if self.at_close() {
            Params::default()
        } else {
            self.params()?
        };
        self.expect(b')')?;
        Ok(Some(Disposition { kind, params }))
    }

    fn language(&mut self) -> Result<Vec<String>> {
        self.skip_spaces();
        if self.peek() != Some(b'(') {
            return Ok(self.nstring()?.into_iter().collect());
        }
        self.expect(b'(')?;
        let mut langs = Vec::new();
        while !self.at_close() {
            langs.push(self.string()?);
        }
        self.expect(b')')?;
        Ok(langs)
    }

    fn address_list(&mut self) -> Result<Option<String>> {
        if self.nil() {
            return Ok(None);
        }
        self.expect(b'(')?;
        let mut addresses = Vec::new();
        while !self.at_close() {
            self.expect(b'(')?;
            let name = self.nstring()?;
            let adl = self.nstring()?;
            let mailbox = self.nstring()?;
            let host = self.nstring()?;
            self.expect(b')')?;
            // group start and end markers have no host
            if host.is_none() {
                continue;
            }
            addresses.push(Address {
                name: name.map(|n| decode_words(&n)),
                adl,
                mailbox,
                host,
            });
        }
        self.expect(b')')?;
        Ok(crate::types::body::render_addresses(&addresses))
    }

    fn envelope(&mut self) -> Result<Option<Envelope>> {
        if self.nil() {
            return Ok(None);
        }
        self.expect(b'(')?;
        let envelope = Envelope {
            date: self.nstring()?,
            subject: self.nstring()?.map(|s| decode_words(&s)),
            from: self.address_list()?,
            sender: self.address_list()?,
            reply_to: self.address_list()?,
            to: self.address_list()?,
            cc: self.address_list()?,
            bcc: self.address_list()?,
            in_reply_to: self.nstring()?,
            message_id: self.nstring()?,
        };
        if !self.at_close() {
            self.skip_to_close()?;
        }
        self.expect(b')')?;
        Ok(Some(envelope))
    }
}

/// Decode RFC 2047 encoded-words.
fn decode_words(s: &str) -> String {
    if !s.contains("=?") {
        return s.to_string();
    }
    let header = format!("X: {}", s);
    match mailparse::parse_header(header.as_bytes()) {
        Ok((header, _)) => header.get_value(),
        Err(_) => s.to_string(),
    }
}

struct Builder {
    nodes: Vec<BodyNode>,
}

impl Builder {
    fn body(&mut self, cur: &mut Cursor<'_>, parent: Option<NodeId>, depth: usize) -> Result<NodeId> {
        if depth > MAX_DEPTH {
            return Err(cur.error("body nesting too deep"));
        }
        cur.expect(b'(')?;
        let id = NodeId(self.nodes.len());
        self.nodes.push(BodyNode {
            parent,
            ..BodyNode::default()
        });
        cur.skip_spaces();
        if cur.peek() == Some(b'(') {
            self.multipart(cur, id, depth)?;
        } else {
            self.single(cur, id, depth)?;
        }
        cur.expect(b')')?;
        Ok(id)
    }

    fn multipart(&mut self, cur: &mut Cursor<'_>, id: NodeId, depth: usize) -> Result<()> {
        let mut children = Vec::new();
        loop {
            cur.skip_spaces();
            if cur.peek() != Some(b'(') {
                break;
            }
            children.push(self.body(cur, Some(id), depth + 1)?);
        }
        let subtype = cur.string()?.to_ascii_lowercase();
        let node = &mut self.nodes[id.0];
        node.content_type = "multipart".to_string();
        node.content_subtype = subtype;
        node.children = children;
        self.extensions(cur, id, true)
    }

    fn single(&mut self, cur: &mut Cursor<'_>, id: NodeId, depth: usize) -> Result<()> {
        let content_type = cur.string()?.to_ascii_lowercase();
        let content_subtype = cur.string()?.to_ascii_lowercase();
        let params = cur.params()?;
        let content_id = cur.nstring()?;
        let description = cur.nstring()?;
        let encoding = cur.nstring()?;
        let octets = cur.number()?;
        {
            let node = &mut self.nodes[id.0];
            node.content_type = content_type;
            node.content_subtype = content_subtype;
            node.params = params;
            node.id = content_id;
            node.description = description.map(|d| decode_words(&d));
            node.encoding = encoding;
            node.octets = octets;
        }
        if self.nodes[id.0].is_message() {
            let envelope = cur.envelope()?;
            let child = self.body(cur, Some(id), depth + 1)?;
            let lines = cur.number()?;
            let node = &mut self.nodes[id.0];
            node.envelope = envelope.map(Box::new);
            node.children = vec![child];
            node.lines = Some(lines);
        } else if self.nodes[id.0].content_type == "text" {
            self.nodes[id.0].lines = Some(cur.number()?);
        }
        self.extensions(cur, id, false)
    }

    // The optional trailing fields. On anything unexpected, skip to the end of the body.
    fn extensions(&mut self, cur: &mut Cursor<'_>, id: NodeId, multipart: bool) -> Result<()> {
        let mut field = 0;
        while !cur.at_close() {
            let start = cur.pos;
            let node = &mut self.nodes[id.0];
            let parsed = match (multipart, field) {
                (true, 0) => cur.params().map(|p| node.params = p),
                (false, 0) => cur.nstring().map(|m| node.md5 = m),
                (_, 1) => cur.disposition().map(|d| node.disposition = d),
                (_, 2) => cur.language().map(|l| node.language = l),
                (_, 3) => cur.nstring().map(|l| node.location = l),
                _ => {
                    cur.skip_to_close()?;
                    break;
                }
            };
            if let Err(e) = parsed {
                warn!("skipping unrecognized body extension data: {}", e);
                cur.seek(start);
                cur.skip_to_close()?;
                break;
            }
            field += 1;
        }
        Ok(())
    }

    fn assign_part_specs(&mut self, id: NodeId, spec: String) {
        let children = self.nodes[id.0].children.clone();
        let is_multipart = self.nodes[id.0].is_multipart();
        let is_message = self.nodes[id.0].is_message();
        self.nodes[id.0].part_spec = spec.clone();
        if is_multipart {
            for (i, child) in children.into_iter().enumerate() {
                let child_spec = if spec.is_empty() {
                    (i + 1).to_string()
                } else {
                    format!("{}.{}", spec, i + 1)
                };
                self.assign_part_specs(child, child_spec);
            }
        } else if is_message {
            for child in children {
                let child_spec = if self.nodes[child.0].is_multipart() {
                    spec.clone()
                } else {
                    format!("{}.1", spec)
                };
                self.assign_part_specs(child, child_spec);
            }
        }
    }
}

/// Parse a BODYSTRUCTURE list, starting at its opening parenthesis.
pub fn parse_bodystructure(input: &[u8]) -> Result<BodyStructure> {
    let mut cur = Cursor::new(input, "BODYSTRUCTURE");
    let mut builder = Builder { nodes: Vec::new() };
    let root = builder.body(&mut cur, None, 0)?;
    let root_spec = if builder.nodes[root.0].is_multipart() {
        String::new()
    } else {
        "1".to_string()
    };
    builder.assign_part_specs(root, root_spec);
    Ok(BodyStructure {
        nodes: builder.nodes,
    })
}

/// Parse an ENVELOPE list, starting at its opening parenthesis.
pub fn parse_envelope(input: &[u8]) -> Result<Envelope> {
    let mut cur = Cursor::new(input, "ENVELOPE");
    cur.skip_spaces();
    if cur.peek() != Some(b'(') {
        return Err(cur.error("expected '('"));
    }
    cur.envelope()?
        .ok_or_else(|| cur.error("expected an envelope"))
}

// The value of the attribute `name` in a FETCH unit. Only attribute names are compared, so the
// text of quoted strings, literals and other values never matches.
fn item<'a>(unit: &'a [u8], name: &str) -> Option<&'a [u8]> {
    let open = unit.iter().position(|&b| b == b'(')?;
    let mut cur = Cursor::new(unit, "FETCH");
    cur.seek(open + 1);
    loop {
        if cur.at_close() {
            return None;
        }
        let key = cur.pos;
        cur.skip_value().ok()?;
        let found = unit[key..cur.pos].eq_ignore_ascii_case(name.as_bytes());
        cur.skip_spaces();
        if found {
            return Some(&unit[cur.pos..]);
        }
        cur.skip_value().ok()?;
    }
}

/// The BODYSTRUCTURE item of a FETCH response unit, if it has one.
pub(crate) fn bodystructure_in_fetch(unit: &[u8]) -> Result<Option<BodyStructure>> {
    item(unit, "BODYSTRUCTURE")
        .map(parse_bodystructure)
        .transpose()
}

/// The ENVELOPE item of a FETCH response unit, if it has one.
pub(crate) fn envelope_in_fetch(unit: &[u8]) -> Result<Option<Envelope>> {
    item(unit, "ENVELOPE").map(parse_envelope).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIXED: &str = "((\"TEXT\" \"PLAIN\" (\"CHARSET\" \"US-ASCII\") NIL NIL \"7BIT\" 1152 23 NIL NIL NIL NIL)\
        (\"TEXT\" \"PLAIN\" (\"CHARSET\" \"US-ASCII\" \"NAME\" \"cc.diff\") \"<960723163407.20117h@cac.washington.edu>\" \
        \"Compiler diff\" \"BASE64\" 4554 73 NIL (\"ATTACHMENT\" (\"FILENAME\" \"cc.diff\")) NIL NIL) \
        \"MIXED\" (\"BOUNDARY\" \"----=_Part\") NIL NIL NIL)";

    #[test]
    fn items_are_found_by_attribute_name() {
        let unit = b"* 3 FETCH (UID 9 X-NOTE \"BODYSTRUCTURE (x\" \
            BODY[HEADER.FIELDS (SUBJECT)] {27}\r\nSubject: ENVELOPE (NIL)\r\n\r\n \
            BODYSTRUCTURE (\"TEXT\" \"PLAIN\" NIL NIL NIL \"7BIT\" 10 1) \
            ENVELOPE (NIL \"hi\" NIL NIL NIL NIL NIL NIL NIL NIL))\r\n";
        let structure = bodystructure_in_fetch(unit).unwrap().unwrap();
        assert_eq!(structure.node(structure.root()).mime_type(), "text/plain");
        let envelope = envelope_in_fetch(unit).unwrap().unwrap();
        assert_eq!(envelope.subject.as_deref(), Some("hi"));

        let decoy = b"* 1 FETCH (UID 2 X-NOTE \"ENVELOPE (NIL)\")\r\n";
        assert!(envelope_in_fetch(decoy).unwrap().is_none());
        assert!(bodystructure_in_fetch(b"* 1 FETCH (UID 2)\r\n").unwrap().is_none());
    }

    #[test]
    fn envelope_scenario() {
        let env = parse_envelope(
            b"(\"Tue\" NIL ((\"A\" NIL \"user\" \"host.com\")) NIL NIL NIL NIL NIL NIL \"<id@host>\")",
        )
        .unwrap();
        assert_eq!(env.from.as_deref(), Some("A <user@host.com>"));
        assert_eq!(env.date.as_deref(), Some("Tue"));
        assert_eq!(env.sender, None);
        assert_eq!(env.reply_to, None);
        assert_eq!(env.to, None);
        assert_eq!(env.cc, None);
        assert_eq!(env.bcc, None);
        assert_eq!(env.message_id.as_deref(), Some("<id@host>"));
    }

    #[test]
    fn envelope_address_lists() {
        let env = parse_envelope(
            b"(NIL \"=?utf-8?q?Gr=C3=BC=C3=9Fe?=\" NIL NIL NIL \
              ((NIL NIL \"team\" NIL)(\"Bob\" NIL \"bob\" \"b.org\")(NIL NIL \"carol\" \"c.org\")(NIL NIL NIL NIL)) \
              NIL NIL NIL NIL)",
        )
        .unwrap();
        assert_eq!(env.subject.as_deref(), Some("Grüße"));
        assert_eq!(env.to.as_deref(), Some("Bob <bob@b.org>, carol@c.org"));
        assert_eq!(env.from, None);
    }

    #[test]
    fn multipart_tree() {
        let bs = parse_bodystructure(MIXED.as_bytes()).unwrap();
        let root = bs.node(bs.root());
        assert!(root.is_multipart());
        assert_eq!(root.mime_type(), "multipart/mixed");
        assert_eq!(root.part_spec, "");
        assert_eq!(root.params.get("boundary"), Some("----=_Part"));

        let children: Vec<_> = bs.children(bs.root()).collect();
        assert_eq!(children.len(), 2);
        let text = bs.node(children[0]);
        assert_eq!(text.mime_type(), "text/plain");
        assert_eq!(text.part_spec, "1");
        assert_eq!(text.lines, Some(23));
        assert_eq!(text.octets, 1152);
        let attachment = bs.node(children[1]);
        assert_eq!(attachment.part_spec, "2");
        assert_eq!(attachment.encoding.as_deref(), Some("BASE64"));
        assert_eq!(attachment.description.as_deref(), Some("Compiler diff"));
        let disposition = attachment.disposition.as_ref().unwrap();
        assert_eq!(disposition.kind, "attachment");
        assert_eq!(disposition.params.get("filename"), Some("cc.diff"));
        assert_eq!(bs.parent(children[1]), Some(bs.root()));
        assert_eq!(bs.find("2"), Some(children[1]));
    }

    #[test]
    fn single_part_root_is_part_one() {
        let bs = parse_bodystructure(
            b"(\"TEXT\" \"PLAIN\" (\"CHARSET\" \"utf-8\") NIL NIL \"QUOTED-PRINTABLE\" 301 9)",
        )
        .unwrap();
        assert_eq!(bs.len(), 1);
        assert_eq!(bs.node(bs.root()).part_spec, "1");
        assert_eq!(bs.node(bs.root()).md5, None);
    }

    #[test]
    fn embedded_message_part_specs() {
        let input = "((\"TEXT\" \"PLAIN\" NIL NIL NIL \"7BIT\" 10 1)\
            (\"MESSAGE\" \"RFC822\" NIL NIL NIL \"7BIT\" 900 \
              (\"Mon, 1 Jan 2024 00:00:00 +0000\" \"fwd\" ((\"Eve\" NIL \"eve\" \"e.net\")) NIL NIL NIL NIL NIL NIL \"<m@e.net>\") \
              ((\"TEXT\" \"PLAIN\" NIL NIL NIL \"7BIT\" 20 2)(\"IMAGE\" \"PNG\" NIL NIL NIL \"BASE64\" 400) \"MIXED\") 40)\
            (\"MESSAGE\" \"RFC822\" NIL NIL NIL \"7BIT\" 50 NIL (\"TEXT\" \"PLAIN\" NIL NIL NIL \"7BIT\" 5 1) 3) \"MIXED\")";
        let bs = parse_bodystructure(input.as_bytes()).unwrap();
        let specs: Vec<(String, String)> = bs
            .iter()
            .map(|(_, n)| (n.mime_type(), n.part_spec.clone()))
            .collect();
        assert_eq!(
            specs,
            vec![
                ("multipart/mixed".to_string(), "".to_string()),
                ("text/plain".to_string(), "1".to_string()),
                ("message/rfc822".to_string(), "2".to_string()),
                ("multipart/mixed".to_string(), "2".to_string()),
                ("text/plain".to_string(), "2.1".to_string()),
                ("image/png".to_string(), "2.2".to_string()),
                ("message/rfc822".to_string(), "3".to_string()),
                ("text/plain".to_string(), "3.1".to_string()),
            ]
        );
        let message = bs.find("2").unwrap();
        assert!(bs.node(message).is_message());
        let env = bs.node(message).envelope.as_deref().unwrap();
        assert_eq!(env.from.as_deref(), Some("Eve <eve@e.net>"));
        assert_eq!(bs.node(message).lines, Some(40));
        assert!(bs.node(bs.find("3").unwrap()).envelope.is_none());
    }

    #[test]
    fn reserialized_tree_parses_to_the_same_tree() {
        let bs = parse_bodystructure(MIXED.as_bytes()).unwrap();
        let again = parse_bodystructure(bs.to_string().as_bytes()).unwrap();
        assert_eq!(again, bs);

        let input = "(\"MESSAGE\" \"RFC822\" NIL NIL NIL \"7BIT\" 900 \
              (\"date\" \"subj\" ((\"Eve\" NIL \"eve\" \"e.net\")) NIL NIL ((NIL NIL \"a\" \"b.c\")) NIL NIL NIL \"<m@e.net>\") \
              (\"TEXT\" \"HTML\" (\"CHARSET\" \"utf-8\") NIL NIL \"8BIT\" 20 2 NIL (\"INLINE\" NIL) \"en\" NIL) 40)";
        let bs = parse_bodystructure(input.as_bytes()).unwrap();
        let again = parse_bodystructure(bs.to_string().as_bytes()).unwrap();
        assert_eq!(again, bs);
    }

    #[test]
    fn unknown_extensions_are_skipped() {
        let input = b"(\"TEXT\" \"PLAIN\" NIL NIL NIL \"7BIT\" 10 1 NIL NIL NIL NIL (\"X-VENDOR\" (1 2 \"(\")) 42)";
        let bs = parse_bodystructure(input).unwrap();
        assert_eq!(bs.node(bs.root()).lines, Some(1));

        // a disposition that is not a disposition
        let input = b"((\"TEXT\" \"PLAIN\" NIL NIL NIL \"7BIT\" 10 1 NIL (1 2 3) NIL) \"ALTERNATIVE\")";
        let bs = parse_bodystructure(input).unwrap();
        let child = bs.children(bs.root()).next().unwrap();
        assert_eq!(bs.node(child).disposition, None);
        assert_eq!(bs.node(bs.root()).content_subtype, "alternative");
    }

    #[test]
    fn literal_strings() {
        let input = b"(\"TEXT\" \"PLAIN\" (\"NAME\" {9}\r\nfile name) NIL NIL \"7BIT\" 10 1)";
        let bs = parse_bodystructure(input).unwrap();
        assert_eq!(bs.node(bs.root()).params.get("name"), Some("file name"));
    }

    #[test]
    fn errors_carry_the_offset() {
        match parse_bodystructure(b"(\"TEXT\" \"PLAIN\" NIL NIL NIL \"7BIT\" lots 1)") {
            Err(Error::Parse(ParseError::BodyStructure { what, offset, .. })) => {
                assert_eq!(what, "BODYSTRUCTURE");
                assert_eq!(offset, 35);
            }
            other => panic!("unexpected result: {:?}", other),
        }
        match parse_bodystructure(b"\"TEXT\"") {
            Err(Error::Parse(ParseError::BodyStructure { offset, reason, .. })) => {
                assert_eq!(offset, 0);
                assert_eq!(reason, "expected '('");
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(parse_bodystructure(b"(\"TEXT\" \"PLAIN\" NIL NIL NIL \"7BIT\" 10 1").is_err());
    }

    #[test]
    fn located_in_fetch_units() {
        let unit = format!("* 3 FETCH (UID 7 BODYSTRUCTURE {})\r\n", MIXED);
        let bs = bodystructure_in_fetch(unit.as_bytes()).unwrap().unwrap();
        assert_eq!(bs.len(), 3);
        assert!(envelope_in_fetch(unit.as_bytes()).unwrap().is_none());

        let unit = b"* 3 FETCH (UID 7 ENVELOPE (NIL \"hi\" NIL NIL NIL NIL NIL NIL NIL NIL))\r\n";
        let env = envelope_in_fetch(unit).unwrap().unwrap();
        assert_eq!(env.subject.as_deref(), Some("hi"));
    }
}
