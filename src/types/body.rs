use std::fmt::{self, Write};

/// Index of a node within a [`BodyStructure`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

/// MIME parameters in the order the server sent them. Lookups ignore the case of the name.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Params(Vec<(String, String)>);

impl Params {
    /// Look up a parameter value by name, ignoring case.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Iterate over `(name, value)` pairs in wire order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of parameters.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no parameters.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub(crate) fn push(&mut self, name: String, value: String) {
        self.0.push((name, value));
    }
}

/// A `Content-Disposition`: its type (`inline`, `attachment`, ...) and parameters.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Disposition {
    /// The disposition type.
    pub kind: String,
    /// The disposition parameters.
    pub params: Params,
}

/// One entry of an ENVELOPE address list.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Address {
    /// Display name, with encoded-words decoded.
    pub name: Option<String>,
    /// Source route (obsolete).
    pub adl: Option<String>,
    /// Local part.
    pub mailbox: Option<String>,
    /// Domain.
    pub host: Option<String>,
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mailbox = self.mailbox.as_deref().unwrap_or("");
        let addr = match self.host.as_deref() {
            Some(host) => format!("{}@{}", mailbox, host),
            None => mailbox.to_string(),
        };
        match self.name.as_deref() {
            Some(name) if !name.is_empty() => write!(f, "{} <{}>", name, addr),
            _ => f.write_str(&addr),
        }
    }
}

impl Address {
    /// Split a rendered `name <mailbox@host>` (or bare `mailbox@host`) back into its parts.
    fn from_display(s: &str) -> Address {
        let s = s.trim();
        let (name, addr) = match (s.rfind('<'), s.ends_with('>')) {
            (Some(open), true) => {
                let name = s[..open].trim();
                (
                    Some(name.to_string()).filter(|n| !n.is_empty()),
                    &s[open + 1..s.len() - 1],
                )
            }
            _ => (None, s),
        };
        let (mailbox, host) = match addr.rfind('@') {
            Some(at) => (addr[..at].to_string(), Some(addr[at + 1..].to_string())),
            None => (addr.to_string(), None),
        };
        Address {
            name,
            adl: None,
            mailbox: Some(mailbox),
            host,
        }
    }
}

/// The ENVELOPE of a message: ten optional decoded fields. Address lists are rendered as
/// `name <mailbox@host>` joined by `, `.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Envelope {
    /// `Date`
    pub date: Option<String>,
    /// `Subject`
    pub subject: Option<String>,
    /// `From`
    pub from: Option<String>,
    /// `Sender`
    pub sender: Option<String>,
    /// `Reply-To`
    pub reply_to: Option<String>,
    /// `To`
    pub to: Option<String>,
    /// `Cc`
    pub cc: Option<String>,
    /// `Bcc`
    pub bcc: Option<String>,
    /// `In-Reply-To`
    pub in_reply_to: Option<String>,
    /// `Message-ID`
    pub message_id: Option<String>,
}

/// Render an address list the way [`Envelope`] stores it.
pub(crate) fn render_addresses(addresses: &[Address]) -> Option<String> {
    if addresses.is_empty() {
        return None;
    }
    Some(crate::utils::iter_join(addresses, ", "))
}

/// One MIME part of a [`BodyStructure`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BodyNode {
    /// Lower-cased media type, e.g. `text` or `multipart`.
    pub content_type: String,
    /// Lower-cased media subtype, e.g. `plain` or `mixed`.
    pub content_subtype: String,
    /// `Content-Type` parameters.
    pub params: Params,
    /// `Content-ID`
    pub id: Option<String>,
    /// `Content-Description`
    pub description: Option<String>,
    /// `Content-Transfer-Encoding`
    pub encoding: Option<String>,
    /// Size of the body in octets, in its transfer encoding.
    pub octets: u32,
    /// Size in text lines, for `text/*` and `message/rfc822` parts.
    pub lines: Option<u32>,
    /// `Content-MD5`
    pub md5: Option<String>,
    /// `Content-Disposition`
    pub disposition: Option<Disposition>,
    /// `Content-Language`
    pub language: Vec<String>,
    /// `Content-Location`
    pub location: Option<String>,
    /// The IMAP section specifier that fetches this part, e.g. `2.1`. Empty for a multipart root.
    pub part_spec: String,
    /// The envelope of an embedded `message/rfc822`.
    pub envelope: Option<Box<Envelope>>,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
}

impl BodyNode {
    /// Whether this is a `multipart/*` node.
    pub fn is_multipart(&self) -> bool {
        self.content_type.eq_ignore_ascii_case("multipart")
    }

    /// Whether this is a `message/rfc822` node.
    pub fn is_message(&self) -> bool {
        self.content_type.eq_ignore_ascii_case("message")
            && self.content_subtype.eq_ignore_ascii_case("rfc822")
    }

    /// The `type/subtype` pair.
    pub fn mime_type(&self) -> String {
        format!("{}/{}", self.content_type, self.content_subtype)
    }
}

/// A parsed BODYSTRUCTURE.
///
/// Nodes are stored in one vector in document order, with the root first. Each node names its
/// children and its parent by [`NodeId`]; dropping the structure drops every node at once.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BodyStructure {
    pub(crate) nodes: Vec<BodyNode>,
}

impl BodyStructure {
    /// The outermost part.
    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    /// Borrow a node.
    ///
    /// # Panics
    ///
    /// If `id` did not come from this structure.
    pub fn node(&self, id: NodeId) -> &BodyNode {
        &self.nodes[id.0]
    }

    /// Borrow a node, if `id` is in range.
    pub fn get(&self, id: NodeId) -> Option<&BodyNode> {
        self.nodes.get(id.0)
    }

    /// The children of a multipart node, or the single embedded body of a `message/rfc822`.
    pub fn children(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes[id.0].children.iter().copied()
    }

    /// The node that contains `id`.
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(id.0).and_then(|n| n.parent)
    }

    /// Find the part addressed by an IMAP section specifier.
    ///
    /// A `message/rfc822` part and its multipart body share a specifier; the message part is
    /// returned.
    pub fn find(&self, part_spec: &str) -> Option<NodeId> {
        self.iter()
            .find(|(_, node)| node.part_spec == part_spec)
            .map(|(id, _)| id)
    }

    /// Iterate over every node in document order.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &BodyNode)> {
        self.nodes.iter().enumerate().map(|(i, n)| (NodeId(i), n))
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the structure is empty. Only a default-constructed structure is.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn write_node(&self, id: NodeId, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let node = self.node(id);
        f.write_char('(')?;
        if node.is_multipart() {
            for child in self.children(id) {
                self.write_node(child, f)?;
            }
            f.write_char(' ')?;
            write_nstring(f, Some(&node.content_subtype))?;
        } else {
            write_nstring(f, Some(&node.content_type))?;
            f.write_char(' ')?;
            write_nstring(f, Some(&node.content_subtype))?;
            f.write_char(' ')?;
            write_params(f, &node.params)?;
            f.write_char(' ')?;
            write_nstring(f, node.id.as_deref())?;
            f.write_char(' ')?;
            write_nstring(f, node.description.as_deref())?;
            f.write_char(' ')?;
            write_nstring(f, node.encoding.as_deref())?;
            write!(f, " {}", node.octets)?;
            if node.is_message() {
                f.write_char(' ')?;
                match node.envelope.as_deref() {
                    Some(env) => write_envelope(f, env)?,
                    None => f.write_str("NIL")?,
                }
                f.write_char(' ')?;
                if let Some(child) = node.children.first() {
                    self.write_node(*child, f)?;
                }
            }
            if let Some(lines) = node.lines {
                write!(f, " {}", lines)?;
            }
            f.write_char(' ')?;
            write_nstring(f, node.md5.as_deref())?;
        }
        if node.is_multipart() {
            f.write_char(' ')?;
            write_params(f, &node.params)?;
        }
        f.write_char(' ')?;
        match &node.disposition {
            Some(d) => {
                f.write_char('(')?;
                write_nstring(f, Some(&d.kind))?;
                f.write_char(' ')?;
                write_params(f, &d.params)?;
                f.write_char(')')?;
            }
            None => f.write_str("NIL")?,
        }
        f.write_char(' ')?;
        if node.language.is_empty() {
            f.write_str("NIL")?;
        } else {
            f.write_char('(')?;
            for (i, lang) in node.language.iter().enumerate() {
                if i > 0 {
                    f.write_char(' ')?;
                }
                write_nstring(f, Some(lang))?;
            }
            f.write_char(')')?;
        }
        f.write_char(' ')?;
        write_nstring(f, node.location.as_deref())?;
        f.write_char(')')
    }
}

/// Re-serializes the structure in BODYSTRUCTURE syntax, with every extension field present.
impl fmt::Display for BodyStructure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.nodes.is_empty() {
            return f.write_str("NIL");
        }
        self.write_node(self.root(), f)
    }
}

/// Re-serializes the envelope in ENVELOPE syntax.
impl fmt::Display for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_envelope(f, self)
    }
}

fn write_nstring(f: &mut fmt::Formatter<'_>, s: Option<&str>) -> fmt::Result {
    match s {
        None => f.write_str("NIL"),
        Some(s) => {
            f.write_char('"')?;
            for c in s.chars() {
                if c == '"' || c == '\\' {
                    f.write_char('\\')?;
                }
                f.write_char(c)?;
            }
            f.write_char('"')
        }
    }
}

fn write_params(f: &mut fmt::Formatter<'_>, params: &Params) -> fmt::Result {
    if params.is_empty() {
        return f.write_str("NIL");
    }
    f.write_char('(')?;
    for (i, (k, v)) in params.iter().enumerate() {
        if i > 0 {
            f.write_char(' ')?;
        }
        write_nstring(f, Some(k))?;
        f.write_char(' ')?;
        write_nstring(f, Some(v))?;
    }
    f.write_char(')')
}

fn write_addresses(f: &mut fmt::Formatter<'_>, rendered: Option<&str>) -> fmt::Result {
    let rendered = match rendered {
        Some(r) if !r.is_empty() => r,
        _ => return f.write_str("NIL"),
    };
    f.write_char('(')?;
    for part in rendered.split(", ") {
        let addr = Address::from_display(part);
        f.write_char('(')?;
        write_nstring(f, addr.name.as_deref())?;
        f.write_str(" NIL ")?;
        write_nstring(f, addr.mailbox.as_deref())?;
        f.write_char(' ')?;
        write_nstring(f, addr.host.as_deref())?;
        f.write_char(')')?;
    }
    f.write_char(')')
}

fn write_envelope(f: &mut fmt::Formatter<'_>, env: &Envelope) -> fmt::Result {
    f.write_char('(')?;
    write_nstring(f, env.date.as_deref())?;
    f.write_char(' ')?;
    write_nstring(f, env.subject.as_deref())?;
    for list in [
        &env.from,
        &env.sender,
        &env.reply_to,
        &env.to,
        &env.cc,
        &env.bcc,
    ] {
        f.write_char(' ')?;
        write_addresses(f, list.as_deref())?;
    }
    f.write_char(' ')?;
    write_nstring(f, env.in_reply_to.as_deref())?;
    f.write_char(' ')?;
    write_nstring(f, env.message_id.as_deref())?;
    f.write_char(')')
}
