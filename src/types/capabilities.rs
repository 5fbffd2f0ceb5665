use enumset::{EnumSet, EnumSetType};
use std::collections::BTreeSet;

/// An extension the engine knows how to make use of (or must know to avoid).
#[derive(Debug, Hash, EnumSetType)]
pub enum Capability {
    /// `IMAP4`
    Imap4,
    /// `IMAP4rev1`
    Imap4rev1,
    /// `STATUS`
    Status,
    /// `NAMESPACE`, [RFC 2342](https://tools.ietf.org/html/rfc2342).
    Namespace,
    /// `UIDPLUS`, [RFC 4315](https://tools.ietf.org/html/rfc4315).
    UidPlus,
    /// `LITERAL+`, [RFC 2088](https://tools.ietf.org/html/rfc2088): non-synchronizing literals.
    LiteralPlus,
    /// `STARTTLS`
    StartTls,
    /// `LOGINDISABLED`: the `LOGIN` command must not be used.
    LoginDisabled,
    /// `CONDSTORE`, [RFC 4551](https://tools.ietf.org/html/rfc4551).
    Condstore,
    /// `IDLE`, [RFC 2177](https://tools.ietf.org/html/rfc2177).
    Idle,
    /// `BINARY`, [RFC 3516](https://tools.ietf.org/html/rfc3516).
    Binary,
    /// `QRESYNC`, [RFC 5162](https://tools.ietf.org/html/rfc5162).
    Qresync,
    /// `ENABLE`, [RFC 5161](https://tools.ietf.org/html/rfc5161).
    Enable,
    /// `ESEARCH`
    Esearch,
    /// `CONVERT`
    Convert,
    /// `LIST-EXTENDED`
    ListExtended,
    /// `COMPRESS=DEFLATE`
    CompressDeflate,
    /// `XGWEXTENSIONS`
    XgwExtensions,
    /// `XGWMOVE`
    XgwMove,
}

impl Capability {
    /// Map a capability atom to a known capability, ignoring case.
    pub fn from_atom(atom: &str) -> Option<Capability> {
        let cap = match atom.to_ascii_uppercase().as_str() {
            "IMAP4" => Capability::Imap4,
            "IMAP4REV1" => Capability::Imap4rev1,
            "STATUS" => Capability::Status,
            "NAMESPACE" => Capability::Namespace,
            "UIDPLUS" => Capability::UidPlus,
            "LITERAL+" => Capability::LiteralPlus,
            "STARTTLS" => Capability::StartTls,
            "LOGINDISABLED" => Capability::LoginDisabled,
            "CONDSTORE" => Capability::Condstore,
            "IDLE" => Capability::Idle,
            "BINARY" => Capability::Binary,
            "QRESYNC" => Capability::Qresync,
            "ENABLE" => Capability::Enable,
            "ESEARCH" => Capability::Esearch,
            "CONVERT" => Capability::Convert,
            "LIST-EXTENDED" => Capability::ListExtended,
            "COMPRESS=DEFLATE" => Capability::CompressDeflate,
            "XGWEXTENSIONS" => Capability::XgwExtensions,
            "XGWMOVE" => Capability::XgwMove,
            _ => return None,
        };
        Some(cap)
    }

    /// The atom a server advertises this capability as.
    pub fn atom(self) -> &'static str {
        match self {
            Capability::Imap4 => "IMAP4",
            Capability::Imap4rev1 => "IMAP4REV1",
            Capability::Status => "STATUS",
            Capability::Namespace => "NAMESPACE",
            Capability::UidPlus => "UIDPLUS",
            Capability::LiteralPlus => "LITERAL+",
            Capability::StartTls => "STARTTLS",
            Capability::LoginDisabled => "LOGINDISABLED",
            Capability::Condstore => "CONDSTORE",
            Capability::Idle => "IDLE",
            Capability::Binary => "BINARY",
            Capability::Qresync => "QRESYNC",
            Capability::Enable => "ENABLE",
            Capability::Esearch => "ESEARCH",
            Capability::Convert => "CONVERT",
            Capability::ListExtended => "LIST-EXTENDED",
            Capability::CompressDeflate => "COMPRESS=DEFLATE",
            Capability::XgwExtensions => "XGWEXTENSIONS",
            Capability::XgwMove => "XGWMOVE",
        }
    }
}

/// From [section 7.2.1 of RFC 3501](https://tools.ietf.org/html/rfc3501#section-7.2.1).
///
/// The capabilities a server advertised. The extensions the engine acts upon are kept as a
/// bitset; every advertised atom is also kept verbatim (upper-cased) so that `AUTH=`
/// mechanisms and unknown extensions can still be queried.
///
/// A capability name which begins with `AUTH=` indicates that the server supports that particular
/// authentication mechanism.
///
/// Client implementations SHOULD NOT require any capability name other than `IMAP4rev1`, and MUST
/// ignore any unknown capability names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities {
    known: EnumSet<Capability>,
    atoms: BTreeSet<String>,
}

impl Capabilities {
    /// Build a capability set from the atoms a server advertised.
    pub fn from_atoms<S: AsRef<str>>(atoms: impl IntoIterator<Item = S>) -> Self {
        let mut caps = Capabilities::default();
        for atom in atoms {
            let atom = atom.as_ref();
            if let Some(cap) = Capability::from_atom(atom) {
                caps.known.insert(cap);
            }
            caps.atoms.insert(atom.to_ascii_uppercase());
        }
        caps
    }

    /// Check if the server has the given capability.
    pub fn has(&self, cap: Capability) -> bool {
        self.known.contains(cap)
    }

    /// Stop relying on an extension the server advertised but does not honour.
    pub(crate) fn remove(&mut self, cap: Capability) {
        self.known.remove(cap);
        self.atoms.remove(cap.atom());
    }

    /// Check if the server advertised the given atom, ignoring case.
    pub fn has_str(&self, atom: &str) -> bool {
        self.atoms.contains(&atom.to_ascii_uppercase())
    }

    /// Whether the server accepts the given `AUTHENTICATE` mechanism.
    pub fn has_auth(&self, mechanism: &str) -> bool {
        self.has_str(&format!("AUTH={}", mechanism))
    }

    /// The known extensions as a bitset.
    pub fn known(&self) -> EnumSet<Capability> {
        self.known
    }

    /// Iterate over all the server's capability atoms.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.atoms.iter().map(String::as_str)
    }

    /// Returns how many capabilities the server has.
    pub fn len(&self) -> usize {
        self.atoms.len()
    }

    /// Returns true if the server purports to have no capabilities.
    pub fn is_empty(&self) -> bool {
        self.atoms.is_empty()
    }
}

impl FromIterator<Capability> for Capabilities {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        let mut caps = Capabilities::default();
        for cap in iter {
            caps.known.insert(cap);
            caps.atoms.insert(cap.atom().to_string());
        }
        caps
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_atoms() {
        let caps = Capabilities::from_atoms([
            "IMAP4rev1",
            "LITERAL+",
            "condstore",
            "AUTH=PLAIN",
            "X-UNKNOWN",
        ]);
        assert!(caps.has(Capability::Imap4rev1));
        assert!(caps.has(Capability::LiteralPlus));
        assert!(caps.has(Capability::Condstore));
        assert!(!caps.has(Capability::Qresync));
        assert!(caps.has_auth("plain"));
        assert!(caps.has_str("x-unknown"));
        assert_eq!(caps.len(), 5);
    }
}
