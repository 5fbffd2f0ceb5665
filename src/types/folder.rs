/// A folder returned by a [`LIST`](https://tools.ietf.org/html/rfc3501#section-6.3.8) command.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
#[non_exhaustive]
pub struct FolderInfo {
    /// The `/`-separated path of the folder, with the personal namespace prefix removed. This is
    /// what [`Session::select`](crate::Session::select) takes.
    pub path: String,

    /// The name the server knows the folder by, decoded from modified UTF-7.
    pub name: String,

    /// The hierarchy delimiter, or `None` for a flat name.
    pub delimiter: Option<char>,

    /// Attributes of this folder.
    pub attributes: Vec<FolderAttribute>,
}

impl FolderInfo {
    /// Whether the folder can be opened with `SELECT`.
    pub fn is_selectable(&self) -> bool {
        !self
            .attributes
            .iter()
            .any(|a| matches!(a, FolderAttribute::NoSelect | FolderAttribute::NonExistent))
    }
}

/// An attribute set for a folder.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
#[non_exhaustive]
pub enum FolderAttribute {
    /// It is not possible for any child levels of hierarchy to exist
    /// under this name; no child levels exist now and none can be
    /// created in the future.
    NoInferiors,

    /// It is not possible to use this name as a selectable mailbox.
    NoSelect,

    /// The folder does not exist; it is listed because a child does.
    NonExistent,

    /// The mailbox has been marked "interesting" by the server; the
    /// mailbox probably contains messages that have been added since
    /// the last time the mailbox was selected.
    Marked,

    /// The mailbox does not contain any additional messages since the
    /// last time the mailbox was selected.
    Unmarked,

    /// The folder has child folders.
    HasChildren,

    /// The folder has no child folders.
    HasNoChildren,

    /// A non-standard user- or server-defined name attribute.
    Custom(String),
}

impl From<&str> for FolderAttribute {
    fn from(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "\\noinferiors" => FolderAttribute::NoInferiors,
            "\\noselect" => FolderAttribute::NoSelect,
            "\\nonexistent" => FolderAttribute::NonExistent,
            "\\marked" => FolderAttribute::Marked,
            "\\unmarked" => FolderAttribute::Unmarked,
            "\\haschildren" => FolderAttribute::HasChildren,
            "\\hasnochildren" => FolderAttribute::HasNoChildren,
            _ => FolderAttribute::Custom(s.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attributes_ignore_case() {
        assert_eq!(FolderAttribute::from("\\NoSelect"), FolderAttribute::NoSelect);
        assert_eq!(FolderAttribute::from("\\HasNoChildren"), FolderAttribute::HasNoChildren);
        assert_eq!(
            FolderAttribute::from("\\Archive"),
            FolderAttribute::Custom("\\Archive".to_string())
        );
    }

    #[test]
    fn noselect_folders_cannot_be_opened() {
        let mut folder = FolderInfo {
            path: "Lists".to_string(),
            name: "Lists".to_string(),
            delimiter: Some('/'),
            attributes: vec![FolderAttribute::HasChildren],
        };
        assert!(folder.is_selectable());
        folder.attributes.push(FolderAttribute::NoSelect);
        assert!(!folder.is_selectable());
    }
}
