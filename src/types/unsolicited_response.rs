use enumset::EnumSetType;

use crate::reconcile::SyncReport;

/// Events a [`Session`](crate::Session) reports outside the result of the call that caused them.
///
/// [RFC 3501](https://tools.ietf.org/html/rfc3501#section-7) states that clients need to be able
/// to accept any response at any time; the engine folds the ones that matter into these events
/// and delivers them over [`Session::notifications`](crate::Session::notifications).
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Notification {
    /// A `[ALERT]` response code. The text must be shown to the user.
    Alert(String),

    /// The selected folder changed while the engine was idling or polling, and the summary was
    /// brought up to date.
    FolderChanged {
        /// The folder, as the caller named it.
        folder: String,
        /// What the reconciler did.
        report: SyncReport,
    },

    /// The server sent an unsolicited `BYE` and closed the connection.
    Bye(String),

    /// The session re-established its connection after a transport failure.
    Reconnected,
}

/// The kind of a [`Notification`], for filtering.
#[derive(Debug, Hash, EnumSetType)]
pub enum NotificationCategory {
    /// [`Notification::Alert`]
    Alert,
    /// [`Notification::FolderChanged`]
    FolderChanged,
    /// [`Notification::Bye`]
    Bye,
    /// [`Notification::Reconnected`]
    Reconnected,
}

impl Notification {
    /// The category this notification is filtered by.
    pub fn category(&self) -> NotificationCategory {
        match self {
            Notification::Alert(_) => NotificationCategory::Alert,
            Notification::FolderChanged { .. } => NotificationCategory::FolderChanged,
            Notification::Bye(_) => NotificationCategory::Bye,
            Notification::Reconnected => NotificationCategory::Reconnected,
        }
    }
}
