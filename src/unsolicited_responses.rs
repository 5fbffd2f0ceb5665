use enumset::EnumSet;
use std::sync::mpsc;

use super::types::{Notification, NotificationCategory};

/// The sending half of a session's notification channel, with a category filter.
///
/// A send never fails: once the receiving side has been dropped, notifications are discarded.
#[derive(Debug, Clone)]
pub(crate) struct NotificationSender {
    sender: mpsc::Sender<Notification>,
    allow: EnumSet<NotificationCategory>,
}

impl NotificationSender {
    pub(crate) fn new(sender: mpsc::Sender<Notification>) -> NotificationSender {
        NotificationSender {
            sender,
            allow: EnumSet::all(),
        }
    }

    /// A sender whose notifications go nowhere.
    pub(crate) fn detached() -> NotificationSender {
        let (sender, _) = mpsc::channel();
        NotificationSender::new(sender)
    }

    // Check if the user wants the specified notification.
    fn filter(&self, n: &Notification) -> bool {
        self.allow.contains(n.category())
    }

    // Set the new filter mask, and remove unwanted notifications from the current queue.
    pub(crate) fn request(
        &mut self,
        rcv: &mpsc::Receiver<Notification>,
        mask: EnumSet<NotificationCategory>,
    ) {
        self.allow = mask;
        let keep: Vec<_> = rcv.try_iter().filter(|n| self.filter(n)).collect();
        for n in keep {
            let _ = self.sender.send(n);
        }
    }

    pub(crate) fn send(&self, n: Notification) {
        if self.filter(&n) {
            // the receiver lives in the Session; if it is gone nobody is listening
            let _ = self.sender.send(n);
        }
    }
}
