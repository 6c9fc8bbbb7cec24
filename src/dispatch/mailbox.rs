//! Single-slot mailbox with overwrite-on-full semantics.

use std::sync::Mutex;

use tokio::sync::Notify;

use super::action::Action;

/// Holds at most one pending [`Action`].
///
/// `put` on an occupied slot replaces the content; the previous action is
/// dropped without telling its producer. Only the dispatcher touches this.
#[derive(Debug, Default)]
pub struct Mailbox {
    slot: Mutex<Option<Action>>,
    ready: Notify,
}

impl Mailbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `action`, returning the superseded one if the slot was full.
    pub fn put(&self, action: Action) -> Option<Action> {
        let previous = self
            .slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .replace(action);
        // notify_one keeps a permit when nobody is waiting, so a put that lands
        // between a failed take() and wait() is never missed.
        self.ready.notify_one();
        previous
    }

    /// Remove the pending action, if any.
    pub fn take(&self) -> Option<Action> {
        self.slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }

    pub fn is_empty(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .is_none()
    }

    /// Suspend until a `put` has happened since the last wakeup.
    ///
    /// Cancel-safe: dropping the future leaves the slot untouched.
    pub async fn wait(&self) {
        if !self.is_empty() {
            return;
        }
        self.ready.notified().await;
    }
}
