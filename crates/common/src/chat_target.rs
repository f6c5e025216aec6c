//! The real chat endpoint, recovered once from the bootstrap config and
//! handed from the Config Interceptor to the Chat Interceptor.
//!
//! Modeled as a write-once cell with cooperative polling rather than a
//! named event on an emitter: it is simpler to reason about and makes
//! "written at most once" a structural guarantee rather than a
//! convention callers must honor.

use std::{sync::Mutex, time::Duration};

use serde::{Deserialize, Serialize};

/// `{ host, port }` of the real chat server, as recovered from the
/// bootstrap config's `chat.host` / `chat.port` fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTarget {
    pub host: String,
    pub port: u16,
}

/// How often [`ChatTargetCell::wait`] re-checks for a value instead of
/// relying solely on the wakeup notification. The game client has been
/// observed to write its first bytes before the bootstrap config fetch
/// completes in rare orderings, so held connections poll rather than
/// trust the notification alone.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A cell that can be written at most once and awaited cheaply by many
/// holders (each accepted chat connection waits on the same cell).
#[derive(Default)]
pub struct ChatTargetCell {
    slot: Mutex<Option<ChatTarget>>,
    notify: tokio::sync::Notify,
}

impl ChatTargetCell {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the target if it has not already been set. Returns `true`
    /// if this call performed the write, `false` if a value was already
    /// present — the chat target is resolved at most once per process.
    pub fn set(&self, target: ChatTarget) -> bool {
        let mut slot = self.slot.lock().unwrap_or_else(|poison| poison.into_inner());
        if slot.is_some() {
            return false;
        }
        *slot = Some(target);
        drop(slot);
        self.notify.notify_waiters();
        true
    }

    /// Non-blocking read of the current value, if any.
    #[must_use]
    pub fn get(&self) -> Option<ChatTarget> {
        self.slot.lock().unwrap_or_else(|poison| poison.into_inner()).clone()
    }

    /// Waits until a value is set, polling at [`POLL_INTERVAL`] in case a
    /// notification is missed by a waiter that subscribed just after
    /// `notify_waiters` fired.
    pub async fn wait(&self) -> ChatTarget {
        loop {
            if let Some(target) = self.get() {
                return target;
            }
            let notified = self.notify.notified();
            tokio::select! {
                () = notified => {},
                () = tokio::time::sleep(POLL_INTERVAL) => {},
            }
        }
    }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_is_write_once() {
        let cell = ChatTargetCell::new();
        assert!(cell.set(ChatTarget { host: "a".into(), port: 1 }));
        assert!(!cell.set(ChatTarget { host: "b".into(), port: 2 }));
        assert_eq!(cell.get().unwrap().host, "a");
    }

    #[tokio::test]
    async fn wait_resolves_after_set() {
        let cell = std::sync::Arc::new(ChatTargetCell::new());
        let waiter = {
            let cell = cell.clone();
            tokio::spawn(async move { cell.wait().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        cell.set(ChatTarget { host: "chat.example".into(), port: 5223 });
        let target = waiter.await.unwrap();
        assert_eq!(target, ChatTarget { host: "chat.example".into(), port: 5223 });
    }
}
