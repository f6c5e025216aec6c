//! The session supervisor: owns the global mode/enabled/connect-to-MUC
//! state, fans status changes out to every active `ProxiedConnection`,
//! runs the one-shot introduction sequence and the idle-shutdown timer,
//! and handles graceful shutdown.

pub mod error;

use std::{
    collections::HashMap,
    sync::{
        Arc, RwLock,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use deceive_common::PresenceMode;
use deceive_presence::{ManagedConnection, SupervisorHandle};
use tokio::{sync::Mutex, task::JoinHandle};
use tracing::{info, warn};

pub use error::{Error, Result};

/// Delay before the one-shot introduction sequence fires, measured from
/// the first `ProxiedConnection` ever registered.
const INTRO_DELAY: Duration = Duration::from_secs(10);
/// Minimum gap enforced between consecutive intro messages.
const INTRO_MESSAGE_GAP: Duration = Duration::from_millis(200);
/// How long the connection set may sit empty before the process exits.
const IDLE_SHUTDOWN: Duration = Duration::from_secs(60);

const INTRO_LINES: [&str; 4] = [
    "Welcome! Deceive is running and you are currently appearing {label}. \
     Despite what the game client may indicate, you are appearing offline \
     to your friends unless you manually disable Deceive.",
    "If you want to invite others while being offline, you may need to \
     disable Deceive for them to accept. You can enable Deceive again as \
     soon as they are in your lobby.",
    "To enable or disable Deceive, or to configure other settings, find \
     Deceive in your tray icons.",
    "Have fun!",
];

fn label_for(mode: PresenceMode) -> &'static str {
    match mode {
        PresenceMode::Online => "online",
        other => other.wire_token(),
    }
}

struct State {
    connections: HashMap<u64, Arc<dyn ManagedConnection>>,
    idle_timer: Option<JoinHandle<()>>,
}

/// The Session Supervisor. Always held behind an `Arc` so it can hand
/// itself to `ProxiedConnection`s as a `SupervisorHandle` and spawn
/// tasks (intro sequence, idle shutdown) that outlive the call that
/// triggered them.
pub struct Supervisor {
    mode: RwLock<PresenceMode>,
    enabled: AtomicBool,
    connect_to_muc: AtomicBool,
    next_id: AtomicU64,
    intro_sent: AtomicBool,
    stopped: AtomicBool,
    state: Mutex<State>,
    // Serializes set_mode / toggle_enabled / handle_chat_to_fake so a
    // broadcast always observes a consistent mode/enabled pair.
    command_lock: Mutex<()>,
    shutdown: tokio::sync::Notify,
}

impl Supervisor {
    #[must_use]
    pub fn new(mode: PresenceMode, enabled: bool, connect_to_muc: bool) -> Arc<Self> {
        Arc::new(Self {
            mode: RwLock::new(mode),
            enabled: AtomicBool::new(enabled),
            connect_to_muc: AtomicBool::new(connect_to_muc),
            next_id: AtomicU64::new(0),
            intro_sent: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            state: Mutex::new(State { connections: HashMap::new(), idle_timer: None }),
            command_lock: Mutex::new(()),
            shutdown: tokio::sync::Notify::new(),
        })
    }

    /// Registers a newly accepted connection, cancelling any armed idle
    /// timer and scheduling the introduction sequence on the very first
    /// registration of the process's lifetime.
    pub async fn register(self: &Arc<Self>, connection: Arc<dyn ManagedConnection>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().await;
        state.connections.insert(id, connection);
        if let Some(timer) = state.idle_timer.take() {
            timer.abort();
        }
        drop(state);

        if self.intro_sent.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_ok() {
            let supervisor = Arc::clone(self);
            tokio::spawn(async move { supervisor.run_intro_sequence().await });
        }

        id
    }

    /// Removes a connection. Arms the idle-shutdown timer if the set has
    /// become empty.
    pub async fn unregister(self: &Arc<Self>, id: u64) {
        let mut state = self.state.lock().await;
        state.connections.remove(&id);
        if state.connections.is_empty() && state.idle_timer.is_none() {
            let supervisor = Arc::clone(self);
            state.idle_timer = Some(tokio::spawn(async move {
                tokio::time::sleep(IDLE_SHUTDOWN).await;
                info!("idle shutdown timer expired, stopping");
                supervisor.stop().await;
                std::process::exit(0);
            }));
        }
    }

    /// Sets the current presence mode, forcing `enabled` back on and
    /// broadcasting the change to every connection.
    pub async fn set_mode(&self, mode: PresenceMode) {
        let _guard = self.command_lock.lock().await;
        *self.mode.write().unwrap_or_else(std::sync::PoisonError::into_inner) = mode;
        self.enabled.store(true, Ordering::SeqCst);
        self.broadcast_update_status(mode).await;
        self.broadcast_from_fake(&format!("You are now appearing {}.", label_for(mode))).await;
    }

    /// Flips whether Deceive is active, broadcasting the resulting
    /// effective mode.
    pub async fn toggle_enabled(&self) {
        let _guard = self.command_lock.lock().await;
        let was_enabled = self.enabled.fetch_xor(true, Ordering::SeqCst);
        let now_enabled = !was_enabled;
        let effective = if now_enabled { self.mode() } else { PresenceMode::Online };
        self.broadcast_update_status(effective).await;
        let text = if now_enabled { "Deceive is now enabled." } else { "Deceive is now disabled." };
        self.broadcast_from_fake(text).await;
    }

    /// Dispatches a chat command sent to the fake contact: case-insensitive
    /// substring matching in a fixed priority order.
    pub async fn handle_chat_to_fake(&self, content: &str) {
        let lower = content.to_lowercase();
        if lower.contains("offline") {
            self.set_mode(PresenceMode::Offline).await;
        } else if lower.contains("mobile") {
            self.set_mode(PresenceMode::Mobile).await;
        } else if lower.contains("online") {
            self.set_mode(PresenceMode::Online).await;
        } else if lower.contains("enable") {
            if self.enabled() {
                self.broadcast_from_fake("already enabled").await;
            } else {
                self.toggle_enabled().await;
            }
        } else if lower.contains("disable") {
            if self.enabled() {
                self.toggle_enabled().await;
            } else {
                self.broadcast_from_fake("already disabled").await;
            }
        } else if lower.contains("status") {
            self.broadcast_from_fake(&format!("You are appearing {}.", label_for(self.effective_mode()))).await;
        } else if lower.contains("help") {
            self.broadcast_from_fake("Commands: online, offline, mobile, enable, disable, status, help").await;
        }
    }

    /// Cancels the idle timer, closes every connection, and wakes
    /// anything awaiting `wait_for_shutdown`. Stopping the HTTP/chat
    /// listeners themselves is the caller's responsibility once this
    /// returns.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut state = self.state.lock().await;
        if let Some(timer) = state.idle_timer.take() {
            timer.abort();
        }
        for (_, connection) in state.connections.drain() {
            connection.close().await;
        }
        drop(state);
        self.shutdown.notify_waiters();
    }

    /// Resolves once [`Supervisor::stop`] has run, for listeners to
    /// select on alongside their accept loops.
    pub async fn wait_for_shutdown(&self) {
        if self.stopped.load(Ordering::SeqCst) {
            return;
        }
        self.shutdown.notified().await;
    }

    #[must_use]
    pub fn mode(&self) -> PresenceMode {
        *self.mode.read().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// `Online` whenever `!enabled`, mirroring the supervisor invariant
    /// that disabling overrides the chosen mode for the wire.
    #[must_use]
    pub fn effective_mode(&self) -> PresenceMode {
        if self.enabled() { self.mode() } else { PresenceMode::Online }
    }

    #[must_use]
    pub fn enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    async fn broadcast_update_status(&self, mode: PresenceMode) {
        let connections: Vec<_> = self.state.lock().await.connections.values().cloned().collect();
        for connection in connections {
            if let Err(err) = connection.update_status(mode).await {
                warn!(%err, "update_status failed for a connection");
            }
        }
    }

    async fn broadcast_from_fake(&self, text: &str) {
        let connections: Vec<_> = self.state.lock().await.connections.values().cloned().collect();
        for connection in connections {
            if let Err(err) = connection.send_from_fake(text).await {
                warn!(%err, "send_from_fake failed for a connection");
            }
        }
    }

    async fn run_intro_sequence(&self) {
        tokio::time::sleep(INTRO_DELAY).await;
        let label = label_for(self.effective_mode());
        let welcome = INTRO_LINES[0].replace("{label}", label);
        for (index, line) in [welcome.as_str(), INTRO_LINES[1], INTRO_LINES[2], INTRO_LINES[3]].into_iter().enumerate() {
            if index > 0 {
                tokio::time::sleep(INTRO_MESSAGE_GAP).await;
            }
            self.broadcast_from_fake(line).await;
        }
    }
}

#[async_trait]
impl SupervisorHandle for Supervisor {
    fn mode(&self) -> PresenceMode {
        Supervisor::mode(self)
    }

    fn enabled(&self) -> bool {
        Supervisor::enabled(self)
    }

    fn connect_to_muc(&self) -> bool {
        self.connect_to_muc.load(Ordering::SeqCst)
    }

    async fn dispatch_chat_command(&self, content: &str) {
        let body = extract_body(content).unwrap_or(content);
        self.handle_chat_to_fake(body).await;
    }
}

/// Pulls the text between the first `<body>`/`</body>` pair out of a
/// raw chat-message stanza, falling back to the whole stanza if the
/// tags aren't found (e.g. a malformed or split fragment).
fn extract_body(stanza: &str) -> Option<&str> {
    let start = stanza.find("<body>")? + "<body>".len();
    let end = stanza[start..].find("</body>")?;
    Some(&stanza[start..start + end])
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    use deceive_presence::Result as PresenceResult;

    use super::*;

    struct RecordingConnection {
        statuses: std::sync::Mutex<Vec<PresenceMode>>,
        messages: std::sync::Mutex<Vec<String>>,
        closes: AtomicUsize,
    }

    impl RecordingConnection {
        fn new() -> Self {
            Self {
                statuses: std::sync::Mutex::new(Vec::new()),
                messages: std::sync::Mutex::new(Vec::new()),
                closes: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ManagedConnection for RecordingConnection {
        async fn update_status(&self, mode: PresenceMode) -> PresenceResult<()> {
            self.statuses.lock().unwrap_or_else(std::sync::PoisonError::into_inner).push(mode);
            Ok(())
        }

        async fn send_from_fake(&self, text: &str) -> PresenceResult<()> {
            self.messages.lock().unwrap_or_else(std::sync::PoisonError::into_inner).push(text.to_string());
            Ok(())
        }

        async fn close(&self) {
            self.closes.fetch_add(1, AtomicOrdering::SeqCst);
        }

        fn is_alive(&self) -> bool {
            self.closes.load(AtomicOrdering::SeqCst) == 0
        }
    }

    #[tokio::test]
    async fn set_mode_broadcasts_and_enables() {
        let supervisor = Supervisor::new(PresenceMode::Online, false, true);
        let connection = Arc::new(RecordingConnection::new());
        supervisor.register(connection.clone()).await;

        supervisor.set_mode(PresenceMode::Offline).await;

        assert_eq!(supervisor.mode(), PresenceMode::Offline);
        assert!(supervisor.enabled());
        assert_eq!(connection.statuses.lock().unwrap().as_slice(), [PresenceMode::Offline]);
        assert_eq!(connection.messages.lock().unwrap().as_slice(), ["You are now appearing offline."]);
    }

    #[tokio::test]
    async fn toggle_enabled_forces_online_when_disabled() {
        let supervisor = Supervisor::new(PresenceMode::Offline, true, true);
        let connection = Arc::new(RecordingConnection::new());
        supervisor.register(connection.clone()).await;

        supervisor.toggle_enabled().await;

        assert!(!supervisor.enabled());
        assert_eq!(supervisor.effective_mode(), PresenceMode::Online);
        assert_eq!(connection.statuses.lock().unwrap().as_slice(), [PresenceMode::Online]);
        assert_eq!(connection.messages.lock().unwrap().as_slice(), ["Deceive is now disabled."]);
    }

    #[tokio::test]
    async fn handle_chat_to_fake_priority_order_prefers_offline_over_status() {
        let supervisor = Supervisor::new(PresenceMode::Online, true, true);
        let connection = Arc::new(RecordingConnection::new());
        supervisor.register(connection.clone()).await;

        supervisor.handle_chat_to_fake("show me my status: offline please").await;

        assert_eq!(supervisor.mode(), PresenceMode::Offline);
    }

    #[tokio::test]
    async fn handle_chat_to_fake_enable_when_already_enabled_replies_without_toggling() {
        let supervisor = Supervisor::new(PresenceMode::Offline, true, true);
        let connection = Arc::new(RecordingConnection::new());
        supervisor.register(connection.clone()).await;

        supervisor.handle_chat_to_fake("enable").await;

        assert!(supervisor.enabled());
        assert_eq!(connection.messages.lock().unwrap().as_slice(), ["already enabled"]);
    }

    #[tokio::test]
    async fn handle_chat_to_fake_help_lists_commands() {
        let supervisor = Supervisor::new(PresenceMode::Online, true, true);
        let connection = Arc::new(RecordingConnection::new());
        supervisor.register(connection.clone()).await;

        supervisor.handle_chat_to_fake("HELP").await;

        let messages = connection.messages.lock().unwrap();
        assert_eq!(messages.last().unwrap(), "Commands: online, offline, mobile, enable, disable, status, help");
    }

    #[tokio::test]
    async fn stop_closes_every_connection_and_is_idempotent() {
        let supervisor = Supervisor::new(PresenceMode::Online, true, true);
        let connection = Arc::new(RecordingConnection::new());
        supervisor.register(connection.clone()).await;

        supervisor.stop().await;
        supervisor.stop().await;

        assert_eq!(connection.closes.load(AtomicOrdering::SeqCst), 1);
    }

    #[tokio::test]
    async fn extract_body_pulls_text_between_tags() {
        let stanza = "<message><body>disable please</body></message>";
        assert_eq!(extract_body(stanza), Some("disable please"));
    }

    #[tokio::test]
    async fn extract_body_falls_back_to_whole_stanza_without_tags() {
        let stanza = "disable";
        assert_eq!(extract_body(stanza), None);
    }
}
