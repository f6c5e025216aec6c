//! `ProxiedConnection`: the per-connection state machine that owns
//! `handle_incoming`/`handle_outgoing` and the fake-contact bookkeeping
//! (roster-patched flag, announced flag, last presence fragment, cached
//! Valorant version).

use std::sync::Arc;

use async_trait::async_trait;
use deceive_common::PresenceMode;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::{
    error::{Context as _, Result},
    fake_contact,
    rewrite::rewrite_presence,
};

/// Literal marker identifying the outbound roster query.
const ROSTER_OPEN_MARKER: &str = "<query xmlns='jabber:iq:riotgames:roster'>";

/// Handle back to the session supervisor, implemented by
/// `deceive-supervisor`. Kept as a trait here (rather than a direct
/// dependency) so presence rewriting stays independently testable.
#[async_trait]
pub trait SupervisorHandle: Send + Sync {
    /// The currently configured mode (ignoring `enabled`).
    fn mode(&self) -> PresenceMode;
    /// Whether Deceive is currently active.
    fn enabled(&self) -> bool;
    /// Whether MUC-addressed presence should always pass through verbatim.
    fn connect_to_muc(&self) -> bool;
    /// Dispatches a chat message sent to the fake contact.
    async fn dispatch_chat_command(&self, content: &str);
}

/// Type-erased handle the supervisor holds in its connection set, so it
/// can broadcast `UpdateStatus`/`SendFromFake` without knowing the
/// concrete socket types of any particular `ProxiedConnection`.
#[async_trait]
pub trait ManagedConnection: Send + Sync {
    async fn update_status(&self, mode: PresenceMode) -> Result<()>;
    async fn send_from_fake(&self, text: &str) -> Result<()>;
    /// Shuts both write halves down exactly once; idempotent.
    async fn close(&self);
    fn is_alive(&self) -> bool;
}

#[derive(Default)]
struct ConnectionState {
    last_presence_fragment: Option<String>,
    roster_patched: bool,
    fake_contact_announced: bool,
    cached_valorant_version: Option<String>,
    alive: bool,
}

impl ConnectionState {
    fn fresh() -> Self {
        Self { alive: true, ..Self::default() }
    }
}

/// One accepted client↔upstream pairing. Generic over the two write
/// halves so this crate never has to know whether they're TLS, plain
/// TCP, or an in-memory buffer in tests.
pub struct ProxiedConnection<C, U>
where
    C: AsyncWrite + Unpin + Send,
    U: AsyncWrite + Unpin + Send,
{
    client_write: Mutex<C>,
    upstream_write: Mutex<U>,
    state: Mutex<ConnectionState>,
    supervisor: Arc<dyn SupervisorHandle>,
}

impl<C, U> ProxiedConnection<C, U>
where
    C: AsyncWrite + Unpin + Send,
    U: AsyncWrite + Unpin + Send,
{
    pub fn new(client_write: C, upstream_write: U, supervisor: Arc<dyn SupervisorHandle>) -> Self {
        Self {
            client_write: Mutex::new(client_write),
            upstream_write: Mutex::new(upstream_write),
            state: Mutex::new(ConnectionState::fresh()),
            supervisor,
        }
    }

    /// Client → upstream direction.
    pub async fn handle_incoming(&self, chunk: &[u8]) -> Result<()> {
        let Ok(text) = std::str::from_utf8(chunk) else {
            self.write_upstream(chunk).await?;
            return Ok(());
        };

        let enabled = self.supervisor.enabled();
        let effective_mode = if enabled { self.supervisor.mode() } else { PresenceMode::Online };

        if text.contains("<presence") && enabled {
            let connect_to_muc = self.supervisor.connect_to_muc();
            let rewritten = {
                let mut state = self.state.lock().await;
                let rewritten =
                    rewrite_presence(text, effective_mode, connect_to_muc, &mut state.cached_valorant_version);
                state.last_presence_fragment = Some(text.to_string());
                rewritten
            };
            self.write_upstream(rewritten.as_bytes()).await?;
        } else if text.contains(fake_contact::FAKE_JID) {
            debug!("chat addressed to fake contact, dispatching as command");
            self.supervisor.dispatch_chat_command(text).await;
        } else {
            self.write_upstream(chunk).await?;
        }

        self.announce_fake_contact_if_due().await
    }

    /// Upstream → client direction.
    pub async fn handle_outgoing(&self, chunk: &[u8]) -> Result<()> {
        let Ok(text) = std::str::from_utf8(chunk) else {
            self.write_client(chunk).await?;
            return Ok(());
        };

        let already_patched = {
            let mut state = self.state.lock().await;
            let was_patched = state.roster_patched;
            if !was_patched && text.contains(ROSTER_OPEN_MARKER) {
                state.roster_patched = true;
            }
            was_patched
        };

        if !already_patched && text.contains(ROSTER_OPEN_MARKER) {
            let spliced = splice_roster_item(text);
            self.write_client(spliced.as_bytes()).await?;
            return Ok(());
        }

        self.write_client(chunk).await
    }

    /// Re-rewrites the last presence fragment seen under a new mode and
    /// writes the result upstream. A no-op if this connection has never
    /// seen a client presence stanza.
    pub async fn update_status(&self, mode: PresenceMode) -> Result<()> {
        let connect_to_muc = self.supervisor.connect_to_muc();
        let rewritten = {
            let mut state = self.state.lock().await;
            let Some(fragment) = state.last_presence_fragment.clone() else {
                return Ok(());
            };
            Some(rewrite_presence(&fragment, mode, connect_to_muc, &mut state.cached_valorant_version))
        };
        match rewritten {
            Some(rewritten) => self.write_upstream(rewritten.as_bytes()).await,
            None => Ok(()),
        }
    }

    /// Writes a synthetic chat message from the fake contact to the
    /// client, if the roster has been patched.
    pub async fn send_from_fake(&self, text: &str) -> Result<()> {
        if !self.state.lock().await.roster_patched {
            return Ok(());
        }
        let message = fake_contact::synthetic_message(text);
        self.write_client(message.as_bytes()).await
    }

    async fn announce_fake_contact_if_due(&self) -> Result<()> {
        let stanza = {
            let mut state = self.state.lock().await;
            if state.roster_patched && !state.fake_contact_announced {
                state.fake_contact_announced = true;
                Some(fake_contact::synthetic_presence(state.cached_valorant_version.as_deref()))
            } else {
                None
            }
        };
        match stanza {
            Some(stanza) => self.write_client(stanza.as_bytes()).await,
            None => Ok(()),
        }
    }

    async fn write_upstream(&self, bytes: &[u8]) -> Result<()> {
        let mut w = self.upstream_write.lock().await;
        w.write_all(bytes).await.context("write to upstream")?;
        w.flush().await.context("flush upstream")?;
        Ok(())
    }

    async fn write_client(&self, bytes: &[u8]) -> Result<()> {
        let mut w = self.client_write.lock().await;
        w.write_all(bytes).await.context("write to client")?;
        w.flush().await.context("flush client")?;
        Ok(())
    }

    async fn close_once(&self) {
        {
            let mut state = self.state.lock().await;
            if !state.alive {
                return;
            }
            state.alive = false;
        }
        let _ = self.client_write.lock().await.shutdown().await;
        let _ = self.upstream_write.lock().await.shutdown().await;
    }
}

#[async_trait]
impl<C, U> ManagedConnection for ProxiedConnection<C, U>
where
    C: AsyncWrite + Unpin + Send,
    U: AsyncWrite + Unpin + Send,
{
    async fn update_status(&self, mode: PresenceMode) -> Result<()> {
        ProxiedConnection::update_status(self, mode).await
    }

    async fn send_from_fake(&self, text: &str) -> Result<()> {
        ProxiedConnection::send_from_fake(self, text).await
    }

    async fn close(&self) {
        self.close_once().await;
    }

    fn is_alive(&self) -> bool {
        self.state.try_lock().map(|s| s.alive).unwrap_or(true)
    }
}

/// Splices the fake-contact roster `<item/>` immediately after the
/// roster-open marker. A no-op if the marker isn't present (callers
/// only invoke this after confirming it is).
fn splice_roster_item(text: &str) -> String {
    let Some(idx) = text.find(ROSTER_OPEN_MARKER) else {
        warn!("splice_roster_item called without roster marker present");
        return text.to_string();
    };
    let insert_at = idx + ROSTER_OPEN_MARKER.len();
    let mut out = String::with_capacity(text.len() + 512);
    out.push_str(&text[..insert_at]);
    out.push_str(&fake_contact::roster_item());
    out.push_str(&text[insert_at..]);
    out
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use tokio::io::DuplexStream;

    use super::*;

    struct FixedSupervisor {
        mode: PresenceMode,
        enabled: AtomicBool,
        connect_to_muc: bool,
    }

    #[async_trait]
    impl SupervisorHandle for FixedSupervisor {
        fn mode(&self) -> PresenceMode {
            self.mode
        }

        fn enabled(&self) -> bool {
            self.enabled.load(Ordering::SeqCst)
        }

        fn connect_to_muc(&self) -> bool {
            self.connect_to_muc
        }

        async fn dispatch_chat_command(&self, _content: &str) {}
    }

    fn supervisor(mode: PresenceMode) -> Arc<FixedSupervisor> {
        Arc::new(FixedSupervisor {
            mode,
            enabled: AtomicBool::new(true),
            connect_to_muc: true,
        })
    }

    async fn read_all_available(stream: &mut DuplexStream) -> String {
        use tokio::io::AsyncReadExt;
        let mut buf = vec![0u8; 8192];
        let n = tokio::time::timeout(std::time::Duration::from_millis(50), stream.read(&mut buf))
            .await
            .unwrap_or(Ok(0))
            .unwrap_or(0);
        String::from_utf8_lossy(&buf[..n]).into_owned()
    }

    #[tokio::test]
    async fn roster_injection_splices_fake_item_once() {
        let (client_read, client_write) = tokio::io::duplex(8192);
        let (_upstream_read, upstream_write) = tokio::io::duplex(8192);
        let conn = ProxiedConnection::new(client_write, upstream_write, supervisor(PresenceMode::Offline));
        let mut client_read = client_read;

        let chunk = "<iq><query xmlns='jabber:iq:riotgames:roster'><item jid='friend@pvp.net'/></query></iq>";
        conn.handle_outgoing(chunk.as_bytes()).await.unwrap();

        let written = read_all_available(&mut client_read).await;
        assert!(written.contains(fake_contact::FAKE_JID));
        assert!(written.find(fake_contact::FAKE_JID).unwrap() < written.find("friend@pvp.net").unwrap());

        // A second roster chunk is forwarded without a further splice.
        conn.handle_outgoing(chunk.as_bytes()).await.unwrap();
        let second = read_all_available(&mut client_read).await;
        assert_eq!(second.matches(fake_contact::FAKE_JID).count(), 0);
    }

    #[tokio::test]
    async fn fake_contact_announced_exactly_once_after_roster_and_presence() {
        let (mut client_read, client_write) = tokio::io::duplex(16384);
        let (_upstream_read, upstream_write) = tokio::io::duplex(8192);
        let conn = ProxiedConnection::new(client_write, upstream_write, supervisor(PresenceMode::Offline));

        conn.handle_outgoing(b"<iq><query xmlns='jabber:iq:riotgames:roster'></query></iq>")
            .await
            .unwrap();
        let _ = read_all_available(&mut client_read).await;

        let presence = "<presence><show>chat</show></presence>";
        conn.handle_incoming(presence.as_bytes()).await.unwrap();
        let written = read_all_available(&mut client_read).await;
        assert_eq!(written.matches("<show>chat</show><platform>riot</platform>").count(), 1);

        // A second presence chunk must not re-announce.
        conn.handle_incoming(presence.as_bytes()).await.unwrap();
        let second = read_all_available(&mut client_read).await;
        assert!(!second.contains("<platform>riot</platform>"));
    }

    #[tokio::test]
    async fn chat_addressed_to_fake_contact_is_not_forwarded_upstream() {
        let (_client_read, client_write) = tokio::io::duplex(8192);
        let (mut upstream_read, upstream_write) = tokio::io::duplex(8192);
        let conn = ProxiedConnection::new(client_write, upstream_write, supervisor(PresenceMode::Offline));

        let chunk = format!("<message to='{}' type='chat'><body>status</body></message>", fake_contact::FAKE_JID);
        conn.handle_incoming(chunk.as_bytes()).await.unwrap();

        let forwarded = read_all_available(&mut upstream_read).await;
        assert!(forwarded.is_empty());
    }

    #[tokio::test]
    async fn update_status_is_noop_without_prior_presence() {
        let (_client_read, client_write) = tokio::io::duplex(8192);
        let (mut upstream_read, upstream_write) = tokio::io::duplex(8192);
        let conn = ProxiedConnection::new(client_write, upstream_write, supervisor(PresenceMode::Offline));

        conn.update_status(PresenceMode::Mobile).await.unwrap();
        let forwarded = read_all_available(&mut upstream_read).await;
        assert!(forwarded.is_empty());
    }

    #[tokio::test]
    async fn update_status_rewrites_last_presence_fragment() {
        let (_client_read, client_write) = tokio::io::duplex(8192);
        let (mut upstream_read, upstream_write) = tokio::io::duplex(8192);
        let conn = ProxiedConnection::new(client_write, upstream_write, supervisor(PresenceMode::Offline));

        conn.handle_incoming(b"<presence><show>chat</show></presence>").await.unwrap();
        let _ = read_all_available(&mut upstream_read).await;

        conn.update_status(PresenceMode::Mobile).await.unwrap();
        let forwarded = read_all_available(&mut upstream_read).await;
        assert!(forwarded.contains("<show>mobile</show>"));
    }
}
