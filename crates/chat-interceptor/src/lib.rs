//! Chat Interceptor: a loopback TLS listener that holds each accepted
//! client connection until the Config Interceptor has resolved the real
//! chat target, dials that target upstream with peer verification
//! disabled, and splices the two byte streams through the Presence
//! Rewriter.

pub mod error;
mod upstream_tls;

use std::{net::SocketAddr, sync::Arc};

pub use error::{Error, Result};
use deceive_common::{ChatTarget, ChatTargetCell};
use deceive_presence::{ManagedConnection, ProxiedConnection, SupervisorHandle};
use deceive_supervisor::Supervisor;
use rustls::{ServerConfig, pki_types::ServerName};
use tokio::{
    io::{AsyncReadExt, ReadHalf, WriteHalf, split},
    net::{TcpListener, TcpStream},
};
use tokio_rustls::{TlsAcceptor, server::TlsStream};
use tracing::{debug, info, warn};

/// Read-loop buffer size. Large enough that a typical XMPP stanza arrives
/// in a single chunk, since the rewriter assumes one fragment per chunk.
const READ_BUFFER_SIZE: usize = 16 * 1024;

type ClientStream = TlsStream<TcpStream>;
type UpstreamStream = tokio_rustls::client::TlsStream<TcpStream>;
type Connection = ProxiedConnection<WriteHalf<ClientStream>, WriteHalf<UpstreamStream>>;

/// The Chat Interceptor.
pub struct ChatInterceptor {
    tls_acceptor: TlsAcceptor,
    chat_target: Arc<ChatTargetCell>,
    supervisor: Arc<Supervisor>,
}

impl ChatInterceptor {
    #[must_use]
    pub fn new(server_config: ServerConfig, chat_target: Arc<ChatTargetCell>, supervisor: Arc<Supervisor>) -> Arc<Self> {
        Arc::new(Self { tls_acceptor: TlsAcceptor::from(Arc::new(server_config)), chat_target, supervisor })
    }

    /// Binds the loopback TLS listener on an OS-assigned port and starts
    /// accepting connections in the background. Returns the bound port
    /// and a handle to stop the listener.
    pub async fn start(self: Arc<Self>) -> Result<(u16, ChatInterceptorHandle)> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        let (shutdown_tx, mut shutdown_rx) = tokio::sync::oneshot::channel::<()>();

        let interceptor = self;
        let join = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = &mut shutdown_rx => break,
                    accepted = listener.accept() => {
                        match accepted {
                            Ok((stream, addr)) => {
                                let interceptor = Arc::clone(&interceptor);
                                tokio::spawn(async move { interceptor.handle_connection(stream, addr).await });
                            },
                            Err(err) => warn!(%err, "chat interceptor accept error"),
                        }
                    }
                }
            }
        });

        info!(port, "chat interceptor listening");
        Ok((port, ChatInterceptorHandle { shutdown_tx: Some(shutdown_tx), join: Some(join) }))
    }

    async fn handle_connection(self: Arc<Self>, stream: TcpStream, addr: SocketAddr) {
        let tls_stream = match self.tls_acceptor.accept(stream).await {
            Ok(stream) => stream,
            Err(err) => {
                warn!(%addr, %err, "chat interceptor TLS handshake failed");
                return;
            },
        };
        let (mut client_read, client_write) = split(tls_stream);

        let (target, buffered) = match self.hold_until_target_known(&mut client_read, addr).await {
            Some(pair) => pair,
            None => return,
        };

        let upstream_write = match self.dial_upstream(&target, addr).await {
            Ok(upstream_write) => upstream_write,
            Err(err) => {
                warn!(%addr, host = %target.host, port = target.port, %err, "upstream dial failed");
                let mut client_write = client_write;
                let _ = tokio::io::AsyncWriteExt::shutdown(&mut client_write).await;
                return;
            },
        };

        let supervisor_handle: Arc<dyn SupervisorHandle> = Arc::clone(&self.supervisor) as Arc<dyn SupervisorHandle>;
        let connection = Arc::new(ProxiedConnection::new(client_write, upstream_write.0, supervisor_handle));
        let mut upstream_read = upstream_write.1;

        let id = self.supervisor.register(Arc::clone(&connection) as Arc<dyn ManagedConnection>).await;

        if !buffered.is_empty() {
            if let Err(err) = connection.handle_incoming(&buffered).await {
                warn!(%addr, %err, "failed to flush buffered client bytes");
            }
        }

        let inbound = pump_incoming(&connection, client_read);
        let outbound = pump_outgoing(&connection, &mut upstream_read);
        tokio::join!(inbound, outbound);

        connection.close().await;
        self.supervisor.unregister(id).await;
        debug!(%addr, "connection closed");
    }

    /// If `ChatTarget` isn't known yet, buffer client bytes in FIFO
    /// order while cooperatively waiting for it. Returns `None` if the
    /// client disconnects before the target resolves.
    async fn hold_until_target_known(
        &self,
        client_read: &mut ReadHalf<ClientStream>,
        addr: SocketAddr,
    ) -> Option<(ChatTarget, Vec<u8>)> {
        if let Some(target) = self.chat_target.get() {
            return Some((target, Vec::new()));
        }
        debug!(%addr, "holding connection until chat target resolves");
        let mut buffered = Vec::new();
        let mut buf = [0u8; READ_BUFFER_SIZE];
        loop {
            tokio::select! {
                target = self.chat_target.wait() => return Some((target, buffered)),
                result = client_read.read(&mut buf) => {
                    match result {
                        Ok(0) => {
                            debug!(%addr, "client closed before chat target resolved");
                            return None;
                        },
                        Ok(n) => buffered.extend_from_slice(&buf[..n]),
                        Err(err) => {
                            warn!(%addr, %err, "client read failed while held");
                            return None;
                        },
                    }
                }
            }
        }
    }

    async fn dial_upstream(
        &self,
        target: &ChatTarget,
        addr: SocketAddr,
    ) -> Result<(WriteHalf<UpstreamStream>, ReadHalf<UpstreamStream>)> {
        debug!(%addr, host = %target.host, port = target.port, "dialing upstream chat server");
        let tcp = TcpStream::connect((target.host.as_str(), target.port)).await?;
        let server_name = ServerName::try_from(target.host.clone()).map_err(|_| Error::message("invalid upstream server name"))?;
        let tls_stream = upstream_tls::connector().connect(server_name, tcp).await?;
        let (read, write) = split(tls_stream);
        Ok((write, read))
    }
}

async fn pump_incoming(connection: &Connection, mut client_read: ReadHalf<ClientStream>) {
    let mut buf = [0u8; READ_BUFFER_SIZE];
    loop {
        match client_read.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if let Err(err) = connection.handle_incoming(&buf[..n]).await {
                    warn!(%err, "handle_incoming failed");
                    break;
                }
            },
            Err(err) => {
                debug!(%err, "client read error");
                break;
            },
        }
    }
}

async fn pump_outgoing(connection: &Connection, upstream_read: &mut ReadHalf<UpstreamStream>) {
    let mut buf = [0u8; READ_BUFFER_SIZE];
    loop {
        match upstream_read.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if let Err(err) = connection.handle_outgoing(&buf[..n]).await {
                    warn!(%err, "handle_outgoing failed");
                    break;
                }
            },
            Err(err) => {
                debug!(%err, "upstream read error");
                break;
            },
        }
    }
}

/// Handle returned by [`ChatInterceptor::start`]; stops accepting new
/// connections when dropped or [`stop`](Self::stop) is called.
pub struct ChatInterceptorHandle {
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
    join: Option<tokio::task::JoinHandle<()>>,
}

impl ChatInterceptorHandle {
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(join) = self.join.take() {
            let _ = join.await;
        }
    }
}
