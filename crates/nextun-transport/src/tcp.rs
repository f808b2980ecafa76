// ============================================
// File: crates/nextun-transport/src/tcp.rs
// ============================================
//! # TCP Data Channel
//!
//! ## Creation Reason
//! Clients carry their tunnelled packets over one or more TCP
//! connections ("data channels"). Each listener owns one ephemeral
//! port; the channel pool keeps several of them alive.
//!
//! ## Main Functionality
//! - `TcpListenerFactory`: binds a fresh listener on `bind_ip:0`
//! - `TcpChannelListener`: accept loop, one task per connection
//! - Per-connection forwarding between the socket and the user queues
//!
//! ## Connection Flow
//! ```text
//! Client                          Server
//!   │──── Hello(user) ───────────►│  user_channel(user)
//!   │◄─── Channels(ports) ────────│
//!   │──── Data ──────────────────►│  → from_client queue
//!   │◄─── Data ───────────────────│  ← to_client queue
//!   │◄─── Channels(ports) ────────│  on topology change
//!   │◄──► Heartbeat ─────────────►│
//! ```
//!
//! ## Design Choices
//! - Socket created through `socket2` with `SO_REUSEADDR`
//! - A failed accept ends the listener so the pool replaces it
//! - A failed connection never affects the listener
//!
//! ## ⚠️ Important Note for Next Developer
//! - Every task spawned here is tracked by the listener's `Scope`
//! - The `to_client` receiver is shared between all of a user's
//!   connections; hold its lock only while waiting for one packet
//!
//! ## Last Modified
//! v0.1.0 - Initial TCP data channel

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;
use tracing::{debug, error, info, trace, warn};

use nextun_common::ip::Ip;
use nextun_common::scope::Scope;
use nextun_common::types::UserId;

use crate::error::{Result, TransportError};
use crate::packet::{Frame, FrameCodec};
use crate::traits::{ChannelHost, DataChannelListener, ListenerFactory, SharedReceiver};

// ============================================
// Constants
// ============================================

/// Pending connection backlog per listener.
const LISTEN_BACKLOG: i32 = 1024;

/// Default time a client has to send its `Hello` frame.
pub const DEFAULT_HELLO_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================
// TcpListenerFactory
// ============================================

/// Creates [`TcpChannelListener`]s on ephemeral ports.
pub struct TcpListenerFactory {
    bind_ip: Ip,
    host: Arc<dyn ChannelHost>,
    hello_timeout: Duration,
}

impl TcpListenerFactory {
    /// Creates a factory binding on `bind_ip`.
    #[must_use]
    pub fn new(bind_ip: Ip, host: Arc<dyn ChannelHost>) -> Self {
        Self {
            bind_ip,
            host,
            hello_timeout: DEFAULT_HELLO_TIMEOUT,
        }
    }

    /// Sets how long a new connection may take to send `Hello`.
    #[must_use]
    pub const fn with_hello_timeout(mut self, timeout: Duration) -> Self {
        self.hello_timeout = timeout;
        self
    }
}

#[async_trait]
impl ListenerFactory for TcpListenerFactory {
    type Listener = TcpChannelListener;

    async fn create(&self, scope: &Scope) -> Result<Arc<TcpChannelListener>> {
        let addr = SocketAddr::new(IpAddr::V4(self.bind_ip.into()), 0);
        let listener = bind_listener(addr)?;
        let port = listener
            .local_addr()
            .map_err(|e| TransportError::io("getting local address", e))?
            .port();

        debug!(port, "Data channel bound");

        Ok(Arc::new(TcpChannelListener {
            listener,
            port,
            scope: scope.clone(),
            host: Arc::clone(&self.host),
            hello_timeout: self.hello_timeout,
        }))
    }
}

impl std::fmt::Debug for TcpListenerFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpListenerFactory")
            .field("bind_ip", &self.bind_ip)
            .field("hello_timeout", &self.hello_timeout)
            .finish_non_exhaustive()
    }
}

/// Binds a non-blocking TCP listener with `socket2`.
fn bind_listener(addr: SocketAddr) -> Result<TcpListener> {
    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))
        .map_err(|e| TransportError::io("creating TCP socket", e))?;

    socket
        .set_reuse_address(true)
        .map_err(|e| TransportError::io("setting SO_REUSEADDR", e))?;

    socket
        .set_nonblocking(true)
        .map_err(|e| TransportError::io("setting non-blocking", e))?;

    socket.bind(&addr.into()).map_err(|e| {
        if e.kind() == std::io::ErrorKind::AddrInUse {
            TransportError::AddressInUse { addr }
        } else {
            TransportError::bind_failed(addr, e.to_string())
        }
    })?;

    socket
        .listen(LISTEN_BACKLOG)
        .map_err(|e| TransportError::bind_failed(addr, e.to_string()))?;

    let std_listener: std::net::TcpListener = socket.into();
    TcpListener::from_std(std_listener)
        .map_err(|e| TransportError::io("converting to Tokio listener", e))
}

// ============================================
// TcpChannelListener
// ============================================

/// One data channel: a TCP listener on one port.
pub struct TcpChannelListener {
    listener: TcpListener,
    port: u16,
    scope: Scope,
    host: Arc<dyn ChannelHost>,
    hello_timeout: Duration,
}

#[async_trait]
impl DataChannelListener for TcpChannelListener {
    fn port(&self) -> u16 {
        self.port
    }

    async fn serve(self: Arc<Self>) {
        let port = self.port;
        info!(port, "Data channel accepting connections");

        loop {
            tokio::select! {
                () = self.scope.cancelled() => {
                    debug!(port, "Data channel stopped by shutdown");
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        trace!(port, %peer, "Connection accepted");
                        let connection = Connection {
                            port,
                            peer,
                            host: Arc::clone(&self.host),
                            scope: self.scope.clone(),
                            hello_timeout: self.hello_timeout,
                        };
                        self.scope.spawn(connection.run(stream));
                    }
                    Err(e) => {
                        let err = accept_failed(port, &e);
                        error!(port, error = %err, "Closing data channel");
                        break;
                    }
                },
            }
        }
    }
}

impl std::fmt::Debug for TcpChannelListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpChannelListener")
            .field("port", &self.port)
            .field("cancelled", &self.scope.is_cancelled())
            .finish_non_exhaustive()
    }
}

fn accept_failed(port: u16, source: &std::io::Error) -> TransportError {
    TransportError::AcceptFailed {
        port,
        reason: source.to_string(),
    }
}

// ============================================
// Connection
// ============================================

struct Connection {
    port: u16,
    peer: SocketAddr,
    host: Arc<dyn ChannelHost>,
    scope: Scope,
    hello_timeout: Duration,
}

impl Connection {
    async fn run(self, stream: TcpStream) {
        if let Err(e) = stream.set_nodelay(true) {
            trace!(peer = %self.peer, error = %e, "Failed to set TCP_NODELAY");
        }

        let port = self.port;
        let peer = self.peer;
        match self.forward(Framed::new(stream, FrameCodec::new())).await {
            Ok(()) => debug!(port, %peer, "Connection closed"),
            Err(e) if e.is_protocol_error() => {
                warn!(port, %peer, error = %e, "Dropping misbehaving connection");
            }
            Err(e) if e.is_network_error() => {
                debug!(port, %peer, error = %e, "Connection lost");
            }
            Err(e) => debug!(port, %peer, error = %e, "Connection ended"),
        }
    }

    async fn handshake(&self, framed: &mut Framed<TcpStream, FrameCodec>) -> Result<UserId> {
        let first = tokio::time::timeout(self.hello_timeout, framed.next())
            .await
            .map_err(|_| TransportError::HandshakeTimeout {
                timeout_ms: u64::try_from(self.hello_timeout.as_millis()).unwrap_or(u64::MAX),
            })?;

        match first {
            None => Err(TransportError::ConnectionClosed),
            Some(frame) => match frame? {
                Frame::Hello(user) => Ok(user),
                other => Err(TransportError::UnexpectedFrame {
                    kind: other.kind().name(),
                }),
            },
        }
    }

    async fn forward(self, mut framed: Framed<TcpStream, FrameCodec>) -> Result<()> {
        let user = self.handshake(&mut framed).await?;
        let channel = self.host.user_channel(user)?;
        let mut topology = self.host.topology();

        let ports = topology.borrow_and_update().clone();
        framed.send(Frame::Channels(ports)).await?;
        debug!(port = self.port, peer = %self.peer, %user, "Data channel connection ready");

        loop {
            tokio::select! {
                () = self.scope.cancelled() => return Ok(()),
                inbound = framed.next() => match inbound {
                    None => return Ok(()),
                    Some(frame) => match frame? {
                        Frame::Data(packet) => {
                            if channel.from_client.send(packet).await.is_err() {
                                debug!(%user, "User queue closed");
                                return Ok(());
                            }
                        }
                        Frame::Heartbeat => framed.send(Frame::Heartbeat).await?,
                        other => {
                            return Err(TransportError::UnexpectedFrame {
                                kind: other.kind().name(),
                            });
                        }
                    },
                },
                outbound = next_outbound(&channel.to_client) => match outbound {
                    Some(packet) => framed.send(Frame::Data(packet)).await?,
                    None => {
                        debug!(%user, "User logged out");
                        return Ok(());
                    }
                },
                changed = topology.changed() => {
                    if changed.is_err() {
                        return Ok(());
                    }
                    let ports = topology.borrow_and_update().clone();
                    framed.send(Frame::Channels(ports)).await?;
                }
            }
        }
    }
}

async fn next_outbound(queue: &SharedReceiver) -> Option<Bytes> {
    queue.lock().await.recv().await
}

// ============================================
// Tests
// ============================================
