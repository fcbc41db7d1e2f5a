//! TCP front end.
//!
//! Listens on a port and serves exactly one client at a time. While a
//! session is active, further clients are either turned away or replace
//! the active one, depending on [`ConcurrentClientPolicy`].

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use hixie_protocol::DEFAULT_MAX_FRAME_LEN;
use serde::{Deserialize, Serialize};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, watch};
use tokio_util::sync::CancellationToken;

use crate::action::ActionRegistry;
use crate::session::{Session, SessionState, TimeoutPolicy};
use crate::{DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_MAX_REQUEST_LEN, DEFAULT_TIMEOUT, ServerError};

/// What to do with a client that connects while a session is active.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConcurrentClientPolicy {
    /// Close the newcomer; the active session is untouched unless its
    /// peer has already gone.
    #[default]
    Reject,
    /// Tear the active session down and validate the newcomer next.
    Preempt,
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Path prefix the endpoint is meant to live under. Logged, not enforced.
    pub url_prefix: String,
    /// TCP port to listen on (0 = OS-assigned).
    pub port: u16,
    pub bind_addr: IpAddr,
    /// Host advertised in `WebSocket-Location`. Defaults to the local
    /// address of the accepted socket.
    pub host: Option<String>,
    /// Deadline for each frame pass.
    pub timeout: Duration,
    pub timeout_policy: TimeoutPolicy,
    /// Wait for the first byte of the upgrade request.
    pub handshake_timeout: Duration,
    pub max_request_len: usize,
    pub max_frame_len: usize,
    pub concurrent_clients: ConcurrentClientPolicy,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url_prefix: "/".into(),
            port: 8080,
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            host: None,
            timeout: DEFAULT_TIMEOUT,
            timeout_policy: TimeoutPolicy::default(),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            max_request_len: DEFAULT_MAX_REQUEST_LEN,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            concurrent_clients: ConcurrentClientPolicy::default(),
        }
    }
}

/// The WebSocket endpoint.
///
/// Owns the action registry; once the server is built the registry can
/// no longer change.
pub struct WebSocketServer {
    config: Arc<ServerConfig>,
    actions: ActionRegistry,
    state: watch::Sender<SessionState>,
    cancel: CancellationToken,
    local_addr: Mutex<Option<SocketAddr>>,
    session_stop: Mutex<Option<CancellationToken>>,
}

impl WebSocketServer {
    pub fn new(config: ServerConfig, actions: ActionRegistry) -> Arc<Self> {
        let (state, _) = watch::channel(SessionState::Idle);
        Arc::new(Self {
            config: Arc::new(config),
            actions,
            state,
            cancel: CancellationToken::new(),
            local_addr: Mutex::new(None),
            session_stop: Mutex::new(None),
        })
    }

    /// Returns the local address the server is listening on.
    ///
    /// Only available after [`run`](Self::run) binds the socket.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().await
    }

    /// Returns the listening port (0 if not yet bound).
    pub async fn port(&self) -> u16 {
        self.local_addr.lock().await.map(|a| a.port()).unwrap_or(0)
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn actions(&self) -> &ActionRegistry {
        &self.actions
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Receiver that observes every session state change.
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Returns `true` while a client is being validated or streamed.
    pub fn has_client(&self) -> bool {
        self.state() != SessionState::Idle
    }

    /// Ends the active session, if any, through the normal teardown path.
    pub async fn disconnect_client(&self) -> bool {
        match self.session_stop.lock().await.as_ref() {
            Some(stop) => {
                stop.cancel();
                true
            }
            None => false,
        }
    }

    /// Gracefully shuts down the server.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Runs the accept loop until [`shutdown`](Self::shutdown).
    ///
    /// Session failures are logged and never end the loop.
    pub async fn run(&self) -> Result<(), ServerError> {
        let addr = SocketAddr::new(self.config.bind_addr, self.config.port);
        let listener = TcpListener::bind(addr).await?;

        let local_addr = listener.local_addr()?;
        *self.local_addr.lock().await = Some(local_addr);
        tracing::info!(
            url_prefix = %self.config.url_prefix,
            actions = self.actions.len(),
            "websocket server listening on {local_addr}"
        );

        let mut pending = None;
        loop {
            let (stream, peer) = match pending.take() {
                Some(next) if !self.cancel.is_cancelled() => next,
                _ => tokio::select! {
                    _ = self.cancel.cancelled() => {
                        tracing::info!("server shutting down");
                        break Ok(());
                    }

                    result = listener.accept() => match result {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            tracing::error!("accept error: {e}");
                            continue;
                        }
                    },
                },
            };
            pending = self.serve_client(&listener, stream, peer).await;
        }
    }

    /// Serves one client until its session ends.
    ///
    /// Returns the client that preempted it, if any.
    async fn serve_client(
        &self,
        listener: &TcpListener,
        stream: TcpStream,
        peer: SocketAddr,
    ) -> Option<(TcpStream, SocketAddr)> {
        let local = stream.local_addr().ok();
        let host = self
            .config
            .host
            .clone()
            .or_else(|| local.map(|a| location_host(a.ip())))
            .unwrap_or_else(|| "localhost".into());
        let port = local.map(|a| a.port()).unwrap_or(self.config.port);

        let stop = self.cancel.child_token();
        *self.session_stop.lock().await = Some(stop.clone());
        let mut session = Session::new(stream, Arc::clone(&self.config), host, port)
            .with_peer(peer)
            .with_stop_token(stop.clone())
            .with_state_sender(self.state.clone());
        let peer_gone = session.peer_gone_handle();
        tracing::info!(%peer, "client connected");

        let mut next_client = None;
        {
            let run = session.run(&self.actions);
            tokio::pin!(run);

            loop {
                tokio::select! {
                    result = &mut run => {
                        if let Err(e) = result {
                            tracing::warn!(%peer, "session ended with error: {e}");
                        }
                        break;
                    }

                    accepted = listener.accept(), if next_client.is_none() => match accepted {
                        Ok((other, other_peer)) => match self.config.concurrent_clients {
                            // Peer already closed; only the timeout keeps the session.
                            _ if peer_gone.is_cancelled() => {
                                tracing::info!(peer = %other_peer, "clearing stale session");
                                stop.cancel();
                                next_client = Some((other, other_peer));
                            }
                            ConcurrentClientPolicy::Reject => {
                                tracing::warn!(peer = %other_peer, "rejecting client: session already active");
                                drop(other);
                            }
                            ConcurrentClientPolicy::Preempt => {
                                tracing::info!(peer = %other_peer, "replacing active session");
                                stop.cancel();
                                next_client = Some((other, other_peer));
                            }
                        },
                        Err(e) => tracing::error!("accept error: {e}"),
                    },
                }
            }
        }

        *self.session_stop.lock().await = None;
        next_client
    }
}

/// Formats an IP for use in a `ws://` URL.
fn location_host(ip: IpAddr) -> String {
    match ip {
        IpAddr::V4(v4) => v4.to_string(),
        IpAddr::V6(v6) => format!("[{v6}]"),
    }
}
