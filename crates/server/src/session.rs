//! One client connection: request validation, handshake, then the frame
//! read/dispatch loop until the stream ends.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use futures_util::StreamExt;
use hixie_protocol::{
    Frame, FrameCodec, HandshakeOutcome, ProtocolError, analyze_request, handshake_response,
    header_end, request_target,
};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use crate::action::{ActionRegistry, Responder};
use crate::server::ServerConfig;
use crate::{REQUEST_IDLE_GAP, ServerError};

/// Connection lifecycle, as published by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No client.
    Idle,
    /// Client connected, upgrade request being read.
    Validating,
    /// Handshake sent, frame loop running.
    Streaming,
}

/// When a frame pass that has outlived its deadline tears the session down.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutPolicy {
    /// Deadline passed *and* the transport reports the peer gone.
    /// A silent peer that keeps the socket open is never timed out.
    #[default]
    ElapsedAndDisconnected,
    /// Deadline passed, regardless of the transport.
    ElapsedOnly,
}

impl TimeoutPolicy {
    pub fn should_disconnect(self, elapsed: bool, connected: bool) -> bool {
        match self {
            Self::ElapsedAndDisconnected => elapsed && !connected,
            Self::ElapsedOnly => elapsed,
        }
    }
}

enum ReadEvent {
    Frame(Frame),
    Closed,
    DeadlinePassed,
    Stopped,
    Failed(ProtocolError),
}

/// The single active client connection.
///
/// Owns the transport exclusively. [`disconnect`](Self::disconnect) is the
/// only teardown path and is safe to call any number of times.
pub struct Session<S> {
    io: Option<Framed<S, FrameCodec>>,
    peer: Option<SocketAddr>,
    config: Arc<ServerConfig>,
    host: String,
    port: u16,
    state: SessionState,
    state_tx: Option<watch::Sender<SessionState>>,
    reading: bool,
    connected: bool,
    last_activity: Instant,
    stop: CancellationToken,
    peer_gone: CancellationToken,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wraps a freshly accepted stream.
    ///
    /// `host` and `port` are advertised in the handshake's
    /// `WebSocket-Location` header.
    pub fn new(stream: S, config: Arc<ServerConfig>, host: impl Into<String>, port: u16) -> Self {
        let codec = FrameCodec::with_max_frame_len(config.max_frame_len);
        Self {
            io: Some(Framed::new(stream, codec)),
            peer: None,
            config,
            host: host.into(),
            port,
            state: SessionState::Validating,
            state_tx: None,
            reading: false,
            connected: true,
            last_activity: Instant::now(),
            stop: CancellationToken::new(),
            peer_gone: CancellationToken::new(),
        }
    }

    pub fn with_peer(mut self, peer: SocketAddr) -> Self {
        self.peer = Some(peer);
        self
    }

    /// Replaces the stop signal, e.g. with a child of a server-wide token.
    pub fn with_stop_token(mut self, stop: CancellationToken) -> Self {
        self.stop = stop;
        self
    }

    /// Publishes every state change to `tx`, starting with the current one.
    pub fn with_state_sender(mut self, tx: watch::Sender<SessionState>) -> Self {
        tx.send_replace(self.state);
        self.state_tx = Some(tx);
        self
    }

    /// Token that ends the stream when cancelled.
    pub fn stop_handle(&self) -> CancellationToken {
        self.stop.clone()
    }

    /// Token cancelled once the transport is known to be gone, whether by
    /// end-of-stream, a failed write or teardown.
    pub fn peer_gone_handle(&self) -> CancellationToken {
        self.peer_gone.clone()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_reading(&self) -> bool {
        self.reading
    }

    pub fn is_connected(&self) -> bool {
        self.connected && self.io.is_some()
    }

    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Validates the request and, if it passes, streams until the session ends.
    pub async fn run(&mut self, registry: &ActionRegistry) -> Result<(), ServerError> {
        match self.validate().await {
            Ok(HandshakeOutcome::Upgrade) => self.stream(registry).await,
            Ok(HandshakeOutcome::NotWebSocket) => {
                self.disconnect().await;
                Ok(())
            }
            Err(e) => {
                self.disconnect().await;
                Err(e)
            }
        }
    }

    /// Reads the client's request and answers it if it is an upgrade.
    ///
    /// On [`HandshakeOutcome::NotWebSocket`] nothing is written; the caller
    /// is expected to disconnect.
    pub async fn validate(&mut self) -> Result<HandshakeOutcome, ServerError> {
        self.set_state(SessionState::Validating);
        let Some(request) = self.read_request().await? else {
            tracing::debug!(peer = ?self.peer, "stopped while reading request");
            return Ok(HandshakeOutcome::NotWebSocket);
        };

        let head_len = header_end(&request).unwrap_or(request.len());
        let (head, rest) = request.split_at(head_len);
        tracing::debug!(peer = ?self.peer, len = request.len(), "request received");

        if let Some(path) = request_target(head) {
            if !path.starts_with(self.config.url_prefix.as_str()) {
                tracing::debug!(
                    path,
                    prefix = %self.config.url_prefix,
                    "request path outside url prefix (not enforced)"
                );
            }
        }

        let outcome = analyze_request(&request);
        if outcome == HandshakeOutcome::NotWebSocket {
            tracing::info!(peer = ?self.peer, "not a websocket upgrade request");
            return Ok(outcome);
        }

        let response = handshake_response(&self.host, self.port);
        let Some(framed) = self.io.as_mut() else {
            return Ok(HandshakeOutcome::NotWebSocket);
        };
        let stream = framed.get_mut();
        stream.write_all(response.as_bytes()).await?;
        stream.flush().await?;

        // Frames sent right behind the request head.
        if !rest.is_empty() {
            if let Some(framed) = self.io.take() {
                let mut parts = framed.into_parts();
                parts.read_buf.extend_from_slice(rest);
                self.io = Some(Framed::from_parts(parts));
            }
        }

        self.reading = true;
        self.set_state(SessionState::Streaming);
        self.last_activity = Instant::now();
        tracing::info!(peer = ?self.peer, "handshake complete, streaming");
        Ok(outcome)
    }

    /// Reads until the request head is complete or no more bytes arrive.
    ///
    /// Returns `None` if the stop signal fired first.
    async fn read_request(&mut self) -> Result<Option<BytesMut>, ServerError> {
        let max = self.config.max_request_len;
        let first_wait = self.config.handshake_timeout;
        let stop = self.stop.clone();
        let Some(framed) = self.io.as_mut() else {
            return Ok(None);
        };
        let stream = framed.get_mut();

        let mut buf = BytesMut::with_capacity(512);
        loop {
            let wait = if buf.is_empty() {
                first_wait
            } else {
                REQUEST_IDLE_GAP
            };
            let read = tokio::select! {
                biased;
                _ = stop.cancelled() => return Ok(None),
                read = tokio::time::timeout(wait, stream.read_buf(&mut buf)) => read,
            };
            match read {
                Ok(Ok(0)) => {
                    self.mark_peer_gone();
                    break;
                }
                Ok(Ok(_)) => {
                    if header_end(&buf).is_some() || buf.len() >= max {
                        break;
                    }
                }
                Ok(Err(e)) => return Err(e.into()),
                // Nothing more right now.
                Err(_) => break,
            }
        }
        Ok(Some(buf))
    }

    /// Runs the frame loop until the reading flag clears, then tears down.
    pub async fn stream(&mut self, registry: &ActionRegistry) -> Result<(), ServerError> {
        let result = self.stream_frames(registry).await;
        if let Err(e) = &result {
            tracing::warn!(peer = ?self.peer, "stream aborted: {e}");
        }
        self.disconnect().await;
        result
    }

    async fn stream_frames(&mut self, registry: &ActionRegistry) -> Result<(), ServerError> {
        while self.reading {
            let deadline = Instant::now() + self.config.timeout;
            match self.next_frame(deadline).await? {
                Some(frame) => self.dispatch(registry, &frame).await,
                None => break,
            }
        }
        Ok(())
    }

    /// Waits for the next complete frame, applying the timeout policy.
    ///
    /// `None` means the session must end.
    async fn next_frame(&mut self, deadline: Instant) -> Result<Option<Frame>, ServerError> {
        loop {
            if !self.reading {
                return Ok(None);
            }

            let elapsed = Instant::now() >= deadline;
            if self
                .config
                .timeout_policy
                .should_disconnect(elapsed, self.connected)
            {
                tracing::info!(peer = ?self.peer, "connection timed out");
                return Ok(None);
            }

            let stop = self.stop.clone();
            let event = if !self.connected {
                // Nothing more can arrive; sit out the deadline.
                tokio::select! {
                    biased;
                    _ = stop.cancelled() => ReadEvent::Stopped,
                    _ = tokio::time::sleep_until(deadline) => ReadEvent::DeadlinePassed,
                }
            } else {
                let Some(framed) = self.io.as_mut() else {
                    return Ok(None);
                };
                let wait = (!elapsed).then_some(deadline);
                tokio::select! {
                    biased;
                    _ = stop.cancelled() => ReadEvent::Stopped,
                    event = read_event(framed, wait) => event,
                }
            };

            match event {
                ReadEvent::Frame(frame) => return Ok(Some(frame)),
                ReadEvent::Closed => {
                    tracing::debug!(peer = ?self.peer, "peer closed the connection");
                    self.mark_peer_gone();
                }
                ReadEvent::DeadlinePassed => {}
                ReadEvent::Stopped => {
                    tracing::debug!(peer = ?self.peer, "stream stopped");
                    self.reading = false;
                }
                ReadEvent::Failed(e) => return Err(e.into()),
            }
        }
    }

    async fn dispatch(&mut self, registry: &ActionRegistry, frame: &Frame) {
        self.last_activity = Instant::now();
        tracing::debug!(peer = ?self.peer, len = frame.len(), "frame received");

        let mut out = BytesMut::new();
        let mut responder = Responder::new(&mut out, self.peer);
        registry.dispatch_all(&mut responder, frame);
        if responder.disconnect_requested() {
            tracing::debug!(peer = ?self.peer, "action requested disconnect");
            self.reading = false;
        }

        if !out.is_empty() {
            self.send_raw(&out).await;
        }
    }

    async fn send_raw(&mut self, bytes: &[u8]) {
        if !self.connected {
            tracing::debug!(peer = ?self.peer, "peer gone, dropping {} bytes", bytes.len());
            return;
        }
        let Some(framed) = self.io.as_mut() else {
            return;
        };
        let stream = framed.get_mut();
        let result = async {
            stream.write_all(bytes).await?;
            stream.flush().await
        }
        .await;
        if let Err(e) = result {
            tracing::warn!(peer = ?self.peer, "write failed: {e}");
            self.mark_peer_gone();
        }
    }

    fn mark_peer_gone(&mut self) {
        self.connected = false;
        self.peer_gone.cancel();
    }

    fn set_state(&mut self, state: SessionState) {
        self.state = state;
        if let Some(tx) = &self.state_tx {
            tx.send_replace(state);
        }
    }

    /// Flushes and closes the transport and clears the reading flag.
    pub async fn disconnect(&mut self) {
        self.reading = false;
        self.set_state(SessionState::Idle);
        let Some(framed) = self.io.take() else {
            return;
        };
        let mut stream = framed.into_inner();
        if let Err(e) = stream.flush().await {
            tracing::debug!(peer = ?self.peer, "flush on disconnect failed: {e}");
        }
        if let Err(e) = stream.shutdown().await {
            tracing::debug!(peer = ?self.peer, "shutdown on disconnect failed: {e}");
        }
        self.mark_peer_gone();
        tracing::info!(peer = ?self.peer, "client disconnected");
    }
}

async fn read_event<S>(framed: &mut Framed<S, FrameCodec>, deadline: Option<Instant>) -> ReadEvent
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let next = match deadline {
        Some(deadline) => match tokio::time::timeout_at(deadline, framed.next()).await {
            Ok(next) => next,
            Err(_) => return ReadEvent::DeadlinePassed,
        },
        None => framed.next().await,
    };
    match next {
        Some(Ok(frame)) => ReadEvent::Frame(frame),
        Some(Err(e)) => ReadEvent::Failed(e),
        None => ReadEvent::Closed,
    }
}
