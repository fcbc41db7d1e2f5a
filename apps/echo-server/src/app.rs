//! Wires the sample actions into the server and runs it until Ctrl-C.

use std::sync::Arc;

use hixie_server::{Action, ActionRegistry, Frame, Responder, WebSocketServer};

use crate::config::Config;

/// Text that makes the server end the session.
pub const BYE_COMMAND: &str = "bye";

/// Logs every frame the client sends.
struct FrameLogger;

impl Action for FrameLogger {
    fn on_frame(&self, session: &mut Responder<'_>, frame: &Frame) {
        tracing::info!(
            peer = ?session.peer_addr(),
            len = frame.len(),
            text = %frame.text(),
            "frame"
        );
    }
}

fn echo(session: &mut Responder<'_>, frame: &Frame) {
    session.write(&frame.text());
}

fn bye(session: &mut Responder<'_>, frame: &Frame) {
    if frame.text().trim() == BYE_COMMAND {
        session.write("goodbye");
        session.disconnect();
    }
}

/// Builds the action registry in dispatch order.
pub fn build_actions(capacity: usize) -> ActionRegistry {
    let mut actions = ActionRegistry::with_capacity(capacity);
    let registered = [
        actions.register(FrameLogger),
        actions.register_fn(echo),
        actions.register_fn(bye),
    ];
    let dropped = registered.iter().filter(|r| r.is_err()).count();
    if dropped > 0 {
        tracing::warn!(dropped, capacity, "some actions did not fit in the registry");
    }
    actions
}

/// Runs the endpoint until Ctrl-C.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let actions = build_actions(config.action_capacity);
    let server = WebSocketServer::new(config.server_config(), actions);

    let runner = Arc::clone(&server);
    let mut handle = tokio::spawn(async move { runner.run().await });

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            tracing::info!("interrupt received");
            server.shutdown();
        }
        result = &mut handle => {
            result??;
            return Ok(());
        }
    }

    handle.await??;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hixie_server::{ServerConfig, SessionState};
    use std::net::{IpAddr, Ipv4Addr};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    #[test]
    fn actions_registered_in_order() {
        assert_eq!(build_actions(5).len(), 3);
    }

    #[test]
    fn small_capacity_drops_trailing_actions() {
        let actions = build_actions(2);
        assert_eq!(actions.len(), 2);
        assert_eq!(actions.capacity(), 2);
    }

    #[tokio::test]
    async fn echo_then_bye() {
        let config = ServerConfig {
            port: 0,
            bind_addr: IpAddr::V4(Ipv4Addr::LOCALHOST),
            ..ServerConfig::default()
        };
        let server = WebSocketServer::new(config, build_actions(5));
        let runner = Arc::clone(&server);
        let handle = tokio::spawn(async move { runner.run().await.unwrap() });

        let mut port = 0;
        for _ in 0..100 {
            port = server.port().await;
            if port > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let mut client = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        client
            .write_all(b"GET / HTTP/1.1\r\nUpgrade: WebSocket\r\nConnection: Upgrade\r\n\r\n")
            .await
            .unwrap();
        client.write_all(b"\x00hi\xFF\x00bye\xFF").await.unwrap();

        let mut received = Vec::new();
        tokio::time::timeout(Duration::from_secs(5), client.read_to_end(&mut received))
            .await
            .unwrap()
            .unwrap();

        let text = String::from_utf8_lossy(&received);
        assert!(text.starts_with("HTTP/1.1 101 Web Socket Protocol Handshake\r\n"));
        assert!(received.ends_with(b"\x00hi\xFF\x00bye\xFF\x00goodbye\xFF"));

        let mut state = server.subscribe_state();
        tokio::time::timeout(
            Duration::from_secs(5),
            state.wait_for(|s| *s == SessionState::Idle),
        )
        .await
        .unwrap()
        .unwrap();

        server.shutdown();
        handle.await.unwrap();
    }
}
