fn main() {
    println!("Run `cargo test -p wire-compat` to execute wire compatibility tests.");
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::net::{IpAddr, Ipv4Addr};
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::time::Duration;

    use hixie_protocol::{FRAME_END, FRAME_START};
    use hixie_server::{ActionRegistry, ServerConfig, WebSocketServer};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio::task::JoinHandle;

    const WAIT: Duration = Duration::from_secs(5);

    /// Returns the path to the fixtures directory.
    fn fixtures_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures")
    }

    /// Loads a captured request verbatim.
    fn load_fixture(name: &str) -> Vec<u8> {
        let path = fixtures_dir().join(name);
        fs::read(&path).unwrap_or_else(|e| panic!("failed to read fixture {}: {e}", path.display()))
    }

    /// The reply a hixie-75 client expects, spelled out literally.
    fn expected_handshake(port: u16) -> String {
        format!(
            "HTTP/1.1 101 Web Socket Protocol Handshake\r\n\
             Upgrade: WebSocket\r\n\
             Connection: Upgrade\r\n\
             WebSocket-Origin: file://\r\n\
             WebSocket-Location: ws://127.0.0.1:{port}/\r\n\
             \r\n"
        )
    }

    /// Starts an echo server on an OS-assigned loopback port.
    async fn start_echo() -> (Arc<WebSocketServer>, JoinHandle<()>, u16) {
        let mut actions = ActionRegistry::new();
        actions
            .register_fn(|session, frame| session.write(&frame.text()))
            .unwrap();

        let config = ServerConfig {
            port: 0,
            bind_addr: IpAddr::V4(Ipv4Addr::LOCALHOST),
            ..ServerConfig::default()
        };
        let server = WebSocketServer::new(config, actions);
        let runner = Arc::clone(&server);
        let handle = tokio::spawn(async move {
            runner.run().await.unwrap();
        });

        for _ in 0..100 {
            let port = server.port().await;
            if port > 0 {
                return (server, handle, port);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("server did not bind");
    }

    async fn read_n(client: &mut TcpStream, n: usize) -> Vec<u8> {
        let mut buf = vec![0u8; n];
        tokio::time::timeout(WAIT, client.read_exact(&mut buf))
            .await
            .expect("read timed out")
            .unwrap();
        buf
    }

    /// Opens a client and completes the handshake from the fixture request.
    async fn open(port: u16) -> TcpStream {
        let mut client = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        client
            .write_all(&load_fixture("hixie75_request.http"))
            .await
            .unwrap();
        let expected = expected_handshake(port);
        let reply = read_n(&mut client, expected.len()).await;
        assert_eq!(String::from_utf8(reply).unwrap(), expected);
        client
    }

    #[tokio::test]
    async fn fixture_request_gets_exact_handshake() {
        let (server, handle, port) = start_echo().await;
        let _client = open(port).await;

        server.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn rfc6455_client_is_not_upgraded() {
        let (server, handle, port) = start_echo().await;

        let mut client = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        client
            .write_all(&load_fixture("rfc6455_request.http"))
            .await
            .unwrap();

        let mut reply = Vec::new();
        let _ = tokio::time::timeout(WAIT, client.read_to_end(&mut reply))
            .await
            .expect("connection was not closed");
        assert!(reply.is_empty(), "no handshake bytes expected");

        server.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn outgoing_frames_are_bracketed() {
        let (server, handle, port) = start_echo().await;
        let mut client = open(port).await;

        client.write_all(b"\x00abc\xFF").await.unwrap();
        let reply = read_n(&mut client, 5).await;
        assert_eq!(reply[0], FRAME_START);
        assert_eq!(&reply[1..4], b"abc");
        assert_eq!(reply[4], FRAME_END);

        server.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn incoming_frames_split_on_terminator_only() {
        let (server, handle, port) = start_echo().await;
        let mut client = open(port).await;

        // No start markers: only 0xFF delimits.
        client.write_all(b"AB\xFFCD\xFF").await.unwrap();
        assert_eq!(read_n(&mut client, 8).await, b"\x00AB\xFF\x00CD\xFF");

        server.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn frame_dribbled_byte_by_byte() {
        let (server, handle, port) = start_echo().await;
        let mut client = open(port).await;

        for byte in b"\x00slow\xFF" {
            client.write_all(&[*byte]).await.unwrap();
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(read_n(&mut client, 6).await, b"\x00slow\xFF");

        server.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn utf8_text_survives_round_trip() {
        let (server, handle, port) = start_echo().await;
        let mut client = open(port).await;

        let text = "temp=21.5°C ✓";
        let mut frame = vec![FRAME_START];
        frame.extend_from_slice(text.as_bytes());
        frame.push(FRAME_END);
        client.write_all(&frame).await.unwrap();

        assert_eq!(read_n(&mut client, frame.len()).await, frame);

        server.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn empty_frame_is_echoed() {
        let (server, handle, port) = start_echo().await;
        let mut client = open(port).await;

        client.write_all(&[FRAME_START, FRAME_END]).await.unwrap();
        assert_eq!(read_n(&mut client, 2).await, [FRAME_START, FRAME_END]);

        server.shutdown();
        handle.await.unwrap();
    }
}
