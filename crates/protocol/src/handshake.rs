//! Upgrade detection and the hixie-75 handshake reply.
//!
//! The draft has no key challenge: once the request carries
//! `Upgrade: WebSocket`, the server answers with a fixed block of headers.
//!
//! ```text
//! HTTP/1.1 101 Web Socket Protocol Handshake\r\n
//! Upgrade: WebSocket\r\n
//! Connection: Upgrade\r\n
//! WebSocket-Origin: file://\r\n
//! WebSocket-Location: ws://<host>:<port>/\r\n
//! \r\n
//! ```

/// Header text whose presence marks an upgrade request. Case-sensitive.
pub const UPGRADE_SIGNAL: &str = "Upgrade: WebSocket";

/// Origin advertised in the handshake reply.
pub const HANDSHAKE_ORIGIN: &str = "file://";

/// Blank line that ends an HTTP request head.
pub const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

const CRLF: &str = "\r\n";

/// Result of inspecting a raw request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeOutcome {
    /// The request asked for an upgrade; the session proceeds to streaming.
    Upgrade,
    /// Anything else. The caller disconnects without replying.
    NotWebSocket,
}

impl HandshakeOutcome {
    pub fn is_upgrade(self) -> bool {
        self == Self::Upgrade
    }
}

/// Decides whether `request` is a WebSocket upgrade request.
///
/// Plain substring match on [`UPGRADE_SIGNAL`]. Method, path and header
/// order are not checked.
pub fn analyze_request(request: &[u8]) -> HandshakeOutcome {
    if contains(request, UPGRADE_SIGNAL.as_bytes()) {
        HandshakeOutcome::Upgrade
    } else {
        HandshakeOutcome::NotWebSocket
    }
}

/// Builds the handshake reply for a server reachable at `host:port`.
pub fn handshake_response(host: &str, port: u16) -> String {
    let mut out = String::with_capacity(160 + host.len());
    out.push_str("HTTP/1.1 101 Web Socket Protocol Handshake");
    out.push_str(CRLF);
    out.push_str(UPGRADE_SIGNAL);
    out.push_str(CRLF);
    out.push_str("Connection: Upgrade");
    out.push_str(CRLF);
    out.push_str("WebSocket-Origin: ");
    out.push_str(HANDSHAKE_ORIGIN);
    out.push_str(CRLF);
    out.push_str(&format!("WebSocket-Location: ws://{host}:{port}/"));
    out.push_str(CRLF);
    out.push_str(CRLF);
    out
}

/// Returns the offset just past the blank line ending the request head.
pub fn header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(HEADER_TERMINATOR.len())
        .position(|w| w == HEADER_TERMINATOR)
        .map(|pos| pos + HEADER_TERMINATOR.len())
}

/// Extracts the target path from the request line (`GET /path HTTP/1.1`).
pub fn request_target(request: &[u8]) -> Option<&str> {
    let line_end = request
        .windows(2)
        .position(|w| w == CRLF.as_bytes())
        .unwrap_or(request.len());
    let line = std::str::from_utf8(&request[..line_end]).ok()?;
    let mut parts = line.split(' ');
    let _method = parts.next()?;
    parts.next().filter(|target| !target.is_empty())
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    const UPGRADE_REQUEST: &[u8] = b"GET /demo HTTP/1.1\r\n\
        Upgrade: WebSocket\r\n\
        Connection: Upgrade\r\n\
        Host: example.com\r\n\
        Origin: http://example.com\r\n\
        \r\n";

    #[test]
    fn upgrade_request_detected() {
        assert_eq!(analyze_request(UPGRADE_REQUEST), HandshakeOutcome::Upgrade);
    }

    #[test]
    fn signal_anywhere_in_buffer_is_enough() {
        assert!(analyze_request(b"garbage Upgrade: WebSocket garbage").is_upgrade());
        assert!(analyze_request(b"POST /x HTTP/1.0\r\nUpgrade: WebSocket\r\n").is_upgrade());
    }

    #[test]
    fn plain_get_rejected() {
        let request = b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n";
        assert_eq!(analyze_request(request), HandshakeOutcome::NotWebSocket);
    }

    #[test]
    fn match_is_case_sensitive() {
        assert!(!analyze_request(b"GET / HTTP/1.1\r\nUpgrade: websocket\r\n\r\n").is_upgrade());
        assert!(!analyze_request(b"GET / HTTP/1.1\r\nupgrade: WebSocket\r\n\r\n").is_upgrade());
    }

    #[test]
    fn empty_request_rejected() {
        assert!(!analyze_request(b"").is_upgrade());
    }

    #[test]
    fn response_is_byte_exact() {
        let expected = "HTTP/1.1 101 Web Socket Protocol Handshake\r\n\
            Upgrade: WebSocket\r\n\
            Connection: Upgrade\r\n\
            WebSocket-Origin: file://\r\n\
            WebSocket-Location: ws://192.168.1.170:8080/\r\n\
            \r\n";
        assert_eq!(handshake_response("192.168.1.170", 8080), expected);
    }

    #[test]
    fn header_end_offsets() {
        assert_eq!(header_end(UPGRADE_REQUEST), Some(UPGRADE_REQUEST.len()));
        assert_eq!(header_end(b"GET / HTTP/1.1\r\nHost: x\r\n"), None);

        let mut with_frame = UPGRADE_REQUEST.to_vec();
        with_frame.extend_from_slice(b"\x00hi\xFF");
        assert_eq!(header_end(&with_frame), Some(UPGRADE_REQUEST.len()));
    }

    #[test]
    fn request_target_from_request_line() {
        assert_eq!(request_target(UPGRADE_REQUEST), Some("/demo"));
        assert_eq!(request_target(b"GET"), None);
        assert_eq!(request_target(b""), None);
    }
}
