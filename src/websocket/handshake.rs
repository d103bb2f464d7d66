//! WebSocket opening handshake (RFC6455 section 1.3).

use base64::prelude::*;
use sha1::{Digest, Sha1};

use crate::http::header::HttpMessage;
use crate::http::response::Status;

/// Magic GUID appended to the client key.
pub const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// `base64(sha1(key + GUID))`.
pub fn accept_key(key: &str) -> String {
    let mut sha1 = Sha1::new();
    sha1.update(key.trim().as_bytes());
    sha1.update(WEBSOCKET_GUID.as_bytes());
    let digest = sha1.finalize();
    BASE64_STANDARD.encode(&digest[..])
}

/// Whether a request head asks for a WebSocket upgrade.
pub fn is_upgrade_request(request: &HttpMessage) -> bool {
    let upgrade = request
        .get_ignore_case("Upgrade")
        .is_some_and(|value| value.eq_ignore_ascii_case("websocket"));
    upgrade && request.get_ignore_case("Sec-WebSocket-Key").is_some()
}

/// The `101 Switching Protocols` response head.
pub fn handshake_response(key: &str) -> HttpMessage {
    let mut response = HttpMessage::new();
    response.set_status(Status::SWITCHING_PROTOCOLS);
    response.set("Connection", "Upgrade");
    response.set("Upgrade", "websocket");
    response.set("Sec-WebSocket-Accept", accept_key(key));
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rfc6455_accept_vector() {
        assert_eq!(
            accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn response_head() {
        let text = handshake_response("dGhlIHNhbXBsZSBub25jZQ==").serialize();
        assert_eq!(
            text,
            "HTTP/1.1 101 Switching Protocols\r\n\
             Connection: Upgrade\r\n\
             Upgrade: websocket\r\n\
             Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"
        );
    }

    #[test]
    fn detects_upgrade_requests() {
        let request = HttpMessage::parse(
            "GET /chat HTTP/1.1\r\nupgrade: WebSocket\r\nSec-WebSocket-Key: abc\r\n",
        );
        assert!(is_upgrade_request(&request));

        let plain = HttpMessage::parse("GET /chat HTTP/1.1\r\nHost: x\r\n");
        assert!(!is_upgrade_request(&plain));
    }
}
