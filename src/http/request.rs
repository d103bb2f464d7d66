//! Request reading and inspection.
//!
//! # Responsibilities
//! - Read a request head off the socket, across as many reads as it takes
//! - Enforce the head and body size limits before buffering past them
//! - Expose path, query, cookies, body and negotiated languages
//!
//! # Design Decisions
//! - Bytes read past the end of the request are returned to the caller so a
//!   WebSocket decoder can pick them up
//! - Only `Content-Length` bodies are supported; chunked uploads are rejected

use std::collections::HashMap;
use std::net::SocketAddr;

use tokio::io::{AsyncRead, AsyncReadExt};
use url::form_urlencoded;

use crate::http::header::{HttpMessage, StartLine};
use crate::net::connection::ConnectionError;
use crate::routing::router::split_segments;

const HEAD_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Size limits applied while reading a request.
#[derive(Debug, Clone, Copy)]
pub struct RequestLimits {
    pub max_header_bytes: usize,
    pub max_body_bytes: usize,
    pub read_buffer_bytes: usize,
}

/// A parsed HTTP request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    head: HttpMessage,
    method: String,
    target: String,
    version: String,
    query: HashMap<String, String>,
    body: Vec<u8>,
    peer: Option<SocketAddr>,
}

impl HttpRequest {
    /// Build a request from an already parsed head.
    ///
    /// Fails when the head carries no request line.
    pub fn from_head(head: HttpMessage, body: Vec<u8>) -> Result<Self, ConnectionError> {
        let Some(StartLine::Request {
            method,
            resource,
            version,
        }) = head.start_line().cloned()
        else {
            return Err(ConnectionError::Malformed("missing request line"));
        };

        let query = resource
            .split_once('?')
            .map(|(_, q)| form_urlencoded::parse(q.as_bytes()).into_owned().collect())
            .unwrap_or_default();

        Ok(Self {
            head,
            method,
            target: resource,
            version,
            query,
            body,
            peer: None,
        })
    }

    /// Parse a complete request from memory.
    pub fn parse(raw: &[u8]) -> Result<Self, ConnectionError> {
        let (head, body) = match find_terminator(raw, 0) {
            Some(end) => (&raw[..end], &raw[end + HEAD_TERMINATOR.len()..]),
            None => (raw, &[][..]),
        };
        Self::from_head(HttpMessage::parse(&String::from_utf8_lossy(head)), body.to_vec())
    }

    pub fn with_peer(mut self, peer: SocketAddr) -> Self {
        self.peer = Some(peer);
        self
    }

    pub fn head(&self) -> &HttpMessage {
        &self.head
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// Request target as sent, including any query string.
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Target without the query string.
    pub fn path(&self) -> &str {
        self.target.split(['?', '#']).next().unwrap_or("/")
    }

    pub fn segments(&self) -> Vec<&str> {
        split_segments(&self.target)
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Header value, matched case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.head.get_ignore_case(name)
    }

    pub fn query(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }

    pub fn isset_query(&self, name: &str) -> bool {
        self.query.contains_key(name)
    }

    pub fn query_map(&self) -> &HashMap<String, String> {
        &self.query
    }

    pub fn cookie(&self, name: &str) -> Option<String> {
        self.head.cookie(name)
    }

    pub fn isset_cookie(&self, name: &str) -> bool {
        self.head.isset_cookie(name)
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn body_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    /// `Accept-Language` tags in preference order.
    ///
    /// Entries keep the order sent; an explicit `q=0` drops a tag.
    pub fn languages(&self) -> Vec<String> {
        let Some(header) = self.header("Accept-Language") else {
            return Vec::new();
        };

        let mut weighted: Vec<(String, f32)> = header
            .split(',')
            .filter_map(|entry| {
                let mut parts = entry.split(';');
                let tag = parts.next()?.trim();
                if tag.is_empty() {
                    return None;
                }
                let quality = parts
                    .find_map(|p| p.trim().strip_prefix("q="))
                    .and_then(|q| q.trim().parse::<f32>().ok())
                    .unwrap_or(1.0);
                Some((tag.to_string(), quality))
            })
            .filter(|(_, q)| *q > 0.0)
            .collect();

        // Stable, so equal weights keep header order.
        weighted.sort_by(|a, b| b.1.total_cmp(&a.1));
        weighted.into_iter().map(|(tag, _)| tag).collect()
    }

    pub fn default_language(&self) -> Option<String> {
        self.languages().into_iter().next()
    }
}

/// Read one request from `reader`.
///
/// Returns the request and any bytes that arrived after it.
pub async fn read_request<R>(
    reader: &mut R,
    limits: RequestLimits,
) -> Result<(HttpRequest, Vec<u8>), ConnectionError>
where
    R: AsyncRead + Unpin,
{
    let mut buffer: Vec<u8> = Vec::with_capacity(limits.read_buffer_bytes.min(8192));
    let mut chunk = vec![0u8; limits.read_buffer_bytes.max(1)];

    let head_end = loop {
        let searched = buffer.len().saturating_sub(HEAD_TERMINATOR.len() - 1);
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Err(if buffer.is_empty() {
                ConnectionError::PeerClosed
            } else {
                ConnectionError::Malformed("connection closed inside request head")
            });
        }
        buffer.extend_from_slice(&chunk[..n]);

        if let Some(end) = find_terminator(&buffer, searched) {
            if end > limits.max_header_bytes {
                return Err(ConnectionError::HeadTooLarge {
                    limit: limits.max_header_bytes,
                });
            }
            break end;
        }
        if buffer.len() > limits.max_header_bytes {
            return Err(ConnectionError::HeadTooLarge {
                limit: limits.max_header_bytes,
            });
        }
    };

    let head = HttpMessage::parse(&String::from_utf8_lossy(&buffer[..head_end]));
    let mut rest = buffer.split_off(head_end + HEAD_TERMINATOR.len());

    if head
        .get_ignore_case("Transfer-Encoding")
        .is_some_and(|v| v.eq_ignore_ascii_case("chunked"))
    {
        return Err(ConnectionError::Malformed("chunked bodies are not supported"));
    }

    let content_length = match head.get_ignore_case("Content-Length") {
        Some(value) => value
            .parse::<usize>()
            .map_err(|_| ConnectionError::Malformed("invalid Content-Length"))?,
        None => 0,
    };
    if content_length > limits.max_body_bytes {
        return Err(ConnectionError::BodyTooLarge {
            limit: limits.max_body_bytes,
        });
    }

    while rest.len() < content_length {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Err(ConnectionError::Malformed("connection closed inside request body"));
        }
        rest.extend_from_slice(&chunk[..n]);
    }
    let leftover = rest.split_off(content_length);

    Ok((HttpRequest::from_head(head, rest)?, leftover))
}

fn find_terminator(buffer: &[u8], from: usize) -> Option<usize> {
    buffer
        .get(from..)?
        .windows(HEAD_TERMINATOR.len())
        .position(|w| w == HEAD_TERMINATOR)
        .map(|p| p + from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    fn limits() -> RequestLimits {
        RequestLimits {
            max_header_bytes: 1024,
            max_body_bytes: 16,
            read_buffer_bytes: 7,
        }
    }

    #[tokio::test]
    async fn reads_head_and_body_across_small_reads() {
        let raw = b"POST /form?a=1&b=two%20words HTTP/1.1\r\nHost: x\r\nContent-Length: 5\r\n\r\nhelloEXTRA";
        let mut reader = &raw[..];

        let (request, leftover) = read_request(&mut reader, limits()).await.unwrap();
        assert_eq!(request.method(), "POST");
        assert_eq!(request.path(), "/form");
        assert_eq!(request.query("b"), Some("two words"));
        assert_eq!(request.body(), b"hello");
        assert_eq!(leftover, b"EXTRA");
    }

    #[tokio::test]
    async fn body_arriving_later_is_awaited() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let reader = tokio::spawn(async move { read_request(&mut server, limits()).await });

        client
            .write_all(b"POST / HTTP/1.1\r\nContent-Length: 4\r\n\r\nab")
            .await
            .unwrap();
        tokio::task::yield_now().await;
        client.write_all(b"cd").await.unwrap();

        let (request, leftover) = reader.await.unwrap().unwrap();
        assert_eq!(request.body(), b"abcd");
        assert!(leftover.is_empty());
    }

    #[tokio::test]
    async fn enforces_limits() {
        let oversized_head = format!("GET / HTTP/1.1\r\nX-Fill: {}\r\n\r\n", "a".repeat(2048));
        let mut reader = oversized_head.as_bytes();
        assert!(matches!(
            read_request(&mut reader, limits()).await,
            Err(ConnectionError::HeadTooLarge { limit: 1024 })
        ));

        let mut reader = &b"POST / HTTP/1.1\r\nContent-Length: 17\r\n\r\n"[..];
        assert!(matches!(
            read_request(&mut reader, limits()).await,
            Err(ConnectionError::BodyTooLarge { limit: 16 })
        ));
    }

    #[tokio::test]
    async fn rejects_truncated_or_lineless_requests() {
        let mut empty = &b""[..];
        assert!(matches!(
            read_request(&mut empty, limits()).await,
            Err(ConnectionError::PeerClosed)
        ));

        let mut truncated = &b"GET / HTTP/1.1\r\nHost"[..];
        assert!(matches!(
            read_request(&mut truncated, limits()).await,
            Err(ConnectionError::Malformed(_))
        ));

        let mut no_line = &b"Host: x\r\n\r\n"[..];
        assert!(matches!(
            read_request(&mut no_line, limits()).await,
            Err(ConnectionError::Malformed(_))
        ));
    }

    #[test]
    fn languages_follow_quality_then_order() {
        let request = HttpRequest::parse(
            b"GET / HTTP/1.1\r\nAccept-Language: de;q=0.5, en-US, fr;q=0.8, xx;q=0\r\n\r\n",
        )
        .unwrap();

        assert_eq!(request.languages(), vec!["en-US", "fr", "de"]);
        assert_eq!(request.default_language().as_deref(), Some("en-US"));
    }

    #[test]
    fn exposes_segments_and_cookies() {
        let request = HttpRequest::parse(
            b"GET /@isset/cookie/Theme?x=1 HTTP/1.1\r\nCookie: Theme=dark%20blue; lang=en\r\n\r\n",
        )
        .unwrap();

        assert_eq!(request.segments(), vec!["@isset", "cookie", "Theme"]);
        assert_eq!(request.cookie("Theme").as_deref(), Some("dark blue"));
        assert!(request.isset_cookie("lang"));
        assert!(request.body().is_empty());
    }
}
