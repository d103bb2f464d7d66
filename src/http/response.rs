//! Response status codes and response assembly.
//!
//! # Responsibilities
//! - Name the status lines the server emits
//! - Assemble a response head + body into wire bytes
//!
//! # Design Decisions
//! - The status line is written exactly once, before any body byte
//! - Every response carries `Content-Length` and `Connection: close`

use std::fmt;

use crate::http::header::{HttpMessage, STATUS};

/// An HTTP status code with its reason phrase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status {
    pub code: u16,
    pub reason: &'static str,
}

impl Status {
    pub const SWITCHING_PROTOCOLS: Status = Status::new(101, "Switching Protocols");
    pub const OK: Status = Status::new(200, "OK");
    pub const FOUND: Status = Status::new(302, "Found");
    pub const BAD_REQUEST: Status = Status::new(400, "Bad Request");
    pub const FORBIDDEN: Status = Status::new(403, "Forbidden");
    pub const NOT_FOUND: Status = Status::new(404, "Not Found");
    pub const METHOD_NOT_ALLOWED: Status = Status::new(405, "Method Not Allowed");
    pub const CONFLICT: Status = Status::new(409, "Conflict");
    pub const PAYLOAD_TOO_LARGE: Status = Status::new(413, "Payload Too Large");
    pub const HEADER_FIELDS_TOO_LARGE: Status = Status::new(431, "Request Header Fields Too Large");
    pub const INTERNAL_SERVER_ERROR: Status = Status::new(500, "Internal Server Error");

    pub const fn new(code: u16, reason: &'static str) -> Self {
        Self { code, reason }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.reason)
    }
}

/// A fully assembled response waiting to be flushed.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub head: HttpMessage,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: Status) -> Self {
        Self {
            head: HttpMessage::response(status),
            body: Vec::new(),
        }
    }

    /// A plain-text response, used for errors raised before dispatch.
    pub fn text(status: Status, body: &str) -> Self {
        let mut response = Self::new(status);
        response.head.set("Content-Type", "text/plain");
        response.body.extend_from_slice(body.as_bytes());
        response
    }

    /// Numeric status, read back from the status line.
    pub fn status_code(&self) -> Option<u16> {
        self.head
            .get(STATUS)?
            .split(' ')
            .nth(1)?
            .parse()
            .ok()
    }

    /// Serialize head and body. Sets `Content-Length` and `Connection`.
    pub fn into_bytes(mut self) -> Vec<u8> {
        self.head.set("Content-Length", self.body.len().to_string());
        self.head.set("Connection", "close");
        let mut bytes = self.head.serialize().into_bytes();
        bytes.extend_from_slice(b"\r\n");
        bytes.extend_from_slice(&self.body);
        bytes
    }
}
