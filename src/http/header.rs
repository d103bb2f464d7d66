//! HTTP start-line, header and cookie codec.
//!
//! # Responsibilities
//! - Parse raw request/response heads into an [`HttpMessage`]
//! - Serialize an [`HttpMessage`] back to CRLF-terminated wire text
//! - Keep the cookie table separate from ordinary headers
//!
//! # Design Decisions
//! - Parsing never fails: unknown lines degrade to a key with no value
//! - Header keys are case-sensitive as received; insertion order is kept
//! - The start line is a distinguished field and always serializes first

use std::collections::HashMap;
use std::fmt;

use crate::http::cookie::{
    http_date_now, parse_http_date, Cookie, CookieDirective,
};
use crate::http::response::Status;

/// Pseudo-field carrying the request method.
pub const METHOD: &str = "Method";
/// Pseudo-field carrying the request target.
pub const RESOURCE: &str = "Resource";
/// Pseudo-field carrying the protocol version.
pub const VERSION: &str = "Version";
/// Pseudo-field carrying the full response status line.
pub const STATUS: &str = "Status";

const HTTP_VERSION: &str = "HTTP/1.1";

/// First line of an HTTP message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartLine {
    Request {
        method: String,
        resource: String,
        version: String,
    },
    /// A full status line such as `HTTP/1.1 200 OK`.
    Status(String),
}

/// Mutable header bag built incrementally and consumed once to produce wire text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpMessage {
    start_line: Option<StartLine>,
    fields: Vec<(String, Option<String>)>,
    cookies: HashMap<String, Cookie>,
}

impl HttpMessage {
    /// An empty message with no start line.
    pub fn new() -> Self {
        Self::default()
    }

    /// A response head with the default `Date` and `Cache-Control` headers.
    pub fn response(status: Status) -> Self {
        let mut message = Self::new();
        message.set_status(status);
        message.set("Date", http_date_now());
        message.set("Cache-Control", "no-store");
        message
    }

    /// Parse a raw head. Never fails.
    pub fn parse(raw: &str) -> Self {
        let mut message = Self::new();
        for line in raw.split("\r\n") {
            message.parse_line(line);
        }
        message
    }

    /// Parse a single line into this message. Returns `false` for blank lines.
    pub fn parse_line(&mut self, line: &str) -> bool {
        if line.is_empty() {
            return false;
        }

        if let Some((key, value)) = line.split_once(": ") {
            match key {
                "Cookie" => self.parse_cookie_line(value),
                "Set-Cookie" => self.parse_set_cookie_line(value),
                _ => self.set(key, value),
            }
            return true;
        }

        if let Some(start_line) = parse_start_line(line) {
            self.start_line = Some(start_line);
        } else {
            self.set_opaque(line);
        }
        true
    }

    /// `name=value; path=..; domain=..` triplets, possibly several cookies per line.
    fn parse_cookie_line(&mut self, value: &str) {
        let mut current: Option<String> = None;
        for segment in value.split(';') {
            let Some((name, value)) = segment.trim().split_once('=') else {
                continue;
            };
            let name = name.trim();
            if name.is_empty() {
                continue;
            }
            if let Some(cookie) = current.as_ref().and_then(|c| self.cookies.get_mut(c)) {
                if apply_attribute(cookie, name, value) {
                    continue;
                }
            }
            self.cookies
                .insert(name.to_string(), Cookie::request(value.trim()));
            current = Some(name.to_string());
        }
    }

    fn parse_set_cookie_line(&mut self, value: &str) {
        let mut segments = value.split(';');
        let Some((name, value)) = segments.next().and_then(|s| s.trim().split_once('=')) else {
            self.set("Set-Cookie", value);
            return;
        };
        let mut cookie = Cookie {
            directive: CookieDirective::SetCookie,
            ..Cookie::request(value.trim())
        };
        for segment in segments {
            if let Some((attr, attr_value)) = segment.trim().split_once('=') {
                apply_attribute(&mut cookie, attr, attr_value);
            }
        }
        self.cookies.insert(name.trim().to_string(), cookie);
    }

    /// Set a header, replacing an existing value with the same key.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.set_field(key.into(), Some(value.into()));
    }

    fn set_opaque(&mut self, key: &str) {
        self.set_field(key.to_string(), None);
    }

    fn set_field(&mut self, key: String, value: Option<String>) {
        match self.fields.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.fields.push((key, value)),
        }
    }

    /// Look up a header or pseudo-field. Values are trimmed.
    pub fn get(&self, key: &str) -> Option<&str> {
        match (key, &self.start_line) {
            (METHOD, Some(StartLine::Request { method, .. })) => Some(method),
            (RESOURCE, Some(StartLine::Request { resource, .. })) => Some(resource),
            (VERSION, Some(StartLine::Request { version, .. })) => Some(version),
            (STATUS, Some(StartLine::Status(line))) => Some(line),
            _ => self
                .fields
                .iter()
                .find(|(k, _)| k == key)
                .and_then(|(_, v)| v.as_deref())
                .map(str::trim),
        }
    }

    /// Case-insensitive header lookup.
    pub fn get_ignore_case(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .and_then(|(_, v)| v.as_deref())
            .map(str::trim)
    }

    /// Whether a header has a value.
    pub fn is_defined(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Whether a key exists at all, including opaque keys without a value.
    pub fn contains_key(&self, key: &str) -> bool {
        self.fields.iter().any(|(k, _)| k == key)
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        let index = self.fields.iter().position(|(k, _)| k == key)?;
        self.fields.remove(index).1
    }

    pub fn start_line(&self) -> Option<&StartLine> {
        self.start_line.as_ref()
    }

    pub fn set_request_line(
        &mut self,
        method: impl Into<String>,
        resource: impl Into<String>,
        version: impl Into<String>,
    ) {
        self.start_line = Some(StartLine::Request {
            method: method.into(),
            resource: resource.into(),
            version: version.into(),
        });
    }

    pub fn set_status(&mut self, status: Status) {
        self.start_line = Some(StartLine::Status(format!("{} {}", HTTP_VERSION, status)));
    }

    /// Iterate ordinary headers in insertion order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_deref()))
    }

    pub fn cookies(&self) -> &HashMap<String, Cookie> {
        &self.cookies
    }

    pub fn isset_cookie(&self, name: &str) -> bool {
        self.cookies.contains_key(name.trim())
    }

    /// Decoded cookie value.
    pub fn cookie(&self, name: &str) -> Option<String> {
        self.cookies.get(name.trim()).map(Cookie::decoded_value)
    }

    /// Add a `Set-Cookie` entry. The value is encoded; `path` defaults to `/`.
    pub fn set_cookie(
        &mut self,
        name: &str,
        value: &str,
        path: Option<&str>,
        domain: Option<&str>,
        expires: Option<i64>,
    ) {
        self.cookies.insert(
            name.trim().to_string(),
            Cookie::response(value, path, domain, expires),
        );
    }

    pub fn insert_cookie(&mut self, name: impl Into<String>, cookie: Cookie) {
        self.cookies.insert(name.into(), cookie);
    }

    /// Wire text of the head, without the terminating blank line.
    pub fn serialize(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for HttpMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.start_line {
            Some(StartLine::Request { method, resource, version }) => {
                write!(f, "{} {} {}\r\n", method, resource, version)?
            }
            Some(StartLine::Status(line)) => write!(f, "{}\r\n", line)?,
            None => {}
        }
        for (key, value) in &self.fields {
            match value {
                Some(value) => write!(f, "{}: {}\r\n", key, value)?,
                None => write!(f, "{}\r\n", key)?,
            }
        }
        for (name, cookie) in &self.cookies {
            f.write_str(&cookie.to_header_line(name))?;
        }
        Ok(())
    }
}

fn apply_attribute(cookie: &mut Cookie, name: &str, value: &str) -> bool {
    let value = value.trim();
    match name.trim().to_ascii_lowercase().as_str() {
        "path" => cookie.path = Some(value.to_string()),
        "domain" => cookie.domain = Some(value.to_string()),
        "expires" => cookie.expires = parse_http_date(value).or_else(|| value.parse().ok()),
        _ => return false,
    }
    true
}

/// `METHOD SP target SP HTTP/x.y` or `HTTP/x.y SP code [reason]`.
fn parse_start_line(line: &str) -> Option<StartLine> {
    let mut parts = line.split_whitespace();
    let first = parts.next()?;
    let second = parts.next()?;

    if is_http_version(first) && second.len() == 3 && second.bytes().all(|b| b.is_ascii_digit()) {
        return Some(StartLine::Status(line.trim().to_string()));
    }

    let third = parts.next()?;
    let is_method = first.bytes().all(|b| b.is_ascii_uppercase());
    if is_method && parts.next().is_none() && is_http_version(third) {
        return Some(StartLine::Request {
            method: first.to_string(),
            resource: second.to_string(),
            version: third.to_string(),
        });
    }
    None
}

fn is_http_version(token: &str) -> bool {
    token.starts_with("HTTP/") || token.starts_with("HTTPS/")
}
