//! Cookie table entries and their wire formatting.
//!
//! # Responsibilities
//! - Represent request cookies (`Cookie:`) and response cookies (`Set-Cookie:`)
//! - Format `expires` as an RFC1123 date in GMT
//! - Encode/decode cookie values with form-url encoding
//!
//! # Design Decisions
//! - Expiry is an absolute Unix timestamp in seconds; `None` is a session cookie
//! - Values are stored encoded, exactly as they travel on the wire

use chrono::{DateTime, Utc};
use url::form_urlencoded;

/// RFC1123 date layout used for `expires` and `Date`.
pub const HTTP_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// Which header a cookie came from, or will be written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CookieDirective {
    /// Sent by the client in a `Cookie` header.
    Cookie,
    /// Sent by the server in a `Set-Cookie` header.
    SetCookie,
}

impl CookieDirective {
    pub fn as_str(&self) -> &'static str {
        match self {
            CookieDirective::Cookie => "Cookie",
            CookieDirective::SetCookie => "Set-Cookie",
        }
    }
}

/// A single cookie entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    /// Encoded value.
    pub value: String,
    pub path: Option<String>,
    pub domain: Option<String>,
    /// Absolute expiry in Unix seconds.
    pub expires: Option<i64>,
    pub directive: CookieDirective,
}

impl Cookie {
    /// A request cookie carrying only a value.
    pub fn request(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            path: None,
            domain: None,
            expires: None,
            directive: CookieDirective::Cookie,
        }
    }

    /// A response cookie. The raw value is form-url encoded and the path
    /// defaults to `/`.
    pub fn response(
        value: &str,
        path: Option<&str>,
        domain: Option<&str>,
        expires: Option<i64>,
    ) -> Self {
        Self {
            value: encode_value(value),
            path: Some(path.unwrap_or("/").to_string()),
            domain: domain.map(str::to_string),
            expires,
            directive: CookieDirective::SetCookie,
        }
    }

    /// The decoded value.
    pub fn decoded_value(&self) -> String {
        decode_value(&self.value)
    }

    /// Render as a header line, including the trailing CRLF.
    pub fn to_header_line(&self, name: &str) -> String {
        let mut line = format!("{}: {}={}", self.directive.as_str(), name, self.value);
        if let Some(path) = &self.path {
            line.push_str("; path=");
            line.push_str(path);
        }
        if let Some(domain) = &self.domain {
            line.push_str("; domain=");
            line.push_str(domain);
        }
        if let Some(expires) = self.expires {
            line.push_str("; expires=");
            line.push_str(&format_http_date(expires));
        }
        line.push_str("\r\n");
        line
    }
}

/// Format Unix seconds as an RFC1123 date. Out-of-range values clamp to the epoch.
pub fn format_http_date(unix_secs: i64) -> String {
    DateTime::<Utc>::from_timestamp(unix_secs, 0)
        .unwrap_or_default()
        .format(HTTP_DATE_FORMAT)
        .to_string()
}

/// Parse an RFC1123 date back into Unix seconds.
pub fn parse_http_date(value: &str) -> Option<i64> {
    DateTime::parse_from_rfc2822(value.trim())
        .ok()
        .map(|date| date.timestamp())
}

/// Current time as an RFC1123 date.
pub fn http_date_now() -> String {
    Utc::now().format(HTTP_DATE_FORMAT).to_string()
}

pub fn encode_value(value: &str) -> String {
    form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

pub fn decode_value(value: &str) -> String {
    let escaped = value.replace('&', "%26").replace('=', "%3D");
    form_urlencoded::parse(format!("v={}", escaped).as_bytes())
        .next()
        .map(|(_, v)| v.into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epoch_formats_as_delete_constant() {
        assert_eq!(format_http_date(0), "Thu, 01 Jan 1970 00:00:00 GMT");
    }

    #[test]
    fn http_date_parses_back() {
        let formatted = format_http_date(1_700_000_000);
        assert_eq!(parse_http_date(&formatted), Some(1_700_000_000));
    }

    #[test]
    fn session_cookie_has_no_expires() {
        let cookie = Cookie::response("abc", None, None, None);
        assert_eq!(
            cookie.to_header_line("sid"),
            "Set-Cookie: sid=abc; path=/\r\n"
        );
    }

    #[test]
    fn full_cookie_line() {
        let cookie = Cookie::response("a b", Some("/x"), Some("example.com"), Some(0));
        assert_eq!(
            cookie.to_header_line("k"),
            "Set-Cookie: k=a+b; path=/x; domain=example.com; expires=Thu, 01 Jan 1970 00:00:00 GMT\r\n"
        );
        assert_eq!(cookie.decoded_value(), "a b");
    }

    #[test]
    fn value_encoding_round_trips() {
        let raw = "name=value; with&symbols";
        assert_eq!(decode_value(&encode_value(raw)), raw);
    }
}
