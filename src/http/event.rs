//! Per-request handler context.
//!
//! An [`HttpEvent`] wraps the parsed request and the response being built.
//! Handlers write through it; the server flushes the response once the
//! handler returns.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::context::ServerContext;
use crate::http::request::HttpRequest;
use crate::http::response::{HttpResponse, Status};
use crate::session::Session;

/// An HTTP controller: `(event, args, body)`.
///
/// `args` are the path segments after the matched route key.
pub type HttpHandler = Arc<dyn Fn(&mut HttpEvent, &[String], &[u8]) + Send + Sync>;

pub struct HttpEvent {
    request: HttpRequest,
    context: Arc<ServerContext>,
    response: HttpResponse,
    session: Option<Arc<Session>>,
}

impl HttpEvent {
    pub fn new(request: HttpRequest, context: Arc<ServerContext>) -> Self {
        let mut response = HttpResponse::new(Status::OK);
        response.head.set("Content-Type", "text/plain");
        Self {
            request,
            context,
            response,
            session: None,
        }
    }

    pub fn request(&self) -> &HttpRequest {
        &self.request
    }

    pub fn method(&self) -> &str {
        self.request.method()
    }

    pub fn context(&self) -> &ServerContext {
        &self.context
    }

    pub fn set_status(&mut self, status: Status) {
        self.response.head.set_status(status);
    }

    pub fn status(&self) -> Option<&str> {
        self.response.head.get(crate::http::header::STATUS)
    }

    pub fn set_header(&mut self, key: &str, value: impl Into<String>) {
        self.response.head.set(key, value);
    }

    pub fn response_header(&self, key: &str) -> Option<&str> {
        self.response.head.get(key)
    }

    pub fn set_content_type(&mut self, content_type: &str) {
        self.response.head.set("Content-Type", content_type);
    }

    /// Append raw bytes to the response body.
    pub fn send(&mut self, data: impl AsRef<[u8]>) {
        self.response.body.extend_from_slice(data.as_ref());
    }

    pub fn send_text(&mut self, text: &str) {
        self.send(text.as_bytes());
    }

    /// Serialize `value` as the body and mark it as JSON.
    pub fn send_json<T: Serialize>(&mut self, value: &T) -> Result<(), serde_json::Error> {
        let body = serde_json::to_vec(value)?;
        self.set_content_type("application/json");
        self.send(body);
        Ok(())
    }

    pub fn redirect(&mut self, location: &str) {
        self.set_status(Status::FOUND);
        self.set_header("Location", location);
    }

    /// Request cookie, decoded.
    pub fn cookie(&self, name: &str) -> Option<String> {
        self.request.cookie(name)
    }

    pub fn isset_cookie(&self, name: &str) -> bool {
        self.request.isset_cookie(name)
    }

    /// Add a `Set-Cookie` to the response. The configured cookie domain is
    /// used when `domain` is `None`.
    pub fn set_cookie(
        &mut self,
        name: &str,
        value: &str,
        path: Option<&str>,
        domain: Option<&str>,
        expires: Option<i64>,
    ) {
        let default_domain = self.context.config.cookie.domain.clone();
        let domain = domain.or(default_domain.as_deref());
        self.response
            .head
            .set_cookie(name, value, path, domain, expires);
    }

    /// Expire a cookie on the client.
    pub fn unset_cookie(&mut self, name: &str, path: Option<&str>, domain: Option<&str>) {
        self.set_cookie(name, "", path, domain, Some(0));
    }

    /// The current session, if the request carried a live one.
    pub fn session(&mut self) -> Option<Arc<Session>> {
        if self.session.is_none() {
            let cookie_name = &self.context.config.session.cookie_name;
            self.session = self
                .request
                .cookie(cookie_name)
                .and_then(|id| self.context.sessions.get(&id));
        }
        self.session.clone()
    }

    /// Resume the request's session or start a new one, setting the cookie
    /// when the id changes.
    pub fn start_session(&mut self) -> Arc<Session> {
        if let Some(session) = self.session() {
            return session;
        }

        let cookie_name = self.context.config.session.cookie_name.clone();
        let presented = self.request.cookie(&cookie_name);
        let (session, created) = self.context.sessions.start(presented.as_deref());
        if created {
            let expires = unix_now() + self.context.sessions.ttl().as_secs() as i64;
            self.set_cookie(&cookie_name, session.id(), Some("/"), None, Some(expires));
        }
        self.session = Some(Arc::clone(&session));
        session
    }

    /// Destroy the current session and expire its cookie.
    pub fn stop_session(&mut self) -> bool {
        let Some(session) = self.session() else {
            return false;
        };
        self.context.sessions.stop(session.id());
        self.session = None;
        let cookie_name = self.context.config.session.cookie_name.clone();
        self.unset_cookie(&cookie_name, Some("/"), None);
        true
    }

    pub fn into_response(self) -> HttpResponse {
        self.response
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}
