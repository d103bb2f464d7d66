//! HTTP server: accept loop and per-connection state machine.
//!
//! # Responsibilities
//! - Accept connections under the listener's connection limit
//! - Read one request per connection and decide how to serve it
//! - Serve static files from the web root
//! - Dispatch controllers and WebSocket upgrades through the route tables
//! - Sweep expired sessions in the background
//! - Drain open connections on shutdown

use std::net::SocketAddr;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use percent_encoding::percent_decode_str;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use crate::config::HttpConfig;
use crate::context::ServerContext;
use crate::http::content_type::content_type;
use crate::http::event::HttpEvent;
use crate::http::request::{read_request, HttpRequest, RequestLimits};
use crate::http::response::{HttpResponse, Status};
use crate::lifecycle::Shutdown;
use crate::net::connection::{ConnectionError, ConnectionId, ConnectionLifecycle, ConnectionState};
use crate::net::listener::{ConnectionPermit, Listener, ListenerError};
use crate::observability::metrics;
use crate::routing::router::split_segments;
use crate::session::SessionStore;
use crate::websocket::driver::{self, Upgrade};
use crate::websocket::handshake::is_upgrade_request;

/// How a non-upgrade request is served.
#[derive(Debug, PartialEq, Eq)]
pub enum StaticDecision {
    File(PathBuf),
    /// A static-looking resource that does not exist.
    Missing,
    Controller,
}

pub struct HttpServer {
    context: Arc<ServerContext>,
}

impl HttpServer {
    pub fn new(context: Arc<ServerContext>) -> Self {
        Self { context }
    }

    pub fn context(&self) -> &Arc<ServerContext> {
        &self.context
    }

    /// Run until `shutdown` fires, then wait for open connections to drain.
    pub async fn run(self, listener: Listener, shutdown: Shutdown) -> Result<(), ListenerError> {
        let addr = listener.local_addr().map_err(ListenerError::Bind)?;
        tracing::info!(
            address = %addr,
            web_root = %self.context.config.http.web_root,
            "HTTP server starting"
        );

        spawn_session_sweeper(
            self.context.sessions.clone(),
            Duration::from_secs(self.context.config.session.sweep_interval_secs),
            shutdown.clone(),
        );

        let mut shutdown_rx = shutdown.subscribe();
        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer, permit)) => {
                        let context = Arc::clone(&self.context);
                        tokio::spawn(handle_connection(stream, peer, permit, context));
                    }
                    Err(ListenerError::LimitClosed) => break,
                    Err(e) => {
                        tracing::warn!(error = %e, "Accept failed");
                        tokio::time::sleep(Duration::from_millis(50)).await;
                    }
                },
                _ = shutdown_rx.recv() => break,
            }
        }
        drop(listener);

        let grace = Duration::from_secs(self.context.config.http.shutdown_grace_secs);
        tracing::info!(
            active_connections = self.context.tracker.active_count(),
            grace_secs = grace.as_secs(),
            "Stopped accepting, draining connections"
        );
        let remaining = self.context.tracker.wait_for_drain(grace).await;
        if remaining > 0 {
            tracing::warn!(remaining, "Connections still open after grace period");
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Purge expired sessions every `interval` until shutdown.
pub fn spawn_session_sweeper(sessions: SessionStore, interval: Duration, shutdown: Shutdown) {
    let mut shutdown_rx = shutdown.subscribe();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    sessions.purge_expired();
                }
                _ = shutdown_rx.recv() => break,
            }
        }
        tracing::debug!("Session sweeper stopped");
    });
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    _permit: ConnectionPermit,
    context: Arc<ServerContext>,
) {
    let guard = context.tracker.track();
    let id = guard.id();
    metrics::record_connection_opened();
    tracing::debug!(connection_id = %id, peer_addr = %peer, "Connection opened");

    let mut lifecycle = ConnectionLifecycle::new(id);
    match serve_connection(stream, peer, &context, id, &mut lifecycle).await {
        Ok(()) => {}
        Err(ConnectionError::PeerClosed) => {
            tracing::debug!(connection_id = %id, "Peer closed before sending a request")
        }
        Err(e) => tracing::debug!(connection_id = %id, error = %e, "Connection ended with error"),
    }
    lifecycle.close();

    metrics::record_connection_closed();
    drop(guard);
}

async fn serve_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    context: &Arc<ServerContext>,
    id: ConnectionId,
    lifecycle: &mut ConnectionLifecycle,
) -> Result<(), ConnectionError> {
    let http = &context.config.http;
    let limits = RequestLimits {
        max_header_bytes: http.max_header_bytes,
        max_body_bytes: http.max_body_bytes,
        read_buffer_bytes: http.read_buffer_bytes,
    };

    lifecycle.advance(ConnectionState::ParsingHeaders)?;
    let (request, leftover) = match read_request(&mut stream, limits).await {
        Ok(read) => read,
        Err(e) => {
            let status = match &e {
                ConnectionError::HeadTooLarge { .. } => Status::HEADER_FIELDS_TOO_LARGE,
                ConnectionError::BodyTooLarge { .. } => Status::PAYLOAD_TOO_LARGE,
                ConnectionError::Malformed(_) => Status::BAD_REQUEST,
                _ => return Err(e),
            };
            tracing::debug!(connection_id = %id, error = %e, status = status.code, "Rejecting request");
            write_response(&mut stream, HttpResponse::text(status, &status.to_string()), "error")
                .await?;
            return Err(e);
        }
    };
    let request = request.with_peer(peer);

    tracing::debug!(
        connection_id = %id,
        method = %request.method(),
        target = %request.target(),
        "Request received"
    );

    if request.method().eq_ignore_ascii_case("GET") && is_upgrade_request(request.head()) {
        lifecycle.advance(ConnectionState::UpgradeWebSocket)?;
        let resolution = context.ws_routes.resolve(request.target(), request.method());
        let upgrade = Upgrade {
            route: resolution.key.unwrap_or_default(),
            factory: resolution.handler,
            args: resolution.args,
            request,
            leftover,
        };
        lifecycle.advance(ConnectionState::WsFrameLoop)?;
        return driver::serve(stream, upgrade, Arc::clone(context), id).await;
    }

    let decision = classify(http, request.path()).await;
    let response = match decision {
        StaticDecision::File(path) => {
            lifecycle.advance(ConnectionState::StaticFile)?;
            serve_file(&path, request.path(), id).await
        }
        StaticDecision::Missing => {
            lifecycle.advance(ConnectionState::StaticFile)?;
            not_found_page(http).await
        }
        StaticDecision::Controller => {
            lifecycle.advance(ConnectionState::DispatchController)?;
            dispatch(request, context)
        }
    };

    let kind = match lifecycle.state() {
        ConnectionState::StaticFile => "static",
        _ => "controller",
    };
    write_response(&mut stream, response, kind).await
}

/// Run the HTTP controller `request` resolves to.
fn dispatch(request: HttpRequest, context: &Arc<ServerContext>) -> HttpResponse {
    let resolution = context
        .http_routes
        .resolve(request.target(), request.method());
    let body = request.body().to_vec();
    let mut event = HttpEvent::new(request, Arc::clone(context));
    (resolution.handler)(&mut event, &resolution.args, &body);
    event.into_response()
}

async fn write_response(
    stream: &mut TcpStream,
    response: HttpResponse,
    kind: &'static str,
) -> Result<(), ConnectionError> {
    metrics::record_http_request(kind, response.status_code().unwrap_or(0));
    stream.write_all(&response.into_bytes()).await?;
    let _ = stream.shutdown().await;
    Ok(())
}

/// Decide between a static file, a missing static resource and a controller.
///
/// - First segment starting with `@` always goes to a controller
/// - `/` serves the index file when it exists
/// - An existing file is served
/// - A missing path with a known extension is a static 404
/// - Anything else goes to a controller
/// - Percent-escapes are decoded before the web root is consulted
pub async fn classify(config: &HttpConfig, path: &str) -> StaticDecision {
    let decoded = percent_decode_str(path).decode_utf8_lossy();
    let path = decoded.as_ref();
    let segments = split_segments(path);
    if segments.first().is_some_and(|s| s.starts_with('@')) {
        return StaticDecision::Controller;
    }

    let root = Path::new(&config.web_root);
    if segments.is_empty() {
        return match resolve_file(root, &config.index_file) {
            Some(index) if is_file(&index).await => StaticDecision::File(index),
            _ => StaticDecision::Controller,
        };
    }

    match resolve_file(root, path) {
        None => StaticDecision::Missing,
        Some(file) if is_file(&file).await => StaticDecision::File(file),
        Some(_) if !content_type(path).is_empty() => StaticDecision::Missing,
        Some(_) => StaticDecision::Controller,
    }
}

/// Map a request path onto the web root. `None` if it would escape the root.
pub fn resolve_file(web_root: &Path, request_path: &str) -> Option<PathBuf> {
    let relative = Path::new(request_path.trim_start_matches('/'));
    let mut resolved = web_root.to_path_buf();
    for component in relative.components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    Some(resolved)
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}

async fn serve_file(path: &Path, request_path: &str, id: ConnectionId) -> HttpResponse {
    match tokio::fs::read(path).await {
        Ok(contents) => {
            let mut response = HttpResponse::new(Status::OK);
            let mime = content_type(&path.to_string_lossy());
            let mime = if mime.is_empty() { content_type(request_path) } else { mime };
            if !mime.is_empty() {
                response.head.set("Content-Type", mime);
            }
            response.body = contents;
            response
        }
        Err(e) => {
            tracing::warn!(connection_id = %id, path = %path.display(), error = %e, "Failed to read file");
            HttpResponse::text(Status::INTERNAL_SERVER_ERROR, "500 Internal Server Error")
        }
    }
}

async fn not_found_page(config: &HttpConfig) -> HttpResponse {
    let page = match resolve_file(Path::new(&config.web_root), &config.not_found_file) {
        Some(path) => tokio::fs::read(path).await.ok(),
        None => None,
    };
    match page {
        Some(contents) => {
            let mut response = HttpResponse::new(Status::NOT_FOUND);
            response.head.set("Content-Type", "text/html");
            response.body = contents;
            response
        }
        None => HttpResponse::text(Status::NOT_FOUND, "404 Not Found"),
    }
}
