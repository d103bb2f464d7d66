//! Process-wide server state and route registration.

use std::sync::Arc;
use std::time::Duration;

use crate::config::ServerConfig;
use crate::controllers;
use crate::group::GroupRegistry;
use crate::http::event::{HttpEvent, HttpHandler};
use crate::net::connection::ConnectionTracker;
use crate::routing::{MethodFilter, RouteTable};
use crate::session::SessionStore;
use crate::websocket::event::{WebSocketController, WebSocketFactory};

/// Everything a connection task needs, shared behind one `Arc`.
pub struct ServerContext {
    pub config: ServerConfig,
    pub sessions: SessionStore,
    /// Named groups created by clients.
    pub groups: GroupRegistry,
    /// One implicit group per WebSocket route, holding every open connection on it.
    pub peers: GroupRegistry,
    pub http_routes: RouteTable<HttpHandler>,
    pub ws_routes: RouteTable<WebSocketFactory>,
    pub tracker: ConnectionTracker,
}

/// Builds a [`ServerContext`] with its routes.
///
/// Routes are fixed once `build` is called.
pub struct ServerBuilder {
    config: ServerConfig,
    http_routes: RouteTable<HttpHandler>,
    ws_routes: RouteTable<WebSocketFactory>,
}

impl ServerBuilder {
    /// A builder with the built-in not-found controllers and no routes.
    pub fn new(config: ServerConfig) -> Self {
        let http_not_found: HttpHandler = Arc::new(controllers::http_not_found);
        let ws_not_found: WebSocketFactory =
            Arc::new(|| Box::new(controllers::WebSocketNotFound) as Box<dyn WebSocketController>);
        Self {
            config,
            http_routes: RouteTable::new(http_not_found),
            ws_routes: RouteTable::new(ws_not_found),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Register an HTTP controller for any method.
    pub fn http<F>(self, path: &str, handler: F) -> Self
    where
        F: Fn(&mut HttpEvent, &[String], &[u8]) + Send + Sync + 'static,
    {
        self.http_for(path, MethodFilter::Any, handler)
    }

    /// Register an HTTP controller for the methods `filter` accepts.
    pub fn http_for<F>(mut self, path: &str, filter: MethodFilter, handler: F) -> Self
    where
        F: Fn(&mut HttpEvent, &[String], &[u8]) + Send + Sync + 'static,
    {
        self.http_routes.insert(path, filter, Arc::new(handler));
        self
    }

    /// Register a WebSocket controller. `factory` runs once per connection.
    pub fn websocket<F, C>(mut self, path: &str, factory: F) -> Self
    where
        F: Fn() -> C + Send + Sync + 'static,
        C: WebSocketController + 'static,
    {
        let factory: WebSocketFactory =
            Arc::new(move || Box::new(factory()) as Box<dyn WebSocketController>);
        self.ws_routes.insert(path, MethodFilter::Any, factory);
        self
    }

    pub fn http_not_found<F>(mut self, handler: F) -> Self
    where
        F: Fn(&mut HttpEvent, &[String], &[u8]) + Send + Sync + 'static,
    {
        self.http_routes.set_not_found(Arc::new(handler));
        self
    }

    pub fn websocket_not_found<F, C>(mut self, factory: F) -> Self
    where
        F: Fn() -> C + Send + Sync + 'static,
        C: WebSocketController + 'static,
    {
        let factory: WebSocketFactory =
            Arc::new(move || Box::new(factory()) as Box<dyn WebSocketController>);
        self.ws_routes.set_not_found(factory);
        self
    }

    /// Register the `/@set`, `/@isset`, `/@unset` and group API controllers.
    pub fn with_builtin_controllers(self) -> Self {
        controllers::register(self)
    }

    pub fn build(self) -> Arc<ServerContext> {
        let session = &self.config.session;
        let sessions = SessionStore::new(Duration::from_secs(session.ttl_secs), session.keep_alive);
        tracing::debug!(
            http_routes = self.http_routes.len(),
            websocket_routes = self.ws_routes.len(),
            "Routes registered"
        );

        Arc::new(ServerContext {
            config: self.config,
            sessions,
            groups: GroupRegistry::new(),
            peers: GroupRegistry::new(),
            http_routes: self.http_routes,
            ws_routes: self.ws_routes,
            tracker: ConnectionTracker::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::event::WebSocketEvent;
    use crate::websocket::frame::Message;

    struct Echo;

    impl WebSocketController for Echo {
        fn on_message(&mut self, event: &WebSocketEvent, message: Message) {
            let _ = event.send_message(message.opcode, &message.payload);
        }
    }

    #[test]
    fn builder_registers_both_tables() {
        let context = ServerBuilder::new(ServerConfig::default())
            .http("/hello", |e, _, _| e.send_text("hi"))
            .websocket("/echo", || Echo)
            .build();

        assert!(context.http_routes.contains("/hello"));
        assert!(context.ws_routes.contains("/echo"));
        assert!(context.ws_routes.resolve("/other", "GET").is_not_found());
    }

    #[test]
    fn builtins_are_opt_in() {
        let bare = ServerBuilder::new(ServerConfig::default()).build();
        assert!(!bare.http_routes.contains("/@isset/cookie"));

        let full = ServerBuilder::new(ServerConfig::default())
            .with_builtin_controllers()
            .build();
        assert!(full.http_routes.contains("/@isset/cookie"));
        assert!(full.ws_routes.contains("/@group"));
    }
}
