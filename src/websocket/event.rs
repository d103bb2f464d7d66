//! WebSocket controller contract and its per-connection context.

use std::sync::Arc;

use crate::context::ServerContext;
use crate::http::request::HttpRequest;
use crate::net::connection::ConnectionId;
use crate::websocket::connection::{SendError, WebSocketConnection};
use crate::websocket::frame::{Message, Opcode};

/// Callbacks for one upgraded connection. A fresh controller is built per
/// connection by its route's [`WebSocketFactory`].
///
/// `on_close` runs exactly once, however the connection ends.
pub trait WebSocketController: Send {
    fn on_open(&mut self, _event: &WebSocketEvent) {}

    fn on_message(&mut self, event: &WebSocketEvent, message: Message);

    fn on_close(&mut self, _event: &WebSocketEvent) {}
}

pub type WebSocketFactory = Arc<dyn Fn() -> Box<dyn WebSocketController> + Send + Sync>;

/// What a controller sees of its connection.
pub struct WebSocketEvent {
    connection: WebSocketConnection,
    request: HttpRequest,
    args: Vec<String>,
    route: String,
    context: Arc<ServerContext>,
}

impl WebSocketEvent {
    pub fn new(
        connection: WebSocketConnection,
        request: HttpRequest,
        args: Vec<String>,
        route: String,
        context: Arc<ServerContext>,
    ) -> Self {
        Self {
            connection,
            request,
            args,
            route,
            context,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.connection.id()
    }

    pub fn connection(&self) -> &WebSocketConnection {
        &self.connection
    }

    pub fn request(&self) -> &HttpRequest {
        &self.request
    }

    /// Path segments after the matched route key.
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// The route key this connection was dispatched to.
    pub fn route(&self) -> &str {
        &self.route
    }

    pub fn context(&self) -> &ServerContext {
        &self.context
    }

    pub fn query(&self, name: &str) -> Option<&str> {
        self.request.query(name)
    }

    pub fn isset_query(&self, name: &str) -> bool {
        self.request.isset_query(name)
    }

    pub fn languages(&self) -> Vec<String> {
        self.request.languages()
    }

    pub fn default_language(&self) -> Option<String> {
        self.request.default_language()
    }

    pub fn send(&self, data: &[u8]) -> Result<(), SendError> {
        self.connection.send(data)
    }

    pub fn send_text(&self, text: &str) -> Result<(), SendError> {
        self.connection.send_text(text)
    }

    pub fn send_message(&self, opcode: Opcode, payload: &[u8]) -> Result<(), SendError> {
        self.connection.send_message(opcode, payload)
    }

    /// Send to every member of the named group, optionally including this connection.
    pub fn send_to_group(&self, group: &str, message: &Message, include_self: bool) -> usize {
        let except = (!include_self).then(|| self.id());
        self.context
            .groups
            .broadcast_message(group, message.opcode, &message.payload, except)
    }

    /// Send binary data to every other connection on the same route.
    pub fn broadcast(&self, data: &[u8]) -> usize {
        self.broadcast_message(Opcode::Binary, data)
    }

    pub fn broadcast_text(&self, text: &str) -> usize {
        self.broadcast_message(Opcode::Text, text.as_bytes())
    }

    pub fn broadcast_message(&self, opcode: Opcode, payload: &[u8]) -> usize {
        self.context
            .peers
            .broadcast_message(&self.route, opcode, payload, Some(self.id()))
    }

    /// Close the connection. Returns true for the call that closed it.
    pub fn close(&self) -> bool {
        self.connection.close()
    }

    pub fn is_closed(&self) -> bool {
        self.connection.is_closed()
    }
}
