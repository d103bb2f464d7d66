//! Built-in controllers.
//!
//! | Route | Kind | Behaviour |
//! |-------|------|-----------|
//! | `/@set/group` | HTTP | create a broadcast group owned by the caller's session |
//! | `/@set/cookie` | HTTP (POST) | set a cookie from a JSON body |
//! | `/@isset/cookie/{name}` | HTTP | 302 if the request carries the cookie, else 404 |
//! | `/@isset/file/{path}` | HTTP | 302 if the file exists under the web root, else 404 |
//! | `/@unset/cookie/{name}` | HTTP | expire a cookie |
//! | `/@group?join={name}` | WebSocket | relay messages to the other members of a group |

use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;

use crate::context::ServerBuilder;
use crate::group::{Group, JoinOutcome, Visibility};
use crate::http::cookie::parse_http_date;
use crate::http::event::HttpEvent;
use crate::http::response::Status;
use crate::http::server::resolve_file;
use crate::websocket::event::{WebSocketController, WebSocketEvent};
use crate::websocket::frame::Message;

const GROUPS_NOT_ALLOWED: &str = "WebSocket groups are not allowed.";

/// Register every built-in controller on `builder`.
pub fn register(builder: ServerBuilder) -> ServerBuilder {
    builder
        .http("/@set/group", set_group)
        .http("/@set/cookie", set_cookie)
        .http("/@isset/cookie", isset_cookie)
        .http("/@isset/file", isset_file)
        .http("/@unset/cookie", unset_cookie)
        .websocket("/@group", GroupApi::default)
}

/// Fallback for unmatched HTTP routes.
pub fn http_not_found(event: &mut HttpEvent, _args: &[String], _body: &[u8]) {
    event.set_status(Status::NOT_FOUND);
    event.send_text("404 Not Found");
}

/// Fallback for unmatched WebSocket routes: closes right after the upgrade.
pub struct WebSocketNotFound;

impl WebSocketController for WebSocketNotFound {
    fn on_open(&mut self, event: &WebSocketEvent) {
        tracing::debug!(connection_id = %event.id(), path = %event.request().path(), "No WebSocket route");
        event.close();
    }

    fn on_message(&mut self, _event: &WebSocketEvent, _message: Message) {}
}

fn set_group(event: &mut HttpEvent, _args: &[String], _body: &[u8]) {
    if !event.context().config.groups.allow {
        event.set_status(Status::NOT_FOUND);
        event.send_text(GROUPS_NOT_ALLOWED);
        return;
    }

    let visibility = match event.request().query("visibility") {
        Some(value) => match value.parse::<Visibility>() {
            Ok(visibility) => visibility,
            Err(e) => {
                event.set_status(Status::BAD_REQUEST);
                event.send_text(&e.to_string());
                return;
            }
        },
        None => Visibility::Public,
    };

    let session = event.start_session();
    let group = match event.request().query("name") {
        Some(name) if !name.trim().is_empty() => Group::new(name.trim(), visibility),
        _ => Group::keyed(visibility),
    }
    .with_owner(session.id());

    match event.context().groups.add_group(group) {
        Ok(group) => {
            let body = json!({ "name": group.name(), "key": group.key() });
            send_json(event, &body);
        }
        Err(e) => {
            event.set_status(Status::CONFLICT);
            event.send_text(&e.to_string());
        }
    }
}

#[derive(Debug, Deserialize)]
struct CookieRequest {
    name: String,
    value: String,
    path: Option<String>,
    domain: Option<String>,
    /// Unix seconds or an HTTP date.
    expire: Option<serde_json::Value>,
}

fn set_cookie(event: &mut HttpEvent, _args: &[String], body: &[u8]) {
    if !event.method().eq_ignore_ascii_case("POST") {
        event.set_status(Status::METHOD_NOT_ALLOWED);
        event.set_header("Allow", "POST");
        send_json(event, &json!({ "error": "POST required" }));
        return;
    }

    let request: CookieRequest = match serde_json::from_slice(body) {
        Ok(request) => request,
        Err(e) => {
            event.set_status(Status::BAD_REQUEST);
            send_json(event, &json!({ "error": e.to_string() }));
            return;
        }
    };

    let expires = match request.expire.as_ref() {
        None | Some(serde_json::Value::Null) => None,
        Some(serde_json::Value::Number(n)) => n.as_i64(),
        Some(serde_json::Value::String(s)) => s.parse::<i64>().ok().or_else(|| parse_http_date(s)),
        Some(_) => None,
    };

    event.set_cookie(
        &request.name,
        &request.value,
        request.path.as_deref(),
        request.domain.as_deref(),
        expires,
    );
    send_json(event, &json!({ "name": request.name, "value": request.value }));
}

fn isset_cookie(event: &mut HttpEvent, args: &[String], _body: &[u8]) {
    let name = args.join("/");
    let status = if !name.is_empty() && event.isset_cookie(&name) {
        Status::FOUND
    } else {
        Status::NOT_FOUND
    };
    event.set_status(status);
}

fn isset_file(event: &mut HttpEvent, args: &[String], _body: &[u8]) {
    let relative = args.join("/");
    let web_root = &event.context().config.http.web_root;
    let exists = resolve_file(Path::new(web_root), &relative).is_some_and(|path| path.is_file());
    event.set_status(if exists { Status::FOUND } else { Status::NOT_FOUND });
}

fn unset_cookie(event: &mut HttpEvent, args: &[String], _body: &[u8]) {
    let name = args.join("/");
    if !name.is_empty() && event.isset_cookie(&name) {
        let path = event.request().query("path").map(str::to_string);
        let domain = event.request().query("domain").map(str::to_string);
        event.unset_cookie(&name, path.as_deref(), domain.as_deref());
    }
    event.send_text("0");
}

fn send_json(event: &mut HttpEvent, value: &serde_json::Value) {
    if let Err(e) = event.send_json(value) {
        tracing::error!(error = %e, "Failed to encode JSON response");
        event.set_status(Status::INTERNAL_SERVER_ERROR);
    }
}

/// Relays every message to the other members of the group named by `?join=`.
///
/// Private groups additionally require `?key=` to match the group key.
#[derive(Default)]
pub struct GroupApi {
    group: Option<Arc<Group>>,
}

impl WebSocketController for GroupApi {
    fn on_open(&mut self, event: &WebSocketEvent) {
        let context = event.context();
        if !context.config.groups.allow {
            event.close();
            return;
        }
        let Some(name) = event.query("join") else {
            event.close();
            return;
        };
        let Some(group) = context.groups.get_group(name) else {
            tracing::debug!(connection_id = %event.id(), group = %name, "Join of unknown group");
            event.close();
            return;
        };
        if group.visibility() == Visibility::Private && event.query("key") != Some(group.key()) {
            tracing::debug!(connection_id = %event.id(), group = %name, "Join of private group refused");
            event.close();
            return;
        }

        match context.groups.join(name, event.connection().clone()) {
            JoinOutcome::Joined(group) => {
                tracing::debug!(connection_id = %event.id(), group = %group.name(), members = group.len(), "Joined group");
                self.group = Some(group);
            }
            JoinOutcome::NoSuchGroup => {
                event.close();
            }
        }
    }

    fn on_message(&mut self, event: &WebSocketEvent, message: Message) {
        if let Some(group) = &self.group {
            event.send_to_group(group.name(), &message, false);
        }
    }

    fn on_close(&mut self, event: &WebSocketEvent) {
        if let Some(group) = self.group.take() {
            let outcome = event.context().groups.leave(group.name(), event.id());
            if outcome.group_removed {
                tracing::debug!(group = %group.name(), "Removed empty group");
            }
        }
    }
}
