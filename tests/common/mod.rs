//! Shared utilities for integration tests.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use arcway::config::ServerConfig;
use arcway::net::listener::Listener;
use arcway::{HttpServer, ServerBuilder, ServerContext, Shutdown};

/// A running server on an ephemeral port with its own web root.
///
/// Dropping it stops the server and removes the web root.
pub struct TestServer {
    pub addr: SocketAddr,
    pub context: Arc<ServerContext>,
    pub shutdown: Shutdown,
    web_root: TempDir,
}

impl TestServer {
    pub fn http_url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn ws_url(&self, path: &str) -> String {
        format!("ws://{}{}", self.addr, path)
    }

    #[allow(dead_code)]
    pub fn web_root(&self) -> &Path {
        self.web_root.path()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

/// Start a server with the built-in controllers plus whatever `routes` adds.
pub async fn start<C, R>(configure: C, routes: R) -> TestServer
where
    C: FnOnce(&mut ServerConfig),
    R: FnOnce(ServerBuilder) -> ServerBuilder,
{
    let web_root = tempfile::tempdir().unwrap();
    let root = web_root.path();
    std::fs::write(root.join("index.html"), "<h1>index</h1>").unwrap();
    std::fs::write(root.join("style.css"), "body { margin: 0; }").unwrap();
    std::fs::write(root.join("404.html"), "<h1>not here</h1>").unwrap();

    let mut config = ServerConfig::default();
    config.listener.bind_address = "127.0.0.1:0".to_string();
    config.http.web_root = root.to_string_lossy().into_owned();
    config.http.shutdown_grace_secs = 1;
    configure(&mut config);

    let listener = Listener::bind(&config.listener).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let context = routes(ServerBuilder::new(config).with_builtin_controllers()).build();

    let shutdown = Shutdown::new();
    let server = HttpServer::new(Arc::clone(&context));
    let server_shutdown = shutdown.clone();
    tokio::spawn(async move {
        let _ = server.run(listener, server_shutdown).await;
    });

    TestServer {
        addr,
        context,
        shutdown,
        web_root,
    }
}

/// Poll `condition` until it holds or two seconds pass.
#[allow(dead_code)]
pub async fn eventually<F>(mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
