//! Per-connection WebSocket read loop.
//!
//! ```text
//! handshake written → writer task spawned → peers.join(route) → on_open
//!     loop: socket read → FrameDecoder::feed → on_message*
//!     exits on: peer close frame | EOF | I/O error | protocol error | close()
//! peers.leave(route) → on_close (exactly once) → writer drained
//! ```

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::context::ServerContext;
use crate::http::request::HttpRequest;
use crate::net::connection::{ConnectionError, ConnectionId};
use crate::observability::metrics;
use crate::websocket::connection::{run_writer, EncoderSettings, WebSocketConnection};
use crate::websocket::event::{WebSocketController, WebSocketEvent, WebSocketFactory};
use crate::websocket::frame::{Decoded, FrameDecoder};
use crate::websocket::handshake::handshake_response;

/// Why the read loop ended.
#[derive(Debug)]
enum Exit {
    PeerClose,
    LocalClose,
    Eof { mid_frame: bool },
    Failed(ConnectionError),
}

/// A request that resolved to a WebSocket route.
pub struct Upgrade {
    pub request: HttpRequest,
    /// Bytes read past the request head.
    pub leftover: Vec<u8>,
    pub factory: WebSocketFactory,
    pub args: Vec<String>,
    pub route: String,
}

/// Complete the upgrade on `stream` and run the connection to the end.
pub async fn serve<S>(
    stream: S,
    upgrade: Upgrade,
    context: Arc<ServerContext>,
    id: ConnectionId,
) -> Result<(), ConnectionError>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let Upgrade {
        request,
        leftover,
        factory,
        args,
        route,
    } = upgrade;
    let key = request
        .header("Sec-WebSocket-Key")
        .ok_or(ConnectionError::Malformed("missing Sec-WebSocket-Key"))?
        .to_string();
    let mut handshake = handshake_response(&key).serialize();
    handshake.push_str("\r\n");

    let (mut reader, mut writer) = tokio::io::split(Box::pin(stream));
    writer.write_all(handshake.as_bytes()).await?;
    metrics::record_http_request("upgrade", 101);

    let ws = &context.config.websocket;
    let settings = EncoderSettings {
        chunk_size: ws.chunk_size,
        fragmentation: ws.fragmentation,
    };
    let mtu = ws.mtu;
    let mut decoder = FrameDecoder::new(ws.max_message_bytes);

    let (connection, outbound) = WebSocketConnection::new(id, settings);
    let writer_task = tokio::spawn(run_writer(writer, outbound, connection.clone()));

    // Unrouted connections have no peer group.
    if !route.is_empty() {
        context.peers.join_or_create(&route, connection.clone());
    }
    let event = WebSocketEvent::new(
        connection.clone(),
        request,
        args,
        route.clone(),
        Arc::clone(&context),
    );
    let mut controller = factory();

    tracing::debug!(connection_id = %id, route = %route, "WebSocket opened");
    controller.on_open(&event);

    let exit = if connection.is_closed() {
        Exit::LocalClose
    } else {
        match deliver(&mut decoder, &leftover, controller.as_mut(), &event) {
            Some(exit) => exit,
            None => read_loop(&mut reader, mtu, &mut decoder, controller.as_mut(), &event).await,
        }
    };

    match &exit {
        Exit::Failed(e) => tracing::warn!(connection_id = %id, error = %e, "WebSocket failed"),
        Exit::Eof { mid_frame: true } => {
            tracing::debug!(connection_id = %id, "Peer closed mid-frame")
        }
        other => tracing::debug!(connection_id = %id, exit = ?other, "WebSocket ended"),
    }

    connection.close();
    if !route.is_empty() {
        context.peers.leave(&route, id);
    }
    controller.on_close(&event);

    if writer_task.await.is_err() {
        tracing::debug!(connection_id = %id, "Writer task aborted");
    }
    Ok(())
}

async fn read_loop<R>(
    reader: &mut R,
    mtu: usize,
    decoder: &mut FrameDecoder,
    controller: &mut dyn WebSocketController,
    event: &WebSocketEvent,
) -> Exit
where
    R: AsyncRead + Unpin,
{
    let mut buffer = vec![0u8; mtu.max(1)];
    loop {
        let n = tokio::select! {
            read = reader.read(&mut buffer) => match read {
                Ok(n) => n,
                Err(e) => return Exit::Failed(e.into()),
            },
            _ = event.connection().closed() => return Exit::LocalClose,
        };

        if n == 0 {
            return Exit::Eof {
                mid_frame: !decoder.is_idle(),
            };
        }
        if let Some(exit) = deliver(decoder, &buffer[..n], controller, event) {
            return exit;
        }
    }
}

/// Decode `bytes` and hand complete messages to the controller.
fn deliver(
    decoder: &mut FrameDecoder,
    bytes: &[u8],
    controller: &mut dyn WebSocketController,
    event: &WebSocketEvent,
) -> Option<Exit> {
    if bytes.is_empty() {
        return None;
    }
    let decoded = match decoder.feed(bytes) {
        Ok(decoded) => decoded,
        Err(e) => return Some(Exit::Failed(e.into())),
    };

    for item in decoded {
        match item {
            Decoded::Message(message) => {
                metrics::record_ws_message("in");
                controller.on_message(event, message);
                if event.is_closed() {
                    return Some(Exit::LocalClose);
                }
            }
            Decoded::Close => return Some(Exit::PeerClose),
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use tokio::io::DuplexStream;

    use crate::config::ServerConfig;
    use crate::context::ServerBuilder;
    use crate::websocket::frame::Message;

    const UPGRADE: &[u8] = b"GET /record HTTP/1.1\r\n\
        Upgrade: websocket\r\n\
        Connection: Upgrade\r\n\
        Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\r\n";

    #[derive(Default)]
    struct Calls {
        opened: AtomicUsize,
        closed: AtomicUsize,
        messages: Mutex<Vec<Vec<u8>>>,
    }

    #[derive(Clone, Copy)]
    enum CloseFrom {
        Never,
        Open,
        Message,
    }

    struct Recorder {
        calls: Arc<Calls>,
        close_from: CloseFrom,
    }

    impl WebSocketController for Recorder {
        fn on_open(&mut self, event: &WebSocketEvent) {
            self.calls.opened.fetch_add(1, Ordering::SeqCst);
            if matches!(self.close_from, CloseFrom::Open) {
                event.close();
            }
        }

        fn on_message(&mut self, event: &WebSocketEvent, message: Message) {
            self.calls.messages.lock().unwrap().push(message.payload);
            if matches!(self.close_from, CloseFrom::Message) {
                event.close();
            }
        }

        fn on_close(&mut self, _event: &WebSocketEvent) {
            self.calls.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// A client frame, masked as the protocol requires.
    fn masked(first_byte: u8, payload: &[u8]) -> Vec<u8> {
        let mask = [0x37, 0xfa, 0x21, 0x3d];
        let mut frame = vec![first_byte, 0x80 | payload.len() as u8];
        frame.extend_from_slice(&mask);
        frame.extend(payload.iter().enumerate().map(|(i, b)| b ^ mask[i % 4]));
        frame
    }

    struct Harness {
        calls: Arc<Calls>,
        context: Arc<ServerContext>,
        server: tokio::task::JoinHandle<Result<(), ConnectionError>>,
    }

    /// Run `serve` on one end of a duplex pipe; returns the client end once
    /// the handshake has been read.
    async fn start(close_from: CloseFrom, leftover: Vec<u8>) -> (DuplexStream, Harness) {
        let context = ServerBuilder::new(ServerConfig::default()).build();
        let calls = Arc::new(Calls::default());
        let factory_calls = Arc::clone(&calls);
        let factory: WebSocketFactory = Arc::new(move || {
            Box::new(Recorder {
                calls: Arc::clone(&factory_calls),
                close_from,
            }) as Box<dyn WebSocketController>
        });
        let upgrade = Upgrade {
            request: HttpRequest::parse(UPGRADE).unwrap(),
            leftover,
            factory,
            args: Vec::new(),
            route: "/record".to_string(),
        };

        let (mut client, server_side) = tokio::io::duplex(64 * 1024);
        let server = tokio::spawn(serve(
            server_side,
            upgrade,
            Arc::clone(&context),
            ConnectionId::new(),
        ));

        let mut head = Vec::new();
        let mut byte = [0u8; 1];
        while !head.ends_with(b"\r\n\r\n") {
            client.read_exact(&mut byte).await.unwrap();
            head.push(byte[0]);
        }
        assert!(head.starts_with(b"HTTP/1.1 101 Switching Protocols\r\n"));

        (
            client,
            Harness {
                calls,
                context,
                server,
            },
        )
    }

    impl Harness {
        async fn finish(self) -> (Arc<Calls>, Arc<ServerContext>) {
            let result = tokio::time::timeout(Duration::from_secs(2), self.server)
                .await
                .expect("connection should end")
                .unwrap();
            assert!(result.is_ok());
            (self.calls, self.context)
        }
    }

    fn assert_closed_once(calls: &Calls) {
        assert_eq!(calls.opened.load(Ordering::SeqCst), 1);
        assert_eq!(calls.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn peer_close_frame_is_answered() {
        let (mut client, harness) = start(CloseFrom::Never, Vec::new()).await;
        client.write_all(&masked(0x81, b"hi")).await.unwrap();
        client.write_all(&masked(0x88, b"")).await.unwrap();

        let mut reply = Vec::new();
        client.read_to_end(&mut reply).await.unwrap();
        assert_eq!(reply, vec![0x88, 0x00]);

        let (calls, context) = harness.finish().await;
        assert_closed_once(&calls);
        assert_eq!(*calls.messages.lock().unwrap(), vec![b"hi".to_vec()]);
        assert!(context.peers.is_empty());
    }

    #[tokio::test]
    async fn eof_ends_connection() {
        let (client, harness) = start(CloseFrom::Never, Vec::new()).await;
        drop(client);

        let (calls, context) = harness.finish().await;
        assert_closed_once(&calls);
        assert!(context.peers.is_empty());
    }

    #[tokio::test]
    async fn eof_mid_frame_ends_connection() {
        let (mut client, harness) = start(CloseFrom::Never, Vec::new()).await;
        let frame = masked(0x82, b"partial");
        client.write_all(&frame[..5]).await.unwrap();
        client.shutdown().await.unwrap();

        let (calls, _) = harness.finish().await;
        assert_closed_once(&calls);
        assert!(calls.messages.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unmasked_frame_is_fatal() {
        let (mut client, harness) = start(CloseFrom::Never, Vec::new()).await;
        client.write_all(&[0x81, 0x01, b'x']).await.unwrap();

        let (calls, _) = harness.finish().await;
        assert_closed_once(&calls);
        assert!(calls.messages.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn close_from_on_open_skips_messages() {
        let (mut client, harness) = start(CloseFrom::Open, masked(0x81, b"early")).await;

        let mut reply = Vec::new();
        client.read_to_end(&mut reply).await.unwrap();
        assert_eq!(reply, vec![0x88, 0x00]);

        let (calls, _) = harness.finish().await;
        assert_closed_once(&calls);
        assert!(calls.messages.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn close_from_on_message_stops_delivery() {
        let (mut client, harness) = start(CloseFrom::Message, Vec::new()).await;
        let mut frames = masked(0x81, b"one");
        frames.extend(masked(0x81, b"two"));
        client.write_all(&frames).await.unwrap();

        let (calls, _) = harness.finish().await;
        assert_closed_once(&calls);
        assert_eq!(*calls.messages.lock().unwrap(), vec![b"one".to_vec()]);
    }

    #[tokio::test]
    async fn leftover_bytes_reach_controller() {
        let mut leftover = masked(0x81, b"early");
        leftover.extend(masked(0x88, b""));
        let (_client, harness) = start(CloseFrom::Never, leftover).await;

        let (calls, _) = harness.finish().await;
        assert_closed_once(&calls);
        assert_eq!(*calls.messages.lock().unwrap(), vec![b"early".to_vec()]);
    }
}
