//! Connection state machine and lifecycle tracking.
//!
//! # Responsibilities
//! - Generate unique connection IDs for tracing
//! - Track the per-connection state machine
//! - Count active connections so shutdown can drain them

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::websocket::frame::FrameError;

/// Relaxed ordering is enough for a counter that only needs uniqueness.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Errors that end a connection.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Request head exceeds {limit} bytes")]
    HeadTooLarge { limit: usize },
    #[error("Request body exceeds {limit} bytes")]
    BodyTooLarge { limit: usize },
    #[error("Malformed request: {0}")]
    Malformed(&'static str),
    #[error("Peer closed the connection")]
    PeerClosed,
    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),
    #[error("Invalid state transition {from:?} -> {to:?}")]
    InvalidTransition {
        from: ConnectionState,
        to: ConnectionState,
    },
}

/// Where a connection is in its lifetime. Each state is entered at most once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    AwaitingRequestLine,
    ParsingHeaders,
    StaticFile,
    DispatchController,
    UpgradeWebSocket,
    WsFrameLoop,
    Closed,
}

impl ConnectionState {
    /// Whether `next` may follow `self`.
    pub fn can_advance_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        match (self, next) {
            (_, Closed) => self != Closed,
            (AwaitingRequestLine, ParsingHeaders) => true,
            (ParsingHeaders, StaticFile | DispatchController | UpgradeWebSocket) => true,
            (UpgradeWebSocket, WsFrameLoop) => true,
            _ => false,
        }
    }
}

/// Per-connection state cursor.
#[derive(Debug)]
pub struct ConnectionLifecycle {
    id: ConnectionId,
    state: ConnectionState,
}

impl ConnectionLifecycle {
    pub fn new(id: ConnectionId) -> Self {
        Self {
            id,
            state: ConnectionState::AwaitingRequestLine,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn advance(&mut self, next: ConnectionState) -> Result<(), ConnectionError> {
        if !self.state.can_advance_to(next) {
            return Err(ConnectionError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        tracing::trace!(connection_id = %self.id, from = ?self.state, to = ?next, "State change");
        self.state = next;
        Ok(())
    }

    /// Move to `Closed` unless already there.
    pub fn close(&mut self) {
        if self.state != ConnectionState::Closed {
            self.state = ConnectionState::Closed;
        }
    }
}

/// Tracks active connections for graceful shutdown.
#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    active_count: Arc<AtomicU64>,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new active connection. Returns a guard that decrements on drop.
    pub fn track(&self) -> ConnectionGuard {
        self.active_count.fetch_add(1, Ordering::SeqCst);
        ConnectionGuard {
            active_count: Arc::clone(&self.active_count),
            id: ConnectionId::new(),
        }
    }

    pub fn active_count(&self) -> u64 {
        self.active_count.load(Ordering::SeqCst)
    }

    /// Wait until all connections are closed or `grace` elapses.
    ///
    /// Returns the number of connections still open.
    pub async fn wait_for_drain(&self, grace: Duration) -> u64 {
        let deadline = tokio::time::Instant::now() + grace;
        while self.active_count() > 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        self.active_count()
    }
}

/// Guard that tracks a connection's lifetime.
#[derive(Debug)]
pub struct ConnectionGuard {
    active_count: Arc<AtomicU64>,
    id: ConnectionId,
}

impl ConnectionGuard {
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.active_count.fetch_sub(1, Ordering::SeqCst);
        tracing::trace!(connection_id = %self.id, "Connection closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_id_unique() {
        let id1 = ConnectionId::new();
        let id2 = ConnectionId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn connection_tracker_counts() {
        let tracker = ConnectionTracker::new();
        assert_eq!(tracker.active_count(), 0);

        let guard1 = tracker.track();
        let guard2 = tracker.track();
        assert_eq!(tracker.active_count(), 2);
        assert_ne!(guard1.id(), guard2.id());

        drop(guard1);
        assert_eq!(tracker.active_count(), 1);
        drop(guard2);
        assert_eq!(tracker.active_count(), 0);
    }

    #[test]
    fn websocket_path_through_states() {
        let mut lifecycle = ConnectionLifecycle::new(ConnectionId::new());
        lifecycle.advance(ConnectionState::ParsingHeaders).unwrap();
        lifecycle.advance(ConnectionState::UpgradeWebSocket).unwrap();
        lifecycle.advance(ConnectionState::WsFrameLoop).unwrap();
        lifecycle.close();
        assert_eq!(lifecycle.state(), ConnectionState::Closed);
    }

    #[test]
    fn states_are_not_reentered() {
        let mut lifecycle = ConnectionLifecycle::new(ConnectionId::new());
        lifecycle.advance(ConnectionState::ParsingHeaders).unwrap();
        lifecycle.advance(ConnectionState::StaticFile).unwrap();

        assert!(lifecycle.advance(ConnectionState::DispatchController).is_err());
        assert!(lifecycle.advance(ConnectionState::ParsingHeaders).is_err());
        assert!(!ConnectionState::Closed.can_advance_to(ConnectionState::Closed));
    }

    #[tokio::test]
    async fn drain_returns_when_idle() {
        let tracker = ConnectionTracker::new();
        let guard = tracker.track();
        let remaining = tracker.wait_for_drain(Duration::from_millis(60)).await;
        assert_eq!(remaining, 1);

        drop(guard);
        assert_eq!(tracker.wait_for_drain(Duration::from_secs(1)).await, 0);
    }
}
