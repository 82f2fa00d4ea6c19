//! Connection state machine and its shared monitor.
//!
//! [`Connection`] is pure: it consumes transport events and reports the new
//! state, with no I/O. [`ConnectionMonitor`] wraps it for process-wide use:
//! writes are serialized, reads are a lock-free snapshot, and async waiters
//! can observe the moment the connection drops.
//!
//! # State Machine
//!
//! ```text
//!                ConnectRequested              Authenticated
//! ┌──────────────┐ ──────────────> ┌────────────┐ ──────────> ┌───────────┐
//! │ Disconnected │                 │ Connecting │             │ Connected │
//! └──────────────┘ <────────────── └────────────┘             └───────────┘
//!        ^        ConnectFailed/Disconnect                          │
//!        └──────────────────────────────────────────────────────────┘
//!                         TransportLost/Disconnect
//! ```
//!
//! Reaching `Connected` does not replay anything: callers re-check the state
//! before each effectful send.

use std::{
    fmt,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicU8, Ordering},
    },
};

use tokio::sync::watch;
use tracing::{debug, info};

use crate::error::ConnectionError;

/// Transport connectivity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No connection and none in progress
    #[default]
    Disconnected,
    /// Connecting or authenticating
    Connecting,
    /// Authenticated; sends and read receipts are allowed
    Connected,
}

impl ConnectionState {
    const fn to_u8(self) -> u8 {
        match self {
            Self::Disconnected => 0,
            Self::Connecting => 1,
            Self::Connected => 2,
        }
    }

    const fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Connecting,
            2 => Self::Connected,
            _ => Self::Disconnected,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        })
    }
}

/// Transport-level events that drive the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Transport started a connection attempt
    ConnectRequested,
    /// Transport finished authentication
    Authenticated,
    /// Connection attempt failed
    ConnectFailed {
        /// Transport-provided reason
        reason: String,
    },
    /// Established connection dropped
    TransportLost {
        /// Transport-provided reason
        reason: String,
    },
    /// Local, deliberate disconnect
    Disconnect,
}

impl ConnectionEvent {
    /// Short name for logs and errors.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::ConnectRequested => "connect_requested",
            Self::Authenticated => "authenticated",
            Self::ConnectFailed { .. } => "connect_failed",
            Self::TransportLost { .. } => "transport_lost",
            Self::Disconnect => "disconnect",
        }
    }
}

/// Pure connection state machine.
#[derive(Debug, Clone, Default)]
pub struct Connection {
    state: ConnectionState,
}

impl Connection {
    /// Machine in [`ConnectionState::Disconnected`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Apply `event` and return the resulting state.
    ///
    /// Disconnect-type events while already disconnected are accepted as
    /// no-ops so that duplicate transport notifications are harmless.
    ///
    /// # Errors
    ///
    /// - `ConnectionError::InvalidTransition` for any other event that does
    ///   not apply to the current state; the state is left unchanged
    pub fn handle(&mut self, event: &ConnectionEvent) -> Result<ConnectionState, ConnectionError> {
        use ConnectionEvent as Ev;
        use ConnectionState as St;

        let next = match (self.state, event) {
            (St::Disconnected, Ev::ConnectRequested) => St::Connecting,
            (St::Connecting, Ev::Authenticated) => St::Connected,
            (St::Connecting, Ev::ConnectFailed { .. } | Ev::Disconnect)
            | (St::Connected, Ev::TransportLost { .. } | Ev::Disconnect)
            | (St::Disconnected, Ev::Disconnect | Ev::TransportLost { .. }) => St::Disconnected,
            (state, event) => {
                return Err(ConnectionError::InvalidTransition { state, event: event.name() });
            },
        };

        self.state = next;
        Ok(next)
    }
}

struct MonitorInner {
    machine: Mutex<Connection>,
    snapshot: AtomicU8,
    changes: watch::Sender<ConnectionState>,
}

/// Process-wide handle to the connection state.
///
/// Clones share the same state. Only the transport event handler should call
/// [`apply`](Self::apply); pipelines read through [`state`](Self::state) and
/// [`ensure_connected`](Self::ensure_connected).
#[derive(Clone)]
pub struct ConnectionMonitor {
    inner: Arc<MonitorInner>,
}

impl ConnectionMonitor {
    /// Monitor starting in [`ConnectionState::Disconnected`].
    pub fn new() -> Self {
        let (changes, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(MonitorInner {
                machine: Mutex::new(Connection::new()),
                snapshot: AtomicU8::new(ConnectionState::Disconnected.to_u8()),
                changes,
            }),
        }
    }

    /// Lock-free snapshot of the current state. May be one transition stale.
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.inner.snapshot.load(Ordering::Acquire))
    }

    /// Feed a transport event through the state machine.
    pub fn apply(&self, event: &ConnectionEvent) -> Result<ConnectionState, ConnectionError> {
        let mut machine = self.inner.machine.lock().unwrap_or_else(PoisonError::into_inner);
        let before = machine.state();
        let after = machine.handle(event)?;

        self.inner.snapshot.store(after.to_u8(), Ordering::Release);
        self.inner.changes.send_replace(after);
        drop(machine);

        if before == after {
            debug!(state = %after, event = event.name(), "connection event without transition");
        } else {
            info!(from = %before, to = %after, event = event.name(), "connection state changed");
        }
        Ok(after)
    }

    /// Gate for effectful operations.
    pub fn ensure_connected(&self) -> Result<(), ConnectionError> {
        match self.state() {
            ConnectionState::Connected => Ok(()),
            state => Err(ConnectionError::NotConnected { state }),
        }
    }

    /// Receiver notified on every state change.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.inner.changes.subscribe()
    }

    /// Resolves once the state is anything other than `Connected`.
    ///
    /// Used to race in-flight sends so they fail fast instead of hanging when
    /// the transport goes away.
    pub async fn lost(&self) -> ConnectionError {
        let mut changes = self.subscribe();
        let state = match changes.wait_for(|state| *state != ConnectionState::Connected).await {
            Ok(state) => *state,
            Err(_) => ConnectionState::Disconnected,
        };
        ConnectionError::NotConnected { state }
    }
}

impl Default for ConnectionMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ConnectionMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionMonitor").field("state", &self.state()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lost() -> ConnectionEvent {
        ConnectionEvent::TransportLost { reason: "reset".to_string() }
    }

    #[test]
    fn full_lifecycle() {
        let mut conn = Connection::new();
        assert_eq!(conn.state(), ConnectionState::Disconnected);

        assert_eq!(conn.handle(&ConnectionEvent::ConnectRequested), Ok(ConnectionState::Connecting));
        assert_eq!(conn.handle(&ConnectionEvent::Authenticated), Ok(ConnectionState::Connected));
        assert_eq!(conn.handle(&lost()), Ok(ConnectionState::Disconnected));
    }

    #[test]
    fn failed_attempt_returns_to_disconnected() {
        let mut conn = Connection::new();
        conn.handle(&ConnectionEvent::ConnectRequested).unwrap();
        let failed = ConnectionEvent::ConnectFailed { reason: "refused".to_string() };

        assert_eq!(conn.handle(&failed), Ok(ConnectionState::Disconnected));
    }

    #[test]
    fn connecting_can_be_abandoned() {
        let mut conn = Connection::new();
        conn.handle(&ConnectionEvent::ConnectRequested).unwrap();
        assert_eq!(conn.handle(&ConnectionEvent::Disconnect), Ok(ConnectionState::Disconnected));
    }

    #[test]
    fn authenticate_requires_connecting() {
        let mut conn = Connection::new();
        let result = conn.handle(&ConnectionEvent::Authenticated);

        assert_eq!(
            result,
            Err(ConnectionError::InvalidTransition {
                state: ConnectionState::Disconnected,
                event: "authenticated",
            })
        );
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn duplicate_connect_request_is_rejected() {
        let mut conn = Connection::new();
        conn.handle(&ConnectionEvent::ConnectRequested).unwrap();
        assert!(conn.handle(&ConnectionEvent::ConnectRequested).is_err());
        assert_eq!(conn.state(), ConnectionState::Connecting);
    }

    #[test]
    fn repeated_loss_is_idempotent() {
        let mut conn = Connection::new();
        assert_eq!(conn.handle(&lost()), Ok(ConnectionState::Disconnected));
        assert_eq!(conn.handle(&ConnectionEvent::Disconnect), Ok(ConnectionState::Disconnected));
    }

    #[test]
    fn monitor_snapshot_follows_transitions() {
        let monitor = ConnectionMonitor::new();
        let reader = monitor.clone();

        assert_eq!(
            reader.ensure_connected(),
            Err(ConnectionError::NotConnected { state: ConnectionState::Disconnected })
        );

        monitor.apply(&ConnectionEvent::ConnectRequested).unwrap();
        assert_eq!(reader.state(), ConnectionState::Connecting);

        monitor.apply(&ConnectionEvent::Authenticated).unwrap();
        assert!(reader.ensure_connected().is_ok());
        assert_eq!(*reader.subscribe().borrow(), ConnectionState::Connected);
    }

    #[test]
    fn rejected_event_leaves_snapshot_untouched() {
        let monitor = ConnectionMonitor::new();
        assert!(monitor.apply(&ConnectionEvent::Authenticated).is_err());
        assert_eq!(monitor.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn lost_resolves_when_connection_drops() {
        let monitor = ConnectionMonitor::new();
        monitor.apply(&ConnectionEvent::ConnectRequested).unwrap();
        monitor.apply(&ConnectionEvent::Authenticated).unwrap();

        let waiter = monitor.clone();
        let handle = tokio::spawn(async move { waiter.lost().await });
        tokio::task::yield_now().await;

        monitor.apply(&lost()).unwrap();
        let err = handle.await.unwrap();
        assert_eq!(err, ConnectionError::NotConnected { state: ConnectionState::Disconnected });
    }

    #[tokio::test]
    async fn lost_is_immediate_when_not_connected() {
        let monitor = ConnectionMonitor::new();
        assert_eq!(
            monitor.lost().await,
            ConnectionError::NotConnected { state: ConnectionState::Disconnected }
        );
    }
}
