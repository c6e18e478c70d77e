use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::debug;
use uuid::Uuid;

use super::Hub;
use super::message::Message;

/// Unique identifier of one connected client.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientId(String);

impl ClientId {
    pub fn new() -> Self {
        Self(format!("client-{}", Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a client's transport can do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientKind {
    /// Event-stream clients only receive.
    SendOnly,
    /// Socket clients receive and also publish their inbound frames.
    SendReceive,
}

impl fmt::Display for ClientKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientKind::SendOnly => f.write_str("event-stream"),
            ClientKind::SendReceive => f.write_str("socket"),
        }
    }
}

/// Lifecycle of a client connection.
///
/// `Unregistering` is entered exactly once, when the [`Registration`] guard is
/// dropped, and is the only way to reach `Closed`. A client that never
/// started its delivery loop goes from `Registered` straight to
/// `Unregistering`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Registered,
    Streaming,
    Unregistering,
    Closed,
}

impl ConnectionState {
    pub fn can_advance_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Connecting, Registered)
                | (Registered, Streaming)
                | (Registered | Streaming, Unregistering)
                | (Unregistering, Closed)
        )
    }
}

/// Result of offering one message to one client's queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Enqueue {
    Delivered,
    Full,
    Closed,
}

/// A connected subscriber as held by the hub's registry.
///
/// The registry owns the only sending half of the client's queue, so removing
/// the client from the registry is what closes its queue.
#[derive(Debug)]
pub struct Client {
    id: ClientId,
    kind: ClientKind,
    sender: mpsc::Sender<Arc<Message>>,
    dropped: u64,
}

impl Client {
    /// Build a client with a fresh outbound queue of `capacity` messages.
    pub fn new(kind: ClientKind, capacity: usize) -> (Self, Outbox) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let client = Self {
            id: ClientId::new(),
            kind,
            sender,
            dropped: 0,
        };
        (client, Outbox { receiver })
    }

    pub fn id(&self) -> &ClientId {
        &self.id
    }

    pub fn kind(&self) -> ClientKind {
        self.kind
    }

    /// Messages this client has missed because its queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Non-blocking enqueue. Never waits on a slow consumer.
    pub(crate) fn offer(&mut self, message: &Arc<Message>) -> Enqueue {
        match self.sender.try_send(Arc::clone(message)) {
            Ok(()) => Enqueue::Delivered,
            Err(TrySendError::Full(_)) => {
                self.dropped += 1;
                Enqueue::Full
            }
            Err(TrySendError::Closed(_)) => Enqueue::Closed,
        }
    }
}

/// Receiving half of a client's outbound queue, drained by its delivery loop.
#[derive(Debug)]
pub struct Outbox {
    receiver: mpsc::Receiver<Arc<Message>>,
}

impl Outbox {
    /// Next queued message; `None` once the client has been unregistered and
    /// the queue is drained.
    pub async fn recv(&mut self) -> Option<Arc<Message>> {
        self.receiver.recv().await
    }

    /// Non-blocking variant of [`Outbox::recv`]. `None` when nothing is queued
    /// right now or the queue is closed.
    pub fn try_recv(&mut self) -> Option<Arc<Message>> {
        self.receiver.try_recv().ok()
    }
}

/// Scoped registration of one client with a hub.
///
/// Dropping the guard unregisters the client, whatever way the owning
/// connection handler exits.
pub struct Registration {
    hub: Arc<Hub>,
    id: ClientId,
    kind: ClientKind,
    state: ConnectionState,
}

impl Registration {
    /// A guard for a client that is not registered yet. The hub moves it to
    /// `Registered` once the client is in the registry.
    pub(crate) fn new(hub: Arc<Hub>, id: ClientId, kind: ClientKind) -> Self {
        Self {
            hub,
            id,
            kind,
            state: ConnectionState::Connecting,
        }
    }

    /// Moves to `next` and logs the transition. Transitions the lifecycle
    /// does not allow are ignored.
    pub(crate) fn advance(&mut self, next: ConnectionState) {
        if !self.state.can_advance_to(next) {
            return;
        }
        debug!(
            hub = self.hub.name(),
            client = %self.id,
            from = ?self.state,
            to = ?next,
            "connection state changed"
        );
        self.state = next;
    }

    pub fn id(&self) -> &ClientId {
        &self.id
    }

    pub fn kind(&self) -> ClientKind {
        self.kind
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    /// Marks the start of the delivery loop.
    pub fn begin_streaming(&mut self) {
        self.advance(ConnectionState::Streaming);
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("hub", &self.hub.name())
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("state", &self.state)
            .finish()
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.advance(ConnectionState::Unregistering);
        self.hub.unregister(&self.id);
        self.advance(ConnectionState::Closed);
    }
}
