//! Hub engine
//!
//! One hub per topic. It owns the registry of connected clients and is the
//! single fan-out point for that topic:
//! - `register` / `unregister` mutate the registry
//! - `broadcast` offers a message to every registered client's queue
//!
//! All three run under the same mutex, so a broadcast sees the registry
//! either strictly before or strictly after any concurrent registration.
//! Enqueue is non-blocking: a client whose queue is full loses that one
//! message (counted and logged) and nobody else is held up. The lock is
//! never held across an `.await`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
#[cfg(test)]
use std::sync::TryLockError;

use serde::Serialize;
use tracing::{debug, info, warn};

use super::client::{Client, ClientId, ClientKind, ConnectionState, Enqueue, Outbox, Registration};
use super::message::{DeliveryClock, Message, Payload};

/// Outcome of one broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Delivery identifier stamped on the message.
    pub id: u64,
    /// Clients the message was queued for.
    pub delivered: usize,
    /// Clients skipped because their queue was full.
    pub dropped: usize,
    /// Clients whose delivery loop is already gone.
    pub closed: usize,
}

/// Point-in-time counters of a hub.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HubStats {
    pub name: String,
    pub clients: usize,
    pub event_stream_clients: usize,
    pub socket_clients: usize,
    pub broadcasts: u64,
    pub dropped: u64,
}

#[derive(Debug, Default)]
struct Registry {
    clients: HashMap<ClientId, Client>,
    clock: DeliveryClock,
    broadcasts: u64,
    dropped: u64,
}

#[derive(Debug)]
pub struct Hub {
    name: String,
    event: Arc<str>,
    queue_capacity: usize,
    registry: Mutex<Registry>,
}

impl Hub {
    /// Creates an empty hub whose messages carry the `event` name and whose
    /// clients get queues of `queue_capacity` messages.
    pub fn new(name: impl Into<String>, event: impl Into<Arc<str>>, queue_capacity: usize) -> Self {
        Self {
            name: name.into(),
            event: event.into(),
            queue_capacity: queue_capacity.max(1),
            registry: Mutex::new(Registry::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn event(&self) -> &str {
        &self.event
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        // The registry stays consistent even if a holder panicked: every
        // mutation is a single map operation.
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds a freshly built client. Subsequent broadcasts include it.
    pub fn register(&self, client: Client) {
        let id = client.id().clone();
        let kind = client.kind();
        let total = {
            let mut registry = self.registry();
            registry.clients.insert(id.clone(), client);
            registry.clients.len()
        };
        info!(hub = %self.name, client = %id, kind = %kind, clients = total, "client registered");
    }

    /// Removes a client and closes its queue. Removing an absent client is a
    /// no-op; returns whether the client was registered.
    pub fn unregister(&self, id: &ClientId) -> bool {
        let (removed, total) = {
            let mut registry = self.registry();
            let removed = registry.clients.remove(id);
            (removed, registry.clients.len())
        };
        // Dropping the removed client closes its queue, outside the lock.
        match removed {
            Some(client) => {
                info!(
                    hub = %self.name,
                    client = %id,
                    kind = %client.kind(),
                    dropped = client.dropped(),
                    clients = total,
                    "client unregistered"
                );
                true
            }
            None => false,
        }
    }

    /// Builds a client with this hub's queue capacity and registers it.
    ///
    /// The returned guard unregisters the client when dropped; the outbox is
    /// the client's end of the queue.
    pub fn attach(self: &Arc<Self>, kind: ClientKind) -> (Registration, Outbox) {
        let (client, outbox) = Client::new(kind, self.queue_capacity);
        let mut registration = Registration::new(Arc::clone(self), client.id().clone(), kind);
        self.register(client);
        registration.advance(ConnectionState::Registered);
        (registration, outbox)
    }

    /// Offers `payload` to every registered client, stamped with the next
    /// delivery identifier.
    pub fn broadcast(&self, payload: impl Into<Payload>) -> BroadcastReport {
        let payload = payload.into();
        // (client, its total drops) for every client whose queue was full
        let mut full: Vec<(ClientId, u64)> = Vec::new();

        let (message, report) = {
            let mut guard = self.registry();
            let registry = &mut *guard;

            let message = Arc::new(Message {
                id: registry.clock.next(),
                event: Arc::clone(&self.event),
                payload,
            });
            let mut report = BroadcastReport {
                id: message.id,
                delivered: 0,
                dropped: 0,
                closed: 0,
            };

            for (id, client) in registry.clients.iter_mut() {
                match client.offer(&message) {
                    Enqueue::Delivered => report.delivered += 1,
                    Enqueue::Full => {
                        report.dropped += 1;
                        full.push((id.clone(), client.dropped()));
                    }
                    Enqueue::Closed => report.closed += 1,
                }
            }

            registry.broadcasts += 1;
            registry.dropped += report.dropped as u64;
            (message, report)
        };

        // Logged with the registry unlocked.
        for (client, total_drops) in &full {
            warn!(
                hub = %self.name,
                client = %client,
                message_id = message.id,
                total_drops,
                "client queue full, dropping message"
            );
        }
        debug!(
            hub = %self.name,
            message_id = message.id,
            bytes = message.payload.len(),
            delivered = report.delivered,
            dropped = report.dropped,
            closed = report.closed,
            "broadcast message"
        );
        report
    }

    /// Whether the registry lock is currently held.
    #[cfg(test)]
    pub(crate) fn registry_locked(&self) -> bool {
        matches!(self.registry.try_lock(), Err(TryLockError::WouldBlock))
    }

    pub fn client_count(&self) -> usize {
        self.registry().clients.len()
    }

    pub fn contains(&self, id: &ClientId) -> bool {
        self.registry().clients.contains_key(id)
    }

    pub fn stats(&self) -> HubStats {
        let registry = self.registry();
        let socket_clients = registry
            .clients
            .values()
            .filter(|c| c.kind() == ClientKind::SendReceive)
            .count();
        HubStats {
            name: self.name.clone(),
            clients: registry.clients.len(),
            event_stream_clients: registry.clients.len() - socket_clients,
            socket_clients,
            broadcasts: registry.broadcasts,
            dropped: registry.dropped,
        }
    }
}
