//! The `hub` module is the fan-out core of the relay.
//!
//! A [`Hub`] keeps the registry of connected clients for one topic and
//! delivers every broadcast to each of them through a bounded per-client
//! queue. Transports attach clients with [`Hub::attach`] and drain the
//! returned [`Outbox`] in their delivery loop.

pub mod client;
pub mod engine;
pub mod message;

pub use client::{Client, ClientId, ClientKind, ConnectionState, Outbox, Registration};
pub use engine::{BroadcastReport, Hub, HubStats};
pub use message::{Message, Payload};

#[cfg(test)]
mod tests;
