//! The `upstream` module connects the relay to its pub/sub source.
//!
//! The relay needs two operations from a source: subscribe to a channel once,
//! then receive its messages one at a time. [`Upstream`] and
//! [`Subscription`] capture exactly that; [`listener`] runs the receive loop
//! that feeds a hub.

pub mod listener;
pub mod memory;
pub mod redis_pubsub;

use async_trait::async_trait;

use crate::hub::Payload;
use crate::utils::error::UpstreamError;

pub use listener::{Backoff, Listener, listen};
pub use memory::MemoryUpstream;
pub use redis_pubsub::RedisUpstream;

/// A pub/sub source the relay can subscribe to.
#[async_trait]
pub trait Upstream: Send + Sync {
    type Subscription: Subscription + 'static;

    async fn subscribe(&self, channel: &str) -> Result<Self::Subscription, UpstreamError>;
}

/// An active subscription to one channel.
#[async_trait]
pub trait Subscription: Send {
    /// Waits for the next message, passed through as received. Errors are
    /// not terminal: the caller may keep receiving.
    async fn receive(&mut self) -> Result<Payload, UpstreamError>;
}
