//! In-process pub/sub source backed by tokio broadcast channels.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use super::{Subscription, Upstream};
use crate::hub::Payload;
use crate::utils::error::UpstreamError;

/// Channels are created on first use. Messages published while a channel has
/// no subscriber are discarded, like any pub/sub server would.
#[derive(Debug, Clone)]
pub struct MemoryUpstream {
    channels: Arc<Mutex<HashMap<String, broadcast::Sender<String>>>>,
    capacity: usize,
}

impl MemoryUpstream {
    /// `capacity` bounds how far a subscriber may fall behind before it
    /// starts missing messages.
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Arc::new(Mutex::new(HashMap::new())),
            capacity: capacity.max(1),
        }
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<String> {
        let mut channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    /// Publishes `payload` on `channel`; returns how many subscribers got it.
    pub fn publish(&self, channel: &str, payload: impl Into<String>) -> usize {
        self.sender(channel).send(payload.into()).unwrap_or(0)
    }
}

impl Default for MemoryUpstream {
    fn default() -> Self {
        Self::new(256)
    }
}

pub struct MemorySubscription {
    channel: String,
    receiver: broadcast::Receiver<String>,
}

#[async_trait]
impl Upstream for MemoryUpstream {
    type Subscription = MemorySubscription;

    async fn subscribe(&self, channel: &str) -> Result<MemorySubscription, UpstreamError> {
        Ok(MemorySubscription {
            channel: channel.to_string(),
            receiver: self.sender(channel).subscribe(),
        })
    }
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn receive(&mut self) -> Result<Payload, UpstreamError> {
        match self.receiver.recv().await {
            Ok(payload) => Ok(Payload::Text(payload)),
            Err(RecvError::Lagged(skipped)) => Err(UpstreamError::Lagged(skipped)),
            Err(RecvError::Closed) => Err(UpstreamError::Closed(self.channel.clone())),
        }
    }
}
