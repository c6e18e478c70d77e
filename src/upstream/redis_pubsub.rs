//! Redis pub/sub source.

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use tracing::info;

use super::{Subscription, Upstream};
use crate::hub::Payload;
use crate::utils::error::UpstreamError;

pub struct RedisUpstream {
    client: redis::Client,
}

impl RedisUpstream {
    /// Opens a client for `url` and checks the server answers `PING`, so an
    /// unreachable Redis fails start-up instead of the first subscribe.
    pub async fn connect(url: &str) -> Result<Self, UpstreamError> {
        let client = redis::Client::open(url)?;
        let mut connection = client.get_multiplexed_async_connection().await?;
        let reply: String = redis::cmd("PING").query_async(&mut connection).await?;
        info!(reply = %reply, "connected to redis");
        Ok(Self { client })
    }
}

/// Messages of one subscribed channel. The stream ends when the pub/sub
/// connection is lost.
pub struct RedisSubscription {
    channel: String,
    messages: Pin<Box<dyn Stream<Item = redis::Msg> + Send>>,
}

/// The published bytes of `msg`, never rejected for their encoding.
pub(super) fn payload_of(msg: &redis::Msg) -> Payload {
    Payload::from_bytes(msg.get_payload_bytes().to_vec())
}

#[async_trait]
impl Upstream for RedisUpstream {
    type Subscription = RedisSubscription;

    async fn subscribe(&self, channel: &str) -> Result<RedisSubscription, UpstreamError> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(channel).await?;
        Ok(RedisSubscription {
            channel: channel.to_string(),
            messages: Box::pin(pubsub.into_on_message()),
        })
    }
}

#[async_trait]
impl Subscription for RedisSubscription {
    async fn receive(&mut self) -> Result<Payload, UpstreamError> {
        match self.messages.next().await {
            Some(msg) => Ok(payload_of(&msg)),
            None => Err(UpstreamError::Closed(self.channel.clone())),
        }
    }
}
