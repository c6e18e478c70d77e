//! Upstream receive loop.
//!
//! One listener runs per upstream channel for the life of the process. It
//! subscribes once and then hands every received payload to its hub. Receive
//! errors are logged and retried after a bounded exponential backoff; the
//! loop never exits and never resubscribes.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::{Subscription, Upstream};
use crate::config::UpstreamSettings;
use crate::hub::Hub;
use crate::utils::error::UpstreamError;

/// Delay between consecutive receive failures.
///
/// Starts at `initial`, doubles per consecutive failure and is capped at
/// `max`. A zero `initial` retries immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max: max.max(initial),
        }
    }

    pub fn from_settings(settings: &UpstreamSettings) -> Self {
        Self::new(
            Duration::from_millis(settings.retry_initial_ms),
            Duration::from_millis(settings.retry_max_ms),
        )
    }

    /// Delay after the `failures`-th consecutive failure (1-based).
    pub fn delay(&self, failures: u32) -> Duration {
        if failures == 0 || self.initial.is_zero() {
            return Duration::ZERO;
        }
        let factor = 1u32 << (failures - 1).min(16);
        self.initial.saturating_mul(factor).min(self.max)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(50), Duration::from_secs(5))
    }
}

/// A subscribed channel bound to the hub it feeds.
pub struct Listener<S> {
    channel: String,
    subscription: S,
    hub: Arc<Hub>,
    backoff: Backoff,
}

impl<S: Subscription> Listener<S> {
    /// Subscribes to `channel` on `source`. A failure here is a start-up
    /// error and is returned to the caller.
    pub async fn subscribe<U>(
        source: &U,
        channel: &str,
        hub: Arc<Hub>,
        backoff: Backoff,
    ) -> Result<Self, UpstreamError>
    where
        U: Upstream<Subscription = S> + ?Sized,
    {
        let subscription = source.subscribe(channel).await?;
        info!(channel, hub = hub.name(), "subscribed to upstream channel");
        Ok(Self {
            channel: channel.to_string(),
            subscription,
            hub,
            backoff,
        })
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Receives forever, broadcasting each payload to the hub.
    pub async fn run(mut self) {
        let mut failures: u32 = 0;
        loop {
            match self.subscription.receive().await {
                Ok(payload) => {
                    failures = 0;
                    let report = self.hub.broadcast(payload);
                    debug!(
                        channel = %self.channel,
                        message_id = report.id,
                        delivered = report.delivered,
                        dropped = report.dropped,
                        "relayed upstream message"
                    );
                }
                Err(e) => {
                    failures = failures.saturating_add(1);
                    let delay = self.backoff.delay(failures);
                    warn!(
                        channel = %self.channel,
                        error = %e,
                        failures,
                        retry_in_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "error receiving upstream message"
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
    }
}

/// Subscribes to `channel` and runs the receive loop. Only returns on a
/// subscribe failure.
pub async fn listen<U>(
    source: &U,
    channel: &str,
    hub: Arc<Hub>,
    backoff: Backoff,
) -> Result<(), UpstreamError>
where
    U: Upstream + ?Sized,
{
    Listener::subscribe(source, channel, hub, backoff)
        .await?
        .run()
        .await;
    Ok(())
}
