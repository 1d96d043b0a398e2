//! Cross-process invalidation bus.
//!
//! ## How It Works
//!
//! ```text
//! Process A: cache.put("k", v)
//!   ↓ remote write, then
//! PUBLISH tiercache:invalidation {"cache_name":"orders#lr","key":"k","op":"evict"}
//!   ↓
//! Process B: listener → registry.lookup("orders#lr") → evict "k" from local tier
//! Process C: listener → registry.lookup("orders#lr") → evict "k" from local tier
//! ```
//!
//! Receivers touch the local tier only and never publish, so a message
//! cannot bounce between processes.

use std::sync::{Arc, Weak};

use futures_util::StreamExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::message::{InvalidationMessage, InvalidationOp};
use crate::registry::CacheRegistry;
use crate::transport::PubSubTransport;

/// Default channel name for invalidation messages.
pub const DEFAULT_CHANNEL: &str = "tiercache:invalidation";

/// Publishes and receives invalidation messages on one channel.
#[derive(Clone)]
pub struct InvalidationBus {
    transport: Arc<dyn PubSubTransport>,
    channel: Arc<str>,
}

impl InvalidationBus {
    pub fn new(transport: Arc<dyn PubSubTransport>, channel: impl Into<String>) -> Self {
        let channel: String = channel.into();
        Self {
            transport,
            channel: channel.into(),
        }
    }

    /// Bus on [`DEFAULT_CHANNEL`].
    pub fn with_default_channel(transport: Arc<dyn PubSubTransport>) -> Self {
        Self::new(transport, DEFAULT_CHANNEL)
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn transport_name(&self) -> &str {
        self.transport.name()
    }

    /// Broadcast a message. Failures are logged, never returned.
    pub fn publish(&self, message: &InvalidationMessage) {
        let payload = match message.encode() {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(
                    cache = %message.cache_name,
                    error = %e,
                    "Failed to encode invalidation"
                );
                return;
            }
        };

        if let Err(e) = self.transport.publish(&self.channel, payload) {
            tracing::warn!(
                cache = %message.cache_name,
                channel = %self.channel,
                error = %e,
                "Failed to publish invalidation"
            );
        } else {
            tracing::trace!(
                cache = %message.cache_name,
                key = ?message.key,
                op = ?message.op,
                "Published invalidation"
            );
        }
    }

    /// Subscribe and spawn the listener task.
    ///
    /// The subscription is established before this returns, so messages
    /// published afterwards reach the listener. The task ends when `shutdown`
    /// is cancelled, the transport stream closes or the registry is dropped.
    pub async fn listen(
        &self,
        registry: Weak<CacheRegistry>,
        shutdown: CancellationToken,
    ) -> Result<JoinHandle<()>> {
        let mut stream = self.transport.subscribe(&self.channel).await?;
        let channel = Arc::clone(&self.channel);

        tracing::info!(
            channel = %channel,
            transport = self.transport.name(),
            "Invalidation listener started"
        );

        Ok(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        tracing::debug!(channel = %channel, "Invalidation listener shutting down");
                        break;
                    }
                    next = stream.next() => match next {
                        Some(payload) => {
                            let Some(registry) = registry.upgrade() else {
                                tracing::debug!(
                                    channel = %channel,
                                    "Registry dropped, listener exiting"
                                );
                                break;
                            };
                            Self::on_message(&registry, &payload).await;
                        }
                        None => {
                            tracing::warn!(channel = %channel, "Invalidation stream closed");
                            break;
                        }
                    }
                }
            }
        }))
    }

    /// Apply one received payload to the local tier of the named cache.
    pub async fn on_message(registry: &CacheRegistry, payload: &[u8]) {
        let message = match InvalidationMessage::decode(payload) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(error = %e, "Dropping malformed invalidation message");
                return;
            }
        };

        let Some(cache) = registry.lookup(&message.cache_name) else {
            tracing::trace!(cache = %message.cache_name, "Invalidation for unknown cache ignored");
            return;
        };

        match (message.op, message.key) {
            (InvalidationOp::Evict, Some(key)) => {
                cache.evict_local(&key).await;
                tracing::debug!(cache = %message.cache_name, key = %key, "Evicted local entry");
            }
            (InvalidationOp::Evict, None) => {
                tracing::warn!(cache = %message.cache_name, "Evict message without key ignored");
            }
            (InvalidationOp::Clear, _) => {
                cache.clear_local().await;
                tracing::debug!(cache = %message.cache_name, "Cleared local tier");
            }
        }
    }
}

impl std::fmt::Debug for InvalidationBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvalidationBus")
            .field("channel", &self.channel)
            .field("transport", &self.transport.name())
            .finish()
    }
}
