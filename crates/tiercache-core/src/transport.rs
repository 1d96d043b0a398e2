//! Pub/sub transports for invalidation messages.
//!
//! A transport moves opaque payloads between processes on named channels.
//! Publishing never waits for subscribers and delivery is best-effort:
//! a subscriber that falls behind or is disconnected simply misses messages.

use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use futures_util::Stream;
use tokio::sync::broadcast;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;

use crate::error::Result;

/// Default buffer size for the in-process channel.
/// Messages beyond this limit are dropped for slow receivers.
const DEFAULT_BUFFER_SIZE: usize = 1024;

/// Stream of payloads received on one channel.
pub type PayloadStream = Pin<Box<dyn Stream<Item = Vec<u8>> + Send>>;

#[async_trait]
pub trait PubSubTransport: Send + Sync {
    /// Transport name for logs
    fn name(&self) -> &str;

    /// Queue a payload for delivery. Must not block on the network.
    fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<()>;

    /// Subscribe to a channel.
    ///
    /// Messages published after this returns are delivered to the stream.
    /// The stream ends when the transport is shut down.
    async fn subscribe(&self, channel: &str) -> Result<PayloadStream>;
}

/// In-process transport over a tokio broadcast channel.
///
/// Clones share the same channel, so registries holding clones of one
/// `LocalTransport` see each other's messages.
#[derive(Clone)]
pub struct LocalTransport {
    sender: broadcast::Sender<(String, Arc<Vec<u8>>)>,
    published: Arc<AtomicU64>,
}

impl LocalTransport {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUFFER_SIZE)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            published: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Total number of payloads published through any clone.
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for LocalTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for LocalTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalTransport")
            .field("subscriber_count", &self.subscriber_count())
            .field("published", &self.published())
            .finish()
    }
}

#[async_trait]
impl PubSubTransport for LocalTransport {
    fn name(&self) -> &str {
        "local"
    }

    fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<()> {
        self.published.fetch_add(1, Ordering::Relaxed);
        // No receivers is not an error: nobody needs to hear about it.
        let _ = self.sender.send((channel.to_string(), Arc::new(payload)));
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<PayloadStream> {
        let channel = channel.to_string();
        let stream = BroadcastStream::new(self.sender.subscribe()).filter_map(move |item| {
            match item {
                Ok((ch, payload)) if ch == channel => Some(payload.as_ref().clone()),
                Ok(_) => None,
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    tracing::warn!(
                        channel = %channel,
                        skipped,
                        "Invalidation subscriber lagged, messages dropped"
                    );
                    None
                }
            }
        });
        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let transport = LocalTransport::new();
        assert!(transport.publish("ch", b"x".to_vec()).is_ok());
        assert_eq!(transport.published(), 1);
    }

    #[tokio::test]
    async fn test_subscribe_filters_by_channel() {
        let transport = LocalTransport::new();
        let mut stream = transport.subscribe("a").await.unwrap();

        transport.publish("b", b"other".to_vec()).unwrap();
        transport.publish("a", b"mine".to_vec()).unwrap();

        let received = tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .expect("message within timeout");
        assert_eq!(received, Some(b"mine".to_vec()));
    }

    #[tokio::test]
    async fn test_clones_share_channel() {
        let transport = LocalTransport::new();
        let peer = transport.clone();
        let mut stream = peer.subscribe("a").await.unwrap();

        transport.publish("a", b"hello".to_vec()).unwrap();

        assert_eq!(stream.next().await, Some(b"hello".to_vec()));
        assert_eq!(peer.published(), 1);
    }

    #[tokio::test]
    async fn test_lagged_subscriber_skips_ahead() {
        let transport = LocalTransport::with_capacity(2);
        let mut stream = transport.subscribe("a").await.unwrap();

        for i in 0..5u8 {
            transport.publish("a", vec![i]).unwrap();
        }

        // The oldest messages were overwritten; the stream resumes with the newest.
        assert_eq!(stream.next().await, Some(vec![3]));
        assert_eq!(stream.next().await, Some(vec![4]));
    }
}
