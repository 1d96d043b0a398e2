//! Redis pub/sub transport.

use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::Pool;
use futures_util::StreamExt;
use redis::AsyncCommands;
use redis::aio::PubSub;
use tiercache_core::{PayloadStream, PubSubTransport, Result};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::error::RedisError;

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(300);

/// Buffered payloads per subscription before the reader waits.
const SUBSCRIBER_BUFFER: usize = 1024;

/// Invalidation transport over Redis pub/sub.
///
/// ## How It Works
///
/// - `publish` queues the payload; a background task sends it with
///   `PUBLISH` on a pooled connection. Callers never wait on the network.
/// - `subscribe` opens a dedicated pub/sub connection (pooled connections
///   cannot `SUBSCRIBE`) and forwards messages to the returned stream. A lost
///   connection is re-established with exponential backoff; messages sent
///   while disconnected are lost.
pub struct RedisTransport {
    client: redis::Client,
    publisher: mpsc::UnboundedSender<(String, Vec<u8>)>,
    shutdown: CancellationToken,
}

impl RedisTransport {
    /// Create the transport and spawn its publisher task.
    pub fn new(pool: Pool, redis_url: &str) -> std::result::Result<Self, RedisError> {
        let client =
            redis::Client::open(redis_url).map_err(|e| RedisError::Connection(e.to_string()))?;
        let (publisher, queue) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        tokio::spawn(publish_loop(pool, queue, shutdown.child_token()));

        Ok(Self {
            client,
            publisher,
            shutdown,
        })
    }

    /// Stop the publisher and every subscription.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

impl Drop for RedisTransport {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[async_trait]
impl PubSubTransport for RedisTransport {
    fn name(&self) -> &str {
        "redis"
    }

    fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<()> {
        self.publisher
            .send((channel.to_string(), payload))
            .map_err(|_| RedisError::Publish("publisher task stopped".into()))?;
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<PayloadStream> {
        let pubsub = open_subscription(&self.client, channel).await?;
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);

        tokio::spawn(subscription_loop(
            self.client.clone(),
            channel.to_string(),
            pubsub,
            tx,
            self.shutdown.child_token(),
        ));

        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

async fn publish_loop(
    pool: Pool,
    mut queue: mpsc::UnboundedReceiver<(String, Vec<u8>)>,
    shutdown: CancellationToken,
) {
    loop {
        let (channel, payload) = tokio::select! {
            _ = shutdown.cancelled() => break,
            next = queue.recv() => match next {
                Some(item) => item,
                None => break,
            }
        };

        let mut conn = match pool.get().await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::warn!(
                    channel = %channel,
                    error = %e,
                    "Failed to get Redis connection for PUBLISH"
                );
                continue;
            }
        };
        let published: redis::RedisResult<usize> = conn.publish(&channel, payload).await;
        match published {
            Ok(receivers) => tracing::trace!(channel = %channel, receivers, "Redis PUBLISH"),
            Err(e) => tracing::warn!(channel = %channel, error = %e, "Redis PUBLISH error"),
        }
    }
    tracing::debug!("Redis publisher stopped");
}

async fn open_subscription(
    client: &redis::Client,
    channel: &str,
) -> std::result::Result<PubSub, RedisError> {
    let mut pubsub = client
        .get_async_pubsub()
        .await
        .map_err(|e| RedisError::Connection(e.to_string()))?;
    pubsub
        .subscribe(channel)
        .await
        .map_err(|e| RedisError::Subscribe(e.to_string()))?;
    tracing::info!(channel = %channel, "Subscribed to Redis channel");
    Ok(pubsub)
}

/// Forward messages until the receiver goes away or the transport shuts
/// down, reconnecting whenever the connection drops.
async fn subscription_loop(
    client: redis::Client,
    channel: String,
    first: PubSub,
    tx: mpsc::Sender<Vec<u8>>,
    shutdown: CancellationToken,
) {
    let mut connected = Some(first);
    let mut backoff = INITIAL_BACKOFF;

    loop {
        let mut pubsub = match connected.take() {
            Some(pubsub) => pubsub,
            None => match open_subscription(&client, &channel).await {
                Ok(pubsub) => {
                    backoff = INITIAL_BACKOFF;
                    pubsub
                }
                Err(e) => {
                    tracing::error!(
                        channel = %channel,
                        error = %e,
                        backoff_secs = backoff.as_secs(),
                        "Redis subscription failed, reconnecting..."
                    );
                    tokio::select! {
                        _ = shutdown.cancelled() => return,
                        _ = tx.closed() => return,
                        _ = tokio::time::sleep(backoff) => {}
                    }
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                    continue;
                }
            },
        };

        let mut messages = pubsub.on_message();
        loop {
            let msg = tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = tx.closed() => return,
                msg = messages.next() => msg,
            };
            let Some(msg) = msg else {
                tracing::warn!(channel = %channel, "Redis subscription closed, reconnecting");
                break;
            };
            match msg.get_payload::<Vec<u8>>() {
                Ok(payload) => {
                    if tx.send(payload).await.is_err() {
                        return;
                    }
                }
                Err(e) => {
                    tracing::warn!(channel = %channel, error = %e, "Invalid Redis message payload")
                }
            }
        }
    }
}
