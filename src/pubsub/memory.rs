use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::RwLock;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{Message, PubSub, Subscription};
use crate::{GraphkitError, Result};

/// Per-subscriber queue depth.
pub const DEFAULT_CAPACITY: usize = 100;

struct Subscriber {
    sender: mpsc::Sender<Message>,
    cancel: CancellationToken,
}

struct Inner {
    topics: RwLock<HashMap<String, HashMap<Uuid, Subscriber>>>,
    capacity: usize,
    closed: AtomicBool,
    shutdown: CancellationToken,
}

impl Inner {
    async fn remove(&self, topic: &str, id: Uuid) -> bool {
        let mut topics = self.topics.write().await;
        let Some(subscribers) = topics.get_mut(topic) else {
            return false;
        };
        let removed = subscribers.remove(&id).is_some();
        if subscribers.is_empty() {
            topics.remove(topic);
        }
        removed
    }
}

/// In-process fabric: a map of topic to subscriber queues.
#[derive(Clone)]
pub struct InMemoryPubSub {
    inner: Arc<Inner>,
}

impl Default for InMemoryPubSub {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryPubSub {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// A capacity of zero is raised to one.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                topics: RwLock::new(HashMap::new()),
                capacity: capacity.max(1),
                closed: AtomicBool::new(false),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    pub async fn subscriber_count(&self, topic: &str) -> usize {
        self.inner
            .topics
            .read()
            .await
            .get(topic)
            .map(HashMap::len)
            .unwrap_or(0)
    }

    pub async fn topic_count(&self) -> usize {
        self.inner.topics.read().await.len()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PubSub for InMemoryPubSub {
    async fn publish(&self, ctx: &CancellationToken, topic: &str, payload: Bytes) -> Result<()> {
        if self.is_closed() {
            return Err(GraphkitError::PubSubClosed);
        }
        if ctx.is_cancelled() {
            return Err(GraphkitError::Cancelled);
        }

        let message = Message::new(topic, payload);
        let mut stale = Vec::new();
        let mut delivered = 0usize;
        {
            let topics = self.inner.topics.read().await;
            if let Some(subscribers) = topics.get(topic) {
                for (id, subscriber) in subscribers {
                    if subscriber.cancel.is_cancelled() {
                        continue;
                    }
                    match subscriber.sender.try_send(message.clone()) {
                        Ok(()) => delivered += 1,
                        Err(TrySendError::Full(_)) => {
                            warn!(topic, subscriber = %id, "subscriber queue full, dropping message");
                        }
                        Err(TrySendError::Closed(_)) => stale.push(*id),
                    }
                }
            }
        }

        for id in stale {
            self.inner.remove(topic, id).await;
        }

        debug!(topic, message = %message.id, delivered, "published message");
        Ok(())
    }

    async fn subscribe(&self, ctx: CancellationToken, topic: &str) -> Result<Subscription> {
        if self.is_closed() {
            return Err(GraphkitError::PubSubClosed);
        }

        let id = Uuid::new_v4();
        // Unsubscribing cancels only this child, never the caller's token.
        let cancel = ctx.child_token();
        let (sender, receiver) = mpsc::channel(self.inner.capacity);
        let watch = sender.clone();
        {
            let mut topics = self.inner.topics.write().await;
            topics.entry(topic.to_owned()).or_default().insert(
                id,
                Subscriber {
                    sender,
                    cancel: cancel.clone(),
                },
            );
        }

        // Removes the subscriber once its context ends, the fabric shuts
        // down or the receiving side is dropped.
        let inner = self.inner.clone();
        let owned_topic = topic.to_owned();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = inner.shutdown.cancelled() => {}
                _ = watch.closed() => {}
            }
            drop(watch);
            if inner.remove(&owned_topic, id).await {
                debug!(topic = %owned_topic, subscriber = %id, "subscriber removed");
            }
        });

        debug!(topic, subscriber = %id, "subscriber added");
        Ok(Subscription::new(id, topic, ReceiverStream::new(receiver)))
    }

    async fn unsubscribe(&self, id: Uuid) -> Result<()> {
        let mut topics = self.inner.topics.write().await;
        let topic = topics
            .iter()
            .find(|(_, subscribers)| subscribers.contains_key(&id))
            .map(|(topic, _)| topic.clone());

        match topic {
            Some(topic) => {
                if let Some(subscribers) = topics.get_mut(&topic) {
                    if let Some(subscriber) = subscribers.remove(&id) {
                        subscriber.cancel.cancel();
                    }
                    if subscribers.is_empty() {
                        topics.remove(&topic);
                    }
                }
                debug!(topic = %topic, subscriber = %id, "unsubscribed");
                Ok(())
            }
            None => Err(GraphkitError::SubscriptionNotFound(id.to_string())),
        }
    }

    async fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.inner.shutdown.cancel();
        let dropped: usize = {
            let mut topics = self.inner.topics.write().await;
            let count = topics.values().map(HashMap::len).sum();
            topics.clear();
            count
        };
        info!("📪 Pub/sub closed, {} subscribers released", dropped);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pubsub::{topic_stream, PubSubExt};
    use futures::StreamExt;
    use serde::{Deserialize, Serialize};
    use std::time::Duration;
    use tokio::time::timeout;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Event {
        n: u32,
    }

    async fn next(subscription: &mut Subscription) -> Option<Message> {
        timeout(Duration::from_secs(1), subscription.next())
            .await
            .ok()
            .flatten()
    }

    #[tokio::test]
    async fn delivers_in_publish_order() {
        let pubsub = InMemoryPubSub::new();
        let ctx = CancellationToken::new();
        let mut sub = pubsub.subscribe(ctx.clone(), "t").await.unwrap();

        for n in 0..3 {
            pubsub.publish_json(&ctx, "t", &Event { n }).await.unwrap();
        }

        for n in 0..3 {
            let message = next(&mut sub).await.unwrap();
            assert_eq!(message.decode::<Event>().unwrap(), Event { n });
            assert_eq!(message.topic, "t");
        }
    }

    #[tokio::test]
    async fn topics_are_isolated() {
        let pubsub = InMemoryPubSub::new();
        let ctx = CancellationToken::new();
        let mut a = pubsub.subscribe(ctx.clone(), "a").await.unwrap();

        pubsub.publish(&ctx, "b", Bytes::from_static(b"{}")).await.unwrap();
        pubsub.publish(&ctx, "a", Bytes::from_static(b"1")).await.unwrap();

        assert_eq!(next(&mut a).await.unwrap().payload, Bytes::from_static(b"1"));
    }

    #[tokio::test]
    async fn full_queues_drop_without_blocking() {
        let pubsub = InMemoryPubSub::with_capacity(0);
        assert_eq!(pubsub.capacity(), 1);
        let ctx = CancellationToken::new();
        let mut slow = pubsub.subscribe(ctx.clone(), "t").await.unwrap();

        for n in 0..10 {
            timeout(
                Duration::from_millis(200),
                pubsub.publish_json(&ctx, "t", &Event { n }),
            )
            .await
            .expect("publish must not block")
            .unwrap();
        }

        let first = next(&mut slow).await.unwrap();
        assert_eq!(first.decode::<Event>().unwrap(), Event { n: 0 });
        assert!(timeout(Duration::from_millis(50), slow.next()).await.is_err());
    }

    #[tokio::test]
    async fn cancelling_the_context_removes_the_subscriber() {
        let pubsub = InMemoryPubSub::new();
        let ctx = CancellationToken::new();
        let mut sub = pubsub.subscribe(ctx.clone(), "t").await.unwrap();
        assert_eq!(pubsub.subscriber_count("t").await, 1);

        ctx.cancel();
        assert!(next(&mut sub).await.is_none());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(pubsub.subscriber_count("t").await, 0);
        assert_eq!(pubsub.topic_count().await, 0);
    }

    #[tokio::test]
    async fn unsubscribe_ends_the_stream() {
        let pubsub = InMemoryPubSub::new();
        let mut sub = pubsub.subscribe(CancellationToken::new(), "t").await.unwrap();

        pubsub.unsubscribe(sub.id()).await.unwrap();
        assert!(next(&mut sub).await.is_none());

        let err = pubsub.unsubscribe(sub.id()).await.unwrap_err();
        assert!(matches!(err, GraphkitError::SubscriptionNotFound(_)));
    }

    #[tokio::test]
    async fn unsubscribe_leaves_siblings_on_the_same_context() {
        let pubsub = InMemoryPubSub::new();
        let ctx = CancellationToken::new();
        let mut a = pubsub.subscribe(ctx.clone(), "a").await.unwrap();
        let mut b = pubsub.subscribe(ctx.clone(), "b").await.unwrap();

        pubsub.unsubscribe(a.id()).await.unwrap();
        assert!(next(&mut a).await.is_none());
        assert!(!ctx.is_cancelled());
        assert_eq!(pubsub.subscriber_count("b").await, 1);

        pubsub
            .publish_json(&CancellationToken::new(), "b", &Event { n: 7 })
            .await
            .unwrap();
        let message = next(&mut b).await.unwrap();
        assert_eq!(message.decode::<Event>().unwrap(), Event { n: 7 });
    }

    #[tokio::test]
    async fn closed_fabric_rejects_publishes() {
        let pubsub = InMemoryPubSub::new();
        let ctx = CancellationToken::new();
        let mut sub = pubsub.subscribe(ctx.clone(), "t").await.unwrap();

        pubsub.close().await.unwrap();
        assert!(next(&mut sub).await.is_none());
        assert!(matches!(
            pubsub.publish(&ctx, "t", Bytes::new()).await,
            Err(GraphkitError::PubSubClosed)
        ));
        assert!(matches!(
            pubsub.subscribe(ctx, "t").await,
            Err(GraphkitError::PubSubClosed)
        ));
    }

    #[tokio::test]
    async fn topic_stream_decodes_payloads() {
        let pubsub = InMemoryPubSub::new();
        let ctx = CancellationToken::new();
        let sub = pubsub.subscribe(ctx.clone(), "t").await.unwrap();
        let mut events = topic_stream::<Event>(sub);

        pubsub.publish(&ctx, "t", Bytes::from_static(b"not json")).await.unwrap();
        pubsub.publish_json(&ctx, "t", &Event { n: 7 }).await.unwrap();

        assert!(events.next().await.unwrap().is_err());
        assert_eq!(events.next().await.unwrap().unwrap(), Event { n: 7 });
    }
}
