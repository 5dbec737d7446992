// Publish/subscribe fabric for subscription sources

//! # Pub/Sub Module
//!
//! Topic based fan-out used as the event source of subscription fields.
//! Publishers never block: each subscriber owns a bounded queue and a
//! message that finds the queue full is dropped for that subscriber only.
//!
//! ## Rust Learning Notes:
//!
//! ### `async_trait`
//! Trait methods returning futures are written as `async fn` and boxed by
//! the `async_trait` macro, which keeps [`PubSub`] usable as
//! `Arc<dyn PubSub>` inside resolvers.

use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use pin_project_lite::pin_project;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::Result;

pub mod memory;

/// One published payload as delivered to a subscriber.
#[derive(Debug, Clone)]
pub struct Message {
    pub id: Uuid,
    pub topic: String,
    pub payload: Bytes,
    pub published_at: DateTime<Utc>,
}

impl Message {
    pub fn new(topic: impl Into<String>, payload: Bytes) -> Self {
        Self {
            id: Uuid::new_v4(),
            topic: topic.into(),
            payload,
            published_at: Utc::now(),
        }
    }

    /// Decodes a JSON payload.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.payload)?)
    }
}

pin_project! {
    /// Messages for one subscriber, in publish order.
    #[derive(Debug)]
    pub struct Subscription {
        id: Uuid,
        topic: String,
        #[pin]
        receiver: ReceiverStream<Message>,
    }
}

impl Subscription {
    pub fn new(id: Uuid, topic: impl Into<String>, receiver: ReceiverStream<Message>) -> Self {
        Self {
            id,
            topic: topic.into(),
            receiver,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}

impl Stream for Subscription {
    type Item = Message;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Message>> {
        self.project().receiver.poll_next(cx)
    }
}

#[async_trait]
pub trait PubSub: Send + Sync {
    /// Delivers `payload` to every live subscriber of `topic` without waiting
    /// on slow consumers.
    async fn publish(&self, ctx: &CancellationToken, topic: &str, payload: Bytes) -> Result<()>;

    /// Subscribes to `topic` until `ctx` is cancelled or [`PubSub::unsubscribe`]
    /// is called with the subscription's id.
    async fn subscribe(&self, ctx: CancellationToken, topic: &str) -> Result<Subscription>;

    async fn unsubscribe(&self, id: Uuid) -> Result<()>;

    /// Ends every subscription; later publishes fail.
    async fn close(&self) -> Result<()>;
}

#[async_trait]
pub trait PubSubExt: PubSub {
    /// Publishes `payload` serialised as JSON.
    async fn publish_json<T>(&self, ctx: &CancellationToken, topic: &str, payload: &T) -> Result<()>
    where
        T: Serialize + Sync + ?Sized,
    {
        let bytes = serde_json::to_vec(payload)?;
        self.publish(ctx, topic, Bytes::from(bytes)).await
    }
}

impl<P: PubSub + ?Sized> PubSubExt for P {}

/// Decodes each message of `subscription` as `T`.
///
/// A payload that does not decode yields an error item; the stream goes on.
pub fn topic_stream<T>(subscription: Subscription) -> BoxStream<'static, Result<T>>
where
    T: DeserializeOwned + Send + 'static,
{
    subscription.map(|message| message.decode::<T>()).boxed()
}
