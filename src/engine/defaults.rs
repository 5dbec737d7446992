//! The schema served when an application supplies none of its own: a greeting
//! query, an echo mutation and a small chat channel backed by pub/sub.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use super::builder::ResolverBuilder;
use super::registry::TypeRegistry;
use super::resolver::ResolveParams;
use super::schema::{GraphkitSchema, SchemaBuilder};
use crate::models::Reflect;
use crate::pubsub::{topic_stream, PubSub, PubSubExt};
use crate::Result;

/// A chat message as published on a channel topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Reflect)]
#[graphql(name = "Message")]
pub struct ChatMessage {
    pub id: String,
    pub content: String,
}

#[derive(Debug, Deserialize, Reflect)]
pub struct EchoArgs {
    pub message: String,
}

#[derive(Debug, Deserialize, Reflect)]
pub struct ChannelArgs {
    #[serde(rename = "channelID")]
    pub channel_id: String,
}

#[derive(Debug, Deserialize, Reflect)]
pub struct SendMessageArgs {
    #[serde(rename = "channelID")]
    pub channel_id: String,
    pub content: String,
}

/// Topic carrying the messages of `channel`.
pub fn message_topic(channel: &str) -> String {
    format!("messages:{channel}")
}

pub fn default_schema(pubsub: Arc<dyn PubSub>, registry: Arc<TypeRegistry>) -> Result<GraphkitSchema> {
    let hello = ResolverBuilder::<String>::query("hello")
        .with_registry(registry.clone())
        .description("Greets the caller")
        .resolve(|_| async { Ok("Hello world".to_string()) })
        .build()?;

    let echo = ResolverBuilder::<String>::mutation("echo")
        .with_registry(registry.clone())
        .description("Returns its argument")
        .resolve_with_args(|_, args: EchoArgs| async move { Ok(args.message) })
        .build()?;

    let publisher = pubsub.clone();
    let send_message = ResolverBuilder::<ChatMessage>::mutation("sendMessage")
        .with_registry(registry.clone())
        .description("Publishes a message to a channel")
        .resolve_with_args(move |ctx, args: SendMessageArgs| {
            let pubsub = publisher.clone();
            async move {
                let message = ChatMessage {
                    id: Uuid::new_v4().to_string(),
                    content: args.content,
                };
                pubsub
                    .publish_json(ctx.cancellation(), &message_topic(&args.channel_id), &message)
                    .await?;
                debug!(channel = %args.channel_id, id = %message.id, "message sent");
                Ok(message)
            }
        })
        .build()?;

    let message_added = ResolverBuilder::<ChatMessage>::subscription("messageAdded")
        .with_registry(registry.clone())
        .description("Messages published to a channel")
        .args_from::<ChannelArgs>()
        .subscribe(move |params: ResolveParams| {
            let pubsub = pubsub.clone();
            async move {
                let args: ChannelArgs = params.decode_args()?;
                let subscription = pubsub
                    .subscribe(
                        params.context.cancellation().clone(),
                        &message_topic(&args.channel_id),
                    )
                    .await?;
                Ok(topic_stream::<ChatMessage>(subscription))
            }
        })
        .build()?;

    SchemaBuilder::with_registry(registry)
        .field(hello)
        .field(echo)
        .field(send_message)
        .field(message_added)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::schema::ExecutionRequest;
    use crate::pubsub::memory::InMemoryPubSub;
    use futures::StreamExt;
    use serde_json::json;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn schema(pubsub: Arc<InMemoryPubSub>) -> GraphkitSchema {
        default_schema(pubsub, Arc::new(TypeRegistry::new())).unwrap()
    }

    #[tokio::test]
    async fn hello_and_echo() {
        let schema = schema(Arc::new(InMemoryPubSub::new()));

        let hello = schema.execute(ExecutionRequest::new("{ hello }")).await;
        assert_eq!(hello.data.into_json().unwrap(), json!({"hello": "Hello world"}));

        let echo = schema
            .execute(ExecutionRequest::new(r#"mutation { echo(message: "hi") }"#))
            .await;
        assert_eq!(echo.data.into_json().unwrap(), json!({"echo": "hi"}));
    }

    #[tokio::test]
    async fn send_message_reaches_subscribers() {
        let pubsub = Arc::new(InMemoryPubSub::new());
        let schema = schema(pubsub.clone());

        let mut stream = schema.subscribe(ExecutionRequest::new(
            r#"subscription { messageAdded(channelID: "g") { content } }"#,
        ));
        let first = tokio::spawn(async move { stream.next().await });

        while pubsub.subscriber_count("messages:g").await == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let sent = schema
            .execute(ExecutionRequest::new(
                r#"mutation { sendMessage(channelID: "g", content: "x") { content } }"#,
            ))
            .await;
        assert!(sent.errors.is_empty(), "{:?}", sent.errors);

        let frame = tokio::time::timeout(Duration::from_secs(1), first)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(
            frame.data.into_json().unwrap(),
            json!({"messageAdded": {"content": "x"}})
        );
    }

    #[tokio::test]
    async fn published_messages_decode_as_chat_messages() {
        let pubsub = InMemoryPubSub::new();
        let ctx = CancellationToken::new();
        let subscription = pubsub.subscribe(ctx.clone(), &message_topic("g")).await.unwrap();
        let mut events = topic_stream::<ChatMessage>(subscription);

        pubsub
            .publish_json(&ctx, "messages:g", &json!({"id": "m1", "content": "x"}))
            .await
            .unwrap();

        let message = events.next().await.unwrap().unwrap();
        assert_eq!(message.id, "m1");
    }
}
