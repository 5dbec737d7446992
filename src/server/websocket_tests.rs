// WebSocket transport tests against a real listener

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use super::auth::jwt_user_details;
use super::config::ServerConfig;
use super::graphql::router;
use super::handler::GraphQLHandler;
use crate::engine::defaults::default_schema;
use crate::engine::registry::TypeRegistry;
use crate::pubsub::memory::InMemoryPubSub;
use crate::pubsub::PubSubExt;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const SUBSCRIPTION: &str = r#"subscription{ messageAdded(channelID:"g"){ id content } }"#;

async fn spawn_server(config: ServerConfig) -> (SocketAddr, Arc<InMemoryPubSub>) {
    let pubsub = Arc::new(InMemoryPubSub::new());
    let schema = default_schema(pubsub.clone(), Arc::new(TypeRegistry::new())).unwrap();
    let app = router(Arc::new(GraphQLHandler::new(schema, config)));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, pubsub)
}

async fn try_connect(
    addr: SocketAddr,
    protocol: &str,
) -> Result<Client, tokio_tungstenite::tungstenite::Error> {
    let mut request = format!("ws://{addr}/graphql").into_client_request().unwrap();
    request.headers_mut().insert(
        "Sec-WebSocket-Protocol",
        HeaderValue::from_str(protocol).unwrap(),
    );
    connect_async(request).await.map(|(client, _)| client)
}

async fn connect(addr: SocketAddr, protocol: &str) -> Client {
    try_connect(addr, protocol).await.unwrap()
}

async fn send(client: &mut Client, frame: Value) {
    client.send(Message::Text(frame.to_string())).await.unwrap();
}

async fn next_message(client: &mut Client) -> Message {
    tokio::time::timeout(Duration::from_secs(5), client.next())
        .await
        .expect("timed out waiting for a frame")
        .expect("connection closed")
        .unwrap()
}

/// Next JSON frame, skipping keep-alives.
async fn recv(client: &mut Client) -> Value {
    loop {
        if let Message::Text(text) = next_message(client).await {
            let frame: Value = serde_json::from_str(&text).unwrap();
            if frame["type"] == "ping" || frame["type"] == "ka" {
                continue;
            }
            return frame;
        }
    }
}

async fn close_code(client: &mut Client) -> u16 {
    loop {
        if let Message::Close(frame) = next_message(client).await {
            return frame.map(|f| u16::from(f.code)).unwrap_or_default();
        }
    }
}

async fn init(client: &mut Client) {
    send(client, json!({"type": "connection_init"})).await;
    assert_eq!(recv(client).await, json!({"type": "connection_ack"}));
}

async fn wait_for_subscriber(pubsub: &InMemoryPubSub, topic: &str, count: usize) {
    for _ in 0..200 {
        if pubsub.subscriber_count(topic).await == count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("subscriber count on {topic} never reached {count}");
}

async fn publish(pubsub: &InMemoryPubSub, id: &str, content: &str) {
    pubsub
        .publish_json(
            &CancellationToken::new(),
            "messages:g",
            &json!({"id": id, "content": content}),
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn subscription_frames_arrive_under_both_names() {
    let (addr, pubsub) = spawn_server(ServerConfig::new()).await;
    let mut client = connect(addr, "graphql-transport-ws").await;
    init(&mut client).await;

    send(
        &mut client,
        json!({"id": "1", "type": "subscribe", "payload": {"query": SUBSCRIPTION}}),
    )
    .await;
    wait_for_subscriber(&pubsub, "messages:g", 1).await;
    publish(&pubsub, "m1", "x").await;

    let payload = json!({"data": {"messageAdded": {"id": "m1", "content": "x"}}});
    assert_eq!(
        recv(&mut client).await,
        json!({"id": "1", "type": "next", "payload": payload})
    );
    assert_eq!(
        recv(&mut client).await,
        json!({"id": "1", "type": "data", "payload": payload})
    );
}

#[tokio::test]
async fn legacy_clients_use_start_and_stop() {
    let (addr, pubsub) = spawn_server(ServerConfig::new()).await;
    let mut client = connect(addr, "graphql-ws").await;
    init(&mut client).await;

    send(
        &mut client,
        json!({"id": "a", "type": "start", "payload": {"query": SUBSCRIPTION}}),
    )
    .await;
    wait_for_subscriber(&pubsub, "messages:g", 1).await;
    publish(&pubsub, "m1", "x").await;
    assert_eq!(recv(&mut client).await["type"], "next");
    assert_eq!(recv(&mut client).await["type"], "data");

    send(&mut client, json!({"id": "a", "type": "stop"})).await;
    wait_for_subscriber(&pubsub, "messages:g", 0).await;
}

#[tokio::test]
async fn frames_before_init_are_rejected() {
    let (addr, _) = spawn_server(ServerConfig::new()).await;
    let mut client = connect(addr, "graphql-transport-ws").await;

    send(
        &mut client,
        json!({"id": "1", "type": "subscribe", "payload": {"query": SUBSCRIPTION}}),
    )
    .await;
    let frame = recv(&mut client).await;
    assert_eq!(frame["type"], "error");
    assert!(frame.get("id").is_none());

    init(&mut client).await;
    send(&mut client, json!({"type": "connection_init"})).await;
    assert_eq!(recv(&mut client).await["type"], "error");
}

#[tokio::test]
async fn ping_gets_pong() {
    let (addr, _) = spawn_server(ServerConfig::new()).await;
    let mut client = connect(addr, "graphql-transport-ws").await;
    init(&mut client).await;

    send(&mut client, json!({"type": "ping"})).await;
    assert_eq!(recv(&mut client).await, json!({"type": "pong"}));
}

#[tokio::test]
async fn duplicate_ids_leave_the_first_subscription_running() {
    let (addr, pubsub) = spawn_server(ServerConfig::new()).await;
    let mut client = connect(addr, "graphql-transport-ws").await;
    init(&mut client).await;

    let subscribe = json!({"id": "1", "type": "subscribe", "payload": {"query": SUBSCRIPTION}});
    send(&mut client, subscribe.clone()).await;
    wait_for_subscriber(&pubsub, "messages:g", 1).await;
    send(&mut client, subscribe).await;

    let frame = recv(&mut client).await;
    assert_eq!(frame["type"], "error");
    assert_eq!(frame["id"], "1");
    assert_eq!(frame["payload"][0]["message"], "Subscriber for 1 already exists");

    publish(&pubsub, "m2", "still here").await;
    let frame = recv(&mut client).await;
    assert_eq!(frame["type"], "next");
    assert_eq!(frame["payload"]["data"]["messageAdded"]["id"], "m2");
}

#[tokio::test]
async fn complete_cancels_without_reply() {
    let (addr, pubsub) = spawn_server(ServerConfig::new()).await;
    let mut client = connect(addr, "graphql-transport-ws").await;
    init(&mut client).await;

    send(
        &mut client,
        json!({"id": "1", "type": "subscribe", "payload": {"query": SUBSCRIPTION}}),
    )
    .await;
    wait_for_subscriber(&pubsub, "messages:g", 1).await;

    send(&mut client, json!({"id": "1", "type": "complete"})).await;
    wait_for_subscriber(&pubsub, "messages:g", 0).await;
    publish(&pubsub, "m1", "x").await;

    // Nothing from the completed subscription arrives ahead of the pong.
    send(&mut client, json!({"type": "ping"})).await;
    assert_eq!(recv(&mut client).await, json!({"type": "pong"}));
}

#[tokio::test]
async fn invalid_subscriptions_report_errors_for_their_id() {
    let (addr, _) = spawn_server(ServerConfig::new()).await;
    let mut client = connect(addr, "graphql-transport-ws").await;
    init(&mut client).await;

    send(&mut client, json!({"id": "q", "type": "subscribe", "payload": {}})).await;
    let frame = recv(&mut client).await;
    assert_eq!(frame["id"], "q");
    assert_eq!(frame["payload"][0]["message"], "query is required");

    send(
        &mut client,
        json!({"id": "v", "type": "subscribe", "payload": {"query": "subscription { __schema { types { name } } }"}}),
    )
    .await;
    let frame = recv(&mut client).await;
    assert_eq!(frame["type"], "error");
    assert_eq!(frame["id"], "v");
    assert_eq!(frame["payload"][0]["rule"], "NoIntrospectionRule");

    send(&mut client, json!({"type": "subscribe", "payload": {"query": SUBSCRIPTION}})).await;
    let frame = recv(&mut client).await;
    assert_eq!(frame["type"], "error");
    assert!(frame.get("id").is_none());
}

#[tokio::test]
async fn failed_init_auth_closes_the_connection() {
    let config = ServerConfig::new().user_details(jwt_user_details("s3cret"));
    let (addr, _) = spawn_server(config).await;
    let mut client = connect(addr, "graphql-transport-ws").await;

    send(
        &mut client,
        json!({"type": "connection_init", "payload": {"authorization": "Bearer bad"}}),
    )
    .await;
    let frame = recv(&mut client).await;
    assert_eq!(frame, json!({"type": "error", "payload": [{"message": "authentication failed"}]}));
    assert_eq!(close_code(&mut client).await, 4403);
}

#[tokio::test]
async fn missing_init_times_out() {
    let config = ServerConfig::new().connection_init_timeout(Duration::from_millis(100));
    let (addr, _) = spawn_server(config).await;
    let mut client = connect(addr, "graphql-transport-ws").await;

    assert_eq!(close_code(&mut client).await, 4408);
}

#[tokio::test]
async fn malformed_frames_close_the_connection() {
    let (addr, _) = spawn_server(ServerConfig::new()).await;
    let mut client = connect(addr, "graphql-transport-ws").await;

    client.send(Message::Text("{oops".into())).await.unwrap();
    assert_eq!(recv(&mut client).await["type"], "error");
    assert_eq!(close_code(&mut client).await, 4400);
}

#[tokio::test]
async fn keep_alive_follows_the_protocol() {
    let config = ServerConfig::new().keep_alive(Duration::from_millis(50));
    let (addr, _) = spawn_server(config).await;

    let mut modern = connect(addr, "graphql-transport-ws").await;
    init(&mut modern).await;
    let Message::Text(text) = next_message(&mut modern).await else {
        panic!("expected a text frame");
    };
    assert_eq!(serde_json::from_str::<Value>(&text).unwrap(), json!({"type": "ping"}));

    let mut legacy = connect(addr, "graphql-ws").await;
    init(&mut legacy).await;
    let Message::Text(text) = next_message(&mut legacy).await else {
        panic!("expected a text frame");
    };
    assert_eq!(serde_json::from_str::<Value>(&text).unwrap(), json!({"type": "ka"}));
}

#[tokio::test]
async fn upgrades_can_be_refused() {
    let (addr, _) = spawn_server(ServerConfig::new().enable_subscriptions(false)).await;
    assert!(try_connect(addr, "graphql-transport-ws").await.is_err());

    let (addr, _) = spawn_server(ServerConfig::new().check_origin(|_| false)).await;
    assert!(try_connect(addr, "graphql-transport-ws").await.is_err());
}

#[tokio::test]
async fn disconnect_releases_subscriptions() {
    let (addr, pubsub) = spawn_server(ServerConfig::new()).await;
    let mut client = connect(addr, "graphql-transport-ws").await;
    init(&mut client).await;

    send(
        &mut client,
        json!({"id": "1", "type": "subscribe", "payload": {"query": SUBSCRIPTION}}),
    )
    .await;
    wait_for_subscriber(&pubsub, "messages:g", 1).await;

    drop(client);
    wait_for_subscriber(&pubsub, "messages:g", 0).await;
    assert_eq!(pubsub.topic_count().await, 0);
}
