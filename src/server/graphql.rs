// GraphQL server for Graphkit
// Mounts a GraphQLHandler on axum: HTTP queries, the WebSocket upgrade and GraphiQL

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Query, State, WebSocketUpgrade},
    http::{header, HeaderMap, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::get,
    Router,
};
use serde_json::Value;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, info};

use super::config::{ServerConfig, ServerSettings};
use super::handler::{error_body, GraphQLHandler, GraphQLPayload, SharedHandler};
use super::websocket::{self, Protocol, LEGACY_WS, TRANSPORT_WS};
use crate::engine::defaults::default_schema;
use crate::engine::registry::TypeRegistry;
use crate::engine::schema::GraphkitSchema;
use crate::pubsub::{memory::InMemoryPubSub, PubSub};
use crate::Result;

/// Builds the `/graphql` + `/health` router around `handler`.
pub fn router(handler: SharedHandler) -> Router {
    let cors = handler.config().cors_enabled;
    let mut app = Router::new()
        .route("/graphql", get(graphql_get).post(graphql_post))
        .route("/health", get(health_check))
        .with_state(handler)
        .layer(TraceLayer::new_for_http());

    if cors {
        app = app.layer(CorsLayer::permissive());
    }
    app
}

/// GraphQL server
pub struct GraphQLServer {
    handler: SharedHandler,
    host: String,
    port: u16,
}

impl GraphQLServer {
    pub fn new(schema: GraphkitSchema, config: ServerConfig) -> Self {
        Self {
            handler: Arc::new(GraphQLHandler::new(schema, config)),
            host: "0.0.0.0".to_string(),
            port: 4000,
        }
    }

    pub fn builder() -> GraphQLServerBuilder {
        GraphQLServerBuilder::new()
    }

    pub fn handler(&self) -> &SharedHandler {
        &self.handler
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn router(&self) -> Router {
        router(self.handler.clone())
    }

    pub async fn run(self) -> Result<()> {
        let address = self.address();
        let listener = tokio::net::TcpListener::bind(&address).await?;
        let config = self.handler.config();

        info!("🚀 GraphQL server running on http://{}", address);
        info!("🔗 GraphQL endpoint: http://{}/graphql", address);
        if config.playground {
            info!("📊 GraphiQL interface: http://{}/graphql", address);
        }
        if config.enable_subscriptions && self.handler.schema().has_subscriptions() {
            info!("📡 GraphQL WebSocket: ws://{}/graphql", address);
        }

        axum::serve(listener, self.router()).await?;
        Ok(())
    }
}

/// Builder pattern for server setup
pub struct GraphQLServerBuilder {
    schema: Option<GraphkitSchema>,
    config: ServerConfig,
    host: String,
    port: u16,
}

impl GraphQLServerBuilder {
    pub fn new() -> Self {
        Self {
            schema: None,
            config: ServerConfig::default(),
            host: "0.0.0.0".to_string(),
            port: 4000,
        }
    }

    pub fn with_schema(mut self, schema: GraphkitSchema) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn with_config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Takes host, port and the config switches from loaded settings.
    pub fn with_settings(mut self, settings: &ServerSettings) -> Self {
        self.config = ServerConfig::from_settings(settings);
        self.host = settings.host.clone();
        self.port = settings.port;
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Falls back to the default schema over the configured (or an
    /// in-memory) pub/sub when no schema was given.
    pub fn build(self) -> Result<GraphQLServer> {
        let schema = match self.schema {
            Some(schema) => schema,
            None => {
                let pubsub: Arc<dyn PubSub> = self
                    .config
                    .pubsub
                    .clone()
                    .unwrap_or_else(|| Arc::new(InMemoryPubSub::new()));
                info!("📋 Starting server with the default schema");
                default_schema(pubsub, TypeRegistry::global())?
            }
        };
        Ok(GraphQLServer {
            handler: Arc::new(GraphQLHandler::new(schema, self.config)),
            host: self.host,
            port: self.port,
        })
    }

    pub async fn build_and_run(self) -> Result<()> {
        self.build()?.run().await
    }
}

impl Default for GraphQLServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn json_response(handler: &GraphQLHandler, status: StatusCode, body: &Value) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, "application/json")],
        handler.render(body),
    )
        .into_response()
}

// GET: WebSocket upgrade, query-string execution or the playground
async fn graphql_get(
    State(handler): State<SharedHandler>,
    headers: HeaderMap,
    ws: Option<WebSocketUpgrade>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    if let Some(ws) = ws {
        return upgrade(handler, headers, ws);
    }

    if let Some(query) = params.get("query").filter(|q| !q.trim().is_empty()) {
        let variables = match params.get("variables").filter(|v| !v.is_empty()) {
            Some(raw) => match serde_json::from_str::<Value>(raw) {
                Ok(variables) => Some(variables),
                Err(_) => {
                    return json_response(
                        &handler,
                        StatusCode::BAD_REQUEST,
                        &error_body("variables must be a JSON object"),
                    )
                }
            },
            None => None,
        };
        let payload = GraphQLPayload {
            query: query.clone(),
            variables,
            operation_name: params.get("operationName").cloned(),
        };
        let (status, body) = handler.process(payload, &headers).await;
        return json_response(&handler, status, &body);
    }

    if handler.config().playground {
        return Html(playground_html()).into_response();
    }
    json_response(&handler, StatusCode::BAD_REQUEST, &error_body("query is required"))
}

fn upgrade(handler: SharedHandler, headers: HeaderMap, ws: WebSocketUpgrade) -> Response {
    let config = handler.config();
    if !config.enable_subscriptions || !handler.schema().has_subscriptions() {
        return json_response(
            &handler,
            StatusCode::SERVICE_UNAVAILABLE,
            &error_body("subscriptions are not enabled"),
        );
    }
    if let Some(check) = &config.check_origin {
        if !check(&headers) {
            debug!("websocket upgrade rejected by origin check");
            return json_response(&handler, StatusCode::FORBIDDEN, &error_body("origin not allowed"));
        }
    }

    let protocol = Protocol::from_headers(&headers).unwrap_or(Protocol::TransportWs);
    ws.protocols([TRANSPORT_WS, LEGACY_WS])
        .on_upgrade(move |socket| websocket::serve(socket, handler, protocol, headers))
}

// POST: JSON body or an urlencoded form
async fn graphql_post(
    State(handler): State<SharedHandler>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let is_form = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.starts_with("application/x-www-form-urlencoded"))
        .unwrap_or(false);

    let payload = if is_form {
        form_payload(&body)
    } else {
        serde_json::from_slice::<GraphQLPayload>(&body).ok()
    };
    let Some(payload) = payload else {
        return json_response(
            &handler,
            StatusCode::BAD_REQUEST,
            &error_body("invalid request body"),
        );
    };

    let (status, body) = handler.process(payload, &headers).await;
    json_response(&handler, status, &body)
}

fn form_payload(body: &[u8]) -> Option<GraphQLPayload> {
    let mut payload = GraphQLPayload::default();
    for (key, value) in url::form_urlencoded::parse(body) {
        match key.as_ref() {
            "query" => payload.query = value.into_owned(),
            "variables" if !value.is_empty() => {
                payload.variables = Some(serde_json::from_str(&value).ok()?);
            }
            "operationName" if !value.is_empty() => {
                payload.operation_name = Some(value.into_owned());
            }
            _ => {}
        }
    }
    Some(payload)
}

fn playground_html() -> &'static str {
    r#"
<!DOCTYPE html>
<html lang="en">
  <head>
    <meta charset="utf-8">
    <meta name="robots" content="noindex">
    <meta name="viewport" content="width=device-width, initial-scale=1">
    <meta name="referrer" content="origin">
    <title>Graphkit GraphiQL</title>
    <style>
      body {
        height: 100%;
        margin: 0;
        width: 100%;
        overflow: hidden;
      }
      #graphiql {
        height: 100vh;
      }
    </style>
    <script crossorigin src="https://unpkg.com/react@18/umd/react.development.js"></script>
    <script crossorigin src="https://unpkg.com/react-dom@18/umd/react-dom.development.js"></script>
    <link rel="icon" href="https://graphql.org/favicon.ico">
    <link rel="stylesheet" href="https://unpkg.com/graphiql@3/graphiql.min.css" />
  </head>
  <body>
    <div id="graphiql">Loading...</div>
    <script src="https://unpkg.com/graphiql@3/graphiql.min.js" type="application/javascript"></script>
    <script>
      const root = ReactDOM.createRoot(document.getElementById('graphiql'));
      const scheme = window.location.protocol === 'https:' ? 'wss:' : 'ws:';

      const fetcher = GraphiQL.createFetcher({
        url: window.location.pathname,
        subscriptionUrl: scheme + '//' + window.location.host + window.location.pathname,
      });

      root.render(React.createElement(GraphiQL, {
        fetcher: fetcher,
        defaultEditorToolsVisibility: true,
      }));
    </script>
  </body>
</html>
"#
}

// Health check endpoint
async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "Graphkit GraphQL server is running!")
}
