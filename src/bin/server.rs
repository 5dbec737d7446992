// Graphkit - GraphQL Server
// Serves the default schema with validation and WebSocket subscriptions
// Run with: cargo run --bin server

//! # Graphkit Server Binary
//!
//! Starts the HTTP server over the default schema (`hello`, `echo`,
//! `sendMessage`, `messageAdded`) backed by in-memory pub/sub.
//!
//! ## Configuration Layers
//!
//! ```text
//! defaults
//!   ↓ overridden by
//! graphkit.toml (optional, --config)
//!   ↓ overridden by
//! GRAPHKIT_* environment variables (.env is loaded first)
//!   ↓ overridden by
//! command line flags
//! ```
//!
//! ## Rust Learning Notes:
//!
//! ### `anyhow` at the Boundary
//! The library returns its own `GraphkitError`. The binary only needs to
//! report failures, so `anyhow::Result` lets `?` absorb any error type here
//! while the library keeps precise types.

use std::sync::Arc;

use clap::Parser;
use dotenv::dotenv;
use tracing::info;
use tracing_subscriber::EnvFilter;

use graphkit::{
    default_schema, GraphQLServerBuilder, InMemoryPubSub, PubSub, ServerSettings, TypeRegistry,
};

#[derive(Parser, Debug)]
#[command(name = "graphkit-server", about = "Graphkit GraphQL server")]
struct Args {
    /// Settings file; missing files are ignored
    #[arg(long, short, default_value = "graphkit.toml")]
    config: String,

    #[arg(long)]
    host: Option<String>,

    #[arg(long, short)]
    port: Option<u16>,

    /// Skip validation and sanitisation
    #[arg(long)]
    debug: bool,

    /// Serve GraphiQL on bare GET requests
    #[arg(long)]
    playground: Option<bool>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env is optional
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    info!("🚀 Starting Graphkit Server...");
    info!("=====================================");

    let mut settings = ServerSettings::load(&args.config)?;
    if let Some(host) = args.host {
        settings.host = host;
    }
    if let Some(port) = args.port {
        settings.port = port;
    }
    if args.debug {
        settings.debug = true;
    }
    if let Some(playground) = args.playground {
        settings.playground = playground;
    }

    info!("Server: {}", settings.address());
    if settings.debug {
        info!("🐛 Debug mode: validation and sanitisation are relaxed");
    }
    if settings.jwt_secret.is_some() {
        info!("✅ JWT authentication configured");
    }

    let pubsub: Arc<dyn PubSub> = Arc::new(InMemoryPubSub::new());
    let schema = default_schema(pubsub.clone(), TypeRegistry::global())?;

    GraphQLServerBuilder::new()
        .with_settings(&settings)
        .with_schema(schema)
        .build_and_run()
        .await?;

    info!("Server shutdown complete");
    Ok(())
}
