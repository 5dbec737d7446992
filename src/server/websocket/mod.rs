//! # WebSocket Subscription Transport
//!
//! Each upgraded connection runs two tasks: the reader below, which drives
//! the [`Session`] state machine, and a writer that owns the socket sink and
//! drains the outbound queue. Every active subscription adds one forwarder
//! task feeding the same queue.
//!
//! ## Rust Learning Notes:
//!
//! ### Splitting a Socket
//! `StreamExt::split` turns the socket into independent read and write
//! halves so the two tasks never contend for it. Anything that wants to
//! write holds an `mpsc::Sender` instead of the socket itself.
//!
//! ### Cancellation Trees
//! The connection context owns a `CancellationToken`; each subscription gets
//! a child token. Cancelling the parent at teardown stops every forwarder
//! (and the pub/sub subscriptions behind them) in one call.

pub mod protocol;
pub mod session;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::http::HeaderMap;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

pub use protocol::{Protocol, ServerFrame, INIT_TIMEOUT_CLOSE_CODE, LEGACY_WS, TRANSPORT_WS};
pub use session::{Flow, Outbound, Session};

use super::handler::SharedHandler;

/// Outbound queue depth per connection.
pub const OUTBOUND_CAPACITY: usize = 100;

/// Runs one upgraded connection until either side closes it.
pub async fn serve(socket: WebSocket, handler: SharedHandler, protocol: Protocol, headers: HeaderMap) {
    let connection = CancellationToken::new();
    let ctx = handler
        .base_context(&headers)
        .with_cancellation(connection.clone());
    let keep_alive = handler.config().keep_alive;
    let init_timeout = handler.config().connection_init_timeout;

    let (sink, mut incoming) = socket.split();
    let (tx, rx) = mpsc::channel(OUTBOUND_CAPACITY);
    let mut session = Session::new(handler, protocol, ctx, tx);
    let stop_writer = CancellationToken::new();
    let writer = tokio::spawn(write_loop(
        sink,
        rx,
        session.acked_flag(),
        protocol,
        keep_alive,
        stop_writer.clone(),
    ));

    info!("🔌 Subscription connection opened ({})", protocol.name());

    let init_deadline = tokio::time::sleep(init_timeout);
    tokio::pin!(init_deadline);
    let mut closing = false;

    loop {
        let message = tokio::select! {
            _ = &mut init_deadline, if !session.is_acked() => {
                debug!("connection_init timed out");
                session
                    .close(INIT_TIMEOUT_CLOSE_CODE, "Connection initialisation timeout")
                    .await;
                closing = true;
                break;
            }
            message = incoming.next() => message,
        };

        let flow = match message {
            Some(Ok(Message::Text(text))) => session.handle_text(&text).await,
            Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                Ok(text) => session.handle_text(&text).await,
                Err(_) => Flow::Close(session::INVALID_MESSAGE_CLOSE_CODE, "invalid message"),
            },
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => Flow::Continue,
            Some(Err(err)) => {
                error!("websocket receive failed: {}", err);
                break;
            }
        };

        if let Flow::Close(code, reason) = flow {
            session.close(code, reason).await;
            closing = true;
            break;
        }
    }

    // Forwarders stop first so nothing lands behind the close frame.
    session.shutdown();
    connection.cancel();
    drop(session);
    if !closing {
        stop_writer.cancel();
    }
    if let Err(err) = writer.await {
        error!("websocket writer task failed: {}", err);
    }
    info!("🔌 Subscription connection closed");
}

async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Outbound>,
    acked: Arc<AtomicBool>,
    protocol: Protocol,
    keep_alive: Duration,
    stop: CancellationToken,
) {
    let keep_alive_enabled = !keep_alive.is_zero();
    let period = keep_alive.max(Duration::from_millis(10));
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

    loop {
        let outbound = tokio::select! {
            _ = stop.cancelled() => break,
            _ = ticker.tick(), if keep_alive_enabled => {
                if !acked.load(Ordering::Acquire) {
                    continue;
                }
                // One keep-alive kind per protocol: `graphql-transport-ws` has no `ka`
                // frame and legacy clients do not answer `ping`.
                let frame = match protocol {
                    Protocol::TransportWs => ServerFrame::ping(),
                    Protocol::Legacy => ServerFrame::keep_alive(),
                };
                Outbound::Frame(frame)
            }
            outbound = rx.recv() => match outbound {
                Some(outbound) => outbound,
                None => break,
            },
        };

        let message = match outbound {
            Outbound::Frame(frame) => match serde_json::to_string(&frame) {
                Ok(text) => Message::Text(text),
                Err(err) => {
                    error!("failed to encode websocket frame: {}", err);
                    continue;
                }
            },
            Outbound::Close(code, reason) => {
                let _ = sink
                    .send(Message::Close(Some(CloseFrame {
                        code,
                        reason: reason.into(),
                    })))
                    .await;
                break;
            }
        };
        if let Err(err) = sink.send(message).await {
            debug!("websocket send failed: {}", err);
            break;
        }
    }
    let _ = sink.close().await;
}
