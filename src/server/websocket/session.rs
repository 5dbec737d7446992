//! Per-connection protocol state machine.
//!
//! ## Rust Learning Notes:
//!
//! ### Generation Tags
//! A forwarder removes its table entry when its stream ends. By then the id
//! may have been completed and reused by the client, so each entry carries
//! the generation it was created with and a forwarder only removes an entry
//! whose generation still matches its own.
//!
//! ### Locks Across `.await`
//! The operation table uses `std::sync::Mutex`. Every critical section is a
//! plain insert/remove and the guard is dropped before the next `.await`, so
//! an async lock is not needed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use futures::StreamExt;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::protocol::{
    split_response, ClientFrameKind, Protocol, RawFrame, ServerFrame, SubscribePayload,
};
use crate::engine::context::RequestContext;
use crate::engine::schema::ExecutionRequest;
use crate::server::handler::SharedHandler;

/// Close code for malformed frames.
pub const INVALID_MESSAGE_CLOSE_CODE: u16 = 4400;
/// Close code after a failed `connection_init`.
pub const FORBIDDEN_CLOSE_CODE: u16 = 4403;
pub const NORMAL_CLOSE_CODE: u16 = 1000;

/// What the writer task sends next.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Frame(ServerFrame),
    Close(u16, &'static str),
}

/// Whether the reader keeps going after a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Close(u16, &'static str),
}

struct ActiveOperation {
    generation: u64,
    cancel: CancellationToken,
}

type OperationTable = Arc<Mutex<HashMap<String, ActiveOperation>>>;

fn lock(table: &OperationTable) -> MutexGuard<'_, HashMap<String, ActiveOperation>> {
    table.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct Session {
    handler: SharedHandler,
    protocol: Protocol,
    ctx: RequestContext,
    outbound: mpsc::Sender<Outbound>,
    acked: Arc<AtomicBool>,
    operations: OperationTable,
    generation: u64,
}

impl Session {
    /// `ctx` is the connection context; its cancellation ends every
    /// subscription started on this session.
    pub fn new(
        handler: SharedHandler,
        protocol: Protocol,
        ctx: RequestContext,
        outbound: mpsc::Sender<Outbound>,
    ) -> Self {
        Self {
            handler,
            protocol,
            ctx,
            outbound,
            acked: Arc::new(AtomicBool::new(false)),
            operations: Arc::new(Mutex::new(HashMap::new())),
            generation: 0,
        }
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Shared with the writer, which only sends keep-alives once acknowledged.
    pub fn acked_flag(&self) -> Arc<AtomicBool> {
        self.acked.clone()
    }

    pub fn is_acked(&self) -> bool {
        self.acked.load(Ordering::Acquire)
    }

    pub fn active_operations(&self) -> usize {
        lock(&self.operations).len()
    }

    async fn send(&self, frame: ServerFrame) -> Flow {
        match self.outbound.send(Outbound::Frame(frame)).await {
            Ok(()) => Flow::Continue,
            Err(_) => Flow::Close(NORMAL_CLOSE_CODE, "writer closed"),
        }
    }

    /// Queues a close frame behind everything already queued.
    pub async fn close(&self, code: u16, reason: &'static str) {
        let _ = self.outbound.send(Outbound::Close(code, reason)).await;
    }

    /// Cancels the connection context and with it every subscription.
    pub fn shutdown(&self) {
        self.ctx.cancellation().cancel();
        lock(&self.operations).clear();
    }

    pub async fn handle_text(&mut self, text: &str) -> Flow {
        let frame: RawFrame = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(err) => {
                warn!("invalid websocket frame: {}", err);
                self.send(ServerFrame::error_message(None, "invalid message"))
                    .await;
                return Flow::Close(INVALID_MESSAGE_CLOSE_CODE, "invalid message");
            }
        };
        let kind = frame.kind();
        debug!(kind = %frame.kind, id = ?frame.id, "websocket frame");

        if !self.is_acked() {
            return match kind {
                ClientFrameKind::ConnectionInit => self.connection_init(&frame).await,
                ClientFrameKind::ConnectionTerminate => {
                    Flow::Close(NORMAL_CLOSE_CODE, "connection terminated")
                }
                _ => {
                    self.send(ServerFrame::error_message(None, "connection not initialised"))
                        .await
                }
            };
        }

        match kind {
            ClientFrameKind::ConnectionInit => {
                self.send(ServerFrame::error_message(None, "connection already initialised"))
                    .await
            }
            ClientFrameKind::Subscribe => self.subscribe(frame).await,
            ClientFrameKind::Complete => {
                if let Some(id) = frame.operation_id() {
                    self.complete(id);
                }
                Flow::Continue
            }
            ClientFrameKind::Ping => self.send(ServerFrame::pong()).await,
            ClientFrameKind::Pong => Flow::Continue,
            ClientFrameKind::ConnectionTerminate => {
                Flow::Close(NORMAL_CLOSE_CODE, "connection terminated")
            }
            ClientFrameKind::Unknown(other) => {
                self.send(ServerFrame::error_message(
                    frame.operation_id(),
                    &format!("unsupported message type: {other}"),
                ))
                .await
            }
        }
    }

    async fn connection_init(&mut self, frame: &RawFrame) -> Flow {
        let token = frame.init_token();
        match self.handler.authenticate(self.ctx.clone(), &token).await {
            Ok(ctx) => {
                self.ctx = ctx;
                self.acked.store(true, Ordering::Release);
                info!("🔌 Subscription connection acknowledged ({})", self.protocol.name());
                self.send(ServerFrame::connection_ack()).await
            }
            Err(err) => {
                warn!("websocket authentication failed: {}", err);
                self.send(ServerFrame::error_message(None, "authentication failed"))
                    .await;
                Flow::Close(FORBIDDEN_CLOSE_CODE, "Forbidden")
            }
        }
    }

    async fn subscribe(&mut self, frame: RawFrame) -> Flow {
        let Some(id) = frame.operation_id().map(str::to_string) else {
            return self
                .send(ServerFrame::error_message(None, "subscription id is required"))
                .await;
        };

        let payload = frame
            .payload
            .and_then(|payload| serde_json::from_value::<SubscribePayload>(payload).ok());
        let Some(payload) = payload.filter(|p| p.query.as_deref().is_some_and(|q| !q.trim().is_empty()))
        else {
            return self
                .send(ServerFrame::error_message(Some(&id), "query is required"))
                .await;
        };
        let query = payload.query.unwrap_or_default();

        if lock(&self.operations).contains_key(&id) {
            return self
                .send(ServerFrame::error_message(
                    Some(&id),
                    &format!("Subscriber for {id} already exists"),
                ))
                .await;
        }

        if let Err(failure) = self.handler.validate(&query, self.ctx.user_details()) {
            let errors = serde_json::to_value(failure.errors()).unwrap_or_else(|_| json!([]));
            return self.send(ServerFrame::error(Some(&id), errors)).await;
        }

        let ctx = self.ctx.child();
        let cancel = ctx.cancellation().clone();
        self.generation += 1;
        let generation = self.generation;
        lock(&self.operations).insert(
            id.clone(),
            ActiveOperation {
                generation,
                cancel: cancel.clone(),
            },
        );

        let mut request = ExecutionRequest::new(query).context(ctx);
        if let Some(variables) = payload.variables.filter(|v| !v.is_null()) {
            request = request.variables(variables);
        }
        if let Some(name) = payload.operation_name.filter(|n| !n.is_empty()) {
            request = request.operation_name(name);
        }
        let stream = self.handler.schema().subscribe(request);

        debug!(%id, "subscription started");
        tokio::spawn(forward(
            id,
            generation,
            stream,
            cancel,
            self.outbound.clone(),
            self.operations.clone(),
        ));
        Flow::Continue
    }

    fn complete(&self, id: &str) {
        if let Some(operation) = lock(&self.operations).remove(id) {
            operation.cancel.cancel();
            debug!(%id, "subscription completed by client");
        }
    }
}

/// Frames for one executor response: `next` + `data` when it carries data,
/// `error` when it only carries errors.
pub fn response_frames(id: &str, body: Value) -> Vec<ServerFrame> {
    let Value::Object(body) = body else {
        return Vec::new();
    };
    match split_response(body) {
        (Some(data), errors) => {
            let mut payload = json!({ "data": data });
            if let Some(errors) = errors {
                payload["errors"] = errors;
            }
            vec![
                ServerFrame::next(id, payload.clone()),
                ServerFrame::data(id, payload),
            ]
        }
        (None, Some(errors)) => vec![ServerFrame::error(Some(id), errors)],
        (None, None) => Vec::new(),
    }
}

async fn forward(
    id: String,
    generation: u64,
    mut stream: futures::stream::BoxStream<'static, async_graphql::Response>,
    cancel: CancellationToken,
    outbound: mpsc::Sender<Outbound>,
    operations: OperationTable,
) {
    loop {
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            next = stream.next() => match next {
                Some(response) => response,
                None => break,
            },
        };
        let body = match serde_json::to_value(&response) {
            Ok(body) => body,
            Err(err) => {
                warn!(%id, "failed to encode subscription frame: {}", err);
                continue;
            }
        };
        for frame in response_frames(&id, body) {
            if outbound.send(Outbound::Frame(frame)).await.is_err() {
                return;
            }
        }
    }

    let owned = {
        let mut table = lock(&operations);
        match table.get(&id) {
            Some(entry) if entry.generation == generation => {
                table.remove(&id);
                true
            }
            _ => false,
        }
    };
    if owned && !cancel.is_cancelled() {
        debug!(%id, "subscription stream ended");
        let _ = outbound.send(Outbound::Frame(ServerFrame::complete(&id))).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_frames_are_duplicated() {
        let frames = response_frames("1", json!({"data": {"n": 1}}));
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].kind, "next");
        assert_eq!(frames[1].kind, "data");
        assert_eq!(frames[0].payload, Some(json!({"data": {"n": 1}})));
    }

    #[test]
    fn error_only_frames_become_errors() {
        let frames = response_frames("7", json!({"data": null, "errors": [{"message": "boom"}]}));
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].kind, "error");
        assert_eq!(frames[0].id.as_deref(), Some("7"));
        assert_eq!(frames[0].payload, Some(json!([{"message": "boom"}])));
    }

    #[test]
    fn partial_results_keep_their_errors() {
        let frames = response_frames("2", json!({"data": {"a": 1}, "errors": [{"message": "x"}]}));
        assert_eq!(
            frames[0].payload,
            Some(json!({"data": {"a": 1}, "errors": [{"message": "x"}]}))
        );
    }
}
