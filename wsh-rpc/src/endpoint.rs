use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use futures::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use wsh_async_util::OrCancelExt;
use wsh_protocol::DEFAULT_RPC_TIMEOUT_MS;
use wsh_protocol::ErrorKind;
use wsh_protocol::RpcContext;
use wsh_protocol::RpcMessage;
use wsh_protocol::timeout_error;

use crate::events::EventListener;
use crate::ids::new_req_id;
use crate::inflight;
use crate::inflight::InFlightMap;
use crate::registry::HandlerRegistry;
use crate::registry::Invocation;

/// `command` value that bypasses handler dispatch entirely and is routed to
/// the event listener instead (§4.2).
const EVENTRECV_COMMAND: &str = "eventrecv";

/// Channel depth for the response channel backing one outstanding request.
/// Streaming responses rarely queue more than a handful of frames before the
/// caller drains them; §4.2's retry-once-then-drop rule covers the rest.
const RESPONSE_CHANNEL_DEPTH: usize = 32;

/// Depth of the outbound channel handed back from [`WshRpc::new`]. The
/// transport writer is expected to drain it continuously; this only bounds
/// how far a burst of fire-and-forget sends can get ahead of the writer.
const OUTPUT_CHANNEL_DEPTH: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("output channel closed; transport writer has gone away")]
    OutputClosed,
}

/// Per-request overrides, mirroring the spec's `opts` bag
/// (`route`, `timeoutMs`, `noResponse`).
#[derive(Debug, Clone, Default)]
pub struct RpcOpts {
    pub route: Option<String>,
    pub timeout_ms: Option<u64>,
}

impl RpcOpts {
    pub fn with_route(route: impl Into<String>) -> Self {
        Self {
            route: Some(route.into()),
            ..Default::default()
        }
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.unwrap_or(DEFAULT_RPC_TIMEOUT_MS).max(1))
    }
}

/// The endpoint described in §4.2: dispatches inbound command frames to
/// locally registered handlers and matches inbound response frames back to
/// outstanding requests this side originated.
///
/// Deliberately transport-agnostic, following the app-server's split between
/// connection plumbing and message handling: [`WshRpc::new`] hands back an
/// output queue for a transport writer to drain, and [`WshRpc::handle_incoming`]
/// is called by a transport reader once per decoded frame.
pub struct WshRpc {
    ctx: RpcContext,
    registry: Arc<HandlerRegistry>,
    output_tx: mpsc::Sender<RpcMessage>,
    in_flight: InFlightMap,
    /// Cancellation tokens for requests this endpoint is currently serving,
    /// keyed by the `reqId` the caller assigned. Populated for the lifetime
    /// of the handler call so an inbound cancel frame can reach it.
    serving: Mutex<HashMap<String, CancellationToken>>,
    events: EventListener,
}

impl WshRpc {
    pub fn new(ctx: RpcContext, registry: HandlerRegistry) -> (Arc<Self>, mpsc::Receiver<RpcMessage>) {
        let (output_tx, output_rx) = mpsc::channel(OUTPUT_CHANNEL_DEPTH);
        let endpoint = Arc::new(Self {
            ctx,
            registry: Arc::new(registry),
            output_tx,
            in_flight: InFlightMap::default(),
            serving: Mutex::new(HashMap::new()),
            events: EventListener::default(),
        });
        (endpoint, output_rx)
    }

    /// Subscribe to `event`, as delivered by inbound `eventrecv` frames.
    pub fn subscribe_event(&self, event: impl Into<String>) -> mpsc::Receiver<Value> {
        self.events.subscribe(event)
    }

    /// Send a fire-and-forget command: no `reqId`, no response expected.
    pub async fn send_command(
        &self,
        command: &str,
        data: Option<Value>,
        opts: RpcOpts,
    ) -> Result<(), SendError> {
        let msg = RpcMessage::fire_and_forget(command, opts.route, data);
        self.output_tx
            .send(msg)
            .await
            .map_err(|_| SendError::OutputClosed)
    }

    /// Send a request and wait for its single terminal response.
    pub async fn send_rpc_request(
        &self,
        command: &str,
        data: Option<Value>,
        opts: RpcOpts,
    ) -> Result<Value, String> {
        let req_id = new_req_id();
        let (tx, mut rx) = mpsc::channel(RESPONSE_CHANNEL_DEPTH);
        self.in_flight.register(req_id.clone(), tx);

        let timeout_ms = opts.timeout_ms.unwrap_or(DEFAULT_RPC_TIMEOUT_MS).max(1);
        let deadline = opts.timeout();
        let msg = RpcMessage::request(
            command,
            req_id.clone(),
            opts.route,
            data,
            Some(timeout_ms),
        );
        if self.output_tx.send(msg).await.is_err() {
            self.in_flight.remove(&req_id);
            return Err(ErrorKind::Decode.format("output channel closed"));
        }

        let result = tokio::time::timeout(deadline, async {
            let mut last = Value::Null;
            while let Some(frame) = rx.recv().await {
                if let Some(err) = frame.error {
                    return Err(err);
                }
                if let Some(data) = frame.data {
                    last = data;
                }
                if !frame.cont {
                    return Ok(last);
                }
            }
            Err(ErrorKind::Decode.format("response channel closed before a terminal frame"))
        })
        .await;

        self.in_flight.remove(&req_id);
        match result {
            Ok(inner) => inner,
            Err(_elapsed) => {
                let _ = self
                    .output_tx
                    .send(RpcMessage::cancel_request(req_id))
                    .await;
                Err(timeout_error())
            }
        }
    }

    /// Send a request and return a handle for manually pulling streamed
    /// response frames, per §4.2's `SendComplexRequest`.
    pub async fn send_complex_request(
        self: &Arc<Self>,
        command: &str,
        data: Option<Value>,
        opts: RpcOpts,
    ) -> Result<ComplexRequestHandle, SendError> {
        let req_id = new_req_id();
        let (tx, rx) = mpsc::channel(RESPONSE_CHANNEL_DEPTH);
        self.in_flight.register(req_id.clone(), tx);

        let timeout_ms = opts.timeout_ms.unwrap_or(DEFAULT_RPC_TIMEOUT_MS).max(1);
        let msg = RpcMessage::request(command, req_id.clone(), opts.route, data, Some(timeout_ms));
        if self.output_tx.send(msg).await.is_err() {
            self.in_flight.remove(&req_id);
            return Err(SendError::OutputClosed);
        }

        Ok(ComplexRequestHandle {
            req_id,
            rx,
            output_tx: self.output_tx.clone(),
            done: false,
        })
    }

    /// Process one inbound frame, already validated by the transport's codec.
    pub fn handle_incoming(self: &Arc<Self>, msg: RpcMessage) {
        use wsh_protocol::FrameKind;
        match msg.validate() {
            Ok(FrameKind::Response) => self.handle_response(msg),
            Ok(FrameKind::Cancel) => self.handle_cancel(msg),
            Ok(FrameKind::FreshRequest) if msg.command.as_deref() == Some(EVENTRECV_COMMAND) => {
                self.handle_eventrecv(msg)
            }
            Ok(FrameKind::FreshRequest) => self.dispatch_request(msg),
            Ok(FrameKind::RequestContinuation) => {
                tracing::debug!(req_id = ?msg.req_id, "ignoring request-body continuation frame");
            }
            Err(err) => tracing::warn!(error = %err, "dropping invalid inbound frame"),
        }
    }

    fn handle_response(self: &Arc<Self>, msg: RpcMessage) {
        let Some(res_id) = msg.res_id.clone() else {
            return;
        };
        let Some(tx) = self.in_flight.sender_for(&res_id) else {
            tracing::debug!(res_id, "response for unknown or already-completed request");
            return;
        };
        let terminal = msg.is_terminal();
        let endpoint = Arc::clone(self);
        tokio::spawn(async move {
            let delivered = inflight::deliver(&tx, msg).await;
            if terminal || !delivered {
                endpoint.in_flight.remove(&res_id);
            }
        });
    }

    /// `eventrecv` frames carry `{event, data}` and are delivered straight to
    /// subscribers of `event`, never touching the handler registry (§4.2).
    fn handle_eventrecv(self: &Arc<Self>, msg: RpcMessage) {
        #[derive(serde::Deserialize)]
        struct EventFrame {
            event: String,
            #[serde(default)]
            data: Value,
        }

        let req_id = msg.req_id.clone();
        let reply = match serde_json::from_value::<EventFrame>(msg.data.unwrap_or(Value::Null)) {
            Ok(frame) => {
                self.events.publish(&frame.event, frame.data);
                req_id.map(|id| RpcMessage::response(id, None, false))
            }
            Err(err) => {
                tracing::warn!(error = %err, "dropping malformed eventrecv frame");
                req_id.map(|id| RpcMessage::error_response(id, ErrorKind::Decode.format(&err.to_string())))
            }
        };
        if let Some(reply) = reply {
            let endpoint = Arc::clone(self);
            tokio::spawn(async move {
                let _ = endpoint.output_tx.send(reply).await;
            });
        }
    }

    fn handle_cancel(self: &Arc<Self>, msg: RpcMessage) {
        if let Some(req_id) = &msg.req_id {
            let guard = self.serving.lock().unwrap_or_else(|p| p.into_inner());
            if let Some(token) = guard.get(req_id) {
                token.cancel();
            }
        } else if let Some(res_id) = &msg.res_id {
            self.in_flight.remove(res_id);
        }
    }

    fn dispatch_request(self: &Arc<Self>, msg: RpcMessage) {
        let command = match &msg.command {
            Some(c) => c.clone(),
            None => return,
        };
        let req_id = msg.req_id.clone();
        let cancel_token = CancellationToken::new();
        if let Some(id) = &req_id {
            let mut guard = self.serving.lock().unwrap_or_else(|p| p.into_inner());
            guard.insert(id.clone(), cancel_token.clone());
        }

        let endpoint = Arc::clone(self);
        let data = msg.data.unwrap_or(Value::Null);
        tokio::spawn(async move {
            let invocation =
                endpoint
                    .registry
                    .invoke(&command, endpoint.ctx.clone(), data, cancel_token.clone());
            match invocation {
                None => {
                    if let Some(id) = &req_id {
                        let _ = endpoint
                            .output_tx
                            .send(RpcMessage::error_response(
                                id,
                                format!("no handler registered for command {command:?}"),
                            ))
                            .await;
                    }
                }
                Some(Invocation::Call(fut)) => {
                    let joined = tokio::spawn(fut).await;
                    let result = match joined {
                        Ok(r) => r,
                        Err(join_err) => {
                            Err(ErrorKind::HandlerPanic.format(&join_err.to_string()))
                        }
                    };
                    if !cancel_token.is_cancelled()
                        && let Some(id) = &req_id
                    {
                        let reply = match result {
                            Ok(data) => RpcMessage::response(id, Some(data), false),
                            Err(err) => RpcMessage::error_response(id, err),
                        };
                        let _ = endpoint.output_tx.send(reply).await;
                    }
                }
                Some(Invocation::Stream(mut stream)) => {
                    loop {
                        match stream.next().or_cancel(&cancel_token).await {
                            Err(_canceled) => break,
                            Ok(None) => {
                                // Only emit a terminal frame if the stream ran
                                // to completion on its own; if it ended
                                // because the handler observed `cancel_token`,
                                // the peer already stopped waiting.
                                if !cancel_token.is_cancelled() {
                                    if let Some(id) = &req_id {
                                        let _ = endpoint
                                            .output_tx
                                            .send(RpcMessage::response(id, None, false))
                                            .await;
                                    }
                                }
                                break;
                            }
                            Ok(Some(Ok(item))) => {
                                if let Some(id) = &req_id {
                                    let _ = endpoint
                                        .output_tx
                                        .send(RpcMessage::response(id, Some(item), true))
                                        .await;
                                }
                            }
                            Ok(Some(Err(err))) => {
                                if let Some(id) = &req_id {
                                    let _ = endpoint
                                        .output_tx
                                        .send(RpcMessage::error_response(id, err))
                                        .await;
                                }
                                break;
                            }
                        }
                    }
                }
            }
            if let Some(id) = &req_id {
                let mut guard = endpoint.serving.lock().unwrap_or_else(|p| p.into_inner());
                guard.remove(id);
            }
        });
    }
}

/// Handle returned by [`WshRpc::send_complex_request`] for manually draining
/// a streaming response, per §4.2.
pub struct ComplexRequestHandle {
    req_id: String,
    rx: mpsc::Receiver<RpcMessage>,
    output_tx: mpsc::Sender<RpcMessage>,
    done: bool,
}

impl ComplexRequestHandle {
    pub fn req_id(&self) -> &str {
        &self.req_id
    }

    /// Pull the next response frame's data. Returns `None` once the terminal
    /// frame has already been consumed; a subsequent call never blocks.
    pub async fn next_response(&mut self) -> Option<Result<Value, String>> {
        if self.done {
            return None;
        }
        let frame = self.rx.recv().await?;
        if !frame.cont {
            self.done = true;
        }
        Some(match frame.error {
            Some(err) => Err(err),
            None => Ok(frame.data.unwrap_or(Value::Null)),
        })
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Ask the peer to stop producing further responses for this request.
    pub async fn send_cancel(&self) -> Result<(), SendError> {
        self.output_tx
            .send(RpcMessage::cancel_request(self.req_id.clone()))
            .await
            .map_err(|_| SendError::OutputClosed)
    }
}
