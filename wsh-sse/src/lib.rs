//! The Server-Sent-Events adapter from §4.5: one bounded write channel, one
//! writer side the HTTP layer owns, and a typed vocabulary of AI streaming
//! parts (§4.6, §6) built on top of plain `WriteData`/`WriteJsonData`.
//!
//! Grounded on `axum::response::sse`: [`Sse`] already guarantees a single
//! consumer drains the body stream, and its [`KeepAlive`] ticks at the body
//! layer so a keep-alive comment can never land inside another frame's
//! bytes — the single-writer discipline the spec asks for falls out of using
//! axum's primitives as intended rather than hand-rolling a writer loop.

use std::convert::Infallible;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;

use axum::http::HeaderMap;
use axum::http::HeaderName;
use axum::http::HeaderValue;
use axum::response::IntoResponse;
use axum::response::sse::Event;
use axum::response::sse::KeepAlive;
use axum::response::sse::Sse;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

/// §5 resource cap: "SSE write channel: 10 slots; overflow is an error
/// returned to the caller."
const WRITE_CHANNEL_DEPTH: usize = 10;

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
pub enum SseError {
    #[error("write channel is full")]
    ChannelFull,
    #[error("handler is closed")]
    Closed,
}

enum Frame {
    Data(String),
    Event { name: String, data: String },
    Comment(String),
    Done,
}

impl Frame {
    fn into_event(self) -> Event {
        match self {
            Frame::Data(data) => Event::default().data(data),
            Frame::Event { name, data } => Event::default().event(name).data(data),
            Frame::Comment(text) => Event::default().comment(text),
            Frame::Done => Event::default().data("[DONE]"),
        }
    }
}

/// Sender-side handle for one HTTP request's SSE response. Cloned freely;
/// every clone shares the same write channel and closed flag.
#[derive(Clone)]
pub struct SseHandle {
    tx: mpsc::Sender<Frame>,
    closed: Arc<AtomicBool>,
}

/// Build a fresh SSE handler: the returned handle is for application code to
/// write frames on, the returned value implements [`IntoResponse`] and is
/// what the axum handler returns (§4.5 `SetupSSE`).
pub fn setup_sse() -> (SseHandle, impl IntoResponse) {
    let (tx, rx) = mpsc::channel(WRITE_CHANNEL_DEPTH);
    let handle = SseHandle {
        tx,
        closed: Arc::new(AtomicBool::new(false)),
    };
    let stream = ReceiverStream::new(rx).map(|frame| Ok::<Event, Infallible>(frame.into_event()));
    let sse = Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(KEEP_ALIVE_INTERVAL)
            .text("keepalive"),
    );
    (handle, with_sse_headers(sse))
}

fn with_sse_headers(sse: impl IntoResponse) -> impl IntoResponse {
    let mut headers = HeaderMap::new();
    headers.insert(
        axum::http::header::CACHE_CONTROL,
        HeaderValue::from_static("no-cache, no-store, must-revalidate"),
    );
    headers.insert(
        axum::http::header::CONNECTION,
        HeaderValue::from_static("keep-alive"),
    );
    headers.insert(
        HeaderName::from_static("x-accel-buffering"),
        HeaderValue::from_static("no"),
    );
    (headers, sse)
}

impl SseHandle {
    fn enqueue(&self, frame: Frame) -> Result<(), SseError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SseError::Closed);
        }
        self.tx.try_send(frame).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => SseError::ChannelFull,
            mpsc::error::TrySendError::Closed(_) => SseError::Closed,
        })
    }

    pub fn write_data(&self, data: impl Into<String>) -> Result<(), SseError> {
        self.enqueue(Frame::Data(data.into()))
    }

    pub fn write_json_data(&self, value: &impl Serialize) -> Result<(), SseError> {
        let data = serde_json::to_string(value).map_err(|_| SseError::Closed)?;
        self.enqueue(Frame::Data(data))
    }

    pub fn write_event(&self, name: impl Into<String>, data: impl Into<String>) -> Result<(), SseError> {
        self.enqueue(Frame::Event {
            name: name.into(),
            data: data.into(),
        })
    }

    pub fn write_comment(&self, text: impl Into<String>) -> Result<(), SseError> {
        self.enqueue(Frame::Comment(text.into()))
    }

    /// Emit `{type:"error", errorText}` then close.
    pub fn write_error(&self, message: impl Into<String>) -> Result<(), SseError> {
        let message = message.into();
        self.write_json_data(&serde_json::json!({ "type": "error", "errorText": message }))?;
        self.close()
    }

    /// Send the final `data: [DONE]` frame and stop accepting further
    /// writes. Idempotent.
    pub fn close(&self) -> Result<(), SseError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.tx.try_send(Frame::Done).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => SseError::ChannelFull,
            mpsc::error::TrySendError::Closed(_) => SseError::Closed,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    // -- §4.6 AI streaming vocabulary --------------------------------------

    pub fn ai_msg_start(&self, message_id: &str) -> Result<(), SseError> {
        self.write_json_data(&serde_json::json!({ "type": "start", "messageId": message_id }))
    }

    pub fn ai_msg_text_start(&self, id: &str) -> Result<(), SseError> {
        self.write_json_data(&serde_json::json!({ "type": "text-start", "id": id }))
    }

    pub fn ai_msg_text_delta(&self, id: &str, delta: &str) -> Result<(), SseError> {
        self.write_json_data(&serde_json::json!({ "type": "text-delta", "id": id, "delta": delta }))
    }

    pub fn ai_msg_text_end(&self, id: &str) -> Result<(), SseError> {
        self.write_json_data(&serde_json::json!({ "type": "text-end", "id": id }))
    }

    pub fn ai_msg_reasoning_start(&self, id: &str) -> Result<(), SseError> {
        self.write_json_data(&serde_json::json!({ "type": "reasoning-start", "id": id }))
    }

    pub fn ai_msg_reasoning_delta(&self, id: &str, delta: &str) -> Result<(), SseError> {
        self.write_json_data(&serde_json::json!({ "type": "reasoning-delta", "id": id, "delta": delta }))
    }

    pub fn ai_msg_reasoning_end(&self, id: &str) -> Result<(), SseError> {
        self.write_json_data(&serde_json::json!({ "type": "reasoning-end", "id": id }))
    }

    pub fn ai_msg_tool_input_start(&self, tool_call_id: &str, tool_name: &str) -> Result<(), SseError> {
        self.write_json_data(&serde_json::json!({
            "type": "tool-input-start",
            "toolCallId": tool_call_id,
            "toolName": tool_name,
        }))
    }

    pub fn ai_msg_tool_input_delta(&self, tool_call_id: &str, delta: &str) -> Result<(), SseError> {
        self.write_json_data(&serde_json::json!({
            "type": "tool-input-delta",
            "toolCallId": tool_call_id,
            "delta": delta,
        }))
    }

    pub fn ai_msg_tool_input_available(&self, tool_call_id: &str, input: &Value) -> Result<(), SseError> {
        self.write_json_data(&serde_json::json!({
            "type": "tool-input-available",
            "toolCallId": tool_call_id,
            "input": input,
        }))
    }

    pub fn ai_msg_finish(&self, finish_reason: Option<&str>, usage: Option<&Value>) -> Result<(), SseError> {
        self.write_json_data(&serde_json::json!({
            "type": "finish",
            "finishReason": finish_reason,
            "usage": usage,
        }))
    }

    pub fn ai_msg_finish_step(&self) -> Result<(), SseError> {
        self.write_json_data(&serde_json::json!({ "type": "finish-step" }))
    }

    pub fn ai_msg_error(&self, message: &str) -> Result<(), SseError> {
        self.write_json_data(&serde_json::json!({ "type": "error", "errorText": message }))
    }
}
