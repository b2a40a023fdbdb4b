//! Translates an Anthropic Messages streaming response into the SSE
//! adapter's AI vocabulary (§4.6). Grounded on the hand-rolled Anthropic SSE
//! parser in `provider-sdks/anthropic`'s `streaming.rs` for the event
//! shapes and per-index bookkeeping; reimplemented here against
//! `eventsource-stream` (already the pack's idiomatic choice for consuming
//! provider SSE, see `codex-api`/`a2a`) instead of a hand-written byte
//! parser.

mod raw_event;

use std::collections::HashMap;
use std::pin::Pin;

use bytes::Bytes;
use eventsource_stream::Eventsource;
use futures::Stream;
use futures::StreamExt;
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use wsh_async_util::OrCancelExt;
use wsh_sse::SseHandle;

use raw_event::ContentBlockDelta;
use raw_event::ContentBlockStartData;
use raw_event::RawEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReasonKind {
    Done,
    ToolUse,
    MaxTokens,
    Content,
    Canceled,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub input: Value,
}

/// The translator's normalized outcome of one provider call (§4.6, §8
/// scenario 6).
#[derive(Debug, Clone, Default, Serialize)]
pub struct StopReason {
    pub kind: Option<StopReasonKind>,
    pub raw_reason: Option<String>,
    pub message_id: Option<String>,
    pub model: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub error_type: Option<String>,
    pub error_text: Option<String>,
}

impl StopReason {
    fn done(raw_reason: &str, message_id: &str, model: &str) -> Self {
        Self {
            kind: Some(StopReasonKind::Done),
            raw_reason: Some(raw_reason.to_string()),
            message_id: Some(message_id.to_string()),
            model: Some(model.to_string()),
            ..Default::default()
        }
    }

    fn canceled() -> Self {
        Self {
            kind: Some(StopReasonKind::Canceled),
            ..Default::default()
        }
    }

    fn error(error_type: String, error_text: String) -> Self {
        Self {
            kind: Some(StopReasonKind::Error),
            error_type: Some(error_type),
            error_text: Some(error_text),
            ..Default::default()
        }
    }
}

enum BlockState {
    Text { local_id: String },
    Reasoning { local_id: String },
    ToolUse { id: String, name: String, json: String },
    Unknown,
}

/// Drive one Anthropic streaming response to completion, writing AI parts
/// to `sse` as events arrive, and return the normalized [`StopReason`].
///
/// `cancel` is checked at every suspension point (each await on the next
/// provider byte chunk); if it fires mid-stream the translator stops
/// immediately and returns `Kind::Canceled` without emitting a `finish`
/// frame (§5 "Context-initiated" cancellation).
pub async fn translate_stream<S, E>(
    byte_stream: S,
    sse: &SseHandle,
    cancel: &CancellationToken,
) -> StopReason
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    let mut events: Pin<Box<_>> = Box::pin(byte_stream.eventsource());
    let mut blocks: HashMap<i64, BlockState> = HashMap::new();
    let mut message_id = String::new();
    let mut model = String::new();
    let mut stop_reason: Option<String> = None;

    loop {
        if cancel.is_cancelled() {
            return StopReason::canceled();
        }
        let next = match events.next().or_cancel(cancel).await {
            Err(_canceled) => return StopReason::canceled(),
            Ok(None) => return StopReason::canceled(),
            Ok(Some(Err(err))) => {
                let _ = sse.ai_msg_error(&err.to_string());
                return StopReason::error("transport".to_string(), err.to_string());
            }
            Ok(Some(Ok(event))) => event,
        };

        if next.data.is_empty() {
            continue;
        }
        let parsed: Result<RawEvent, _> = serde_json::from_str(&next.data);
        let Ok(raw) = parsed else {
            tracing::debug!(data = %next.data, "ignoring unparsable provider event");
            continue;
        };

        match raw {
            RawEvent::MessageStart { message } => {
                message_id = message.id.clone();
                model = message.model.clone();
                let _ = sse.ai_msg_start(&message.id);
            }
            RawEvent::ContentBlockStart { index, content_block } => {
                handle_block_start(sse, &mut blocks, index, content_block);
            }
            RawEvent::ContentBlockDelta { index, delta } => {
                handle_block_delta(sse, &mut blocks, index, delta);
            }
            RawEvent::ContentBlockStop { index } => {
                handle_block_stop(sse, &mut blocks, index);
            }
            RawEvent::MessageDelta { delta } => {
                if delta.stop_reason.is_some() {
                    stop_reason = delta.stop_reason;
                }
            }
            RawEvent::MessageStop => {
                return finish(sse, &blocks, stop_reason.as_deref(), &message_id, &model);
            }
            RawEvent::Ping => {}
            RawEvent::Error { error } => {
                let _ = sse.ai_msg_error(&error.message);
                return StopReason::error(error.error_type, error.message);
            }
        }
    }
}

fn handle_block_start(
    sse: &SseHandle,
    blocks: &mut HashMap<i64, BlockState>,
    index: i64,
    content_block: ContentBlockStartData,
) {
    let state = match content_block {
        ContentBlockStartData::Text { .. } => {
            let local_id = format!("block-{index}");
            let _ = sse.ai_msg_text_start(&local_id);
            BlockState::Text { local_id }
        }
        ContentBlockStartData::Thinking { .. } => {
            let local_id = format!("block-{index}");
            let _ = sse.ai_msg_reasoning_start(&local_id);
            BlockState::Reasoning { local_id }
        }
        ContentBlockStartData::ToolUse { id, name, input } => {
            let _ = sse.ai_msg_tool_input_start(&id, &name);
            let json = if input.is_null() {
                String::new()
            } else {
                input.to_string()
            };
            BlockState::ToolUse { id, name, json }
        }
        ContentBlockStartData::Unknown => BlockState::Unknown,
    };
    blocks.insert(index, state);
}

fn handle_block_delta(
    sse: &SseHandle,
    blocks: &mut HashMap<i64, BlockState>,
    index: i64,
    delta: ContentBlockDelta,
) {
    let Some(state) = blocks.get_mut(&index) else {
        return;
    };
    match (state, delta) {
        (BlockState::Text { local_id }, ContentBlockDelta::TextDelta { text }) => {
            let _ = sse.ai_msg_text_delta(local_id, &text);
        }
        (BlockState::Reasoning { local_id }, ContentBlockDelta::ThinkingDelta { thinking }) => {
            let _ = sse.ai_msg_reasoning_delta(local_id, &thinking);
        }
        (BlockState::ToolUse { id, json, .. }, ContentBlockDelta::InputJsonDelta { partial_json }) => {
            let _ = sse.ai_msg_tool_input_delta(id, &partial_json);
            json.push_str(&partial_json);
        }
        _ => {}
    }
}

fn handle_block_stop(sse: &SseHandle, blocks: &mut HashMap<i64, BlockState>, index: i64) {
    let Some(state) = blocks.remove(&index) else {
        return;
    };
    match state {
        BlockState::Text { local_id } => {
            let _ = sse.ai_msg_text_end(&local_id);
        }
        BlockState::Reasoning { local_id } => {
            let _ = sse.ai_msg_reasoning_end(&local_id);
        }
        BlockState::ToolUse { id, json, .. } => {
            let parsed = parse_tool_input(&json);
            match parsed {
                Ok(input) => {
                    let _ = sse.ai_msg_tool_input_available(&id, &input);
                }
                Err(err) => {
                    let _ = sse.ai_msg_error(&err);
                }
            }
        }
        BlockState::Unknown => {}
    }
}

fn parse_tool_input(json: &str) -> Result<Value, String> {
    if json.is_empty() {
        return Ok(Value::Object(serde_json::Map::new()));
    }
    let value: Value = serde_json::from_str(json).map_err(|e| format!("malformed tool input json: {e}"))?;
    if !value.is_object() {
        return Err("tool input json did not decode to an object".to_string());
    }
    Ok(value)
}

fn finish(
    sse: &SseHandle,
    blocks: &HashMap<i64, BlockState>,
    stop_reason: Option<&str>,
    message_id: &str,
    model: &str,
) -> StopReason {
    match stop_reason {
        Some("tool_use") => {
            let _ = sse.ai_msg_finish_step();
            let tool_calls = blocks
                .values()
                .filter_map(|b| match b {
                    BlockState::ToolUse { id, name, json } => Some(ToolCall {
                        id: id.clone(),
                        name: name.clone(),
                        input: parse_tool_input(json).unwrap_or(Value::Null),
                    }),
                    _ => None,
                })
                .collect();
            StopReason {
                kind: Some(StopReasonKind::ToolUse),
                raw_reason: Some("tool_use".to_string()),
                message_id: Some(message_id.to_string()),
                model: Some(model.to_string()),
                tool_calls,
                ..Default::default()
            }
        }
        Some("max_tokens") => {
            let _ = sse.ai_msg_finish(Some("max_tokens"), None);
            StopReason {
                kind: Some(StopReasonKind::MaxTokens),
                raw_reason: Some("max_tokens".to_string()),
                message_id: Some(message_id.to_string()),
                model: Some(model.to_string()),
                ..Default::default()
            }
        }
        Some("refusal") => {
            let _ = sse.ai_msg_finish(Some("refusal"), None);
            StopReason {
                kind: Some(StopReasonKind::Content),
                raw_reason: Some("refusal".to_string()),
                message_id: Some(message_id.to_string()),
                model: Some(model.to_string()),
                ..Default::default()
            }
        }
        other => {
            let _ = sse.ai_msg_finish(other, None);
            StopReason::done(other.unwrap_or_default(), message_id, model)
        }
    }
}
