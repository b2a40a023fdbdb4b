use serde::Deserialize;
use serde_json::Value;

/// The subset of the Anthropic Messages streaming wire format the
/// translator acts on (§4.6). Each variant's `data:` payload carries its own
/// `"type"` tag matching the SSE `event:` name; we parse against that tag
/// rather than the event name so a mismatched pair is still caught.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum RawEvent {
    MessageStart {
        message: MessageStartData,
    },
    ContentBlockStart {
        index: i64,
        content_block: ContentBlockStartData,
    },
    ContentBlockDelta {
        index: i64,
        delta: ContentBlockDelta,
    },
    ContentBlockStop {
        index: i64,
    },
    MessageDelta {
        delta: MessageDeltaData,
    },
    MessageStop,
    Ping,
    Error {
        error: StreamError,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct MessageStartData {
    pub id: String,
    pub model: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum ContentBlockStartData {
    Text {
        #[serde(default)]
        #[allow(dead_code)]
        text: String,
    },
    Thinking {
        #[serde(default)]
        #[allow(dead_code)]
        thinking: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum ContentBlockDelta {
    TextDelta {
        text: String,
    },
    ThinkingDelta {
        thinking: String,
    },
    InputJsonDelta {
        partial_json: String,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct MessageDeltaData {
    pub stop_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct StreamError {
    #[serde(rename = "type")]
    pub error_type: String,
    pub message: String,
}
