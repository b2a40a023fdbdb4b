//! Thin client for the Anthropic Messages streaming API, grounded on
//! `reqwest`'s streaming-body pattern used across the example pack's HTTP
//! clients (build request, check status, hand back `bytes_stream()` for a
//! caller to decode) rather than buffering the whole response.

use bytes::Bytes;
use futures::Stream;
use serde_json::Value;
use serde_json::json;

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u64 = 4096;

#[derive(Debug, thiserror::Error)]
pub enum AnthropicClientError {
    #[error("no Anthropic API key configured")]
    MissingApiKey,
    #[error("request to Anthropic failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Anthropic API returned {status}: {body}")]
    ApiError { status: u16, body: String },
}

#[derive(Clone)]
pub struct AnthropicClient {
    http: reqwest::Client,
    api_key: Option<String>,
    model: String,
}

impl AnthropicClient {
    pub fn new(http: reqwest::Client, api_key: Option<String>, model: String) -> Self {
        Self {
            http,
            api_key,
            model,
        }
    }

    /// Start a streaming `messages` call and hand back the raw SSE byte
    /// stream for [`wsh_llm_anthropic::translate_stream`] to decode.
    pub async fn stream_messages(
        &self,
        messages: Vec<Value>,
        options: Option<Value>,
    ) -> Result<impl Stream<Item = Result<Bytes, reqwest::Error>> + Send + 'static, AnthropicClientError>
    {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or(AnthropicClientError::MissingApiKey)?;

        let max_tokens = options
            .as_ref()
            .and_then(|opts| opts.get("maxTokens"))
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_MAX_TOKENS);

        let body = json!({
            "model": self.model,
            "max_tokens": max_tokens,
            "stream": true,
            "messages": messages,
        });

        let response = self
            .http
            .post(ANTHROPIC_API_URL)
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(AnthropicClientError::ApiError { status, body });
        }

        Ok(response.bytes_stream())
    }
}
