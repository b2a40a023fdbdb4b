//! The `POST /ai-chat` endpoint from §4.5/§6, grounded on `wsh-sse`'s
//! `setup_sse`/`SseHandle` and `wsh-llm-anthropic`'s `translate_stream`, with
//! the axum router/handler shape following `codex-rs/app-server`'s use of
//! axum for its own websocket surface.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Json;
use axum::extract::Query;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::post;
use serde::Deserialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::anthropic_client::AnthropicClient;

#[derive(Clone)]
pub struct AppState {
    pub anthropic: Arc<AnthropicClient>,
}

#[derive(Debug, Deserialize)]
pub struct AiChatQuery {
    #[serde(rename = "blockid")]
    pub block_id: Option<String>,
    pub preset: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AiChatBody {
    pub messages: Vec<Value>,
    pub options: Option<Value>,
}

pub fn app(state: AppState) -> axum::Router {
    axum::Router::new()
        .route("/ai-chat", post(ai_chat))
        .with_state(state)
}

pub async fn serve(addr: SocketAddr, state: AppState) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "wshd http transport listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn ai_chat(
    State(state): State<AppState>,
    Query(query): Query<AiChatQuery>,
    Json(body): Json<AiChatBody>,
) -> impl IntoResponse {
    let (handle, response) = wsh_sse::setup_sse();

    tracing::debug!(block_id = ?query.block_id, preset = ?query.preset, "ai-chat request");

    let anthropic = Arc::clone(&state.anthropic);
    tokio::spawn(async move {
        let byte_stream = match anthropic.stream_messages(body.messages, body.options).await {
            Ok(stream) => stream,
            Err(err) => {
                let _ = handle.write_error(err.to_string());
                return;
            }
        };

        let cancel = CancellationToken::new();
        wsh_llm_anthropic::translate_stream(byte_stream, &handle, &cancel).await;
        let _ = handle.close();
    });

    response
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn ai_chat_query_deserializes_blockid_and_preset() {
        let query: AiChatQuery =
            serde_json::from_value(serde_json::json!({"blockid": "block1", "preset": "fast"}))
                .unwrap();
        assert_eq!(query.block_id.as_deref(), Some("block1"));
        assert_eq!(query.preset.as_deref(), Some("fast"));
    }
}
