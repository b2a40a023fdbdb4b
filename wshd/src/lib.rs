//! `wshd`: the standalone process that hosts a root [`wsh_router::Router`],
//! a local [`wsh_rpc::WshRpc`] endpoint bound to `$DEFAULT_ROUTE`, and the
//! transports (stdio/tcp/websocket/OSC/HTTP) peers reach it through.
//!
//! Grounded on `codex-rs/app-server`'s `run_main`/`run_main_with_transport`:
//! build the shared state once, wire every transport to it, then drive them
//! concurrently until shutdown.

pub mod anthropic_client;
pub mod handlers;
pub mod http;
pub mod osc_transport;
pub mod transport;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use wsh_auth::EncodingKey;
use wsh_protocol::CONTROL_ROUTE;
use wsh_protocol::DEFAULT_ROUTE;
use wsh_protocol::RpcContext;
use wsh_protocol::RpcMessage;
use wsh_router::LinkSendError;
use wsh_router::LinkSink;
use wsh_router::Router;
use wsh_rpc::WshRpc;

pub use transport::Transport;
pub use transport::TransportParseError;

/// How long a bootstrap token for the local endpoint stays valid. The token
/// is redeemed once, immediately, against the same process's own router.
const LOCAL_ENDPOINT_TOKEN_TTL: Duration = Duration::from_secs(60);

pub struct WshdConfig {
    pub transport: Transport,
    pub http_listen: Option<SocketAddr>,
    pub jwt_secret: Vec<u8>,
    pub anthropic_api_key: Option<String>,
    pub anthropic_model: String,
}

/// Bridges the router's link interface directly onto a local [`WshRpc`]
/// endpoint: every message the router would otherwise serialize onto a
/// socket is instead handed straight to `handle_incoming`, which is
/// non-blocking and spawns whatever work a request needs. This sidesteps a
/// loopback socket for same-process traffic, the way an in-process link
/// naturally should.
struct WshRpcLinkSink {
    wshrpc: Arc<WshRpc>,
}

#[async_trait]
impl LinkSink for WshRpcLinkSink {
    async fn send(&self, msg: RpcMessage) -> Result<(), LinkSendError> {
        self.wshrpc.handle_incoming(msg);
        Ok(())
    }
}

/// Register the local endpoint as an untrusted link, authenticate it
/// against the router's own decoding key, and spawn the task that drains
/// its outbound messages back into the router. Returns the `WshRpc` handle
/// callers use to issue requests/commands from within this process.
async fn bootstrap_local_endpoint(
    router: &Arc<Router>,
    encoding_key: &EncodingKey,
    registry: wsh_rpc::HandlerRegistry,
) -> anyhow::Result<Arc<WshRpc>> {
    let ctx = RpcContext::for_leaf(DEFAULT_ROUTE);
    let (wshrpc, mut output_rx) = WshRpc::new(ctx.clone(), registry);

    let link_id = router.register_untrusted_link(Arc::new(WshRpcLinkSink {
        wshrpc: Arc::clone(&wshrpc),
    }));

    let token = wsh_auth::mint(&ctx, LOCAL_ENDPOINT_TOKEN_TTL, encoding_key)?;
    let auth_request = RpcMessage::request(
        "authenticate",
        "wshd-bootstrap",
        Some(CONTROL_ROUTE.to_string()),
        Some(serde_json::json!({ "token": token })),
        None,
    );
    // The reply comes back on this same link; there is no in-flight
    // waiter registered for a request wshd minted itself, so it's dropped
    // once `handle_incoming` resolves it below. A failure here would only
    // ever be a programmer error (router/auth key mismatch), not something
    // a caller can act on mid-bootstrap.
    router.handle_incoming(link_id, auth_request).await;

    tokio::spawn({
        let router = Arc::clone(router);
        async move {
            while let Some(msg) = output_rx.recv().await {
                router.handle_incoming(link_id, msg).await;
            }
        }
    });

    Ok(wshrpc)
}

pub async fn run_main(config: WshdConfig) -> anyhow::Result<()> {
    let decoding_key = wsh_auth::DecodingKey::from_secret(&config.jwt_secret);
    let encoding_key = wsh_auth::EncodingKey::from_secret(&config.jwt_secret);
    let router = Router::new_root(decoding_key, "");

    let registry = handlers::build_registry();
    let _local_endpoint = bootstrap_local_endpoint(&router, &encoding_key, registry).await?;

    if let Some(http_addr) = config.http_listen {
        let anthropic = Arc::new(anthropic_client::AnthropicClient::new(
            build_reqwest_client()?,
            config.anthropic_api_key,
            config.anthropic_model,
        ));
        let state = http::AppState { anthropic };
        tokio::spawn(async move {
            if let Err(err) = http::serve(http_addr, state).await {
                tracing::error!(error = %err, "http transport exited");
            }
        });
    }

    transport::run(config.transport, router).await
}

fn build_reqwest_client() -> anyhow::Result<reqwest::Client> {
    Ok(reqwest::Client::builder().build()?)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use wsh_protocol::CommandDeclaration;
    use wsh_rpc::HandlerRegistry;

    use super::*;

    #[tokio::test]
    async fn local_endpoint_answers_a_ping_routed_through_the_router() {
        let decoding_key = wsh_auth::DecodingKey::from_secret(b"test-secret");
        let encoding_key = wsh_auth::EncodingKey::from_secret(b"test-secret");
        let router = Router::new_root(decoding_key, "");

        let mut registry = HandlerRegistry::new();
        registry.register_call(
            CommandDeclaration::call("ping", "Ping"),
            |_ctx: RpcContext, _input: (), _cancel: tokio_util::sync::CancellationToken| async move {
                Ok::<_, String>("pong".to_string())
            },
        );
        let _wshrpc = bootstrap_local_endpoint(&router, &encoding_key, registry)
            .await
            .unwrap();

        let (client_tx, mut client_rx) = tokio::sync::mpsc::channel(8);
        let client_link = router.register_untrusted_link(Arc::new(wsh_router::ChannelSink::new(client_tx)));
        let client_ctx = RpcContext::for_leaf("client1");
        let client_token = wsh_auth::mint(&client_ctx, Duration::from_secs(60), &encoding_key).unwrap();
        router
            .handle_incoming(
                client_link,
                RpcMessage::request(
                    "authenticate",
                    "auth1",
                    Some(CONTROL_ROUTE.to_string()),
                    Some(serde_json::json!({ "token": client_token })),
                    None,
                ),
            )
            .await;
        let auth_reply = client_rx.recv().await.unwrap();
        assert!(auth_reply.error.is_none());

        router
            .handle_incoming(
                client_link,
                RpcMessage::request("ping", "ping1", Some(DEFAULT_ROUTE.to_string()), None, None),
            )
            .await;
        let ping_reply = client_rx.recv().await.unwrap();
        assert_eq!(ping_reply.data, Some(serde_json::json!("pong")));
    }

    #[test]
    fn ping_declaration_is_a_call() {
        let decl = CommandDeclaration::call("ping", "Ping");
        assert_eq!(decl.command, "ping");
    }
}
