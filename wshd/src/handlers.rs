//! Local RPC method table, grounded on `codex-rs/app-server`'s pattern of
//! registering one handler function per JSON-RPC method at startup, adapted
//! here to [`HandlerRegistry::register_call`].

use tokio_util::sync::CancellationToken;
use wsh_protocol::CommandDeclaration;
use wsh_protocol::RpcContext;
use wsh_rpc::HandlerRegistry;

const PING: CommandDeclaration = CommandDeclaration::call("ping", "Ping");
const MESSAGE: CommandDeclaration = CommandDeclaration::call("message", "Message");

/// Handlers exposed by the local `wavesrv`-equivalent endpoint. This is
/// deliberately small: the fabric's job is routing and streaming, not
/// business logic, and callers needing richer behavior register their own
/// [`HandlerRegistry`] entries when embedding `wshd` as a library.
pub fn build_registry() -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();

    registry.register_call(PING, |_ctx: RpcContext, _input: (), _cancel: CancellationToken| async move {
        Ok("pong".to_string())
    });

    registry.register_call(
        MESSAGE,
        |ctx: RpcContext, input: MessageInput, _cancel: CancellationToken| async move {
            tracing::info!(route = ?ctx.route_id, text = %input.text, "message");
            Ok(())
        },
    );

    registry
}

#[derive(Debug, serde::Deserialize)]
struct MessageInput {
    text: String,
}
