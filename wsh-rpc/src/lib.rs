//! The RPC endpoint described in §4.2: request/response matching, command
//! dispatch to locally registered handlers, timeouts, and cancellation.
//! Transport-agnostic — a stdio, socket, OSC, or websocket reader/writer
//! pair feeds and drains one [`WshRpc`] instance.

mod endpoint;
mod events;
mod ids;
mod inflight;
mod registry;

pub use endpoint::ComplexRequestHandle;
pub use endpoint::RpcOpts;
pub use endpoint::SendError;
pub use endpoint::WshRpc;
pub use events::EventListener;
pub use ids::new_req_id;
pub use registry::HandlerRegistry;
pub use registry::Invocation;

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::Value;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;
    use wsh_protocol::CommandDeclaration;
    use wsh_protocol::RpcContext;
    use wsh_protocol::RpcMessage;

    fn echo_registry() -> HandlerRegistry {
        let mut registry = HandlerRegistry::new();
        registry.register_call(
            CommandDeclaration::call("echo", "EchoCommand"),
            |_ctx, input: Value, _cancel| async move { Ok(input) },
        );
        registry
    }

    #[tokio::test]
    async fn serves_an_inbound_call_and_writes_a_response() {
        let (rpc, mut output_rx) = WshRpc::new(RpcContext::for_leaf("conn:1"), echo_registry());

        rpc.handle_incoming(RpcMessage::request(
            "echo",
            "r1",
            None,
            Some(Value::from("hi")),
            None,
        ));

        let reply = output_rx.recv().await.unwrap();
        assert_eq!(reply.res_id.as_deref(), Some("r1"));
        assert_eq!(reply.data, Some(Value::from("hi")));
        assert!(!reply.cont);
    }

    #[tokio::test]
    async fn unknown_command_gets_an_error_response() {
        let (rpc, mut output_rx) = WshRpc::new(RpcContext::for_leaf("conn:1"), HandlerRegistry::new());

        rpc.handle_incoming(RpcMessage::request("nope", "r1", None, None, None));

        let reply = output_rx.recv().await.unwrap();
        assert_eq!(reply.res_id.as_deref(), Some("r1"));
        assert!(reply.error.unwrap().contains("no handler"));
    }

    #[tokio::test]
    async fn send_rpc_request_matches_its_response_by_req_id() {
        let (rpc, mut output_rx) = WshRpc::new(RpcContext::for_leaf("conn:1"), HandlerRegistry::new());

        let rpc2 = rpc.clone();
        let requester = tokio::spawn(async move {
            rpc2.send_rpc_request("ping", Some(Value::from(1)), RpcOpts::default())
                .await
        });

        let sent = output_rx.recv().await.unwrap();
        let req_id = sent.req_id.clone().unwrap();
        rpc.handle_incoming(RpcMessage::response(req_id, Some(Value::from("pong")), false));

        let result = requester.await.unwrap();
        assert_eq!(result, Ok(Value::from("pong")));
    }

    #[tokio::test]
    async fn send_rpc_request_times_out_and_emits_a_cancel() {
        let (rpc, mut output_rx) = WshRpc::new(RpcContext::for_leaf("conn:1"), HandlerRegistry::new());

        let opts = RpcOpts {
            route: None,
            timeout_ms: Some(20),
        };
        let result = rpc.send_rpc_request("slow", None, opts).await;
        assert!(result.unwrap_err().starts_with("EC-TIME"));

        let _request_frame = output_rx.recv().await.unwrap();
        let cancel_frame = tokio::time::timeout(Duration::from_millis(100), output_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(cancel_frame.cancel);
    }

    #[tokio::test]
    async fn complex_request_streams_until_terminal_frame() {
        let (rpc, mut output_rx) = WshRpc::new(RpcContext::for_leaf("conn:1"), HandlerRegistry::new());

        let mut handle = rpc
            .send_complex_request("tail", None, RpcOpts::default())
            .await
            .unwrap();
        let sent = output_rx.recv().await.unwrap();
        let req_id = sent.req_id.unwrap();

        rpc.handle_incoming(RpcMessage::response(req_id.clone(), Some(Value::from(1)), true));
        rpc.handle_incoming(RpcMessage::response(req_id.clone(), Some(Value::from(2)), true));
        rpc.handle_incoming(RpcMessage::response(req_id, None, false));

        assert_eq!(handle.next_response().await, Some(Ok(Value::from(1))));
        assert_eq!(handle.next_response().await, Some(Ok(Value::from(2))));
        assert_eq!(handle.next_response().await, Some(Ok(Value::Null)));
        assert!(handle.is_done());
        assert_eq!(handle.next_response().await, None);
    }

    #[tokio::test]
    async fn eventrecv_frame_is_delivered_to_a_subscriber_and_never_hits_the_registry() {
        let (rpc, mut output_rx) = WshRpc::new(RpcContext::for_leaf("conn:1"), HandlerRegistry::new());
        let mut sub = rpc.subscribe_event("route-gone");

        rpc.handle_incoming(RpcMessage::request(
            "eventrecv",
            "r1",
            None,
            Some(serde_json::json!({ "event": "route-gone", "data": { "routeId": "conn:2" } })),
            None,
        ));

        let received = sub.recv().await.unwrap();
        assert_eq!(received, serde_json::json!({ "routeId": "conn:2" }));

        let reply = output_rx.recv().await.unwrap();
        assert_eq!(reply.res_id.as_deref(), Some("r1"));
        assert!(reply.error.is_none());
    }

    #[tokio::test]
    async fn inbound_cancel_stops_a_running_stream_handler() {
        let mut registry = HandlerRegistry::new();
        registry.register_stream(
            CommandDeclaration::response_stream("tail", "TailCommand"),
            |_ctx, _input: Value, cancel: CancellationToken| {
                futures::stream::unfold(0u64, move |n| {
                    let cancel = cancel.clone();
                    async move {
                        cancel.cancelled().await;
                        let _ = n;
                        None::<(Result<Value, String>, u64)>
                    }
                })
            },
        );
        let (rpc, mut output_rx) = WshRpc::new(RpcContext::for_leaf("conn:1"), registry);

        rpc.handle_incoming(RpcMessage::request("tail", "r1", None, None, None));
        rpc.handle_incoming(RpcMessage::cancel_request("r1"));

        // No response frame should ever arrive: the handler's stream blocks
        // forever on its own cancellation token and is torn down once it
        // observes the cancel, never emitting a terminal frame.
        let outcome = tokio::time::timeout(Duration::from_millis(100), output_rx.recv()).await;
        assert!(outcome.is_err());
    }
}
