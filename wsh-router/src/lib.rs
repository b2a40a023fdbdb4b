//! The link-switch from §4.4: tracks per-link trust, the route table, and
//! in-flight reverse-routing, and answers the `$control`/`$control:root`
//! endpoint that brings a link from untrusted to trusted.

mod channel_sink;
mod ids;
mod link;
mod router;

pub use channel_sink::ChannelSink;
pub use ids::new_swap_token;
pub use link::LinkId;
pub use link::LinkSendError;
pub use link::LinkSink;
pub use link::NO_LINK_ID;
pub use link::TrustState;
pub use router::Router;

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use std::time::Duration;

    use pretty_assertions::assert_eq;
    use tokio::sync::mpsc;
    use tokio::time::timeout;
    use wsh_auth::EncodingKey;
    use wsh_protocol::ErrorKind;
    use wsh_protocol::RpcContext;
    use wsh_protocol::RpcMessage;

    use super::*;

    const SECRET: &[u8] = b"test-only-shared-secret";

    fn keys() -> (EncodingKey, wsh_auth::DecodingKey) {
        (
            EncodingKey::from_secret(SECRET),
            wsh_auth::DecodingKey::from_secret(SECRET),
        )
    }

    struct TestLink {
        router: std::sync::Arc<Router>,
        link_id: LinkId,
        rx: mpsc::Receiver<RpcMessage>,
    }

    fn attach(router: &std::sync::Arc<Router>) -> TestLink {
        let (tx, rx) = mpsc::channel(32);
        let link_id = router.register_untrusted_link(std::sync::Arc::new(ChannelSink::new(tx)));
        TestLink {
            router: std::sync::Arc::clone(router),
            link_id,
            rx,
        }
    }

    async fn authenticate(link: &mut TestLink, ctx: &RpcContext, enc: &EncodingKey) {
        let token = wsh_auth::mint(ctx, Duration::from_secs(60), enc).unwrap();
        link.router
            .handle_incoming(
                link.link_id,
                RpcMessage::request(
                    "authenticate",
                    "auth-1",
                    Some(wsh_protocol::CONTROL_ROUTE.to_string()),
                    Some(serde_json::json!({ "token": token })),
                    None,
                ),
            )
            .await;
        let reply = timeout(Duration::from_millis(200), link.rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply.res_id.as_deref(), Some("auth-1"));
        assert!(reply.error.is_none(), "authenticate failed: {:?}", reply.error);
    }

    #[tokio::test]
    async fn untrusted_fresh_request_to_a_data_route_is_rejected() {
        let (_enc, dec) = keys();
        let router = Router::new_root(dec, "");
        let mut client = attach(&router);

        router
            .handle_incoming(
                client.link_id,
                RpcMessage::request("echo", "r1", Some("conn:abc".to_string()), None, None),
            )
            .await;

        let reply = timeout(Duration::from_millis(200), client.rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply.res_id.as_deref(), Some("r1"));
        assert_eq!(reply.error.as_deref(), Some(ErrorKind::Unauthenticated.format("").as_str()));
    }

    #[tokio::test]
    async fn fresh_request_with_no_bound_route_gets_a_no_route_error() {
        let (enc, dec) = keys();
        let router = Router::new_root(dec, "");
        let mut client = attach(&router);
        authenticate(&mut client, &RpcContext::for_leaf("conn:me"), &enc).await;

        router
            .handle_incoming(
                client.link_id,
                RpcMessage::request("echo", "r2", Some("conn:missing".to_string()), None, None),
            )
            .await;

        let reply = timeout(Duration::from_millis(200), client.rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply.res_id.as_deref(), Some("r2"));
        assert_eq!(reply.error.as_deref(), Some(ErrorKind::NoRoute.format("conn:missing").as_str()));
    }

    #[tokio::test]
    async fn authenticate_binds_a_leaf_route_that_can_then_receive_requests() {
        let (enc, dec) = keys();
        let router = Router::new_root(dec, "");

        let mut server = attach(&router);
        authenticate(&mut server, &RpcContext::for_leaf("conn:server"), &enc).await;
        assert_eq!(router.route_link("conn:server"), Some(server.link_id));

        let mut client = attach(&router);
        authenticate(&mut client, &RpcContext::for_leaf("conn:client"), &enc).await;

        router
            .handle_incoming(
                client.link_id,
                RpcMessage::request(
                    "echo",
                    "r3",
                    Some("conn:server".to_string()),
                    Some(serde_json::json!({ "text": "hi" })),
                    None,
                ),
            )
            .await;

        let forwarded = timeout(Duration::from_millis(200), server.rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(forwarded.req_id.as_deref(), Some("r3"));
        assert_eq!(forwarded.source.as_deref(), Some("conn:client"));

        let reply_data = serde_json::json!({ "ok": true });
        router
            .handle_incoming(server.link_id, RpcMessage::response("r3", Some(reply_data), false))
            .await;

        let response = timeout(Duration::from_millis(200), client.rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(response.res_id.as_deref(), Some("r3"));
        assert!(response.is_terminal());
        assert!(router.route_link("conn:server").is_some());
    }

    #[tokio::test]
    async fn cancel_frame_is_forwarded_without_clearing_the_rpc_map() {
        let (enc, dec) = keys();
        let router = Router::new_root(dec, "");

        let mut server = attach(&router);
        authenticate(&mut server, &RpcContext::for_leaf("conn:server"), &enc).await;
        let mut client = attach(&router);
        authenticate(&mut client, &RpcContext::for_leaf("conn:client"), &enc).await;

        router
            .handle_incoming(
                client.link_id,
                RpcMessage::request("echo", "r4", Some("conn:server".to_string()), None, None),
            )
            .await;
        let _ = timeout(Duration::from_millis(200), server.rx.recv()).await.unwrap();

        router
            .handle_incoming(client.link_id, RpcMessage::cancel_request("r4"))
            .await;
        let cancel = timeout(Duration::from_millis(200), server.rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(cancel.cancel);
        assert_eq!(cancel.req_id.as_deref(), Some("r4"));

        router
            .handle_incoming(server.link_id, RpcMessage::response("r4", None, false))
            .await;
        let terminal = timeout(Duration::from_millis(200), client.rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(terminal.is_terminal());
    }

    #[tokio::test]
    async fn unregistering_a_leaf_link_emits_route_gone_to_the_remaining_links() {
        let (enc, dec) = keys();
        let router = Router::new_root(dec, "");

        let mut server = attach(&router);
        authenticate(&mut server, &RpcContext::for_leaf("conn:server"), &enc).await;
        let mut client = attach(&router);
        authenticate(&mut client, &RpcContext::for_leaf("conn:client"), &enc).await;

        router.unregister_link(server.link_id);

        let event = timeout(Duration::from_millis(200), client.rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.command.as_deref(), Some("eventrecv"));
        assert_eq!(
            event.data,
            Some(serde_json::json!({ "event": "route-gone", "data": { "routeId": "conn:server" } }))
        );
        assert!(router.route_link("conn:server").is_none());
    }

    #[tokio::test]
    async fn route_announce_from_a_trusted_router_link_populates_the_route_map() {
        let (enc, dec) = keys();
        let root = Router::new_root(dec, "");
        let mut child_conn = attach(&root);

        let token = wsh_auth::mint(&RpcContext::for_router(), Duration::from_secs(60), &enc).unwrap();
        root.handle_incoming(
            child_conn.link_id,
            RpcMessage::request(
                "authenticate",
                "auth-router",
                Some(wsh_protocol::CONTROL_ROUTE.to_string()),
                Some(serde_json::json!({ "token": token })),
                None,
            ),
        )
        .await;
        let _ = timeout(Duration::from_millis(200), child_conn.rx.recv())
            .await
            .unwrap()
            .unwrap();

        root.handle_incoming(
            child_conn.link_id,
            RpcMessage::request(
                "routeAnnounce",
                "announce-1",
                Some(wsh_protocol::CONTROL_ROUTE.to_string()),
                Some(serde_json::json!({ "source": "conn:behind-child" })),
                None,
            ),
        )
        .await;
        let reply = timeout(Duration::from_millis(200), child_conn.rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(reply.error.is_none());
        assert_eq!(root.route_link("conn:behind-child"), Some(child_conn.link_id));
    }
}
