use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;
use wsh_auth::DecodingKey;
use wsh_protocol::CONTROL_ROOT_ROUTE;
use wsh_protocol::CONTROL_ROUTE;
use wsh_protocol::DEFAULT_ROUTE;
use wsh_protocol::ErrorKind;
use wsh_protocol::FrameKind;
use wsh_protocol::RpcContext;
use wsh_protocol::RpcMessage;
use wsh_protocol::is_control_route;
use wsh_protocol::no_route_error;

use crate::ids::new_swap_token;
use crate::link::LinkId;
use crate::link::LinkRecord;
use crate::link::LinkSink;
use crate::link::NO_LINK_ID;
use crate::link::TrustState;

/// Depth of the queue a non-root router buffers `routeAnnounce` calls in
/// before a background task forwards them upstream (§4.4: "a slow upstream
/// cannot block the main loop while holding the router lock").
const ANNOUNCE_QUEUE_DEPTH: usize = 256;

struct RpcMapEntry {
    source_link: LinkId,
    dest_link: LinkId,
    #[allow(dead_code)]
    dest_route: String,
}

#[derive(Default)]
struct Inner {
    next_link_id: LinkId,
    links: HashMap<LinkId, LinkRecord>,
    route_map: HashMap<String, LinkId>,
    rpc_map: HashMap<String, RpcMapEntry>,
    upstream_link_id: Option<LinkId>,
    peer_info: HashMap<LinkId, String>,
}

/// The link-switch described in §4.4: owns trust state per link, the
/// route-to-link table, and in-flight RPC reverse-routing, and hosts the
/// `$control`/`$control:root` endpoint.
///
/// `routeMap`, `linkMap`, `rpcMap`, and `upstreamLinkId` share one lock per
/// §5's shared-resource policy; every critical section here is plain map
/// bookkeeping, and the link's [`LinkSink`] is always cloned out and sent to
/// *after* the lock is dropped.
pub struct Router {
    is_root: bool,
    decoding_key: DecodingKey,
    jwt_public_key: String,
    inner: Mutex<Inner>,
    pending_swap_tokens: Mutex<HashMap<String, RpcContext>>,
    announce_tx: Option<mpsc::Sender<String>>,
}

impl Router {
    pub fn new_root(decoding_key: DecodingKey, jwt_public_key: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            is_root: true,
            decoding_key,
            jwt_public_key: jwt_public_key.into(),
            inner: Mutex::new(Inner {
                next_link_id: NO_LINK_ID,
                ..Default::default()
            }),
            pending_swap_tokens: Mutex::new(HashMap::new()),
            announce_tx: None,
        })
    }

    pub fn new_child(decoding_key: DecodingKey, jwt_public_key: impl Into<String>) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(ANNOUNCE_QUEUE_DEPTH);
        let router = Arc::new(Self {
            is_root: false,
            decoding_key,
            jwt_public_key: jwt_public_key.into(),
            inner: Mutex::new(Inner {
                next_link_id: NO_LINK_ID,
                ..Default::default()
            }),
            pending_swap_tokens: Mutex::new(HashMap::new()),
            announce_tx: Some(tx),
        });
        router.spawn_announce_drain(rx);
        router
    }

    pub fn is_root(&self) -> bool {
        self.is_root
    }

    pub fn register_untrusted_link(&self, sink: Arc<dyn LinkSink>) -> LinkId {
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        inner.next_link_id += 1;
        let id = inner.next_link_id;
        inner.links.insert(
            id,
            LinkRecord {
                trust: TrustState::Untrusted,
                sink,
            },
        );
        id
    }

    pub fn unregister_link(&self, link_id: LinkId) {
        let (gone_routes, remaining_sinks) = {
            let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
            inner.links.remove(&link_id);
            let mut gone_routes = Vec::new();
            inner.route_map.retain(|route, bound| {
                if *bound == link_id {
                    gone_routes.push(route.clone());
                    false
                } else {
                    true
                }
            });
            inner.peer_info.remove(&link_id);
            if inner.upstream_link_id == Some(link_id) {
                inner.upstream_link_id = None;
            }
            let remaining_sinks: Vec<Arc<dyn LinkSink>> =
                inner.links.values().map(|r| Arc::clone(&r.sink)).collect();
            (gone_routes, remaining_sinks)
        };
        // Stale rpc_map entries pointing at this link are left for the
        // owning endpoint's own timeout to clean up (§9 design notes).

        if gone_routes.is_empty() {
            return;
        }
        tokio::spawn(async move {
            for route in gone_routes {
                let msg = RpcMessage::fire_and_forget(
                    "eventrecv",
                    None,
                    Some(serde_json::json!({ "event": "route-gone", "data": { "routeId": route } })),
                );
                for sink in &remaining_sinks {
                    let _ = sink.send(msg.clone()).await;
                }
            }
        });
    }

    /// Bind this router's upstream link once it has itself become a trusted
    /// router-kind client of its parent, by whatever bootstrap mechanism
    /// established that outbound connection.
    pub fn set_upstream_link(&self, link_id: LinkId) -> Result<(), String> {
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        match inner.links.get(&link_id) {
            Some(record) if record.trust == TrustState::TrustedRouter => {
                inner.upstream_link_id = Some(link_id);
                Ok(())
            }
            Some(_) => Err("upstream link must already be trusted as a router".to_string()),
            None => Err("unknown link".to_string()),
        }
    }

    /// Issue a one-shot token redeemable via `authenticateToken`. Only the
    /// root router keeps the exchange table (§4.4, §9 Open Question: the
    /// shell-launch flow that produces `ctx` is external to this crate).
    pub fn issue_swap_token(&self, ctx: RpcContext) -> Result<String, String> {
        if !self.is_root {
            return Err("swap tokens are only issued by the root router".to_string());
        }
        let token = new_swap_token();
        let mut pending = self.pending_swap_tokens.lock().unwrap_or_else(|p| p.into_inner());
        pending.insert(token.clone(), ctx);
        Ok(token)
    }

    /// Process one inbound frame already decoded and validated by the link's
    /// codec.
    pub async fn handle_incoming(self: &Arc<Self>, link_id: LinkId, mut msg: RpcMessage) {
        let frame_kind = match msg.validate() {
            Ok(kind) => kind,
            Err(err) => {
                tracing::warn!(error = %err, link_id, "dropping invalid inbound frame");
                return;
            }
        };

        let trust = {
            let inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
            match inner.links.get(&link_id) {
                Some(record) => record.trust.clone(),
                None => {
                    tracing::warn!(link_id, "frame from unregistered link");
                    return;
                }
            }
        };

        if !trust.is_trusted() {
            self.handle_untrusted(link_id, frame_kind, msg).await;
            return;
        }

        if let TrustState::TrustedLeaf { source_route } = &trust
            && msg.source.is_none()
        {
            msg.source = Some(source_route.clone());
        }

        match frame_kind {
            FrameKind::FreshRequest => {
                let route = msg.route.clone().unwrap_or_else(|| DEFAULT_ROUTE.to_string());
                if is_control_route(&route) {
                    self.dispatch_control(link_id, route, msg).await;
                } else {
                    self.forward_fresh_request(link_id, route, msg).await;
                }
            }
            FrameKind::RequestContinuation => self.forward_continuation(msg).await,
            FrameKind::Response => self.forward_response(msg).await,
            FrameKind::Cancel => self.forward_cancel(msg).await,
        }
    }

    async fn handle_untrusted(self: &Arc<Self>, link_id: LinkId, frame_kind: FrameKind, msg: RpcMessage) {
        if frame_kind != FrameKind::FreshRequest {
            tracing::debug!(link_id, "dropping non-request frame on untrusted link");
            return;
        }
        let route = msg.route.clone().unwrap_or_else(|| DEFAULT_ROUTE.to_string());
        if is_control_route(&route) {
            self.dispatch_control(link_id, route, msg).await;
            return;
        }
        if let Some(req_id) = &msg.req_id {
            self.reply_direct(
                link_id,
                RpcMessage::error_response(req_id, ErrorKind::Unauthenticated.format("")),
            )
            .await;
        }
    }

    async fn reply_direct(&self, link_id: LinkId, msg: RpcMessage) {
        let sink = {
            let inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
            inner.links.get(&link_id).map(|r| Arc::clone(&r.sink))
        };
        if let Some(sink) = sink {
            let _ = sink.send(msg).await;
        }
    }

    async fn reply_no_route(&self, source_link: LinkId, route: &str, msg: &RpcMessage) {
        let reply = if let Some(req_id) = &msg.req_id {
            RpcMessage::error_response(req_id, no_route_error(route))
        } else {
            RpcMessage::fire_and_forget(
                "message",
                None,
                Some(serde_json::json!({ "text": no_route_error(route) })),
            )
        };
        self.reply_direct(source_link, reply).await;
    }

    async fn forward_fresh_request(self: &Arc<Self>, source_link: LinkId, route: String, mut msg: RpcMessage) {
        msg.route = Some(route.clone());
        let target = {
            let inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
            inner
                .route_map
                .get(&route)
                .copied()
                .or(inner.upstream_link_id)
                .and_then(|link| inner.links.get(&link).map(|r| (link, Arc::clone(&r.sink))))
        };

        let Some((dest_link, sink)) = target else {
            self.reply_no_route(source_link, &route, &msg).await;
            return;
        };

        let req_id = msg.req_id.clone();
        if sink.send(msg).await.is_ok()
            && let Some(req_id) = req_id
        {
            let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
            inner.rpc_map.insert(
                req_id,
                RpcMapEntry {
                    source_link,
                    dest_link,
                    dest_route: route,
                },
            );
        }
    }

    async fn forward_continuation(&self, msg: RpcMessage) {
        let Some(req_id) = &msg.req_id else { return };
        let sink = {
            let inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
            inner
                .rpc_map
                .get(req_id)
                .and_then(|e| inner.links.get(&e.dest_link).map(|r| Arc::clone(&r.sink)))
        };
        if let Some(sink) = sink {
            let _ = sink.send(msg).await;
        }
    }

    async fn forward_response(&self, msg: RpcMessage) {
        let Some(res_id) = msg.res_id.clone() else { return };
        let terminal = msg.is_terminal();
        let sink = {
            let inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
            inner
                .rpc_map
                .get(&res_id)
                .and_then(|e| inner.links.get(&e.source_link).map(|r| Arc::clone(&r.sink)))
        };
        let Some(sink) = sink else {
            tracing::debug!(res_id, "response for an unknown rpc; dropping");
            return;
        };
        let _ = sink.send(msg).await;
        if terminal {
            let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
            inner.rpc_map.remove(&res_id);
        }
    }

    async fn forward_cancel(&self, msg: RpcMessage) {
        let sink = {
            let inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
            if let Some(res_id) = &msg.res_id {
                inner
                    .rpc_map
                    .get(res_id)
                    .and_then(|e| inner.links.get(&e.source_link).map(|r| Arc::clone(&r.sink)))
            } else if let Some(req_id) = &msg.req_id {
                inner
                    .rpc_map
                    .get(req_id)
                    .and_then(|e| inner.links.get(&e.dest_link).map(|r| Arc::clone(&r.sink)))
            } else {
                None
            }
        };
        if let Some(sink) = sink {
            let _ = sink.send(msg).await;
        }
        // The rpc_map entry is intentionally left in place; only the
        // terminal response frame removes it (§4.4).
    }

    async fn dispatch_control(self: &Arc<Self>, link_id: LinkId, route: String, msg: RpcMessage) {
        if route == CONTROL_ROOT_ROUTE && !self.is_root {
            if let Some(req_id) = &msg.req_id {
                self.reply_direct(
                    link_id,
                    RpcMessage::error_response(req_id, "this router is not the root".to_string()),
                )
                .await;
            }
            return;
        }

        let Some(command) = msg.command.clone() else { return };
        let req_id = msg.req_id.clone();
        let data = msg.data.clone().unwrap_or(Value::Null);

        let result: Result<Value, String> = match command.as_str() {
            "authenticate" => self.control_authenticate(link_id, data).await,
            "authenticateToken" => self.control_authenticate_token(link_id, data).await,
            "routeAnnounce" => self.control_route_announce(link_id, data),
            "routeUnannounce" => self.control_route_unannounce(link_id, data),
            "setPeerInfo" => self.control_set_peer_info(link_id, data),
            "getJwtPublicKey" => Ok(Value::from(self.jwt_public_key.clone())),
            other => Err(format!("command not found: {other}")),
        };

        if let Some(req_id) = req_id {
            let reply = match result {
                Ok(value) => RpcMessage::response(req_id, Some(value), false),
                Err(err) => RpcMessage::error_response(req_id, err),
            };
            self.reply_direct(link_id, reply).await;
        }
    }

    async fn control_authenticate(&self, link_id: LinkId, data: Value) -> Result<Value, String> {
        #[derive(Deserialize)]
        struct Params {
            token: String,
        }
        let params: Params =
            serde_json::from_value(data).map_err(|e| ErrorKind::Decode.format(&e.to_string()))?;
        let ctx = wsh_auth::validate(&params.token, &self.decoding_key).map_err(|e| e.to_string())?;
        self.bind_authenticated_link(link_id, ctx)
    }

    async fn control_authenticate_token(&self, link_id: LinkId, data: Value) -> Result<Value, String> {
        if !self.is_root {
            return Err(
                "authenticateToken proxying through a non-root router is not implemented; \
                 authenticate directly against the root"
                    .to_string(),
            );
        }
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Params {
            swap_token: String,
        }
        let params: Params =
            serde_json::from_value(data).map_err(|e| ErrorKind::Decode.format(&e.to_string()))?;
        let ctx = {
            let mut pending = self.pending_swap_tokens.lock().unwrap_or_else(|p| p.into_inner());
            pending
                .remove(&params.swap_token)
                .ok_or_else(|| "swap token not found or already used".to_string())?
        };
        self.bind_authenticated_link(link_id, ctx)
    }

    fn bind_authenticated_link(&self, link_id: LinkId, ctx: RpcContext) -> Result<Value, String> {
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        let record = inner
            .links
            .get(&link_id)
            .ok_or_else(|| "unknown link".to_string())?;
        if record.trust.is_trusted() {
            return Err("link is already trusted".to_string());
        }

        if ctx.is_router {
            if ctx.route_id.is_some() {
                return Err("a router-trusted link must not claim a routeId".to_string());
            }
            inner
                .links
                .get_mut(&link_id)
                .ok_or_else(|| "unknown link".to_string())?
                .trust = TrustState::TrustedRouter;
            Ok(serde_json::json!({ "routeId": Value::Null }))
        } else {
            let route_id = ctx
                .route_id
                .clone()
                .ok_or_else(|| "leaf RpcContext is missing routeId".to_string())?;
            inner
                .links
                .get_mut(&link_id)
                .ok_or_else(|| "unknown link".to_string())?
                .trust = TrustState::TrustedLeaf {
                source_route: route_id.clone(),
            };
            inner.route_map.insert(route_id.clone(), link_id);
            Ok(serde_json::json!({ "routeId": route_id }))
        }
    }

    fn control_route_announce(&self, link_id: LinkId, data: Value) -> Result<Value, String> {
        #[derive(Deserialize)]
        struct Params {
            source: String,
        }
        let params: Params =
            serde_json::from_value(data).map_err(|e| ErrorKind::Decode.format(&e.to_string()))?;
        if is_control_route(&params.source) {
            return Err("control routes are never announced".to_string());
        }

        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        match inner.links.get(&link_id).map(|r| &r.trust) {
            Some(TrustState::TrustedRouter) => {}
            Some(_) => return Err("route announce requires a trusted router link".to_string()),
            None => return Err("unknown link".to_string()),
        }
        inner.route_map.insert(params.source.clone(), link_id);
        drop(inner);
        self.queue_upstream_announce(params.source);
        Ok(Value::Null)
    }

    fn control_route_unannounce(&self, link_id: LinkId, data: Value) -> Result<Value, String> {
        #[derive(Deserialize)]
        struct Params {
            source: String,
        }
        let params: Params =
            serde_json::from_value(data).map_err(|e| ErrorKind::Decode.format(&e.to_string()))?;
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        if inner.route_map.get(&params.source) == Some(&link_id) {
            inner.route_map.remove(&params.source);
        }
        Ok(Value::Null)
    }

    fn control_set_peer_info(&self, link_id: LinkId, data: Value) -> Result<Value, String> {
        let label = data.as_str().unwrap_or_default().to_string();
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        inner.peer_info.insert(link_id, label);
        Ok(Value::Null)
    }

    fn queue_upstream_announce(&self, route: String) {
        if let Some(tx) = &self.announce_tx {
            let _ = tx.try_send(route);
        }
    }

    fn spawn_announce_drain(self: &Arc<Self>, mut rx: mpsc::Receiver<String>) {
        let router = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(route) = rx.recv().await {
                let sink = {
                    let inner = router.inner.lock().unwrap_or_else(|p| p.into_inner());
                    inner
                        .upstream_link_id
                        .and_then(|id| inner.links.get(&id).map(|r| Arc::clone(&r.sink)))
                };
                let Some(sink) = sink else {
                    tracing::debug!(route, "no upstream link yet; dropping route announcement");
                    continue;
                };
                let msg = RpcMessage::fire_and_forget(
                    "routeAnnounce",
                    Some(CONTROL_ROUTE.to_string()),
                    Some(serde_json::json!({ "source": route })),
                );
                if sink.send(msg).await.is_err() {
                    tracing::warn!(route, "failed to announce route upstream");
                }
            }
        });
    }

    #[cfg(test)]
    pub(crate) fn route_link(&self, route: &str) -> Option<LinkId> {
        let inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        inner.route_map.get(route).copied()
    }

    #[cfg(test)]
    pub(crate) fn trust_of(&self, link_id: LinkId) -> Option<TrustState> {
        let inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        inner.links.get(&link_id).map(|r| r.trust.clone())
    }
}
