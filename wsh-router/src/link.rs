use std::sync::Arc;

use async_trait::async_trait;
use wsh_protocol::RpcMessage;

/// Monotonic link identifier within one router; `0` is reserved and never
/// assigned to a real link (§3, `NoLinkId`).
pub type LinkId = u64;

pub const NO_LINK_ID: LinkId = 0;

#[derive(Debug, thiserror::Error)]
pub enum LinkSendError {
    #[error("link is closed")]
    Closed,
}

/// A duplex byte-stream handle to one peer, abstracted away from whatever
/// concrete transport carries it (stdio, websocket, OSC-over-PTY, or an
/// in-process channel in tests).
#[async_trait]
pub trait LinkSink: Send + Sync {
    async fn send(&self, msg: RpcMessage) -> Result<(), LinkSendError>;
}

/// What kind of peer is attached to a link, and the route it owns if it's a
/// trusted leaf. Fixed the moment a link is trusted (§9: "Transitions are
/// one-way").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrustState {
    Untrusted,
    TrustedLeaf { source_route: String },
    TrustedRouter,
}

impl TrustState {
    pub fn is_trusted(&self) -> bool {
        !matches!(self, TrustState::Untrusted)
    }
}

pub(crate) struct LinkRecord {
    pub(crate) trust: TrustState,
    pub(crate) sink: Arc<dyn LinkSink>,
}
