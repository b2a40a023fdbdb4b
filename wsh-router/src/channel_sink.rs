use async_trait::async_trait;
use tokio::sync::mpsc;
use wsh_protocol::RpcMessage;

use crate::link::LinkSendError;
use crate::link::LinkSink;

/// A [`LinkSink`] backed by a bounded `tokio::mpsc` channel. Used to wire a
/// link up to an in-process RPC endpoint or to another [`crate::Router`]
/// without involving a real transport.
pub struct ChannelSink {
    tx: mpsc::Sender<RpcMessage>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<RpcMessage>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl LinkSink for ChannelSink {
    async fn send(&self, msg: RpcMessage) -> Result<(), LinkSendError> {
        self.tx.send(msg).await.map_err(|_| LinkSendError::Closed)
    }
}
