use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::mpsc;
use wsh_protocol::RpcMessage;

/// Requests this endpoint originated and is still waiting on a response for,
/// keyed by the `reqId` it minted. Guarded by a plain [`Mutex`]: every
/// critical section here is a map lookup/insert/remove, never an `.await`
/// (mirrors the lock discipline the app-server's cancellation registry
/// uses — release the lock before doing anything that can suspend).
#[derive(Default)]
pub struct InFlightMap {
    inner: Mutex<HashMap<String, mpsc::Sender<RpcMessage>>>,
}

impl InFlightMap {
    pub fn register(&self, req_id: String, tx: mpsc::Sender<RpcMessage>) {
        let mut guard = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        guard.insert(req_id, tx);
    }

    pub fn remove(&self, req_id: &str) -> Option<mpsc::Sender<RpcMessage>> {
        let mut guard = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        guard.remove(req_id)
    }

    pub fn sender_for(&self, req_id: &str) -> Option<mpsc::Sender<RpcMessage>> {
        let guard = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        guard.get(req_id).cloned()
    }
}

/// Deliver one response frame to its waiting sender. Per §4.2, a full
/// response channel gets one retry after a one-second grace window; if it is
/// still full (or the receiver is gone) the frame is dropped.
pub async fn deliver(tx: &mpsc::Sender<RpcMessage>, msg: RpcMessage) -> bool {
    match tx.try_send(msg) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Closed(_)) => false,
        Err(mpsc::error::TrySendError::Full(msg)) => {
            tokio::time::sleep(std::time::Duration::from_secs(1)).await;
            tx.try_send(msg).is_ok()
        }
    }
}
