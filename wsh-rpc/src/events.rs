use std::collections::HashMap;
use std::sync::Mutex;

use serde_json::Value;
use tokio::sync::mpsc;

/// Channel depth for one subscriber's event queue. Events are notifications,
/// not RPC traffic; a slow subscriber loses the oldest-pending event rather
/// than blocking the publisher.
const SUBSCRIBER_CHANNEL_DEPTH: usize = 32;

/// The subscriber table behind `eventrecv`: §4.2 routes inbound frames whose
/// `command` is `eventrecv` straight here instead of through handler dispatch,
/// keyed by event name rather than by `reqId`.
#[derive(Default)]
pub struct EventListener {
    subscribers: Mutex<HashMap<String, Vec<mpsc::Sender<Value>>>>,
}

impl EventListener {
    /// Register interest in `event`. Every call gets its own receiver; an
    /// event published under this name is cloned out to each of them.
    pub fn subscribe(&self, event: impl Into<String>) -> mpsc::Receiver<Value> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CHANNEL_DEPTH);
        let mut guard = self.subscribers.lock().unwrap_or_else(|p| p.into_inner());
        guard.entry(event.into()).or_default().push(tx);
        rx
    }

    /// Deliver `data` to every live subscriber of `event`. A subscriber whose
    /// receiver has been dropped is pruned; a subscriber that is merely full
    /// just misses this one event rather than being dropped.
    pub fn publish(&self, event: &str, data: Value) {
        let mut guard = self.subscribers.lock().unwrap_or_else(|p| p.into_inner());
        let Some(subs) = guard.get_mut(event) else {
            return;
        };
        subs.retain(|tx| !matches!(tx.try_send(data.clone()), Err(mpsc::error::TrySendError::Closed(_))));
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn published_event_reaches_a_subscriber() {
        let listener = EventListener::default();
        let mut rx = listener.subscribe("route-gone");

        listener.publish("route-gone", serde_json::json!({ "routeId": "conn:1" }));

        let received = rx.recv().await.unwrap();
        assert_eq!(received, serde_json::json!({ "routeId": "conn:1" }));
    }

    #[tokio::test]
    async fn two_subscribers_of_the_same_event_both_receive_it() {
        let listener = EventListener::default();
        let mut a = listener.subscribe("tick");
        let mut b = listener.subscribe("tick");

        listener.publish("tick", serde_json::json!(1));

        assert_eq!(a.recv().await.unwrap(), serde_json::json!(1));
        assert_eq!(b.recv().await.unwrap(), serde_json::json!(1));
    }

    #[test]
    fn publish_with_no_subscribers_is_a_no_op() {
        let listener = EventListener::default();
        listener.publish("nobody-listening", serde_json::json!(null));
    }

    #[tokio::test]
    async fn a_dropped_subscriber_is_pruned_on_next_publish() {
        let listener = EventListener::default();
        {
            let _rx = listener.subscribe("tick");
        }
        listener.publish("tick", serde_json::json!(1));
        assert_eq!(listener.subscribers.lock().unwrap().get("tick").map(Vec::len), Some(0));
    }
}
