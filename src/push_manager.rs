//! Out-of-band delivery of pub/sub pushes and `MONITOR` lines (§4.3, §4.4).
//! Adapted from the teacher's `PushManager`, minus the RESP3 `Value::Push`
//! variant (out of scope per §1): here a push is any `Value::Bulk` reply
//! whose leading element matches one of the six pub/sub shapes, detected via
//! `Value::as_pubsub_kind`.

use arc_swap::ArcSwap;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::types::{PubSubKind, Value};

/// One delivered push message.
#[derive(Debug, Clone)]
pub struct PushInfo {
    pub kind: PubSubKind,
    pub data: Vec<Value>,
}

/// Broadcasts pub/sub pushes (and raw `MONITOR` lines) to whichever listener
/// is currently registered. Cloning a `PushManager` shares the same
/// destination; `replace_sender` atomically swaps it, so a reconnect can
/// hand a fresh channel to a long-lived handle without the caller losing its
/// reference.
#[derive(Clone, Default)]
pub struct PushManager {
    sender: Arc<ArcSwap<Option<mpsc::UnboundedSender<PushInfo>>>>,
}

impl PushManager {
    pub fn new(sender: Option<mpsc::UnboundedSender<PushInfo>>) -> Self {
        PushManager {
            sender: Arc::new(ArcSwap::new(Arc::new(sender))),
        }
    }

    /// Inspects a decoded reply; if it is a pub/sub push, delivers it and
    /// returns `true` (the caller should not treat it as completing an
    /// in-flight command, except for the subscribe/unsubscribe confirmations
    /// per §4.3).
    pub fn try_deliver(&self, value: &Value) -> Option<PubSubKind> {
        let kind = value.as_pubsub_kind()?;
        let Value::Bulk(data) = value else {
            return None;
        };
        let guard = self.sender.load();
        if let Some(sender) = guard.as_ref() {
            let info = PushInfo {
                kind,
                data: data.clone(),
            };
            if sender.send(info).is_err() {
                self.sender.compare_and_swap(guard, Arc::new(None));
            }
        }
        Some(kind)
    }

    pub fn replace_sender(&self, sender: mpsc::UnboundedSender<PushInfo>) {
        self.sender.store(Arc::new(Some(sender)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(channel: &str, payload: &str) -> Value {
        Value::Bulk(vec![
            Value::Data(b"message".to_vec()),
            Value::Data(channel.as_bytes().to_vec()),
            Value::Data(payload.as_bytes().to_vec()),
        ])
    }

    #[test]
    fn delivers_message_push_to_registered_sender() {
        let mgr = PushManager::new(None);
        let (tx, mut rx) = mpsc::unbounded_channel();
        mgr.replace_sender(tx);

        let kind = mgr.try_deliver(&message("ch1", "hello"));
        assert_eq!(kind, Some(PubSubKind::Message));
        let info = rx.try_recv().unwrap();
        assert_eq!(info.kind, PubSubKind::Message);
    }

    #[test]
    fn non_pubsub_value_is_not_a_push() {
        let mgr = PushManager::new(None);
        assert_eq!(mgr.try_deliver(&Value::Int(1)), None);
    }

    #[test]
    fn dropped_receiver_is_tolerated_on_next_send() {
        let mgr = PushManager::new(None);
        let (tx, rx) = mpsc::unbounded_channel();
        mgr.replace_sender(tx);
        drop(rx);
        // Should not panic even though nobody is listening any more.
        mgr.try_deliver(&message("ch1", "x"));
        mgr.try_deliver(&message("ch1", "y"));
    }
}
