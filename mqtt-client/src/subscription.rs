use std::collections::HashMap;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex};

use mqtt_core::{PacketId, QoS};

use crate::topic::matches;

/// A single application message delivered to a subscription, handed to the
/// caller through `Subscription::messages()`.
#[derive(Debug, Clone)]
pub struct Message {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
}

/// How a subscription's `Subscribe` request currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionStatus {
    Pending,
    Active(QoS),
    Rejected,
}

/// A subscription observer handle: drain `messages()` for Publish packets
/// matching `filter`. Cloning a `Subscription` yields another handle to the
/// exact same underlying channel and status cell, not a new one — this is
/// what a repeated `Client::subscribe` call for an already-tracked filter
/// hands back, since the broker already considers the filter subscribed.
#[derive(Clone)]
pub struct Subscription {
    pub filter: String,
    status: Arc<Mutex<SubscriptionStatus>>,
    rx: Arc<Receiver<Message>>,
}

impl Subscription {
    pub fn messages(&self) -> &Receiver<Message> {
        &self.rx
    }

    pub fn status(&self) -> SubscriptionStatus {
        *self.status.lock().unwrap()
    }
}

struct Entry {
    status: Arc<Mutex<SubscriptionStatus>>,
    sender: Sender<Message>,
    subscription: Subscription,
}

/// Tracks subscriptions by filter plus the `Subscribe`/`Unsubscribe`
/// requests awaiting a broker acknowledgement. Like `PublishState`, this
/// type does no locking of its own — it sits behind the same mutex that
/// guards the QoS tables.
#[derive(Default)]
pub struct SubscriptionState {
    active: HashMap<String, Entry>,
    /// mid -> filter requested in that Subscribe packet.
    pending_subscribe: HashMap<PacketId, String>,
    /// mid -> filter, so UnsubAck (which carries only a packet id) can be
    /// resolved back to the filter it removes.
    pending_unsubscribe: HashMap<PacketId, String>,
}

impl SubscriptionState {
    pub fn is_live(&self, id: PacketId) -> bool {
        self.pending_subscribe.contains_key(&id) || self.pending_unsubscribe.contains_key(&id)
    }

    pub fn status(&self, filter: &str) -> Option<SubscriptionStatus> {
        self.active.get(filter).map(|entry| *entry.status.lock().unwrap())
    }

    /// Returns the existing `Subscription` handle for a filter that's
    /// already tracked (active or pending), without writing another
    /// Subscribe packet — the idempotent path for a repeated `subscribe`
    /// call. Hands back the very same handle every time, not a fresh one.
    pub fn add_observer(&self, filter: &str) -> Option<Subscription> {
        self.active.get(filter).map(|entry| entry.subscription.clone())
    }

    /// Registers a brand-new pending subscribe request.
    pub fn begin_subscribe(&mut self, id: PacketId, filter: String) -> Subscription {
        let (tx, rx) = channel();
        let status = Arc::new(Mutex::new(SubscriptionStatus::Pending));
        let subscription = Subscription {
            filter: filter.clone(),
            status: status.clone(),
            rx: Arc::new(rx),
        };
        self.active.insert(
            filter.clone(),
            Entry {
                status,
                sender: tx,
                subscription: subscription.clone(),
            },
        );
        self.pending_subscribe.insert(id, filter);
        subscription
    }

    /// Applies a `SubscribeAck`'s return code to the pending request
    /// matching `id`, dropping the filter if the broker rejected it.
    pub fn confirm_subscribe(&mut self, id: PacketId, result: Option<QoS>) {
        let Some(filter) = self.pending_subscribe.remove(&id) else {
            return;
        };

        match result {
            Some(qos) => {
                if let Some(entry) = self.active.get(&filter) {
                    *entry.status.lock().unwrap() = SubscriptionStatus::Active(qos);
                }
            }
            None => {
                self.active.remove(&filter);
            }
        }
    }

    pub fn begin_unsubscribe(&mut self, id: PacketId, filter: String) {
        self.pending_unsubscribe.insert(id, filter);
    }

    /// Resolves a pending `Unsubscribe` request, returning the filter that
    /// was removed.
    pub fn confirm_unsubscribe(&mut self, id: PacketId) -> Option<String> {
        let filter = self.pending_unsubscribe.remove(&id)?;
        self.active.remove(&filter);
        Some(filter)
    }

    /// Fans a received `Publish` out to every subscription whose filter
    /// matches `topic`. A send failure just means the application dropped
    /// every `Subscription` handle for that filter; that isn't this
    /// state's problem.
    pub fn dispatch(&self, topic: &str, payload: &[u8], qos: QoS, retain: bool) {
        for (filter, entry) in self.active.iter() {
            if matches(filter, topic) {
                let _ = entry.sender.send(Message {
                    topic: topic.to_owned(),
                    payload: payload.to_vec(),
                    qos,
                    retain,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fans_out_to_matching_filters_only() {
        let mut state = SubscriptionState::default();
        let a = state.begin_subscribe(1, "sensors/+/temp".into());
        let b = state.begin_subscribe(2, "alerts/#".into());
        state.confirm_subscribe(1, Some(QoS::AtLeastOnce));
        state.confirm_subscribe(2, Some(QoS::AtMostOnce));

        state.dispatch("sensors/a/temp", b"21.5", QoS::AtLeastOnce, false);
        state.dispatch("alerts/fire", b"help", QoS::AtMostOnce, false);

        assert_eq!(a.messages().try_recv().unwrap().topic, "sensors/a/temp");
        assert_eq!(b.messages().try_recv().unwrap().topic, "alerts/fire");
        assert!(a.messages().try_recv().is_err());
    }

    #[test]
    fn rejected_filter_is_dropped() {
        let mut state = SubscriptionState::default();
        state.begin_subscribe(1, "a/b".into());
        state.confirm_subscribe(1, None);
        assert_eq!(state.status("a/b"), None);
    }

    #[test]
    fn repeated_subscribe_reuses_the_same_subscription() {
        let mut state = SubscriptionState::default();
        let first = state.begin_subscribe(1, "a/b".into());
        state.confirm_subscribe(1, Some(QoS::AtMostOnce));

        let second = state.add_observer("a/b").expect("already tracked");
        assert_eq!(second.status(), SubscriptionStatus::Active(QoS::AtMostOnce));

        state.dispatch("a/b", b"x", QoS::AtMostOnce, false);
        // Both handles share one channel: whichever drains first gets the
        // message, and the other then finds nothing left.
        assert!(second.messages().try_recv().is_ok());
        assert!(first.messages().try_recv().is_err());
    }

    #[test]
    fn unsubscribe_resolves_by_packet_id() {
        let mut state = SubscriptionState::default();
        state.begin_subscribe(1, "a/b".into());
        state.confirm_subscribe(1, Some(QoS::AtMostOnce));

        state.begin_unsubscribe(2, "a/b".into());
        assert_eq!(state.confirm_unsubscribe(2), Some("a/b".to_string()));
        assert_eq!(state.status("a/b"), None);
    }
}
