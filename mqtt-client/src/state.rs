use mqtt_core::PacketId;

use crate::publish::PublishState;
use crate::subscription::SubscriptionState;

/// The mutable state a connected client must serialize access to: the QoS
/// in-flight tables and the subscription maps, plus the packet id counter
/// both draw from. A single mutex guards all of this rather than one lock
/// per table, so `Client` holds exactly one `Mutex<State>` and every
/// operation here takes `&mut self`.
#[derive(Default)]
pub struct State {
    next_id: u16,
    pub publish: PublishState,
    pub subscriptions: SubscriptionState,
}

impl State {
    /// Allocates the next unused packet id, starting at 1 and wrapping
    /// 65535 back to 1 (0 is reserved and never issued), skipping any id
    /// still live in a QoS table or a pending subscribe/unsubscribe
    /// request.
    pub fn next_packet_id(&mut self) -> PacketId {
        loop {
            let id = if self.next_id == 0 { 1 } else { self.next_id };
            self.next_id = if id == u16::MAX { 1 } else { id + 1 };

            if !self.publish.is_live(id) && !self.subscriptions.is_live(id) {
                return id;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publish::PendingPublish;

    #[test]
    fn skips_ids_live_in_any_table() {
        let mut state = State::default();
        let first = state.next_packet_id();
        state.publish.send_qos1.insert(
            first + 1,
            PendingPublish {
                topic: "a".into(),
                payload: vec![],
                retain: false,
            },
        );

        let second = state.next_packet_id();
        assert_ne!(second, first + 1);
    }

    #[test]
    fn never_issues_zero() {
        let mut state = State::default();
        state.next_id = u16::MAX;
        let a = state.next_packet_id();
        let b = state.next_packet_id();
        assert_eq!(a, u16::MAX);
        assert_eq!(b, 1);
    }
}
