use std::collections::{HashMap, HashSet};

use mqtt_core::{PacketId, QoS};

/// An application message in flight, tracked in plain maps keyed by packet
/// id rather than a `Slab` — a client's in-flight set is small, unlike a
/// broker's much larger fan-out.
#[derive(Debug, Clone)]
pub struct PendingPublish {
    pub topic: String,
    pub payload: Vec<u8>,
    pub retain: bool,
}

/// Where a QoS 2 send currently sits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Qos2SendState {
    WaitingPubRec,
    WaitingPubComp,
}

/// The send- and receive-side QoS in-flight tables. Locking is the caller's
/// responsibility — these tables are meant to live behind a single mutex
/// alongside subscription state, so these methods never lock internally.
#[derive(Default)]
pub struct PublishState {
    /// QoS 1 sends awaiting PubAck.
    pub send_qos1: HashMap<PacketId, PendingPublish>,
    /// QoS 2 sends awaiting PubRec, then PubComp.
    pub send_qos2: HashMap<PacketId, (PendingPublish, Qos2SendState)>,
    /// QoS 2 receives that have been PubRec'd but not yet PubRel'd — guards
    /// against re-delivering a DUP retransmit to local observers.
    pub recv_qos2: HashSet<PacketId>,
}

impl PublishState {
    pub fn is_live(&self, id: PacketId) -> bool {
        self.send_qos1.contains_key(&id)
            || self.send_qos2.contains_key(&id)
            || self.recv_qos2.contains(&id)
    }

    /// Application messages whose delivery was in flight when the
    /// connection dropped, in send order, for DUP=1 retransmission on
    /// reconnect.
    pub fn drain_for_retransmit(&mut self) -> Vec<(PacketId, QoS, PendingPublish)> {
        let qos1 = self.send_qos1.drain().map(|(id, p)| (id, QoS::AtLeastOnce, p));
        let qos2 = self
            .send_qos2
            .drain()
            .map(|(id, (p, _))| (id, QoS::ExactlyOnce, p));

        let mut pending: Vec<_> = qos1.chain(qos2).collect();
        pending.sort_by_key(|(id, _, _)| *id);
        pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qos2_receive_is_not_live_after_release() {
        let mut state = PublishState::default();
        state.recv_qos2.insert(7);
        assert!(state.is_live(7));
        state.recv_qos2.remove(&7);
        assert!(!state.is_live(7));
    }
}
