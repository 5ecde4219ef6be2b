//! Publish acknowledgement tracking
//!
//! The client reports a packet ID for every publish once it is written
//! (`PublishSent`), in submission order, and later the broker's PUBACK or
//! PUBCOMP for that ID. Publishes are submitted one at a time, so pairing
//! the n-th submission with the n-th `PublishSent` recovers the packet ID.
//! The two sides race: a `PublishSent` may be observed before the
//! submitting task registers, hence the two queues.

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;
use tokio::sync::oneshot;

/// Resolves once the broker acknowledged the publish (QoS 0: once it is sent)
pub(crate) type AckReceiver = oneshot::Receiver<()>;

#[derive(Default)]
struct Pending {
    /// Submitted publishes whose packet ID is not known yet
    awaiting_id: VecDeque<oneshot::Sender<()>>,
    /// Packet IDs reported before their submission registered
    unclaimed_ids: VecDeque<u16>,
    /// Publishes waiting for PUBACK / PUBCOMP
    inflight: HashMap<u16, oneshot::Sender<()>>,
}

impl Pending {
    fn bind(&mut self, pkid: u16, ack: oneshot::Sender<()>) {
        if pkid == 0 {
            // QoS 0: nothing further to wait for
            let _ = ack.send(());
        } else {
            self.inflight.insert(pkid, ack);
        }
    }
}

#[derive(Default)]
pub(crate) struct AckTracker {
    pending: Mutex<Pending>,
}

impl AckTracker {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Register a publish that was just handed to the client
    pub(crate) fn submitted(&self) -> AckReceiver {
        let (tx, rx) = oneshot::channel();
        let mut pending = self.pending.lock();
        match pending.unclaimed_ids.pop_front() {
            Some(pkid) => pending.bind(pkid, tx),
            None => pending.awaiting_id.push_back(tx),
        }
        rx
    }

    /// The client wrote the next publish with this packet ID
    pub(crate) fn sent(&self, pkid: u16) {
        let mut pending = self.pending.lock();
        match pending.awaiting_id.pop_front() {
            Some(tx) => pending.bind(pkid, tx),
            None => pending.unclaimed_ids.push_back(pkid),
        }
    }

    /// The broker acknowledged this packet ID
    pub(crate) fn acked(&self, pkid: u16) {
        if let Some(tx) = self.pending.lock().inflight.remove(&pkid) {
            let _ = tx.send(());
        }
    }

    /// Forget everything; outstanding receivers resolve with an error
    pub(crate) fn reset(&self) {
        let mut pending = self.pending.lock();
        pending.awaiting_id.clear();
        pending.unclaimed_ids.clear();
        pending.inflight.clear();
    }

    #[cfg(test)]
    fn inflight(&self) -> usize {
        self.pending.lock().inflight.len()
    }
}
