//! One-shot completions for "the next ack" and "the next data payload".
//!
//! The source protocol multicasts events; waiting callers subscribe, take
//! the first occurrence, and unsubscribe. Modeled here as oneshot channels
//! registered per call and drained by the receive loop, so nothing
//! accumulates across waits.

use tokio::sync::oneshot;

#[derive(Debug, Default)]
pub(crate) struct Waiters {
    ack: Vec<oneshot::Sender<()>>,
    data: Vec<oneshot::Sender<Vec<u8>>>,
}

impl Waiters {
    pub fn register_ack(&mut self) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        self.ack.push(tx);
        rx
    }

    pub fn register_data(&mut self) -> oneshot::Receiver<Vec<u8>> {
        let (tx, rx) = oneshot::channel();
        self.data.push(tx);
        rx
    }

    /// Resolve every pending ack wait. A receiver dropped by a timed-out
    /// caller is skipped harmlessly.
    pub fn complete_ack(&mut self) {
        for tx in self.ack.drain(..) {
            let _ = tx.send(());
        }
    }

    /// Resolve every pending data wait with the same payload.
    pub fn complete_data(&mut self, payload: &[u8]) {
        for tx in self.data.drain(..) {
            let _ = tx.send(payload.to_vec());
        }
    }

    /// Drop all pending waits; their receivers observe a closed channel.
    pub fn abandon(&mut self) {
        self.ack.clear();
        self.data.clear();
    }
}
