//! Bounded FIFO queues carrying [`Envelope`]s between stages, backed by `crossbeam-channel`.
//!
//! `push` is a blocking send (never drops, backpressures the producer), `collect` drains
//! everything currently available into the caller's buffer, falling back to one short blocking
//! wait when the channel was empty on first look so a stage's main loop can sleep instead of
//! busy-spinning.

use crate::envelope::Envelope;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

const DRAIN_WAIT: Duration = Duration::from_millis(1);

#[derive(Clone)]
pub struct QueueSender {
    tx: Sender<Envelope>,
}

impl QueueSender {
    /// Blocks while the queue is at capacity. Never drops an envelope.
    pub fn push(&self, env: Envelope) {
        // A closed receiver only happens once every consuming stage has already exited (e.g.
        // after propagating Quit); there is nothing further to deliver to, so drop silently.
        let _ = self.tx.send(env);
    }
}

pub struct QueueReceiver {
    rx: Receiver<Envelope>,
}

impl QueueReceiver {
    /// Drains everything immediately available into `dst`. If nothing was available, waits up to
    /// one millisecond for the first envelope before giving up, so callers can loop without
    /// busy-spinning.
    pub fn collect(&self, dst: &mut Vec<Envelope>) {
        let mut drained_any = false;
        while let Ok(env) = self.rx.try_recv() {
            dst.push(env);
            drained_any = true;
        }
        if drained_any {
            return;
        }
        match self.rx.recv_timeout(DRAIN_WAIT) {
            Ok(env) => {
                dst.push(env);
                while let Ok(env) = self.rx.try_recv() {
                    dst.push(env);
                }
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {}
        }
    }
}

/// A bounded queue's two halves, created together via [`connect`].
pub struct BoundedQueue;

impl BoundedQueue {
    /// Wires a new bounded queue of the given capacity between a producer and a consumer.
    pub fn connect(capacity: usize) -> (QueueSender, QueueReceiver) {
        let (tx, rx) = crossbeam_channel::bounded(capacity.max(1));
        (QueueSender { tx }, QueueReceiver { rx })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_then_collect_preserves_order() {
        let (tx, rx) = BoundedQueue::connect(8);
        for _ in 0..5 {
            tx.push(Envelope::quit());
        }
        let mut dst = Vec::new();
        rx.collect(&mut dst);
        assert_eq!(dst.len(), 5);
        assert!(dst.iter().all(Envelope::is_quit));
    }

    #[test]
    fn collect_on_empty_queue_returns_empty() {
        let (_tx, rx) = BoundedQueue::connect(1);
        let mut dst = Vec::new();
        rx.collect(&mut dst);
        assert!(dst.is_empty());
    }
}
