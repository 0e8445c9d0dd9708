//! The event-emitter / long-poll coupling from the source, made an explicit
//! primitive: a per-speaker one-shot waiter plus a single-slot pending-decision
//! map. Both live behind the engine's coarse lock, so `take_pending` and
//! `register` always happen in the same critical section — that's what closes
//! the lost-wakeup window between a tick's decision and a request's arrival.

use std::collections::{HashMap, VecDeque};

use tokio::sync::oneshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Decided,
    TimedOut,
}

#[derive(Debug, Default)]
pub struct Rendezvous {
    waiters: HashMap<String, VecDeque<(u64, oneshot::Sender<()>)>>,
    pending: HashMap<String, ()>,
    next_id: u64,
}

impl Rendezvous {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consumes the pending decision for `speaker_id`, if any. At most one
    /// caller ever observes `true` for a given pending entry.
    pub fn take_pending(&mut self, speaker_id: &str) -> bool {
        self.pending.remove(speaker_id).is_some()
    }

    /// Retains a respond verdict for later consumption because no waiter was
    /// registered for it at decision time.
    pub fn mark_pending(&mut self, speaker_id: &str) {
        self.pending.insert(speaker_id.to_string(), ());
    }

    /// Registers a fresh waiter. Callers must have already checked
    /// `take_pending` under the same lock acquisition.
    pub fn register(&mut self, speaker_id: &str) -> (u64, oneshot::Receiver<()>) {
        let id = self.next_id;
        self.next_id += 1;
        let (tx, rx) = oneshot::channel();
        self.waiters.entry(speaker_id.to_string()).or_default().push_back((id, tx));
        (id, rx)
    }

    /// Removes a specific waiter by its registration id, e.g. after its
    /// timeout elapses. A no-op if it was already woken or never existed.
    pub fn deregister(&mut self, speaker_id: &str, id: u64) {
        if let Some(queue) = self.waiters.get_mut(speaker_id) {
            queue.retain(|(existing_id, _)| *existing_id != id);
            if queue.is_empty() {
                self.waiters.remove(speaker_id);
            }
        }
    }

    /// Wakes the oldest still-live waiter for `speaker_id`. Returns `false`
    /// if none is registered, in which case the caller should `mark_pending`.
    pub fn wake_one(&mut self, speaker_id: &str) -> bool {
        if let Some(queue) = self.waiters.get_mut(speaker_id) {
            while let Some((_, sender)) = queue.pop_front() {
                if sender.send(()).is_ok() {
                    if queue.is_empty() {
                        self.waiters.remove(speaker_id);
                    }
                    return true;
                }
            }
            self.waiters.remove(speaker_id);
        }
        false
    }

    pub fn clear(&mut self) {
        self.waiters.clear();
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_decision_is_consumed_at_most_once() {
        let mut rendezvous = Rendezvous::new();
        rendezvous.mark_pending("alice");
        assert!(rendezvous.take_pending("alice"));
        assert!(!rendezvous.take_pending("alice"));
    }

    #[test]
    fn wake_one_only_affects_its_own_target() {
        let mut rendezvous = Rendezvous::new();
        let (_id_a, mut rx_alice) = rendezvous.register("alice");
        let (_id_b, mut rx_bob) = rendezvous.register("bob");

        assert!(rendezvous.wake_one("alice"));
        assert!(rx_alice.try_recv().is_ok());
        assert!(rx_bob.try_recv().is_err());
    }

    #[test]
    fn wake_one_with_no_waiter_returns_false() {
        let mut rendezvous = Rendezvous::new();
        assert!(!rendezvous.wake_one("nobody"));
    }

    #[test]
    fn deregister_removes_only_the_named_waiter() {
        let mut rendezvous = Rendezvous::new();
        let (id_a, _rx_a) = rendezvous.register("alice");
        let (_id_b, mut rx_b) = rendezvous.register("alice");

        rendezvous.deregister("alice", id_a);
        assert!(rendezvous.wake_one("alice"));
        assert!(rx_b.try_recv().is_ok());
    }

    #[test]
    fn clear_drops_all_waiters_and_pending() {
        let mut rendezvous = Rendezvous::new();
        rendezvous.mark_pending("alice");
        let (_id, _rx) = rendezvous.register("bob");
        rendezvous.clear();
        assert!(!rendezvous.take_pending("alice"));
        assert!(!rendezvous.wake_one("bob"));
    }
}
