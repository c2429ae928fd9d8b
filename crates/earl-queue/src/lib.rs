use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};
use earl_core::ThreadId;

/// One user turn waiting to be dispatched to a thread's session.
#[derive(Debug, Clone, PartialEq)]
pub struct UserMessage {
    pub text: String,
    pub sender: String,
    pub posted_at: DateTime<Utc>,
}

impl UserMessage {
    pub fn new(text: impl Into<String>, sender: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            sender: sender.into(),
            posted_at: Utc::now(),
        }
    }
}

/// Per-thread FIFO queue with a claim/release protocol guaranteeing at most
/// one in-flight worker per thread (§4.4).
///
/// `queues` and `processing_threads` are each a mutable collection mutated
/// only through this narrow API — callers never reach in directly.
#[derive(Default)]
pub struct Queue {
    queues: DashMap<ThreadId, VecDeque<UserMessage>>,
    processing_threads: DashSet<ThreadId>,
}

impl Queue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically insert `thread_id` into the processing set if absent.
    /// Returns `true` iff this call performed the insertion.
    pub fn try_claim(&self, thread_id: &ThreadId) -> bool {
        self.processing_threads.insert(thread_id.clone())
    }

    /// Append `msg` to the thread's queue. The caller must not also claim.
    pub fn enqueue_behind(&self, thread_id: &ThreadId, msg: UserMessage) {
        self.queues
            .entry(thread_id.clone())
            .or_default()
            .push_back(msg);
    }

    /// Pop the front message for `thread_id`, if any. Drops the queue entry
    /// entirely once it empties, to avoid leaking empty deques.
    pub fn pop_next(&self, thread_id: &ThreadId) -> Option<UserMessage> {
        let mut entry = self.queues.get_mut(thread_id)?;
        let msg = entry.pop_front();
        let is_empty = entry.is_empty();
        drop(entry);
        if is_empty {
            self.queues.remove(thread_id);
        }
        msg
    }

    /// Remove `thread_id` from the processing set.
    pub fn release(&self, thread_id: &ThreadId) {
        self.processing_threads.remove(thread_id);
    }

    pub fn is_processing(&self, thread_id: &ThreadId) -> bool {
        self.processing_threads.contains(thread_id)
    }

    pub fn queue_len(&self, thread_id: &ThreadId) -> usize {
        self.queues.get(thread_id).map(|q| q.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tid(s: &str) -> ThreadId {
        ThreadId::from(s)
    }

    #[test]
    fn first_claim_succeeds_second_fails() {
        let q = Queue::new();
        let t = tid("t1");
        assert!(q.try_claim(&t));
        assert!(!q.try_claim(&t));
    }

    #[test]
    fn release_allows_reclaim() {
        let q = Queue::new();
        let t = tid("t1");
        assert!(q.try_claim(&t));
        q.release(&t);
        assert!(q.try_claim(&t));
    }

    #[test]
    fn pop_next_empty_is_none() {
        let q = Queue::new();
        assert!(q.pop_next(&tid("missing")).is_none());
    }

    #[test]
    fn fifo_order_preserved() {
        let q = Queue::new();
        let t = tid("t1");
        q.enqueue_behind(&t, UserMessage::new("first", "alice"));
        q.enqueue_behind(&t, UserMessage::new("second", "alice"));
        assert_eq!(q.pop_next(&t).unwrap().text, "first");
        assert_eq!(q.pop_next(&t).unwrap().text, "second");
        assert!(q.pop_next(&t).is_none());
    }

    #[test]
    fn queue_entry_removed_once_drained() {
        let q = Queue::new();
        let t = tid("t1");
        q.enqueue_behind(&t, UserMessage::new("only", "bob"));
        assert_eq!(q.queue_len(&t), 1);
        q.pop_next(&t);
        assert_eq!(q.queue_len(&t), 0);
        assert!(!q.queues.contains_key(&t));
    }

    #[test]
    fn independent_threads_do_not_interfere() {
        let q = Queue::new();
        let a = tid("a");
        let b = tid("b");
        assert!(q.try_claim(&a));
        assert!(q.try_claim(&b));
        q.enqueue_behind(&a, UserMessage::new("for a", "x"));
        assert_eq!(q.queue_len(&b), 0);
    }
}
