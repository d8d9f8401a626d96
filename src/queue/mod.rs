//! In-memory request queue: at most one active request, a FIFO of the rest.
//!
//! Grounded in the prior implementation's `RequestQueue`
//! (`daemon/request_queue.py`): FIFO ordering, skip-to-tail, and
//! priority-jump-by-session are all taken from there verbatim, just
//! typed and made synchronous/mutex-friendly instead of GIL-protected.

use std::collections::{HashMap, VecDeque};

use crate::models::QueuedRequest;

const VISUAL_PALETTE: [&str; 5] = ["🟢", "🔵", "🟡", "🔴", "🟣"];

/// Result of [`RequestQueue::enqueue`]: where the request landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// The request became the active request immediately.
    Active,
    /// The request was appended to the FIFO at this 1-based position.
    Queued(usize),
}

/// One row of [`RequestQueue::summary`].
#[derive(Debug, Clone)]
pub struct QueueEntry<'a> {
    /// The underlying request.
    pub request: &'a QueuedRequest,
    /// 0 for the active request, 1-based FIFO position otherwise.
    pub position: usize,
    /// Whether this is the active request.
    pub is_active: bool,
    /// Deterministic visual identifier for the owning session.
    pub visual_id: &'static str,
    /// Seconds this request has been waiting.
    pub waiting_seconds: i64,
}

/// FIFO queue with at most one active slot, skip, and priority-jump.
#[derive(Debug, Default)]
pub struct RequestQueue {
    active: Option<QueuedRequest>,
    pending: VecDeque<QueuedRequest>,
    visuals: HashMap<String, &'static str>,
}

impl RequestQueue {
    /// An empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a request to the queue. If nothing is active, it becomes
    /// active immediately; otherwise it joins the FIFO tail.
    pub fn enqueue(&mut self, request: QueuedRequest) -> EnqueueOutcome {
        self.visual_id(&request.session);
        if self.active.is_none() {
            self.active = Some(request);
            EnqueueOutcome::Active
        } else {
            self.pending.push_back(request);
            EnqueueOutcome::Queued(self.pending.len())
        }
    }

    /// The current active request, if any.
    #[must_use]
    pub fn active(&self) -> Option<&QueuedRequest> {
        self.active.as_ref()
    }

    /// Mutable access to the current active request, if any.
    pub fn active_mut(&mut self) -> Option<&mut QueuedRequest> {
        self.active.as_mut()
    }

    /// Number of pending (not active) requests.
    #[must_use]
    pub fn size(&self) -> usize {
        self.pending.len()
    }

    /// Drop the active request and promote the FIFO head to active.
    pub fn advance(&mut self) -> Option<&QueuedRequest> {
        self.active = self.pending.pop_front();
        self.active.as_ref()
    }

    /// Move the active request to the FIFO tail and promote the head.
    /// No-op if the FIFO is empty.
    pub fn skip(&mut self) -> Option<&QueuedRequest> {
        let Some(mut current) = self.active.take() else {
            return None;
        };
        let Some(mut next) = self.pending.pop_front() else {
            self.active = Some(current);
            return self.active.as_ref();
        };
        current.clear_presentation();
        self.pending.push_back(current);
        next.clear_presentation();
        self.active = Some(next);
        self.active.as_ref()
    }

    /// Find the first pending request from `session`, make it active,
    /// and send the current active (if any) to the FIFO tail. Returns
    /// `None` without changing state if no pending request matches.
    pub fn priority_jump(&mut self, session: &str) -> Option<&QueuedRequest> {
        let position = self.pending.iter().position(|r| r.session == session)?;
        let mut target = self
            .pending
            .remove(position)
            .expect("position came from iter().position on the same deque");
        if let Some(mut previous_active) = self.active.take() {
            previous_active.clear_presentation();
            self.pending.push_back(previous_active);
        }
        target.clear_presentation();
        self.active = Some(target);
        self.active.as_ref()
    }

    /// Ordered `[active, pending…]` view with display metadata.
    #[must_use]
    pub fn summary(&self) -> Vec<QueueEntry<'_>> {
        let mut rows = Vec::with_capacity(1 + self.pending.len());
        if let Some(active) = &self.active {
            rows.push(QueueEntry {
                request: active,
                position: 0,
                is_active: true,
                visual_id: self.visuals.get(active.session.as_str()).copied().unwrap_or("⚪"),
                waiting_seconds: active.waiting_seconds(),
            });
        }
        for (idx, request) in self.pending.iter().enumerate() {
            rows.push(QueueEntry {
                request,
                position: idx + 1,
                is_active: false,
                visual_id: self
                    .visuals
                    .get(request.session.as_str())
                    .copied()
                    .unwrap_or("⚪"),
                waiting_seconds: request.waiting_seconds(),
            });
        }
        rows
    }

    /// Drain the active request and the entire FIFO, returning them so
    /// the caller can write a sentinel for each.
    pub fn clear(&mut self) -> Vec<QueuedRequest> {
        let mut drained = Vec::with_capacity(1 + self.pending.len());
        if let Some(active) = self.active.take() {
            drained.push(active);
        }
        drained.extend(self.pending.drain(..));
        drained
    }

    /// Deterministic visual identifier for a session, assigned on first sighting.
    pub fn visual_id(&mut self, session: &str) -> &'static str {
        *self.visuals.entry(session.to_owned()).or_insert_with(|| {
            let mut hasher = std::collections::hash_map::DefaultHasher::new();
            std::hash::Hash::hash(session, &mut hasher);
            let index = (std::hash::Hasher::finish(&hasher) as usize) % VISUAL_PALETTE.len();
            VISUAL_PALETTE[index]
        })
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::models::RequestKind;

    fn req(session: &str) -> QueuedRequest {
        QueuedRequest::new(session, RequestKind::Input, "prompt", PathBuf::from("/tmp/x"))
    }

    #[test]
    fn first_enqueue_becomes_active() {
        let mut queue = RequestQueue::new();
        assert_eq!(queue.enqueue(req("a")), EnqueueOutcome::Active);
        assert_eq!(queue.active().expect("active").session, "a");
    }

    #[test]
    fn second_enqueue_is_queued() {
        let mut queue = RequestQueue::new();
        queue.enqueue(req("a"));
        assert_eq!(queue.enqueue(req("b")), EnqueueOutcome::Queued(1));
        assert_eq!(queue.size(), 1);
    }

    #[test]
    fn active_present_iff_queue_nonempty() {
        let mut queue = RequestQueue::new();
        assert!(queue.active().is_none());
        queue.enqueue(req("a"));
        assert!(queue.active().is_some());
        queue.advance();
        assert!(queue.active().is_none());
    }

    #[test]
    fn enqueue_then_advance_drains_fifo_order() {
        let mut queue = RequestQueue::new();
        queue.enqueue(req("a"));
        queue.enqueue(req("b"));
        queue.enqueue(req("c"));
        assert_eq!(queue.active().expect("active").session, "a");
        queue.advance();
        assert_eq!(queue.active().expect("active").session, "b");
        queue.advance();
        assert_eq!(queue.active().expect("active").session, "c");
        queue.advance();
        assert!(queue.active().is_none());
    }

    #[test]
    fn skip_with_empty_fifo_is_a_no_op() {
        let mut queue = RequestQueue::new();
        queue.enqueue(req("a"));
        assert_eq!(queue.skip().expect("active unchanged").session, "a");
        assert_eq!(queue.size(), 0);
    }

    #[test]
    fn two_sessions_queue_then_skip_reactivates_original() {
        let mut queue = RequestQueue::new();
        queue.enqueue(req("a")); // active = a
        queue.enqueue(req("b")); // pending = [b]
        assert_eq!(queue.skip().expect("b active").session, "b");
        assert_eq!(queue.skip().expect("a active again").session, "a");
    }

    #[test]
    fn skip_cycles_through_all_items_in_n_steps() {
        let mut queue = RequestQueue::new();
        for name in ["a", "b", "c"] {
            queue.enqueue(req(name));
        }
        let original = queue.active().expect("active").session.clone();
        for _ in 0..3 {
            queue.skip();
        }
        assert_eq!(queue.active().expect("active").session, original);
    }

    #[test]
    fn priority_jump_with_no_pending_match_returns_none_and_does_not_mutate() {
        let mut queue = RequestQueue::new();
        queue.enqueue(req("a"));
        queue.enqueue(req("b"));
        assert!(queue.priority_jump("zzz").is_none());
        assert_eq!(queue.active().expect("active").session, "a");
        assert_eq!(queue.size(), 1);
    }

    #[test]
    fn priority_jump_finds_first_matching_pending_and_tails_previous_active() {
        // Enqueue A, B, A, C -> active=A, pending=[B, A, C].
        let mut queue = RequestQueue::new();
        queue.enqueue(req("a"));
        queue.enqueue(req("b"));
        queue.enqueue(req("a"));
        queue.enqueue(req("c"));

        let jumped = queue.priority_jump("a").expect("a pending entry exists");
        assert_eq!(jumped.session, "a");

        // New state: active=A', pending=[B, C, A].
        let summary = queue.summary();
        let pending_sessions: Vec<&str> = summary
            .iter()
            .skip(1)
            .map(|entry| entry.request.session.as_str())
            .collect();
        assert_eq!(pending_sessions, vec!["b", "c", "a"]);
    }

    #[test]
    fn priority_jump_then_second_jump_sends_prior_active_to_tail() {
        let mut queue = RequestQueue::new();
        queue.enqueue(req("s")); // active = s
        queue.enqueue(req("t")); // pending = [t]
        queue.priority_jump("t"); // active = t, pending = [s]
        queue.priority_jump("s"); // active = s, pending = [t]
        assert_eq!(queue.active().expect("active").session, "s");
        let summary = queue.summary();
        assert_eq!(summary[1].request.session, "t");
    }

    #[test]
    fn clear_drains_active_and_fifo() {
        let mut queue = RequestQueue::new();
        queue.enqueue(req("a"));
        queue.enqueue(req("b"));
        let drained = queue.clear();
        assert_eq!(drained.len(), 2);
        assert!(queue.active().is_none());
        assert_eq!(queue.size(), 0);
    }

    #[test]
    fn visual_id_is_stable_for_the_same_session() {
        let mut queue = RequestQueue::new();
        let first = queue.visual_id("a");
        let second = queue.visual_id("a");
        assert_eq!(first, second);
    }
}
