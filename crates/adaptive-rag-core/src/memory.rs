//! Session-scoped conversation memory.
//!
//! [`ConversationMemory`] is a fixed-capacity ring of turns; appending past
//! capacity evicts the oldest turn. [`SessionMemories`] owns one ring per
//! session id, each behind its own mutex, so appends to the same session are
//! serialized while different sessions never contend. The number of
//! sessions is bounded with least-recently-used eviction.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use dashmap::DashMap;

use crate::models::ConversationTurn;

/// Fixed-capacity ring of conversation turns, oldest first.
#[derive(Debug, Clone)]
pub struct ConversationMemory {
    turns: VecDeque<ConversationTurn>,
    capacity: usize,
}

impl ConversationMemory {
    pub fn new(capacity: usize) -> Self {
        Self {
            turns: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn append(&mut self, turn: ConversationTurn) {
        if self.capacity == 0 {
            return;
        }
        while self.turns.len() >= self.capacity {
            self.turns.pop_front();
        }
        self.turns.push_back(turn);
    }

    /// The last `max_turns` turns, oldest first.
    pub fn recent(&self, max_turns: usize) -> Vec<ConversationTurn> {
        let skip = self.turns.len().saturating_sub(max_turns);
        self.turns.iter().skip(skip).cloned().collect()
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

/// All sessions' memories, keyed by session id.
///
/// At most `max_sessions` sessions are kept; creating one more drops the
/// session that was used least recently.
pub struct SessionMemories {
    sessions: DashMap<String, Arc<Slot>>,
    capacity: usize,
    max_sessions: usize,
    clock: AtomicU64,
}

struct Slot {
    memory: Mutex<ConversationMemory>,
    last_used: AtomicU64,
}

impl Slot {
    fn lock(&self) -> MutexGuard<'_, ConversationMemory> {
        // A panic mid-append leaves the ring structurally valid.
        self.memory.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl SessionMemories {
    pub fn new(capacity: usize, max_sessions: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            capacity,
            max_sessions: max_sessions.max(1),
            clock: AtomicU64::new(0),
        }
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    fn session(&self, id: &str) -> Arc<Slot> {
        if let Some(slot) = self.sessions.get(id) {
            slot.last_used.store(self.tick(), Ordering::Relaxed);
            return Arc::clone(slot.value());
        }
        while self.sessions.len() >= self.max_sessions {
            if !self.evict_least_recent() {
                break;
            }
        }
        let entry = self.sessions.entry(id.to_string()).or_insert_with(|| {
            Arc::new(Slot {
                memory: Mutex::new(ConversationMemory::new(self.capacity)),
                last_used: AtomicU64::new(0),
            })
        });
        entry.last_used.store(self.tick(), Ordering::Relaxed);
        Arc::clone(entry.value())
    }

    fn evict_least_recent(&self) -> bool {
        let oldest = self
            .sessions
            .iter()
            .min_by_key(|slot| slot.last_used.load(Ordering::Relaxed))
            .map(|slot| slot.key().clone());
        match oldest {
            Some(id) => self.sessions.remove(&id).is_some(),
            None => false,
        }
    }

    pub fn append(&self, session: &str, turn: ConversationTurn) {
        self.session(session).lock().append(turn);
    }

    /// Append a user question and the assistant's answer as one unit.
    pub fn append_exchange(&self, session: &str, question: &str, answer: &str) {
        let slot = self.session(session);
        let mut guard = slot.lock();
        guard.append(ConversationTurn::user(question));
        guard.append(ConversationTurn::assistant(answer));
    }

    /// The last `max_turns` turns of `session`; empty for an unknown session.
    pub fn recent(&self, session: &str, max_turns: usize) -> Vec<ConversationTurn> {
        let slot = match self.sessions.get(session) {
            Some(slot) => Arc::clone(slot.value()),
            None => return Vec::new(),
        };
        let recent = slot.lock().recent(max_turns);
        recent
    }

    /// Every turn of `session`, oldest first.
    pub fn all(&self, session: &str) -> Vec<ConversationTurn> {
        self.recent(session, usize::MAX)
    }

    /// Number of sessions currently held.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Forget `session` entirely.
    pub fn clear(&self, session: &str) {
        self.sessions.remove(session);
    }

    /// Forget every session.
    pub fn clear_all(&self) {
        self.sessions.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;

    #[test]
    fn test_ring_evicts_oldest() {
        let mut m = ConversationMemory::new(3);
        for i in 0..5 {
            m.append(ConversationTurn::user(format!("q{}", i)));
        }
        let texts: Vec<_> = m.recent(10).into_iter().map(|t| t.text).collect();
        assert_eq!(texts, vec!["q2", "q3", "q4"]);
    }

    #[test]
    fn test_recent_limits_turns() {
        let mut m = ConversationMemory::new(10);
        for i in 0..6 {
            m.append(ConversationTurn::user(format!("q{}", i)));
        }
        let texts: Vec<_> = m.recent(2).into_iter().map(|t| t.text).collect();
        assert_eq!(texts, vec!["q4", "q5"]);
        assert!(m.recent(0).is_empty());
    }

    #[test]
    fn test_zero_capacity_keeps_nothing() {
        let mut m = ConversationMemory::new(0);
        m.append(ConversationTurn::user("q"));
        assert!(m.is_empty());
    }

    #[test]
    fn test_sessions_are_isolated() {
        let s = SessionMemories::new(10, 100);
        s.append_exchange("a", "hi", "hello");
        s.append("b", ConversationTurn::user("other"));
        let a = s.all("a");
        assert_eq!(a.len(), 2);
        assert_eq!(a[0].role, Role::User);
        assert_eq!(a[1].role, Role::Assistant);
        assert_eq!(s.all("b").len(), 1);
        assert!(s.all("missing").is_empty());
    }

    #[test]
    fn test_clear_all() {
        let s = SessionMemories::new(10, 100);
        s.append_exchange("a", "q", "a");
        s.append_exchange("b", "q", "a");
        s.clear_all();
        assert!(s.all("a").is_empty());
        assert!(s.all("b").is_empty());
        assert!(s.is_empty());
    }

    #[test]
    fn test_clear_drops_the_session() {
        let s = SessionMemories::new(10, 100);
        s.append_exchange("a", "q", "a");
        s.append_exchange("b", "q", "a");
        s.clear("a");
        assert_eq!(s.len(), 1);
        assert!(s.all("a").is_empty());
        assert_eq!(s.all("b").len(), 2);
    }

    #[test]
    fn test_session_count_is_bounded() {
        let s = SessionMemories::new(10, 3);
        for i in 0..50 {
            s.append_exchange(&format!("tab-{}", i), "q", "a");
        }
        assert_eq!(s.len(), 3);
        assert_eq!(s.all("tab-49").len(), 2);
        assert!(s.all("tab-0").is_empty());
    }

    #[test]
    fn test_least_recently_used_session_is_evicted() {
        let s = SessionMemories::new(10, 2);
        s.append_exchange("old", "q", "a");
        s.append_exchange("busy", "q", "a");
        s.append("old", ConversationTurn::user("still here"));
        s.append_exchange("new", "q", "a");
        assert_eq!(s.len(), 2);
        assert_eq!(s.all("old").len(), 3);
        assert!(s.all("busy").is_empty());
        assert_eq!(s.all("new").len(), 2);
    }

    #[test]
    fn test_concurrent_appends_are_not_lost() {
        let s = Arc::new(SessionMemories::new(1000, 100));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let s = Arc::clone(&s);
                std::thread::spawn(move || {
                    for i in 0..25 {
                        s.append_exchange("shared", &format!("q{}-{}", t, i), "a");
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let turns = s.all("shared");
        assert_eq!(turns.len(), 400);
        for pair in turns.chunks(2) {
            assert_eq!(pair[0].role, Role::User);
            assert_eq!(pair[1].role, Role::Assistant);
        }
    }
}
