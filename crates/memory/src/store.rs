use std::collections::VecDeque;

use chrono::{DateTime, Utc};

use crate::schema::ConversationTurn;

/// Bounded, append-only history for one user.  Once `capacity` is reached
/// every push evicts the oldest turn.
#[derive(Debug)]
pub struct HistoryStore {
    turns: VecDeque<ConversationTurn>,
    capacity: usize,
}

impl HistoryStore {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            turns: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a turn, returning how many old turns were evicted.
    pub fn push(&mut self, turn: ConversationTurn) -> usize {
        self.turns.push_back(turn);
        let mut evicted = 0;
        while self.turns.len() > self.capacity {
            self.turns.pop_front();
            evicted += 1;
        }
        evicted
    }

    /// The last `limit` turns in append order.
    pub fn recent(&self, limit: usize) -> Vec<ConversationTurn> {
        let skip = self.turns.len().saturating_sub(limit);
        self.turns.iter().skip(skip).cloned().collect()
    }

    pub fn as_slice(&mut self) -> &[ConversationTurn] {
        self.turns.make_contiguous()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConversationTurn> {
        self.turns.iter()
    }

    #[cfg(test)]
    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut ConversationTurn> {
        self.turns.iter_mut()
    }

    pub fn retain<F>(&mut self, mut keep: F) -> usize
    where
        F: FnMut(&ConversationTurn) -> bool,
    {
        let before = self.turns.len();
        self.turns.retain(|turn| keep(turn));
        before.saturating_sub(self.turns.len())
    }

    pub fn count_since(&self, since: DateTime<Utc>) -> usize {
        self.turns.iter().filter(|turn| turn.timestamp >= since).count()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}
