//! Bounded, ordered history of a session.

use std::collections::VecDeque;

use supervisor_core::turns::ConversationTurn;

use crate::error::EngineError;

/// Keeps at most `capacity` turns, dropping the oldest first.
#[derive(Clone, Debug)]
pub struct ConversationWindow {
    turns: VecDeque<ConversationTurn>,
    capacity: usize,
}

impl ConversationWindow {
    pub fn new(capacity: usize) -> Result<Self, EngineError> {
        if capacity == 0 {
            return Err(EngineError::Configuration(
                "conversation window size must be at least 1".into(),
            ));
        }
        Ok(Self {
            turns: VecDeque::with_capacity(capacity),
            capacity,
        })
    }

    pub fn append(&mut self, turn: ConversationTurn) {
        self.turns.push_back(turn);
        while self.turns.len() > self.capacity {
            self.turns.pop_front();
        }
    }

    /// Bulk restore, subject to the same truncation as `append`.
    pub fn extend(&mut self, turns: impl IntoIterator<Item = ConversationTurn>) {
        for turn in turns {
            self.append(turn);
        }
    }

    /// Owned copy of the current turns, oldest first.
    pub fn snapshot(&self) -> Vec<ConversationTurn> {
        self.turns.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
