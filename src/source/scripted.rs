//! Scripted event source
//!
//! Deterministic source that replays pre-built batches of transitions, one
//! batch per poll. Used by the test suite and by anything that wants to
//! replay a recorded session through the ledgers.

use std::collections::VecDeque;

use crate::events::KeyTransition;

use super::{EventSource, SourceError};

/// Event source replaying queued batches of transitions
pub struct ScriptedSource {
    batches: VecDeque<Vec<KeyTransition>>,
    /// Simulate a device disconnect once the script runs out
    fail_when_empty: bool,
}

impl ScriptedSource {
    pub fn new(batches: Vec<Vec<KeyTransition>>) -> Self {
        Self {
            batches: batches.into(),
            fail_when_empty: false,
        }
    }

    /// A source whose polls fail after the scripted batches are exhausted
    pub fn failing_after(batches: Vec<Vec<KeyTransition>>) -> Self {
        Self {
            batches: batches.into(),
            fail_when_empty: true,
        }
    }

    /// Queue another batch at the end of the script
    pub fn push_batch(&mut self, batch: Vec<KeyTransition>) {
        self.batches.push_back(batch);
    }
}

impl EventSource for ScriptedSource {
    fn poll_events(&mut self) -> Result<Vec<KeyTransition>, SourceError> {
        match self.batches.pop_front() {
            Some(batch) => Ok(batch),
            None if self.fail_when_empty => Err(SourceError::Disconnected),
            None => Ok(Vec::new()),
        }
    }
}
