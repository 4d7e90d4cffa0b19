//! Chord and history values
//!
//! The ledger builds macro keys out of structured values and only
//! serializes them to the `+`/`-`-joined token string at the consumer
//! boundary, so a key identifier containing a delimiter can never corrupt
//! parsing on our side.

use serde::{Deserialize, Serialize};

/// Suffix appended to a chord that was held past the hold threshold
pub const HELD_SUFFIX: &str = "+HELD";

/// Delimiter between keys inside one chord
pub const KEY_DELIMITER: &str = "+";

/// Delimiter between chords in a sequence
pub const CHORD_DELIMITER: &str = "-";

/// A set of keys that peaked together
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chord {
    /// Keys in the chord; already ordered by the ledger (sorted in
    /// combination mode, press order in sequence mode)
    pub keys: Vec<String>,
    /// Whether the chord was held past the hold threshold before release
    pub held: bool,
}

impl Chord {
    pub fn new(keys: Vec<String>, held: bool) -> Self {
        Self { keys, held }
    }

    /// Serialize to the token form, e.g. "KEY_A+KEY_B+HELD"
    pub fn token(&self) -> String {
        let mut token = self.keys.join(KEY_DELIMITER);
        if self.held {
            token.push_str(HELD_SUFFIX);
        }
        token
    }
}

/// One completed macro key: a timed sequence of chords
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChordHistory {
    pub chords: Vec<Chord>,
}

impl ChordHistory {
    pub fn is_empty(&self) -> bool {
        self.chords.is_empty()
    }

    pub fn push(&mut self, chord: Chord) {
        self.chords.push(chord);
    }

    /// Serialize to the token form, e.g. "KEY_A-KEY_B+KEY_C"
    pub fn token(&self) -> String {
        self.chords
            .iter()
            .map(Chord::token)
            .collect::<Vec<_>>()
            .join(CHORD_DELIMITER)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(names: &[&str]) -> Vec<String> {
        names.iter().map(|k| k.to_string()).collect()
    }

    #[test]
    fn test_single_key_token() {
        let chord = Chord::new(keys(&["KEY_A"]), false);
        assert_eq!(chord.token(), "KEY_A");
    }

    #[test]
    fn test_multi_key_token() {
        let chord = Chord::new(keys(&["KEY_A", "KEY_B"]), false);
        assert_eq!(chord.token(), "KEY_A+KEY_B");
    }

    #[test]
    fn test_held_suffix() {
        let chord = Chord::new(keys(&["KEY_ENTER"]), true);
        assert_eq!(chord.token(), "KEY_ENTER+HELD");
    }

    #[test]
    fn test_history_token_joins_chords() {
        let mut history = ChordHistory::default();
        history.push(Chord::new(keys(&["KEY_A"]), false));
        history.push(Chord::new(keys(&["KEY_B", "KEY_C"]), true));
        assert_eq!(history.token(), "KEY_A-KEY_B+KEY_C+HELD");
    }

    #[test]
    fn test_empty_history_token() {
        let history = ChordHistory::default();
        assert!(history.is_empty());
        assert_eq!(history.token(), "");
    }
}
