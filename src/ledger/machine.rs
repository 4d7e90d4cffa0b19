//! Per-device key ledger
//!
//! Tracks which keys are down on one device, detects rising and falling
//! edges, classifies held chords, and assembles chord histories that flush
//! into completed macro keys after the device has gone idle.

use std::collections::VecDeque;

use tokio::sync::broadcast;
use tracing::{debug, trace, warn};

use crate::config::{MultiKeyMode, Settings};
use crate::events::{now_seconds, DiagnosticEvent, KeyEdge, KeyTransition};

use super::token::{Chord, ChordHistory};

/// The four possible states of a ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerState {
    /// New key(s) just went down
    Rising,
    /// Key(s) just went up
    Falling,
    /// Keys remain down, nothing changed
    Holding,
    /// No keys down, nothing changed
    Stale,
}

impl std::fmt::Display for LedgerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LedgerState::Rising => write!(f, "Rising"),
            LedgerState::Falling => write!(f, "Falling"),
            LedgerState::Holding => write!(f, "Holding"),
            LedgerState::Stale => write!(f, "Stale"),
        }
    }
}

/// State machine tracking key activity on a single device
pub struct KeyLedger {
    /// Name of the ledger, used in logs and diagnostics
    name: String,
    /// Current state
    state: LedgerState,
    /// When the current state was entered, in seconds
    state_changed_at: f64,
    /// Whether the current down-set has not yet been recorded as a chord
    peaking: bool,
    /// Keys currently down, ordered per the multi-key mode
    down_keys: Vec<String>,
    /// The macro key under construction
    pending: ChordHistory,
    /// Finished histories waiting for the consumer, oldest first
    completed: VecDeque<ChordHistory>,
    /// Side channel for anomaly diagnostics
    diag_tx: broadcast::Sender<DiagnosticEvent>,
}

impl KeyLedger {
    pub fn new(name: impl Into<String>, diag_tx: broadcast::Sender<DiagnosticEvent>) -> Self {
        Self {
            name: name.into(),
            state: LedgerState::Stale,
            state_changed_at: now_seconds(),
            peaking: false,
            down_keys: Vec::new(),
            pending: ChordHistory::default(),
            completed: VecDeque::new(),
            diag_tx,
        }
    }

    pub fn state(&self) -> LedgerState {
        self.state
    }

    /// When the current state was entered, in seconds
    pub fn state_changed_at(&self) -> f64 {
        self.state_changed_at
    }

    pub fn is_peaking(&self) -> bool {
        self.peaking
    }

    pub fn down_keys(&self) -> &[String] {
        &self.down_keys
    }

    /// The macro key currently under construction
    pub fn pending(&self) -> &ChordHistory {
        &self.pending
    }

    /// Number of completed histories waiting to be popped
    pub fn completed_len(&self) -> usize {
        self.completed.len()
    }

    /// Feed a batch of events (or tick-only markers) through the state
    /// machine, strictly in order. Returns whether any history flushed.
    ///
    /// `now` stands in for the timestamp of tick-only markers; `settings`
    /// is a per-call snapshot so a hot-reload between ticks applies cleanly
    /// on the next update.
    pub fn update<I>(&mut self, events: I, now: f64, settings: &Settings) -> bool
    where
        I: IntoIterator<Item = Option<KeyTransition>>,
    {
        let mut flushed = false;

        for event in events {
            let timestamp = event.as_ref().map(|e| e.timestamp).unwrap_or(now);

            // Classify the event into a fresh down key or a lost down key.
            let mut new_key = None;
            let mut lost_key = None;
            if let Some(transition) = event {
                match transition.edge {
                    KeyEdge::Down | KeyEdge::Repeat => {
                        if !self.down_keys.contains(&transition.key) {
                            new_key = Some(transition.key);
                        }
                    }
                    KeyEdge::Up => {
                        if self.down_keys.contains(&transition.key) {
                            lost_key = Some(transition.key);
                        } else {
                            warn!(
                                ledger = %self.name,
                                key = %transition.key,
                                "untracked key released"
                            );
                            let _ = self.diag_tx.send(DiagnosticEvent::UntrackedRelease {
                                device: self.name.clone(),
                                key: transition.key,
                                timestamp,
                            });
                        }
                    }
                }
            }

            if let Some(key) = new_key {
                // Rising edge: the peak is growing.
                trace!(ledger = %self.name, key = %key, "rising");
                self.down_keys.push(key);
                self.peaking = true;

                if settings.multi_key_mode == MultiKeyMode::Combination {
                    // Re-sort on every addition so press order never leaks
                    // into the chord token.
                    self.down_keys.sort();
                }

                self.state_change(LedgerState::Rising, timestamp);
            } else if let Some(key) = lost_key {
                // Falling edge: record the peak before shrinking it. The
                // held check reads the duration of the state we are leaving.
                trace!(ledger = %self.name, key = %key, "falling");
                if self.peaking {
                    let held = self.state_duration(timestamp) > settings.hold_threshold;
                    self.add_history_entry(held);
                    self.peaking = false;
                }

                self.down_keys.retain(|k| *k != key);
                self.state_change(LedgerState::Falling, timestamp);
            } else if !self.down_keys.is_empty() {
                self.state_change(LedgerState::Holding, timestamp);
            } else {
                self.state_change(LedgerState::Stale, timestamp);

                if self.state_duration(timestamp) > settings.flush_timeout
                    && !self.pending.is_empty()
                {
                    self.flush_history();
                    flushed = true;
                }
            }
        }

        flushed
    }

    /// Pop the oldest completed history, if any
    pub fn pop_chords(&mut self) -> Option<ChordHistory> {
        self.completed.pop_front()
    }

    /// Pop the oldest completed history as a token string, empty if none
    pub fn pop_token(&mut self) -> String {
        self.pop_chords().map(|h| h.token()).unwrap_or_default()
    }

    /// Record the current down-set into the pending history
    fn add_history_entry(&mut self, held: bool) {
        let chord = Chord::new(self.down_keys.clone(), held);
        debug!(ledger = %self.name, chord = %chord.token(), "recorded chord");
        self.pending.push(chord);
    }

    /// Move the pending history into the completed queue
    fn flush_history(&mut self) {
        let history = std::mem::take(&mut self.pending);
        debug!(ledger = %self.name, token = %history.token(), "flushed history");
        self.completed.push_back(history);
    }

    fn state_change(&mut self, new_state: LedgerState, timestamp: f64) {
        if self.state != new_state {
            trace!(
                ledger = %self.name,
                from = %self.state,
                to = %new_state,
                timestamp,
                "state change"
            );
            self.state = new_state;
            self.state_changed_at = timestamp;
        }
    }

    fn state_duration(&self, timestamp: f64) -> f64 {
        timestamp - self.state_changed_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> Settings {
        Settings {
            multi_key_mode: MultiKeyMode::Combination,
            hold_threshold: 1.0,
            flush_timeout: 0.5,
            loop_delay: 0.0167,
        }
    }

    fn sequence_settings() -> Settings {
        Settings {
            multi_key_mode: MultiKeyMode::Sequence,
            ..settings()
        }
    }

    fn create_ledger() -> (KeyLedger, broadcast::Receiver<DiagnosticEvent>) {
        let (tx, rx) = broadcast::channel(16);
        (KeyLedger::new("test", tx), rx)
    }

    fn down(key: &str, t: f64) -> Option<KeyTransition> {
        Some(KeyTransition::new(key, KeyEdge::Down, t))
    }

    fn repeat(key: &str, t: f64) -> Option<KeyTransition> {
        Some(KeyTransition::new(key, KeyEdge::Repeat, t))
    }

    fn up(key: &str, t: f64) -> Option<KeyTransition> {
        Some(KeyTransition::new(key, KeyEdge::Up, t))
    }

    #[test]
    fn test_initial_state() {
        let (ledger, _rx) = create_ledger();
        assert_eq!(ledger.state(), LedgerState::Stale);
        assert!(ledger.down_keys().is_empty());
        assert!(!ledger.is_peaking());
        assert!(ledger.pending().is_empty());
    }

    #[test]
    fn test_press_and_release_records_one_chord() {
        let (mut ledger, _rx) = create_ledger();
        let s = settings();

        assert!(!ledger.update([down("KEY_A", 1.0)], 1.0, &s));
        assert_eq!(ledger.state(), LedgerState::Rising);
        assert!(ledger.is_peaking());
        assert_eq!(ledger.down_keys(), ["KEY_A"]);

        assert!(!ledger.update([up("KEY_A", 1.1)], 1.1, &s));
        assert_eq!(ledger.state(), LedgerState::Falling);
        assert!(!ledger.is_peaking());
        assert!(ledger.down_keys().is_empty());
        assert_eq!(ledger.pending().chords.len(), 1);
        assert_eq!(ledger.pending().token(), "KEY_A");
    }

    #[test]
    fn test_flush_after_stale_timeout() {
        let (mut ledger, _rx) = create_ledger();
        let s = settings();

        ledger.update([down("KEY_A", 1.0), up("KEY_A", 1.1)], 1.1, &s);
        // First stale tick starts the idle clock, the next one passes it.
        assert!(!ledger.update([None], 1.2, &s));
        assert!(ledger.update([None], 1.8, &s));

        assert_eq!(ledger.pop_token(), "KEY_A");
        assert_eq!(ledger.pop_token(), "");
        assert!(ledger.pending().is_empty());
    }

    #[test]
    fn test_no_flush_before_timeout() {
        let (mut ledger, _rx) = create_ledger();
        let s = settings();

        ledger.update([down("KEY_A", 1.0), up("KEY_A", 1.1)], 1.1, &s);
        assert!(!ledger.update([None], 1.2, &s));
        assert!(!ledger.update([None], 1.6, &s));
        assert_eq!(ledger.completed_len(), 0);
    }

    #[test]
    fn test_new_press_cancels_pending_flush() {
        let (mut ledger, _rx) = create_ledger();
        let s = settings();

        ledger.update([down("KEY_A", 1.0), up("KEY_A", 1.1)], 1.1, &s);
        ledger.update([None], 1.2, &s);
        // Second press arrives inside the flush window.
        ledger.update([down("KEY_B", 1.4), up("KEY_B", 1.5)], 1.5, &s);
        ledger.update([None], 1.6, &s);
        assert!(ledger.update([None], 2.2, &s));

        // One combined history, not two flushes.
        assert_eq!(ledger.pop_token(), "KEY_A-KEY_B");
        assert_eq!(ledger.pop_token(), "");
    }

    #[test]
    fn test_combination_mode_is_order_independent() {
        let s = settings();

        let (mut first, _rx1) = create_ledger();
        first.update(
            [
                down("KEY_A", 1.0),
                down("KEY_B", 1.1),
                up("KEY_A", 1.2),
                up("KEY_B", 1.3),
            ],
            1.3,
            &s,
        );

        let (mut second, _rx2) = create_ledger();
        second.update(
            [
                down("KEY_B", 1.0),
                down("KEY_A", 1.1),
                up("KEY_B", 1.2),
                up("KEY_A", 1.3),
            ],
            1.3,
            &s,
        );

        assert_eq!(first.pending().token(), "KEY_A+KEY_B");
        assert_eq!(second.pending().token(), "KEY_A+KEY_B");
    }

    #[test]
    fn test_sequence_mode_preserves_press_order() {
        let s = sequence_settings();

        let (mut ledger, _rx) = create_ledger();
        ledger.update(
            [
                down("KEY_B", 1.0),
                down("KEY_A", 1.1),
                up("KEY_B", 1.2),
                up("KEY_A", 1.3),
            ],
            1.3,
            &s,
        );

        assert_eq!(ledger.pending().token(), "KEY_B+KEY_A");
    }

    #[test]
    fn test_one_chord_per_cycle_with_staggered_release() {
        let (mut ledger, _rx) = create_ledger();
        let s = settings();

        ledger.update([down("KEY_A", 1.0), down("KEY_B", 1.1)], 1.1, &s);
        // First release records the full peak, second one only shrinks it.
        ledger.update([up("KEY_A", 1.2)], 1.2, &s);
        assert_eq!(ledger.pending().chords.len(), 1);
        ledger.update([up("KEY_B", 1.3)], 1.3, &s);
        assert_eq!(ledger.pending().chords.len(), 1);
        assert_eq!(ledger.pending().token(), "KEY_A+KEY_B");
    }

    #[test]
    fn test_held_suffix_past_threshold() {
        let (mut ledger, _rx) = create_ledger();
        let s = settings();

        ledger.update([down("KEY_A", 1.0)], 1.0, &s);
        ledger.update([up("KEY_A", 2.5)], 2.5, &s);
        assert_eq!(ledger.pending().token(), "KEY_A+HELD");
    }

    #[test]
    fn test_no_held_suffix_at_threshold() {
        let (mut ledger, _rx) = create_ledger();
        let s = settings();

        ledger.update([down("KEY_A", 1.0)], 1.0, &s);
        ledger.update([up("KEY_A", 2.0)], 2.0, &s);
        assert_eq!(ledger.pending().token(), "KEY_A");
    }

    #[test]
    fn test_held_measures_latest_state_not_total_span() {
        let (mut ledger, _rx) = create_ledger();
        let s = Settings {
            hold_threshold: 0.4,
            ..settings()
        };

        // Total press span is 0.8s, but the second press re-enters Rising
        // at 1.5s, so only 0.3s counts at the release.
        ledger.update([down("KEY_A", 1.0)], 1.0, &s);
        ledger.update([None], 1.3, &s);
        ledger.update([down("KEY_B", 1.5)], 1.5, &s);
        ledger.update([up("KEY_B", 1.8)], 1.8, &s);

        assert_eq!(ledger.pending().token(), "KEY_A+KEY_B");
    }

    #[test]
    fn test_repeat_is_not_a_new_edge() {
        let (mut ledger, _rx) = create_ledger();
        let s = settings();

        ledger.update([down("KEY_A", 1.0)], 1.0, &s);
        ledger.update([repeat("KEY_A", 1.2)], 1.2, &s);
        assert_eq!(ledger.down_keys(), ["KEY_A"]);
        assert_eq!(ledger.state(), LedgerState::Holding);

        ledger.update([up("KEY_A", 1.3)], 1.3, &s);
        assert_eq!(ledger.pending().chords.len(), 1);
    }

    #[test]
    fn test_untracked_release_is_reported_not_fatal() {
        let (mut ledger, mut rx) = create_ledger();
        let s = settings();

        ledger.update([down("KEY_A", 1.0)], 1.0, &s);
        ledger.update([up("KEY_B", 1.1)], 1.1, &s);

        // Bookkeeping untouched, diagnostic emitted.
        assert_eq!(ledger.down_keys(), ["KEY_A"]);
        assert_eq!(ledger.state(), LedgerState::Holding);
        let diag = rx.try_recv().unwrap();
        assert!(matches!(
            diag,
            DiagnosticEvent::UntrackedRelease { ref key, .. } if key == "KEY_B"
        ));
    }

    #[test]
    fn test_stale_tick_is_idempotent() {
        let (mut ledger, _rx) = create_ledger();
        let s = settings();

        ledger.update([down("KEY_A", 1.0), up("KEY_A", 1.1)], 1.1, &s);
        ledger.update([None], 1.2, &s);
        ledger.update([None], 1.8, &s);
        assert_eq!(ledger.pop_token(), "KEY_A");

        // Stale, nothing pending: further ticks change nothing.
        let stamp = ledger.state_changed_at();
        assert!(!ledger.update([None], 5.0, &s));
        assert_eq!(ledger.state(), LedgerState::Stale);
        assert_eq!(ledger.state_changed_at(), stamp);
        assert_eq!(ledger.completed_len(), 0);
    }

    #[test]
    fn test_chord_count_matches_cycles() {
        let (mut ledger, _rx) = create_ledger();
        let s = settings();

        for (i, key) in ["KEY_A", "KEY_B", "KEY_C"].iter().enumerate() {
            let t = 1.0 + i as f64 * 0.2;
            ledger.update([down(key, t), up(key, t + 0.1)], t + 0.1, &s);
        }

        assert_eq!(ledger.pending().chords.len(), 3);
        ledger.update([None], 1.6, &s);
        ledger.update([None], 2.5, &s);
        assert_eq!(ledger.pop_token(), "KEY_A-KEY_B-KEY_C");
    }

    #[test]
    fn test_settings_snapshot_applies_on_next_update() {
        let (mut ledger, _rx) = create_ledger();

        // First chord under sequence mode keeps press order.
        let seq = sequence_settings();
        ledger.update(
            [
                down("KEY_B", 1.0),
                down("KEY_A", 1.1),
                up("KEY_A", 1.2),
                up("KEY_B", 1.3),
            ],
            1.3,
            &seq,
        );
        assert_eq!(ledger.pending().token(), "KEY_B+KEY_A");

        // Hot-reload mid-flight: combination mode plus a shorter flush
        // timeout govern the very next update.
        let combo = Settings {
            flush_timeout: 0.1,
            ..settings()
        };
        ledger.update(
            [
                down("KEY_D", 1.4),
                down("KEY_C", 1.5),
                up("KEY_C", 1.6),
                up("KEY_D", 1.7),
            ],
            1.7,
            &combo,
        );
        assert_eq!(ledger.pending().token(), "KEY_B+KEY_A-KEY_C+KEY_D");

        // 0.2s of idle flushes under the new timeout; the old 0.5s one
        // would still be waiting.
        ledger.update([None], 1.8, &combo);
        assert!(ledger.update([None], 2.0, &combo));
        assert_eq!(ledger.pop_token(), "KEY_B+KEY_A-KEY_C+KEY_D");
    }

    #[test]
    fn test_completed_queue_is_fifo() {
        let (mut ledger, _rx) = create_ledger();
        let s = settings();

        ledger.update([down("KEY_A", 1.0), up("KEY_A", 1.1)], 1.1, &s);
        ledger.update([None], 1.2, &s);
        ledger.update([None], 2.0, &s);
        ledger.update([down("KEY_B", 2.1), up("KEY_B", 2.2)], 2.2, &s);
        ledger.update([None], 2.3, &s);
        ledger.update([None], 3.0, &s);

        assert_eq!(ledger.pop_token(), "KEY_A");
        assert_eq!(ledger.pop_token(), "KEY_B");
        assert_eq!(ledger.pop_token(), "");
    }
}
