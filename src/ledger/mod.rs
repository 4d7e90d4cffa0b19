//! Key ledger module
//!
//! The per-device state machine that turns raw key transitions into
//! completed macro-key histories:
//! - Rising: new key(s) just went down
//! - Falling: key(s) just went up, the peak gets recorded
//! - Holding: keys remain down, nothing changed
//! - Stale: nothing down; long enough idle flushes the pending history

mod machine;
mod token;

pub use machine::{KeyLedger, LedgerState};
pub use token::{Chord, ChordHistory};
