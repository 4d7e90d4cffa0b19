//! Event sources
//!
//! An event source produces batches of raw key transitions for one device.
//! Reads are non-blocking: a poll with nothing queued returns an empty
//! batch, and the caller still ticks its ledger so timers advance.

mod evdev;
mod scripted;

pub use self::evdev::EvdevSource;
pub use scripted::ScriptedSource;

use crate::events::KeyTransition;

/// Errors raised by an event source
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("failed to open input device {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to grab input device {path} for exclusive access: {source}")]
    Grab {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read input device: {0}")]
    Read(#[from] std::io::Error),

    #[error("input device disconnected")]
    Disconnected,
}

/// Non-blocking producer of key transitions for a single device
pub trait EventSource {
    /// Read all currently queued transitions. May return an empty batch;
    /// must never block waiting for input.
    fn poll_events(&mut self) -> Result<Vec<KeyTransition>, SourceError>;
}
