//! Device session module
//!
//! A session pairs one event source with one key ledger and drives the
//! ledger once per poll tick. Completed macro keys are handed to the
//! caller's token callback in FIFO order.

mod aggregator;

pub use aggregator::Aggregator;

use tokio::sync::broadcast;
use tracing::debug;

use crate::config::Settings;
use crate::events::DiagnosticEvent;
use crate::ledger::KeyLedger;
use crate::source::{EventSource, SourceError};

/// Consumer callback receiving (device name, macro-key token)
pub type TokenHandler<'a> = &'a mut dyn FnMut(&str, &str);

/// One input device: its event source plus its ledger
pub struct DeviceSession<S: EventSource> {
    name: String,
    source: S,
    ledger: KeyLedger,
    diag_tx: broadcast::Sender<DiagnosticEvent>,
}

impl<S: EventSource> DeviceSession<S> {
    pub fn new(
        name: impl Into<String>,
        source: S,
        diag_tx: broadcast::Sender<DiagnosticEvent>,
    ) -> Self {
        let name = name.into();
        let ledger = KeyLedger::new(name.clone(), diag_tx.clone());
        Self {
            name,
            source,
            ledger,
            diag_tx,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ledger(&self) -> &KeyLedger {
        &self.ledger
    }

    pub fn ledger_mut(&mut self) -> &mut KeyLedger {
        &mut self.ledger
    }

    /// Poll the source once and advance the ledger. `now` stands in for
    /// the timestamp of a tick-only marker.
    ///
    /// An empty read still feeds a single tick-only marker so the stale
    /// flush timer keeps running. When a flush happened and a handler was
    /// supplied, all completed tokens are drained through it; without a
    /// handler they stay queued for [`KeyLedger::pop_token`].
    pub fn poll(
        &mut self,
        settings: &Settings,
        now: f64,
        on_token: Option<TokenHandler<'_>>,
    ) -> Result<bool, SourceError> {
        let events = self.source.poll_events()?;

        let flushed = if events.is_empty() {
            self.ledger.update([None], now, settings)
        } else {
            self.ledger.update(events.into_iter().map(Some), now, settings)
        };

        if flushed {
            if let Some(handler) = on_token {
                loop {
                    let token = self.ledger.pop_token();
                    if token.is_empty() {
                        break;
                    }
                    let _ = self.diag_tx.send(DiagnosticEvent::MacroKeyReady {
                        device: self.name.clone(),
                        token: token.clone(),
                    });
                    handler(&self.name, &token);
                }
            }
        }

        Ok(flushed)
    }

    /// Discard anything queued on the source and start over with a fresh
    /// ledger. Used before a one-shot capture so stale buffered input
    /// cannot leak into the result.
    pub fn clear(&mut self) {
        if let Err(err) = self.source.poll_events() {
            debug!(device = %self.name, %err, "discarding queued events failed");
        }
        self.ledger = KeyLedger::new(self.name.clone(), self.diag_tx.clone());
    }
}
