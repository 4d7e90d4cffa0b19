//! Multi-device aggregation
//!
//! Owns every device session and polls them once per tick in registration
//! order. Completed macro keys therefore come out ordered per device, and
//! cross-device ordering follows registration order, never timestamps.

use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::config::Settings;
use crate::events::{now_seconds, DiagnosticEvent};
use crate::source::EventSource;

use super::{DeviceSession, TokenHandler};

struct SessionSlot<S: EventSource> {
    session: DeviceSession<S>,
    /// A faulted session is kept (so registration order stays stable) but
    /// never polled again.
    faulted: bool,
}

/// Registration-ordered set of device sessions
pub struct Aggregator<S: EventSource> {
    slots: Vec<SessionSlot<S>>,
    diag_tx: broadcast::Sender<DiagnosticEvent>,
}

impl<S: EventSource> Aggregator<S> {
    pub fn new(diag_tx: broadcast::Sender<DiagnosticEvent>) -> Self {
        Self {
            slots: Vec::new(),
            diag_tx,
        }
    }

    pub fn register(&mut self, session: DeviceSession<S>) {
        info!(device = %session.name(), "registered device session");
        self.slots.push(SessionSlot {
            session,
            faulted: false,
        });
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn faulted_count(&self) -> usize {
        self.slots.iter().filter(|s| s.faulted).count()
    }

    fn active_count(&self) -> usize {
        self.slots.iter().filter(|s| !s.faulted).count()
    }

    /// Poll every live session once, in registration order. A session
    /// whose source fails is marked faulted and skipped from then on; the
    /// rest keep running. Returns whether any session flushed.
    pub fn poll_all(
        &mut self,
        settings: &Settings,
        on_token: Option<TokenHandler<'_>>,
    ) -> bool {
        self.poll_all_at(settings, now_seconds(), on_token)
    }

    /// [`Aggregator::poll_all`] with an explicit tick timestamp
    pub fn poll_all_at(
        &mut self,
        settings: &Settings,
        now: f64,
        mut on_token: Option<TokenHandler<'_>>,
    ) -> bool {
        let mut flushed = false;

        for slot in &mut self.slots {
            if slot.faulted {
                continue;
            }

            // Fresh reborrow per session so one handler serves them all.
            let handler: Option<TokenHandler<'_>> = match on_token {
                Some(ref mut h) => Some(*h),
                None => None,
            };

            match slot.session.poll(settings, now, handler) {
                Ok(f) => flushed |= f,
                Err(err) => {
                    warn!(
                        device = %slot.session.name(),
                        %err,
                        "device source fault, session excluded from polling"
                    );
                    slot.faulted = true;
                    let _ = self.diag_tx.send(DiagnosticEvent::DeviceFault {
                        device: slot.session.name().to_string(),
                        detail: err.to_string(),
                    });
                }
            }
        }

        flushed
    }

    /// Pop every completed token from every session, registration order
    /// per device
    pub fn drain_all(&mut self) -> Vec<String> {
        let mut tokens = Vec::new();
        for slot in &mut self.slots {
            loop {
                let token = slot.session.ledger_mut().pop_token();
                if token.is_empty() {
                    break;
                }
                tokens.push(token);
            }
        }
        tokens
    }

    /// Clear every session's ledger and queued source events
    pub fn clear_all(&mut self) {
        for slot in &mut self.slots {
            slot.session.clear();
        }
    }

    /// Block until the next macro key completes on any device and return
    /// its token. Clears all sessions first so stale buffered input cannot
    /// be returned. Yields `None` only when no live session remains.
    pub async fn capture_next(&mut self, settings: &Settings) -> Option<String> {
        self.clear_all();

        loop {
            if self.active_count() == 0 {
                return None;
            }

            if self.poll_all(settings, None) {
                if let Some(token) = self.drain_all().into_iter().next() {
                    return Some(token);
                }
            }

            tokio::time::sleep(Duration::from_secs_f64(settings.loop_delay)).await;
        }
    }
}
