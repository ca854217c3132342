//! Bus message representation.
//!
//! The original passed around a dynamically-typed dict per message, with
//! fields like `from prwr` and `share status` added piecemeal depending on
//! protocol and path taken. Here that collapses into a tagged-sum `Message`
//! plus a `SnoopResult` struct filled in during fanout, per the redesign
//! flags: one shape per title instead of an unstructured bag of optional
//! keys.

use std::cell::{Cell, RefCell};

use crate::commons::CoreId;

/// Distinguishes a BusRd issued to service a read miss from one issued to
/// service a write miss (Dragon needs this to decide what the eventual
/// completion installs; MSI/MESI always take the `FromRead` shape since
/// they never issue BusRd from `prwr`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    FromRead,
    FromWrite,
}

#[derive(Debug)]
pub enum Message {
    BusRd { origin: Origin },
    BusRdX,
    /// `continuation` marks the second half of Dragon's two-phase write-miss
    /// sequence (the BusUpd issued after a BusRd came back shared), as
    /// opposed to a BusUpd issued directly from a PrWr hit on a shared line.
    BusUpd { continuation: bool },
    BusWB,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SnoopResult {
    pub flush: bool,
    pub shared: bool,
}

/// A message in flight on the bus.
///
/// `share_status` is filled in by the bus during fanout and read back by the
/// sender's own completion handling; it has no meaning before fanout runs.
/// `on_complete` is the one-shot continuation that resumes whatever queued
/// the message (a processor's stalled `prrd`/`prwr`, or nothing for BusWB).
pub struct BusMessage {
    pub message: Message,
    pub sender: CoreId,
    pub address: u64,
    pub share_status: Cell<Option<bool>>,
    on_complete: RefCell<Option<Box<dyn FnOnce()>>>,
}

impl BusMessage {
    pub fn new(
        message: Message,
        sender: CoreId,
        address: u64,
        on_complete: Option<Box<dyn FnOnce()>>,
    ) -> Self {
        Self {
            message,
            sender,
            address,
            share_status: Cell::new(None),
            on_complete: RefCell::new(on_complete),
        }
    }

    /// Takes the continuation out, leaving the message with none. Used to
    /// hand a callback off to a follow-up message (Dragon's BusRd -> BusUpd
    /// handoff).
    pub fn take_completion(&self) -> Option<Box<dyn FnOnce()>> {
        self.on_complete.borrow_mut().take()
    }

    pub fn fire_completion(&self) {
        if let Some(cb) = self.take_completion() {
            cb();
        }
    }
}
