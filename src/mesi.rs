//! MESI cache-coherence controller.
//!
//! Grounded on `mesi.py`: `CacheControllerMESI`. Adds the Exclusive state to
//! MSI so a line with no other sharer skips the round trip through shared
//! state, including the silent E -> M upgrade on a write hit. Per spec
//! `4.2.2`, a BusRd snoop on an Exclusive line transitions to Shared without
//! flushing (only a Modified holder supplies data) — the one point where
//! this module's transition table deliberately departs from the Python
//! source, which flushed on Exclusive too.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::{Rc, Weak};

use log::debug;

use crate::bus::Bus;
use crate::cache::{CacheStore, Evicted, LineState};
use crate::commons::{CoreId, SystemSpec};
use crate::controller::{CacheController, CoreCounters};
use crate::message::{BusMessage, Message, Origin, SnoopResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MesiState {
    Invalid,
    Shared,
    Exclusive,
    Modified,
}

impl LineState for MesiState {
    const INVALID: Self = MesiState::Invalid;
}

pub struct MesiController {
    id: CoreId,
    cache: CacheStore<MesiState>,
    bus: Option<Weak<RefCell<Bus<Self>>>>,
    counters: CoreCounters,
    retired: bool,
}

impl MesiController {
    fn queue(&self, message: BusMessage) {
        if let Some(bus) = self.bus.as_ref().and_then(Weak::upgrade) {
            bus.borrow_mut().queue_message(message);
        }
    }

    fn writeback_if_dirty(&self, evicted: Option<Evicted<MesiState>>, outbox: &mut VecDeque<BusMessage>) {
        if let Some(line) = evicted {
            if line.state == MesiState::Modified {
                outbox.push_back(BusMessage::new(Message::BusWB, self.id, line.address, None));
            }
        }
    }
}

impl CacheController for MesiController {
    fn new(id: CoreId, specs: Rc<SystemSpec>) -> Self {
        Self {
            id,
            cache: CacheStore::new(specs),
            bus: None,
            counters: CoreCounters::default(),
            retired: false,
        }
    }

    fn attach_bus(&mut self, bus: Weak<RefCell<Bus<Self>>>) {
        self.bus = Some(bus);
    }

    fn id(&self) -> CoreId {
        self.id
    }

    fn counters(&self) -> &CoreCounters {
        &self.counters
    }

    fn is_retired(&self) -> bool {
        self.retired
    }

    fn set_retired(&mut self, retired: bool) {
        self.retired = retired;
    }

    fn prrd(&mut self, address: u64, callback: Box<dyn FnOnce()>) {
        let state = self.cache.get_state(address);
        debug!("core {}: prrd {address:#x} state={state:?}", self.id);
        match state {
            MesiState::Invalid => {
                // Private vs shared is only known once the bus reports
                // share_status back in receive_bus_message.
                debug!("core {}: miss", self.id);
                self.counters.miss_count += 1;
                self.queue(BusMessage::new(
                    Message::BusRd {
                        origin: Origin::FromRead,
                    },
                    self.id,
                    address,
                    Some(callback),
                ));
            }
            MesiState::Shared => {
                debug!("core {}: hit", self.id);
                self.counters.hit_count += 1;
                self.counters.shared_data_access_count += 1;
                callback();
            }
            MesiState::Exclusive | MesiState::Modified => {
                debug!("core {}: hit", self.id);
                self.counters.hit_count += 1;
                self.counters.private_data_access_count += 1;
                callback();
            }
        }
    }

    fn prwr(&mut self, address: u64, callback: Box<dyn FnOnce()>) {
        let state = self.cache.get_state(address);
        debug!("core {}: prwr {address:#x} state={state:?}", self.id);
        match state {
            MesiState::Invalid | MesiState::Shared => {
                debug!("core {}: miss", self.id);
                self.counters.miss_count += 1;
                self.counters.private_data_access_count += 1;
                self.queue(BusMessage::new(Message::BusRdX, self.id, address, Some(callback)));
            }
            MesiState::Exclusive => {
                // Silent upgrade: no bus traffic, the line is already the
                // sole valid copy.
                debug!("core {}: hit, silent upgrade to Modified", self.id);
                self.cache.set_state(address, MesiState::Modified);
                self.counters.hit_count += 1;
                self.counters.private_data_access_count += 1;
                callback();
            }
            MesiState::Modified => {
                debug!("core {}: hit", self.id);
                self.counters.hit_count += 1;
                self.counters.private_data_access_count += 1;
                callback();
            }
        }
    }

    fn receive_bus_message(
        &mut self,
        message: &BusMessage,
        outbox: &mut VecDeque<BusMessage>,
    ) -> Option<SnoopResult> {
        if message.sender == self.id {
            let evicted = match &message.message {
                Message::BusRd { .. } => {
                    let shared = message.share_status.get().unwrap_or(false);
                    let target = if shared { MesiState::Shared } else { MesiState::Exclusive };
                    if shared {
                        self.counters.shared_data_access_count += 1;
                    } else {
                        self.counters.private_data_access_count += 1;
                    }
                    self.cache.set_state(message.address, target)
                }
                Message::BusRdX => self.cache.set_state(message.address, MesiState::Modified),
                _ => return None,
            };
            debug!("core {}: completion on {:#x}", self.id, message.address);
            self.writeback_if_dirty(evicted, outbox);
            message.fire_completion();
            return None;
        }

        let mystate = self.cache.get_state(message.address);
        debug!(
            "core {}: snoop {:?} from core {} on {:#x}, mystate={mystate:?}",
            self.id, message.message, message.sender, message.address
        );
        match &message.message {
            Message::BusRd { .. } => match mystate {
                MesiState::Invalid => Some(SnoopResult {
                    flush: false,
                    shared: false,
                }),
                MesiState::Shared => Some(SnoopResult {
                    flush: false,
                    shared: true,
                }),
                MesiState::Exclusive => {
                    self.cache.set_state(message.address, MesiState::Shared);
                    Some(SnoopResult {
                        flush: false,
                        shared: true,
                    })
                }
                MesiState::Modified => {
                    self.cache.set_state(message.address, MesiState::Shared);
                    Some(SnoopResult {
                        flush: true,
                        shared: true,
                    })
                }
            },
            Message::BusRdX => match mystate {
                MesiState::Invalid | MesiState::Shared => {
                    self.cache.set_state(message.address, MesiState::Invalid);
                    None
                }
                MesiState::Exclusive | MesiState::Modified => {
                    self.cache.set_state(message.address, MesiState::Invalid);
                    Some(SnoopResult {
                        flush: true,
                        shared: false,
                    })
                }
            },
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn specs() -> Rc<SystemSpec> {
        Rc::new(SystemSpec {
            protocol: crate::commons::Protocol::Mesi,
            cache_size: 1024,
            block_size: 16,
            assoc: 1,
        })
    }

    #[test]
    fn completion_without_sharer_installs_exclusive() {
        let mut c = MesiController::new(0, specs());
        let msg = BusMessage::new(
            Message::BusRd {
                origin: Origin::FromRead,
            },
            0,
            0,
            Some(Box::new(|| {})),
        );
        msg.share_status.set(Some(false));
        let mut outbox = VecDeque::new();
        c.receive_bus_message(&msg, &mut outbox);
        assert_eq!(c.cache.get_state(0), MesiState::Exclusive);
        assert_eq!(c.counters().private_data_access_count, 1);
    }

    #[test]
    fn write_hit_on_exclusive_silently_upgrades_to_modified() {
        let mut c = MesiController::new(0, specs());
        let msg = BusMessage::new(
            Message::BusRd {
                origin: Origin::FromRead,
            },
            0,
            0,
            Some(Box::new(|| {})),
        );
        msg.share_status.set(Some(false));
        let mut outbox = VecDeque::new();
        c.receive_bus_message(&msg, &mut outbox);

        c.prwr(0, Box::new(|| {}));
        assert_eq!(c.cache.get_state(0), MesiState::Modified);
        assert!(outbox.is_empty());
        assert_eq!(c.counters().hit_count, 1);
    }

    #[test]
    fn snoop_busrd_on_exclusive_does_not_flush() {
        let mut c = MesiController::new(1, specs());
        let msg = BusMessage::new(
            Message::BusRd {
                origin: Origin::FromRead,
            },
            1,
            0,
            Some(Box::new(|| {})),
        );
        msg.share_status.set(Some(false));
        let mut outbox = VecDeque::new();
        c.receive_bus_message(&msg, &mut outbox);

        let snoop = BusMessage::new(
            Message::BusRd {
                origin: Origin::FromRead,
            },
            9,
            0,
            None,
        );
        let result = c.receive_bus_message(&snoop, &mut outbox);
        assert_eq!(
            result,
            Some(SnoopResult {
                flush: false,
                shared: true
            })
        );
        assert_eq!(c.cache.get_state(0), MesiState::Shared);
    }
}
