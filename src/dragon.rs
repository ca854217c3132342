//! Dragon (4-state, update-based) cache-coherence controller.
//!
//! Grounded on `dragon.py`: `CacheControllerDragon`. Unlike MSI/MESI, a
//! write to a shared line never invalidates other copies — it broadcasts a
//! `BusUpd` so every sharer updates in place. A write miss is therefore a
//! two-phase affair: a `BusRd` first (to fetch the block and discover
//! whether anyone else holds it), followed, only if so, by a `BusUpd` to
//! announce the write. That follow-on message is handed the original
//! processor callback (taken out of the `BusRd`) rather than invoking it
//! early, per spec `4.2.3`.

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
pub enum DragonState {
    Invalid,
    Exclusive,
    SharedClean,
    SharedModified,
    Modified,
}

impl LineState for DragonState {
    const INVALID: Self = DragonState::Invalid;
}

pub struct DragonController {
    id: CoreId,
    cache: CacheStore<DragonState>,
    bus: Option<Weak<RefCell<Bus<Self>>>>,
    counters: CoreCounters,
    retired: bool,
}

impl DragonController {
    fn queue(&self, message: BusMessage) {
        if let Some(bus) = self.bus.as_ref().and_then(Weak::upgrade) {
            bus.borrow_mut().queue_message(message);
        }
    }

    fn writeback_if_dirty(&self, evicted: Option<Evicted<DragonState>>, outbox: &mut VecDeque<BusMessage>) {
        if let Some(line) = evicted {
            if matches!(line.state, DragonState::Modified | DragonState::SharedModified) {
                outbox.push_back(BusMessage::new(Message::BusWB, self.id, line.address, None));
            }
        }
    }
}

impl CacheController for DragonController {
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
            DragonState::Invalid => {
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
            DragonState::SharedClean | DragonState::SharedModified => {
                debug!("core {}: hit", self.id);
                self.counters.hit_count += 1;
                self.counters.shared_data_access_count += 1;
                callback();
            }
            DragonState::Exclusive | DragonState::Modified => {
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
            DragonState::Invalid => {
                debug!("core {}: miss", self.id);
                self.counters.miss_count += 1;
                self.queue(BusMessage::new(
                    Message::BusRd {
                        origin: Origin::FromWrite,
                    },
                    self.id,
                    address,
                    Some(callback),
                ));
            }
            DragonState::SharedClean | DragonState::SharedModified => {
                // Final state (Sm or M) and private/shared classification
                // are resolved once the BusUpd's share_status comes back.
                debug!("core {}: hit, issuing BusUpd", self.id);
                self.counters.hit_count += 1;
                self.queue(BusMessage::new(
                    Message::BusUpd { continuation: false },
                    self.id,
                    address,
                    Some(callback),
                ));
            }
            DragonState::Exclusive => {
                debug!("core {}: hit, state:Modified", self.id);
                self.cache.set_state(address, DragonState::Modified);
                self.counters.hit_count += 1;
                self.counters.private_data_access_count += 1;
                callback();
            }
            DragonState::Modified => {
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
            match &message.message {
                Message::BusRd { origin: Origin::FromRead } => {
                    let shared = message.share_status.get().unwrap_or(false);
                    let target = if shared {
                        DragonState::SharedClean
                    } else {
                        DragonState::Exclusive
                    };
                    if shared {
                        self.counters.shared_data_access_count += 1;
                    } else {
                        self.counters.private_data_access_count += 1;
                    }
                    debug!("core {}: completion, state:{target:?}", self.id);
                    let evicted = self.cache.set_state(message.address, target);
                    self.writeback_if_dirty(evicted, outbox);
                    message.fire_completion();
                }
                Message::BusRd { origin: Origin::FromWrite } => {
                    if message.share_status.get().unwrap_or(false) {
                        // Someone else holds the block: a follow-on BusUpd
                        // is required before the write is visible. The
                        // block is not installed yet, so the processor
                        // stays stalled and the callback moves with it.
                        debug!("core {}: completion shared, issuing follow-on BusUpd", self.id);
                        let callback = message.take_completion();
                        outbox.push_back(BusMessage::new(
                            Message::BusUpd { continuation: true },
                            self.id,
                            message.address,
                            callback,
                        ));
                    } else {
                        debug!("core {}: completion, state:Modified", self.id);
                        self.counters.private_data_access_count += 1;
                        let evicted = self.cache.set_state(message.address, DragonState::Modified);
                        self.writeback_if_dirty(evicted, outbox);
                        message.fire_completion();
                    }
                }
                Message::BusUpd { continuation: true } => {
                    debug!("core {}: completion, state:SharedModified", self.id);
                    self.counters.shared_data_access_count += 1;
                    let evicted = self.cache.set_state(message.address, DragonState::SharedModified);
                    self.writeback_if_dirty(evicted, outbox);
                    message.fire_completion();
                }
                Message::BusUpd { continuation: false } => {
                    let shared = message.share_status.get().unwrap_or(false);
                    let target = if shared {
                        self.counters.shared_data_access_count += 1;
                        DragonState::SharedModified
                    } else {
                        self.counters.private_data_access_count += 1;
                        DragonState::Modified
                    };
                    debug!("core {}: completion, state:{target:?}", self.id);
                    let evicted = self.cache.set_state(message.address, target);
                    self.writeback_if_dirty(evicted, outbox);
                    message.fire_completion();
                }
                Message::BusWB => {}
            }
            return None;
        }

        let mystate = self.cache.get_state(message.address);
        debug!(
            "core {}: snoop {:?} from core {} on {:#x}, mystate={mystate:?}",
            self.id, message.message, message.sender, message.address
        );
        match &message.message {
            Message::BusRd { .. } => match mystate {
                DragonState::Invalid => Some(SnoopResult {
                    flush: false,
                    shared: false,
                }),
                DragonState::Exclusive => {
                    self.cache.set_state(message.address, DragonState::SharedClean);
                    Some(SnoopResult {
                        flush: false,
                        shared: true,
                    })
                }
                DragonState::SharedClean => Some(SnoopResult {
                    flush: false,
                    shared: true,
                }),
                DragonState::SharedModified => Some(SnoopResult {
                    flush: true,
                    shared: true,
                }),
                DragonState::Modified => {
                    self.cache.set_state(message.address, DragonState::SharedModified);
                    Some(SnoopResult {
                        flush: true,
                        shared: true,
                    })
                }
            },
            Message::BusUpd { .. } => match mystate {
                DragonState::SharedModified => {
                    self.cache.set_state(message.address, DragonState::SharedClean);
                    Some(SnoopResult {
                        flush: false,
                        shared: true,
                    })
                }
                DragonState::SharedClean => Some(SnoopResult {
                    flush: false,
                    shared: true,
                }),
                // Invalid is the only other reachable state: E/M never
                // observe a BusUpd for a block they exclusively hold.
                _ => Some(SnoopResult {
                    flush: false,
                    shared: false,
                }),
            },
            _ => None,
        }
    }
}
