//! The shared bus: single in-flight transaction, countdown-timer arbitration,
//! first-flush-wins fanout.
//!
//! Generic over `C: CacheController` so one implementation serves MSI, MESI
//! and Dragon rather than three near-identical bus structs, per the
//! redesign flags. Every per-title behavior from the three original bus
//! classes is preserved, dispatched on the `Message` variant instead of
//! triplicated per protocol.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use crate::commons::{SystemSpec, MEM_LATENCY, WORD_SIZE};
use crate::controller::CacheController;
use crate::message::{BusMessage, Message};

pub struct Bus<C: CacheController> {
    specs: Rc<SystemSpec>,
    msg_q: VecDeque<BusMessage>,
    active_message: Option<BusMessage>,
    countdown_memory: i64,
    countdown_cache: i64,
    controllers: Vec<Rc<RefCell<C>>>,

    pub total_bytes_passed_on_bus: u64,
    pub total_num_invalidations: u64,
    pub total_num_evictions: u64,
}

impl<C: CacheController> Bus<C> {
    pub fn new(specs: Rc<SystemSpec>) -> Self {
        Self {
            specs,
            msg_q: VecDeque::new(),
            active_message: None,
            countdown_memory: -1,
            countdown_cache: -1,
            controllers: Vec::new(),
            total_bytes_passed_on_bus: 0,
            total_num_invalidations: 0,
            total_num_evictions: 0,
        }
    }

    pub fn attach_controllers(&mut self, controllers: Vec<Rc<RefCell<C>>>) {
        self.controllers = controllers;
    }

    pub fn queue_message(&mut self, message: BusMessage) {
        self.msg_q.push_back(message);
    }

    fn deliver_to_sender(&mut self, msg: &BusMessage) {
        let mut outbox = VecDeque::new();
        for c in &self.controllers {
            if c.borrow().id() == msg.sender {
                c.borrow_mut().receive_bus_message(msg, &mut outbox);
                break;
            }
        }
        self.msg_q.append(&mut outbox);
    }

    /// Fans `msg` out to every controller but the sender, first-flush-wins.
    /// Retired controller slots are skipped without being removed from the
    /// list, so the bus never mutates it mid-fanout. A snoop never produces
    /// an outgoing message of its own (only the sender's own completion
    /// does), so the scratch outbox passed in here is always empty again
    /// once fanout returns.
    fn fanout(&self, msg: &BusMessage) -> (bool, bool) {
        let mut flush = false;
        let mut shared = false;
        let mut scratch = VecDeque::new();
        for c in &self.controllers {
            let (id, retired) = {
                let cr = c.borrow();
                (cr.id(), cr.is_retired())
            };
            if retired || id == msg.sender {
                continue;
            }
            if let Some(result) = c.borrow_mut().receive_bus_message(msg, &mut scratch) {
                if result.flush {
                    flush = true;
                    shared = true;
                    break;
                }
                shared = shared || result.shared;
            }
        }
        debug_assert!(scratch.is_empty(), "a snoop must never enqueue directly");
        (flush, shared)
    }

    pub fn tick(&mut self) {
        if self.countdown_memory >= 0 {
            if self.countdown_cache >= 0 {
                if self.countdown_cache == 0 {
                    // Only BusRd/BusUpd arm the cache countdown, so this
                    // never fires for a BusWB still in flight.
                    if let Some(active) = self.active_message.take() {
                        self.deliver_to_sender(&active);
                    }
                    self.countdown_cache -= 1;
                    self.countdown_memory -= 1;
                    return;
                }
                self.countdown_cache -= 1;
            }

            if self.countdown_memory == 0 {
                if let Some(active) = self.active_message.take() {
                    if !matches!(active.message, Message::BusWB) {
                        self.deliver_to_sender(&active);
                    }
                }
                // Reset here too, in case block_size > MEM_LATENCY left the
                // cache countdown still armed and bleeding into the next
                // active message.
                self.countdown_cache = -1;
            }
            self.countdown_memory -= 1;
            return;
        }

        let Some(msg) = self.msg_q.pop_front() else {
            return;
        };

        match &msg.message {
            Message::BusRd { .. } => {
                self.total_bytes_passed_on_bus += self.specs.block_size;
                let (flush, shared) = self.fanout(&msg);
                msg.share_status.set(Some(shared));
                if flush {
                    self.countdown_cache = self.specs.block_size as i64 - 1;
                }
                self.countdown_memory = MEM_LATENCY as i64 - 1;
                self.active_message = Some(msg);
            }
            Message::BusRdX => {
                self.total_bytes_passed_on_bus += self.specs.block_size;
                self.total_num_invalidations += 1;
                let (flush, _shared) = self.fanout(&msg);
                if flush {
                    self.countdown_cache = self.specs.block_size as i64 - 1;
                }
                self.countdown_memory = MEM_LATENCY as i64 - 1;
                self.active_message = Some(msg);
            }
            Message::BusUpd { .. } => {
                self.total_bytes_passed_on_bus += WORD_SIZE;
                self.total_num_invalidations += 1;
                let (_flush, shared) = self.fanout(&msg);
                msg.share_status.set(Some(shared));
                // BusUpd completes in the same cycle it's issued: no
                // cache-to-cache or memory round trip involved.
                self.deliver_to_sender(&msg);
            }
            Message::BusWB => {
                self.total_bytes_passed_on_bus += self.specs.block_size;
                // Only Dragon's bus tracks evictions as their own stat;
                // MSI/MESI fold writebacks into the bytes-on-bus count only,
                // matching msi.py/mesi.py's BusMSI/BusMESI (neither has an
                // eviction counter — only dragon.py's BusDragon does).
                if self.specs.protocol == crate::commons::Protocol::Dragon {
                    self.total_num_evictions += 1;
                }
                self.countdown_memory = MEM_LATENCY as i64 - 1;
                self.active_message = Some(msg);
            }
        }
    }
}
