//! The processor boundary: drives a trace against its cache controller one
//! cycle at a time.
//!
//! Grounded on `processor.py`: a compute countdown, a stall flag, and a
//! `resume` callback the controller invokes once a pending `prrd`/`prwr`
//! completes. The callback needs to mutate the processor from outside its
//! own `tick()` call stack (it may fire synchronously on a hit, or cycles
//! later from deep inside `Bus::tick`), so `Processor` is always held
//! behind an `Rc<RefCell<_>>` and `tick`/`resume` take that handle rather
//! than `&mut self`.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use log::debug;

use crate::commons::CoreId;
use crate::controller::CacheController;
use crate::trace::Instruction;

enum Action {
    None,
    Load(u64),
    Store(u64),
}

pub struct Processor<C: CacheController> {
    id: CoreId,
    controller: Rc<RefCell<C>>,
    instructions: VecDeque<Instruction>,
    is_stalled: bool,
    count_down_cycle: i64,
    cycle_count: u64,
    total_num_writes: u64,
    total_write_latency: u64,
    write_start: u64,
    write_finish: u64,
}

impl<C: CacheController + 'static> Processor<C> {
    pub fn new(id: CoreId, controller: Rc<RefCell<C>>, instructions: VecDeque<Instruction>) -> Self {
        Self {
            id,
            controller,
            instructions,
            is_stalled: false,
            count_down_cycle: 0,
            cycle_count: 0,
            total_num_writes: 0,
            total_write_latency: 0,
            write_start: 0,
            write_finish: 0,
        }
    }

    pub fn id(&self) -> CoreId {
        self.id
    }

    pub fn cycle_count(&self) -> u64 {
        self.cycle_count
    }

    pub fn total_num_writes(&self) -> u64 {
        self.total_num_writes
    }

    pub fn total_write_latency(&self) -> u64 {
        self.total_write_latency
    }

    /// Advances this core by one cycle. Returns `false` once the trace is
    /// exhausted and there is no outstanding compute countdown or stall —
    /// matching `processor.py`'s `tick()` return contract.
    pub fn tick(this: &Rc<RefCell<Self>>) -> bool {
        let action = {
            let mut me = this.borrow_mut();
            me.cycle_count += 1;

            if me.count_down_cycle > 0 {
                me.count_down_cycle -= 1;
                return true;
            }

            if me.is_stalled {
                return true;
            }

            let Some(instr) = me.instructions.pop_front() else {
                debug!("core {}: end of trace", me.id);
                return false;
            };
            debug!("core {}: {instr:?}", me.id);

            match instr {
                Instruction::Compute(n) => {
                    me.count_down_cycle = n as i64 - 1;
                    Action::None
                }
                Instruction::Load(addr) => {
                    me.is_stalled = true;
                    Action::Load(addr)
                }
                Instruction::Store(addr) => {
                    me.is_stalled = true;
                    me.write_start = me.cycle_count;
                    me.total_num_writes += 1;
                    Action::Store(addr)
                }
            }
            // `me` is dropped at the end of this block: prrd/prwr may
            // invoke the resume callback synchronously on a cache hit, and
            // that callback needs to borrow `this` itself.
        };

        match action {
            Action::None => {}
            Action::Load(addr) => {
                let controller = this.borrow().controller.clone();
                let resume_target = this.clone();
                controller
                    .borrow_mut()
                    .prrd(addr, Box::new(move || Self::resume(&resume_target)));
            }
            Action::Store(addr) => {
                let controller = this.borrow().controller.clone();
                let resume_target = this.clone();
                controller
                    .borrow_mut()
                    .prwr(addr, Box::new(move || Self::resume(&resume_target)));
            }
        }
        true
    }

    /// Called back by the cache controller once a stalled `prrd`/`prwr`
    /// completes. `write_start > write_finish` distinguishes a just-finished
    /// write from a load resume or a write that already finished, matching
    /// `processor.py`'s guard.
    fn resume(this: &Rc<RefCell<Self>>) {
        let mut me = this.borrow_mut();
        debug!("core {}: resume at cycle {}", me.id, me.cycle_count);
        me.is_stalled = false;
        if me.write_start > me.write_finish {
            me.write_finish = me.cycle_count;
            me.total_write_latency += me.write_finish - me.write_start;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commons::{Protocol, SystemSpec};
    use crate::message::{BusMessage, Message};
    use crate::msi::MsiController;
    use std::rc::Rc;

    fn specs() -> Rc<SystemSpec> {
        Rc::new(SystemSpec {
            protocol: Protocol::Msi,
            cache_size: 1024,
            block_size: 16,
            assoc: 1,
        })
    }

    #[test]
    fn compute_instruction_stalls_for_its_own_duration() {
        let controller = Rc::new(RefCell::new(MsiController::new(0, specs())));
        let mut instrs = VecDeque::new();
        instrs.push_back(Instruction::Compute(3));
        let proc = Rc::new(RefCell::new(Processor::new(0, controller, instrs)));

        assert!(Processor::tick(&proc)); // issues compute(3), countdown=2
        assert!(Processor::tick(&proc)); // countdown 2->1
        assert!(Processor::tick(&proc)); // countdown 1->0
        // trace now exhausted; next tick pops None.
        assert!(!Processor::tick(&proc));
        assert_eq!(proc.borrow().cycle_count(), 4);
    }

    #[test]
    fn load_hit_resumes_in_the_same_tick() {
        let controller = Rc::new(RefCell::new(MsiController::new(0, specs())));
        // Install the line as Modified directly (no bus attached in this
        // test), so the processor's load below is a hit.
        {
            let mut c = controller.borrow_mut();
            let mut outbox = VecDeque::new();
            let install = BusMessage::new(Message::BusRdX, 0, 0, Some(Box::new(|| {})));
            c.receive_bus_message(&install, &mut outbox);
        }
        let mut instrs = VecDeque::new();
        instrs.push_back(Instruction::Load(0));
        let proc = Rc::new(RefCell::new(Processor::new(1, controller, instrs)));

        assert!(Processor::tick(&proc));
        assert!(!proc.borrow().is_stalled);
    }
}
