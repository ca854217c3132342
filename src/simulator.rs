//! The driver loop: wires a bus and one processor per trace file together and
//! runs them to completion.
//!
//! Grounded on `simulator.py`'s tail loop: tick every processor in core
//! order, then tick the bus once, repeat until every processor reports it's
//! done. Generic over `C: CacheController` so the same loop serves whichever
//! protocol `main` picked at the CLI boundary.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::PathBuf;
use std::rc::Rc;

use log::{debug, warn};

use crate::bus::Bus;
use crate::commons::SystemSpec;
use crate::controller::CacheController;
use crate::error::SimError;
use crate::processor::Processor;
use crate::result::{BusResult, CoreResult};
use crate::trace;

/// Runs one simulation to completion and assembles its results.
///
/// `traces` pairs each discovered core index with its trace file path.
/// A core whose trace ends on a malformed line still runs to the end of
/// what was parsed; its `CoreResult::incomplete` flag is set rather than
/// the whole run aborting (`7.2`).
pub fn run<C: CacheController + 'static>(
    specs: Rc<SystemSpec>,
    traces: &[(usize, PathBuf)],
) -> Result<(Vec<CoreResult>, BusResult), SimError> {
    let bus = Rc::new(RefCell::new(Bus::<C>::new(specs.clone())));

    let mut controllers = Vec::with_capacity(traces.len());
    let mut processors = Vec::with_capacity(traces.len());
    let mut incomplete: HashMap<usize, bool> = HashMap::new();

    for (core, path) in traces {
        let controller = Rc::new(RefCell::new(C::new(*core, specs.clone())));
        controller.borrow_mut().attach_bus(Rc::downgrade(&bus));

        let (instructions, err) = trace::read_trace(path, *core);
        if let Some(e) = err {
            warn!("core {core}: trace ended early ({e})");
            incomplete.insert(*core, true);
        }

        let processor = Rc::new(RefCell::new(Processor::new(
            *core,
            controller.clone(),
            instructions.into_iter().collect(),
        )));
        controllers.push(controller);
        processors.push(processor);
    }

    bus.borrow_mut().attach_controllers(controllers.clone());

    let mut done = vec![false; processors.len()];
    loop {
        let mut all_done = true;
        for (i, proc) in processors.iter().enumerate() {
            if done[i] {
                continue;
            }
            if !Processor::tick(proc) {
                done[i] = true;
                controllers[i].borrow_mut().set_retired(true);
            } else {
                all_done = false;
            }
        }
        bus.borrow_mut().tick();
        if all_done {
            break;
        }
    }
    debug!("simulation finished after assembling results for {} core(s)", processors.len());

    let core_results = processors
        .iter()
        .zip(controllers.iter())
        .map(|(proc, controller)| {
            let proc = proc.borrow();
            let counters = *controller.borrow().counters();
            CoreResult {
                core: proc.id(),
                cache_size: specs.cache_size,
                miss_count: counters.miss_count,
                hit_count: counters.hit_count,
                private_access_count: counters.private_data_access_count,
                shared_access_count: counters.shared_data_access_count,
                total_write_latency: proc.total_write_latency(),
                total_writes: proc.total_num_writes(),
                cycle_count: proc.cycle_count(),
                incomplete: incomplete.get(&proc.id()).copied().unwrap_or(false),
            }
        })
        .collect();

    let bus = bus.borrow();
    let bus_result = BusResult {
        total_bytes_passed_on_bus: bus.total_bytes_passed_on_bus,
        total_num_invalidations: bus.total_num_invalidations,
        total_num_evictions: bus.total_num_evictions,
    };

    Ok((core_results, bus_result))
}
