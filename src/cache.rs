//! Protocol-ignorant set-associative cache store.
//!
//! Grounded on `cache.py`: a cache set is an LRU-ordered list of
//! `(tag, state)` pairs, lowest index least recently used. The store knows
//! nothing about coherence; it only tracks which line holds which state and
//! evicts on demand. Generic over `LineState` so MSI/MESI/Dragon line-state
//! enums share this one implementation instead of three near-identical
//! copies.

use std::collections::HashMap;
use std::rc::Rc;

use crate::commons::SystemSpec;

/// A per-protocol cache line state. `INVALID` doubles as "not present" for
/// `get_state` and as the sentinel that removes a line in `set_state`.
pub trait LineState: Copy + Eq + std::fmt::Debug {
    const INVALID: Self;
}

/// A line evicted by `set_state` to make room for an incoming one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Evicted<S> {
    pub address: u64,
    pub state: S,
}

pub struct CacheStore<S: LineState> {
    specs: Rc<SystemSpec>,
    num_sets: u64,
    sets: HashMap<u64, Vec<(u64, S)>>,
}

impl<S: LineState> CacheStore<S> {
    pub fn new(specs: Rc<SystemSpec>) -> Self {
        let num_sets = specs.num_sets();
        Self {
            specs,
            num_sets,
            sets: HashMap::new(),
        }
    }

    fn decompose(&self, address: u64) -> (u64, u64) {
        let block_id = address / self.specs.block_size;
        let set_index = block_id % self.num_sets;
        let tag = block_id / self.num_sets;
        (set_index, tag)
    }

    fn reconstruct(&self, set_index: u64, tag: u64) -> u64 {
        (tag * self.num_sets + set_index) * self.specs.block_size
    }

    /// Returns the state of the block holding `address`, promoting it to
    /// most-recently-used on a hit. Returns `S::INVALID` on a miss.
    pub fn get_state(&mut self, address: u64) -> S {
        let (set_index, tag) = self.decompose(address);
        let Some(set) = self.sets.get_mut(&set_index) else {
            return S::INVALID;
        };
        let Some(pos) = set.iter().position(|(t, _)| *t == tag) else {
            return S::INVALID;
        };
        let line = set.remove(pos);
        set.push(line);
        line.1
    }

    /// Installs `new_state` for the block holding `address`, handling LRU
    /// insertion and eviction. Setting `S::INVALID` on a present line removes
    /// it without evicting anything else. Returns the line evicted to make
    /// room, if any.
    pub fn set_state(&mut self, address: u64, new_state: S) -> Option<Evicted<S>> {
        let (set_index, tag) = self.decompose(address);
        let assoc = self.specs.assoc as usize;

        if let Some(set) = self.sets.get_mut(&set_index) {
            if let Some(pos) = set.iter().position(|(t, _)| *t == tag) {
                set.remove(pos);
                if new_state != S::INVALID {
                    set.push((tag, new_state));
                }
                return None;
            }

            if new_state == S::INVALID {
                return None;
            }

            if set.len() < assoc {
                set.push((tag, new_state));
                return None;
            }

            let (evicted_tag, evicted_state) = set.remove(0);
            set.push((tag, new_state));
            return Some(Evicted {
                address: self.reconstruct(set_index, evicted_tag),
                state: evicted_state,
            });
        }

        if new_state != S::INVALID {
            self.sets.insert(set_index, vec![(tag, new_state)]);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum TestState {
        Invalid,
        Shared,
        Modified,
    }

    impl LineState for TestState {
        const INVALID: Self = TestState::Invalid;
    }

    fn store(cache_size: u64, block_size: u64, assoc: u64) -> CacheStore<TestState> {
        CacheStore::new(Rc::new(SystemSpec {
            protocol: crate::commons::Protocol::Msi,
            cache_size,
            block_size,
            assoc,
        }))
    }

    #[test]
    fn miss_on_empty_cache_returns_invalid() {
        let mut c = store(1024, 16, 1);
        assert_eq!(c.get_state(1024), TestState::Invalid);
    }

    #[test]
    fn set_then_get_round_trips() {
        let mut c = store(1024, 16, 1);
        assert!(c.set_state(1024, TestState::Shared).is_none());
        assert_eq!(c.get_state(1024), TestState::Shared);
    }

    #[test]
    fn direct_mapped_eviction_returns_evicted_line() {
        // cache_size/block_size/assoc = 1024/16/1 = 64 sets, direct mapped.
        let mut c = store(1024, 16, 1);
        assert!(c.set_state(1024, TestState::Modified).is_none());
        // 1024 + 64*16 = 2048 maps to the same set (index 0) with a new tag.
        let evicted = c.set_state(1024 + 64 * 16, TestState::Shared);
        assert_eq!(
            evicted,
            Some(Evicted {
                address: 1024,
                state: TestState::Modified
            })
        );
        assert_eq!(c.get_state(1024), TestState::Invalid);
    }

    #[test]
    fn lru_order_promotes_on_access() {
        // 2-way associative, 2 sets of 16 bytes each.
        let mut c = store(64, 16, 2);
        assert!(c.set_state(0, TestState::Shared).is_none()); // set 0, tag 0
        assert!(c.set_state(32, TestState::Shared).is_none()); // set 0, tag 1
        // touch tag 0 so tag 1 becomes LRU
        let _ = c.get_state(0);
        // set 0, tag 2 -> evicts tag 1 (address 32), not tag 0
        let evicted = c.set_state(64, TestState::Modified);
        assert_eq!(
            evicted,
            Some(Evicted {
                address: 32,
                state: TestState::Shared
            })
        );
        assert_eq!(c.get_state(0), TestState::Shared);
    }

    #[test]
    fn set_state_invalid_removes_without_eviction() {
        let mut c = store(1024, 16, 1);
        assert!(c.set_state(1024, TestState::Modified).is_none());
        assert!(c.set_state(1024, TestState::Invalid).is_none());
        assert_eq!(c.get_state(1024), TestState::Invalid);
    }
}
