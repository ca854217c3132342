//! Shared configuration and constants for the coherence simulator.
//!
//! Mirrors the split the original kept between a small system-wide
//! configuration object and the per-module state machines: every
//! controller and the bus hold an `Rc<SystemSpec>` rather than duplicating
//! the cache geometry.

use std::str::FromStr;

/// Latency in cycles to service a request at main memory.
pub const MEM_LATENCY: u64 = 100;

/// Width in bytes of a BusUpd flush (Dragon only sends the dirty word, not
/// the whole block).
pub const WORD_SIZE: u64 = 4;

pub type CoreId = usize;

/// Coherence protocol selected for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Msi,
    Mesi,
    Dragon,
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "msi" => Ok(Protocol::Msi),
            "mesi" => Ok(Protocol::Mesi),
            "dragon" => Ok(Protocol::Dragon),
            other => Err(format!("unrecognized protocol '{other}'")),
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Protocol::Msi => "msi",
            Protocol::Mesi => "mesi",
            Protocol::Dragon => "dragon",
        };
        f.write_str(name)
    }
}

/// Cache geometry and protocol choice shared by every core and the bus.
#[derive(Debug, Clone)]
pub struct SystemSpec {
    pub protocol: Protocol,
    pub cache_size: u64,
    pub block_size: u64,
    pub assoc: u64,
}

impl SystemSpec {
    pub fn num_sets(&self) -> u64 {
        self.cache_size / self.block_size / self.assoc
    }
}
