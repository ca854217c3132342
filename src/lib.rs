//! Cycle-driven simulator of shared-bus multiprocessor cache coherence.
//!
//! `commons`/`error`/`message` are the shared vocabulary; `cache` is the
//! protocol-ignorant LRU store; `msi`/`mesi`/`dragon` are the three
//! `CacheController` implementations; `bus` and `processor` are the two
//! generic drivers that tie a controller into a running simulation;
//! `trace`/`result`/`cli`/`simulator` are the surrounding harness.

pub mod bus;
pub mod cache;
pub mod cli;
pub mod commons;
pub mod controller;
pub mod dragon;
pub mod error;
pub mod mesi;
pub mod message;
pub mod msi;
pub mod processor;
pub mod result;
pub mod simulator;
pub mod trace;
