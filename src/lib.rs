//! Records the largest allocation size requested from each call site of
//! `malloc()`/`calloc()` into a fixed-size table, for fuzzers that want to
//! spot call sites asking for unusually large amounts of memory.
//!
//! - [`alloc::map`]: the table, and how a return address picks a slot
//! - [`alloc::hook`]: what the replacement `malloc()`/`calloc()` do
//! - [`alloc::real`]: where they get memory without calling themselves
//! - [`externc`]: the exported C symbols, including `malloc`/`calloc`
//!   themselves with the `interpose` feature
//! - [`harness`]: snapshots, baselines and feedback for the reading side
//!
//! Slot attribution is only stable within one process image: with ASLR the
//! same call site can land in different slots run to run.

pub mod alloc;
pub mod externc;
pub mod harness;

pub use alloc::map::{call_site_index, AllocMap, MAP_SIZE};
pub use externc::ALLOC_SIZE_MAP;
