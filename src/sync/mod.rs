//! Synchronization primitives used throughout the crate.
//!
//! Locking is built on the battle-tested `parking_lot` crate: fair,
//! compact, no poisoning on panic. The types in use crate-wide are
//! re-exported here so internal modules share one import path.

pub mod interrupt;

pub use interrupt::{InterruptHandle, WaitSite};

// Re-export parking_lot's primitives
pub use parking_lot::{Condvar, Mutex, MutexGuard};
