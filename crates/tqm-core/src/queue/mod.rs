//! Ordered pending transfers plus the single Active slot.
//!
//! `QueueStore` is plain data: it enforces the ordering and slot invariants
//! but runs nothing. The scheduler actor is its only mutator.

mod store;

pub use store::{Enqueued, QueueEntry, QueueStore};
