//! Budget-bounded evidence store for one task run.
//!
//! # Entry classes (in eviction order)
//!
//! | Class | Source | Evicted by |
//! |-------|--------|------------|
//! | 0. Plan note | Engine observations | any entry |
//! | 1. Retrieval | Retrieval capabilities | retrieval, plugin output |
//! | 2. Plugin output | Image, translation, custom | plugin output |
//!
//! Within a class the oldest entry (lowest sequence number) goes first.

pub mod buffer;
pub mod token;

pub use buffer::{Appended, ContextBuffer, ContextEntry, ContextSnapshot, EntryKind, NewEntry};
