//! Append-only event store boundary.
//!
//! Storage-agnostic: the engine ships the in-memory store; persistent
//! backends implement [`EventStore`] outside this workspace.

pub mod in_memory;
pub mod r#trait;

pub use in_memory::InMemoryEventStore;
pub use r#trait::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};
