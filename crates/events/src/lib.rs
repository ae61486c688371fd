//! Events emitted by the composition engine and the plumbing that moves them.
//!
//! - [`Event`]: the contract every domain event implements
//! - [`EventEnvelope`]: tenant + stream metadata around a payload
//! - [`EventBus`]: publish/subscribe after events are persisted

pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
