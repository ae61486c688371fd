//! Infrastructure layer: event store, dispatch, catalog mirror, config and
//! the service facade callers talk to.

pub mod command_dispatcher;
pub mod config;
pub mod event_store;
pub mod read_model;
pub mod service;


pub use command_dispatcher::{CommandDispatcher, DispatchError};
pub use config::{ConfigError, EngineConfig};
pub use service::{
    CompositionService, InMemoryCompositionService, MutationContext, ServiceError, ServiceResult,
};
