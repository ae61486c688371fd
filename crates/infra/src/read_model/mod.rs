//! Tenant-isolated read models.
//!
//! The catalog the engine consults is owned elsewhere; [`InMemoryCatalog`]
//! mirrors it in-process for tests and development.

pub mod catalog;
pub mod tenant_store;

pub use catalog::InMemoryCatalog;
pub use tenant_store::{InMemoryTenantStore, TenantStore};
