//! Catalog reference contract.
//!
//! The catalog (products, categories, base prices) is owned by another
//! subsystem. The composition engine only reads it, through [`CatalogReader`],
//! and only ever sees flat, typed records.

pub mod category;
pub mod product;
pub mod reader;

pub use category::{CategoryId, CategoryRecord};
pub use product::{ProductId, ProductKind, ProductRecord};
pub use reader::CatalogReader;
