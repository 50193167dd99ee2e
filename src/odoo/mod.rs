pub mod client;
pub mod payload;
pub mod references;

#[cfg(test)]
pub mod fake;

pub use client::{CatalogApi, CatalogError, Model, OdooClient};
pub use payload::{ImagePayload, ProductPayload, ReplaceIds};
pub use references::{ReferenceCache, ReferenceKind};
