//! # culvert-storage
//!
//! The document-store collaborator seam and the schema glue that maps
//! robot wire events onto collections. The store itself is external; this
//! crate defines the [`DocumentStore`] trait, an in-memory implementation
//! used by tests and local runs, deterministic document-id generation, and
//! the [`IngestService`] that handles every persistable message kind.

#![deny(unsafe_code)]

pub mod ids;
pub mod ingest;
pub mod store;

pub use ids::IdGenerator;
pub use ingest::{IngestError, IngestService};
pub use store::{DocumentStore, MemoryStore, StoreError, StoredDocument};
