//! # culvert-enrich
//!
//! Background enrichment for the control plane: answering spoken queries
//! with conversation context and analyzing freshly uploaded photos, both
//! off the connection read path via a bounded worker pool.

#![deny(unsafe_code)]

pub mod extract;
pub mod memory;
pub mod pipeline;
pub mod prompts;

pub use memory::SessionMemory;
pub use pipeline::{Pipeline, ReplyTarget};
