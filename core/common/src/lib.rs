//! Common utilities and types shared across Tidemark crates.
//!
//! This crate provides the vocabulary of the replication protocol: documents
//! as semantic field maps, checkpoints over their change history, and the
//! error taxonomy every layer reports through.

pub mod checkpoint;
pub mod document;
pub mod error;

pub use checkpoint::Checkpoint;
pub use document::{Document, DocumentKey, UPDATED_AT_FIELD};
pub use error::{Error, RemoteFailure, Result};
