//! Remote document-store client for Tidemark.
//!
//! This crate provides the transport contract and the three protocol engines
//! built on top of it:
//! - Query engine: offset/limit paginated reads with filter, sort, projection
//! - Pull engine: checkpoint-cursor incremental reads
//! - Push engine: optimistic-concurrency conflict-detecting writes
//!
//! Two transports ship with the crate: an HTTP transport backed by reqwest
//! and an in-memory transport serving all endpoints for tests and offline
//! development.
//!
//! # Design Principles
//! - Engines report failures, they never retry; retry policy belongs upstream
//! - The transport is the only seam to the network; engines see status + body
//! - Conflicts are typed results, not errors

pub mod http;
pub mod memory;
pub mod pull;
pub mod push;
pub mod query;
pub mod transport;

pub use http::HttpTransport;
pub use memory::MemoryTransport;
pub use pull::{PullEngine, PullPage};
pub use push::{ConflictReport, PushEngine, WriteRow};
pub use query::{Comparison, Filter, PageResult, QueryEngine, Sort, SortOrder};
pub use transport::{Method, Transport, TransportRequest, TransportResponse};
