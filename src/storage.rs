//! Storage subsystem
//!
//! This module provides the abstraction and the default implementation used
//! to persist the records produced by a capture session.
//!
//! Components:
//! - `storage_trait`: the RecordSink trait defining a uniform API.
//! - `file_storage`: JSON file implementation (one array per pipeline, overwrite on reopen).

pub mod file_storage;
pub mod storage_trait;

pub use file_storage::JsonFileSink;
pub use storage_trait::RecordSink;
