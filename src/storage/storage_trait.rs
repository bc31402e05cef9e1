//! Record sink trait
//!
//! A `RecordSink` receives the finished, ordered record list of one pipeline
//! once capture is over and persists it to a target. Implementations must
//! replace any previous content of the target rather than append to it.

use std::path::Path;

use crate::data_capture::types::{BusRecord, Message};
use crate::error_handling::types::StorageError;

pub trait RecordSink: Send + Sync {
    /// Persists framed receiver messages.
    fn persist_messages(&self, target: &Path, messages: &[Message]) -> Result<(), StorageError>;

    /// Persists decoded bus records.
    fn persist_bus_records(&self, target: &Path, records: &[BusRecord]) -> Result<(), StorageError>;
}
