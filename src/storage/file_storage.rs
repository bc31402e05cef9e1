use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use log::{debug, error, info};
use serde::Serialize;

use crate::data_capture::types::{BusRecord, Message};
use crate::error_handling::types::StorageError;
use crate::storage::storage_trait::RecordSink;

/// Writes each record list as a single JSON array, truncating the target.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonFileSink;

impl JsonFileSink {
    pub fn new() -> Self {
        Self
    }

    fn write_json<R: Serialize>(&self, target: &Path, records: &[R]) -> Result<(), StorageError> {
        if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| {
                error!("Failed to create directory {}: {}", parent.display(), e);
                StorageError::WriteFailed(format!("{}: {}", parent.display(), e))
            })?;
        }

        info!("Writing {} record(s) to {}...", records.len(), target.display());
        let file = File::create(target).map_err(|e| {
            error!("Failed to create {}: {}", target.display(), e);
            StorageError::WriteFailed(format!("{}: {}", target.display(), e))
        })?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, records).map_err(StorageError::SerializeFailed)?;
        writer.flush().map_err(|e| {
            error!("Failed to flush {}: {}", target.display(), e);
            StorageError::WriteFailed(format!("{}: {}", target.display(), e))
        })?;
        debug!("Done writing {}", target.display());
        Ok(())
    }
}

impl RecordSink for JsonFileSink {
    fn persist_messages(&self, target: &Path, messages: &[Message]) -> Result<(), StorageError> {
        self.write_json(target, messages)
    }

    fn persist_bus_records(
        &self,
        target: &Path,
        records: &[BusRecord],
    ) -> Result<(), StorageError> {
        self.write_json(target, records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_capture::types::MessageFamily;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    #[test]
    fn test_messages_written_as_json_array() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gnss_output").join("outlog.json");
        let messages = vec![
            Message::classify(10, MessageFamily::Text, b"$GPGGA,1\r\n".to_vec()),
            Message::classify(20, MessageFamily::Binary, vec![0xb5, 0x62, 0x01]),
            Message::classify(0, MessageFamily::Unclassified, vec![0x00]),
        ];
        JsonFileSink::new().persist_messages(&path, &messages).unwrap();

        let parsed: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        let arr = parsed.as_array().unwrap();
        assert_eq!(arr.len(), 3);
        assert_eq!(arr[0]["type"], "NMEA");
        assert_eq!(arr[1]["data"], "b56201");
        assert_eq!(arr[2]["type"], "Unknown");
    }

    #[test]
    fn test_reopen_overwrites_previous_content() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("CANlog.json");
        let mut signals = BTreeMap::new();
        signals.insert("Speed".to_string(), 1.0);
        let records: Vec<BusRecord> = (0..5)
            .map(|i| BusRecord {
                timestamp: i,
                arbitration_id: 0x100,
                signals: signals.clone(),
            })
            .collect();
        let sink = JsonFileSink::new();
        sink.persist_bus_records(&path, &records).unwrap();
        sink.persist_bus_records(&path, &records[..1]).unwrap();

        let parsed: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(parsed.as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_empty_record_list_writes_empty_array() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.json");
        JsonFileSink::new().persist_messages(&path, &[]).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "[]");
    }

    #[test]
    fn test_unwritable_target_fails() {
        let dir = TempDir::new().unwrap();
        // a directory cannot be opened as a file
        let res = JsonFileSink::new().persist_messages(dir.path(), &[]);
        assert!(matches!(res, Err(StorageError::WriteFailed(_))));
    }
}
