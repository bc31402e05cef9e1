//! Common data types used across the data_capture subsystem.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};

/// Family a framed message was classified into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageFamily {
    /// `$G`-prefixed, CR/LF terminated ASCII sentence (NMEA).
    Text,
    /// Frame introduced by the `0xB5 0x62` sync pattern (UBX).
    Binary,
    /// Bytes that belong to neither of the above.
    Unclassified,
}

impl MessageFamily {
    /// Tag written to persisted records.
    pub fn tag(&self) -> &'static str {
        match self {
            MessageFamily::Text => "NMEA",
            MessageFamily::Binary => "UBX",
            MessageFamily::Unclassified => "Unknown",
        }
    }
}

impl fmt::Display for MessageFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// A completed, immutable message cut from the receiver byte stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    timestamp: i64,
    family: MessageFamily,
    payload: Vec<u8>,
}

impl Message {
    /// Builds a message, re-validating the tentative family against its
    /// encoding. A `Text` payload that is not valid UTF-8 becomes
    /// `Unclassified`; the payload is kept verbatim either way.
    pub fn classify(timestamp: i64, tentative: MessageFamily, payload: Vec<u8>) -> Self {
        let family = match tentative {
            MessageFamily::Text if std::str::from_utf8(&payload).is_err() => {
                MessageFamily::Unclassified
            }
            other => other,
        };
        Self {
            timestamp,
            family,
            payload,
        }
    }

    /// Microseconds relative to the session epoch.
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn family(&self) -> MessageFamily {
        self.family
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }
}

impl Serialize for Message {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let data = match self.family {
            // classify() guarantees Text payloads are UTF-8
            MessageFamily::Text => String::from_utf8_lossy(&self.payload).into_owned(),
            MessageFamily::Binary | MessageFamily::Unclassified => hex::encode(&self.payload),
        };
        let mut s = serializer.serialize_struct("Message", 3)?;
        s.serialize_field("timestamp", &self.timestamp)?;
        s.serialize_field("type", self.family.tag())?;
        s.serialize_field("data", &data)?;
        s.end()
    }
}

/// Raw frame as delivered by a bus interface.
#[derive(Debug, Clone, PartialEq)]
pub struct BusFrame {
    pub arbitration_id: u32,
    pub data: Vec<u8>,
    /// Hardware/driver receive time, when the interface reports one.
    pub device_timestamp: Option<DateTime<Utc>>,
}

/// A decoded bus frame ready for persistence.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BusRecord {
    pub timestamp: i64,
    pub arbitration_id: u32,
    #[serde(rename = "data")]
    pub signals: BTreeMap<String, f64>,
}

/// Source of wall-clock time. Swappable so framing can be tested
/// deterministically.
pub trait Clock: Send {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Fixed reference instant every capture timestamp is measured from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureEpoch {
    origin: DateTime<Utc>,
}

impl CaptureEpoch {
    pub fn at(origin: DateTime<Utc>) -> Self {
        Self { origin }
    }

    pub fn now() -> Self {
        Self::at(Utc::now())
    }

    pub fn origin(&self) -> DateTime<Utc> {
        self.origin
    }

    /// Signed microsecond offset of `instant` from the epoch. Negative when
    /// the instant predates the epoch.
    pub fn offset_micros(&self, instant: DateTime<Utc>) -> i64 {
        (instant - self.origin)
            .num_microseconds()
            .unwrap_or(if instant < self.origin { i64::MIN } else { i64::MAX })
    }
}

/// Terminal condition a pipeline reports back to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineStatus {
    /// Source exhausted, bus wait expired or deadline reached.
    Completed,
    /// Cancellation observed between two processed units.
    Cancelled,
    /// Source error or liveness timeout.
    Faulted(String),
}

/// What a pipeline hands over to the orchestrator when it returns.
#[derive(Debug)]
pub struct PipelineReport<R> {
    pub records: Vec<R>,
    pub status: PipelineStatus,
}
