use std::fmt;

#[derive(Debug)]
pub enum ConfigError {
    IoError(std::io::Error),
    TomlError(String),
    NothingEnabled,
    BadBaudrate(u32),
    NotInRange(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {}", e),
            ConfigError::TomlError(e) => write!(f, "TOML parsing error: {}", e),
            ConfigError::NothingEnabled => {
                write!(f, "At least one of serial or CAN logging must be enabled")
            }
            ConfigError::BadBaudrate(b) => write!(f, "Invalid baud rate: {}", b),
            ConfigError::NotInRange(e) => write!(f, "Value out of range: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::IoError(err)
    }
}

/// Failures reported by a byte or frame source.
#[derive(Debug)]
pub enum SourceError {
    /// The source ended cleanly and will not yield more data.
    Closed,
    /// The device could not be opened.
    OpenFailed(String),
    /// The device failed while reading (e.g. unplugged).
    IoError(std::io::Error),
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceError::Closed => write!(f, "Source closed"),
            SourceError::OpenFailed(e) => write!(f, "Unable to open source: {}", e),
            SourceError::IoError(e) => write!(f, "Source IO error: {}", e),
        }
    }
}

impl std::error::Error for SourceError {}

impl From<std::io::Error> for SourceError {
    fn from(err: std::io::Error) -> Self {
        SourceError::IoError(err)
    }
}

#[derive(Debug, PartialEq)]
pub enum DecodeError {
    UnknownFrame(u32),
    PayloadTooShort { id: u32, expected: usize, actual: usize },
    ParseFailed { line: usize, reason: String },
    IoError(String),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::UnknownFrame(id) => write!(f, "Unknown frame id {:#x}", id),
            DecodeError::PayloadTooShort {
                id,
                expected,
                actual,
            } => write!(
                f,
                "Frame {:#x} payload too short: expected {} byte(s), got {}",
                id, expected, actual
            ),
            DecodeError::ParseFailed { line, reason } => {
                write!(f, "Database parse error on line {}: {}", line, reason)
            }
            DecodeError::IoError(e) => write!(f, "Database IO error: {}", e),
        }
    }
}

impl std::error::Error for DecodeError {}

#[derive(Debug)]
pub enum StorageError {
    WriteFailed(String),
    SerializeFailed(serde_json::Error),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::WriteFailed(e) => write!(f, "Storage write failed: {}", e),
            StorageError::SerializeFailed(e) => write!(f, "Record serialization failed: {}", e),
        }
    }
}

impl std::error::Error for StorageError {}

#[derive(Debug)]
pub enum SessionError {
    NoPipelines,
    AlreadyStarted,
    NotRunning,
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::NoPipelines => write!(f, "No capture pipeline was provided"),
            SessionError::AlreadyStarted => write!(f, "Session already started"),
            SessionError::NotRunning => write!(f, "Session is not running"),
        }
    }
}

impl std::error::Error for SessionError {}
