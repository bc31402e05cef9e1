use std::path::PathBuf;

use serde::Deserialize;

pub const DEFAULT_SERIAL_DEVICE: &str = "/dev/ttyACM0";
pub const DEFAULT_SERIAL_FILENAME: &str = "./data/gnss_output/outlog.json";
pub const DEFAULT_BAUDRATE: u32 = 115_200;
pub const DEFAULT_SERIAL_TIMEOUT_MS: u64 = 1;
pub const DEFAULT_CAN_DEVICE: &str = "vcan0";
pub const DEFAULT_CAN_FILENAME: &str = "./data/can_output/CANlog.json";
pub const DEFAULT_CAN_DB: &str = "./data/can_db/motohawk.dbc";
pub const DEFAULT_CAN_WAIT_SECS: u64 = 200;
pub const DEFAULT_CAN_POLL_MS: u64 = 100;
pub const DEFAULT_JOIN_GRACE_SECS: u64 = 5;

#[derive(Debug, PartialEq, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SerialConfig {
    pub enabled: bool,
    pub device: String,
    pub filename: PathBuf,
    pub baudrate: u32,
    pub timeout_ms: u64,
    pub stall_threshold: u64,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            device: DEFAULT_SERIAL_DEVICE.to_string(),
            filename: PathBuf::from(DEFAULT_SERIAL_FILENAME),
            baudrate: DEFAULT_BAUDRATE,
            timeout_ms: DEFAULT_SERIAL_TIMEOUT_MS,
            stall_threshold: crate::data_capture::serial_capture::DEFAULT_STALL_THRESHOLD,
        }
    }
}

#[derive(Debug, PartialEq, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CanConfig {
    pub enabled: bool,
    pub device: String,
    pub filename: PathBuf,
    pub db: PathBuf,
    pub wait_secs: u64,
    pub poll_ms: u64,
}

impl Default for CanConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            device: DEFAULT_CAN_DEVICE.to_string(),
            filename: PathBuf::from(DEFAULT_CAN_FILENAME),
            db: PathBuf::from(DEFAULT_CAN_DB),
            wait_secs: DEFAULT_CAN_WAIT_SECS,
            poll_ms: DEFAULT_CAN_POLL_MS,
        }
    }
}
