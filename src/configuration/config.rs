use super::types::*;
use crate::error_handling::types::ConfigError;
use clap::Parser;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Command-line arguments of the recorder.
///
/// Every setting can also be supplied from a TOML file with `--config`; in
/// that case the file is the single source of settings and the other flags
/// are ignored.
///
/// The underscore spellings of the historical recorder (`--enable_serial`,
/// `--CAN_device`, ...) are accepted as aliases.
///
/// # Examples
///
/// ```
/// use clap::Parser;
/// use fieldrec::configuration::config::{Args, Config};
///
/// let args = Args::parse_from(["fieldrec", "--enable-serial", "--end-time", "10"]);
/// let config = Config::load(&args).unwrap();
/// assert!(config.serial.enabled);
/// assert_eq!(config.end_time, Some(10));
/// ```
#[derive(Parser, Debug, Clone)]
#[command(name = "fieldrec")]
#[command(version)]
#[command(about = "Records a GNSS receiver stream and CAN bus traffic for offline analysis")]
pub struct Args {
    /// Read all settings from this TOML file instead of the command line
    #[arg(long, env = "FIELDREC_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable serial (GNSS receiver) logging
    #[arg(long, alias = "enable_serial", action = clap::ArgAction::SetTrue)]
    pub enable_serial: bool,

    /// The serial device to read from
    #[arg(long, default_value = DEFAULT_SERIAL_DEVICE, env = "FIELDREC_DEVICE")]
    pub device: String,

    /// The file the framed receiver messages are written to
    #[arg(long, alias = "serial_filename", default_value = DEFAULT_SERIAL_FILENAME)]
    pub serial_filename: PathBuf,

    /// Serial baud rate
    #[arg(long, default_value_t = DEFAULT_BAUDRATE)]
    pub baudrate: u32,

    /// Stop recording after this many seconds; records indefinitely when absent
    #[arg(long, alias = "end_time")]
    pub end_time: Option<u64>,

    /// Serial read timeout in milliseconds (one empty poll)
    #[arg(long, default_value_t = DEFAULT_SERIAL_TIMEOUT_MS)]
    pub serial_timeout_ms: u64,

    /// Consecutive empty serial polls tolerated before the receiver is
    /// declared stalled
    #[arg(long, default_value_t = crate::data_capture::serial_capture::DEFAULT_STALL_THRESHOLD)]
    pub stall_threshold: u64,

    /// Enable CAN bus logging
    #[arg(long, alias = "enable_CAN", action = clap::ArgAction::SetTrue)]
    pub enable_can: bool,

    /// The CAN interface to read from
    #[arg(
        long,
        alias = "CAN_device",
        default_value = DEFAULT_CAN_DEVICE,
        env = "FIELDREC_CAN_DEVICE"
    )]
    pub can_device: String,

    /// The file decoded CAN records are written to
    #[arg(long, alias = "CAN_filename", default_value = DEFAULT_CAN_FILENAME)]
    pub can_filename: PathBuf,

    /// The CAN database (DBC) file
    #[arg(long, alias = "CAN_db", default_value = DEFAULT_CAN_DB)]
    pub can_db: PathBuf,

    /// Seconds of bus silence after which CAN capture ends
    #[arg(long, default_value_t = DEFAULT_CAN_WAIT_SECS)]
    pub can_wait_secs: u64,

    /// Seconds to wait for a pipeline to stop once shutdown was requested
    #[arg(long, default_value_t = DEFAULT_JOIN_GRACE_SECS)]
    pub join_grace_secs: u64,
}

/// Runtime configuration of the recorder.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Relative capture duration in seconds
    pub end_time: Option<u64>,
    pub join_grace_secs: u64,
    pub serial: SerialConfig,
    pub can: CanConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            end_time: None,
            join_grace_secs: DEFAULT_JOIN_GRACE_SECS,
            serial: SerialConfig::default(),
            can: CanConfig::default(),
        }
    }
}

impl Config {
    /// Builds the configuration from parsed arguments, reading the TOML file
    /// when `--config` was given, and validates it.
    pub fn load(args: &Args) -> Result<Self, ConfigError> {
        let config = match &args.config {
            Some(path) => Self::from_file(path)?,
            None => Self::from_args(args),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_args(args: &Args) -> Self {
        Self {
            end_time: args.end_time,
            join_grace_secs: args.join_grace_secs,
            serial: SerialConfig {
                enabled: args.enable_serial,
                device: args.device.clone(),
                filename: args.serial_filename.clone(),
                baudrate: args.baudrate,
                timeout_ms: args.serial_timeout_ms,
                stall_threshold: args.stall_threshold,
            },
            can: CanConfig {
                enabled: args.enable_can,
                device: args.can_device.clone(),
                filename: args.can_filename.clone(),
                db: args.can_db.clone(),
                wait_secs: args.can_wait_secs,
                poll_ms: DEFAULT_CAN_POLL_MS,
            },
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| ConfigError::TomlError(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.serial.enabled && !self.can.enabled {
            return Err(ConfigError::NothingEnabled);
        }
        if self.serial.enabled && self.serial.baudrate == 0 {
            return Err(ConfigError::BadBaudrate(self.serial.baudrate));
        }
        if self.end_time == Some(0) {
            return Err(ConfigError::NotInRange("end_time must be at least 1 second".into()));
        }
        if self.serial.stall_threshold == 0 {
            return Err(ConfigError::NotInRange("stall_threshold must be non-zero".into()));
        }
        if self.can.enabled && (self.can.wait_secs == 0 || self.can.poll_ms == 0) {
            return Err(ConfigError::NotInRange(
                "CAN wait and poll intervals must be non-zero".into(),
            ));
        }
        Ok(())
    }

    pub fn duration(&self) -> Option<Duration> {
        self.end_time.map(Duration::from_secs)
    }

    pub fn join_grace(&self) -> Duration {
        Duration::from_secs(self.join_grace_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    #[serial]
    fn test_defaults_from_args() {
        let args = Args::try_parse_from(["fieldrec", "--enable-serial"]).unwrap();
        let config = Config::load(&args).unwrap();
        assert!(config.serial.enabled);
        assert!(!config.can.enabled);
        assert_eq!(config.serial.device, "/dev/ttyACM0");
        assert_eq!(config.serial.baudrate, 115_200);
        assert_eq!(config.serial.stall_threshold, 500_000);
        assert_eq!(config.can.wait_secs, 200);
        assert_eq!(config.duration(), None);
    }

    #[test]
    #[serial]
    fn test_historical_flag_spellings() {
        let args = Args::try_parse_from([
            "fieldrec",
            "--enable_CAN",
            "--CAN_device",
            "can1",
            "--CAN_filename",
            "/tmp/can.json",
            "--end_time",
            "10",
        ])
        .unwrap();
        let config = Config::load(&args).unwrap();
        assert!(config.can.enabled);
        assert_eq!(config.can.device, "can1");
        assert_eq!(config.can.filename, PathBuf::from("/tmp/can.json"));
        assert_eq!(config.duration(), Some(Duration::from_secs(10)));
    }

    #[test]
    #[serial]
    fn test_nothing_enabled_is_rejected() {
        let args = Args::try_parse_from(["fieldrec"]).unwrap();
        assert!(matches!(Config::load(&args), Err(ConfigError::NothingEnabled)));
    }

    #[test]
    #[serial]
    fn test_zero_values_are_rejected() {
        let args =
            Args::try_parse_from(["fieldrec", "--enable-serial", "--baudrate", "0"]).unwrap();
        assert!(matches!(Config::load(&args), Err(ConfigError::BadBaudrate(0))));

        let args =
            Args::try_parse_from(["fieldrec", "--enable-serial", "--end-time", "0"]).unwrap();
        assert!(matches!(Config::load(&args), Err(ConfigError::NotInRange(_))));
    }

    #[test]
    #[serial]
    fn test_device_from_environment() {
        std::env::set_var("FIELDREC_DEVICE", "/dev/ttyUSB3");
        let args = Args::try_parse_from(["fieldrec", "--enable-serial"]);
        std::env::remove_var("FIELDREC_DEVICE");
        assert_eq!(args.unwrap().device, "/dev/ttyUSB3");
    }

    #[test]
    fn test_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
end_time = 30

[serial]
enabled = true
device = "/dev/ttyUSB0"
baudrate = 38400

[can]
enabled = true
db = "/opt/dbc/vehicle.dbc"
"#
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        config.validate().unwrap();
        assert_eq!(config.end_time, Some(30));
        assert_eq!(config.serial.device, "/dev/ttyUSB0");
        assert_eq!(config.serial.baudrate, 38_400);
        assert_eq!(config.serial.filename, PathBuf::from(DEFAULT_SERIAL_FILENAME));
        assert_eq!(config.can.db, PathBuf::from("/opt/dbc/vehicle.dbc"));
        assert_eq!(config.can.device, "vcan0");
    }

    #[test]
    fn test_unknown_key_in_file_is_rejected() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[serial]\nbaud = 9600").unwrap();
        assert!(matches!(
            Config::from_file(file.path()),
            Err(ConfigError::TomlError(_))
        ));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        assert!(matches!(
            Config::from_file(Path::new("/nonexistent/fieldrec.toml")),
            Err(ConfigError::IoError(_))
        ));
    }
}
