use clap::Parser;
use fieldrec::configuration::config::{Args, Config};
use fieldrec::configuration::types::{CanConfig, SerialConfig};
use fieldrec::data_capture::byte_source::SerialByteSource;
use fieldrec::session_management::capture_session::{
    BusPipeline, CaptureSession, PipelineSummary, SerialPipeline,
};
use fieldrec::storage::JsonFileSink;
use log::{error, info, warn};
use std::sync::Arc;
use std::time::Duration;

fn open_serial(config: &SerialConfig) -> Option<SerialPipeline> {
    let timeout = Duration::from_millis(config.timeout_ms);
    match SerialByteSource::open(&config.device, config.baudrate, timeout) {
        Ok(source) => Some(SerialPipeline {
            source: Box::new(source),
            stall_threshold: config.stall_threshold,
            target: config.filename.clone(),
        }),
        Err(e) => {
            error!("Unable to open serial device {}: {}", config.device, e);
            None
        }
    }
}

#[cfg(target_os = "linux")]
fn open_bus(config: &CanConfig) -> Option<BusPipeline> {
    use fieldrec::data_capture::can_source::SocketCanSource;
    use fieldrec::data_capture::dbc::DbcDatabase;

    let table = match DbcDatabase::from_file(&config.db) {
        Ok(db) => db,
        Err(e) => {
            error!("Unable to load CAN database {}: {}", config.db.display(), e);
            return None;
        }
    };

    match SocketCanSource::open(&config.device) {
        Ok(source) => Some(BusPipeline {
            source: Box::new(source),
            table: Arc::new(table),
            max_idle: Duration::from_secs(config.wait_secs),
            poll: Duration::from_millis(config.poll_ms),
            target: config.filename.clone(),
        }),
        Err(e) => {
            error!("Unable to open CAN interface {}: {}", config.device, e);
            None
        }
    }
}

#[cfg(not(target_os = "linux"))]
fn open_bus(config: &CanConfig) -> Option<BusPipeline> {
    error!(
        "CAN capture on {} requires SocketCAN, which is only available on Linux",
        config.device
    );
    None
}

fn report(name: &str, summary: &Option<PipelineSummary>) {
    let Some(summary) = summary else {
        return;
    };
    info!(
        "{}: {:?}, {} record(s) -> {}",
        name,
        summary.status,
        summary.records,
        summary.target.display()
    );
    if let Some(e) = &summary.persist_error {
        error!("{}: records could not be saved: {}", name, e);
    }
}

fn main() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .format_target(false)
        .init();

    info!("Importing configuration");

    let args = Args::parse();

    let config = Config::load(&args).unwrap_or_else(|e| {
        error!("Invalid configuration: {}", e);
        std::process::exit(1);
    });

    info!("Configuration imported successfully");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap_or_else(|e| {
            error!("Unable to build the async runtime: {}", e);
            std::process::exit(1);
        });

    let serial = if config.serial.enabled {
        open_serial(&config.serial)
    } else {
        None
    };
    let bus = if config.can.enabled {
        open_bus(&config.can)
    } else {
        None
    };

    if serial.is_none() && bus.is_none() {
        error!("No capture source could be opened, exiting...");
        std::process::exit(1);
    }

    let mut session =
        CaptureSession::new(Arc::new(JsonFileSink::new())).with_join_grace(config.join_grace());

    {
        let _guard = runtime.enter();

        if let Err(e) = session.start(serial, bus, config.duration()) {
            error!("Unable to start the capture session: {}", e);
            std::process::exit(1);
        }

        let token = session.cancellation_token();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Interrupt received, stopping capture");
                    token.cancel();
                }
                Err(e) => warn!("Unable to listen for Ctrl-C: {}", e),
            }
        });
    }

    let summary = match session.finish_on(runtime) {
        Ok(summary) => summary,
        Err(e) => {
            error!("Capture session failed: {}", e);
            std::process::exit(1);
        }
    };

    info!("[{}] Session ended: {:?}", summary.session_id, summary.outcome);
    report("serial", &summary.serial);
    report("CAN", &summary.bus);

    if !summary.all_persisted() {
        std::process::exit(1);
    }
}
