pub mod bus_capture;
pub mod byte_source;
#[cfg(target_os = "linux")]
pub mod can_source;
pub mod dbc;
pub mod framer;
pub mod serial_capture;
pub mod types;

pub use bus_capture::{BusCapture, DecodeTable, FrameSource};
pub use byte_source::{ByteSource, SerialByteSource};
#[cfg(target_os = "linux")]
pub use can_source::SocketCanSource;
pub use dbc::DbcDatabase;
pub use framer::StreamFramer;
pub use serial_capture::{SerialCapture, StallDetector};
pub use types::{
    BusFrame, BusRecord, CaptureEpoch, Message, MessageFamily, PipelineReport, PipelineStatus,
};
