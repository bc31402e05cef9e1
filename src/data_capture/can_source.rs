//! SocketCAN frame source (Linux only).

use std::io;
use std::time::Duration;

use log::{debug, info, trace};
use socketcan::{CanFrame, CanSocket, EmbeddedFrame, Frame, Socket};

use crate::error_handling::types::SourceError;

use super::bus_capture::FrameSource;
use super::types::BusFrame;

pub struct SocketCanSource {
    interface: String,
    socket: CanSocket,
    timeout: Option<Duration>,
}

impl SocketCanSource {
    pub fn open(interface: &str) -> Result<Self, SourceError> {
        let socket = CanSocket::open(interface)
            .map_err(|e| SourceError::OpenFailed(format!("{}: {}", interface, e)))?;
        info!("CAN interface {} opened", interface);
        Ok(Self {
            interface: interface.to_string(),
            socket,
            timeout: None,
        })
    }
}

impl FrameSource for SocketCanSource {
    fn recv(&mut self, wait: Duration) -> Result<Option<BusFrame>, SourceError> {
        if self.timeout != Some(wait) {
            self.socket.set_read_timeout(wait)?;
            self.timeout = Some(wait);
            debug!("{}: read timeout set to {:?}", self.interface, wait);
        }

        match self.socket.read_frame() {
            Ok(CanFrame::Error(e)) => {
                trace!("{}: error frame {:?}", self.interface, e);
                Ok(None)
            }
            Ok(frame) => Ok(Some(BusFrame {
                arbitration_id: frame.raw_id(),
                data: frame.data().to_vec(),
                device_timestamp: None,
            })),
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
                ) =>
            {
                Ok(None)
            }
            Err(e) => Err(SourceError::IoError(e)),
        }
    }
}
