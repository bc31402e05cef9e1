use std::io::{self, Read};
use std::time::Duration;

use log::{debug, info};

use crate::error_handling::types::SourceError;

/// Single-byte reader with a bounded wait.
///
/// `Ok(None)` means nothing arrived within the source's timeout; it is not an
/// error and callers keep polling. `Err(SourceError::Closed)` means the
/// source will never produce data again.
pub trait ByteSource: Send {
    fn read_byte(&mut self) -> Result<Option<u8>, SourceError>;
}

impl<S: ByteSource + ?Sized> ByteSource for Box<S> {
    fn read_byte(&mut self) -> Result<Option<u8>, SourceError> {
        (**self).read_byte()
    }
}

/// In-memory source, mostly useful for replaying recorded streams.
impl ByteSource for io::Cursor<Vec<u8>> {
    fn read_byte(&mut self) -> Result<Option<u8>, SourceError> {
        let mut buf = [0u8; 1];
        match self.read(&mut buf)? {
            0 => Err(SourceError::Closed),
            _ => Ok(Some(buf[0])),
        }
    }
}

/// Receiver attached to a serial port, 8N1.
///
/// Reads are performed in chunks and served one byte at a time, so a busy
/// receiver does not cost one syscall per byte.
pub struct SerialByteSource {
    port: Box<dyn serialport::SerialPort>,
    buf: Vec<u8>,
    pos: usize,
    filled: usize,
}

impl SerialByteSource {
    pub fn open(device: &str, baudrate: u32, timeout: Duration) -> Result<Self, SourceError> {
        debug!("Opening serial device {} at {} baud", device, baudrate);
        let port = serialport::new(device, baudrate)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .timeout(timeout)
            .open()
            .map_err(|e| SourceError::OpenFailed(format!("{}: {}", device, e)))?;
        info!("Serial device {} opened", device);
        Ok(Self {
            port,
            buf: vec![0u8; 512],
            pos: 0,
            filled: 0,
        })
    }
}

impl ByteSource for SerialByteSource {
    fn read_byte(&mut self) -> Result<Option<u8>, SourceError> {
        if self.pos == self.filled {
            self.pos = 0;
            self.filled = 0;
            match self.port.read(&mut self.buf) {
                Ok(0) => return Ok(None),
                Ok(n) => self.filled = n,
                Err(e) if e.kind() == io::ErrorKind::TimedOut => return Ok(None),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(None),
                Err(e) => return Err(SourceError::IoError(e)),
            }
        }
        let byte = self.buf[self.pos];
        self.pos += 1;
        Ok(Some(byte))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_source_yields_bytes_then_closes() {
        let mut src = io::Cursor::new(b"ab".to_vec());
        assert_eq!(src.read_byte().unwrap(), Some(b'a'));
        assert_eq!(src.read_byte().unwrap(), Some(b'b'));
        assert!(matches!(src.read_byte(), Err(SourceError::Closed)));
    }

    #[test]
    fn missing_serial_device_fails_to_open() {
        let res = SerialByteSource::open(
            "/dev/fieldrec-does-not-exist",
            115_200,
            Duration::from_millis(1),
        );
        assert!(matches!(res, Err(SourceError::OpenFailed(_))));
    }
}
