use std::io::{self, ErrorKind, Read, Write};
use std::thread;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use serialport::{ClearBuffer, SerialPort};
use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::traits::{take_line, SerialLink};

/// Baud rate the microcontroller firmware is built for.
pub const DEFAULT_BAUD_RATE: u32 = 500_000;

const INITIAL_BUFFER_CAPACITY: usize = 1024;
const READ_CHUNK_SIZE: usize = 256;

/// Configuration for a real serial link.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Device name (`ttyUSB0`) or absolute path (`/dev/ttyUSB0`).
    pub port: String,
    /// Line speed. Default: 500000.
    pub baud_rate: u32,
    /// Default timeout applied to blocking reads.
    pub read_timeout: Duration,
    /// Time to wait after opening before flushing. Most boards reset when
    /// the port is opened and print boot noise.
    pub settle_delay: Duration,
}

impl SerialConfig {
    /// Create a config for `port` with default line settings.
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            ..Self::default()
        }
    }

    /// Absolute device path. Bare names are resolved under `/dev`.
    pub fn device_path(&self) -> String {
        if self.port.starts_with('/') {
            self.port.clone()
        } else {
            format!("/dev/{}", self.port)
        }
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout: Duration::from_millis(500),
            settle_delay: Duration::from_millis(500),
        }
    }
}

/// Serial link backed by an OS serial device.
pub struct SerialPortLink {
    name: String,
    port: Option<Box<dyn SerialPort>>,
    buf: BytesMut,
}

impl SerialPortLink {
    /// Open the device, wait for it to settle and discard anything it
    /// printed while booting.
    pub fn open(config: &SerialConfig) -> Result<Self> {
        let path = config.device_path();
        let port = serialport::new(&path, config.baud_rate)
            .timeout(config.read_timeout)
            .open()
            .map_err(|source| TransportError::Open {
                port: path.clone(),
                source,
            })?;

        info!(port = %path, baud_rate = config.baud_rate, "opened serial port");

        let mut link = Self {
            name: path,
            port: Some(port),
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
        };

        if !config.settle_delay.is_zero() {
            thread::sleep(config.settle_delay);
        }
        link.flush_input()?;
        link.flush_output()?;

        Ok(link)
    }

    fn port_mut(&mut self) -> Result<&mut Box<dyn SerialPort>> {
        self.port.as_mut().ok_or(TransportError::Closed)
    }
}

impl SerialLink for SerialPortLink {
    fn name(&self) -> &str {
        &self.name
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        let port = self.port_mut()?;
        let mut offset = 0usize;
        while offset < data.len() {
            match port.write(&data[offset..]) {
                Ok(0) => return Err(TransportError::Closed),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(TransportError::Io(err)),
            }
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        let port = self.port_mut()?;
        loop {
            match port.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(TransportError::Io(err)),
            }
        }
    }

    fn flush_input(&mut self) -> Result<()> {
        self.port_mut()?.clear(ClearBuffer::Input)?;
        self.buf.clear();
        Ok(())
    }

    fn flush_output(&mut self) -> Result<()> {
        self.port_mut()?.clear(ClearBuffer::Output)?;
        Ok(())
    }

    fn read_line(&mut self, timeout: Duration) -> Result<Option<Bytes>> {
        let port = self.port.as_mut().ok_or(TransportError::Closed)?;
        let deadline = Instant::now() + timeout;

        loop {
            if let Some(line) = take_line(&mut self.buf) {
                return Ok(Some(line));
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            port.set_timeout(deadline - now)?;

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let result = port.read(&mut chunk);
            match classify_read(result, deadline, Instant::now())? {
                ReadStep::Data(n) => self.buf.extend_from_slice(&chunk[..n]),
                ReadStep::Retry => continue,
                ReadStep::TimedOut => return Ok(None),
            }
        }
    }

    fn bytes_available(&mut self) -> Result<usize> {
        let pending = self.port_mut()?.bytes_to_read()? as usize;
        Ok(pending + self.buf.len())
    }

    fn close(&mut self) -> Result<()> {
        if self.port.take().is_some() {
            debug!(port = %self.name, "closed serial port");
        }
        self.buf.clear();
        Ok(())
    }
}

/// What one port read means for the line being assembled.
#[derive(Debug, PartialEq, Eq)]
enum ReadStep {
    Data(usize),
    Retry,
    TimedOut,
}

/// Interpret a port read made while waiting for a line due at `deadline`.
///
/// A zero-byte read before the deadline means the device went away (USB
/// unplug on most platforms); after the deadline it is an ordinary timeout.
fn classify_read(result: io::Result<usize>, deadline: Instant, now: Instant) -> Result<ReadStep> {
    match result {
        Ok(0) if now < deadline => Err(TransportError::Closed),
        Ok(0) => Ok(ReadStep::TimedOut),
        Ok(n) => Ok(ReadStep::Data(n)),
        Err(err) if err.kind() == ErrorKind::Interrupted => Ok(ReadStep::Retry),
        Err(err) if err.kind() == ErrorKind::TimedOut || err.kind() == ErrorKind::WouldBlock => {
            Ok(ReadStep::TimedOut)
        }
        Err(err) => Err(TransportError::Io(err)),
    }
}

impl std::fmt::Debug for SerialPortLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialPortLink")
            .field("name", &self.name)
            .field("open", &self.port.is_some())
            .field("buffered", &self.buf.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_path_resolves_bare_names() {
        assert_eq!(SerialConfig::new("ttyUSB0").device_path(), "/dev/ttyUSB0");
        assert_eq!(
            SerialConfig::new("/dev/serial/by-id/arduino").device_path(),
            "/dev/serial/by-id/arduino"
        );
    }

    #[test]
    fn default_config_matches_firmware() {
        let cfg = SerialConfig::default();
        assert_eq!(cfg.baud_rate, 500_000);
        assert_eq!(cfg.read_timeout, Duration::from_millis(500));
    }

    #[test]
    fn open_missing_device_reports_port() {
        let cfg = SerialConfig {
            settle_delay: Duration::ZERO,
            ..SerialConfig::new("/dev/rfbridge-test-missing-port")
        };
        let err = SerialPortLink::open(&cfg).unwrap_err();
        match err {
            TransportError::Open { port, .. } => {
                assert_eq!(port, "/dev/rfbridge-test-missing-port");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn zero_byte_read_before_deadline_is_disconnect() {
        let now = Instant::now();
        let deadline = now + Duration::from_millis(200);
        assert!(matches!(
            classify_read(Ok(0), deadline, now),
            Err(TransportError::Closed)
        ));
    }

    #[test]
    fn zero_byte_read_at_deadline_is_timeout() {
        let now = Instant::now();
        assert_eq!(classify_read(Ok(0), now, now).unwrap(), ReadStep::TimedOut);
    }

    #[test]
    fn read_results_map_to_steps() {
        let now = Instant::now();
        let deadline = now + Duration::from_millis(200);
        assert_eq!(
            classify_read(Ok(12), deadline, now).unwrap(),
            ReadStep::Data(12)
        );
        assert_eq!(
            classify_read(Err(ErrorKind::Interrupted.into()), deadline, now).unwrap(),
            ReadStep::Retry
        );
        assert_eq!(
            classify_read(Err(ErrorKind::TimedOut.into()), deadline, now).unwrap(),
            ReadStep::TimedOut
        );
        assert!(matches!(
            classify_read(Err(ErrorKind::BrokenPipe.into()), deadline, now),
            Err(TransportError::Io(_))
        ));
    }
}
