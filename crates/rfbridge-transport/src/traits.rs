use std::time::Duration;

use bytes::{Bytes, BytesMut};

use crate::error::Result;

/// A byte-oriented link to one attached microcontroller.
///
/// The device speaks newline-terminated lines in both directions. A link is
/// owned by exactly one worker at a time, so implementations only need to be
/// `Send`.
pub trait SerialLink: Send {
    /// Human-readable link name for diagnostics (port path, simulator name).
    fn name(&self) -> &str;

    /// Write raw bytes to the device.
    fn write(&mut self, data: &[u8]) -> Result<()>;

    /// Block until written bytes have been handed to the device.
    fn flush(&mut self) -> Result<()>;

    /// Discard any received bytes that have not been read yet.
    fn flush_input(&mut self) -> Result<()>;

    /// Discard any written bytes that have not been transmitted yet.
    fn flush_output(&mut self) -> Result<()>;

    /// Read one line, waiting at most `timeout`.
    ///
    /// Returns `Ok(None)` when the timeout elapses without a complete line.
    /// `Ok(Some(line))` carries the line without its trailing `\r\n` and may
    /// be empty if the device sent a bare newline.
    fn read_line(&mut self, timeout: Duration) -> Result<Option<Bytes>>;

    /// Number of received bytes ready to be read.
    fn bytes_available(&mut self) -> Result<usize>;

    /// Release the underlying device. Further calls fail with `Closed`.
    fn close(&mut self) -> Result<()>;
}

impl<L: SerialLink + ?Sized> SerialLink for Box<L> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        (**self).write(data)
    }

    fn flush(&mut self) -> Result<()> {
        (**self).flush()
    }

    fn flush_input(&mut self) -> Result<()> {
        (**self).flush_input()
    }

    fn flush_output(&mut self) -> Result<()> {
        (**self).flush_output()
    }

    fn read_line(&mut self, timeout: Duration) -> Result<Option<Bytes>> {
        (**self).read_line(timeout)
    }

    fn bytes_available(&mut self) -> Result<usize> {
        (**self).bytes_available()
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}

/// Split the first complete line off `buf`.
///
/// Returns `None` if `buf` holds no newline yet. The returned line has its
/// `\n` and an optional preceding `\r` removed; other bytes (including the
/// packet sentinel) are kept.
pub fn take_line(buf: &mut BytesMut) -> Option<Bytes> {
    let pos = buf.iter().position(|&b| b == b'\n')?;
    let mut line = buf.split_to(pos + 1);
    line.truncate(pos);
    if line.last() == Some(&b'\r') {
        line.truncate(pos - 1);
    }
    Some(line.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_line_waits_for_newline() {
        let mut buf = BytesMut::from(&b"10tp ev"[..]);
        assert!(take_line(&mut buf).is_none());
        assert_eq!(buf.as_ref(), b"10tp ev");
    }

    #[test]
    fn take_line_strips_crlf_and_keeps_rest() {
        let mut buf = BytesMut::from(&b":next:\r\n20tp"[..]);
        let line = take_line(&mut buf).unwrap();
        assert_eq!(line.as_ref(), b":next:");
        assert_eq!(buf.as_ref(), b"20tp");
    }

    #[test]
    fn take_line_keeps_sentinel() {
        let mut buf = BytesMut::from(&b"30tp rq\x17\n"[..]);
        let line = take_line(&mut buf).unwrap();
        assert_eq!(line.as_ref(), b"30tp rq\x17");
        assert!(buf.is_empty());
    }

    #[test]
    fn take_line_returns_empty_present_line() {
        let mut buf = BytesMut::from(&b"\n"[..]);
        let line = take_line(&mut buf).unwrap();
        assert!(line.is_empty());
    }
}
