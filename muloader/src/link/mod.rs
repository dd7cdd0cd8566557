//! Link abstraction between the upload session and the tag-writer device.
//!
//! The session only needs a small duplex contract: blocking reads bounded by
//! an explicit timeout, exact writes, a non-blocking "bytes available" query
//! and an idempotent close. [`LinkChannel`] captures that contract so the
//! protocol logic stays independent of the transport.
//!
//! ```text
//! +------------------+
//! |  UploadSession   |
//! +--------+---------+
//!          |
//!          v
//! +--------+---------+
//! |   LinkChannel    |
//! +--------+---------+
//!          |
//!          v
//! +--------+---------+
//! |    SerialLink    |
//! |   (serialport)   |
//! +------------------+
//! ```

#[cfg(feature = "native")]
pub mod detect;
#[cfg(feature = "native")]
pub mod serial;

#[cfg(test)]
pub(crate) mod scripted;

use crate::error::{Error, Result};
use crate::protocol::BAUD_RATE;
use std::time::{Duration, Instant};

#[cfg(feature = "native")]
pub use detect::{DeviceKind, PortInfo, list_ports};
#[cfg(feature = "native")]
pub use serial::SerialLink;

/// Longest metadata line accepted from the device.
pub const MAX_LINE_LEN: usize = 256;

/// Link configuration.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Port name/path (e.g., "/dev/ttyUSB0", "COM3").
    pub port_name: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Timeout for a single low-level read or write.
    pub timeout: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: BAUD_RATE,
            timeout: Duration::from_millis(100),
        }
    }
}

impl LinkConfig {
    /// Create a configuration for the given port at the default baud rate.
    pub fn new(port_name: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            ..Default::default()
        }
    }

    /// Set the baud rate.
    #[must_use]
    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    /// Set the low-level timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Duplex byte channel to the tag-writer device.
pub trait LinkChannel {
    /// Fill `buf` completely, or fail with [`Error::LinkTimeout`] once
    /// `timeout` has elapsed.
    fn read_exact(&mut self, buf: &mut [u8], timeout: Duration) -> Result<()>;

    /// Write all bytes and flush.
    fn write(&mut self, bytes: &[u8]) -> Result<()>;

    /// Number of received bytes not yet read. Never blocks.
    fn bytes_available(&self) -> Result<usize>;

    /// Release the channel. Calling it again is a no-op.
    fn close(&mut self) -> Result<()>;

    /// Human-readable channel name.
    fn name(&self) -> &str;

    /// Read a single byte.
    fn read_byte(&mut self, timeout: Duration) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.read_exact(&mut buf, timeout)?;
        Ok(buf[0])
    }

    /// Read one newline-terminated ASCII line, without the terminator.
    ///
    /// A trailing `\r` is dropped as well. The whole line must arrive within
    /// `timeout`.
    fn read_line(&mut self, timeout: Duration) -> Result<String> {
        let deadline = Instant::now() + timeout;
        let mut line = Vec::new();

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Error::LinkTimeout(format!(
                    "incomplete line after {} ms ({} bytes)",
                    timeout.as_millis(),
                    line.len()
                )));
            }

            match self.read_byte(remaining)? {
                b'\n' => break,
                byte => {
                    if line.len() >= MAX_LINE_LEN {
                        return Err(Error::Protocol(format!(
                            "line longer than {MAX_LINE_LEN} bytes"
                        )));
                    }
                    line.push(byte);
                },
            }
        }

        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Ok(String::from_utf8_lossy(&line).into_owned())
    }
}

impl<L: LinkChannel + ?Sized> LinkChannel for &mut L {
    fn read_exact(&mut self, buf: &mut [u8], timeout: Duration) -> Result<()> {
        (**self).read_exact(buf, timeout)
    }

    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        (**self).write(bytes)
    }

    fn bytes_available(&self) -> Result<usize> {
        (**self).bytes_available()
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }

    fn name(&self) -> &str {
        (**self).name()
    }

    fn read_byte(&mut self, timeout: Duration) -> Result<u8> {
        (**self).read_byte(timeout)
    }

    fn read_line(&mut self, timeout: Duration) -> Result<String> {
        (**self).read_line(timeout)
    }
}
