//! Serial link implementation using the `serialport` crate.

use {
    crate::{
        error::{Error, Result},
        is_interrupted_requested,
        link::{LinkChannel, LinkConfig},
    },
    log::{debug, trace},
    serialport::{DataBits, FlowControl, Parity, StopBits},
    std::{
        io::{ErrorKind, Read, Write},
        time::{Duration, Instant},
    },
};

/// Longest single blocking read; the interrupt checker is polled in between.
const POLL_SLICE: Duration = Duration::from_millis(100);

/// Serial connection to the tag-writer device (8N1, no flow control).
pub struct SerialLink {
    port: Option<Box<dyn serialport::SerialPort>>,
    name: String,
    port_timeout: Duration,
}

impl SerialLink {
    /// Open a serial port with the given configuration.
    pub fn open(config: &LinkConfig) -> Result<Self> {
        debug!(
            "Opening {} at {} baud",
            config.port_name, config.baud_rate
        );
        let port = serialport::new(&config.port_name, config.baud_rate)
            .timeout(config.timeout)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .open()?;

        Ok(Self {
            port: Some(port),
            name: config.port_name.clone(),
            port_timeout: config.timeout,
        })
    }

    /// Open a serial port at the default baud rate.
    pub fn open_simple(port_name: &str) -> Result<Self> {
        Self::open(&LinkConfig::new(port_name))
    }

    fn port_mut(&mut self) -> Result<&mut Box<dyn serialport::SerialPort>> {
        self.port
            .as_mut()
            .ok_or_else(|| Error::Link(format!("{} is closed", self.name)))
    }

    fn set_port_timeout(&mut self, timeout: Duration) -> Result<()> {
        if timeout != self.port_timeout {
            self.port_mut()?.set_timeout(timeout)?;
            self.port_timeout = timeout;
        }
        Ok(())
    }
}

impl LinkChannel for SerialLink {
    fn read_exact(&mut self, buf: &mut [u8], timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut filled = 0;

        while filled < buf.len() {
            if is_interrupted_requested() {
                return Err(Error::Interrupted);
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Error::LinkTimeout(format!(
                    "{}: got {filled} of {} bytes in {} ms",
                    self.name,
                    buf.len(),
                    timeout.as_millis()
                )));
            }

            self.set_port_timeout(remaining.min(POLL_SLICE))?;
            match self.port_mut()?.read(&mut buf[filled..]) {
                Ok(0) => {},
                Ok(n) => {
                    trace!("RX {:02X?}", &buf[filled..filled + n]);
                    filled += n;
                },
                Err(e) if e.kind() == ErrorKind::TimedOut => {},
                Err(e) if e.kind() == ErrorKind::Interrupted => {},
                Err(e) => return Err(Error::Io(e)),
            }
        }

        Ok(())
    }

    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        trace!("TX {bytes:02X?}");
        let port = self.port_mut()?;
        port.write_all(bytes)?;
        port.flush()?;
        Ok(())
    }

    fn bytes_available(&self) -> Result<usize> {
        let port = self
            .port
            .as_ref()
            .ok_or_else(|| Error::Link(format!("{} is closed", self.name)))?;
        Ok(port.bytes_to_read()? as usize)
    }

    fn close(&mut self) -> Result<()> {
        if self.port.take().is_some() {
            debug!("Closed {}", self.name);
        }
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for SerialLink {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
