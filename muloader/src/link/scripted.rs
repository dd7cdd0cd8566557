//! In-memory link replaying a scripted device.
//!
//! Reads and writes are kept independent. Running out of scripted input is
//! reported as a link timeout, the way an absent device would look.

use crate::error::{Error, Result};
use crate::link::LinkChannel;
use crate::protocol::StatusCode;
use std::collections::VecDeque;
use std::time::Duration;

#[derive(Debug, Default)]
pub(crate) struct ScriptedLink {
    incoming: VecDeque<u8>,
    written: Vec<u8>,
    close_calls: usize,
    closed: bool,
    fail_close: bool,
}

impl ScriptedLink {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Make `close` report an error after marking the link closed.
    pub(crate) fn failing_close() -> Self {
        Self {
            fail_close: true,
            ..Self::default()
        }
    }

    pub(crate) fn push_code(&mut self, code: StatusCode) -> &mut Self {
        self.incoming.push_back(code.encode());
        self
    }

    pub(crate) fn push_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.incoming.extend(bytes);
        self
    }

    pub(crate) fn push_line(&mut self, line: &str) -> &mut Self {
        self.incoming.extend(line.as_bytes());
        self.incoming.push_back(b'\n');
        self
    }

    pub(crate) fn written(&self) -> &[u8] {
        &self.written
    }

    pub(crate) fn remaining(&self) -> usize {
        self.incoming.len()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed
    }

    pub(crate) fn close_calls(&self) -> usize {
        self.close_calls
    }
}

impl LinkChannel for ScriptedLink {
    fn read_exact(&mut self, buf: &mut [u8], _timeout: Duration) -> Result<()> {
        if self.closed {
            return Err(Error::Link("link closed".into()));
        }
        if self.incoming.len() < buf.len() {
            self.incoming.clear();
            return Err(Error::LinkTimeout(format!(
                "script exhausted while waiting for {} bytes",
                buf.len()
            )));
        }
        for slot in buf.iter_mut() {
            if let Some(byte) = self.incoming.pop_front() {
                *slot = byte;
            }
        }
        Ok(())
    }

    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        if self.closed {
            return Err(Error::Link("link closed".into()));
        }
        self.written.extend_from_slice(bytes);
        Ok(())
    }

    fn bytes_available(&self) -> Result<usize> {
        Ok(self.incoming.len())
    }

    fn close(&mut self) -> Result<()> {
        self.close_calls += 1;
        self.closed = true;
        if self.fail_close {
            return Err(Error::Link("close failed".into()));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
