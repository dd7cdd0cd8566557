//! Per-tag bookkeeping and the session summary.

/// One physical tag's programming pass.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct TagSession {
    /// 1-based position in the batch.
    pub index: usize,
    /// Usable bytes reported by the device.
    pub token_capacity: u32,
    /// Payload offset where writing to this tag started.
    pub start_address: u64,
    /// Descriptive lines sent before the capacity (UID, type, ...).
    pub details: Vec<String>,
}

impl TagSession {
    /// Bytes written to this tag when the session address is `address`.
    pub fn written(&self, address: u64) -> u64 {
        address.saturating_sub(self.start_address)
    }
}

/// Outcome of a finished upload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct UploadReport {
    /// Bytes confirmed by readback.
    pub bytes_written: u64,
    /// Padded payload size announced to the device.
    pub expected_bytes: u64,
    /// Tags the device moved past.
    pub tags_programmed: usize,
    /// Blocks resent after a readback mismatch.
    pub block_retries: u64,
    /// Unexpected codes and device error reports.
    pub anomalies: u64,
    /// Whether the device sent `ALL_DONE`.
    pub all_done: bool,
}

impl UploadReport {
    /// Device confirmed completion and every byte was written.
    pub fn is_complete(&self) -> bool {
        self.all_done && self.bytes_written == self.expected_bytes
    }
}
