//! Single-byte status codes exchanged with the tag-writer device.
//!
//! Every command and every event on the link is one ASCII byte. Payload data
//! only travels after [`StatusCode::CodeBegin`] (16 raw bytes) and after
//! [`StatusCode::CodeMeta`] (decimal digits of the padded payload size).
//!
//! ```text
//! host                          device
//!  |  <------------- INIT_OK ------ |
//!  |  -- CODE_META "1024" -------> |
//!  |  <------------ COMMAND_OK --- |
//!  |  <------------ TAG_WAITING -- |
//!  |  -- TAG_NEXT ---------------> |
//!  |  <------ 4 metadata lines --- |
//!  |  <--------- BUFFER_WAITING -- |
//!  |  -- CODE_BEGIN + 16 bytes --> |
//!  |  <------------- BUFFER_OK --- |
//!  |  <------ 16 bytes readback -- |
//!  |  -- BUFFER_OK --------------> |
//! ```

use crate::error::{Error, Result};
use std::fmt;

/// Default link speed of the tag-writer firmware.
pub const BAUD_RATE: u32 = 115_200;

/// Status and command codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum StatusCode {
    /// Command accepted.
    CommandOk = b'A',
    /// Command rejected.
    CommandError = b'B',
    /// Host command: payload size follows.
    CodeMeta = b'C',
    /// Host command: one 16-byte block follows.
    CodeBegin = b'D',
    /// Tag accepted (the presented tag is the first one).
    TagOk = b'E',
    /// Writing a block to the tag failed.
    TagErrorWrite = b'F',
    /// Reading a block back from the tag failed.
    TagErrorRead = b'G',
    /// Tag readback did not match the written block.
    TagErrorVerify = b'H',
    /// Advance to the next tag.
    TagNext = b'I',
    /// Device waits for a tag.
    TagWaiting = b'J',
    /// Current tag is the first tag of the set.
    TagFirst = b'K',
    /// Presented tag is not the first tag.
    TagNotFirst = b'L',
    /// Block received or verified.
    BufferOk = b'M',
    /// Block verification failed.
    BufferError = b'N',
    /// Device asks to repeat the block.
    BufferRepeat = b'O',
    /// Device is ready to receive a block.
    BufferWaiting = b'P',
    /// Whole payload stored.
    AllDone = b'Q',
    /// Device booted and ready.
    InitOk = b'R',
    /// Device is rewriting tag metadata.
    TagUpdatingMeta = b'S',
}

impl StatusCode {
    /// All codes, in wire order.
    pub const ALL: [Self; 19] = [
        Self::CommandOk,
        Self::CommandError,
        Self::CodeMeta,
        Self::CodeBegin,
        Self::TagOk,
        Self::TagErrorWrite,
        Self::TagErrorRead,
        Self::TagErrorVerify,
        Self::TagNext,
        Self::TagWaiting,
        Self::TagFirst,
        Self::TagNotFirst,
        Self::BufferOk,
        Self::BufferError,
        Self::BufferRepeat,
        Self::BufferWaiting,
        Self::AllDone,
        Self::InitOk,
        Self::TagUpdatingMeta,
    ];

    /// Decode a wire byte.
    pub fn decode(byte: u8) -> Result<Self> {
        Ok(match byte {
            b'A' => Self::CommandOk,
            b'B' => Self::CommandError,
            b'C' => Self::CodeMeta,
            b'D' => Self::CodeBegin,
            b'E' => Self::TagOk,
            b'F' => Self::TagErrorWrite,
            b'G' => Self::TagErrorRead,
            b'H' => Self::TagErrorVerify,
            b'I' => Self::TagNext,
            b'J' => Self::TagWaiting,
            b'K' => Self::TagFirst,
            b'L' => Self::TagNotFirst,
            b'M' => Self::BufferOk,
            b'N' => Self::BufferError,
            b'O' => Self::BufferRepeat,
            b'P' => Self::BufferWaiting,
            b'Q' => Self::AllDone,
            b'R' => Self::InitOk,
            b'S' => Self::TagUpdatingMeta,
            other => return Err(Error::UnknownCode(other)),
        })
    }

    /// Encode to the wire byte.
    pub fn encode(self) -> u8 {
        self as u8
    }

    /// Protocol name, as used in device logs.
    pub fn name(self) -> &'static str {
        match self {
            Self::CommandOk => "COMMAND_OK",
            Self::CommandError => "COMMAND_ERROR",
            Self::CodeMeta => "CODE_META",
            Self::CodeBegin => "CODE_BEGIN",
            Self::TagOk => "TAG_OK",
            Self::TagErrorWrite => "TAG_ERROR_WRITE",
            Self::TagErrorRead => "TAG_ERROR_READ",
            Self::TagErrorVerify => "TAG_ERROR_VERIFY",
            Self::TagNext => "TAG_NEXT",
            Self::TagWaiting => "TAG_WAITING",
            Self::TagFirst => "TAG_FIRST",
            Self::TagNotFirst => "TAG_NOT_FIRST",
            Self::BufferOk => "BUFFER_OK",
            Self::BufferError => "BUFFER_ERROR",
            Self::BufferRepeat => "BUFFER_REPEAT",
            Self::BufferWaiting => "BUFFER_WAITING",
            Self::AllDone => "ALL_DONE",
            Self::InitOk => "INIT_OK",
            Self::TagUpdatingMeta => "TAG_UPDATING_META",
        }
    }

    /// Whether the device reports a failed tag operation.
    pub fn is_tag_error(self) -> bool {
        matches!(
            self,
            Self::TagErrorWrite | Self::TagErrorRead | Self::TagErrorVerify
        )
    }
}

impl TryFrom<u8> for StatusCode {
    type Error = Error;

    fn try_from(byte: u8) -> Result<Self> {
        Self::decode(byte)
    }
}

impl From<StatusCode> for u8 {
    fn from(code: StatusCode) -> Self {
        code.encode()
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
