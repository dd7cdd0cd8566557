//! Fixed-size block source for the upload payload.
//!
//! The payload is cut into 16-byte blocks. The last block is padded with
//! [`FILL_BYTE`], so the device always receives whole blocks and the size
//! announced with `CODE_META` is a multiple of [`BLOCK_SIZE`].

use crate::error::{Error, Result};
use log::trace;
use std::fs::File;
use std::io::{BufReader, Cursor, Read};
use std::path::Path;

/// Size of one tag block in bytes.
pub const BLOCK_SIZE: usize = 16;

/// Padding byte for the final block.
pub const FILL_BYTE: u8 = 0xFF;

/// Round a payload length up to a whole number of blocks.
#[must_use]
pub fn padded_size(len: u64) -> u64 {
    len.div_ceil(BLOCK_SIZE as u64) * BLOCK_SIZE as u64
}

/// One 16-byte block and its offset in the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    address: u64,
    data: [u8; BLOCK_SIZE],
}

impl Block {
    /// Payload offset of the first byte.
    pub fn address(&self) -> u64 {
        self.address
    }

    /// Block contents, padding included.
    pub fn data(&self) -> &[u8; BLOCK_SIZE] {
        &self.data
    }

    /// Index of the first byte that differs from `readback`, if any.
    pub fn first_mismatch(&self, readback: &[u8; BLOCK_SIZE]) -> Option<usize> {
        self.data
            .iter()
            .zip(readback)
            .position(|(sent, echoed)| sent != echoed)
    }
}

/// Reads a payload as a sequence of padded blocks.
pub struct BlockSource<R: Read> {
    reader: R,
    original_len: u64,
    consumed: u64,
}

impl<R: Read> BlockSource<R> {
    /// Wrap a reader holding exactly `original_len` bytes.
    pub fn new(reader: R, original_len: u64) -> Result<Self> {
        if original_len == 0 {
            return Err(Error::EmptyPayload);
        }
        Ok(Self {
            reader,
            original_len,
            consumed: 0,
        })
    }

    /// Unpadded payload length.
    pub fn original_size(&self) -> u64 {
        self.original_len
    }

    /// Payload length rounded up to whole blocks.
    pub fn total_padded_size(&self) -> u64 {
        padded_size(self.original_len)
    }

    /// Number of blocks this source produces in total.
    pub fn block_count(&self) -> u64 {
        self.total_padded_size() / BLOCK_SIZE as u64
    }

    /// Whether every block has been handed out.
    pub fn is_exhausted(&self) -> bool {
        self.consumed >= self.original_len
    }

    /// Produce the next block, or `None` once the payload is exhausted.
    #[allow(clippy::cast_possible_truncation)] // bounded by BLOCK_SIZE
    pub fn next_block(&mut self) -> Result<Option<Block>> {
        if self.is_exhausted() {
            return Ok(None);
        }

        let take = (self.original_len - self.consumed).min(BLOCK_SIZE as u64) as usize;
        let mut data = [FILL_BYTE; BLOCK_SIZE];
        self.reader.read_exact(&mut data[..take])?;

        let block = Block {
            address: self.consumed,
            data,
        };
        self.consumed += take as u64;

        if take < BLOCK_SIZE {
            trace!(
                "Block @{} padded with {} fill bytes",
                block.address,
                BLOCK_SIZE - take
            );
        }
        Ok(Some(block))
    }
}

impl BlockSource<Cursor<Vec<u8>>> {
    /// Build a source from an in-memory payload.
    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        let len = data.len() as u64;
        Self::new(Cursor::new(data), len)
    }
}

impl BlockSource<BufReader<File>> {
    /// Open a payload file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let len = file.metadata()?.len();
        Self::new(BufReader::new(file), len)
    }
}
