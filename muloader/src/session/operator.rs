//! Hooks into the human-facing layer.

use crate::error::Result;
use crate::session::TagSession;
use log::info;

/// Requests the session makes to whoever handles the physical tags.
///
/// The prompt methods block until the operator is ready. Returning an error
/// aborts the upload.
pub trait Operator {
    /// Ask for tag number `index` (1-based) to be placed on the reader.
    fn present_tag(&mut self, index: usize) -> Result<()>;

    /// Ask for the first tag of the set, to confirm the batch.
    fn present_first_tag(&mut self) -> Result<()>;

    /// Device metadata for a freshly presented tag was read.
    fn tag_started(&mut self, _tag: &TagSession) {}

    /// A block was verified; `written` of `total` bytes are on tags.
    fn block_committed(&mut self, _written: u64, _total: u64) {}

    /// The device moved past a tag after `written` bytes.
    fn tag_finished(&mut self, _tag: &TagSession, _written: u64) {}
}

impl<O: Operator + ?Sized> Operator for &mut O {
    fn present_tag(&mut self, index: usize) -> Result<()> {
        (**self).present_tag(index)
    }

    fn present_first_tag(&mut self) -> Result<()> {
        (**self).present_first_tag()
    }

    fn tag_started(&mut self, tag: &TagSession) {
        (**self).tag_started(tag);
    }

    fn block_committed(&mut self, written: u64, total: u64) {
        (**self).block_committed(written, total);
    }

    fn tag_finished(&mut self, tag: &TagSession, written: u64) {
        (**self).tag_finished(tag, written);
    }
}

/// Operator that never waits; prompts are only logged.
///
/// Suitable when the device detects tags on its own, or for scripted runs.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnattendedOperator;

impl Operator for UnattendedOperator {
    fn present_tag(&mut self, index: usize) -> Result<()> {
        info!("Waiting for tag #{index} on the reader");
        Ok(())
    }

    fn present_first_tag(&mut self) -> Result<()> {
        info!("Waiting for the first tag to confirm the batch");
        Ok(())
    }
}
