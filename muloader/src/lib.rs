//! # muloader
//!
//! A library for uploading binary payloads to contactless tags.
//!
//! The host talks to a tag-writer board (a microcontroller with an RC522
//! reader) over a serial link. The board stores the payload in 16-byte
//! blocks across as many tags as the operator presents; this crate drives
//! the host side of that exchange:
//!
//! - Status code table shared with the firmware
//! - Payload blocking with `0xFF` padding
//! - Upload session state machine with readback verification
//! - Serial port discovery and the native serial link
//!
//! ## Features
//!
//! - `native` (default): Native serial port support via the `serialport` crate
//! - `serde`: Serialization support for reports and codes
//!
//! ## Example
//!
//! ```rust,no_run
//! use muloader::{BlockSource, SessionConfig, UnattendedOperator, UploadSession};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let source = BlockSource::open("payload.bin")?;
//!
//!     #[cfg(feature = "native")]
//!     {
//!         let link = muloader::SerialLink::open_simple("/dev/ttyUSB0")?;
//!         let config = SessionConfig::default().with_strict(true);
//!         let report = UploadSession::new(link, source, UnattendedOperator, config).run()?;
//!         println!("{} bytes on {} tag(s)", report.bytes_written, report.tags_programmed);
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::{Arc, OnceLock};

pub mod block;
pub mod error;
pub mod link;
pub mod protocol;
pub mod session;

static INTERRUPT_CHECKER: OnceLock<Arc<dyn Fn() -> bool + Send + Sync>> = OnceLock::new();

/// Register a global interruption checker used by long-running library loops.
///
/// The checker should return `true` when the current upload should stop
/// (for example after receiving Ctrl-C in CLI applications). Only the first
/// registration takes effect.
pub fn set_interrupt_checker<F>(checker: F)
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    let _ = INTERRUPT_CHECKER.set(Arc::new(checker));
}

/// Returns whether interruption was requested by the embedding application.
#[must_use]
pub fn is_interrupted_requested() -> bool {
    INTERRUPT_CHECKER
        .get()
        .is_some_and(|checker| checker())
}

/// Test helper to toggle interruption for the calling test thread.
#[cfg(test)]
pub(crate) fn test_set_interrupted(value: bool) {
    use std::cell::Cell;

    thread_local! {
        static TEST_INTERRUPT_FLAG: Cell<bool> = const { Cell::new(false) };
    }
    static REGISTERED: OnceLock<()> = OnceLock::new();

    REGISTERED.get_or_init(|| set_interrupt_checker(|| TEST_INTERRUPT_FLAG.with(Cell::get)));
    TEST_INTERRUPT_FLAG.with(|flag| flag.set(value));
}

// Re-exports for convenience
#[cfg(feature = "native")]
pub use link::{DeviceKind, PortInfo, SerialLink, list_ports};
pub use {
    block::{BLOCK_SIZE, Block, BlockSource, FILL_BYTE, padded_size},
    error::{Error, Result},
    link::{LinkChannel, LinkConfig},
    protocol::{BAUD_RATE, StatusCode},
    session::{
        Operator, SessionConfig, SessionState, TagSession, UnattendedOperator, UploadReport,
        UploadSession,
    },
};
