//! Wire protocol spoken with the tag-writer device.

pub mod code;

// Re-export common types
pub use code::{BAUD_RATE, StatusCode};
