//! Error types for handle tables.

use thiserror::Error;

/// A handle failed validation against its table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HandleError {
    #[error("null handle")]
    Null,
    #[error("handle {index} out of range (table length {len})")]
    OutOfRange { index: u32, len: usize },
    #[error("handle {0} refers to a destroyed slot")]
    Destroyed(u32),
}
