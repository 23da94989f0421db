//! # Umbra Core
//!
//! Building blocks shared by the Umbra renderer: typed handles and slot
//! tables, a read-biased spin lock, and culling math.

pub mod error;
pub mod handle;
pub mod math;
pub mod sync;

pub use error::HandleError;
pub use handle::{Handle, HandleTable, LockedTable, NULL_HANDLE, TableRead};
pub use sync::{SpinReadGuard, SpinRwLock, SpinWriteGuard};

/// Core library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
