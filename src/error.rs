//! Error types for pool construction.
//!
//! The hot-path operations are infallible by design; the only thing that
//! can go wrong is setting up the slot storage in the first place.

use thiserror::Error;

/// Errors that can occur while constructing a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PoolError {
    /// The slot storage allocation failed.
    #[error("failed to allocate {bytes} bytes of slot storage")]
    AllocationFailed {
        /// Size of the storage region that could not be allocated.
        bytes: usize,
    },

    /// The slot storage layout cannot be represented on this platform.
    #[error("{slots} slots of {slot_bytes} bytes cannot be laid out with {align}-byte alignment")]
    InvalidLayout {
        /// Number of slots requested.
        slots: usize,
        /// Size of one slot in bytes.
        slot_bytes: usize,
        /// Required storage alignment.
        align: usize,
    },
}
