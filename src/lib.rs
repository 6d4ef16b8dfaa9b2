//! samplepool-rs — wait-free SPSC buffer pool for profiling sample
//! collection.
//!
//! A pool of fixed-size slots shared between one high-frequency producer
//! (an instrumented application thread depositing samples) and one
//! lower-priority reader (a collector thread draining them). The design
//! goal is that the producer **never blocks, never spins, and never fails
//! to obtain a write target**: when the reader falls a full pool behind,
//! the producer overwrites the newest unconsumed slot and keeps going.
//! Lagging readers lose data; producer progress is sacrosanct.
//!
//! # Key properties
//!
//! - Wait-free claim and consume paths: no loops over contended state,
//!   no allocation, bounded step counts
//! - One cache line of mutable pool state; power-of-two slot count so the
//!   hot path masks instead of dividing
//! - Release/acquire publication of records, one seq-cst store at the
//!   rare attach point, everything else relaxed
//! - Reader lag is not an error: it shows up as an overflow counter and
//!   silent overwrite of the freshest slot
//!
//! # Example
//!
//! ```
//! use samplepool_rs::SamplePool;
//!
//! // 8 slots of 4 u64 records each.
//! let mut pool = SamplePool::<u64, 4, 8>::new()?;
//! let (mut producer, mut reader) = pool.split();
//!
//! reader.attach();
//!
//! producer
//!     .next_writable_buffer()
//!     .records_mut()
//!     .copy_from_slice(&[1, 2, 3, 4]);
//! // Claiming the next slot publishes the previous one.
//! producer.next_writable_buffer();
//!
//! let slot = reader.next_readable_buffer().expect("published slot");
//! assert_eq!(slot.records(), &[1, 2, 3, 4]);
//! # Ok::<(), samplepool_rs::PoolError>(())
//! ```

mod error;
mod handles;
mod invariants;
mod pool;
mod slot;
mod stats;

pub use error::PoolError;
pub use handles::{Producer, Reader};
pub use pool::{CACHE_LINE, SamplePool};
pub use slot::{Record, Slot};
pub use stats::PoolStats;
