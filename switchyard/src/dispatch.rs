//! Many-producer/many-consumer dispatch over a matrix of SPSC links.
//!
//! A [`DispatchMatrix`] keeps one bounded SPSC channel for every
//! (producer, consumer) pair that is registered at the same time. Producers
//! push through an [`OutputHandle`], consumers pop through an [`InputHandle`].
//!
//! ```text
//!               consumer 0   consumer 1   consumer 2
//! producer 0  [   link    ] [   link    ] [   link    ]   <- OutputHandle row
//! producer 1  [   link    ] [   link    ] [   link    ]
//!                  ^
//!                  InputHandle column
//! ```
//!
//! # Hot path vs. structure
//!
//! Registration takes a mutex, allocates the new row or column of links and
//! publishes each link into a write-once cell. `push`/`pop` never lock: they
//! read those cells with acquire ordering and only ever see fully built links.
//!
//! Producer slots are reclaimed on unregistration and handed to the next
//! [`DispatchMatrix::register_producer`] call together with their existing
//! links. Values still buffered in those links stay visible to consumers
//! unless [`DispatchConfig::drain_on_reclaim`] is set.
//!
//! # Example
//!
//! ```
//! use switchyard::dispatch::{DispatchConfig, DispatchMatrix};
//!
//! let matrix: DispatchMatrix<u64, 8, 8> = DispatchMatrix::new(DispatchConfig::default())?;
//! let mut consumer = matrix.register_consumer().expect("consumer slot");
//! let mut producer = matrix.register_producer().expect("producer slot");
//!
//! producer.push(7).expect("link full");
//! assert_eq!(consumer.pop(), Some(7));
//!
//! producer.unregister()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod input;
mod link;
mod matrix;
mod output;

pub use input::{InputHandle, MAX_STICKY_READS, POLL_INTERVAL};
pub use matrix::DispatchMatrix;
pub use output::OutputHandle;

use thiserror::Error;

/// Default ceiling on producer slots.
pub const DEFAULT_MAX_PRODUCERS: usize = 16 * 1024;

/// Default ceiling on consumer slots.
pub const DEFAULT_MAX_CONSUMERS: usize = 1024;

/// Default capacity of every link.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Configuration for a [`DispatchMatrix`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchConfig {
    /// Capacity of each producer-to-consumer link. Must be non-zero.
    pub channel_capacity: usize,
    /// Discard values left behind by a producer when its slot is reissued.
    pub drain_on_reclaim: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            drain_on_reclaim: false,
        }
    }
}

/// Invalid [`DispatchConfig`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("channel capacity must be greater than 0")]
    ZeroCapacity,
}

/// Contract violations when unregistering a producer.
///
/// These indicate a bug in the caller, not a transient condition.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum UsageError {
    /// The handle was not issued by this matrix.
    #[error("output handle for producer slot {index} does not belong to this matrix")]
    ForeignHandle { index: usize },
    /// The handle's registration already ended.
    #[error("output handle for producer slot {index} is already unregistered")]
    AlreadyUnregistered { index: usize },
}
