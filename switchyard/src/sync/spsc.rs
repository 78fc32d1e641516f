//! Lock-free SPSC queue for in-process (inter-thread) communication.
//!
//! A wait-free bounded queue using a heap-allocated ring buffer with atomic indices.
//! This is the point-to-point channel every link of a
//! [`DispatchMatrix`](crate::dispatch::DispatchMatrix) is built from, and it is
//! usable on its own.
//!
//! # Overview
//!
//! - [`Producer`] - Write end (single producer per queue)
//! - [`Consumer`] - Read end (single consumer per queue)
//! - Lock-free, wait-free: no mutexes or syscalls in the hot path
//!
//! # Example
//!
//! ```
//! use std::num::NonZeroUsize;
//! use switchyard::sync::spsc;
//!
//! let (producer, consumer) = spsc::channel::<u64>(NonZeroUsize::new(1024).unwrap());
//!
//! // Producer thread
//! producer.push(42).expect("Queue full");
//!
//! // Consumer thread
//! assert_eq!(consumer.pop(), Some(42));
//! ```

use std::cell::Cell;
use std::marker::PhantomData;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use minstant::Instant;

use crate::spsc::ring::Ring;

/// Timeout specification for blocking operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    /// Wait indefinitely.
    Infinite,
    /// Wait for at most the specified duration.
    Duration(Duration),
}

impl Timeout {
    /// Absolute deadline for a wait starting now, `None` if unbounded.
    ///
    /// A duration too large to represent as an instant waits indefinitely.
    #[inline]
    pub(crate) fn deadline(self) -> Option<Instant> {
        match self {
            Self::Infinite => None,
            Self::Duration(d) => Instant::now().checked_add(d),
        }
    }
}

impl From<Duration> for Timeout {
    fn from(d: Duration) -> Self {
        Self::Duration(d)
    }
}

/// Bounded single-writer/single-reader FIFO with a fixed capacity.
///
/// A `Channel` carries no ownership of its ends: callers that share one
/// (through [`Producer`]/[`Consumer`] or a dispatch link) are responsible for
/// keeping exactly one writer and one reader.
pub(crate) struct Channel<T> {
    ring: Ring<T>,
}

impl<T> Channel<T> {
    pub(crate) fn new(capacity: NonZeroUsize) -> Self {
        Self {
            ring: Ring::with_capacity(capacity.get()),
        }
    }

    #[inline]
    pub(crate) const fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    /// Total items ever pushed (wrapping).
    #[inline]
    pub(crate) fn pushed(&self) -> usize {
        self.ring.pushed()
    }

    /// Total items ever popped (wrapping). Exact on the reader side only.
    #[inline]
    pub(crate) fn popped(&self) -> usize {
        self.ring.popped()
    }

    /// # Safety
    ///
    /// The caller must be the channel's only writer.
    #[inline]
    pub(crate) unsafe fn try_push(&self, item: T) -> Result<(), T> {
        // SAFETY: forwarded to the caller.
        unsafe { self.ring.push(item) }
    }

    /// # Safety
    ///
    /// The caller must be the channel's only reader.
    #[inline]
    pub(crate) unsafe fn try_pop(&self) -> Option<T> {
        // SAFETY: forwarded to the caller.
        unsafe { self.ring.pop() }
    }
}

/// Marker type to opt-out of `Sync` while remaining `Send`.
type PhantomUnsync = PhantomData<Cell<&'static ()>>;

/// Write end of the SPSC queue.
///
/// # Thread Safety
///
/// `Producer` is [`Send`] but **not** [`Sync`]:
/// - Can transfer ownership to another thread
/// - Cannot share `&Producer` (no concurrent `push()`)
pub struct Producer<T: Send> {
    channel: Arc<Channel<T>>,
    _unsync: PhantomUnsync,
}

/// Read end of the SPSC queue.
///
/// See [`Producer`] for thread safety details (same semantics apply).
pub struct Consumer<T: Send> {
    channel: Arc<Channel<T>>,
    _unsync: PhantomUnsync,
}

/// Creates a new SPSC channel holding at most `capacity` items.
///
/// Returns a `(Producer, Consumer)` pair. The producer and consumer can be
/// sent to different threads.
#[must_use]
pub fn channel<T: Send>(capacity: NonZeroUsize) -> (Producer<T>, Consumer<T>) {
    let channel = Arc::new(Channel::new(capacity));

    let producer = Producer {
        channel: Arc::clone(&channel),
        _unsync: PhantomData,
    };

    let consumer = Consumer {
        channel,
        _unsync: PhantomData,
    };

    (producer, consumer)
}

impl<T: Send> Producer<T> {
    /// Attempts to push an item onto the queue (wait-free).
    ///
    /// # Errors
    ///
    /// Returns `Err(item)` if the queue is full, allowing retry.
    #[inline]
    pub fn push(&self, item: T) -> Result<(), T> {
        // SAFETY: this Producer is the only writer and is !Sync.
        unsafe { self.channel.try_push(item) }
    }

    /// Spins until space is available, then pushes.
    ///
    /// # Errors
    ///
    /// Returns `Err(item)` on timeout.
    #[inline]
    pub fn push_blocking(&self, mut item: T, timeout: Timeout) -> Result<(), T> {
        let deadline = timeout.deadline();
        loop {
            match self.push(item) {
                Ok(()) => return Ok(()),
                Err(returned) => {
                    item = returned;
                    if let Some(dl) = deadline
                        && Instant::now() > dl
                    {
                        return Err(item);
                    }
                    std::hint::spin_loop();
                }
            }
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.channel.capacity()
    }
}

impl<T: Send> Consumer<T> {
    /// Attempts to pop an item from the queue (wait-free).
    ///
    /// Returns `None` if the queue is empty.
    #[inline]
    #[must_use]
    pub fn pop(&self) -> Option<T> {
        // SAFETY: this Consumer is the only reader and is !Sync.
        unsafe { self.channel.try_pop() }
    }

    /// Spins until an item is available, then pops.
    ///
    /// Returns `None` on timeout.
    #[inline]
    #[must_use]
    pub fn pop_blocking(&self, timeout: Timeout) -> Option<T> {
        let deadline = timeout.deadline();
        loop {
            if let Some(item) = self.pop() {
                return Some(item);
            }
            if let Some(dl) = deadline
                && Instant::now() > dl
            {
                return None;
            }
            std::hint::spin_loop();
        }
    }

    /// Number of items currently buffered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.channel.pushed().wrapping_sub(self.channel.popped())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
