//! A single producer-to-consumer link in the dispatch matrix.
//!
//! Each link is created once, shared between exactly one producer row and one
//! consumer row through an [`Arc`], and lives until the matrix is dropped.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use crate::sync::spsc::Channel;

/// Row entry: empty until both ends of the pair are registered, then
/// published exactly once.
pub(crate) type Wire<T> = OnceLock<Arc<Link<T>>>;

pub(crate) struct Link<T> {
    channel: Channel<T>,
    /// Values pushed before this position belong to a previous occupant of
    /// the producer slot and are discarded by the reader.
    stale_until: AtomicUsize,
}

impl<T> Link<T> {
    pub(crate) fn new(capacity: NonZeroUsize) -> Self {
        Self {
            channel: Channel::new(capacity),
            stale_until: AtomicUsize::new(0),
        }
    }

    /// # Safety
    ///
    /// Only the output handle currently registered on this link's producer
    /// slot may push.
    #[inline]
    pub(crate) unsafe fn push(&self, item: T) -> Result<(), T> {
        // SAFETY: forwarded to the caller.
        unsafe { self.channel.try_push(item) }
    }

    /// # Safety
    ///
    /// Only the input handle of this link's consumer slot may pop.
    #[inline]
    pub(crate) unsafe fn pop(&self) -> Option<T> {
        let stale_until = self.stale_until.load(Ordering::Acquire);
        while (self.channel.popped().wrapping_sub(stale_until) as isize) < 0 {
            // SAFETY: forwarded to the caller.
            if unsafe { self.channel.try_pop() }.is_none() {
                break;
            }
        }
        // SAFETY: forwarded to the caller.
        unsafe { self.channel.try_pop() }
    }

    /// Marks everything buffered so far as stale. Returns roughly how many
    /// values that covers.
    ///
    /// Must be called while no output handle is registered on the producer
    /// slot, so the write position cannot move underneath us.
    pub(crate) fn retire(&self) -> usize {
        let pushed = self.channel.pushed();
        self.stale_until.store(pushed, Ordering::Release);
        pushed.wrapping_sub(self.channel.popped())
    }
}

/// Number of wired entries at the front of a row.
pub(crate) fn wired<T>(row: &[Wire<T>]) -> usize {
    row.iter().take_while(|wire| wire.get().is_some()).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link(capacity: usize) -> Link<u32> {
        Link::new(NonZeroUsize::new(capacity).unwrap())
    }

    #[test]
    fn retire_discards_only_values_already_buffered() {
        let link = link(8);
        unsafe {
            link.push(1).unwrap();
            link.push(2).unwrap();
            assert_eq!(link.pop(), Some(1));
        }

        assert_eq!(link.retire(), 1);

        unsafe {
            link.push(3).unwrap();
            assert_eq!(link.pop(), Some(3));
            assert_eq!(link.pop(), None);
        }
    }

    #[test]
    fn retire_on_empty_link_is_a_no_op() {
        let link = link(2);
        assert_eq!(link.retire(), 0);
        unsafe {
            link.push(7).unwrap();
            assert_eq!(link.pop(), Some(7));
        }
    }

    #[test]
    fn wired_counts_contiguous_prefix() {
        let row: Vec<Wire<u32>> = (0..4).map(|_| OnceLock::new()).collect();
        assert_eq!(wired(&row), 0);
        let _ = row[0].set(Arc::new(link(1)));
        let _ = row[1].set(Arc::new(link(1)));
        assert_eq!(wired(&row), 2);
    }
}
