use std::time::Duration;

use minstant::Instant;

use super::link::wired;
use super::matrix::ConsumerSlot;
use crate::sync::spsc::Timeout;

/// Consecutive pops served from the same producer before the round-robin
/// scan takes over again.
pub const MAX_STICKY_READS: usize = 32;

/// Sleep between attempts in [`InputHandle::pop_wait`].
pub const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// A consumer's view of the matrix: one link per producer slot.
///
/// Obtained from [`DispatchMatrix::register_consumer`](super::DispatchMatrix::register_consumer).
/// Consumers are never unregistered; the handle stays valid for the life of
/// the matrix.
pub struct InputHandle<'a, T> {
    slot: &'a ConsumerSlot<T>,
    /// Where the next round-robin scan starts: one past the last link that
    /// yielded a value.
    cursor: usize,
    /// Consecutive successful pops from link `cursor - 1`; 0 disables the
    /// sticky read.
    streak: usize,
}

impl<'a, T: Send> InputHandle<'a, T> {
    pub(crate) const fn new(slot: &'a ConsumerSlot<T>) -> Self {
        Self {
            slot,
            cursor: 0,
            streak: 0,
        }
    }

    /// Pops the next available value from any producer.
    ///
    /// After a successful pop the same producer is tried first, up to
    /// [`MAX_STICKY_READS`] times in a row. Otherwise the links are scanned
    /// round-robin starting after the last producer that yielded a value.
    ///
    /// Returns `None` if every link is empty.
    #[inline]
    pub fn pop(&mut self) -> Option<T> {
        let row = &self.slot.row;

        // A non-zero streak means `cursor - 1` is a wired link.
        if self.streak > 0
            && self.streak < MAX_STICKY_READS
            && let Some(link) = row[self.cursor - 1].get()
            // SAFETY: this handle is the only reader of its row.
            && let Some(item) = unsafe { link.pop() }
        {
            self.streak += 1;
            return Some(item);
        }
        self.streak = 0;

        let start = self.cursor.min(row.len());
        for half in [start..row.len(), 0..start] {
            for index in half {
                // Links are wired from index 0 upwards, so the first gap ends the half.
                let Some(link) = row[index].get() else {
                    break;
                };
                // SAFETY: this handle is the only reader of its row.
                if let Some(item) = unsafe { link.pop() } {
                    self.cursor = index + 1;
                    self.streak = 1;
                    return Some(item);
                }
            }
        }
        None
    }

    /// Polls [`pop`](Self::pop) until a value arrives or `timeout` expires,
    /// sleeping [`POLL_INTERVAL`] between attempts.
    ///
    /// Returns `None` on timeout.
    pub fn pop_wait(&mut self, timeout: impl Into<Timeout>) -> Option<T> {
        let deadline = timeout.into().deadline();
        loop {
            if let Some(item) = self.pop() {
                return Some(item);
            }
            if let Some(dl) = deadline
                && Instant::now() >= dl
            {
                return None;
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    /// Consumer slot index; the target for
    /// [`OutputHandle::push_to`](super::OutputHandle::push_to).
    #[must_use]
    pub const fn index(&self) -> usize {
        self.slot.index
    }

    /// Number of producer slots this consumer is linked to.
    #[must_use]
    pub fn wired_producers(&self) -> usize {
        wired(&self.slot.row)
    }

    #[cfg(test)]
    pub(crate) const fn slot(&self) -> &'a ConsumerSlot<T> {
        self.slot
    }
}
