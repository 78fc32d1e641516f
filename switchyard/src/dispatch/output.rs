use super::link::wired;
use super::matrix::{DispatchMatrix, ProducerSlot};
use super::UsageError;

/// A producer's view of the matrix: one link per registered consumer.
///
/// Obtained from [`DispatchMatrix::register_producer`]. Pushing is wait-free
/// and never takes the matrix lock.
///
/// # Panics
///
/// [`push`](Self::push) and [`push_to`](Self::push_to) panic once the handle
/// has been unregistered. Pushing through a stale handle is a caller bug.
pub struct OutputHandle<'a, T, const MAX_PRODUCERS: usize, const MAX_CONSUMERS: usize> {
    matrix: &'a DispatchMatrix<T, MAX_PRODUCERS, MAX_CONSUMERS>,
    slot: &'a ProducerSlot<T>,
    ticket: u64,
    /// Where the next fan-out scan starts: one past the last link that
    /// accepted a value.
    cursor: usize,
}

impl<'a, T: Send, const MAX_PRODUCERS: usize, const MAX_CONSUMERS: usize>
    OutputHandle<'a, T, MAX_PRODUCERS, MAX_CONSUMERS>
{
    pub(crate) fn new(
        matrix: &'a DispatchMatrix<T, MAX_PRODUCERS, MAX_CONSUMERS>,
        slot: &'a ProducerSlot<T>,
        ticket: u64,
    ) -> Self {
        Self {
            matrix,
            slot,
            ticket,
            cursor: slot.cursor(),
        }
    }

    /// Pushes `item` to the next consumer in round-robin order that has room.
    ///
    /// The scan starts just after the consumer that accepted the previous
    /// value and wraps around once.
    ///
    /// # Errors
    ///
    /// Returns `Err(item)` if every consumer's link is full, or if no consumer
    /// is registered yet.
    ///
    /// # Panics
    ///
    /// Panics if this handle is no longer registered.
    #[inline]
    pub fn push(&mut self, mut item: T) -> Result<(), T> {
        self.assert_registered();

        let row = &self.slot.row;
        let start = self.cursor.min(row.len());
        for half in [start..row.len(), 0..start] {
            for index in half {
                // Links are wired from index 0 upwards, so the first gap ends the half.
                let Some(link) = row[index].get() else {
                    break;
                };
                // SAFETY: the registered ticket makes this handle the slot's
                // only writer.
                match unsafe { link.push(item) } {
                    Ok(()) => {
                        self.cursor = index + 1;
                        return Ok(());
                    }
                    Err(rejected) => item = rejected,
                }
            }
        }
        Err(item)
    }

    /// Pushes `item` to one specific consumer, without fan-out.
    ///
    /// # Errors
    ///
    /// Returns `Err(item)` if `consumer` is out of range, not registered, or
    /// its link is full.
    ///
    /// # Panics
    ///
    /// Panics if this handle is no longer registered.
    #[inline]
    pub fn push_to(&mut self, consumer: usize, item: T) -> Result<(), T> {
        self.assert_registered();

        match self.slot.row.get(consumer).and_then(|wire| wire.get()) {
            // SAFETY: the registered ticket makes this handle the slot's
            // only writer.
            Some(link) => unsafe { link.push(item) },
            None => Err(item),
        }
    }

    /// Unregisters this producer; same as
    /// [`DispatchMatrix::unregister_producer`].
    ///
    /// # Errors
    ///
    /// Returns [`UsageError::AlreadyUnregistered`] if called twice.
    pub fn unregister(&self) -> Result<(), UsageError> {
        self.matrix.unregister_producer(self)
    }

    /// Producer slot index.
    #[must_use]
    pub const fn index(&self) -> usize {
        self.slot.index
    }

    #[must_use]
    pub fn is_registered(&self) -> bool {
        self.slot.ticket() == self.ticket
    }

    /// Number of consumers this producer is currently linked to.
    #[must_use]
    pub fn wired_consumers(&self) -> usize {
        wired(&self.slot.row)
    }

    pub(crate) const fn matrix(&self) -> &'a DispatchMatrix<T, MAX_PRODUCERS, MAX_CONSUMERS> {
        self.matrix
    }

    pub(crate) const fn slot(&self) -> &'a ProducerSlot<T> {
        self.slot
    }

    pub(crate) const fn ticket(&self) -> u64 {
        self.ticket
    }

    pub(crate) const fn cursor(&self) -> usize {
        self.cursor
    }

    #[inline]
    fn assert_registered(&self) {
        assert!(
            self.is_registered(),
            "push through unregistered output handle (producer slot {})",
            self.slot.index
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::DispatchConfig;

    fn matrix(capacity: usize) -> DispatchMatrix<u32, 4, 4> {
        DispatchMatrix::new(DispatchConfig {
            channel_capacity: capacity,
            ..DispatchConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn push_without_consumers_hands_value_back() {
        let matrix = matrix(2);
        let mut producer = matrix.register_producer().unwrap();
        assert_eq!(producer.push(5), Err(5));
        assert_eq!(producer.push_to(0, 5), Err(5));
    }

    #[test]
    fn fan_out_visits_each_consumer_once() {
        let matrix = matrix(1);
        let mut consumers: Vec<_> = (0..3).map(|_| matrix.register_consumer().unwrap()).collect();
        let mut producer = matrix.register_producer().unwrap();

        for value in 0..3 {
            assert_eq!(producer.push(value), Ok(()));
        }
        assert_eq!(producer.push(99), Err(99));

        for (index, consumer) in consumers.iter_mut().enumerate() {
            assert_eq!(consumer.pop(), Some(index as u32));
            assert_eq!(consumer.pop(), None);
        }
    }

    #[test]
    fn fan_out_resumes_after_last_accepting_consumer() {
        let matrix = matrix(4);
        let mut consumers: Vec<_> = (0..3).map(|_| matrix.register_consumer().unwrap()).collect();
        let mut producer = matrix.register_producer().unwrap();

        for value in 0..7 {
            producer.push(value).unwrap();
        }

        let seen: Vec<Vec<u32>> = consumers
            .iter_mut()
            .map(|consumer| std::iter::from_fn(|| consumer.pop()).collect())
            .collect();
        assert_eq!(seen, vec![vec![0, 3, 6], vec![1, 4], vec![2, 5]]);
    }

    #[test]
    fn fan_out_skips_full_links() {
        let matrix = matrix(1);
        let mut c0 = matrix.register_consumer().unwrap();
        let mut c1 = matrix.register_consumer().unwrap();
        let mut producer = matrix.register_producer().unwrap();

        producer.push_to(1, 10).unwrap();
        producer.push(11).unwrap();
        assert_eq!(producer.push(12), Err(12));

        assert_eq!(c0.pop(), Some(11));
        assert_eq!(c1.pop(), Some(10));
    }

    #[test]
    fn fan_out_reaches_consumers_registered_later() {
        let matrix = matrix(1);
        let mut c0 = matrix.register_consumer().unwrap();
        let mut producer = matrix.register_producer().unwrap();
        producer.push(1).unwrap();
        assert_eq!(producer.push(2), Err(2));

        let mut c1 = matrix.register_consumer().unwrap();
        assert_eq!(producer.wired_consumers(), 2);
        producer.push(2).unwrap();

        assert_eq!(c0.pop(), Some(1));
        assert_eq!(c1.pop(), Some(2));
    }

    #[test]
    fn directed_push_reaches_only_its_target() {
        let matrix = matrix(4);
        let mut consumers: Vec<_> = (0..3).map(|_| matrix.register_consumer().unwrap()).collect();
        let mut producer = matrix.register_producer().unwrap();

        producer.push_to(1, 42).unwrap();
        assert_eq!(producer.push_to(3, 43), Err(43));
        assert_eq!(producer.push_to(usize::MAX, 44), Err(44));

        assert_eq!(consumers[0].pop(), None);
        assert_eq!(consumers[1].pop(), Some(42));
        assert_eq!(consumers[2].pop(), None);
    }

    #[test]
    fn directed_push_leaves_cursor_alone() {
        let matrix = matrix(4);
        let mut c0 = matrix.register_consumer().unwrap();
        let mut c1 = matrix.register_consumer().unwrap();
        let mut producer = matrix.register_producer().unwrap();

        producer.push_to(1, 1).unwrap();
        producer.push(2).unwrap();

        assert_eq!(c0.pop(), Some(2));
        assert_eq!(c1.pop(), Some(1));
    }

    #[test]
    #[should_panic(expected = "push through unregistered output handle")]
    fn push_after_unregister_panics() {
        let matrix = matrix(1);
        let _consumer = matrix.register_consumer().unwrap();
        let mut producer = matrix.register_producer().unwrap();
        producer.unregister().unwrap();
        let _ = producer.push(1);
    }

    #[test]
    #[should_panic(expected = "push through unregistered output handle")]
    fn directed_push_after_unregister_panics() {
        let matrix = matrix(1);
        let _consumer = matrix.register_consumer().unwrap();
        let mut producer = matrix.register_producer().unwrap();
        producer.unregister().unwrap();
        let _ = producer.push_to(0, 1);
    }

    #[test]
    fn double_unregister_is_reported() {
        let matrix = matrix(1);
        let producer = matrix.register_producer().unwrap();
        assert_eq!(producer.unregister(), Ok(()));
        assert!(!producer.is_registered());
        assert_eq!(
            producer.unregister(),
            Err(UsageError::AlreadyUnregistered { index: 0 })
        );
    }

    #[test]
    fn stale_handle_cannot_touch_new_occupant() {
        let matrix = matrix(1);
        let stale = matrix.register_producer().unwrap();
        stale.unregister().unwrap();

        let current = matrix.register_producer().unwrap();
        assert_eq!(current.index(), stale.index());
        assert!(current.is_registered());
        assert!(!stale.is_registered());

        assert_eq!(
            stale.unregister(),
            Err(UsageError::AlreadyUnregistered { index: 0 })
        );
        assert!(current.is_registered());
    }

    #[test]
    fn foreign_handle_is_rejected() {
        let ours = matrix(1);
        let theirs = matrix(1);
        let producer = theirs.register_producer().unwrap();

        assert_eq!(
            ours.unregister_producer(&producer),
            Err(UsageError::ForeignHandle { index: 0 })
        );
        assert!(producer.is_registered());
        assert_eq!(ours.producer_count(), 0);
    }
}
