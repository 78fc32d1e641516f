use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use super::input::InputHandle;
use super::link::{Link, Wire};
use super::output::OutputHandle;
use super::{ConfigError, DEFAULT_MAX_CONSUMERS, DEFAULT_MAX_PRODUCERS, DispatchConfig, UsageError};
use crate::trace::{debug, trace};

/// Low bit of [`ProducerSlot::state`]; the remaining bits count registrations.
const ACTIVE: u64 = 1;

/// A producer slot: its identity, registration state and row of links.
///
/// Slots are created on first use and reused after unregistration.
pub(crate) struct ProducerSlot<T> {
    pub(crate) index: usize,
    /// `generation << 1 | ACTIVE`. Written under the structural lock.
    state: AtomicU64,
    /// Fan-out cursor left by the last registration, picked up by the next.
    cursor: AtomicUsize,
    /// One entry per consumer slot.
    pub(crate) row: Box<[Wire<T>]>,
}

impl<T> ProducerSlot<T> {
    fn new(index: usize, width: usize) -> Self {
        Self {
            index,
            state: AtomicU64::new(ACTIVE),
            cursor: AtomicUsize::new(0),
            row: (0..width).map(|_| OnceLock::new()).collect(),
        }
    }

    /// Current registration ticket. A handle may use the slot only while
    /// this equals the ticket it was issued with.
    #[inline]
    pub(crate) fn ticket(&self) -> u64 {
        self.state.load(Ordering::Acquire)
    }

    /// Starts a new registration generation and returns its ticket.
    fn reactivate(&self) -> u64 {
        let state = self.state.load(Ordering::Relaxed);
        debug_assert_eq!(state & ACTIVE, 0, "reclaimed producer slot is still active");
        let ticket = (((state >> 1) + 1) << 1) | ACTIVE;
        self.state.store(ticket, Ordering::Release);
        ticket
    }

    /// Ends the registration identified by `ticket`. Fails if that
    /// registration is no longer current.
    fn deactivate(&self, ticket: u64) -> bool {
        self.state
            .compare_exchange(ticket, ticket & !ACTIVE, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
    }

    #[inline]
    pub(crate) fn cursor(&self) -> usize {
        self.cursor.load(Ordering::Relaxed)
    }

    fn wire(&self, consumer: usize, link: Arc<Link<T>>) {
        let fresh = self.row[consumer].set(link).is_ok();
        debug_assert!(fresh, "producer {} already wired to consumer {consumer}", self.index);
    }
}

/// A consumer slot: its identity and row of links, one per producer slot.
pub(crate) struct ConsumerSlot<T> {
    pub(crate) index: usize,
    pub(crate) row: Box<[Wire<T>]>,
}

impl<T> ConsumerSlot<T> {
    fn new(index: usize, width: usize) -> Self {
        Self {
            index,
            row: (0..width).map(|_| OnceLock::new()).collect(),
        }
    }

    fn wire(&self, producer: usize, link: Arc<Link<T>>) {
        let fresh = self.row[producer].set(link).is_ok();
        debug_assert!(fresh, "consumer {} already wired to producer {producer}", self.index);
    }
}

/// State only touched under the structural lock.
#[derive(Default)]
struct Registry {
    /// Producer slots available for reuse, most recently freed last.
    reclaimed: Vec<usize>,
}

struct CapacityCheck<const P: usize, const C: usize>;

impl<const P: usize, const C: usize> CapacityCheck<P, C> {
    /// Compile-time assertion that both slot tables are non-empty.
    const OK: () = assert!(P > 0 && C > 0, "slot tables must hold at least one entry");
}

/// Fixed-capacity dispatch structure linking every registered producer to
/// every registered consumer.
///
/// `MAX_PRODUCERS` and `MAX_CONSUMERS` bound the number of slots; registration
/// past either ceiling returns `None`. Handles borrow the matrix, so every
/// link and slot is freed together when the matrix is dropped.
pub struct DispatchMatrix<
    T,
    const MAX_PRODUCERS: usize = DEFAULT_MAX_PRODUCERS,
    const MAX_CONSUMERS: usize = DEFAULT_MAX_CONSUMERS,
> {
    config: DispatchConfig,
    capacity: NonZeroUsize,
    producers: Box<[OnceLock<Box<ProducerSlot<T>>>]>,
    consumers: Box<[OnceLock<Box<ConsumerSlot<T>>>]>,
    producer_count: AtomicUsize,
    consumer_count: AtomicUsize,
    link_count: AtomicUsize,
    registry: Mutex<Registry>,
}

impl<T: Send, const MAX_PRODUCERS: usize, const MAX_CONSUMERS: usize>
    DispatchMatrix<T, MAX_PRODUCERS, MAX_CONSUMERS>
{
    /// Creates an empty matrix.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ZeroCapacity`] if `config.channel_capacity` is 0.
    pub fn new(config: DispatchConfig) -> Result<Self, ConfigError> {
        let () = CapacityCheck::<MAX_PRODUCERS, MAX_CONSUMERS>::OK;
        let capacity =
            NonZeroUsize::new(config.channel_capacity).ok_or(ConfigError::ZeroCapacity)?;

        debug!(
            capacity = capacity.get(),
            max_producers = MAX_PRODUCERS,
            max_consumers = MAX_CONSUMERS,
            drain_on_reclaim = config.drain_on_reclaim,
            "dispatch matrix created"
        );

        Ok(Self {
            config,
            capacity,
            producers: (0..MAX_PRODUCERS).map(|_| OnceLock::new()).collect(),
            consumers: (0..MAX_CONSUMERS).map(|_| OnceLock::new()).collect(),
            producer_count: AtomicUsize::new(0),
            consumer_count: AtomicUsize::new(0),
            link_count: AtomicUsize::new(0),
            registry: Mutex::new(Registry::default()),
        })
    }

    /// Registers a consumer and links it to every producer slot allocated so
    /// far, registered or not.
    ///
    /// Returns `None` once `MAX_CONSUMERS` consumers exist. Consumer slots are
    /// never reclaimed.
    pub fn register_consumer(&self) -> Option<InputHandle<'_, T>> {
        let _registry = self.lock();

        let index = self.consumer_count.load(Ordering::Relaxed);
        if index >= MAX_CONSUMERS {
            debug!(max = MAX_CONSUMERS, "no consumer slot available");
            return None;
        }

        let slot = ConsumerSlot::new(index, MAX_PRODUCERS);
        for producer in self.producer_slots() {
            let link = self.new_link();
            slot.wire(producer.index, Arc::clone(&link));
            producer.wire(index, link);
        }

        let slot = self.consumers[index].get_or_init(|| Box::new(slot));
        self.consumer_count.store(index + 1, Ordering::Release);

        debug!(consumer = index, "consumer registered");
        Some(InputHandle::new(slot))
    }

    /// Registers a producer.
    ///
    /// A previously unregistered slot is reused first, with its existing
    /// links untouched. Otherwise a fresh slot is linked to every registered
    /// consumer. Returns `None` once `MAX_PRODUCERS` slots exist and none is
    /// free.
    pub fn register_producer(&self) -> Option<OutputHandle<'_, T, MAX_PRODUCERS, MAX_CONSUMERS>> {
        let mut registry = self.lock();

        if let Some(slot) = registry
            .reclaimed
            .pop()
            .and_then(|index| self.producers[index].get())
        {
            let ticket = slot.reactivate();
            if self.config.drain_on_reclaim {
                self.drain(slot);
            }
            debug!(producer = slot.index, "producer slot reclaimed");
            return Some(OutputHandle::new(self, slot, ticket));
        }

        let index = self.producer_count.load(Ordering::Relaxed);
        if index >= MAX_PRODUCERS {
            debug!(max = MAX_PRODUCERS, "no producer slot available");
            return None;
        }

        let slot = ProducerSlot::new(index, MAX_CONSUMERS);
        for consumer in self.consumer_slots() {
            let link = self.new_link();
            slot.wire(consumer.index, Arc::clone(&link));
            consumer.wire(index, link);
        }

        let slot = self.producers[index].get_or_init(|| Box::new(slot));
        self.producer_count.store(index + 1, Ordering::Release);

        debug!(producer = index, "producer registered");
        Some(OutputHandle::new(self, slot, slot.ticket()))
    }

    /// Ends `handle`'s registration and queues its slot for reuse.
    ///
    /// The slot's links are left as they are.
    ///
    /// # Errors
    ///
    /// - [`UsageError::ForeignHandle`] if `handle` came from another matrix.
    /// - [`UsageError::AlreadyUnregistered`] if its registration already ended.
    pub fn unregister_producer(
        &self,
        handle: &OutputHandle<'_, T, MAX_PRODUCERS, MAX_CONSUMERS>,
    ) -> Result<(), UsageError> {
        let mut registry = self.lock();

        let index = handle.index();
        let owned = std::ptr::eq(handle.matrix(), self)
            && self
                .producers
                .get(index)
                .and_then(OnceLock::get)
                .is_some_and(|slot| std::ptr::eq(&**slot, handle.slot()));
        if !owned {
            return Err(UsageError::ForeignHandle { index });
        }

        if !handle.slot().deactivate(handle.ticket()) {
            return Err(UsageError::AlreadyUnregistered { index });
        }
        // Published to the next occupant by the lock.
        handle.slot().cursor.store(handle.cursor(), Ordering::Relaxed);
        registry.reclaimed.push(index);

        debug!(producer = index, "producer unregistered");
        Ok(())
    }

    /// Number of producer slots ever allocated, registered or not.
    #[must_use]
    pub fn producer_count(&self) -> usize {
        self.producer_count.load(Ordering::Acquire)
    }

    /// Number of registered consumers.
    #[must_use]
    pub fn consumer_count(&self) -> usize {
        self.consumer_count.load(Ordering::Acquire)
    }

    /// Number of links created so far.
    #[must_use]
    pub fn link_count(&self) -> usize {
        self.link_count.load(Ordering::Relaxed)
    }

    #[must_use]
    pub const fn config(&self) -> &DispatchConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        // The registry is consistent after every statement, so a panic while
        // holding the lock cannot leave it half-updated.
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn new_link(&self) -> Arc<Link<T>> {
        self.link_count.fetch_add(1, Ordering::Relaxed);
        Arc::new(Link::new(self.capacity))
    }

    /// Allocated producer slots. Call with the lock held.
    fn producer_slots(&self) -> impl Iterator<Item = &ProducerSlot<T>> {
        let count = self.producer_count.load(Ordering::Relaxed);
        self.producers[..count]
            .iter()
            .filter_map(|slot| slot.get().map(|slot| &**slot))
    }

    /// Registered consumer slots. Call with the lock held.
    fn consumer_slots(&self) -> impl Iterator<Item = &ConsumerSlot<T>> {
        let count = self.consumer_count.load(Ordering::Relaxed);
        self.consumers[..count]
            .iter()
            .filter_map(|slot| slot.get().map(|slot| &**slot))
    }

    fn drain(&self, slot: &ProducerSlot<T>) {
        let mut discarded = 0;
        for link in slot.row.iter().map_while(OnceLock::get) {
            discarded += link.retire();
        }
        if discarded > 0 {
            trace!(producer = slot.index, discarded, "stale values marked for discard");
        }
    }
}
