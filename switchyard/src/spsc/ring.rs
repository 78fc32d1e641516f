//! Core lock-free SPSC ring buffer algorithm.
//!
//! The ring is sized once at construction and never grows. Every
//! [`crate::sync::spsc::Channel`] (and therefore every link in a dispatch
//! matrix) is one of these rings.
//!
//! # Safety
//!
//! `push` and `pop` are unsafe because they require the caller to uphold the
//! SPSC invariant: exactly one producer and one consumer, with no concurrent
//! access to either role.

use std::cell::UnsafeCell;
use std::marker::PhantomData;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Role marker: Fields with this role are owned exclusively by the producer.
pub struct ProducerRole;

/// Role marker: Fields with this role are owned exclusively by the consumer.
pub struct ConsumerRole;

/// Role marker: Buffer slots whose ownership transfers via the SPSC protocol.
pub struct SlotRole;

/// Interior-mutable cell tagged with the role that owns it.
///
/// The `Role` parameter has no runtime effect; it keeps producer-owned,
/// consumer-owned and slot cells from being mixed up at compile time.
#[repr(transparent)]
pub struct SpscCell<T, Role>(UnsafeCell<T>, PhantomData<Role>);

impl<T, Role> SpscCell<T, Role> {
    pub const fn new(value: T) -> Self {
        Self(UnsafeCell::new(value), PhantomData)
    }

    pub const fn get(&self) -> &UnsafeCell<T> {
        &self.0
    }

    pub fn get_mut(&mut self) -> &mut T {
        self.0.get_mut()
    }
}

// SAFETY: each cell is touched by exactly one role at a time. Slot cells
// change hands only through the Release/Acquire stores of head and tail.
unsafe impl<T: Send, Role> Sync for SpscCell<T, Role> {}
unsafe impl<T: Send, Role> Send for SpscCell<T, Role> {}

pub type ProducerCache<T> = SpscCell<T, ProducerRole>;
pub type ConsumerCache<T> = SpscCell<T, ConsumerRole>;
pub type SlotCell<T> = SpscCell<T, SlotRole>;

/// Producer-side state: head index and cached tail.
#[repr(C)]
#[repr(align(64))]
pub struct ProducerState {
    /// Write index (total items ever pushed, wrapping).
    /// Owned by producer, read by consumer.
    pub head: AtomicUsize,

    /// Producer-local cursor tracking `head % capacity`.
    pub cursor: ProducerCache<usize>,

    /// Cached copy of tail index.
    pub cached_tail: ProducerCache<usize>,
}

impl ProducerState {
    pub const fn new() -> Self {
        Self {
            head: AtomicUsize::new(0),
            cursor: ProducerCache::new(0),
            cached_tail: ProducerCache::new(0),
        }
    }
}

impl Default for ProducerState {
    fn default() -> Self {
        Self::new()
    }
}

/// Consumer-side state: tail index and cached head.
#[repr(C)]
#[repr(align(64))]
pub struct ConsumerState {
    /// Read index (total items ever popped, wrapping).
    /// Owned by consumer, read by producer.
    pub tail: AtomicUsize,

    /// Consumer-local cursor tracking `tail % capacity`.
    pub cursor: ConsumerCache<usize>,

    /// Cached copy of head index.
    pub cached_head: ConsumerCache<usize>,
}

impl ConsumerState {
    pub const fn new() -> Self {
        Self {
            tail: AtomicUsize::new(0),
            cursor: ConsumerCache::new(0),
            cached_head: ConsumerCache::new(0),
        }
    }
}

impl Default for ConsumerState {
    fn default() -> Self {
        Self::new()
    }
}

/// A single slot in the ring buffer.
pub struct Slot<T> {
    pub value: SlotCell<MaybeUninit<T>>,
}

impl<T> Slot<T> {
    const fn empty() -> Self {
        Self {
            value: SlotCell::new(MaybeUninit::uninit()),
        }
    }
}

/// Bounded SPSC ring with a capacity fixed at construction.
pub struct Ring<T> {
    pub producer: ProducerState,
    pub consumer: ConsumerState,
    capacity: usize,
    buffer: Box<[Slot<T>]>,
}

impl<T> Ring<T> {
    /// Allocates a ring holding at most `capacity` items.
    ///
    /// Callers validate `capacity > 0` before getting here.
    pub fn with_capacity(capacity: usize) -> Self {
        debug_assert!(capacity > 0, "ring capacity must be non-zero");
        Self {
            producer: ProducerState::new(),
            consumer: ConsumerState::new(),
            capacity,
            buffer: (0..capacity).map(|_| Slot::empty()).collect(),
        }
    }

    #[inline]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Advances a cursor to the next slot index, wrapping to 0 at capacity.
    #[inline]
    const fn bump_cursor(&self, cursor: usize) -> usize {
        let next = cursor + 1;
        if next == self.capacity { 0 } else { next }
    }

    /// Number of items the producer has published so far (wrapping).
    #[inline]
    pub fn pushed(&self) -> usize {
        self.producer.head.load(Ordering::Acquire)
    }

    /// Number of items the consumer has taken so far (wrapping).
    ///
    /// Exact only when called from the consumer side.
    #[inline]
    pub fn popped(&self) -> usize {
        self.consumer.tail.load(Ordering::Relaxed)
    }

    /// Attempts to push an item onto the queue.
    ///
    /// # Safety
    ///
    /// Only one thread may act as the producer of this ring at any time.
    #[inline]
    pub unsafe fn push(&self, item: T) -> Result<(), T> {
        let head = self.producer.head.load(Ordering::Relaxed);

        // SAFETY: Producer has exclusive access to cached_tail
        let mut cached_tail = unsafe { *self.producer.cached_tail.get().get() };

        if head.wrapping_sub(cached_tail) >= self.capacity {
            cached_tail = self.consumer.tail.load(Ordering::Acquire);
            // SAFETY: Producer has exclusive write access to its cached_tail field
            unsafe {
                *self.producer.cached_tail.get().get() = cached_tail;
            }

            if head.wrapping_sub(cached_tail) >= self.capacity {
                return Err(item);
            }
        }

        // SAFETY: Producer has exclusive access to its cursor, which stays in
        // [0, capacity) because only bump_cursor modifies it.
        let slot_index = unsafe { *self.producer.cursor.get().get() };

        // SAFETY: head - tail < capacity, so the consumer is not reading this
        // slot, and head has not been published yet.
        unsafe {
            let slot_ptr = self.buffer[slot_index].value.get().get();
            std::ptr::write(slot_ptr, MaybeUninit::new(item));
            *self.producer.cursor.get().get() = self.bump_cursor(slot_index);
        }

        self.producer
            .head
            .store(head.wrapping_add(1), Ordering::Release);

        Ok(())
    }

    /// Attempts to pop an item from the queue.
    ///
    /// # Safety
    ///
    /// Only one thread may act as the consumer of this ring at any time.
    #[inline]
    pub unsafe fn pop(&self) -> Option<T> {
        let tail = self.consumer.tail.load(Ordering::Relaxed);

        // SAFETY: Consumer has exclusive access to cached_head
        let mut cached_head = unsafe { *self.consumer.cached_head.get().get() };

        if cached_head == tail {
            cached_head = self.producer.head.load(Ordering::Acquire);
            // SAFETY: Consumer has exclusive write access to its cached_head field
            unsafe {
                *self.consumer.cached_head.get().get() = cached_head;
            }

            if cached_head == tail {
                return None;
            }
        }

        // SAFETY: Consumer has exclusive access to its cursor, which stays in
        // [0, capacity) because only bump_cursor modifies it.
        let slot_index = unsafe { *self.consumer.cursor.get().get() };

        // SAFETY: head != tail, so the producer initialized this slot and
        // will not overwrite it until the new tail is published below.
        let item = unsafe {
            let slot_ptr = self.buffer[slot_index].value.get().get();
            std::ptr::read(slot_ptr).assume_init()
        };

        self.consumer
            .tail
            .store(tail.wrapping_add(1), Ordering::Release);

        // SAFETY: Consumer has exclusive write access to its cursor field.
        unsafe {
            *self.consumer.cursor.get().get() = self.bump_cursor(slot_index);
        }

        Some(item)
    }
}

impl<T> Drop for Ring<T> {
    fn drop(&mut self) {
        if !std::mem::needs_drop::<T>() {
            return;
        }
        let head = *self.producer.head.get_mut();
        let mut tail = *self.consumer.tail.get_mut();
        let mut cursor = *self.consumer.cursor.get_mut();
        while tail != head {
            // SAFETY: slots between tail and head were written by the producer
            // and never read. `&mut self` rules out concurrent access.
            unsafe { self.buffer[cursor].value.get_mut().assume_init_drop() };
            cursor = self.bump_cursor(cursor);
            tail = tail.wrapping_add(1);
        }
    }
}

// SAFETY: all shared state is either atomic or an SpscCell.
unsafe impl<T: Send> Send for Ring<T> {}

// SAFETY: head/tail use Release/Acquire ordering and buffer slots are
// protected by the SPSC invariant (see SpscCell).
unsafe impl<T: Send> Sync for Ring<T> {}
