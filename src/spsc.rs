use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam::utils::CachePadded;

/// Shared state between the producer and consumer halves.
///
/// `head` is only stored by the consumer, `tail` only by the producer; both
/// indices grow without wrapping and are masked into the buffer on access.
struct RingInner<T> {
    buffer: Box<[UnsafeCell<MaybeUninit<T>>]>,
    mask: usize,
    head: CachePadded<AtomicUsize>,
    tail: CachePadded<AtomicUsize>,
}

unsafe impl<T: Send> Send for RingInner<T> {}
unsafe impl<T: Send> Sync for RingInner<T> {}

impl<T> Drop for RingInner<T> {
    fn drop(&mut self) {
        // Both halves are gone at this point, so plain loads are fine
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Relaxed);

        for idx in head..tail {
            let slot = &self.buffer[idx & self.mask];
            unsafe {
                (*slot.get()).assume_init_drop();
            }
        }
    }
}

/// Producer half of a bounded SPSC ring buffer
pub struct Producer<T> {
    inner: Arc<RingInner<T>>,
}

/// Consumer half of a bounded SPSC ring buffer
pub struct Consumer<T> {
    inner: Arc<RingInner<T>>,
}

unsafe impl<T: Send> Send for Producer<T> {}
unsafe impl<T: Send> Send for Consumer<T> {}

/// Create a bounded single-producer/single-consumer ring buffer.
///
/// Capacity must be a non-zero power of two. The two halves are each `Send`
/// but not clonable, so the single-producer/single-consumer contract is
/// enforced by the type system. Neither `push` nor `pop` allocates.
pub fn ring_buffer<T>(capacity: usize) -> (Producer<T>, Consumer<T>) {
    assert!(
        capacity > 0 && capacity.is_power_of_two(),
        "ring buffer capacity must be a non-zero power of two, got {}",
        capacity
    );

    let buffer: Box<[UnsafeCell<MaybeUninit<T>>]> = (0..capacity)
        .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
        .collect();

    let inner = Arc::new(RingInner {
        buffer,
        mask: capacity - 1,
        head: CachePadded::new(AtomicUsize::new(0)),
        tail: CachePadded::new(AtomicUsize::new(0)),
    });

    (
        Producer {
            inner: Arc::clone(&inner),
        },
        Consumer { inner },
    )
}

impl<T> Producer<T> {
    /// Push an item onto the queue.
    ///
    /// Returns the item back when the queue is full; the caller decides
    /// whether to drop or report it.
    pub fn push(&mut self, item: T) -> Result<(), T> {
        let tail = self.inner.tail.load(Ordering::Relaxed);
        let head = self.inner.head.load(Ordering::Acquire);

        if tail.wrapping_sub(head) == self.inner.buffer.len() {
            return Err(item);
        }

        let slot = &self.inner.buffer[tail & self.inner.mask];
        unsafe {
            (*slot.get()).write(item);
        }

        self.inner.tail.store(tail.wrapping_add(1), Ordering::Release);
        Ok(())
    }

    /// Number of items currently queued
    pub fn len(&self) -> usize {
        let tail = self.inner.tail.load(Ordering::Relaxed);
        let head = self.inner.head.load(Ordering::Acquire);
        tail.wrapping_sub(head)
    }

    /// Whether the queue is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the queue is at capacity
    pub fn is_full(&self) -> bool {
        self.len() == self.inner.buffer.len()
    }

    /// Fixed capacity of the queue
    pub fn capacity(&self) -> usize {
        self.inner.buffer.len()
    }
}

impl<T> Consumer<T> {
    /// Pop the oldest item, if any
    pub fn pop(&mut self) -> Option<T> {
        let head = self.inner.head.load(Ordering::Relaxed);
        let tail = self.inner.tail.load(Ordering::Acquire);

        if head == tail {
            return None;
        }

        let slot = &self.inner.buffer[head & self.inner.mask];
        let item = unsafe { (*slot.get()).assume_init_read() };

        self.inner.head.store(head.wrapping_add(1), Ordering::Release);
        Some(item)
    }

    /// Number of items currently queued
    pub fn len(&self) -> usize {
        let head = self.inner.head.load(Ordering::Relaxed);
        let tail = self.inner.tail.load(Ordering::Acquire);
        tail.wrapping_sub(head)
    }

    /// Whether the queue is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fixed capacity of the queue
    pub fn capacity(&self) -> usize {
        self.inner.buffer.len()
    }
}
