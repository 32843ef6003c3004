//! Lock-free single-producer single-consumer queue with deferred reclamation.
//!
//! Three cursors walk the ring: `write` (producer), `read` (consumer), and
//! `free` (producer, trailing `read`). The consumer never drops slot
//! contents — it only advances `read`. The producer retires the slots in
//! `[free, read)` before each push, so payload destructors always run on
//! the producer thread and the consumer side stays allocation-free.
//!
//! One slot is sacrificed to distinguish full from empty: a queue built
//! with capacity `n` holds `n - 1` items.

use alloc::boxed::Box;
use alloc::sync::Arc;
use core::cell::UnsafeCell;
use core::fmt;
use core::sync::atomic::{AtomicUsize, Ordering};

use pv_ir::Event;

/// Default number of slots in the control-to-render event queue.
pub const EVENT_QUEUE_SIZE: usize = 1024;

/// Producer half of the event queue.
pub type EventProducer = Producer<Event>;

/// Consumer half of the event queue.
pub type EventConsumer = Consumer<Event>;

/// Push failed because the ring is full; carries the rejected item.
#[derive(Debug, PartialEq, Eq)]
pub struct QueueFull<T>(pub T);

impl<T> fmt::Display for QueueFull<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "event queue is full")
    }
}

#[cfg(feature = "std")]
impl<T: fmt::Debug> std::error::Error for QueueFull<T> {}

struct Slot<T>(UnsafeCell<Option<T>>);

struct Ring<T> {
    slots: Box<[Slot<T>]>,
    mask: usize,
    /// Next slot the producer will fill. Producer-owned.
    write: AtomicUsize,
    /// Next slot the consumer will hand out. Consumer-owned.
    read: AtomicUsize,
    /// Next slot the producer will retire. Producer-owned, trails `read`.
    free: AtomicUsize,
}

// Slots in [write, free) are producer territory, [read, write) consumer
// territory; cursor publication uses release stores, so no slot is touched
// by both sides at once.
unsafe impl<T: Send> Send for Ring<T> {}
unsafe impl<T: Send> Sync for Ring<T> {}

/// Create a queue with at least `capacity` slots (rounded up to a power
/// of two) and split it into its producer and consumer halves.
pub fn new_queue<T>(capacity: usize) -> (Producer<T>, Consumer<T>) {
    let size = capacity.next_power_of_two().max(2);
    let slots: Box<[Slot<T>]> = (0..size).map(|_| Slot(UnsafeCell::new(None))).collect();
    let ring = Arc::new(Ring {
        slots,
        mask: size - 1,
        write: AtomicUsize::new(0),
        read: AtomicUsize::new(0),
        free: AtomicUsize::new(0),
    });
    (
        Producer { ring: ring.clone() },
        Consumer { ring },
    )
}

/// Writing half. Owned by the control thread.
pub struct Producer<T> {
    ring: Arc<Ring<T>>,
}

impl<T> Producer<T> {
    /// Push an item, retiring consumed slots first.
    ///
    /// Returns the item back inside `QueueFull` when the ring is full.
    pub fn push(&mut self, item: T) -> Result<(), QueueFull<T>> {
        self.reclaim();
        let ring = &*self.ring;
        let write = ring.write.load(Ordering::Relaxed);
        let next = (write + 1) & ring.mask;
        if next == ring.free.load(Ordering::Relaxed) {
            return Err(QueueFull(item));
        }
        unsafe {
            *ring.slots[write].0.get() = Some(item);
        }
        ring.write.store(next, Ordering::Release);
        Ok(())
    }

    /// Drop the payloads of every slot the consumer has released.
    fn reclaim(&mut self) {
        let ring = &*self.ring;
        let read = ring.read.load(Ordering::Acquire);
        let mut free = ring.free.load(Ordering::Relaxed);
        while free != read {
            unsafe {
                (*ring.slots[free].0.get()).take();
            }
            free = (free + 1) & ring.mask;
        }
        ring.free.store(free, Ordering::Relaxed);
    }

    /// Number of items the queue can hold.
    pub fn capacity(&self) -> usize {
        self.ring.mask
    }
}

/// Reading half. Owned by the render thread.
pub struct Consumer<T> {
    ring: Arc<Ring<T>>,
}

impl<T> Consumer<T> {
    /// Borrow the next item without releasing its slot.
    pub fn peek(&self) -> Option<&T> {
        let ring = &*self.ring;
        let read = ring.read.load(Ordering::Relaxed);
        if read == ring.write.load(Ordering::Acquire) {
            return None;
        }
        unsafe { (*ring.slots[read].0.get()).as_ref() }
    }

    /// Release the slot returned by the last `peek` back to the producer.
    pub fn advance(&mut self) {
        let ring = &*self.ring;
        let read = ring.read.load(Ordering::Relaxed);
        if read != ring.write.load(Ordering::Acquire) {
            ring.read.store((read + 1) & ring.mask, Ordering::Release);
        }
    }

    /// Number of items waiting to be consumed.
    pub fn len(&self) -> usize {
        let ring = &*self.ring;
        let read = ring.read.load(Ordering::Relaxed);
        let write = ring.write.load(Ordering::Acquire);
        write.wrapping_sub(read) & ring.mask
    }

    /// Returns true if no items are waiting.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
