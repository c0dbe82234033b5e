//! Lock-free single-producer/single-consumer event queue
//!
//! Hands discrete control events (e.g. "play note X") from a control thread to
//! the real-time audio thread. Neither side ever blocks or allocates after
//! construction.
//!
//! ```text
//! Control Thread                              Audio Thread
//!     │                                            │
//! [enqueue]──► slot[tail]   tail: release  ──────► acquire: [dequeue]
//!     │        head: acquire ◄────── release: head │
//! ```
//!
//! The queue is split into an [`EventProducer`] and an [`EventConsumer`] on
//! construction. Neither half is `Clone`, so there is exactly one producer and
//! one consumer for the lifetime of the ring.

use std::cell::UnsafeCell;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_utils::CachePadded;

struct Ring<T, const N: usize> {
    slots: Box<[UnsafeCell<T>]>,
    /// Returned by `dequeue` when nothing is queued
    empty: T,
    /// Next slot to read. Written only by the consumer.
    head: CachePadded<AtomicUsize>,
    /// Next slot to write. Written only by the producer.
    tail: CachePadded<AtomicUsize>,
}

// SAFETY: a slot is only touched by the producer while it lies outside
// [head, tail) and only by the consumer while it lies inside it. The index
// handoff is release/acquire, so slot contents are visible before the index
// that publishes them.
unsafe impl<T: Send, const N: usize> Sync for Ring<T, N> {}

impl<T, const N: usize> Ring<T, N> {
    const MASK: usize = N - 1;

    fn next(index: usize) -> usize {
        (index + 1) & Self::MASK
    }

    fn len(&self) -> usize {
        let tail = self.tail.load(Ordering::Acquire);
        let head = self.head.load(Ordering::Acquire);
        tail.wrapping_sub(head) & Self::MASK
    }
}

/// Create an SPSC queue with `N` slots.
///
/// `N` must be a power of two (checked at compile time). One slot is kept free
/// to tell "full" from "empty", so at most `N - 1` events are queued at once.
/// `empty` is the sentinel returned by [`EventConsumer::dequeue`] when the
/// queue is empty.
pub fn event_queue<T, const N: usize>(empty: T) -> (EventProducer<T, N>, EventConsumer<T, N>)
where
    T: Clone + Send,
{
    const { assert!(N >= 2 && N.is_power_of_two(), "N must be a power of two") };

    let slots = (0..N)
        .map(|_| UnsafeCell::new(empty.clone()))
        .collect::<Vec<_>>()
        .into_boxed_slice();

    let ring = Arc::new(Ring {
        slots,
        empty,
        head: CachePadded::new(AtomicUsize::new(0)),
        tail: CachePadded::new(AtomicUsize::new(0)),
    });

    (EventProducer { ring: ring.clone() }, EventConsumer { ring })
}

/// Writing half of the event queue (control thread)
pub struct EventProducer<T, const N: usize> {
    ring: Arc<Ring<T, N>>,
}

impl<T: Clone + Send, const N: usize> EventProducer<T, N> {
    /// Queue an event. Returns `false` without blocking or overwriting when
    /// the queue is full; the event is discarded in that case.
    pub fn enqueue(&mut self, item: T) -> bool {
        self.try_enqueue(item).is_ok()
    }

    /// Queue an event, handing it back if the queue is full.
    pub fn try_enqueue(&mut self, item: T) -> Result<(), T> {
        let ring = &*self.ring;
        let tail = ring.tail.load(Ordering::Relaxed);
        let next = Ring::<T, N>::next(tail);

        if next == ring.head.load(Ordering::Acquire) {
            return Err(item);
        }

        // SAFETY: `tail` is outside [head, tail), so the consumer will not
        // read this slot until the release store below publishes it.
        unsafe {
            *ring.slots[tail].get() = item;
        }
        ring.tail.store(next, Ordering::Release);
        Ok(())
    }

    /// Queue an event, spinning until the consumer frees a slot.
    pub fn enqueue_spin(&mut self, mut item: T) {
        loop {
            match self.try_enqueue(item) {
                Ok(()) => return,
                Err(back) => {
                    item = back;
                    std::hint::spin_loop();
                }
            }
        }
    }

    /// Number of queued events
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    /// Whether the consumer has caught up
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of events queued at once (`N - 1`)
    pub fn capacity(&self) -> usize {
        N - 1
    }
}

/// Reading half of the event queue (audio thread)
pub struct EventConsumer<T, const N: usize> {
    ring: Arc<Ring<T, N>>,
}

impl<T: Clone + Send, const N: usize> EventConsumer<T, N> {
    /// Take the oldest event, or the sentinel if the queue is empty.
    pub fn dequeue(&mut self) -> T {
        self.try_dequeue()
            .unwrap_or_else(|| self.ring.empty.clone())
    }

    /// Take the oldest event, if any.
    pub fn try_dequeue(&mut self) -> Option<T> {
        let ring = &*self.ring;
        let head = ring.head.load(Ordering::Relaxed);

        if head == ring.tail.load(Ordering::Acquire) {
            return None;
        }

        // SAFETY: `head` is inside [head, tail); the producer will not write
        // this slot again until the release store below hands it back.
        let item = unsafe { std::mem::replace(&mut *ring.slots[head].get(), ring.empty.clone()) };
        ring.head.store(Ring::<T, N>::next(head), Ordering::Release);
        Some(item)
    }

    /// Number of queued events
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    /// Whether the queue is currently empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_dequeue_empty_returns_sentinel() {
        let (_tx, mut rx) = event_queue::<i32, 4>(-1);
        assert_eq!(rx.dequeue(), -1);
        assert_eq!(rx.dequeue(), -1);
        assert!(rx.try_dequeue().is_none());
    }

    #[test]
    fn test_fifo_order() {
        let (mut tx, mut rx) = event_queue::<u32, 8>(0);
        for i in 1..=5 {
            assert!(tx.enqueue(i));
        }
        assert_eq!(tx.len(), 5);
        for i in 1..=5 {
            assert_eq!(rx.dequeue(), i);
        }
        assert!(rx.is_empty());
    }

    #[test]
    fn test_full_queue_rejects_without_overwrite() {
        let (mut tx, mut rx) = event_queue::<u32, 4>(0);
        assert_eq!(tx.capacity(), 3);
        assert!(tx.enqueue(1));
        assert!(tx.enqueue(2));
        assert!(tx.enqueue(3));
        assert!(!tx.enqueue(4));
        assert_eq!(tx.try_enqueue(5), Err(5));

        assert_eq!(rx.dequeue(), 1);
        assert!(tx.enqueue(6));
        assert_eq!(rx.dequeue(), 2);
        assert_eq!(rx.dequeue(), 3);
        assert_eq!(rx.dequeue(), 6);
        assert_eq!(rx.dequeue(), 0);
    }

    #[test]
    fn test_wraparound_keeps_order() {
        let (mut tx, mut rx) = event_queue::<usize, 4>(usize::MAX);
        for round in 0..50 {
            assert!(tx.enqueue(round * 2));
            assert!(tx.enqueue(round * 2 + 1));
            assert_eq!(rx.dequeue(), round * 2);
            assert_eq!(rx.dequeue(), round * 2 + 1);
        }
        assert_eq!(rx.dequeue(), usize::MAX);
    }

    #[test]
    fn test_owned_items_are_moved_out() {
        let (mut tx, mut rx) = event_queue::<Option<String>, 4>(None);
        assert!(tx.enqueue(Some("a4".to_string())));
        assert_eq!(rx.dequeue().as_deref(), Some("a4"));
        assert_eq!(rx.dequeue(), None);
    }

    #[test]
    fn test_two_threads_nothing_lost_duplicated_or_reordered() {
        const COUNT: u64 = 200_000;
        let (mut tx, mut rx) = event_queue::<u64, 64>(u64::MAX);

        let producer = thread::spawn(move || {
            for i in 0..COUNT {
                tx.enqueue_spin(i);
            }
        });

        let consumer = thread::spawn(move || {
            let mut expected = 0;
            while expected < COUNT {
                let item = rx.dequeue();
                if item == u64::MAX {
                    std::hint::spin_loop();
                    continue;
                }
                assert_eq!(item, expected);
                expected += 1;
            }
            assert_eq!(rx.dequeue(), u64::MAX);
            expected
        });

        producer.join().unwrap();
        assert_eq!(consumer.join().unwrap(), COUNT);
    }
}
