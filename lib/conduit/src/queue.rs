//! Bounded hand-off queue between pipeline stages.
//!
//! Producers `try_enqueue` and drop on a full queue; the consumer polls with
//! `try_dequeue` or inspects the front without committing to a pop. The
//! consumer may also call `drain_excess` as a belt-and-braces guard against
//! more producers than the pairing assumes.

use std::collections::VecDeque;

use parking_lot::Mutex;

pub const DEFAULT_CAPACITY: usize = 256;

pub struct BoundedQueue<T> {
    inner: Mutex<VecDeque<T>>,
    capacity: usize,
}

impl<T> BoundedQueue<T> {
    pub fn new(capacity: usize) -> BoundedQueue<T> {
        assert!(capacity > 0, "Queue capacity must be positive");
        BoundedQueue {
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The observed queue depth.
    #[inline]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Appends unless the queue is full. Returns false (discarding the
    /// value) on overflow; the producer is expected to count the drop.
    pub fn try_enqueue(&self, value: T) -> bool {
        let mut queue = self.inner.lock();
        if queue.len() >= self.capacity {
            return false;
        }
        queue.push_back(value);
        true
    }

    pub fn try_dequeue(&self) -> Option<T> {
        self.inner.lock().pop_front()
    }

    /// Applies `f` to the front element without removing it.
    pub fn front<R>(&self, f: impl FnOnce(Option<&T>) -> R) -> R {
        let queue = self.inner.lock();
        f(queue.front())
    }

    /// Pops the front element; returns false when the queue was empty.
    pub fn pop(&self) -> bool {
        self.inner.lock().pop_front().is_some()
    }

    /// Pops from the front until the depth is back within capacity,
    /// returning the number of discarded elements.
    pub fn drain_excess(&self) -> usize {
        let mut queue = self.inner.lock();
        let mut deleted = 0;
        while queue.len() > self.capacity {
            if queue.pop_front().is_none() {
                break;
            }
            deleted += 1;
        }
        deleted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_fifo_order() {
        let queue = BoundedQueue::new(8);
        for i in 0..5 {
            assert!(queue.try_enqueue(i));
        }
        for i in 0..5 {
            assert_eq!(queue.try_dequeue(), Some(i));
        }
        assert_eq!(queue.try_dequeue(), None);
    }

    #[test]
    fn test_overflow_is_bounded() {
        let queue = BoundedQueue::new(4);
        let mut discarded = 0;
        for i in 0..10 {
            if !queue.try_enqueue(i) {
                discarded += 1;
            }
        }
        // After a burst of N enqueues at capacity Q, at most N - Q survive.
        assert_eq!(queue.len(), 4);
        assert_eq!(discarded, 6);
        assert_eq!(queue.try_dequeue(), Some(0));
    }

    #[test]
    fn test_front_is_non_destructive() {
        let queue = BoundedQueue::new(4);
        assert!(queue.front(|front| front.is_none()));

        queue.try_enqueue("head");
        queue.try_enqueue("tail");
        assert_eq!(queue.front(|front| front.copied()), Some("head"));
        assert_eq!(queue.len(), 2);
        assert!(queue.pop());
        assert_eq!(queue.front(|front| front.copied()), Some("tail"));
    }

    #[test]
    fn test_producer_consumer_hand_off() {
        let queue = Arc::new(BoundedQueue::new(DEFAULT_CAPACITY));
        let producer_queue = Arc::clone(&queue);

        let producer = thread::spawn(move || {
            let mut accepted = 0;
            for i in 0..10_000 {
                if producer_queue.try_enqueue(i) {
                    accepted += 1;
                }
            }
            accepted
        });

        let mut received = Vec::new();
        while received.len() < 100 {
            if let Some(value) = queue.try_dequeue() {
                received.push(value);
            }
        }
        let accepted = producer.join().unwrap();
        assert!(accepted >= 100);

        // Surviving values keep their order.
        for pair in received.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }

    #[test]
    fn test_drain_excess_noop_within_capacity() {
        let queue = BoundedQueue::new(4);
        queue.try_enqueue(1);
        assert_eq!(queue.drain_excess(), 0);
        assert_eq!(queue.len(), 1);
    }
}
