//! Bounded receive message queue
//!
//! Fixed-capacity ring buffer shared by the reception thread (producer) and
//! the application (consumer). Enqueue never blocks: when the ring is full
//! the new element is dropped and the loss is recorded in an overflow counter
//! and a sticky overflow flag. Dequeue waits on a condition variable with an
//! optional timeout and can be woken without data through `signal`. A closed
//! queue never blocks until `reset` opens it again.

use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::error::{KvaserError, Result};

struct Ring<T> {
    slots: Vec<T>,
    head: usize,
    tail: usize,
    used: usize,
    high_water: usize,
    overflow_counter: u64,
    overflow: bool,
    /// Bumped by `signal` so that waiting readers give up
    epoch: u64,
    closed: bool,
}

impl<T: Copy> Ring<T> {
    fn push(&mut self, element: T) -> bool {
        if self.used == self.slots.len() {
            self.overflow_counter = self.overflow_counter.saturating_add(1);
            self.overflow = true;
            return false;
        }
        self.slots[self.tail] = element;
        self.tail = (self.tail + 1) % self.slots.len();
        self.used += 1;
        self.high_water = self.high_water.max(self.used);
        true
    }

    fn pop(&mut self) -> Option<T> {
        if self.used == 0 {
            return None;
        }
        let element = self.slots[self.head];
        self.head = (self.head + 1) % self.slots.len();
        self.used -= 1;
        Some(element)
    }
}

/// Thread-safe bounded FIFO of `Copy` elements
pub struct MessageQueue<T> {
    ring: Mutex<Ring<T>>,
    cond: Condvar,
}

impl<T: Copy + Default> MessageQueue<T> {
    /// Create a queue holding at most `capacity` elements
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(KvaserError::IllegalParameter("queue capacity must not be zero"));
        }
        Ok(Self {
            ring: Mutex::new(Ring {
                slots: vec![T::default(); capacity],
                head: 0,
                tail: 0,
                used: 0,
                high_water: 0,
                overflow_counter: 0,
                overflow: false,
                epoch: 0,
                closed: false,
            }),
            cond: Condvar::new(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Ring<T>> {
        self.ring.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append an element without blocking
    ///
    /// Returns `KvaserError::Full` when the queue is at capacity; the element
    /// is dropped and the overflow counter is incremented.
    pub fn enqueue(&self, element: T) -> Result<()> {
        let stored = self.lock().push(element);
        if !stored {
            return Err(KvaserError::Full);
        }
        self.cond.notify_one();
        Ok(())
    }

    /// Remove the oldest element
    ///
    /// * `None` - wait until an element arrives, `signal` or `close` is called
    /// * `Some(Duration::ZERO)` - poll
    /// * `Some(timeout)` - wait at most `timeout`
    ///
    /// Returns `KvaserError::Empty` when no element could be taken. Elements
    /// still queued when the queue is closed can be taken.
    pub fn dequeue(&self, timeout: Option<Duration>) -> Result<T> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut ring = self.lock();
        let epoch = ring.epoch;
        loop {
            if let Some(element) = ring.pop() {
                return Ok(element);
            }
            if ring.closed || ring.epoch != epoch {
                return Err(KvaserError::Empty);
            }
            ring = match deadline {
                None => self
                    .cond
                    .wait(ring)
                    .unwrap_or_else(|poisoned| poisoned.into_inner()),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(KvaserError::Empty);
                    }
                    self.cond
                        .wait_timeout(ring, deadline - now)
                        .map(|(guard, _)| guard)
                        .unwrap_or_else(|poisoned| poisoned.into_inner().0)
                }
            };
        }
    }

    /// Wake every waiting reader without delivering data
    pub fn signal(&self) {
        let mut ring = self.lock();
        ring.epoch = ring.epoch.wrapping_add(1);
        drop(ring);
        self.cond.notify_all();
    }

    /// Wake every waiting reader and stop later reads from blocking
    pub fn close(&self) {
        self.lock().closed = true;
        self.cond.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Discard all elements, clear the overflow state and reopen the queue
    pub fn reset(&self) {
        let mut ring = self.lock();
        ring.head = 0;
        ring.tail = 0;
        ring.used = 0;
        ring.high_water = 0;
        ring.overflow_counter = 0;
        ring.overflow = false;
        ring.closed = false;
    }

    /// Number of queued elements
    pub fn len(&self) -> usize {
        self.lock().used
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.lock().slots.len()
    }

    /// Highest number of elements queued at the same time
    pub fn high_water(&self) -> usize {
        self.lock().high_water
    }

    /// Number of elements dropped because the queue was full
    pub fn overflow_counter(&self) -> u64 {
        self.lock().overflow_counter
    }

    /// Sticky flag, set on the first overflow until `reset`
    pub fn is_overflow(&self) -> bool {
        self.lock().overflow
    }
}

impl<T> std::fmt::Debug for MessageQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ring = self.ring.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f.debug_struct("MessageQueue")
            .field("capacity", &ring.slots.len())
            .field("used", &ring.used)
            .field("high_water", &ring.high_water)
            .field("overflow_counter", &ring.overflow_counter)
            .field("closed", &ring.closed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(matches!(
            MessageQueue::<u32>::new(0),
            Err(KvaserError::IllegalParameter(_))
        ));
    }

    #[test]
    fn test_fifo_order() {
        let queue = MessageQueue::new(4).unwrap();
        for i in 0..4u32 {
            queue.enqueue(i).unwrap();
        }
        for i in 0..4u32 {
            assert_eq!(queue.dequeue(Some(Duration::ZERO)).unwrap(), i);
        }
        assert!(matches!(queue.dequeue(Some(Duration::ZERO)), Err(KvaserError::Empty)));
    }

    #[test]
    fn test_wraps_around() {
        let queue = MessageQueue::new(3).unwrap();
        for round in 0..10u32 {
            queue.enqueue(round).unwrap();
            queue.enqueue(round + 100).unwrap();
            assert_eq!(queue.dequeue(Some(Duration::ZERO)).unwrap(), round);
            assert_eq!(queue.dequeue(Some(Duration::ZERO)).unwrap(), round + 100);
        }
        assert_eq!(queue.high_water(), 2);
    }

    #[test]
    fn test_overflow_drops_newest() {
        let queue = MessageQueue::new(3).unwrap();
        for i in 0..3u32 {
            queue.enqueue(i).unwrap();
        }
        assert!(matches!(queue.enqueue(99), Err(KvaserError::Full)));
        assert_eq!(queue.overflow_counter(), 1);
        assert!(queue.is_overflow());
        assert_eq!(queue.len(), 3);
        for i in 0..3u32 {
            assert_eq!(queue.dequeue(Some(Duration::ZERO)).unwrap(), i);
        }
        // sticky until reset
        assert!(queue.is_overflow());
        queue.reset();
        assert!(!queue.is_overflow());
        assert_eq!(queue.overflow_counter(), 0);
    }

    #[test]
    fn test_dequeue_timeout() {
        let queue = MessageQueue::<u8>::new(1).unwrap();
        let start = Instant::now();
        assert!(matches!(
            queue.dequeue(Some(Duration::from_millis(20))),
            Err(KvaserError::Empty)
        ));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_blocking_dequeue_receives_from_other_thread() {
        let queue = Arc::new(MessageQueue::new(8).unwrap());
        let producer = Arc::clone(&queue);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            producer.enqueue(42u16).unwrap();
        });
        assert_eq!(queue.dequeue(None).unwrap(), 42);
        handle.join().unwrap();
    }

    #[test]
    fn test_signal_wakes_reader() {
        let queue = Arc::new(MessageQueue::<u8>::new(8).unwrap());
        let reader = Arc::clone(&queue);
        let handle = thread::spawn(move || reader.dequeue(None));
        while !handle.is_finished() {
            thread::sleep(Duration::from_millis(5));
            queue.signal();
        }
        assert!(matches!(handle.join().unwrap(), Err(KvaserError::Empty)));
    }

    #[test]
    fn test_close_wakes_reader_and_stays_closed() {
        let queue = Arc::new(MessageQueue::<u8>::new(8).unwrap());
        let reader = Arc::clone(&queue);
        let handle = thread::spawn(move || reader.dequeue(None));
        thread::sleep(Duration::from_millis(20));
        queue.close();
        assert!(matches!(handle.join().unwrap(), Err(KvaserError::Empty)));

        // later reads return at once
        let start = Instant::now();
        assert!(matches!(queue.dequeue(None), Err(KvaserError::Empty)));
        assert!(matches!(
            queue.dequeue(Some(Duration::from_secs(5))),
            Err(KvaserError::Empty)
        ));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_closed_queue_drains_then_reset_reopens() {
        let queue = MessageQueue::new(4).unwrap();
        queue.enqueue(7u32).unwrap();
        queue.close();
        assert!(queue.is_closed());
        assert_eq!(queue.dequeue(None).unwrap(), 7);
        assert!(matches!(queue.dequeue(None), Err(KvaserError::Empty)));

        queue.reset();
        assert!(!queue.is_closed());
        assert!(matches!(
            queue.dequeue(Some(Duration::from_millis(10))),
            Err(KvaserError::Empty)
        ));
    }
}
