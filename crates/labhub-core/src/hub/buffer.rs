//! Bounded warm buffer with an explicit closed flag.
//!
//! Push, pop, close and the buffered counter all go through one lock, so a
//! push racing with `close` is rejected instead of landing in a drained
//! buffer, and the counter can never underflow.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Why an item was not accepted by [`WarmBuffer::try_push`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Rejected {
    Full,
    Closed,
}

struct State<T> {
    queue: VecDeque<T>,
    closed: bool,
}

pub(crate) struct WarmBuffer<T> {
    state: Mutex<State<T>>,
    capacity: usize,
    /// Mirrors `queue.len()` for lock-free reads.
    count: AtomicUsize,
}

impl<T> WarmBuffer<T> {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(State {
                queue: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            capacity,
            count: AtomicUsize::new(0),
        }
    }

    /// Enqueue without waiting. Returns the buffered count on success, or the
    /// item and the reason it was refused.
    pub(crate) fn try_push(&self, item: T) -> Result<usize, (T, Rejected)> {
        let mut state = self.state.lock();
        if state.closed {
            return Err((item, Rejected::Closed));
        }
        if state.queue.len() >= self.capacity {
            return Err((item, Rejected::Full));
        }
        state.queue.push_back(item);
        Ok(self.count.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Dequeue the oldest item without waiting, with the count left behind.
    pub(crate) fn try_pop(&self) -> Option<(T, usize)> {
        let mut state = self.state.lock();
        let item = state.queue.pop_front()?;
        let remaining = self.count.fetch_sub(1, Ordering::SeqCst) - 1;
        Some((item, remaining))
    }

    pub(crate) fn len(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    /// Refuse all further pushes and hand back whatever is still queued.
    pub(crate) fn close(&self) -> Vec<T> {
        let mut state = self.state.lock();
        state.closed = true;
        self.count.store(0, Ordering::SeqCst);
        state.queue.drain(..).collect()
    }
}
