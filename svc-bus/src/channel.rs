use std::{
    collections::VecDeque,
    sync::{Condvar, Mutex, MutexGuard, PoisonError},
};

/// Default capacity shared by every channel of one pipeline.
pub const DEFAULT_CAPACITY: usize = 50;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Closing {
    Open,
    /// no new puts; takes continue until the queue is empty
    Draining,
    Closed,
}

struct State<T> {
    queue: VecDeque<T>,
    closing: Closing,
}

/// Blocking bounded FIFO queue connecting two pipeline stages.
///
/// `put` waits while the queue is full, `take` waits while it is empty.
/// Both return early once the channel is closed: a rejected item is handed
/// back to the caller, and `take` yields `None`.
pub struct BoundedChannel<T> {
    capacity: usize,
    state: Mutex<State<T>>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl<T> BoundedChannel<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            state: Mutex::new(State {
                queue: VecDeque::with_capacity(capacity),
                closing: Closing::Open,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Inserts `item`, blocking while the channel is full.
    ///
    /// Returns the item back in `Err` if the channel is (or becomes) closed.
    pub fn put(&self, item: T) -> Result<(), T> {
        let guard = self.lock();
        let mut guard = self
            .not_full
            .wait_while(guard, |s| {
                s.closing == Closing::Open && s.queue.len() >= self.capacity
            })
            .unwrap_or_else(PoisonError::into_inner);

        if guard.closing != Closing::Open {
            return Err(item);
        }

        guard.queue.push_back(item);
        drop(guard);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Removes the oldest item, blocking while the channel is empty.
    ///
    /// Returns `None` once the channel is closed, or once it is drain-closed
    /// and every queued item has been taken.
    pub fn take(&self) -> Option<T> {
        let guard = self.lock();
        let mut guard = self
            .not_empty
            .wait_while(guard, |s| s.closing == Closing::Open && s.queue.is_empty())
            .unwrap_or_else(PoisonError::into_inner);

        if guard.closing == Closing::Closed {
            return None;
        }

        let item = guard.queue.pop_front();
        drop(guard);
        if item.is_some() {
            self.not_full.notify_one();
        }
        item
    }

    /// Closes the channel now and wakes every blocked caller.
    ///
    /// Items still queued are returned so that their owner releases them.
    pub fn close(&self) -> Vec<T> {
        let discarded = {
            let mut guard = self.lock();
            guard.closing = Closing::Closed;
            guard.queue.drain(..).collect::<Vec<_>>()
        };
        self.not_full.notify_all();
        self.not_empty.notify_all();
        discarded
    }

    /// Refuses new items but lets consumers take what is already queued.
    pub fn close_after_drain(&self) {
        {
            let mut guard = self.lock();
            if guard.closing == Closing::Open {
                guard.closing = Closing::Draining;
            }
        }
        self.not_full.notify_all();
        self.not_empty.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closing != Closing::Open
    }

    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().queue.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.lock().queue.len() >= self.capacity
    }
}

impl<T> Default for BoundedChannel<T> {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
#[path = "channel_test.rs"]
mod channel_test;
