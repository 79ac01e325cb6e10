//! The ingest queue: a many-producer FIFO with a blocking consumer.

use std::collections::VecDeque;

use parking_lot::{Condvar, Mutex};

struct State<T> {
    data: VecDeque<T>,
    closed: bool,
}

pub struct Queue<T> {
    state: Mutex<State<T>>,
    available: Condvar,
}

impl<T> Default for Queue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Queue<T> {
    pub fn new() -> Self {
        Queue {
            state: Mutex::new(State {
                data: VecDeque::new(),
                closed: false,
            }),
            available: Condvar::new(),
        }
    }

    /// Append an element and wake the consumer. Elements offered after
    /// [`Queue::close`] are dropped.
    pub fn add(&self, element: T) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        state.data.push_back(element);
        self.available.notify_one();
    }

    /// Pop the oldest pending element, blocking while the queue is empty.
    /// Returns `None` once the queue is closed and drained.
    pub fn consume(&self) -> Option<T> {
        let mut state = self.state.lock();
        while state.data.is_empty() {
            if state.closed {
                return None;
            }
            // Fully drained: give the backing buffer up so a burst cannot
            // pin its high-water capacity forever.
            state.data = VecDeque::new();
            self.available.wait(&mut state);
        }
        state.data.pop_front()
    }

    pub fn len(&self) -> usize {
        self.state.lock().data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wake the consumer permanently; pending elements stay consumable.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        self.available.notify_all();
    }
}
