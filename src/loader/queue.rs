//! Pending load requests.

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

use parking_lot::Mutex;

/// Order in which the dispatcher picks pending requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrderPolicy {
    /// Oldest request first.
    Fifo,
    /// Most recent request first; favours content that is currently on screen.
    #[default]
    Lifo,
}

impl fmt::Display for OrderPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fifo => f.write_str("fifo"),
            Self::Lifo => f.write_str("lifo"),
        }
    }
}

impl FromStr for OrderPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fifo" => Ok(Self::Fifo),
            "lifo" => Ok(Self::Lifo),
            other => Err(format!("unknown ordering policy: {other}")),
        }
    }
}

/// Mutex-guarded double-ended queue of pending requests.
pub struct TaskQueue<T> {
    items: Mutex<VecDeque<T>>,
}

impl<T> TaskQueue<T> {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
        }
    }

    pub fn push_tail(&self, item: T) {
        self.items.lock().push_back(item);
    }

    /// Remove the oldest item.
    ///
    /// # Panics
    /// Panics if the queue is empty. Use [`TaskQueue::try_pop`] when emptiness is possible.
    pub fn pop_head(&self) -> T {
        self.items
            .lock()
            .pop_front()
            .expect("pop_head called on an empty task queue")
    }

    /// Remove the newest item.
    ///
    /// # Panics
    /// Panics if the queue is empty.
    pub fn pop_tail(&self) -> T {
        self.items
            .lock()
            .pop_back()
            .expect("pop_tail called on an empty task queue")
    }

    /// Remove the next item according to `policy`, if any.
    pub fn try_pop(&self, policy: OrderPolicy) -> Option<T> {
        let mut items = self.items.lock();
        match policy {
            OrderPolicy::Fifo => items.pop_front(),
            OrderPolicy::Lifo => items.pop_back(),
        }
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// Drop every pending item, returning how many were removed.
    pub fn clear(&self) -> usize {
        let mut items = self.items.lock();
        let count = items.len();
        items.clear();
        count
    }
}

impl<T> Default for TaskQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
