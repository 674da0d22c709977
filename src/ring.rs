//! Fixed-capacity, oldest-overwritten buffer shared by the event history,
//! the healing log and the analytics series.

use std::collections::VecDeque;

#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> RingBuffer<T> {
    /// A zero capacity is treated as 1 so the latest item is always retained.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity.min(4096)),
            capacity,
        }
    }

    /// Append, evicting the oldest item when full. Returns the evicted item.
    pub fn push(&mut self, item: T) -> Option<T> {
        let evicted = if self.items.len() == self.capacity {
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(item);
        evicted
    }

    /// Insert keeping items ordered by `key`, placing ties after existing
    /// items. When full, the oldest item is evicted; an item older than
    /// everything retained is handed straight back.
    pub fn insert_by_key<K: Ord, F: Fn(&T) -> K>(&mut self, item: T, key: F) -> Option<T> {
        let k = key(&item);
        let mut pos = self
            .items
            .iter()
            .rposition(|existing| key(existing) <= k)
            .map_or(0, |p| p + 1);
        let evicted = if self.items.len() == self.capacity {
            if pos == 0 {
                return Some(item);
            }
            pos -= 1;
            self.items.pop_front()
        } else {
            None
        };
        self.items.insert(pos, item);
        evicted
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Oldest to newest.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + ExactSizeIterator {
        self.items.iter()
    }

    pub fn retain<F: FnMut(&T) -> bool>(&mut self, f: F) {
        self.items.retain(f);
    }
}

impl<T: Clone> RingBuffer<T> {
    /// The most recent `limit` items, oldest first.
    pub fn latest(&self, limit: usize) -> Vec<T> {
        let skip = self.items.len().saturating_sub(limit);
        self.items.iter().skip(skip).cloned().collect()
    }

    /// The most recent `limit` items matching `pred`, oldest first.
    pub fn latest_matching<F: Fn(&T) -> bool>(&self, limit: usize, pred: F) -> Vec<T> {
        let mut out: Vec<T> = self
            .items
            .iter()
            .rev()
            .filter(|item| pred(item))
            .take(limit)
            .cloned()
            .collect();
        out.reverse();
        out
    }
}
