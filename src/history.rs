use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Fixed-capacity sequence; pushing onto a full history evicts the oldest entry.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundedHistory<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> BoundedHistory<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Builds a history from items ordered oldest first, keeping only the newest `capacity`.
    pub fn from_vec(capacity: usize, items: Vec<T>) -> Self {
        let mut history = Self::new(capacity);
        let skip = items.len().saturating_sub(history.capacity);
        history.items.extend(items.into_iter().skip(skip));
        history
    }

    /// Appends an item and returns the evicted one, if any.
    pub fn push(&mut self, item: T) -> Option<T> {
        let evicted = if self.items.len() >= self.capacity {
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(item);
        evicted
    }

    pub fn latest(&self) -> Option<&T> {
        self.items.back()
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

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + ExactSizeIterator {
        self.items.iter()
    }

    /// Values projected from each entry, oldest first.
    pub fn values<F>(&self, f: F) -> Vec<f64>
    where
        F: Fn(&T) -> f64,
    {
        self.items.iter().map(f).collect()
    }
}

impl<T: Clone> BoundedHistory<T> {
    pub fn to_vec(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }
}

impl<T: Serialize> Serialize for BoundedHistory<T> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.items.iter())
    }
}

/// Persisted form is a plain array; the capacity comes from the owner.
#[derive(Debug, Deserialize)]
#[serde(transparent)]
pub struct StoredHistory<T>(pub Vec<T>);
