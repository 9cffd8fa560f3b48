//! Bounded memory of recently seen keys
//!
//! Keeps at most `capacity` entries; inserting past that drops the oldest.

use std::collections::{HashMap, VecDeque};

pub struct RecentSet<V = ()> {
    capacity: usize,
    order: VecDeque<String>,
    entries: HashMap<String, V>,
}

impl<V> RecentSet<V> {
    pub fn new(capacity: usize) -> RecentSet<V> {
        RecentSet {
            capacity: capacity.max(1),
            order: VecDeque::new(),
            entries: HashMap::new(),
        }
    }

    /// Returns false when `key` was already present; its value is replaced
    pub fn insert(&mut self, key: String, value: V) -> bool {
        if let Some(existing) = self.entries.get_mut(&key) {
            *existing = value;
            return false;
        }
        self.order.push_back(key.clone());
        self.entries.insert(key, value);
        while self.entries.len() > self.capacity {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.entries.remove(&oldest);
                }
                None => break,
            }
        }
        true
    }

    pub fn get(&self, key: &str) -> Option<&V> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl RecentSet<()> {
    pub fn remember(&mut self, key: &str) -> bool {
        self.insert(key.to_string(), ())
    }
}
