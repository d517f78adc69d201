//! Bounded, insertion-ordered per-session state map.
//!
//! Replaces the unbounded dict-of-dicts pattern with an explicit capacity:
//! once `capacity` sessions are tracked, inserting a new session evicts the
//! oldest-inserted one in O(1).

use std::collections::{HashMap, VecDeque};

/// Insertion-ordered map from session id to per-session state with
/// oldest-first eviction once capacity is exceeded.
#[derive(Debug)]
pub struct BoundedSessionMap<T> {
    capacity: usize,
    order: VecDeque<String>,
    entries: HashMap<String, T>,
}

impl<T> BoundedSessionMap<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            order: VecDeque::new(),
            entries: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, session_id: &str) -> Option<&T> {
        self.entries.get(session_id)
    }

    pub fn get_mut(&mut self, session_id: &str) -> Option<&mut T> {
        self.entries.get_mut(session_id)
    }

    /// Get the state for a session, inserting a default-constructed entry
    /// (and possibly evicting the oldest session) when absent.
    pub fn get_or_insert_with(&mut self, session_id: &str, default: impl FnOnce() -> T) -> &mut T {
        if !self.entries.contains_key(session_id) {
            self.insert(session_id.to_owned(), default());
        }
        self.entries
            .get_mut(session_id)
            .expect("entry just inserted")
    }

    /// Insert state for a session, evicting the oldest-inserted session if
    /// the map is at capacity. Returns the evicted entry, if any.
    pub fn insert(&mut self, session_id: String, value: T) -> Option<(String, T)> {
        let mut evicted = None;
        if !self.entries.contains_key(&session_id) {
            if self.entries.len() >= self.capacity {
                if let Some(oldest) = self.order.pop_front() {
                    if let Some(old_value) = self.entries.remove(&oldest) {
                        evicted = Some((oldest, old_value));
                    }
                }
            }
            self.order.push_back(session_id.clone());
        }
        self.entries.insert(session_id, value);
        evicted
    }

    pub fn remove(&mut self, session_id: &str) -> Option<T> {
        let removed = self.entries.remove(session_id);
        if removed.is_some() {
            self.order.retain(|tracked| tracked != session_id);
        }
        removed
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &T)> {
        self.entries.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&String, &mut T)> {
        self.entries.iter_mut()
    }

    /// Session ids in insertion order (oldest first).
    pub fn session_ids(&self) -> impl Iterator<Item = &String> {
        self.order.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evicts_oldest_at_capacity() {
        let mut map: BoundedSessionMap<u32> = BoundedSessionMap::new(2);
        map.insert("a".into(), 1);
        map.insert("b".into(), 2);
        let evicted = map.insert("c".into(), 3);
        assert_eq!(evicted, Some(("a".into(), 1)));
        assert!(map.get("a").is_none());
        assert_eq!(map.get("b"), Some(&2));
        assert_eq!(map.get("c"), Some(&3));
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn test_reinsert_does_not_evict() {
        let mut map: BoundedSessionMap<u32> = BoundedSessionMap::new(2);
        map.insert("a".into(), 1);
        map.insert("b".into(), 2);
        assert!(map.insert("a".into(), 10).is_none());
        assert_eq!(map.get("a"), Some(&10));
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn test_get_or_insert_with_creates_default() {
        let mut map: BoundedSessionMap<Vec<u32>> = BoundedSessionMap::new(4);
        map.get_or_insert_with("s1", Vec::new).push(7);
        assert_eq!(map.get("s1"), Some(&vec![7]));
    }

    #[test]
    fn test_remove_keeps_order_consistent() {
        let mut map: BoundedSessionMap<u32> = BoundedSessionMap::new(2);
        map.insert("a".into(), 1);
        map.insert("b".into(), 2);
        map.remove("a");
        map.insert("c".into(), 3);
        // "b" is now oldest; inserting "d" evicts it.
        let evicted = map.insert("d".into(), 4);
        assert_eq!(evicted, Some(("b".into(), 2)));
    }
}
