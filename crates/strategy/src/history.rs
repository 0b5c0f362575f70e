use std::collections::VecDeque;

/// Fixed-capacity history, newest last. Pushing past capacity drops the oldest.
#[derive(Debug, Clone)]
pub struct History<T> {
    capacity: usize,
    items: VecDeque<T>,
}

impl<T> History<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            items: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, item: T) {
        if self.items.len() == self.capacity {
            self.items.pop_front();
        }
        self.items.push_back(item);
    }

    /// `back = 0` is the newest item, `1` the one before it, and so on.
    pub fn get(&self, back: usize) -> Option<&T> {
        let len = self.items.len();
        if back >= len {
            return None;
        }
        self.items.get(len - 1 - back)
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

    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drops_oldest_when_full() {
        let mut h = History::new(3);
        for i in 0..5 {
            h.push(i);
        }
        assert_eq!(h.len(), 3);
        assert_eq!(h.get(0), Some(&4));
        assert_eq!(h.get(2), Some(&2));
        assert_eq!(h.get(3), None);
        assert_eq!(h.iter().copied().collect::<Vec<_>>(), vec![2, 3, 4]);
    }

    #[test]
    fn zero_capacity_is_promoted_to_one() {
        let mut h = History::new(0);
        h.push('a');
        h.push('b');
        assert_eq!(h.latest(), Some(&'b'));
        assert_eq!(h.len(), 1);
    }
}
