//! Bounded in-memory tier ordered by insertion.

use std::{
    collections::{HashMap, VecDeque},
    hash::Hash,
    time::{Duration, Instant},
};

#[derive(Debug)]
struct Slot<V> {
    value: V,
    seq: u64,
    written_at: Instant,
}

/// Count- and age-bounded map that evicts the oldest-written entry first.
///
/// Rewriting an entry with changed content moves it to the back of the
/// eviction order; rewriting identical content does not.
#[derive(Debug)]
pub(crate) struct FastTier<K, V> {
    slots: HashMap<K, Slot<V>>,
    order: VecDeque<(K, u64)>,
    next_seq: u64,
    max_entries: usize,
    max_age: Duration,
}

impl<K, V> FastTier<K, V>
where
    K: Copy + Eq + Hash,
{
    pub(crate) fn new(max_entries: usize, max_age: Duration) -> Self {
        Self {
            slots: HashMap::new(),
            order: VecDeque::new(),
            next_seq: 0,
            max_entries,
            max_age,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn get(&self, key: &K) -> Option<&V> {
        self.slots.get(key).map(|slot| &slot.value)
    }

    pub(crate) fn contains(&self, key: &K) -> bool {
        self.slots.contains_key(key)
    }

    /// Store `value` under `key` as the newest entry.
    pub(crate) fn insert(&mut self, key: K, value: V, now: Instant) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.slots.insert(
            key,
            Slot {
                value,
                seq,
                written_at: now,
            },
        );
        self.order.push_back((key, seq));
        self.compact();
    }

    /// Apply `update` to the entry for `key`, creating it from `V::default()`
    /// when absent. The entry becomes the newest only when `update` reports a
    /// change or the entry is new.
    pub(crate) fn update<F>(&mut self, key: K, now: Instant, update: F) -> bool
    where
        V: Default,
        F: FnOnce(&mut V) -> bool,
    {
        if let Some(slot) = self.slots.get_mut(&key) {
            if !update(&mut slot.value) {
                return false;
            }
            slot.written_at = now;
            let seq = self.next_seq;
            slot.seq = seq;
            self.next_seq += 1;
            self.order.push_back((key, seq));
            self.compact();
            return true;
        }
        let mut value = V::default();
        update(&mut value);
        self.insert(key, value, now);
        true
    }

    /// Pop entries, oldest first, until both bounds hold.
    pub(crate) fn evict(&mut self, now: Instant) -> Vec<(K, V)> {
        let mut evicted = Vec::new();
        while let Some((key, written_at)) = self.oldest() {
            let too_many = self.slots.len() > self.max_entries;
            let too_old = now.saturating_duration_since(written_at) >= self.max_age;
            if !(too_many || too_old) {
                break;
            }
            self.order.pop_front();
            if let Some(removed) = self.slots.remove(&key) {
                evicted.push((key, removed.value));
            }
        }
        evicted
    }

    /// Oldest live entry, discarding stale order records on the way.
    fn oldest(&mut self) -> Option<(K, Instant)> {
        while let Some(&(key, seq)) = self.order.front() {
            match self.slots.get(&key) {
                Some(slot) if slot.seq == seq => return Some((key, slot.written_at)),
                _ => {
                    self.order.pop_front();
                }
            }
        }
        None
    }

    fn compact(&mut self) {
        if self.order.len() <= self.slots.len().saturating_mul(2).saturating_add(16) {
            return;
        }
        let slots = &self.slots;
        self.order
            .retain(|(key, seq)| slots.get(key).is_some_and(|slot| slot.seq == *seq));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn keys(evicted: &[(u32, &'static str)]) -> Vec<u32> {
        evicted.iter().map(|(key, _)| *key).collect()
    }

    #[rstest]
    fn evicts_oldest_written_first_when_full() {
        let now = Instant::now();
        let mut tier = FastTier::new(2, Duration::from_secs(60));
        tier.insert(1, "a", now);
        tier.insert(2, "b", now);
        tier.insert(3, "c", now);
        let evicted = tier.evict(now);
        assert_eq!(keys(&evicted), vec![1]);
        assert_eq!(tier.len(), 2);
    }

    #[rstest]
    fn identical_rewrite_keeps_position() {
        let now = Instant::now();
        let mut tier: FastTier<u32, &'static str> = FastTier::new(2, Duration::from_secs(60));
        tier.insert(1, "a", now);
        tier.insert(2, "b", now);
        let changed = tier.update(1, now, |value| {
            let differs = *value != "a";
            *value = "a";
            differs
        });
        assert!(!changed);
        tier.insert(3, "c", now);
        assert_eq!(keys(&tier.evict(now)), vec![1]);
    }

    #[rstest]
    fn changed_rewrite_moves_to_back() {
        let now = Instant::now();
        let mut tier: FastTier<u32, &'static str> = FastTier::new(2, Duration::from_secs(60));
        tier.insert(1, "a", now);
        tier.insert(2, "b", now);
        assert!(tier.update(1, now, |value| {
            *value = "z";
            true
        }));
        tier.insert(3, "c", now);
        assert_eq!(keys(&tier.evict(now)), vec![2]);
        assert_eq!(tier.get(&1), Some(&"z"));
    }

    #[rstest]
    fn expired_entries_are_evicted() {
        let start = Instant::now();
        let mut tier = FastTier::new(10, Duration::from_secs(5));
        tier.insert(1, "a", start);
        tier.insert(2, "b", start + Duration::from_secs(3));
        let evicted = tier.evict(start + Duration::from_secs(6));
        assert_eq!(keys(&evicted), vec![1]);
        assert!(tier.contains(&2));
    }

    #[rstest]
    fn order_index_stays_bounded() {
        let now = Instant::now();
        let mut tier: FastTier<u32, u32> = FastTier::new(4, Duration::from_secs(60));
        for round in 0..1_000 {
            tier.update(1, now, |value| {
                *value = round;
                true
            });
        }
        assert!(tier.order.len() <= 18);
    }
}
