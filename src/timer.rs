//! Doubly-linked timer list sorted by absolute expiry, used for idle-connection eviction
//! (spec §4.5). Entries live in a [`slab::Slab`] arena; each external reference also carries
//! a generation counter bumped on removal so a reference into a reused slot is rejected
//! rather than silently aliasing a different connection's timer (spec §9).

use std::time::Instant;

use slab::Slab;

struct Entry {
    expire_at: Instant,
    conn_token: usize,
    prev: Option<usize>,
    next: Option<usize>,
}

/// A generation-checked handle to a timer entry. Never dereferenced directly; always
/// validated against the arena's current generation for that slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerRef {
    key: usize,
    generation: u32,
}

pub struct TimerList {
    slab: Slab<Entry>,
    generations: Vec<u32>,
    head: Option<usize>,
    tail: Option<usize>,
}

impl TimerList {
    pub fn new() -> Self {
        Self {
            slab: Slab::new(),
            generations: Vec::new(),
            head: None,
            tail: None,
        }
    }

    fn generation_of(&mut self, key: usize) -> u32 {
        if key >= self.generations.len() {
            self.generations.resize(key + 1, 0);
        }
        self.generations[key]
    }

    /// Inserts a new entry, keeping the list sorted non-decreasing by `expire_at`.
    pub fn add(&mut self, conn_token: usize, expire_at: Instant) -> TimerRef {
        let key = self.slab.insert(Entry {
            expire_at,
            conn_token,
            prev: None,
            next: None,
        });
        let generation = self.generation_of(key);
        self.insert_sorted(key);
        TimerRef { key, generation }
    }

    fn insert_sorted(&mut self, key: usize) {
        let expire_at = self.slab[key].expire_at;

        // Empty-list fast path.
        let Some(mut cursor) = self.head else {
            self.head = Some(key);
            self.tail = Some(key);
            return;
        };

        // Less-than-head fast path.
        if expire_at < self.slab[cursor].expire_at {
            self.slab[key].next = Some(cursor);
            self.slab[cursor].prev = Some(key);
            self.head = Some(key);
            return;
        }

        loop {
            match self.slab[cursor].next {
                Some(next) if self.slab[next].expire_at <= expire_at => cursor = next,
                _ => break,
            }
        }

        let after = self.slab[cursor].next;
        self.slab[cursor].next = Some(key);
        self.slab[key].prev = Some(cursor);
        self.slab[key].next = after;
        match after {
            Some(a) => self.slab[a].prev = Some(key),
            None => self.tail = Some(key),
        }
    }

    fn unlink(&mut self, key: usize) {
        let (prev, next) = (self.slab[key].prev, self.slab[key].next);
        match prev {
            Some(p) => self.slab[p].next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.slab[n].prev = prev,
            None => self.tail = prev,
        }
    }

    fn validate(&self, timer_ref: TimerRef) -> bool {
        self.slab.contains(timer_ref.key)
            && self.generations.get(timer_ref.key) == Some(&timer_ref.generation)
    }

    /// Extends an entry's expiry (activity resets the idle deadline). A no-op, not an
    /// error, if `timer_ref` is stale. If the new expiry still sorts at or before the
    /// entry's current position, only the timestamp is updated in place.
    pub fn adjust(&mut self, timer_ref: TimerRef, new_expire_at: Instant) -> bool {
        if !self.validate(timer_ref) {
            return false;
        }
        let key = timer_ref.key;
        let still_sorted = match self.slab[key].next {
            Some(next) => new_expire_at <= self.slab[next].expire_at,
            None => true,
        };
        if still_sorted {
            self.slab[key].expire_at = new_expire_at;
            return true;
        }
        self.unlink(key);
        self.slab[key].expire_at = new_expire_at;
        self.slab[key].prev = None;
        self.slab[key].next = None;
        self.insert_sorted(key);
        true
    }

    /// Removes an entry, bumping its slot's generation so stale references are rejected.
    pub fn delete(&mut self, timer_ref: TimerRef) -> bool {
        if !self.validate(timer_ref) {
            return false;
        }
        self.unlink(timer_ref.key);
        self.slab.remove(timer_ref.key);
        self.generations[timer_ref.key] = self.generations[timer_ref.key].wrapping_add(1);
        true
    }

    /// Expires every entry with `expire_at <= now`, invoking `on_expire` with each
    /// connection token, then removing it. Stops at the first non-expired entry.
    pub fn tick(&mut self, now: Instant, mut on_expire: impl FnMut(usize)) {
        while let Some(key) = self.head {
            if self.slab[key].expire_at > now {
                break;
            }
            let conn_token = self.slab[key].conn_token;
            self.unlink(key);
            self.slab.remove(key);
            self.generations[key] = self.generations[key].wrapping_add(1);
            on_expire(conn_token);
        }
    }

    pub fn len(&self) -> usize {
        self.slab.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slab.is_empty()
    }
}

impl Default for TimerList {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn t(secs: u64) -> Instant {
        Instant::now() + Duration::from_secs(secs)
    }

    #[test]
    fn tick_expires_only_due_entries_in_order() {
        let mut list = TimerList::new();
        list.add(1, t(0));
        list.add(2, t(100));
        let mut expired = Vec::new();
        list.tick(Instant::now() + Duration::from_millis(10), |tok| expired.push(tok));
        assert_eq!(expired, vec![1]);
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn adjust_moves_entry_to_keep_sort_order() {
        let mut list = TimerList::new();
        let a = list.add(1, t(1));
        list.add(2, t(50));
        list.adjust(a, t(100));
        let mut expired = Vec::new();
        list.tick(Instant::now() + Duration::from_secs(60), |tok| expired.push(tok));
        assert_eq!(expired, vec![2]);
    }

    #[test]
    fn stale_ref_after_delete_is_rejected() {
        let mut list = TimerList::new();
        let a = list.add(1, t(5));
        assert!(list.delete(a));
        let b = list.add(2, t(5));
        assert_ne!(a, b);
        assert!(!list.adjust(a, t(10)));
        assert!(!list.delete(a));
    }

    #[test]
    fn delete_keeps_list_sorted() {
        let mut list = TimerList::new();
        let a = list.add(1, t(1));
        list.add(2, t(2));
        list.add(3, t(3));
        list.delete(a);
        let mut expired = Vec::new();
        list.tick(Instant::now() + Duration::from_secs(10), |tok| expired.push(tok));
        assert_eq!(expired, vec![2, 3]);
    }
}
