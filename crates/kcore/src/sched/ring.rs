//! The ready ring: a circular, doubly linked list of thread records kept in
//! an arena keyed by thread id.
//!
//! Links are ids rather than pointers, so unlinking a record is a map
//! removal plus two link fixes, and a stale id simply fails to look up.

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use super::thread::{Thread, ThreadId, ThreadState};

/// How far a reap pass looks for KILLED records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReapScope {
    /// The contiguous run of KILLED records directly after the cursor, plus
    /// any run the scheduler steps over while looking for the next READY
    /// record. Every KILLED record is gone within one traversal.
    #[default]
    Successors,
    /// Every KILLED record except the current one.
    Ring,
}

pub struct ReadyRing<H> {
    threads: BTreeMap<ThreadId, Thread<H>>,
}

impl<H: Copy> ReadyRing<H> {
    /// A ring holding only `anchor`, linked to itself.
    pub fn new(mut anchor: Thread<H>) -> Self {
        anchor.next = anchor.id;
        anchor.prev = anchor.id;
        let mut threads = BTreeMap::new();
        threads.insert(anchor.id, anchor);
        Self { threads }
    }

    pub fn len(&self) -> usize {
        self.threads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }

    pub fn contains(&self, id: ThreadId) -> bool {
        self.threads.contains_key(&id)
    }

    pub fn get(&self, id: ThreadId) -> Option<&Thread<H>> {
        self.threads.get(&id)
    }

    pub fn get_mut(&mut self, id: ThreadId) -> Option<&mut Thread<H>> {
        self.threads.get_mut(&id)
    }

    /// Successor of `id` in ring order.
    pub fn next_of(&self, id: ThreadId) -> Option<ThreadId> {
        self.threads.get(&id).map(|t| t.next)
    }

    /// Link `thread` in directly after `after`. Hands the record back if
    /// `after` is not in the ring.
    pub fn insert_after(&mut self, after: ThreadId, mut thread: Thread<H>) -> Result<(), Thread<H>> {
        let Some(successor) = self.next_of(after) else {
            return Err(thread);
        };
        let id = thread.id;
        thread.prev = after;
        thread.next = successor;
        self.threads.insert(id, thread);
        if let Some(pred) = self.threads.get_mut(&after) {
            pred.next = id;
        }
        if let Some(succ) = self.threads.get_mut(&successor) {
            succ.prev = id;
        }
        Ok(())
    }

    /// Remove `id` from the ring, joining its neighbours.
    pub fn unlink(&mut self, id: ThreadId) -> Option<Thread<H>> {
        let thread = self.threads.remove(&id)?;
        if thread.next != id {
            if let Some(pred) = self.threads.get_mut(&thread.prev) {
                pred.next = thread.next;
            }
            if let Some(succ) = self.threads.get_mut(&thread.next) {
                succ.prev = thread.prev;
            }
        }
        Some(thread)
    }

    /// Ids in ring order starting at `start`.
    pub fn order_from(&self, start: ThreadId) -> Vec<ThreadId> {
        let mut order = Vec::with_capacity(self.len());
        let mut cursor = start;
        while self.contains(cursor) && order.len() < self.len() {
            order.push(cursor);
            match self.next_of(cursor) {
                Some(next) if next != start => cursor = next,
                _ => break,
            }
        }
        order
    }

    /// Unlink KILLED records within `scope` of `current`, handing each to
    /// `release`. `current` itself is never reaped. Returns the count.
    pub fn reap(
        &mut self,
        current: ThreadId,
        scope: ReapScope,
        mut release: impl FnMut(Thread<H>),
    ) -> usize {
        let mut reaped = 0;
        match scope {
            ReapScope::Successors => {
                reaped = self.reap_run_after(current, current, &mut release);
            }
            ReapScope::Ring => {
                let doomed: Vec<ThreadId> = self
                    .threads
                    .values()
                    .filter(|t| t.id != current && t.state == ThreadState::Killed)
                    .map(|t| t.id)
                    .collect();
                for id in doomed {
                    if let Some(thread) = self.unlink(id) {
                        release(thread);
                        reaped += 1;
                    }
                }
            }
        }
        reaped
    }

    /// Unlink the contiguous run of KILLED records after `after`, stopping
    /// before `keep`. Returns the count.
    pub fn reap_run_after(
        &mut self,
        after: ThreadId,
        keep: ThreadId,
        mut release: impl FnMut(Thread<H>),
    ) -> usize {
        let mut reaped = 0;
        while let Some(next) = self.next_of(after) {
            if next == after || next == keep || !self.is_killed(next) {
                break;
            }
            if let Some(thread) = self.unlink(next) {
                release(thread);
                reaped += 1;
            }
        }
        reaped
    }

    /// Does following `next` from `start` visit every record exactly once
    /// and come back, with `prev` links agreeing?
    pub fn is_circular(&self, start: ThreadId) -> bool {
        let mut cursor = start;
        for _ in 0..self.len() {
            let Some(thread) = self.threads.get(&cursor) else {
                return false;
            };
            match self.threads.get(&thread.next) {
                Some(next) if next.prev == cursor => cursor = thread.next,
                _ => return false,
            }
        }
        cursor == start && self.order_from(start).len() == self.len()
    }

    fn is_killed(&self, id: ThreadId) -> bool {
        self.threads
            .get(&id)
            .is_some_and(|t| t.state == ThreadState::Killed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: u64) -> Thread<u32> {
        let mut t = Thread::anchor(0);
        t.id = ThreadId(id);
        t.state = ThreadState::Ready;
        t
    }

    fn ids(v: &[u64]) -> Vec<ThreadId> {
        v.iter().copied().map(ThreadId).collect()
    }

    #[test]
    fn insertion_lands_after_creator() {
        let mut ring = ReadyRing::new(Thread::anchor(0u32));
        assert!(ring.insert_after(ThreadId(0), record(1)).is_ok());
        assert!(ring.insert_after(ThreadId(0), record(2)).is_ok());
        assert!(ring.insert_after(ThreadId(1), record(3)).is_ok());
        assert_eq!(ring.order_from(ThreadId(0)), ids(&[0, 2, 1, 3]));
        assert!(ring.is_circular(ThreadId(0)));
        assert!(ring.insert_after(ThreadId(9), record(4)).is_err());
    }

    #[test]
    fn successor_reap_stops_at_first_live_record() {
        let mut ring = ReadyRing::new(Thread::anchor(0u32));
        for id in [3, 2, 1] {
            assert!(ring.insert_after(ThreadId(0), record(id)).is_ok());
        }
        // 0 → 1 → 2 → 3
        ring.get_mut(ThreadId(1)).unwrap().state = ThreadState::Killed;
        ring.get_mut(ThreadId(3)).unwrap().state = ThreadState::Killed;

        let mut released = Vec::new();
        let n = ring.reap(ThreadId(0), ReapScope::Successors, |t| released.push(t.id));
        assert_eq!(n, 1);
        assert_eq!(released, ids(&[1]));
        assert_eq!(ring.order_from(ThreadId(0)), ids(&[0, 2, 3]));

        let n = ring.reap(ThreadId(2), ReapScope::Successors, |t| released.push(t.id));
        assert_eq!(n, 1);
        assert_eq!(ring.order_from(ThreadId(0)), ids(&[0, 2]));
        assert!(ring.is_circular(ThreadId(2)));
    }

    #[test]
    fn ring_reap_sweeps_everything_but_current() {
        let mut ring = ReadyRing::new(Thread::anchor(0u32));
        for id in [3, 2, 1] {
            assert!(ring.insert_after(ThreadId(0), record(id)).is_ok());
        }
        for id in [1, 3] {
            ring.get_mut(ThreadId(id)).unwrap().state = ThreadState::Killed;
        }
        ring.get_mut(ThreadId(2)).unwrap().state = ThreadState::Killed;

        let n = ring.reap(ThreadId(2), ReapScope::Ring, |_| ());
        assert_eq!(n, 2);
        assert_eq!(ring.order_from(ThreadId(0)), ids(&[0, 2]));
        assert!(ring.is_circular(ThreadId(0)));
    }

    #[test]
    fn run_after_stops_before_kept_record() {
        let mut ring = ReadyRing::new(Thread::anchor(0u32));
        for id in [3, 2, 1] {
            assert!(ring.insert_after(ThreadId(0), record(id)).is_ok());
        }
        // 0 → 1 → 2 → 3, with 2 and 3 dead and 3 still current.
        for id in [2, 3] {
            ring.get_mut(ThreadId(id)).unwrap().state = ThreadState::Killed;
        }

        let mut released = Vec::new();
        let n = ring.reap_run_after(ThreadId(1), ThreadId(3), |t| released.push(t.id));
        assert_eq!(n, 1);
        assert_eq!(released, ids(&[2]));
        assert_eq!(ring.order_from(ThreadId(0)), ids(&[0, 1, 3]));
        assert!(ring.is_circular(ThreadId(0)));
    }
}
