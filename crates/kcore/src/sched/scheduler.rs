// =============================================================================
// Carousel — Round-Robin Scheduler
// =============================================================================
//
// One ready ring, one cursor (`current`), driven by the timer vector.
//
// TICK (interrupts masked, frame = the interrupted context):
//   1. current KILLED?   → don't save, don't demote (it never runs again)
//      otherwise         → save frame into current, RUNNING → READY
//   2. reap KILLED records after current (ReapScope)
//   3. walk from current.next to the first READY record, reaping any
//      KILLED run behind a record the walk steps over (BLOCKED ones)
//   4. copy its saved frame out, switch address space, point RSP0 at its
//      stack, mark it RUNNING
//
// The anchor (id 0) is the boot context. It cannot be blocked or killed,
// so step 3 always ends on a READY record within one lap of the ring.
//
// Thread creation links the new record directly after its creator:
//   A creates B:  A → B → A
//   A creates C:  A → C → B → A
//
// =============================================================================

use alloc::vec::Vec;

use super::ring::{ReadyRing, ReapScope};
use super::thread::{KernelStack, Thread, ThreadEntry, ThreadId, ThreadInfo, ThreadState};
use crate::error::SchedError;
use crate::frame::TrapFrame;
use crate::hal::{AddressSpaces, Platform};

/// Lifetime counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedStats {
    pub created: u64,
    pub reaped: u64,
    /// Ticks that resumed a different thread than they interrupted.
    pub switches: u64,
}

impl SchedStats {
    /// Records in the ring: the anchor plus every creation not yet reaped.
    pub fn live(&self) -> u64 {
        1 + self.created - self.reaped
    }
}

pub struct Scheduler<H> {
    ring: ReadyRing<H>,
    current: ThreadId,
    next_id: u64,
    stack_size: usize,
    reap: ReapScope,
    stats: SchedStats,
}

impl<H: Copy + Eq + core::fmt::Debug + Send> Scheduler<H> {
    /// Adopt the running boot context as the anchor.
    pub fn new(anchor_space: H, stack_size: usize, reap: ReapScope) -> Self {
        Self {
            ring: ReadyRing::new(Thread::anchor(anchor_space)),
            current: ThreadId::ANCHOR,
            next_id: 1,
            stack_size,
            reap,
            stats: SchedStats::default(),
        }
    }

    pub fn current(&self) -> ThreadId {
        self.current
    }

    pub fn stats(&self) -> SchedStats {
        self.stats
    }

    pub fn ring(&self) -> &ReadyRing<H> {
        &self.ring
    }

    // ── Lifecycle ───────────────────────────────────────────────

    /// New READY thread running `entry(arg)`, linked in after `owner`.
    ///
    /// On failure nothing is linked and any cloned space is given back.
    pub fn create<A>(
        &mut self,
        spaces: &A,
        entry: ThreadEntry,
        arg: usize,
        owner: ThreadId,
    ) -> Result<ThreadId, SchedError>
    where
        A: AddressSpaces<Handle = H> + ?Sized,
    {
        let (owner_space, owner_cwd) = {
            let owner = self.ring.get(owner).ok_or(SchedError::UnknownThread(owner))?;
            (owner.space, owner.cwd)
        };

        let space = spaces
            .clone_space(owner_space)
            .ok_or(SchedError::AddressSpaceExhausted)?;
        let stack = match KernelStack::new(self.stack_size) {
            Ok(stack) => stack,
            Err(err) => {
                spaces.release(space);
                return Err(err);
            }
        };

        let id = ThreadId(self.next_id);
        let frame = TrapFrame::kernel_thread(entry as usize as u64, arg as u64, stack.top());
        let thread = Thread {
            id,
            state: ThreadState::Ready,
            frame,
            stack: Some(stack),
            space,
            cwd: owner_cwd,
            last_error: 0,
            next: id,
            prev: id,
        };
        if let Err(thread) = self.ring.insert_after(owner, thread) {
            spaces.release(thread.space);
            return Err(SchedError::UnknownThread(owner));
        }

        self.next_id += 1;
        self.stats.created += 1;
        log::debug!("thread {} created after {} (entry {:#x})", id, owner, frame.rip);
        Ok(id)
    }

    pub fn block(&mut self, id: ThreadId) -> Result<(), SchedError> {
        if id.is_anchor() {
            return Err(SchedError::AnchorThread);
        }
        let thread = self.ring.get_mut(id).ok_or(SchedError::UnknownThread(id))?;
        match thread.state {
            ThreadState::Ready | ThreadState::Running => {
                thread.state = ThreadState::Blocked;
                Ok(())
            }
            ThreadState::Blocked => Ok(()),
            ThreadState::Killed => Err(SchedError::InvalidTransition {
                thread: id,
                from: ThreadState::Killed,
            }),
        }
    }

    /// BLOCKED → READY. Runnable targets are left as they are.
    pub fn unblock(&mut self, id: ThreadId) -> Result<(), SchedError> {
        let thread = self.ring.get_mut(id).ok_or(SchedError::UnknownThread(id))?;
        match thread.state {
            ThreadState::Blocked => {
                thread.state = ThreadState::Ready;
                Ok(())
            }
            ThreadState::Ready | ThreadState::Running => Ok(()),
            ThreadState::Killed => Err(SchedError::InvalidTransition {
                thread: id,
                from: ThreadState::Killed,
            }),
        }
    }

    /// Mark `id` KILLED. Its stack and space are released by a later tick.
    pub fn exit(&mut self, id: ThreadId) -> Result<(), SchedError> {
        if id.is_anchor() {
            return Err(SchedError::AnchorThread);
        }
        let thread = self.ring.get_mut(id).ok_or(SchedError::UnknownThread(id))?;
        if thread.state != ThreadState::Killed {
            thread.state = ThreadState::Killed;
            log::trace!("thread {} killed", id);
        }
        Ok(())
    }

    // ── Per-thread extras ───────────────────────────────────────

    pub fn set_errno(&mut self, code: i32) {
        if let Some(thread) = self.ring.get_mut(self.current) {
            thread.last_error = code;
        }
    }

    pub fn errno(&self) -> i32 {
        self.ring.get(self.current).map_or(0, |t| t.last_error)
    }

    pub fn info(&self, id: ThreadId) -> Option<ThreadInfo> {
        self.ring.get(id).map(Thread::info)
    }

    /// Ring order starting at the current thread.
    pub fn threads(&self) -> Vec<ThreadId> {
        self.ring.order_from(self.current)
    }

    // ── Tick ────────────────────────────────────────────────────

    /// Preempt the current thread and resume the next READY one through
    /// `frame`.
    pub fn tick<A, P>(&mut self, frame: &mut TrapFrame, spaces: &A, platform: &P)
    where
        A: AddressSpaces<Handle = H> + ?Sized,
        P: Platform + ?Sized,
    {
        let outgoing = self.current;
        if let Some(current) = self.ring.get_mut(outgoing) {
            if current.state != ThreadState::Killed {
                current.frame = *frame;
                if current.state == ThreadState::Running {
                    current.state = ThreadState::Ready;
                }
            }
        }

        let mut release = |thread: Thread<H>| {
            log::trace!("reaping thread {}", thread.id);
            spaces.release(thread.space);
        };
        let reaped = self.ring.reap(outgoing, self.reap, &mut release);
        self.stats.reaped += reaped as u64;

        let incoming = self.pick_next(outgoing, &mut release);
        let Some(next) = self.ring.get_mut(incoming) else {
            return;
        };
        *frame = next.frame;
        spaces.switch_to(next.space);
        // The anchor owns no kernel stack, so resuming it leaves RSP0 at the
        // last thread's stack top, possibly freed later. RSP0 is only read on
        // a ring 3 to ring 0 transition, and everything here runs in ring 0.
        if let Some(top) = next.stack_top() {
            platform.set_kernel_stack(top);
        }
        next.state = ThreadState::Running;

        if incoming != outgoing {
            self.stats.switches += 1;
        }
        self.current = incoming;
    }

    /// First READY record after `from`, wrapping back to `from` itself.
    ///
    /// Under `ReapScope::Successors`, KILLED records trailing a record the
    /// walk passes are unlinked on the way; `from` is never reaped.
    fn pick_next(&mut self, from: ThreadId, mut release: impl FnMut(Thread<H>)) -> ThreadId {
        let mut cursor = from;
        for _ in 0..self.ring.len() {
            if self.reap == ReapScope::Successors && cursor != from {
                let reaped = self.ring.reap_run_after(cursor, from, &mut release);
                self.stats.reaped += reaped as u64;
            }
            let Some(next) = self.ring.next_of(cursor) else {
                break;
            };
            cursor = next;
            if self
                .ring
                .get(cursor)
                .is_some_and(|t| t.state == ThreadState::Ready)
            {
                return cursor;
            }
        }
        log::error!("no READY thread after {}; falling back to the anchor", from);
        ThreadId::ANCHOR
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockPlatform, MockSpaces, idle_entry};

    fn scheduler() -> (Scheduler<u32>, MockSpaces, MockPlatform) {
        let spaces = MockSpaces::default();
        let sched = Scheduler::new(spaces.active_handle(), 4096, ReapScope::Successors);
        (sched, spaces, MockPlatform::default())
    }

    fn tick(s: &mut Scheduler<u32>, spaces: &MockSpaces, platform: &MockPlatform) -> ThreadId {
        let mut frame = TrapFrame::default();
        s.tick(&mut frame, spaces, platform);
        s.current()
    }

    #[test]
    fn created_thread_starts_at_entry_with_arg() {
        let (mut s, spaces, platform) = scheduler();
        let id = s.create(&spaces, idle_entry, 42, ThreadId::ANCHOR).unwrap();
        assert_eq!(s.info(id).unwrap().state, ThreadState::Ready);

        let mut frame = TrapFrame::default();
        s.tick(&mut frame, &spaces, &platform);

        assert_eq!(s.current(), id);
        assert_eq!(frame.rip, idle_entry as usize as u64);
        assert_eq!(frame.rdi, 42);
        assert_eq!(frame.cs, 0x28);
        assert_eq!(frame.rflags, 0x202);
        assert_eq!(Some(frame.rsp + 8), s.info(id).unwrap().stack_top);
        assert_eq!(platform.kernel_stacks().last().copied(), s.info(id).unwrap().stack_top);
        assert_eq!(spaces.last_switch(), Some(s.ring().get(id).unwrap().space));
    }

    #[test]
    fn preempted_frame_is_resumed_later() {
        let (mut s, spaces, platform) = scheduler();
        s.create(&spaces, idle_entry, 1, ThreadId::ANCHOR).unwrap();

        let mut frame = TrapFrame { rip: 0xdead, rax: 7, ..TrapFrame::default() };
        s.tick(&mut frame, &spaces, &platform); // anchor → 1
        frame.rax = 99;
        s.tick(&mut frame, &spaces, &platform); // 1 → anchor

        assert_eq!(s.current(), ThreadId::ANCHOR);
        assert_eq!(frame.rip, 0xdead);
        assert_eq!(frame.rax, 7);
    }

    #[test]
    fn only_anchor_keeps_running() {
        let (mut s, spaces, platform) = scheduler();
        assert_eq!(tick(&mut s, &spaces, &platform), ThreadId::ANCHOR);
        assert_eq!(s.stats().switches, 0);
        assert_eq!(s.info(ThreadId::ANCHOR).unwrap().state, ThreadState::Running);
    }

    #[test]
    fn anchor_cannot_block_or_exit() {
        let (mut s, _, _) = scheduler();
        assert_eq!(s.block(ThreadId::ANCHOR), Err(SchedError::AnchorThread));
        assert_eq!(s.exit(ThreadId::ANCHOR), Err(SchedError::AnchorThread));
        assert_eq!(s.unblock(ThreadId::ANCHOR), Ok(()));
    }

    #[test]
    fn killed_thread_cannot_be_revived() {
        let (mut s, spaces, _) = scheduler();
        let id = s.create(&spaces, idle_entry, 0, ThreadId::ANCHOR).unwrap();
        s.exit(id).unwrap();
        assert_eq!(
            s.unblock(id),
            Err(SchedError::InvalidTransition { thread: id, from: ThreadState::Killed })
        );
        assert!(matches!(s.block(id), Err(SchedError::InvalidTransition { .. })));
        assert_eq!(s.exit(id), Ok(()));
    }

    #[test]
    fn unknown_ids_are_reported() {
        let (mut s, spaces, _) = scheduler();
        let ghost = ThreadId(77);
        assert_eq!(s.block(ghost), Err(SchedError::UnknownThread(ghost)));
        assert_eq!(s.unblock(ghost), Err(SchedError::UnknownThread(ghost)));
        assert_eq!(s.exit(ghost), Err(SchedError::UnknownThread(ghost)));
        assert_eq!(
            s.create(&spaces, idle_entry, 0, ghost),
            Err(SchedError::UnknownThread(ghost))
        );
        assert_eq!(spaces.clones(), 0);
    }

    #[test]
    fn exhausted_address_spaces_fail_cleanly() {
        let (mut s, spaces, _) = scheduler();
        spaces.set_exhausted(true);
        assert_eq!(
            s.create(&spaces, idle_entry, 0, ThreadId::ANCHOR),
            Err(SchedError::AddressSpaceExhausted)
        );
        assert_eq!(s.ring().len(), 1);
        assert_eq!(s.stats().created, 0);
    }

    #[test]
    fn stack_failure_returns_the_cloned_space() {
        let spaces = MockSpaces::default();
        let mut s = Scheduler::new(spaces.active_handle(), usize::MAX, ReapScope::Successors);
        assert_eq!(
            s.create(&spaces, idle_entry, 0, ThreadId::ANCHOR),
            Err(SchedError::OutOfMemory)
        );
        assert_eq!(spaces.clones(), 1);
        assert_eq!(spaces.released().len(), 1);
        assert_eq!(s.ring().len(), 1);
    }

    #[test]
    fn children_inherit_cwd_and_errno_is_per_thread() {
        let (mut s, spaces, platform) = scheduler();
        s.ring.get_mut(ThreadId::ANCHOR).unwrap().cwd = 5;
        let child = s.create(&spaces, idle_entry, 0, ThreadId::ANCHOR).unwrap();
        assert_eq!(s.info(child).unwrap().cwd, 5);

        s.set_errno(-2);
        tick(&mut s, &spaces, &platform);
        assert_eq!(s.current(), child);
        assert_eq!(s.errno(), 0);
        s.set_errno(11);
        assert_eq!(s.info(ThreadId::ANCHOR).unwrap().last_error, -2);
        assert_eq!(s.info(child).unwrap().last_error, 11);
    }

    #[test]
    fn killed_record_behind_blocked_one_is_reaped() {
        let (mut s, spaces, platform) = scheduler();
        let dead = s.create(&spaces, idle_entry, 0, ThreadId::ANCHOR).unwrap();
        let parked = s.create(&spaces, idle_entry, 0, ThreadId::ANCHOR).unwrap();
        // anchor → parked → dead
        s.block(parked).unwrap();
        s.exit(dead).unwrap();
        let dead_space = s.ring().get(dead).unwrap().space;

        assert_eq!(tick(&mut s, &spaces, &platform), ThreadId::ANCHOR);
        assert!(!s.ring().contains(dead));
        assert_eq!(spaces.released(), [dead_space]);
        assert_eq!(s.threads(), [ThreadId::ANCHOR, parked]);
        assert!(s.ring().is_circular(ThreadId::ANCHOR));
        assert_eq!(s.stats().reaped, 1);
        assert_eq!(s.stats().live(), 2);

        for _ in 0..10 {
            tick(&mut s, &spaces, &platform);
        }
        assert_eq!(spaces.released().len(), 1);
    }

    #[test]
    fn killed_current_is_kept_until_the_walk_leaves_it() {
        let (mut s, spaces, platform) = scheduler();
        let a = s.create(&spaces, idle_entry, 0, ThreadId::ANCHOR).unwrap();
        assert_eq!(tick(&mut s, &spaces, &platform), a);
        s.exit(a).unwrap();

        // The walk wraps through the anchor back towards `a`; `a` is still
        // the interrupted context, so it must survive this tick.
        assert_eq!(tick(&mut s, &spaces, &platform), ThreadId::ANCHOR);
        assert!(s.ring().contains(a));
        tick(&mut s, &spaces, &platform);
        assert!(!s.ring().contains(a));
        assert_eq!(s.stats().reaped, 1);
    }

    #[test]
    fn resuming_the_anchor_leaves_rsp0_alone() {
        let (mut s, spaces, platform) = scheduler();
        let id = s.create(&spaces, idle_entry, 0, ThreadId::ANCHOR).unwrap();
        assert_eq!(tick(&mut s, &spaces, &platform), id);
        assert_eq!(tick(&mut s, &spaces, &platform), ThreadId::ANCHOR);
        assert_eq!(platform.kernel_stacks(), [s.info(id).unwrap().stack_top.unwrap()]);
    }
}
