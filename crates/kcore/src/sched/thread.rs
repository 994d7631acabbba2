//! Thread records and their kernel stacks.

use alloc::alloc::{Layout, alloc_zeroed, dealloc};
use core::fmt;
use core::ptr::NonNull;

use crate::error::SchedError;
use crate::frame::TrapFrame;

// ── Identity ────────────────────────────────────────────────────

/// Unique, monotonically assigned thread identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(pub u64);

impl ThreadId {
    /// The boot context, adopted by `init_scheduler`. Never blocks, never
    /// dies, so the ring always holds something runnable.
    pub const ANCHOR: ThreadId = ThreadId(0);

    pub fn is_anchor(self) -> bool {
        self == Self::ANCHOR
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Kernel thread entry point. Receives the `arg` given to `create_thread`
/// in `rdi` and must never return; a finished thread calls `exit`.
pub type ThreadEntry = extern "C" fn(usize) -> !;

// ── State ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    /// Runnable, waiting for the picker.
    Ready,
    /// Owns the CPU.
    Running,
    /// Skipped by the picker until unblocked.
    Blocked,
    /// Terminal. Reclaimed by a later tick.
    Killed,
}

// ── Kernel stack ────────────────────────────────────────────────

/// Default per-thread kernel stack size (32 KiB).
pub const KERNEL_STACK_SIZE: usize = 4096 * 8;

/// Smallest stack `Config` accepts.
pub const MIN_STACK_SIZE: usize = 4096;

const STACK_ALIGN: usize = 16;

/// A zeroed, 16-byte aligned heap region owned by exactly one thread.
/// Returned to the heap when the owning record is dropped.
pub struct KernelStack {
    base: NonNull<u8>,
    layout: Layout,
}

// SAFETY: the region is uniquely owned by this value.
unsafe impl Send for KernelStack {}

impl KernelStack {
    pub fn new(size: usize) -> Result<Self, SchedError> {
        let layout =
            Layout::from_size_align(size, STACK_ALIGN).map_err(|_| SchedError::OutOfMemory)?;
        if layout.size() == 0 {
            return Err(SchedError::OutOfMemory);
        }
        // SAFETY: layout has non-zero size.
        let raw = unsafe { alloc_zeroed(layout) };
        let base = NonNull::new(raw).ok_or(SchedError::OutOfMemory)?;
        Ok(Self { base, layout })
    }

    /// One past the highest byte; stacks grow down from here.
    pub fn top(&self) -> u64 {
        self.base.as_ptr() as u64 + self.layout.size() as u64
    }

    pub fn size(&self) -> usize {
        self.layout.size()
    }
}

impl Drop for KernelStack {
    fn drop(&mut self) {
        // SAFETY: allocated in `new` with this exact layout.
        unsafe { dealloc(self.base.as_ptr(), self.layout) };
    }
}

// ── Record ──────────────────────────────────────────────────────

/// Per-thread scheduling state. Lives in the ready ring's arena.
pub struct Thread<H> {
    pub id: ThreadId,
    pub state: ThreadState,
    /// Register image to resume from. Only meaningful while not running.
    pub frame: TrapFrame,
    /// `None` for the anchor, which keeps running on the boot stack.
    pub stack: Option<KernelStack>,
    pub space: H,
    /// Current directory reference, 0 = root. Inherited from the creator.
    pub cwd: usize,
    pub last_error: i32,
    pub(super) next: ThreadId,
    pub(super) prev: ThreadId,
}

impl<H: Copy> Thread<H> {
    /// Record for the boot context, linked to itself.
    pub fn anchor(space: H) -> Self {
        Self {
            id: ThreadId::ANCHOR,
            state: ThreadState::Running,
            frame: TrapFrame::default(),
            stack: None,
            space,
            cwd: 0,
            last_error: 0,
            next: ThreadId::ANCHOR,
            prev: ThreadId::ANCHOR,
        }
    }

    pub fn stack_top(&self) -> Option<u64> {
        self.stack.as_ref().map(KernelStack::top)
    }

    pub fn info(&self) -> ThreadInfo {
        ThreadInfo {
            id: self.id,
            state: self.state,
            cwd: self.cwd,
            last_error: self.last_error,
            stack_top: self.stack_top(),
        }
    }
}

/// Read-only snapshot of a record, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadInfo {
    pub id: ThreadId,
    pub state: ThreadState,
    pub cwd: usize,
    pub last_error: i32,
    pub stack_top: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stack_is_aligned_and_zeroed() {
        let stack = KernelStack::new(KERNEL_STACK_SIZE).unwrap();
        assert_eq!(stack.top() % 16, 0);
        assert_eq!(stack.size(), KERNEL_STACK_SIZE);
        let bytes = unsafe {
            core::slice::from_raw_parts(
                (stack.top() - KERNEL_STACK_SIZE as u64) as *const u8,
                KERNEL_STACK_SIZE,
            )
        };
        assert!(bytes.iter().all(|&b| b == 0));
    }

    #[test]
    fn zero_sized_stack_is_rejected() {
        assert_eq!(KernelStack::new(0).err(), Some(SchedError::OutOfMemory));
    }
}
