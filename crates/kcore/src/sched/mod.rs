//! Threads, the ready ring, and the round-robin scheduler.

mod ring;
mod scheduler;
mod thread;

pub use ring::{ReadyRing, ReapScope};
pub use scheduler::{SchedStats, Scheduler};
pub use thread::{
    KERNEL_STACK_SIZE, KernelStack, MIN_STACK_SIZE, Thread, ThreadEntry, ThreadId, ThreadInfo,
    ThreadState,
};
