//! Scheduler request errors.

use core::fmt;

use crate::sched::{ThreadId, ThreadState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedError {
    /// `init_scheduler` has not run yet.
    NotInitialized,
    /// No record with this id is in the ring.
    UnknownThread(ThreadId),
    /// The request would block or kill the anchor thread.
    AnchorThread,
    /// The address-space manager could not clone the owner's space.
    AddressSpaceExhausted,
    /// The kernel stack could not be allocated.
    OutOfMemory,
    /// The thread is in a state the request cannot leave.
    InvalidTransition { thread: ThreadId, from: ThreadState },
}

impl fmt::Display for SchedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotInitialized => write!(f, "scheduler not initialised"),
            Self::UnknownThread(id) => write!(f, "no thread {}", id),
            Self::AnchorThread => write!(f, "the anchor thread cannot block or exit"),
            Self::AddressSpaceExhausted => write!(f, "cannot clone address space"),
            Self::OutOfMemory => write!(f, "cannot allocate kernel stack"),
            Self::InvalidTransition { thread, from } => {
                write!(f, "thread {} cannot leave state {:?}", thread, from)
            }
        }
    }
}
