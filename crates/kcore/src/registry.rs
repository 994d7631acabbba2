//! Vector → handler table consulted by the dispatcher.
//!
//! Slots are written during serialised driver init and read from trap
//! context, so each one is a single atomic pointer rather than a lock.

use core::ptr;
use core::sync::atomic::{AtomicPtr, Ordering};

use crate::VECTOR_COUNT;
use crate::frame::TrapFrame;

/// Device interrupt handler. Runs with interrupts masked, after the
/// controller has been acknowledged.
pub type InterruptHandler = fn(&mut TrapFrame);

pub struct HandlerRegistry {
    slots: [AtomicPtr<()>; VECTOR_COUNT],
}

impl HandlerRegistry {
    pub const fn new() -> Self {
        Self {
            slots: [const { AtomicPtr::new(ptr::null_mut()) }; VECTOR_COUNT],
        }
    }

    /// Store `handler` for `vector`. Last writer wins.
    pub fn set(&self, vector: u8, handler: InterruptHandler) {
        self.slots[vector as usize].store(handler as *mut (), Ordering::Release);
    }

    pub fn get(&self, vector: u8) -> Option<InterruptHandler> {
        let raw = self.slots[vector as usize].load(Ordering::Acquire);
        if raw.is_null() {
            return None;
        }
        // SAFETY: non-null slots only ever hold values written by `set`,
        // which came from an `InterruptHandler`.
        Some(unsafe { core::mem::transmute::<*mut (), InterruptHandler>(raw) })
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
