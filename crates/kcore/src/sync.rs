// =============================================================================
// Carousel — Interrupt-Safe Ticket Lock
// =============================================================================
//
// The one locking primitive of the core. Every shared structure (vector
// table gates, the scheduler, the per-CPU fallback slots) sits behind an
// `IrqMutex`.
//
// ACQUIRE:
//   1. remember RFLAGS.IF, then clear it on this core
//   2. take a ticket (`next_ticket += 1`)
//   3. spin with PAUSE until `now_serving == ticket`
//
// RELEASE (guard drop):
//   1. `now_serving += 1`
//   2. set IF again only if it was set at step 1
//
// Because the flag is cleared before the ticket is taken, a timer tick can
// never land on a core that holds the lock, so the tick path may itself
// lock the scheduler without deadlocking against the code it interrupted.
// Nested guards restore in reverse order, leaving IF as the outermost
// caller found it.
//
// =============================================================================

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicU32, Ordering};

use crate::irq;

/// A FIFO spinlock that masks local interrupts while held.
pub struct IrqMutex<T> {
    next_ticket: AtomicU32,
    now_serving: AtomicU32,
    data: UnsafeCell<T>,
}

// SAFETY: only the holder of the current ticket touches `data`, so sharing
// the lock is sound whenever the payload may move between cores.
unsafe impl<T: Send> Send for IrqMutex<T> {}
unsafe impl<T: Send> Sync for IrqMutex<T> {}

impl<T> IrqMutex<T> {
    pub const fn new(value: T) -> Self {
        Self {
            next_ticket: AtomicU32::new(0),
            now_serving: AtomicU32::new(0),
            data: UnsafeCell::new(value),
        }
    }

    /// Acquires the lock, masking interrupts on this core until the guard
    /// is dropped.
    pub fn lock(&self) -> IrqMutexGuard<'_, T> {
        let irq_was_enabled = irq::are_enabled();
        irq::disable();

        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        while self.now_serving.load(Ordering::Acquire) != ticket {
            core::hint::spin_loop();
        }

        IrqMutexGuard {
            lock: self,
            irq_was_enabled,
        }
    }

    /// Takes the lock only if nobody holds it or waits for it.
    pub fn try_lock(&self) -> Option<IrqMutexGuard<'_, T>> {
        let irq_was_enabled = irq::are_enabled();
        irq::disable();

        let serving = self.now_serving.load(Ordering::Relaxed);
        match self.next_ticket.compare_exchange(
            serving,
            serving.wrapping_add(1),
            Ordering::Acquire,
            Ordering::Relaxed,
        ) {
            Ok(_) => Some(IrqMutexGuard {
                lock: self,
                irq_was_enabled,
            }),
            Err(_) => {
                if irq_was_enabled {
                    irq::enable();
                }
                None
            }
        }
    }

    /// Is the lock currently held?
    pub fn is_locked(&self) -> bool {
        self.next_ticket.load(Ordering::Relaxed) != self.now_serving.load(Ordering::Relaxed)
    }
}

/// RAII guard for a held [`IrqMutex`].
pub struct IrqMutexGuard<'a, T> {
    lock: &'a IrqMutex<T>,
    irq_was_enabled: bool,
}

impl<T> Deref for IrqMutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: we hold the ticket being served.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for IrqMutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: we hold the ticket being served.
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for IrqMutexGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.now_serving.fetch_add(1, Ordering::Release);
        if self.irq_was_enabled {
            irq::enable();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_masks_and_restores_interrupts() {
        let lock = IrqMutex::new(5u32);
        irq::enable();
        {
            let mut guard = lock.lock();
            assert!(!irq::are_enabled());
            *guard += 1;
        }
        assert!(irq::are_enabled());
        assert_eq!(*lock.lock(), 6);
    }

    #[test]
    fn nested_guards_restore_outermost_state() {
        let a = IrqMutex::new(());
        let b = IrqMutex::new(());
        irq::enable();
        let outer = a.lock();
        let inner = b.lock();
        drop(inner);
        assert!(!irq::are_enabled(), "inner release must not unmask");
        drop(outer);
        assert!(irq::are_enabled());
    }

    #[test]
    fn try_lock_fails_while_held_and_keeps_flag() {
        let lock = IrqMutex::new(0u8);
        irq::enable();
        let held = lock.lock();
        // The held guard masked interrupts; a failed try_lock leaves them so.
        assert!(lock.try_lock().is_none());
        assert!(!irq::are_enabled());
        assert!(lock.is_locked());
        drop(held);
        assert!(irq::are_enabled());
        assert!(!lock.is_locked());
        assert!(lock.try_lock().is_some());
    }

    #[test]
    fn contended_counter_is_exact() {
        use std::sync::Arc;

        let lock = Arc::new(IrqMutex::new(0u64));
        let workers: Vec<_> = (0..4)
            .map(|_| {
                let lock = Arc::clone(&lock);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        *lock.lock() += 1;
                    }
                })
            })
            .collect();
        for w in workers {
            w.join().unwrap();
        }
        assert_eq!(*lock.lock(), 4000);
    }
}
