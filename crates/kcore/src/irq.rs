//! Local interrupt-enable flag.
//!
//! On the target these are `cli`/`sti`/`pushfq` through the `x86_64` crate.
//! Under `cfg(test)` the flag is a thread-local boolean, so each test thread
//! sees its own "CPU" and lock/activation sequences stay observable.

#[cfg(not(test))]
mod imp {
    use x86_64::instructions::interrupts;

    #[inline]
    pub fn are_enabled() -> bool {
        interrupts::are_enabled()
    }

    #[inline]
    pub fn disable() {
        interrupts::disable();
    }

    #[inline]
    pub fn enable() {
        interrupts::enable();
    }
}

#[cfg(test)]
mod imp {
    use std::cell::Cell;

    std::thread_local! {
        static IF: Cell<bool> = const { Cell::new(false) };
    }

    pub fn are_enabled() -> bool {
        IF.with(Cell::get)
    }

    pub fn disable() {
        IF.with(|f| f.set(false));
    }

    pub fn enable() {
        IF.with(|f| f.set(true));
    }
}

/// Is RFLAGS.IF set on this core?
#[inline]
pub fn are_enabled() -> bool {
    imp::are_enabled()
}

/// Mask maskable interrupts on this core.
#[inline]
pub fn disable() {
    imp::disable();
}

/// Unmask maskable interrupts on this core.
#[inline]
pub fn enable() {
    imp::enable();
}

/// Run `f` with interrupts masked, restoring the previous flag afterwards.
#[inline]
pub fn without_interrupts<R>(f: impl FnOnce() -> R) -> R {
    let saved = are_enabled();
    if saved {
        disable();
    }
    let result = f();
    if saved {
        enable();
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn without_interrupts_restores_previous_state() {
        enable();
        let inside = without_interrupts(are_enabled);
        assert!(!inside);
        assert!(are_enabled());

        disable();
        without_interrupts(|| ());
        assert!(!are_enabled());
    }
}
