// =============================================================================
// Carousel — CPU Utilities (x86_64)
// =============================================================================
//
// Thin wrappers around the privileged instructions the idle loop and the
// halt paths need.
// =============================================================================

use ::x86_64::instructions::{hlt, interrupts};

/// Enable interrupts and sleep until the next one, atomically, so a tick
/// arriving between the two cannot be missed.
#[inline(always)]
pub fn idle() {
    interrupts::enable_and_hlt();
}

/// Mask interrupts and stop this core for good.
#[inline(always)]
pub fn halt_forever() -> ! {
    loop {
        interrupts::disable();
        hlt();
    }
}
