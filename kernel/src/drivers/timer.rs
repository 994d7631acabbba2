//! Tick source: PIT channel 0 on vector 32.

use kcore::{InterruptController, TIMER_VECTOR};

use super::irqchip;
use crate::arch::cpu;
use crate::traps::Kernel;

/// ISA line 0 arrives on GSI 2 on PC-compatible chipsets (the usual MADT
/// interrupt source override).
const PIT_GSI: u8 = 2;

/// Program the PIT at the configured rate and route it to the scheduler.
pub fn init(kernel: &Kernel) {
    let hz = kernel.config().tick_hz;
    let actual = khal::pit::start_periodic(hz);

    if kernel.has_advanced_controller() {
        irqchip::APIC.redirect(PIT_GSI, TIMER_VECTOR);
    } else {
        khal::pic::unmask(0);
    }
    log::info!("PIT: {} Hz requested, {} Hz programmed", hz, actual);
}

/// Halt until at least `ms` milliseconds of ticks have passed. Needs
/// interrupts enabled and the timer running.
pub fn sleep_ms(kernel: &Kernel, ms: u64) {
    let hz = kernel.config().tick_hz as u64;
    let wait = (ms * hz).div_ceil(1000).max(1);
    let deadline = kernel.ticks() + wait;
    while kernel.ticks() < deadline {
        cpu::idle();
    }
}
