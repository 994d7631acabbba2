// =============================================================================
// Carousel — Kernel Panic Handler
// =============================================================================
//
// A kernel panic is fatal: a violated invariant or an impossible boot
// condition. We print a highlighted banner on serial and halt this core
// with interrupts masked.
//
// The banner goes through `klog::banner`, which only *tries* the console
// lock. A panic raised while the console was held still halts instead of
// deadlocking; the banner is lost in that case.
// =============================================================================

use core::panic::PanicInfo;

use crate::arch::cpu;

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    x86_64::instructions::interrupts::disable();

    klog::banner(format_args!("[PANIC] KERNEL PANIC"));
    match info.location() {
        Some(location) => klog::banner(format_args!(
            "  at {}:{}:{}",
            location.file(),
            location.line(),
            location.column()
        )),
        None => klog::banner(format_args!("  at <unknown>")),
    }
    klog::banner(format_args!("  {}", info.message()));
    klog::banner(format_args!("System halted!"));

    cpu::halt_forever()
}
