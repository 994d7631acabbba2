// =============================================================================
// Carousel — Kernel Drivers
// =============================================================================
//
//   irqchip.rs   8259 PIC and APIC pair behind `kcore::InterruptController`
//   timer.rs     PIT tick source for the scheduler, `sleep_ms`
//
// Register-level access lives in the `khal` crate; these modules only
// wire it to the multitasking core.
// =============================================================================

pub mod irqchip;
pub mod timer;
