// =============================================================================
// Carousel — Architecture Layer
// =============================================================================
//
// Everything below the multitasking core that is specific to x86_64: the
// descriptor tables, the trap entry assembly, and the `Platform` adapter the
// core drives them through.
// =============================================================================

pub mod gdt;
pub mod platform;
pub mod stubs;
pub mod tss;

#[cfg(target_arch = "x86_64")]
pub mod x86_64;

#[cfg(target_arch = "x86_64")]
pub use self::x86_64::*;
