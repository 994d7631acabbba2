// =============================================================================
// Carousel — Multitasking Core
// =============================================================================
//
// The preemptive heart of the kernel: everything between "the CPU took a
// trap" and "a different thread is now running".
//
//   trap entry stub ──► KernelContext::dispatch
//                          │
//            ┌─────────────┼──────────────────────┐
//            ▼             ▼                      ▼
//      vector < 32    vector == 32           vector > 32
//      exception      EOI + scheduler tick   EOI + registered handler
//      (diagnose,     (save frame, reap,
//       backtrace,     pick next READY,
//       halt)          switch space/stack)
//
// Nothing in here touches hardware directly. The kernel binary supplies a
// `Platform` (lidt, TSS, halt, console, stack reads), an `AddressSpaces` manager and one
// or two `InterruptController`s, and keeps the resulting `KernelContext` in
// a single static. On the host the same code runs under `cargo test` with
// the mocks from `testing.rs` and an emulated interrupt flag.
//
// =============================================================================

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod backtrace;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod exception;
pub mod frame;
pub mod hal;
pub mod irq;
pub mod registry;
pub mod sched;
pub mod sync;
pub mod vectors;

#[cfg(test)]
mod testing;

pub use config::Config;
pub use context::KernelContext;
pub use error::SchedError;
pub use exception::ExceptionPolicy;
pub use frame::TrapFrame;
pub use hal::{AddressSpaces, InterruptController, Platform};
pub use registry::InterruptHandler;
pub use sched::{ReapScope, SchedStats, ThreadEntry, ThreadId, ThreadInfo, ThreadState};
pub use sync::IrqMutex;

/// First vector delivered by interrupt controllers; everything below is a
/// CPU exception.
pub const IRQ_BASE: u8 = 32;

/// Vector the periodic timer is routed to. Dispatching it drives the
/// scheduler.
pub const TIMER_VECTOR: u8 = IRQ_BASE;

/// Number of gates in the vector table.
pub const VECTOR_COUNT: usize = 256;
