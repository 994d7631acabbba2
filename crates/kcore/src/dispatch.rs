//! Trap dispatcher: the one Rust function every vector funnels into.
//!
//! ```text
//!   vector  0..32   exception   → diagnose, backtrace; halt (or resume)
//!   vector  32      timer       → EOI, tick counter, scheduler tick
//!   vector  33..256 device IRQ  → EOI, registered handler if any
//! ```
//!
//! Every device vector is acknowledged exactly once, before its handler
//! runs and whether or not a handler exists.

use core::sync::atomic::Ordering;

use spin::Once;

use crate::backtrace;
use crate::context::KernelContext;
use crate::exception::{self, ExceptionPolicy};
use crate::frame::TrapFrame;
use crate::hal::{AddressSpaces, InterruptController, Platform};
use crate::{IRQ_BASE, TIMER_VECTOR};

/// The legacy controller is always present; the advanced one is adopted
/// once the APIC pair is up and then takes over acknowledgement.
pub struct Controllers {
    legacy: &'static dyn InterruptController,
    advanced: Once<&'static dyn InterruptController>,
}

impl Controllers {
    pub fn new(legacy: &'static dyn InterruptController) -> Self {
        Self {
            legacy,
            advanced: Once::new(),
        }
    }

    /// Returns false if an advanced controller was already adopted.
    pub fn adopt_advanced(&self, controller: &'static dyn InterruptController) -> bool {
        let mut adopted = false;
        self.advanced.call_once(|| {
            adopted = true;
            controller
        });
        adopted
    }

    pub fn advanced(&self) -> Option<&'static dyn InterruptController> {
        self.advanced.get().copied()
    }

    /// Controller that receives end-of-interrupt.
    pub fn active(&self) -> &'static dyn InterruptController {
        self.advanced().unwrap_or(self.legacy)
    }
}

impl<P: Platform, A: AddressSpaces> KernelContext<P, A> {
    /// Handle one trap. Called from the entry stubs with interrupts
    /// masked; on return `frame` is what the CPU resumes.
    pub fn dispatch(&self, frame: &mut TrapFrame) {
        let vector = frame.vector();
        if vector < IRQ_BASE {
            self.exception(frame);
            return;
        }

        self.controllers.active().end_of_interrupt(vector);

        if vector == TIMER_VECTOR {
            self.ticks.fetch_add(1, Ordering::Relaxed);
            self.schedule(frame);
            return;
        }

        if let Some(handler) = self.handlers.get(vector) {
            handler(frame);
        }
    }

    fn schedule(&self, frame: &mut TrapFrame) {
        if let Some(scheduler) = self.scheduler.lock().as_mut() {
            scheduler.tick(frame, &self.spaces, &self.platform);
        }
    }

    fn exception(&self, frame: &TrapFrame) {
        let vector = frame.vector();
        let name = exception::describe(vector);

        log::error!(
            "Exception: {} (vector {}) at {:#x}:{:#x}, rsp {:#x}",
            name,
            vector,
            frame.cs,
            frame.rip,
            frame.rsp
        );
        if exception::reports_error_code(vector) {
            log::error!("Error code: {:#X}", frame.error_code);
        }
        backtrace::report(&self.platform, frame);

        if self.exception_policy() == ExceptionPolicy::Report {
            log::warn!("resuming after exception {}", vector);
            return;
        }

        self.platform.panic_banner(format_args!("[PANIC] System Exception!"));
        self.platform.panic_banner(format_args!("Exception: {}", name));
        if exception::reports_error_code(vector) {
            self.platform
                .panic_banner(format_args!("Error code: {:#X}", frame.error_code));
        }
        self.platform.panic_banner(format_args!("System halted!"));
        self.platform.halt();
    }
}
