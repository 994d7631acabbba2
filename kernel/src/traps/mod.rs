//! Trap entry glue: the one `KernelContext` and the symbol the assembly
//! stubs call.

mod idt;

use kcore::{Config, KernelContext, TrapFrame};
use spin::Once;

use crate::arch::cpu;
use crate::arch::platform::X86Platform;
use crate::drivers::irqchip::LEGACY_PIC;
use crate::memory::paging::KernelSpaces;

pub type Kernel = KernelContext<X86Platform, KernelSpaces>;

static KERNEL: Once<Kernel> = Once::new();

/// Build the kernel context and fill every gate. The table is not loaded
/// until `activate`.
pub fn init(config: Config) -> &'static Kernel {
    let kernel = KERNEL.call_once(|| KernelContext::new(X86Platform, KernelSpaces, &LEGACY_PIC, config));
    idt::install_all(kernel);
    kernel
}

/// # Panics
/// Panics if called before `init`.
pub fn kernel() -> &'static Kernel {
    KERNEL.get().expect("kernel context used before traps::init")
}

/// Called by `trap_common` with interrupts masked.
#[unsafe(no_mangle)]
extern "C" fn trap_dispatch(frame: *mut TrapFrame) {
    // SAFETY: `trap_common` passes the frame it just built on this stack,
    // and nothing else refers to it until we return.
    let frame = unsafe { &mut *frame };
    match KERNEL.get() {
        Some(kernel) => kernel.dispatch(frame),
        None => {
            klog::banner(format_args!("[PANIC] trap {} before kernel context", frame.vector));
            cpu::halt_forever()
        }
    }
}
