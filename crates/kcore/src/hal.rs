//! Seams between the core and the machine.
//!
//! The kernel binary implements these over real hardware; `testing.rs`
//! implements them with recorders.

use core::fmt;
use core::fmt::Debug;

use x86_64::structures::DescriptorTablePointer;

/// CPU-level services the dispatcher and scheduler need.
pub trait Platform: Sync {
    /// Load `pointer` into IDTR.
    ///
    /// # Safety
    ///
    /// `pointer` must describe a gate array that stays valid and unmoved for
    /// as long as interrupts may be delivered.
    unsafe fn load_vector_table(&self, pointer: &DescriptorTablePointer);

    /// Stack top the CPU switches to on the next privilege-raising trap
    /// (TSS.RSP0).
    fn set_kernel_stack(&self, top: u64);

    /// Stop this core for good, interrupts masked.
    fn halt(&self) -> !;

    /// One highlighted line on the operator console.
    fn panic_banner(&self, line: fmt::Arguments<'_>);

    /// The 8-byte word at `addr`, or `None` if it is misaligned or not
    /// mapped. Used to walk stacks after an exception.
    fn read_stack_word(&self, addr: u64) -> Option<u64>;
}

/// An interrupt controller that can acknowledge and route lines.
pub trait InterruptController: Sync {
    /// Acknowledge the interrupt delivered on `vector`.
    fn end_of_interrupt(&self, vector: u8);

    /// Route legacy line `irq` to `vector`.
    fn redirect(&self, irq: u8, vector: u8);
}

/// Address-space manager.
///
/// How a clone shares or copies mappings is the manager's business; the
/// scheduler only needs a handle it can switch to and later give back.
pub trait AddressSpaces: Sync {
    type Handle: Copy + Eq + Debug + Send;

    /// The space currently loaded on this core.
    fn active(&self) -> Self::Handle;

    /// A new space derived from `source`, or `None` when out of frames.
    fn clone_space(&self, source: Self::Handle) -> Option<Self::Handle>;

    /// Make `handle` the active space.
    fn switch_to(&self, handle: Self::Handle);

    /// Give back a space obtained from `clone_space`. Called once per
    /// reaped thread.
    fn release(&self, handle: Self::Handle);
}
