//! Trap frame: the register image the entry stubs build on the kernel stack.
//!
//! Layout, lowest address first, matches the push order of `trap_common`
//! in the kernel's entry assembly: general-purpose registers (r15 pushed
//! last), then the vector and error code pushed by the per-vector stub,
//! then the five words the CPU pushes on entry.

use x86_64::registers::rflags::RFlags;

/// Kernel code selector threads start with (Limine-compatible GDT slot 5).
pub const KERNEL_CODE_SELECTOR: u16 = 0x28;

/// Kernel data/stack selector (GDT slot 6).
pub const KERNEL_DATA_SELECTOR: u16 = 0x30;

/// RFLAGS for a fresh thread: interrupts on, reserved bit 1 set (0x202).
pub const INITIAL_RFLAGS: u64 = RFlags::INTERRUPT_FLAG.bits() | 0x2;

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrapFrame {
    pub r15: u64,
    pub r14: u64,
    pub r13: u64,
    pub r12: u64,
    pub r11: u64,
    pub r10: u64,
    pub r9: u64,
    pub r8: u64,
    pub rbp: u64,
    pub rdi: u64,
    pub rsi: u64,
    pub rdx: u64,
    pub rcx: u64,
    pub rbx: u64,
    pub rax: u64,

    /// Pushed by the per-vector stub.
    pub vector: u64,
    /// CPU error code, or 0 for vectors without one.
    pub error_code: u64,

    // Hardware frame.
    pub rip: u64,
    pub cs: u64,
    pub rflags: u64,
    pub rsp: u64,
    pub ss: u64,
}

impl TrapFrame {
    /// Frame for a kernel thread that has never run: `entry(arg)` on a
    /// fresh stack whose top is `stack_top`.
    ///
    /// The stack pointer sits one word below the top so that, as after a
    /// `call`, `rsp + 8` is 16-byte aligned on the first instruction. The
    /// word it points at is the (zeroed) fake return address.
    pub fn kernel_thread(entry: u64, arg: u64, stack_top: u64) -> Self {
        Self {
            rip: entry,
            rdi: arg,
            cs: KERNEL_CODE_SELECTOR as u64,
            ss: KERNEL_DATA_SELECTOR as u64,
            rflags: INITIAL_RFLAGS,
            rsp: stack_top - 8,
            ..Self::default()
        }
    }

    /// Vector number as delivered to the dispatcher.
    #[inline]
    pub fn vector(&self) -> u8 {
        self.vector as u8
    }

    /// Were interrupts enabled in the interrupted context?
    #[inline]
    pub fn interrupts_enabled(&self) -> bool {
        RFlags::from_bits_truncate(self.rflags).contains(RFlags::INTERRUPT_FLAG)
    }
}
