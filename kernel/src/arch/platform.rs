//! `kcore::Platform` over the real CPU.

use core::fmt;

use kcore::Platform;
use x86_64::structures::DescriptorTablePointer;

use super::{cpu, tss};
use crate::memory::paging;

pub struct X86Platform;

impl Platform for X86Platform {
    unsafe fn load_vector_table(&self, pointer: &DescriptorTablePointer) {
        // SAFETY: forwarded from the caller's contract.
        unsafe { x86_64::instructions::tables::lidt(pointer) };
    }

    fn set_kernel_stack(&self, top: u64) {
        tss::set_kernel_stack(top);
    }

    fn halt(&self) -> ! {
        cpu::halt_forever()
    }

    fn panic_banner(&self, line: fmt::Arguments<'_>) {
        klog::banner(line);
    }

    fn read_stack_word(&self, addr: u64) -> Option<u64> {
        if addr % 8 != 0 {
            return None;
        }
        paging::translate(addr)?;
        // SAFETY: aligned, so the word sits in one page, which is mapped.
        Some(unsafe { core::ptr::read_volatile(addr as *const u64) })
    }
}
