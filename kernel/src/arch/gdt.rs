//! Global Descriptor Table for x86_64.
//!
//! Keeps Limine's selector layout (kernel code 0x28, kernel data 0x30) so
//! frames built before and after the reload agree, and appends the TSS.

use core::arch::asm;
use core::mem::size_of;

use kcore::frame::{KERNEL_CODE_SELECTOR, KERNEL_DATA_SELECTOR};
use spin::Once;
use x86_64::structures::DescriptorTablePointer;
use x86_64::VirtAddr;

use super::tss::{self, Tss};

/// Null, four unused legacy slots (Limine's 16/32-bit segments), kernel
/// code, kernel data, and the two-slot TSS descriptor.
const GDT_ENTRIES: usize = 9;

pub const TSS_SELECTOR: u16 = 0x38;

/// 64-bit code: P=1, DPL=0, S=1, E=1, RW=1; L=1.
const KERNEL_CODE: u64 = 0x00_2F_9A_00_0000_FFFF;
/// Data: P=1, DPL=0, S=1, RW=1.
const KERNEL_DATA: u64 = 0x00_0F_92_00_0000_FFFF;

/// The 16-byte TSS descriptor, split into its two GDT slots.
fn tss_descriptor(tss: &'static Tss) -> (u64, u64) {
    let base = tss as *const Tss as u64;
    let limit = (size_of::<Tss>() - 1) as u64;

    let mut low = limit & 0xFFFF;
    low |= (base & 0xFF_FFFF) << 16;
    // P=1, DPL=0, type 0x9 (64-bit TSS, available)
    low |= 0x89 << 40;
    low |= ((limit >> 16) & 0xF) << 48;
    low |= ((base >> 24) & 0xFF) << 56;

    (low, base >> 32)
}

#[repr(C, align(16))]
struct Gdt {
    entries: [u64; GDT_ENTRIES],
}

static GDT: Once<Gdt> = Once::new();

/// Build the GDT around the kernel TSS, load it, reload every segment
/// register and the task register.
///
/// # Safety
///
/// Call once on the bootstrap core, interrupts disabled.
pub unsafe fn init() {
    let (tss_low, tss_high) = tss_descriptor(tss::get());
    let gdt = GDT.call_once(|| {
        let mut entries = [0; GDT_ENTRIES];
        entries[KERNEL_CODE_SELECTOR as usize / 8] = KERNEL_CODE;
        entries[KERNEL_DATA_SELECTOR as usize / 8] = KERNEL_DATA;
        entries[TSS_SELECTOR as usize / 8] = tss_low;
        entries[TSS_SELECTOR as usize / 8 + 1] = tss_high;
        Gdt { entries }
    });

    let pointer = DescriptorTablePointer {
        limit: (size_of::<Gdt>() - 1) as u16,
        base: VirtAddr::from_ptr(gdt),
    };

    // SAFETY: the GDT is 'static and the selectors index descriptors in it.
    unsafe {
        x86_64::instructions::tables::lgdt(&pointer);

        // Far return to reload CS.
        asm!(
            "push {sel}",
            "lea {tmp}, [rip + 2f]",
            "push {tmp}",
            "retfq",
            "2:",
            sel = in(reg) KERNEL_CODE_SELECTOR as u64,
            tmp = lateout(reg) _,
            options(preserves_flags)
        );

        asm!(
            "mov ds, {sel:x}",
            "mov es, {sel:x}",
            "mov ss, {sel:x}",
            sel = in(reg) KERNEL_DATA_SELECTOR,
            options(nostack, preserves_flags)
        );

        asm!(
            "ltr {sel:x}",
            sel = in(reg) TSS_SELECTOR,
            options(nostack, preserves_flags)
        );
    }

    log::info!(
        "GDT loaded: code {:#x}, data {:#x}, tss {:#x}",
        KERNEL_CODE_SELECTOR,
        KERNEL_DATA_SELECTOR,
        TSS_SELECTOR
    );
}
