//! Local APIC driver.
//!
//! Only what interrupt acknowledgement needs: find the register page,
//! software-enable it, accept every priority, and write EOI. Periodic ticks
//! come from the PIT routed through the I/O APIC, not from the LAPIC timer.

use core::ptr;
use core::sync::atomic::{AtomicU64, Ordering};

use x86_64::registers::model_specific::Msr;

/// IA32_APIC_BASE Model Specific Register.
const IA32_APIC_BASE_MSR: u32 = 0x1B;

/// Bit 11 of IA32_APIC_BASE: global enable.
const APIC_BASE_ENABLE: u64 = 1 << 11;

const APIC_REG_ID: u32 = 0x020;
const APIC_REG_TPR: u32 = 0x080;
const APIC_REG_EOI: u32 = 0x0B0;
const APIC_REG_SVR: u32 = 0x0F0;

/// SVR bit 8: APIC software enable.
const SVR_APIC_ENABLE: u32 = 1 << 8;

/// Spurious vector. Delivered without an EOI requirement.
pub const SPURIOUS_VECTOR: u8 = 0xFF;

/// Physical register page, typically 0xFEE0_0000.
pub fn phys_base() -> u64 {
    // SAFETY: IA32_APIC_BASE exists on every CPU that reports an APIC.
    let value = unsafe { Msr::new(IA32_APIC_BASE_MSR).read() };
    value & 0x000F_FFFF_FFFF_F000
}

/// Virtual address of the register page; 0 until `init`.
static APIC_BASE: AtomicU64 = AtomicU64::new(0);

/// CPUID.01h:EDX bit 9.
pub fn is_present() -> bool {
    #[allow(unused_unsafe)]
    // SAFETY: CPUID leaf 1 exists on every x86_64 CPU.
    let leaf = unsafe { core::arch::x86_64::__cpuid(1) };
    leaf.edx & (1 << 9) != 0
}

#[inline]
unsafe fn read_reg(offset: u32) -> u32 {
    let addr = APIC_BASE.load(Ordering::Relaxed) + offset as u64;
    // SAFETY: caller guarantees `init` mapped the register page.
    unsafe { ptr::read_volatile(addr as *const u32) }
}

#[inline]
unsafe fn write_reg(offset: u32, value: u32) {
    let addr = APIC_BASE.load(Ordering::Relaxed) + offset as u64;
    // SAFETY: caller guarantees `init` mapped the register page.
    unsafe { ptr::write_volatile(addr as *mut u32, value) };
}

/// Enable the local APIC whose register page is mapped at
/// `hhdm_offset + phys_base()`. Returns this CPU's APIC id.
///
/// # Safety
///
/// The register page must already be mapped uncached at that address.
pub unsafe fn init(hhdm_offset: u64) -> u32 {
    let mut msr = Msr::new(IA32_APIC_BASE_MSR);
    // SAFETY: see `phys_base`.
    let value = unsafe { msr.read() };
    APIC_BASE.store(hhdm_offset + (value & 0x000F_FFFF_FFFF_F000), Ordering::Relaxed);

    // SAFETY: setting the global enable bit of the MSR we just read, then
    // programming registers inside the page the caller mapped.
    unsafe {
        if value & APIC_BASE_ENABLE == 0 {
            msr.write(value | APIC_BASE_ENABLE);
        }
        write_reg(APIC_REG_SVR, SVR_APIC_ENABLE | SPURIOUS_VECTOR as u32);
        write_reg(APIC_REG_TPR, 0);
        read_reg(APIC_REG_ID) >> 24
    }
}

pub fn is_initialized() -> bool {
    APIC_BASE.load(Ordering::Relaxed) != 0
}

/// Signal end of interrupt. No-op before `init`.
pub fn eoi() {
    if !is_initialized() {
        return;
    }
    // SAFETY: the register page is mapped once `init` has run.
    unsafe { write_reg(APIC_REG_EOI, 0) };
}
