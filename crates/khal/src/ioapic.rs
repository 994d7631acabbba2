//! I/O APIC driver.
//!
//! Routes ISA lines to vectors on the bootstrap processor. Every
//! redirection entry starts masked; `redirect` unmasks exactly the lines a
//! handler has been registered for.

use core::ptr;
use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Standard I/O APIC physical base address.
pub const IOAPIC_PHYS_BASE: u64 = 0xFEC0_0000;

/// IOWIN offset from the base; IOREGSEL sits at offset 0.
const IOWIN_OFFSET: u64 = 0x10;

const IOAPICID: u32 = 0x00;
const IOAPICVER: u32 = 0x01;

/// First redirection register; each entry takes two.
const IOREDTBL_BASE: u32 = 0x10;

/// Redirection entry bit 16.
const MASKED: u32 = 1 << 16;

static IOAPIC_BASE: AtomicU64 = AtomicU64::new(0);
static MAX_ENTRIES: AtomicU32 = AtomicU32::new(0);

unsafe fn read_reg(index: u32) -> u32 {
    let base = IOAPIC_BASE.load(Ordering::Relaxed);
    // SAFETY: caller guarantees `init` mapped the register window.
    unsafe {
        ptr::write_volatile(base as *mut u32, index);
        ptr::read_volatile((base + IOWIN_OFFSET) as *const u32)
    }
}

unsafe fn write_reg(index: u32, value: u32) {
    let base = IOAPIC_BASE.load(Ordering::Relaxed);
    // SAFETY: caller guarantees `init` mapped the register window.
    unsafe {
        ptr::write_volatile(base as *mut u32, index);
        ptr::write_volatile((base + IOWIN_OFFSET) as *mut u32, value);
    }
}

/// Find the chip at `hhdm_offset + IOAPIC_PHYS_BASE` and mask every
/// redirection entry. Returns `(id, entries)`.
///
/// # Safety
///
/// The register window must already be mapped uncached at that address.
pub unsafe fn init(hhdm_offset: u64) -> (u32, u32) {
    IOAPIC_BASE.store(hhdm_offset + IOAPIC_PHYS_BASE, Ordering::Relaxed);

    // SAFETY: window mapped per the contract above.
    unsafe {
        let id = read_reg(IOAPICID) >> 24;
        let entries = ((read_reg(IOAPICVER) >> 16) & 0xFF) + 1;
        for line in 0..entries {
            let lo = IOREDTBL_BASE + line * 2;
            write_reg(lo, read_reg(lo) | MASKED);
        }
        MAX_ENTRIES.store(entries, Ordering::Relaxed);
        (id, entries)
    }
}

pub fn is_initialized() -> bool {
    MAX_ENTRIES.load(Ordering::Relaxed) != 0
}

/// Deliver line `irq` as `vector` to APIC id 0: fixed delivery, physical
/// destination, edge-triggered, active high, unmasked.
///
/// Returns false when the chip has no such line.
pub fn redirect(irq: u8, vector: u8) -> bool {
    if irq as u32 >= MAX_ENTRIES.load(Ordering::Relaxed) {
        return false;
    }
    let lo = IOREDTBL_BASE + irq as u32 * 2;
    // SAFETY: `init` ran (MAX_ENTRIES is non-zero) and `irq` is in range.
    unsafe {
        write_reg(lo + 1, 0);
        write_reg(lo, vector as u32);
    }
    true
}

/// Mask line `irq`.
pub fn mask(irq: u8) {
    if irq as u32 >= MAX_ENTRIES.load(Ordering::Relaxed) {
        return;
    }
    let lo = IOREDTBL_BASE + irq as u32 * 2;
    // SAFETY: as in `redirect`.
    unsafe { write_reg(lo, read_reg(lo) | MASKED) };
}
