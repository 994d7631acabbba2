//! `kcore::InterruptController` adapters for the two chip families.

use core::sync::atomic::{AtomicU64, Ordering};

use kcore::{IRQ_BASE, InterruptController, TrapFrame};

use crate::memory;

/// The remapped 8259 pair: lines 0–15 on vectors 32–47.
pub struct LegacyPic;

pub static LEGACY_PIC: LegacyPic = LegacyPic;

impl InterruptController for LegacyPic {
    fn end_of_interrupt(&self, vector: u8) {
        khal::pic::end_of_interrupt(vector);
    }

    fn redirect(&self, irq: u8, vector: u8) {
        if vector == IRQ_BASE + irq {
            khal::pic::unmask(irq);
        } else {
            log::warn!("PIC cannot deliver line {} on vector {}", irq, vector);
        }
    }
}

/// Local APIC for acknowledgement, I/O APIC for routing.
pub struct Apic;

pub static APIC: Apic = Apic;

impl InterruptController for Apic {
    fn end_of_interrupt(&self, _vector: u8) {
        khal::apic::eoi();
    }

    fn redirect(&self, irq: u8, vector: u8) {
        if !khal::ioapic::redirect(irq, vector) {
            log::warn!("I/O APIC has no line {}", irq);
        }
    }
}

/// Bring up the local APIC and I/O APIC if the CPU has them. On success
/// the 8259s are masked and the pair is returned for adoption.
///
/// # Safety
///
/// Call once during boot, after paging and before interrupts are enabled.
pub unsafe fn probe_apic(hhdm_offset: u64) -> Option<&'static Apic> {
    if !khal::apic::is_present() {
        log::info!("No local APIC; staying on the 8259 PIC");
        return None;
    }

    // SAFETY: both are device register pages.
    let mapped = unsafe {
        memory::map_mmio(khal::apic::phys_base())
            .and_then(|_| memory::map_mmio(khal::ioapic::IOAPIC_PHYS_BASE))
    };
    if mapped.is_err() {
        log::warn!("Out of frames mapping APIC registers; staying on the 8259 PIC");
        return None;
    }

    // SAFETY: the register pages were mapped at `hhdm + phys` above.
    let (apic_id, (ioapic_id, lines)) =
        unsafe { (khal::apic::init(hhdm_offset), khal::ioapic::init(hhdm_offset)) };
    khal::pic::mask_all();

    log::info!(
        "APIC: local id {}, I/O APIC id {} with {} lines; 8259 masked",
        apic_id,
        ioapic_id,
        lines
    );
    Some(&APIC)
}

static SPURIOUS: AtomicU64 = AtomicU64::new(0);

/// Handler for the APIC spurious vector: count and return.
pub fn spurious(_frame: &mut TrapFrame) {
    SPURIOUS.fetch_add(1, Ordering::Relaxed);
}

pub fn spurious_count() -> u64 {
    SPURIOUS.load(Ordering::Relaxed)
}
