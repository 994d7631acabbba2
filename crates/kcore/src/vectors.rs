//! The 256-gate interrupt vector table.
//!
//! Gates are filled by `install` while the table is being built, then the
//! whole array is handed to the CPU by `activate`. From that point on the
//! table is frozen: late installs and repeated activations are logged and
//! ignored.

use core::mem::size_of;
use core::sync::atomic::{AtomicU8, Ordering};

use x86_64::VirtAddr;
use x86_64::structures::DescriptorTablePointer;

use crate::VECTOR_COUNT;
use crate::frame::KERNEL_CODE_SELECTOR;
use crate::hal::Platform;
use crate::irq;
use crate::sync::IrqMutex;

/// Descriptor privilege level of a gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PrivilegeLevel {
    Ring0 = 0,
    Ring3 = 3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum GateType {
    /// Clears IF on entry.
    Interrupt = 0b1110,
    /// Leaves IF alone.
    Trap = 0b1111,
}

/// The 16-bit attribute word of a gate (IST, type, DPL, present).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct GateOptions(u16);

impl GateOptions {
    /// Not present, ring 0, interrupt gate, no IST.
    #[inline]
    pub const fn new() -> Self {
        Self(0b0000_1110_0000_0000)
    }

    /// Present ring-0 interrupt gate: the `0x8E` attribute every vector
    /// gets by default.
    #[inline]
    pub const fn kernel_interrupt() -> Self {
        Self::new().set_present(true)
    }

    #[inline]
    pub const fn set_present(mut self, present: bool) -> Self {
        if present {
            self.0 |= 1 << 15;
        } else {
            self.0 &= !(1 << 15);
        }
        self
    }

    #[inline]
    pub const fn set_privilege_level(mut self, dpl: PrivilegeLevel) -> Self {
        self.0 = (self.0 & 0x9FFF) | ((dpl as u16) << 13);
        self
    }

    #[inline]
    pub const fn set_gate_type(mut self, gate_type: GateType) -> Self {
        self.0 = (self.0 & 0xF0FF) | ((gate_type as u16) << 8);
        self
    }

    /// IST slot 1–7, or 0 to stay on the current stack.
    #[inline]
    pub const fn set_stack_index(mut self, ist: u8) -> Self {
        self.0 = (self.0 & 0xFFF8) | (ist as u16 & 0x7);
        self
    }

    #[inline]
    pub const fn is_present(self) -> bool {
        self.0 & (1 << 15) != 0
    }

    #[inline]
    pub const fn raw(self) -> u16 {
        self.0
    }
}

impl Default for GateOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// One 16-byte long-mode gate descriptor.
#[derive(Debug, Clone, Copy)]
#[repr(C, packed)]
pub struct GateDescriptor {
    offset_low: u16,
    selector: u16,
    options: GateOptions,
    offset_mid: u16,
    offset_high: u32,
    reserved: u32,
}

impl GateDescriptor {
    pub const fn missing() -> Self {
        Self {
            offset_low: 0,
            selector: 0,
            options: GateOptions::new(),
            offset_mid: 0,
            offset_high: 0,
            reserved: 0,
        }
    }

    pub const fn new(entry: u64, selector: u16, options: GateOptions) -> Self {
        Self {
            offset_low: entry as u16,
            selector,
            options,
            offset_mid: (entry >> 16) as u16,
            offset_high: (entry >> 32) as u32,
            reserved: 0,
        }
    }

    pub fn entry(&self) -> u64 {
        let low = self.offset_low as u64;
        let mid = self.offset_mid as u64;
        let high = self.offset_high as u64;
        low | (mid << 16) | (high << 32)
    }

    pub fn selector(&self) -> u16 {
        self.selector
    }

    pub fn options(&self) -> GateOptions {
        self.options
    }
}

#[repr(C, align(16))]
struct Gates([GateDescriptor; VECTOR_COUNT]);

const BUILDING: u8 = 0;
const LOADING: u8 = 1;
const ACTIVE: u8 = 2;

pub struct VectorTable {
    gates: IrqMutex<Gates>,
    state: AtomicU8,
}

impl VectorTable {
    pub const fn new() -> Self {
        Self {
            gates: IrqMutex::new(Gates([GateDescriptor::missing(); VECTOR_COUNT])),
            state: AtomicU8::new(BUILDING),
        }
    }

    /// Point `vector` at the entry trampoline `entry` with kernel code
    /// selector and `options`.
    pub fn install(&self, vector: u8, entry: u64, options: GateOptions) {
        let mut gates = self.gates.lock();
        if self.state.load(Ordering::Acquire) != BUILDING {
            log::warn!("vector table is live; ignoring install of vector {}", vector);
            return;
        }
        gates.0[vector as usize] = GateDescriptor::new(entry, KERNEL_CODE_SELECTOR, options);
    }

    pub fn gate(&self, vector: u8) -> GateDescriptor {
        self.gates.lock().0[vector as usize]
    }

    /// Load the table and enable interrupt delivery.
    ///
    /// Interrupts stay masked from before the load until the table is
    /// live. Any call after the first only logs a warning.
    pub fn activate<P: Platform + ?Sized>(&'static self, platform: &P) {
        if self
            .state
            .compare_exchange(BUILDING, LOADING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            log::warn!("vector table already initialised; not reloading");
            return;
        }

        irq::disable();
        {
            let gates = self.gates.lock();
            let pointer = DescriptorTablePointer {
                limit: (size_of::<Gates>() - 1) as u16,
                base: VirtAddr::from_ptr(&*gates as *const Gates),
            };
            // SAFETY: `self` is 'static and the gate array never moves; the
            // BUILDING check in `install` keeps it unmodified from here on.
            unsafe { platform.load_vector_table(&pointer) };
        }
        self.state.store(ACTIVE, Ordering::Release);
        irq::enable();

        log::info!("vector table active ({} gates)", VECTOR_COUNT);
    }

    pub fn is_active(&self) -> bool {
        self.state.load(Ordering::Acquire) == ACTIVE
    }
}

impl Default for VectorTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockPlatform;

    #[test]
    fn options_bits() {
        assert_eq!(GateOptions::kernel_interrupt().raw(), 0x8E00);
        let df = GateOptions::kernel_interrupt().set_stack_index(1);
        assert_eq!(df.raw(), 0x8E01);
        let user_trap = GateOptions::kernel_interrupt()
            .set_gate_type(GateType::Trap)
            .set_privilege_level(PrivilegeLevel::Ring3);
        assert_eq!(user_trap.raw(), 0xEF00);
        assert!(!GateOptions::new().is_present());
    }

    #[test]
    fn descriptor_splits_offset() {
        let gate = GateDescriptor::new(
            0xffff_ffff_8012_3456,
            0x28,
            GateOptions::kernel_interrupt(),
        );
        assert_eq!(gate.entry(), 0xffff_ffff_8012_3456);
        assert_eq!(gate.selector(), 0x28);
        assert_eq!(size_of::<GateDescriptor>(), 16);
    }

    #[test]
    fn activation_loads_once_with_interrupts_masked() {
        let table: &'static VectorTable = Box::leak(Box::new(VectorTable::new()));
        let platform = MockPlatform::default();
        irq::disable();

        table.install(0, 0x1000, GateOptions::kernel_interrupt());
        table.activate(&platform);

        let loads = platform.loads();
        assert_eq!(loads.len(), 1);
        let (limit, masked_during_load) = loads[0];
        assert_eq!(limit, 256 * 16 - 1);
        assert!(masked_during_load);
        assert!(table.is_active());
        assert!(irq::are_enabled());
    }

    #[test]
    fn table_is_frozen_after_activation() {
        let table: &'static VectorTable = Box::leak(Box::new(VectorTable::new()));
        let platform = MockPlatform::default();

        table.install(3, 0x3000, GateOptions::kernel_interrupt());
        table.activate(&platform);
        table.install(3, 0x9999, GateOptions::kernel_interrupt());

        assert_eq!(table.gate(3).entry(), 0x3000);
    }
}
