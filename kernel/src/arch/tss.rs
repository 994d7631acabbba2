//! Task State Segment for x86_64.
//!
//! Holds RSP0, rewritten on every switch to the incoming thread's stack
//! top, and IST1, the dedicated double-fault stack.

use core::cell::UnsafeCell;
use core::ptr;

/// Size of each IST stack in bytes (16 KiB).
const IST_STACK_SIZE: usize = 4096 * 4;

/// IST slot used by the double-fault gate.
pub const DOUBLE_FAULT_IST: u8 = 1;

#[repr(C, align(16))]
struct IstStack([u8; IST_STACK_SIZE]);

static mut DOUBLE_FAULT_STACK: IstStack = IstStack([0; IST_STACK_SIZE]);

/// The 64-bit Task State Segment.
#[repr(C, packed)]
pub struct Tss {
    reserved0: u32,
    /// Stacks for privilege transitions; RSP0 is used on entry to ring 0.
    pub rsp: [u64; 3],
    reserved1: u64,
    /// IST1..IST7 live at `ist[0..7]`.
    pub ist: [u64; 7],
    reserved2: u64,
    reserved3: u16,
    pub iomap_base: u16,
}

impl Tss {
    const fn new() -> Self {
        Self {
            reserved0: 0,
            rsp: [0; 3],
            reserved1: 0,
            ist: [0; 7],
            reserved2: 0,
            reserved3: 0,
            iomap_base: core::mem::size_of::<Self>() as u16,
        }
    }
}

/// The CPU reads the TSS behind our back, so it sits in an `UnsafeCell`
/// and every write is a single unaligned store.
struct TssCell(UnsafeCell<Tss>);

// SAFETY: single core; writes happen with interrupts masked (boot, or the
// timer trap).
unsafe impl Sync for TssCell {}

static TSS: TssCell = TssCell(UnsafeCell::new(Tss::new()));

/// Point IST1 at the double-fault stack. Call before `gdt::init`.
pub fn init() {
    let top = (&raw const DOUBLE_FAULT_STACK as u64) + IST_STACK_SIZE as u64;
    let tss = TSS.0.get();
    // SAFETY: boot path, nothing else touches the TSS yet.
    unsafe {
        let ist = ptr::addr_of_mut!((*tss).ist).cast::<u64>();
        ptr::write_unaligned(ist.add(DOUBLE_FAULT_IST as usize - 1), top);
    }
    log::debug!("TSS: IST{} at {:#x}", DOUBLE_FAULT_IST, top);
}

/// The kernel TSS, for building its GDT descriptor.
pub fn get() -> &'static Tss {
    // SAFETY: shared view; the only writes go through raw pointers.
    unsafe { &*TSS.0.get() }
}

/// Set RSP0.
pub fn set_kernel_stack(top: u64) {
    let tss = TSS.0.get();
    // SAFETY: see `TssCell`.
    unsafe { ptr::write_unaligned(ptr::addr_of_mut!((*tss).rsp).cast::<u64>(), top) };
}
