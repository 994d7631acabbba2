//! Legacy 8259 PIC pair.
//!
//! Remapped so IRQ 0–7 land on vectors 32–39 and IRQ 8–15 on 40–47,
//! clear of the CPU exception range. Acts as the interrupt controller until
//! the APIC pair takes over, at which point every line is masked.

use spin::Mutex;
use x86_64::instructions::interrupts;
use x86_64::instructions::port::Port;

const PIC1_COMMAND: u16 = 0x20;
const PIC1_DATA: u16 = 0x21;
const PIC2_COMMAND: u16 = 0xA0;
const PIC2_DATA: u16 = 0xA1;

/// ICW1: begin initialisation, ICW4 follows.
const ICW1_INIT: u8 = 0x10;
const ICW1_ICW4: u8 = 0x01;
/// ICW4: 8086/88 mode.
const ICW4_8086: u8 = 0x01;
/// OCW2: non-specific end of interrupt.
const EOI: u8 = 0x20;

/// Vector of IRQ 0 after remapping.
pub const PIC1_OFFSET: u8 = 32;
/// Vector of IRQ 8 after remapping.
pub const PIC2_OFFSET: u8 = 40;

/// Line the slave is cascaded on.
const CASCADE_IRQ: u8 = 2;

struct Chips {
    master_cmd: Port<u8>,
    master_data: Port<u8>,
    slave_cmd: Port<u8>,
    slave_data: Port<u8>,
    wait: Port<u8>,
}

impl Chips {
    const fn new() -> Self {
        Self {
            master_cmd: Port::new(PIC1_COMMAND),
            master_data: Port::new(PIC1_DATA),
            slave_cmd: Port::new(PIC2_COMMAND),
            slave_data: Port::new(PIC2_DATA),
            wait: Port::new(0x80),
        }
    }

    /// Old chips need a short pause between ICWs; port 0x80 is unused.
    fn io_wait(&mut self) {
        // SAFETY: POST diagnostic port, writes are ignored.
        unsafe { self.wait.write(0) };
    }
}

/// Also taken from trap context for EOI, so every other holder masks
/// interrupts first.
static CHIPS: Mutex<Chips> = Mutex::new(Chips::new());

/// Remap both PICs to 32/40 and mask every line except the cascade.
pub fn init() {
    interrupts::without_interrupts(|| {
        let mut chips = CHIPS.lock();
        // SAFETY: the documented 8259 initialisation sequence.
        unsafe {
            chips.master_cmd.write(ICW1_INIT | ICW1_ICW4);
            chips.io_wait();
            chips.slave_cmd.write(ICW1_INIT | ICW1_ICW4);
            chips.io_wait();

            chips.master_data.write(PIC1_OFFSET);
            chips.io_wait();
            chips.slave_data.write(PIC2_OFFSET);
            chips.io_wait();

            chips.master_data.write(1 << CASCADE_IRQ);
            chips.io_wait();
            chips.slave_data.write(CASCADE_IRQ);
            chips.io_wait();

            chips.master_data.write(ICW4_8086);
            chips.io_wait();
            chips.slave_data.write(ICW4_8086);
            chips.io_wait();

            chips.master_data.write(!(1 << CASCADE_IRQ));
            chips.slave_data.write(0xFF);
        }
    });
}

/// Let `irq` (0–15) through.
pub fn unmask(irq: u8) {
    update_mask(irq, false);
}

pub fn mask(irq: u8) {
    update_mask(irq, true);
}

fn update_mask(irq: u8, masked: bool) {
    interrupts::without_interrupts(|| {
        let mut chips = CHIPS.lock();
        let (port, bit) = if irq < 8 {
            (&mut chips.master_data, irq)
        } else {
            (&mut chips.slave_data, irq - 8)
        };
        // SAFETY: read-modify-write of the interrupt mask register.
        unsafe {
            let current = port.read();
            let next = if masked { current | (1 << bit) } else { current & !(1 << bit) };
            port.write(next);
        }
    });
}

/// Mask all sixteen lines; used when the APIC pair takes over.
pub fn mask_all() {
    interrupts::without_interrupts(|| {
        let mut chips = CHIPS.lock();
        // SAFETY: writing the mask registers only.
        unsafe {
            chips.master_data.write(0xFF);
            chips.slave_data.write(0xFF);
        }
    });
}

/// Which chips own `vector`: `None` outside the remapped 32..48 window,
/// otherwise whether the slave needs an EOI as well.
pub fn eoi_targets(vector: u8) -> Option<bool> {
    if !(PIC1_OFFSET..PIC2_OFFSET + 8).contains(&vector) {
        return None;
    }
    Some(vector >= PIC2_OFFSET)
}

/// Acknowledge the interrupt delivered on `vector`. Slave lines need both
/// chips acknowledged; vectors the chips never raise are ignored.
pub fn end_of_interrupt(vector: u8) {
    let Some(slave) = eoi_targets(vector) else {
        return;
    };
    let mut chips = CHIPS.lock();
    // SAFETY: OCW2 writes to the command ports.
    unsafe {
        if slave {
            chips.slave_cmd.write(EOI);
        }
        chips.master_cmd.write(EOI);
    }
}
