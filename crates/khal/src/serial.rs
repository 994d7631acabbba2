//! Serial port (COM1 UART 16550) driver.

use core::fmt;

use spin::Mutex;
use x86_64::instructions::interrupts;
use x86_64::instructions::port::Port;

/// COM1 base port address
const COM1_PORT: u16 = 0x3F8;

/// Polled COM1 transmitter.
pub struct Serial {
    data: Port<u8>,
    int_enable: Port<u8>,
    fifo_ctrl: Port<u8>,
    line_ctrl: Port<u8>,
    modem_ctrl: Port<u8>,
    line_status: Port<u8>,
    initialized: bool,
}

impl Serial {
    const fn new(base: u16) -> Self {
        Self {
            data: Port::new(base),
            int_enable: Port::new(base + 1),
            fifo_ctrl: Port::new(base + 2),
            line_ctrl: Port::new(base + 3),
            modem_ctrl: Port::new(base + 4),
            line_status: Port::new(base + 5),
            initialized: false,
        }
    }

    /// 115200 baud, 8N1, FIFOs on, UART interrupts off.
    pub fn init(&mut self) {
        // SAFETY: standard 16550 programming sequence on the COM1 ports.
        unsafe {
            self.int_enable.write(0x00);

            // DLAB on, divisor 1 (115200 baud).
            self.line_ctrl.write(0x80);
            self.data.write(0x01);
            self.int_enable.write(0x00);

            // 8 bits, no parity, one stop bit (DLAB off).
            self.line_ctrl.write(0x03);
            self.fifo_ctrl.write(0xC7);
            self.modem_ctrl.write(0x03);

            // Loopback self-test.
            self.modem_ctrl.write(0x1E);
            self.data.write(0xAE);
            if self.data.read() == 0xAE {
                self.modem_ctrl.write(0x0F);
            }
            // A failed loopback still leaves a usable transmitter on most
            // emulators, so keep going either way.
            self.int_enable.write(0x00);
        }
        self.initialized = true;
    }

    fn is_transmit_empty(&mut self) -> bool {
        // SAFETY: reading the line status register has no side effects.
        unsafe { self.line_status.read() & 0x20 != 0 }
    }

    pub fn write_byte(&mut self, byte: u8) {
        if !self.initialized {
            return;
        }
        while !self.is_transmit_empty() {
            core::hint::spin_loop();
        }
        // SAFETY: transmit holding register is empty.
        unsafe { self.data.write(byte) };
    }
}

impl fmt::Write for Serial {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for byte in s.bytes() {
            if byte == b'\n' {
                self.write_byte(b'\r');
            }
            self.write_byte(byte);
        }
        Ok(())
    }
}

/// Global serial port instance (COM1)
static SERIAL: Mutex<Serial> = Mutex::new(Serial::new(COM1_PORT));

/// Initialize the global serial port
pub fn init() {
    interrupts::without_interrupts(|| SERIAL.lock().init());
}

/// Write formatted arguments to the serial port.
///
/// Interrupts are masked for the duration, so a trap that logs can never
/// spin on a lock held by the code it interrupted.
pub fn write_fmt(args: fmt::Arguments) {
    use fmt::Write;
    interrupts::without_interrupts(|| {
        let _ = SERIAL.lock().write_fmt(args);
    });
}

/// Write from a context that may already hold the serial lock (panic,
/// trap handlers). Skips output rather than deadlock.
pub fn try_write_fmt(args: fmt::Arguments) -> bool {
    interrupts::without_interrupts(|| try_write_to(&SERIAL, args))
}

/// Format into `port` unless someone already holds it.
fn try_write_to<W: fmt::Write>(port: &Mutex<W>, args: fmt::Arguments) -> bool {
    match port.try_lock() {
        Some(mut writer) => writer.write_fmt(args).is_ok(),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn held_port_drops_the_line() {
        let port = Mutex::new(String::new());
        {
            let _held = port.lock();
            assert!(!try_write_to(&port, format_args!("lost {}", 1)));
        }
        assert!(try_write_to(&port, format_args!("kept {}", 2)));
        assert_eq!(*port.lock(), "kept 2");
    }
}
