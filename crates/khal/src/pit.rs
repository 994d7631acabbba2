//! 8253/8254 programmable interval timer, channel 0.
//!
//! Drives ISA line 0 at a fixed rate; that line is the scheduler tick.

use x86_64::instructions::port::Port;

/// Input clock of the PIT, Hz.
pub const BASE_FREQUENCY: u32 = 1_193_182;

const CHANNEL0_DATA: u16 = 0x40;
const COMMAND: u16 = 0x43;

/// Channel 0, lobyte/hibyte access, mode 2 (rate generator), binary.
const CHANNEL0_RATE_GENERATOR: u8 = 0x34;

/// Divisor for `hz`, clamped to what 16 bits can express (0 means 65536).
pub fn divisor_for(hz: u32) -> u16 {
    let hz = hz.max(1);
    let divisor = BASE_FREQUENCY / hz;
    match divisor {
        0 | 1 => 1,
        d if d >= 65_536 => 0,
        d => d as u16,
    }
}

/// Frequency actually produced by `divisor`.
pub fn frequency_of(divisor: u16) -> u32 {
    let d = if divisor == 0 { 65_536 } else { divisor as u32 };
    BASE_FREQUENCY / d
}

/// Program channel 0 as a periodic rate generator at (about) `hz`.
/// Returns the frequency actually programmed.
pub fn start_periodic(hz: u32) -> u32 {
    let divisor = divisor_for(hz);
    let mut command: Port<u8> = Port::new(COMMAND);
    let mut data: Port<u8> = Port::new(CHANNEL0_DATA);
    // SAFETY: standard PIT programming sequence.
    unsafe {
        command.write(CHANNEL0_RATE_GENERATOR);
        data.write(divisor as u8);
        data.write((divisor >> 8) as u8);
    }
    frequency_of(divisor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_rate_is_close_to_one_khz() {
        assert_eq!(divisor_for(1000), 1193);
        assert_eq!(frequency_of(1193), 1000);
    }

    #[test]
    fn extremes_clamp_to_sixteen_bits() {
        assert_eq!(divisor_for(BASE_FREQUENCY), 1);
        assert_eq!(divisor_for(u32::MAX), 1);
        assert_eq!(divisor_for(18), 0);
        assert_eq!(frequency_of(0), 18);
        assert_eq!(divisor_for(0), 0);
    }
}
