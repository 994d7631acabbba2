//! Frame-pointer backtrace of a trapped context.
//!
//! Each frame on an `rbp` chain looks like
//!
//! ```text
//!   [rbp]     caller's rbp
//!   [rbp + 8] return address
//! ```
//!
//! Every read goes through [`Platform::read_stack_word`], which refuses
//! unmapped or misaligned addresses, so a corrupt chain ends the walk
//! instead of faulting again.

use crate::frame::TrapFrame;
use crate::hal::Platform;

/// Most return addresses reported, including the trapping `rip`.
pub const MAX_DEPTH: usize = 16;

/// Visit `frame.rip`, then the return address of each saved frame on the
/// `rbp` chain. Stops at a null or non-ascending link, a refused read, or
/// [`MAX_DEPTH`]. Returns how many addresses were visited.
pub fn walk<P: Platform + ?Sized>(
    platform: &P,
    frame: &TrapFrame,
    mut visit: impl FnMut(usize, u64),
) -> usize {
    visit(0, frame.rip);
    let mut depth = 1;
    let mut rbp = frame.rbp;
    while depth < MAX_DEPTH {
        if rbp == 0 || rbp % 8 != 0 {
            break;
        }
        let Some(ret) = platform.read_stack_word(rbp.wrapping_add(8)) else {
            break;
        };
        if ret == 0 {
            break;
        }
        visit(depth, ret);
        depth += 1;

        match platform.read_stack_word(rbp) {
            // Callers live higher up the stack.
            Some(next) if next > rbp => rbp = next,
            _ => break,
        }
    }
    depth
}

/// Log the backtrace of `frame` at error level.
pub fn report<P: Platform + ?Sized>(platform: &P, frame: &TrapFrame) {
    log::error!("Backtrace:");
    walk(platform, frame, |depth, addr| {
        log::error!("  #{:<2} {:#018x}", depth, addr);
    });
}
