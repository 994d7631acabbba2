//! Boot threads and the helpers kernel threads use to stop running.
//!
//! ```text
//!   anchor ─┬─ heartbeat              logs scheduler stats every second
//!           └─ waiter ── waker        waiter blocks, waker unblocks it;
//!                                     both exit after ROUNDS rounds
//! ```

use kcore::{SchedError, ThreadId, ThreadState};

use crate::arch::cpu;
use crate::drivers::{irqchip, timer};
use crate::traps::{self, Kernel};

/// Block/unblock round trips before the worker pair exits.
const ROUNDS: usize = 3;

const HEARTBEAT_MS: u64 = 1000;
const WAKE_MS: u64 = 250;

/// Spawn the boot threads as children of the calling (anchor) thread.
pub fn spawn_boot_threads(kernel: &Kernel) -> Result<(), SchedError> {
    let anchor = kernel.current_thread().ok_or(SchedError::NotInitialized)?;
    let heartbeat = kernel.create_thread(heartbeat, 0, anchor)?;
    let waiter = kernel.create_thread(waiter, 0, anchor)?;
    log::info!("boot threads: heartbeat {}, waiter {}", heartbeat, waiter);
    Ok(())
}

/// Kill the calling thread and idle until the next tick switches away for
/// good.
pub fn exit_current() -> ! {
    let kernel = traps::kernel();
    if let Err(err) = kernel.exit() {
        log::error!("exit_current: {}", err);
    }
    loop {
        cpu::idle();
    }
}

/// Block the calling thread and wait until someone unblocks it.
pub fn park() -> Result<(), SchedError> {
    let kernel = traps::kernel();
    let me = kernel.current_thread().ok_or(SchedError::NotInitialized)?;
    kernel.block()?;
    while kernel
        .thread_info(me)
        .is_some_and(|info| info.state == ThreadState::Blocked)
    {
        cpu::idle();
    }
    Ok(())
}

extern "C" fn heartbeat(_arg: usize) -> ! {
    let kernel = traps::kernel();
    loop {
        timer::sleep_ms(kernel, HEARTBEAT_MS);
        let stats = kernel.stats();
        log::info!(
            "heartbeat: {} ticks, {} live threads, {} created, {} reaped, {} switches, {} spurious",
            kernel.ticks(),
            stats.live(),
            stats.created,
            stats.reaped,
            stats.switches,
            irqchip::spurious_count()
        );
    }
}

extern "C" fn waiter(_arg: usize) -> ! {
    let kernel = traps::kernel();
    let Some(me) = kernel.current_thread() else {
        exit_current()
    };
    if kernel.create_thread(waker, me.0 as usize, me).is_err() {
        exit_current()
    }

    for round in 1..=ROUNDS {
        log::info!("waiter {}: blocking (round {}/{})", me, round, ROUNDS);
        if park().is_err() {
            break;
        }
        log::info!("waiter {}: woken", me);
    }
    log::info!("waiter {}: done, exiting", me);
    exit_current()
}

extern "C" fn waker(arg: usize) -> ! {
    let kernel = traps::kernel();
    let target = ThreadId(arg as u64);
    let mut woken = 0;

    loop {
        timer::sleep_ms(kernel, WAKE_MS);
        match kernel.thread_info(target).map(|info| info.state) {
            Some(ThreadState::Blocked) => {
                if kernel.unblock(target).is_ok() {
                    woken += 1;
                }
            }
            Some(ThreadState::Ready | ThreadState::Running) => {}
            Some(ThreadState::Killed) | None => break,
        }
    }

    kernel.set_errno(woken);
    log::info!(
        "waker: {} gone after {} wakeups (errno {}), exiting",
        target,
        woken,
        kernel.errno()
    );
    exit_current()
}
