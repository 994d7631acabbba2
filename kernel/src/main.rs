// =============================================================================
// Carousel — Kernel Entry Point
// =============================================================================
//
// Limine has already put us in 64-bit long mode with its own page tables:
// the kernel in the higher half, all RAM mapped at the HHDM offset, a
// 64 KiB boot stack, interrupts disabled, only the bootstrap core running.
//
// BOOT SEQUENCE:
//   1. serial + logger       the only output device we rely on
//   2. boot info, cmdline    tunables for the core (`hz=`, `reap=`, ...)
//   3. PMM, paging, heap     frames, HHDM, `alloc`
//   4. GDT + TSS             Limine selectors, IST1 for #DF
//   5. 8259 remap            legacy lines on vectors 32..48, all masked
//   6. vector table          256 stubs installed, loaded, IF set
//   7. APIC pair             adopted when present, 8259 masked
//   8. PIT                   the scheduler tick on vector 32
//   9. scheduler             this boot context becomes the anchor
//  10. boot threads          heartbeat and a block/unblock worker pair
//  11. idle                  the anchor halts until the next trap
//
// Application processors are never started: the core is single-CPU.
// =============================================================================

#![no_std]
#![no_main]

extern crate alloc;

mod arch;
mod drivers;
mod memory;
mod task;
mod traps;
mod util;

use arch::boot;
use kcore::Config;
use log::LevelFilter;
use memory::{heap, paging, pmm};

#[unsafe(no_mangle)]
extern "C" fn kmain() -> ! {
    // ── 1. Console ──
    klog::init(LevelFilter::Info);
    klog::println!();
    klog::println!("Carousel: preemptive round-robin kernel for x86_64");

    if !boot::revision_supported() {
        panic!("Limine base revision not supported by this bootloader");
    }

    // ── 2. Boot info ──
    let cmdline = boot::cmdline();
    let config = Config::from_cmdline(cmdline);
    klog::set_level(config.log_level);
    log::info!("cmdline: {:?}", cmdline);
    log::info!(
        "config: {} Hz, {} KiB stacks, {:?} reaping, {:?} exceptions",
        config.tick_hz,
        config.stack_size / 1024,
        config.reap,
        config.exceptions
    );
    if let Some((phys, virt)) = boot::kernel_address() {
        log::info!("kernel loaded at {:#x} (virtual {:#x})", phys, virt);
    }

    // ── 3. Memory ──
    let hhdm_offset = boot::hhdm_offset();
    let memory_map = boot::memory_map();
    memory::census(memory_map);
    // SAFETY: first and only call, HHDM known.
    unsafe { pmm::init(hhdm_offset, memory_map) };
    paging::init(hhdm_offset);
    // SAFETY: first and only call, after PMM and paging.
    unsafe { heap::init() };

    // ── 4. Descriptor tables ──
    arch::tss::init();
    // SAFETY: bootstrap core, interrupts still disabled.
    unsafe { arch::gdt::init() };

    // ── 5 + 6. Legacy PIC and the vector table ──
    khal::pic::init();
    let kernel = traps::init(config);
    kernel.register_interrupt_handler(khal::apic::SPURIOUS_VECTOR, drivers::irqchip::spurious);
    kernel.activate();

    // ── 7. APIC pair ──
    // SAFETY: once, during boot, after paging.
    if let Some(apic) = unsafe { drivers::irqchip::probe_apic(hhdm_offset) } {
        kernel.set_advanced_controller(apic);
    }

    // ── 8. Tick source ──
    drivers::timer::init(kernel);

    // ── 9 + 10. Scheduler and boot threads ──
    kernel.init_scheduler();
    if let Err(err) = task::spawn_boot_threads(kernel) {
        log::error!("boot threads not started: {}", err);
    }

    let frames = pmm::stats();
    let (heap_used, heap_free) = heap::usage();
    log::info!(
        "boot complete: {}/{} frames free, heap {} B used / {} B free",
        frames.free_frames,
        frames.total_frames,
        heap_used,
        heap_free
    );

    // ── 11. Anchor idles ──
    loop {
        arch::cpu::idle();
    }
}
