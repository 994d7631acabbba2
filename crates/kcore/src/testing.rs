//! Host-side stand-ins for the machine, used by the unit tests.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use core::fmt;

use log::{Level, LevelFilter, Log, Metadata, Record};
use x86_64::structures::DescriptorTablePointer;

use crate::config::Config;
use crate::context::KernelContext;
use crate::hal::{AddressSpaces, InterruptController, Platform};
use crate::irq;

// ── Platform ────────────────────────────────────────────────────

/// Records every call; `halt` panics with "halted" so tests can catch it.
#[derive(Default)]
pub struct MockPlatform {
    loads: Mutex<Vec<(u16, bool)>>,
    kernel_stacks: Mutex<Vec<u64>>,
    banner: Mutex<Vec<String>>,
    stack: Mutex<BTreeMap<u64, u64>>,
}

impl MockPlatform {
    /// `(limit, interrupts masked at load time)` for each `lidt`.
    pub fn loads(&self) -> Vec<(u16, bool)> {
        self.loads.lock().unwrap().clone()
    }

    pub fn kernel_stacks(&self) -> Vec<u64> {
        self.kernel_stacks.lock().unwrap().clone()
    }

    pub fn banner(&self) -> Vec<String> {
        self.banner.lock().unwrap().clone()
    }

    /// Make `(addr, word)` pairs readable through `read_stack_word`.
    pub fn stack_words(&self, words: &[(u64, u64)]) {
        self.stack.lock().unwrap().extend(words.iter().copied());
    }
}

impl Platform for MockPlatform {
    unsafe fn load_vector_table(&self, pointer: &DescriptorTablePointer) {
        self.loads
            .lock()
            .unwrap()
            .push((pointer.limit, !irq::are_enabled()));
    }

    fn set_kernel_stack(&self, top: u64) {
        self.kernel_stacks.lock().unwrap().push(top);
    }

    fn halt(&self) -> ! {
        panic!("halted");
    }

    fn panic_banner(&self, line: fmt::Arguments<'_>) {
        self.banner.lock().unwrap().push(line.to_string());
    }

    fn read_stack_word(&self, addr: u64) -> Option<u64> {
        if addr % 8 != 0 {
            return None;
        }
        self.stack.lock().unwrap().get(&addr).copied()
    }
}

// ── Interrupt controller ────────────────────────────────────────

#[derive(Default)]
pub struct MockChip {
    eois: Mutex<Vec<u8>>,
    redirects: Mutex<Vec<(u8, u8)>>,
}

impl MockChip {
    pub fn leak() -> &'static MockChip {
        Box::leak(Box::new(MockChip::default()))
    }

    pub fn eoi_count(&self, vector: u8) -> usize {
        self.eois.lock().unwrap().iter().filter(|&&v| v == vector).count()
    }

    pub fn total_eois(&self) -> usize {
        self.eois.lock().unwrap().len()
    }

    pub fn redirects(&self) -> Vec<(u8, u8)> {
        self.redirects.lock().unwrap().clone()
    }
}

impl InterruptController for MockChip {
    fn end_of_interrupt(&self, vector: u8) {
        self.eois.lock().unwrap().push(vector);
    }

    fn redirect(&self, irq: u8, vector: u8) {
        self.redirects.lock().unwrap().push((irq, vector));
    }
}

// ── Address spaces ──────────────────────────────────────────────

/// Handle 1 is the boot space; clones are numbered from 100.
pub struct MockSpaces {
    next: AtomicU32,
    clones: AtomicU32,
    exhausted: AtomicBool,
    switches: Mutex<Vec<u32>>,
    released: Mutex<Vec<u32>>,
}

impl Default for MockSpaces {
    fn default() -> Self {
        Self {
            next: AtomicU32::new(100),
            clones: AtomicU32::new(0),
            exhausted: AtomicBool::new(false),
            switches: Mutex::new(Vec::new()),
            released: Mutex::new(Vec::new()),
        }
    }
}

impl MockSpaces {
    pub fn active_handle(&self) -> u32 {
        self.active()
    }

    pub fn clones(&self) -> u32 {
        self.clones.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> Vec<u32> {
        self.released.lock().unwrap().clone()
    }

    pub fn last_switch(&self) -> Option<u32> {
        self.switches.lock().unwrap().last().copied()
    }

    pub fn set_exhausted(&self, exhausted: bool) {
        self.exhausted.store(exhausted, Ordering::SeqCst);
    }
}

impl AddressSpaces for MockSpaces {
    type Handle = u32;

    fn active(&self) -> u32 {
        1
    }

    fn clone_space(&self, _source: u32) -> Option<u32> {
        if self.exhausted.load(Ordering::SeqCst) {
            return None;
        }
        self.clones.fetch_add(1, Ordering::SeqCst);
        Some(self.next.fetch_add(1, Ordering::SeqCst))
    }

    fn switch_to(&self, handle: u32) {
        self.switches.lock().unwrap().push(handle);
    }

    fn release(&self, handle: u32) {
        self.released.lock().unwrap().push(handle);
    }
}

// ── Contexts ────────────────────────────────────────────────────

pub type TestContext = KernelContext<MockPlatform, MockSpaces>;

/// A leaked context with default config and a mock legacy controller.
pub fn context() -> (&'static TestContext, &'static MockChip) {
    context_with(Config::default())
}

pub fn context_with(config: Config) -> (&'static TestContext, &'static MockChip) {
    let legacy = MockChip::leak();
    let ctx = KernelContext::new(MockPlatform::default(), MockSpaces::default(), legacy, config);
    (Box::leak(Box::new(ctx)), legacy)
}

/// Entry point for threads that are scheduled but never actually run.
pub extern "C" fn idle_entry(_arg: usize) -> ! {
    loop {
        core::hint::spin_loop();
    }
}

// ── Log capture ─────────────────────────────────────────────────

std::thread_local! {
    static LINES: RefCell<Vec<(Level, String)>> = const { RefCell::new(Vec::new()) };
}

struct CaptureLogger;

impl Log for CaptureLogger {
    fn enabled(&self, _: &Metadata<'_>) -> bool {
        true
    }

    fn log(&self, record: &Record<'_>) {
        let line = record.args().to_string();
        LINES.with(|lines| lines.borrow_mut().push((record.level(), line)));
    }

    fn flush(&self) {}
}

static LOGGER: CaptureLogger = CaptureLogger;
static INSTALL: std::sync::Once = std::sync::Once::new();

/// Start recording this test thread's log lines.
pub fn capture_logs() {
    INSTALL.call_once(|| {
        let _ = log::set_logger(&LOGGER);
        log::set_max_level(LevelFilter::Trace);
    });
    LINES.with(|lines| lines.borrow_mut().clear());
}

pub fn captured_logs() -> Vec<(Level, String)> {
    LINES.with(|lines| lines.borrow().clone())
}

pub fn warnings() -> Vec<String> {
    captured_logs()
        .into_iter()
        .filter(|(level, _)| *level == Level::Warn)
        .map(|(_, line)| line)
        .collect()
}
