// =============================================================================
// Carousel — Kernel Context
// =============================================================================
//
// The single owner of every piece of mutable trap/scheduler state:
//
//   KernelContext
//   ├── platform      lidt, RSP0, halt, console banner, stack reads
//   ├── spaces        address-space manager
//   ├── controllers   legacy PIC, optional APIC/IOAPIC
//   ├── table         256 gates, frozen after activate()
//   ├── handlers      vector → fn(&mut TrapFrame)
//   └── scheduler     IrqMutex<Option<Scheduler>>, None until init
//
// The kernel builds exactly one of these and keeps it in a `spin::Once`;
// the trap entry path reaches it from there. Tests build as many as they
// like.
//
// =============================================================================

use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering};

use crate::config::Config;
use crate::dispatch::Controllers;
use crate::error::SchedError;
use crate::exception::ExceptionPolicy;
use crate::hal::{AddressSpaces, InterruptController, Platform};
use crate::registry::{HandlerRegistry, InterruptHandler};
use crate::sched::{SchedStats, Scheduler, ThreadEntry, ThreadId, ThreadInfo};
use crate::sync::IrqMutex;
use crate::vectors::{GateOptions, VectorTable};
use crate::{IRQ_BASE, TIMER_VECTOR};

/// Legacy ISA lines 1–15 land on these vectors; line 0 (the timer) is
/// routed by the timer driver itself.
const REDIRECTED_VECTORS: core::ops::RangeInclusive<u8> = 33..=47;

pub struct KernelContext<P: Platform, A: AddressSpaces> {
    pub(crate) platform: P,
    pub(crate) spaces: A,
    pub(crate) controllers: Controllers,
    pub(crate) table: VectorTable,
    pub(crate) handlers: HandlerRegistry,
    pub(crate) scheduler: IrqMutex<Option<Scheduler<A::Handle>>>,
    pub(crate) ticks: AtomicU64,
    report_exceptions: AtomicBool,
    cpu_errno: AtomicI32,
    config: Config,
}

impl<P: Platform, A: AddressSpaces> KernelContext<P, A> {
    pub fn new(
        platform: P,
        spaces: A,
        legacy: &'static dyn InterruptController,
        config: Config,
    ) -> Self {
        Self {
            platform,
            spaces,
            controllers: Controllers::new(legacy),
            table: VectorTable::new(),
            handlers: HandlerRegistry::new(),
            scheduler: IrqMutex::new(None),
            ticks: AtomicU64::new(0),
            report_exceptions: AtomicBool::new(
                config.exceptions.effective() == ExceptionPolicy::Report,
            ),
            cpu_errno: AtomicI32::new(0),
            config,
        }
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn spaces(&self) -> &A {
        &self.spaces
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    // ── Vector table ────────────────────────────────────────────

    pub fn install(&self, vector: u8, entry: u64, options: GateOptions) {
        self.table.install(vector, entry, options);
    }

    /// Load the vector table and enable interrupts. Only the first call
    /// does anything.
    pub fn activate(&'static self) {
        self.table.activate(&self.platform);
    }

    pub fn trap_table_ready(&self) -> bool {
        self.table.is_active()
    }

    // ── Interrupt routing ───────────────────────────────────────

    /// Adopt the APIC pair. Later EOIs go there and `register_interrupt_handler`
    /// starts programming redirections.
    pub fn set_advanced_controller(&self, controller: &'static dyn InterruptController) {
        if !self.controllers.adopt_advanced(controller) {
            log::warn!("advanced interrupt controller already set; keeping the first");
        }
    }

    pub fn has_advanced_controller(&self) -> bool {
        self.controllers.advanced().is_some()
    }

    /// Route `vector` to `handler`. The last registration for a vector wins.
    pub fn register_interrupt_handler(&self, vector: u8, handler: InterruptHandler) {
        if vector < IRQ_BASE {
            log::warn!("vector {} is a CPU exception; handler not registered", vector);
            return;
        }
        if vector == TIMER_VECTOR {
            log::warn!("vector {} drives the scheduler; handler not registered", vector);
            return;
        }

        self.handlers.set(vector, handler);
        if let Some(advanced) = self.controllers.advanced() {
            if REDIRECTED_VECTORS.contains(&vector) {
                advanced.redirect(vector - IRQ_BASE, vector);
            }
        }
        log::debug!("handler registered for vector {}", vector);
    }

    pub fn exception_policy(&self) -> ExceptionPolicy {
        if self.report_exceptions.load(Ordering::Relaxed) {
            ExceptionPolicy::Report
        } else {
            ExceptionPolicy::Fatal
        }
    }

    pub fn set_exception_policy(&self, policy: ExceptionPolicy) {
        let effective = policy.effective();
        if effective != policy {
            log::warn!("{:?} exception policy needs a debug build; staying fatal", policy);
        }
        self.report_exceptions
            .store(effective == ExceptionPolicy::Report, Ordering::Relaxed);
    }

    /// Timer traps dispatched so far.
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    // ── Scheduler lifecycle ─────────────────────────────────────

    /// Turn the running boot context into the anchor thread.
    pub fn init_scheduler(&self) {
        let mut scheduler = self.scheduler.lock();
        if scheduler.is_some() {
            log::warn!("scheduler has already been initialised");
            return;
        }
        *scheduler = Some(Scheduler::new(
            self.spaces.active(),
            self.config.stack_size,
            self.config.reap,
        ));
        log::info!(
            "scheduler ready: {} KiB stacks, {:?} reaping",
            self.config.stack_size / 1024,
            self.config.reap
        );
    }

    pub fn scheduler_ready(&self) -> bool {
        self.scheduler.lock().is_some()
    }

    fn with_scheduler<R>(
        &self,
        f: impl FnOnce(&mut Scheduler<A::Handle>) -> Result<R, SchedError>,
    ) -> Result<R, SchedError> {
        let mut scheduler = self.scheduler.lock();
        let scheduler = scheduler.as_mut().ok_or(SchedError::NotInitialized)?;
        f(scheduler)
    }

    pub fn create_thread(
        &self,
        entry: ThreadEntry,
        arg: usize,
        owner: ThreadId,
    ) -> Result<ThreadId, SchedError> {
        self.with_scheduler(|s| s.create(&self.spaces, entry, arg, owner))
            .inspect_err(|err| log::warn!("create_thread: {}", err))
    }

    pub fn current_thread(&self) -> Option<ThreadId> {
        self.scheduler.lock().as_ref().map(Scheduler::current)
    }

    /// Block the calling thread. It keeps running until the next tick and
    /// is then skipped until unblocked.
    pub fn block(&self) -> Result<(), SchedError> {
        self.with_scheduler(|s| s.block(s.current()))
            .inspect_err(|err| log::warn!("block: {}", err))
    }

    pub fn block_thread(&self, id: ThreadId) -> Result<(), SchedError> {
        self.with_scheduler(|s| s.block(id))
            .inspect_err(|err| log::warn!("block {}: {}", id, err))
    }

    pub fn unblock(&self, id: ThreadId) -> Result<(), SchedError> {
        self.with_scheduler(|s| s.unblock(id))
            .inspect_err(|err| log::warn!("unblock {}: {}", id, err))
    }

    /// Kill the calling thread. It keeps running until the next tick,
    /// which never comes back to it.
    pub fn exit(&self) -> Result<(), SchedError> {
        self.with_scheduler(|s| s.exit(s.current()))
            .inspect_err(|err| log::warn!("exit: {}", err))
    }

    pub fn exit_thread(&self, id: ThreadId) -> Result<(), SchedError> {
        self.with_scheduler(|s| s.exit(id))
            .inspect_err(|err| log::warn!("exit {}: {}", id, err))
    }

    // ── Per-thread error code ───────────────────────────────────

    /// Store `code` for the current thread, or in the per-CPU slot before
    /// the scheduler exists.
    pub fn set_errno(&self, code: i32) {
        match self.scheduler.lock().as_mut() {
            Some(s) => s.set_errno(code),
            None => self.cpu_errno.store(code, Ordering::Relaxed),
        }
    }

    pub fn errno(&self) -> i32 {
        match self.scheduler.lock().as_ref() {
            Some(s) => s.errno(),
            None => self.cpu_errno.load(Ordering::Relaxed),
        }
    }

    // ── Introspection ───────────────────────────────────────────

    pub fn thread_info(&self, id: ThreadId) -> Option<ThreadInfo> {
        self.scheduler.lock().as_ref().and_then(|s| s.info(id))
    }

    /// Ring order starting at the current thread; empty before init.
    pub fn threads(&self) -> Vec<ThreadId> {
        self.scheduler
            .lock()
            .as_ref()
            .map(Scheduler::threads)
            .unwrap_or_default()
    }

    pub fn stats(&self) -> SchedStats {
        self.scheduler
            .lock()
            .as_ref()
            .map(Scheduler::stats)
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::TrapFrame;
    use crate::sched::{ReapScope, ThreadState};
    use crate::testing::{
        MockChip, TestContext, capture_logs, context, context_with, idle_entry, warnings,
    };

    fn tick(ctx: &TestContext) -> ThreadId {
        let mut frame = TrapFrame { vector: 32, ..TrapFrame::default() };
        ctx.dispatch(&mut frame);
        ctx.current_thread().unwrap()
    }

    fn spawn(ctx: &TestContext, owner: ThreadId) -> ThreadId {
        ctx.create_thread(idle_entry, 0, owner).unwrap()
    }

    #[test]
    fn lifecycle_flags() {
        let (ctx, _) = context();
        assert!(!ctx.trap_table_ready());
        assert!(!ctx.scheduler_ready());
        ctx.activate();
        ctx.init_scheduler();
        assert!(ctx.trap_table_ready());
        assert!(ctx.scheduler_ready());
        assert_eq!(ctx.current_thread(), Some(ThreadId::ANCHOR));
    }

    #[test]
    fn requests_before_init_fail() {
        let (ctx, _) = context();
        assert_eq!(
            ctx.create_thread(idle_entry, 0, ThreadId::ANCHOR),
            Err(SchedError::NotInitialized)
        );
        assert_eq!(ctx.block(), Err(SchedError::NotInitialized));
        assert_eq!(ctx.unblock(ThreadId(1)), Err(SchedError::NotInitialized));
        assert_eq!(ctx.exit(), Err(SchedError::NotInitialized));
        assert!(ctx.threads().is_empty());
        assert_eq!(ctx.current_thread(), None);
    }

    #[test]
    fn second_init_only_warns() {
        let (ctx, _) = context();
        capture_logs();
        ctx.init_scheduler();
        let a = spawn(ctx, ThreadId::ANCHOR);
        ctx.init_scheduler();
        assert!(ctx.thread_info(a).is_some());
        assert_eq!(warnings(), ["scheduler has already been initialised"]);
    }

    #[test]
    fn double_activation_is_idempotent() {
        let (ctx, _) = context();
        capture_logs();
        ctx.activate();
        let gate_before = ctx.table.gate(0).entry();
        ctx.activate();

        assert_eq!(ctx.platform().loads().len(), 1);
        assert!(crate::irq::are_enabled());
        assert_eq!(ctx.table.gate(0).entry(), gate_before);
        assert_eq!(warnings(), ["vector table already initialised; not reloading"]);
    }

    #[test]
    fn ring_order_follows_creators() {
        // A (the anchor) creates B then C.
        let (ctx, _) = context();
        ctx.init_scheduler();
        let a = ThreadId::ANCHOR;
        let b = spawn(ctx, a);
        let c = spawn(ctx, a);
        assert_eq!(ctx.threads(), [a, c, b]);

        let mut visited = Vec::new();
        for _ in 0..6 {
            visited.push(tick(ctx));
        }
        assert_eq!(visited, [c, b, a, c, b, a]);
    }

    #[test]
    fn exited_thread_is_passed_over_then_reaped() {
        let (ctx, _) = context();
        ctx.init_scheduler();
        let a = ThreadId::ANCHOR;
        let b = spawn(ctx, a);
        let c = spawn(ctx, a); // A → C → B
        assert_eq!(tick(ctx), c);
        assert_eq!(tick(ctx), b);

        // B is RUNNING and calls exit().
        ctx.exit().unwrap();
        assert_eq!(ctx.thread_info(b).unwrap().state, ThreadState::Killed);
        assert_eq!(tick(ctx), a, "next tick goes to B's successor");
        assert!(ctx.thread_info(b).is_some(), "not reaped while unreachable");

        assert_eq!(tick(ctx), c);
        assert!(ctx.thread_info(b).is_some());
        assert_eq!(tick(ctx), a);
        assert!(ctx.thread_info(b).is_none(), "reaped when the cursor leaves C");
        assert_eq!(ctx.threads(), [a, c]);
        assert_eq!(ctx.spaces().released().len(), 1);
        assert_eq!(ctx.stats().reaped, 1);
    }

    #[test]
    fn exiting_current_does_not_save_its_frame() {
        let (ctx, _) = context();
        ctx.init_scheduler();
        let b = spawn(ctx, ThreadId::ANCHOR);
        assert_eq!(tick(ctx), b);
        let before = ctx.scheduler.lock().as_ref().unwrap().ring().get(b).unwrap().frame;

        ctx.exit().unwrap();
        let mut frame = TrapFrame { vector: 32, rax: 0x55, ..TrapFrame::default() };
        ctx.dispatch(&mut frame);

        let after = ctx.scheduler.lock().as_ref().unwrap().ring().get(b).map(|t| t.frame);
        assert_eq!(after, Some(before));
    }

    #[test]
    fn blocked_thread_is_never_picked() {
        let (ctx, _) = context();
        ctx.init_scheduler();
        let a = ThreadId::ANCHOR;
        let b = spawn(ctx, a);
        let c = spawn(ctx, a); // A → C → B
        ctx.block_thread(b).unwrap();

        for _ in 0..9 {
            assert_ne!(tick(ctx), b);
        }
        assert_eq!(ctx.thread_info(b).unwrap().state, ThreadState::Blocked);

        ctx.unblock(b).unwrap();
        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.push(tick(ctx));
        }
        assert!(seen.contains(&b));
        assert!(seen.contains(&c));
    }

    #[test]
    fn blocking_current_takes_effect_at_next_tick() {
        let (ctx, _) = context();
        ctx.init_scheduler();
        let b = spawn(ctx, ThreadId::ANCHOR);
        assert_eq!(tick(ctx), b);
        ctx.block().unwrap();
        assert_eq!(ctx.current_thread(), Some(b));
        assert_eq!(tick(ctx), ThreadId::ANCHOR);
        assert_eq!(tick(ctx), ThreadId::ANCHOR);
        assert_eq!(ctx.thread_info(b).unwrap().state, ThreadState::Blocked);
    }

    #[test]
    fn anchor_misuse_is_rejected_with_warning() {
        let (ctx, _) = context();
        ctx.init_scheduler();
        capture_logs();
        assert_eq!(ctx.block(), Err(SchedError::AnchorThread));
        assert_eq!(ctx.exit(), Err(SchedError::AnchorThread));
        assert_eq!(warnings().len(), 2);
        assert_eq!(tick(ctx), ThreadId::ANCHOR);
    }

    #[test]
    fn killed_threads_are_released_exactly_once() {
        let (ctx, _) = context();
        ctx.init_scheduler();
        let threads: Vec<_> = (0..6).map(|_| spawn(ctx, ThreadId::ANCHOR)).collect();
        for &id in &threads[1..4] {
            ctx.exit_thread(id).unwrap();
        }
        for _ in 0..20 {
            tick(ctx);
        }
        let mut released = ctx.spaces().released();
        assert_eq!(released.len(), 3);
        released.sort_unstable();
        released.dedup();
        assert_eq!(released.len(), 3);
        assert_eq!(ctx.stats().live(), 4);
        assert_eq!(ctx.threads().len(), 4);
    }

    #[test]
    fn ring_scope_reaps_everything_in_one_tick() {
        let config = Config { reap: ReapScope::Ring, ..Config::default() };
        let (ctx, _) = context_with(config);
        ctx.init_scheduler();
        let a = ThreadId::ANCHOR;
        let b = spawn(ctx, a);
        let c = spawn(ctx, a);
        let d = spawn(ctx, a); // A → D → C → B
        ctx.exit_thread(b).unwrap();
        ctx.exit_thread(c).unwrap();
        assert_eq!(tick(ctx), d);
        assert_eq!(ctx.threads(), [d, a]);
    }

    #[test]
    fn errno_falls_back_to_cpu_slot() {
        let (ctx, _) = context();
        ctx.set_errno(9);
        assert_eq!(ctx.errno(), 9);
        ctx.init_scheduler();
        assert_eq!(ctx.errno(), 0);
        ctx.set_errno(4);
        assert_eq!(ctx.thread_info(ThreadId::ANCHOR).unwrap().last_error, 4);
    }

    #[test]
    fn redirection_needs_advanced_controller() {
        let (ctx, legacy) = context();
        fn nop(_: &mut TrapFrame) {}

        ctx.register_interrupt_handler(33, nop);
        assert!(legacy.redirects().is_empty());

        let apic = MockChip::leak();
        ctx.set_advanced_controller(apic);
        ctx.register_interrupt_handler(33, nop);
        ctx.register_interrupt_handler(47, nop);
        ctx.register_interrupt_handler(48, nop);
        assert_eq!(apic.redirects(), [(1, 33), (15, 47)]);
        assert!(ctx.has_advanced_controller());
    }

    #[test]
    fn exception_and_timer_vectors_are_not_registrable() {
        let (ctx, _) = context();
        fn nop(_: &mut TrapFrame) {}
        capture_logs();
        ctx.register_interrupt_handler(14, nop);
        ctx.register_interrupt_handler(32, nop);
        assert!(ctx.handlers.get(14).is_none());
        assert!(ctx.handlers.get(32).is_none());
        assert_eq!(warnings().len(), 2);
    }

    /// Random create/block/unblock/exit/tick sequences keep the ring
    /// circular and the live count equal to creations minus reaps.
    #[test]
    fn random_operations_preserve_ring_invariants() {
        for seed in [0x9e37_79b9_u64, 0xdead_beef, 12345, 0xffff_0000_1111] {
            let (ctx, _) = context();
            ctx.init_scheduler();
            let mut rng = XorShift(seed);

            for _ in 0..400 {
                let live = ctx.threads();
                let pick = live[rng.below(live.len())];
                match rng.below(6) {
                    0 | 1 => {
                        let _ = ctx.create_thread(idle_entry, 0, pick);
                    }
                    2 => {
                        let _ = ctx.block_thread(pick);
                    }
                    3 => {
                        let _ = ctx.unblock(pick);
                    }
                    4 => {
                        let _ = ctx.exit_thread(pick);
                    }
                    _ => {
                        let previous = ctx.current_thread().unwrap();
                        let next = tick(ctx);
                        let state = ctx.thread_info(next).unwrap().state;
                        assert_eq!(state, ThreadState::Running);
                        if next != previous {
                            assert_ne!(
                                ctx.thread_info(previous).map(|t| t.state),
                                Some(ThreadState::Running)
                            );
                        }
                    }
                }

                let stats = ctx.stats();
                let guard = ctx.scheduler.lock();
                let sched = guard.as_ref().unwrap();
                assert!(sched.ring().is_circular(sched.current()));
                assert_eq!(sched.ring().len() as u64, stats.live());
                assert!(sched.ring().contains(ThreadId::ANCHOR));
                drop(guard);
                assert_eq!(ctx.spaces().released().len() as u64, stats.reaped);
            }
        }
    }

    struct XorShift(u64);

    impl XorShift {
        fn below(&mut self, n: usize) -> usize {
            self.0 ^= self.0 << 13;
            self.0 ^= self.0 >> 7;
            self.0 ^= self.0 << 17;
            (self.0 % n as u64) as usize
        }
    }
}
