//! Per-core setup hooks that log instead of touching hardware.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::thread::{self, JoinHandle};

use super::cpu::MockCpu;
use crate::smp::{ap_entry, ap_finish, ApContext, ApHooks, ApSetupError, ApicHandle, CpuRecord, SystemInfo};

/// Frequency every mock core reports.
pub const MOCK_KHZ: u64 = 2_400_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    LoadTables,
    SetPercpu,
    InitApic,
    InitScheduler,
    AllocStack,
    SwitchStack(u64),
    InitFpu,
    DiscoverTopology,
    EnableInterrupts,
    Idle,
}

#[derive(Default)]
pub struct MockHooks {
    log: Mutex<Vec<(u32, Step)>>,
    fail_apic: AtomicBool,
    fail_stack: AtomicBool,
}

impl MockHooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Leaked, as `ApContext` wants `&'static` hooks.
    pub fn leaked() -> &'static Self {
        Box::leak(Box::new(Self::new()))
    }

    pub fn fail_apic(&self) {
        self.fail_apic.store(true, Ordering::SeqCst);
    }

    pub fn fail_stack(&self) {
        self.fail_stack.store(true, Ordering::SeqCst);
    }

    /// Steps core `id` went through, in order.
    pub fn steps(&self, id: u32) -> Vec<Step> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|(core, _)| *core == id)
            .map(|(_, step)| *step)
            .collect()
    }

    pub fn context(&'static self, sys: &'static SystemInfo, id: u32) -> ApContext<Self> {
        ApContext {
            sys,
            core: sys.cpu(id).expect("core exists"),
            hooks: self,
        }
    }

    fn record(&self, step: Step) {
        self.log.lock().unwrap().push((MockCpu::current(), step));
    }

    fn record_for(&self, core: &CpuRecord, step: Step) {
        self.log.lock().unwrap().push((core.id, step));
    }
}

/// Top of the runtime stack a mock core switches to.
pub fn stack_top_for(core: &CpuRecord) -> u64 {
    0x4000_0000 + (core.id as u64 + 1) * 0x1_0000
}

impl ApHooks for MockHooks {
    fn load_tables(&self) {
        self.record(Step::LoadTables);
    }

    fn set_percpu(&self, core: &'static CpuRecord) {
        MockCpu::set_current(core.id);
        self.record_for(core, Step::SetPercpu);
    }

    fn init_apic(&self, core: &CpuRecord) -> Result<ApicHandle, ApSetupError> {
        self.record_for(core, Step::InitApic);
        if self.fail_apic.load(Ordering::SeqCst) {
            return Err(ApSetupError::LocalApic);
        }
        Ok(ApicHandle {
            id: core.lapic_id,
            version: core.lapic_version as u32,
        })
    }

    fn measure_khz(&self) -> u64 {
        MOCK_KHZ
    }

    fn init_scheduler(&self, core: &CpuRecord) -> Result<(), ApSetupError> {
        self.record_for(core, Step::InitScheduler);
        Ok(())
    }

    fn alloc_stack(&self, core: &CpuRecord) -> Result<u64, ApSetupError> {
        self.record_for(core, Step::AllocStack);
        if self.fail_stack.load(Ordering::SeqCst) {
            return Err(ApSetupError::Stack);
        }
        Ok(stack_top_for(core))
    }

    fn switch_stack(&self, stack_top: u64, ctx: ApContext<Self>, next: fn(ApContext<Self>) -> !) -> ! {
        self.record_for(ctx.core, Step::SwitchStack(stack_top));
        next(ctx)
    }

    fn init_fpu(&self) {
        self.record(Step::InitFpu);
    }

    fn discover_topology(&self, core: &CpuRecord) {
        self.record_for(core, Step::DiscoverTopology);
    }

    fn enable_interrupts(&self) {
        MockCpu::set_irqs(true);
        self.record(Step::EnableInterrupts);
    }

    fn idle(&self) -> ! {
        self.record(Step::Idle);
        loop {
            std::thread::park();
        }
    }
}

/// Run core `id` through the whole entry sequence on its own thread, as
/// if the trampoline had just called in. The thread idles forever after.
pub fn spawn_ap(sys: &'static SystemInfo, hooks: &'static MockHooks, id: u32) -> JoinHandle<()> {
    thread::spawn(move || {
        MockCpu::set_current(id);
        ap_entry(hooks.context(sys, id));
    })
}

/// Run only the post-switch half for core `id`. Joinable.
pub fn spawn_finish(sys: &'static SystemInfo, hooks: &'static MockHooks, id: u32) -> JoinHandle<()> {
    thread::spawn(move || {
        MockCpu::set_current(id);
        ap_finish(&hooks.context(sys, id));
    })
}
