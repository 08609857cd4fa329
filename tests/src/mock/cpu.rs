//! Processor-local state for whichever thread is playing a core.
//!
//! Each test thread has its own "current core" id and interrupt flag, so
//! a thread spawned for core 1 sees itself as core 1 while the test body
//! keeps running as the BSP.

use std::cell::Cell;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::smp::CpuOps;

thread_local! {
    static CURRENT: Cell<u32> = Cell::new(0);
    static IRQ_ON: Cell<bool> = Cell::new(false);
}

#[derive(Default)]
pub struct MockCpu {
    delayed_us: AtomicU64,
}

impl MockCpu {
    pub fn new() -> Self {
        Self::default()
    }

    /// Core the calling thread is playing.
    pub fn current() -> u32 {
        CURRENT.with(|c| c.get())
    }

    /// Make the calling thread core `id`.
    pub fn set_current(id: u32) {
        CURRENT.with(|c| c.set(id));
    }

    pub fn irqs_on() -> bool {
        IRQ_ON.with(|f| f.get())
    }

    pub fn set_irqs(on: bool) {
        IRQ_ON.with(|f| f.set(on));
    }

    /// Sum of every `udelay` so far.
    pub fn delayed_us(&self) -> u64 {
        self.delayed_us.load(Ordering::SeqCst)
    }
}

impl CpuOps for MockCpu {
    fn current_cpu(&self) -> u32 {
        Self::current()
    }

    fn interrupts_enabled(&self) -> bool {
        Self::irqs_on()
    }

    fn disable_interrupts(&self) {
        Self::set_irqs(false);
    }

    fn enable_interrupts(&self) {
        Self::set_irqs(true);
    }

    fn udelay(&self, us: u64) {
        self.delayed_us.fetch_add(us, Ordering::SeqCst);
    }
}
