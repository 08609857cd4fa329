//! Collaborator interfaces used by the SMP core.
//!
//! The core never touches hardware directly. The kernel supplies the x86
//! implementations in `crate::arch`; the host test crate supplies mocks.

use super::ap_entry::ApContext;
use super::error::ApSetupError;
use super::topology::{ApicHandle, BusRecord, CpuRecord, RoutingEntry};

/// Error status register offset.
pub const APIC_REG_ESR: u32 = 0x280;
/// Bits of the error status register that count as a delivery error.
pub const APIC_ESR_MASK: u32 = 0xEF;

/// Local interrupt controller of the calling processor.
pub trait LocalApic: Sync {
    /// APIC id of the calling processor.
    fn id(&self) -> u32;
    fn read(&self, reg: u32) -> u32;
    fn write(&self, reg: u32, value: u32);
    /// Highest LVT entry index (from the version register).
    fn max_lvt(&self) -> u32;
    /// Assert a level-triggered INIT at `dest`.
    fn send_init(&self, dest: u32);
    /// Deassert INIT at `dest`.
    fn deassert_init(&self, dest: u32);
    /// Send a STARTUP IPI; the target starts at `page << 12`.
    fn send_startup(&self, dest: u32, page: u8);
    /// Fixed delivery of `vector` to `dest`.
    fn send_ipi(&self, dest: u32, vector: u8);
    /// Spin until the ICR delivery bit clears. Returns the final
    /// delivery status, zero on success.
    fn wait_for_send(&self) -> u32;
    fn eoi(&self);
}

/// Processor-local operations.
pub trait CpuOps: Sync {
    /// Logical id of the calling processor.
    fn current_cpu(&self) -> u32;
    fn interrupts_enabled(&self) -> bool;
    fn disable_interrupts(&self);
    fn enable_interrupts(&self);
    fn udelay(&self, us: u64);
}

/// Run `f` with local interrupts disabled, then restore the prior state.
pub fn without_interrupts<C, R>(cpu: &C, f: impl FnOnce() -> R) -> R
where
    C: CpuOps + ?Sized,
{
    let was_enabled = cpu.interrupts_enabled();
    if was_enabled {
        cpu.disable_interrupts();
    }
    let ret = f();
    if was_enabled {
        cpu.enable_interrupts();
    }
    ret
}

/// Access to physical memory below 1 MiB.
pub trait PhysMemory {
    /// Borrow `len` bytes at `phys`, or `None` if the range is unbacked.
    fn read(&self, phys: u64, len: usize) -> Option<&[u8]>;
    fn write(&mut self, phys: u64, bytes: &[u8]);
}

/// Receives routing metadata the parser does not keep itself.
pub trait RoutingRegistrar {
    fn add_bus(&mut self, bus: &BusRecord);
    fn add_route(&mut self, route: &RoutingEntry);
}

/// Per-core setup steps a secondary runs from the entry sequence.
pub trait ApHooks: Sync + Sized + 'static {
    /// Load the shared GDT and IDT.
    fn load_tables(&self);
    /// Make `core` reachable as "this processor" from now on.
    fn set_percpu(&self, core: &'static CpuRecord);
    fn init_apic(&self, core: &CpuRecord) -> Result<ApicHandle, ApSetupError>;
    /// Measured core clock in kHz.
    fn measure_khz(&self) -> u64;
    fn init_scheduler(&self, core: &CpuRecord) -> Result<(), ApSetupError>;
    /// Allocate the permanent stack. Returns its top.
    fn alloc_stack(&self, core: &CpuRecord) -> Result<u64, ApSetupError>;
    /// Move onto `stack_top` and call `next(ctx)` there. Nothing on the
    /// current stack is touched afterward.
    fn switch_stack(&self, stack_top: u64, ctx: ApContext<Self>, next: fn(ApContext<Self>) -> !) -> !;
    fn init_fpu(&self);
    fn discover_topology(&self, core: &CpuRecord);
    fn enable_interrupts(&self);
    fn idle(&self) -> !;
}
