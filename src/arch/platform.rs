//! x86_64 implementations of the SMP collaborator traits.

use alloc::vec::Vec;
use core::arch::asm;
use core::slice;
use core::sync::atomic::{AtomicU64, Ordering};

use x86_64::instructions::interrupts;
use x86_64::registers::control::{Cr0, Cr0Flags, Cr4, Cr4Flags};

use crate::arch::{gdt, interrupts as idt, lapic, percpu};
use crate::config::AP_STACK_SIZE;
use crate::smp::{ApContext, ApHooks, ApSetupError, ApicHandle, CpuOps, CpuRecord, PhysMemory};

/// Highest physical address covered by the boot identity map.
const IDENTITY_MAPPED_END: u64 = 4 << 30;

/// Processor-local operations on the calling core.
#[derive(Clone, Copy, Default)]
pub struct X86Cpu;

impl CpuOps for X86Cpu {
    fn current_cpu(&self) -> u32 {
        percpu::current_cpu_id()
    }

    fn interrupts_enabled(&self) -> bool {
        interrupts::are_enabled()
    }

    fn disable_interrupts(&self) {
        interrupts::disable();
    }

    fn enable_interrupts(&self) {
        interrupts::enable();
    }

    fn udelay(&self, us: u64) {
        udelay(us);
    }
}

/// Spin for `us` microseconds on the TSC.
pub fn udelay(us: u64) {
    let ticks = crate::logger::tsc_frequency_hz() / 1_000_000 * us;
    let start = crate::logger::read_tsc();
    while crate::logger::read_tsc().wrapping_sub(start) < ticks {
        core::hint::spin_loop();
    }
}

/// Identity-mapped physical memory.
pub struct LowMemory;

impl PhysMemory for LowMemory {
    fn read(&self, phys: u64, len: usize) -> Option<&[u8]> {
        let end = phys.checked_add(len as u64)?;
        if phys == 0 || end > IDENTITY_MAPPED_END {
            return None;
        }
        // SAFETY: the range is inside the boot identity map.
        Some(unsafe { slice::from_raw_parts(phys as *const u8, len) })
    }

    fn write(&mut self, phys: u64, bytes: &[u8]) {
        let in_map = phys
            .checked_add(bytes.len() as u64)
            .map_or(false, |end| phys != 0 && end <= IDENTITY_MAPPED_END);
        if !in_map {
            crate::kerror!("Low memory write outside identity map at {:#x}", phys);
            return;
        }
        // SAFETY: the range is inside the boot identity map and only
        // reserved low-memory pages are written.
        unsafe {
            core::ptr::copy_nonoverlapping(bytes.as_ptr(), phys as *mut u8, bytes.len());
        }
    }
}

/// Cores that have finished scheduler setup, one bit per logical id.
static SCHED_READY: AtomicU64 = AtomicU64::new(0);

pub fn sched_ready_mask() -> u64 {
    SCHED_READY.load(Ordering::Acquire)
}

/// Mark `core` as a scheduling participant.
pub fn sched_init_core(core: &CpuRecord) -> Result<(), ApSetupError> {
    if core.id >= u64::BITS {
        return Err(ApSetupError::Scheduler);
    }
    SCHED_READY.fetch_or(1 << core.id, Ordering::AcqRel);
    Ok(())
}

pub fn enable_floating_point_unit() {
    unsafe {
        let mut cr0 = Cr0::read();
        cr0.remove(Cr0Flags::EMULATE_COPROCESSOR | Cr0Flags::TASK_SWITCHED);
        cr0.insert(Cr0Flags::MONITOR_COPROCESSOR | Cr0Flags::NUMERIC_ERROR);
        Cr0::write(cr0);

        let mut cr4 = Cr4::read();
        cr4.insert(Cr4Flags::OSFXSR | Cr4Flags::OSXMMEXCPT_ENABLE);
        Cr4::write(cr4);

        asm!("fninit", options(nomem, nostack));
    }
}

/// Log cache and thread topology from CPUID leaf 4.
pub fn discover_topology(core: &CpuRecord) {
    use core::arch::x86_64::{__cpuid, __cpuid_count};

    let max_leaf = unsafe { __cpuid(0).eax };
    if max_leaf < 4 {
        return;
    }
    for index in 0..8 {
        let leaf = unsafe { __cpuid_count(4, index) };
        let kind = leaf.eax & 0x1F;
        if kind == 0 {
            break;
        }
        let level = (leaf.eax >> 5) & 0x7;
        let ways = ((leaf.ebx >> 22) & 0x3FF) + 1;
        let partitions = ((leaf.ebx >> 12) & 0x3FF) + 1;
        let line = (leaf.ebx & 0xFFF) + 1;
        let sets = leaf.ecx + 1;
        let size_kib = ways * partitions * line * sets / 1024;
        crate::kdebug!(
            "SMP: core {} L{} {} cache {} KiB",
            core.id,
            level,
            match kind {
                1 => "data",
                2 => "instruction",
                _ => "unified",
            },
            size_kib
        );
    }
}

/// Park the calling core forever with interrupts off.
pub fn halt_loop() -> ! {
    loop {
        interrupts::disable();
        x86_64::instructions::hlt();
    }
}

/// Idle with interrupts on, so xcalls are still serviced.
pub fn idle_loop() -> ! {
    loop {
        interrupts::enable_and_hlt();
    }
}

/// Per-core hooks run by the AP entry sequence.
pub struct X86ApHooks;

pub static AP_HOOKS: X86ApHooks = X86ApHooks;

impl ApHooks for X86ApHooks {
    fn load_tables(&self) {
        gdt::load();
        idt::load();
    }

    fn set_percpu(&self, core: &'static CpuRecord) {
        percpu::set_current(core);
    }

    fn init_apic(&self, _core: &CpuRecord) -> Result<ApicHandle, ApSetupError> {
        lapic::init_ap().ok_or(ApSetupError::LocalApic)
    }

    fn measure_khz(&self) -> u64 {
        crate::logger::tsc_frequency_hz() / 1000
    }

    fn init_scheduler(&self, core: &CpuRecord) -> Result<(), ApSetupError> {
        sched_init_core(core)
    }

    fn alloc_stack(&self, _core: &CpuRecord) -> Result<u64, ApSetupError> {
        let mut stack: Vec<u8> = Vec::new();
        stack
            .try_reserve_exact(AP_STACK_SIZE)
            .map_err(|_| ApSetupError::Stack)?;
        stack.resize(AP_STACK_SIZE, 0);
        let base = stack.leak().as_mut_ptr() as u64;
        Ok((base + AP_STACK_SIZE as u64) & !0xF)
    }

    fn switch_stack(
        &self,
        stack_top: u64,
        ctx: ApContext<Self>,
        next: fn(ApContext<Self>) -> !,
    ) -> ! {
        // The context is copied to the top of the new stack so nothing on
        // the boot stack is needed after the switch.
        let slot = (stack_top - core::mem::size_of::<ApContext<Self>>() as u64) & !0xF;
        unsafe {
            (slot as *mut ApContext<Self>).write(ctx);
            asm!(
                "mov rsp, {slot}",
                "xor rbp, rbp",
                "call {resume}",
                "ud2",
                slot = in(reg) slot,
                resume = sym resume_on_new_stack,
                in("rdi") slot,
                in("rsi") next as usize,
                options(noreturn)
            );
        }
    }

    fn init_fpu(&self) {
        enable_floating_point_unit();
    }

    fn discover_topology(&self, core: &CpuRecord) {
        discover_topology(core);
    }

    fn enable_interrupts(&self) {
        interrupts::enable();
    }

    fn idle(&self) -> ! {
        idle_loop()
    }
}

extern "C" fn resume_on_new_stack(ctx: *const ApContext<X86ApHooks>, next: usize) -> ! {
    // SAFETY: switch_stack wrote a valid context here and passed the
    // address of a `fn(ApContext<X86ApHooks>) -> !` in `next`.
    let (ctx, next) = unsafe {
        (
            ctx.read(),
            core::mem::transmute::<usize, fn(ApContext<X86ApHooks>) -> !>(next),
        )
    };
    next(ctx)
}

/// Called by the trampoline with the address of this core's record.
pub extern "C" fn ap_start(core: &'static CpuRecord) -> ! {
    let Some(sys) = crate::system::get() else {
        halt_loop()
    };
    crate::smp::ap_entry(ApContext {
        sys,
        core,
        hooks: &AP_HOOKS,
    })
}
