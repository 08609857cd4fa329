//! Kernel-wide SMP handle.
//!
//! The topology is parsed once on the BSP and published through a
//! `spin::Once`. Everything after that (AP entry, the xcall handler, the
//! public calls below) reads it through [`get`].

use spin::Once;
use x86_64::registers::control::Cr3;

use crate::arch::interrupts::enable_xcall_dispatch;
use crate::arch::lapic::{self, XApic};
use crate::arch::percpu;
use crate::arch::platform::{self, LowMemory, X86Cpu};
use crate::arch::trampoline;
use crate::smp::{self, ApLaunch, SystemInfo, XcallError, XcallFn};

static SYSTEM: Once<SystemInfo> = Once::new();

pub fn get() -> Option<&'static SystemInfo> {
    SYSTEM.get()
}

/// Number of processors in the topology, 1 before it is parsed.
pub fn num_cpus() -> usize {
    get().map_or(1, |sys| sys.num_cpus())
}

/// Find and parse the MP table. Any failure halts the boot.
pub fn early_init() -> &'static SystemInfo {
    let mut routes = crate::irq::ROUTES.lock();
    let (sys, report) = match smp::early_init(&LowMemory, &mut *routes) {
        Ok(found) => found,
        Err(err) => crate::kpanic!("SMP: {}", err.as_str()),
    };
    crate::kinfo!(
        "SMP: topology: {} CPUs, {} I/O APICs, {} buses, {} routing entries{}",
        sys.num_cpus(),
        sys.num_ioapics(),
        sys.buses().len(),
        routes.routes().len(),
        if report.checksum_ok && report.signature_ok {
            ""
        } else {
            " (table failed validation)"
        }
    );
    if let Some((ioapic, pin)) = routes.isa_pin(0) {
        crate::kdebug!("SMP: ISA IRQ0 -> IOAPIC {} pin {}", ioapic, pin);
    }
    SYSTEM.call_once(|| sys)
}

/// BSP half of per-core setup: local APIC, per-core pointer, xcall queue.
pub fn init_bsp(sys: &'static SystemInfo) {
    let Some(bsp) = sys.bsp() else {
        crate::kpanic!("SMP: topology has no processors");
    };
    percpu::set_current(bsp);
    bsp.attach_apic(lapic::init(sys.lapic_base() as u64));
    bsp.set_khz(crate::logger::tsc_frequency_hz() / 1000);
    if let Err(err) = platform::sched_init_core(bsp) {
        crate::kpanic!("SMP: BSP scheduler setup failed: {}", err.as_str());
    }
    setup_xcall_bsp(sys);
    crate::kinfo!(
        "SMP: BSP is core {} (APIC ID {}), {} MHz",
        bsp.id,
        bsp.dest_apic_id(),
        bsp.khz() / 1000
    );
}

/// Create the BSP's xcall queue and enable the xcall vector.
pub fn setup_xcall_bsp(sys: &SystemInfo) {
    if smp::setup_xcall_bsp(sys).is_some() {
        enable_xcall_dispatch();
    }
}

/// Wake every secondary. Returns once all cores are up.
pub fn bringup(sys: &'static SystemInfo) {
    let entry: extern "C" fn(&'static smp::CpuRecord) -> ! = platform::ap_start;
    let launch = ApLaunch {
        trampoline: trampoline::image(),
        page_table_root: Cr3::read().0.start_address().as_u64(),
        entry: entry as usize as u64,
    };
    let mut mem = LowMemory;
    match smp::bringup_aps(sys, &XApic, &X86Cpu, &mut mem, &launch) {
        Ok(status) if status.is_ok() => {
            crate::kinfo!(
                "SMP: {} cores online (sched mask {:#x}, heap free {} KiB)",
                sys.num_cpus(),
                platform::sched_ready_mask(),
                crate::allocator::free_bytes() / 1024
            );
        }
        Ok(status) => {
            crate::kwarn!(
                "SMP: bring-up degraded: {} cores reported delivery errors (status {:#x})",
                status.failed,
                status.code()
            );
        }
        Err(err) => crate::kpanic!("SMP: bring-up failed: {}", err.as_str()),
    }
}

/// Run `func(arg)` on processor `target`, optionally waiting for it.
pub fn xcall(target: u32, func: XcallFn, arg: usize, wait: bool) -> Result<(), XcallError> {
    let Some(sys) = get() else {
        return Err(XcallError::InvalidTarget(target));
    };
    smp::xcall(sys, &X86Cpu, &XApic, target, func, arg, wait)
}
