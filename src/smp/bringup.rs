//! Secondary processor bring-up
//!
//! The BSP copies the trampoline to [`AP_TRAMPOLINE_ADDR`] once, then for
//! every other processor in table order fills the AP info area and runs
//! INIT, STARTUP (retried once on failure) and waits for the target to set
//! its booted flag. Only one AP is ever between wake-up and its booted
//! handshake, which is what lets all of them share the info area and the
//! boot stack.

use core::sync::atomic::{fence, Ordering};

use super::error::BringupError;
use super::hal::{CpuOps, LocalApic, PhysMemory, APIC_ESR_MASK, APIC_REG_ESR};
use super::layout::{trampoline_vector, ApInitArea, AP_INFO_AREA, AP_TRAMPOLINE_ADDR, AP_TRAMPOLINE_MAX_SIZE};
use super::topology::{CpuRecord, CpuStatus, SystemInfo};
use super::wait;

/// How long INIT stays asserted.
pub const INIT_ASSERT_US: u64 = 10_000;
/// Delay between STARTUP and the delivery status check.
pub const STARTUP_SETTLE_US: u64 = 300;
/// Delay between the delivery status check and reading the ESR.
pub const STARTUP_ESR_DELAY_US: u64 = 200;
pub const STARTUP_ATTEMPTS: u32 = 2;

/// Machine-specific inputs to bring-up.
#[derive(Clone, Copy)]
pub struct ApLaunch<'a> {
    /// Real-mode trampoline image.
    pub trampoline: &'a [u8],
    /// Page-table root the APs load (the BSP's CR3).
    pub page_table_root: u64,
    /// Address of the AP entry point called by the trampoline.
    pub entry: u64,
}

/// Outcome of waking one processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WakeResult {
    /// Delivery status of the last STARTUP, zero on success.
    pub delivery: u32,
    /// Masked ESR after the last STARTUP.
    pub esr: u32,
    pub attempts: u32,
}

impl WakeResult {
    pub const fn is_ok(&self) -> bool {
        self.delivery == 0 && self.esr == 0
    }
}

/// Aggregate over all woken processors. Nonzero fields mean at least one
/// target reported a delivery problem but bring-up still completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BringupStatus {
    /// Processors whose last STARTUP reported a problem.
    pub failed: u32,
    /// OR of all final delivery statuses.
    pub delivery: u32,
    /// OR of all final masked ESR values.
    pub esr: u32,
}

impl BringupStatus {
    pub const fn is_ok(&self) -> bool {
        self.failed == 0
    }

    /// Single status word, zero on success.
    pub const fn code(&self) -> u32 {
        self.delivery | self.esr
    }

    fn record(&mut self, result: &WakeResult) {
        if !result.is_ok() {
            self.failed += 1;
        }
        self.delivery |= result.delivery;
        self.esr |= result.esr;
    }
}

fn clear_esr<A>(apic: &A, maxlvt: u32) -> u32
where
    A: LocalApic + ?Sized,
{
    // ESR is write-before-read on APICs with more than 3 LVT entries.
    if maxlvt > 3 {
        apic.write(APIC_REG_ESR, 0);
    }
    apic.read(APIC_REG_ESR)
}

/// Copy the trampoline into low memory.
pub fn install_trampoline<M>(mem: &mut M, trampoline: &[u8]) -> Result<(), BringupError>
where
    M: PhysMemory + ?Sized,
{
    if trampoline.len() > AP_TRAMPOLINE_MAX_SIZE {
        return Err(BringupError::TrampolineTooLarge(trampoline.len()));
    }
    mem.write(AP_TRAMPOLINE_ADDR, trampoline);
    crate::kdebug!(
        "SMP: trampoline ({} bytes) at {:#x}",
        trampoline.len(),
        AP_TRAMPOLINE_ADDR
    );
    Ok(())
}

/// Point the AP info area at `target`.
pub fn prepare_info_area<M>(mem: &mut M, target: &CpuRecord, launch: &ApLaunch<'_>)
where
    M: PhysMemory + ?Sized,
{
    let area = ApInitArea::new(
        target as *const CpuRecord as u64,
        launch.page_table_root,
        launch.entry,
    );
    mem.write(AP_INFO_AREA, area.as_bytes());
}

/// INIT / STARTUP sequence for one target APIC id.
pub fn wake_ap<A, C>(apic: &A, cpu: &C, lapic_id: u32, maxlvt: u32) -> WakeResult
where
    A: LocalApic + ?Sized,
    C: CpuOps + ?Sized,
{
    let vector = trampoline_vector();

    clear_esr(apic, maxlvt);
    apic.send_init(lapic_id);
    apic.wait_for_send();
    fence(Ordering::SeqCst);
    cpu.udelay(INIT_ASSERT_US);
    apic.deassert_init(lapic_id);
    apic.wait_for_send();

    let mut result = WakeResult::default();
    for attempt in 1..=STARTUP_ATTEMPTS {
        crate::kdebug!("SMP: sending STARTUP #{} to lapic {}", attempt, lapic_id);
        clear_esr(apic, maxlvt);
        apic.send_startup(lapic_id, vector);
        cpu.udelay(STARTUP_SETTLE_US);
        result.delivery = apic.wait_for_send();
        cpu.udelay(STARTUP_ESR_DELAY_US);
        result.esr = apic.read(APIC_REG_ESR) & APIC_ESR_MASK;
        result.attempts = attempt;
        if result.is_ok() {
            break;
        }
    }
    result
}

/// Wake every processor except the BSP and return once all of them have
/// counted themselves booted.
///
/// Waits are unbounded: a processor that never comes up hangs the BSP
/// here. A nonzero [`BringupStatus`] is "degraded but continuing".
pub fn bringup_aps<A, C, M>(
    sys: &SystemInfo,
    apic: &A,
    cpu: &C,
    mem: &mut M,
    launch: &ApLaunch<'_>,
) -> Result<BringupStatus, BringupError>
where
    A: LocalApic + ?Sized,
    C: CpuOps + ?Sized,
    M: PhysMemory + ?Sized,
{
    let mut status = BringupStatus::default();

    if sys.num_cpus() <= 1 {
        crate::kinfo!("SMP: single processor, nothing to bring up");
        return Ok(status);
    }

    let bsp_id = sys.bsp().map_or(0, |bsp| bsp.id);
    let maxlvt = apic.max_lvt();
    crate::kdebug!("SMP: BSP lapic maxlvt {}", maxlvt);

    install_trampoline(mem, launch.trampoline)?;

    for target in sys.cpus().iter().filter(|c| c.id != bsp_id) {
        crate::kinfo!(
            "SMP: Waking up core {} (APIC ID {})",
            target.id,
            target.lapic_id
        );
        prepare_info_area(mem, target, launch);
        target.set_status(CpuStatus::Waking);
        fence(Ordering::SeqCst);

        let result = wake_ap(apic, cpu, target.lapic_id, maxlvt);
        if result.delivery != 0 {
            crate::kerror!(
                "SMP: APIC wakeup failed for core {} (delivery status {:#x})",
                target.id,
                result.delivery
            );
        }
        if result.esr != 0 {
            crate::kerror!(
                "SMP: APIC error on core {} (ESR {:#x})",
                target.id,
                result.esr
            );
        }
        status.record(&result);

        wait::wait_for_booted(target);
        crate::kinfo!("SMP: Bringup for core {} done", target.id);
    }

    wait::wait_for_all_booted(sys);
    crate::kinfo!("SMP: all {} cores booted", sys.num_cpus());
    Ok(status)
}
