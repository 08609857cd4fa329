//! xAPIC driver (MMIO).
//!
//! Every core maps its own local APIC at the same physical base, so one
//! base address serves all of them. [`XApic`] is the zero-sized handle the
//! SMP core talks to through [`LocalApic`].

use core::ptr::{read_volatile, write_volatile};
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use x86_64::registers::model_specific::Msr;

use crate::smp::hal::LocalApic;
use crate::smp::ApicHandle;

const IA32_APIC_BASE: u32 = 0x1B;
const APIC_ENABLE: u64 = 1 << 11;
const APIC_BASE_MASK: u64 = 0xFFFF_F000;
pub const SPURIOUS_VECTOR: u8 = 0xFF;

const REG_ID: u32 = 0x020;
const REG_VERSION: u32 = 0x030;
const REG_TPR: u32 = 0x080;
const REG_EOI: u32 = 0x0B0;
const REG_SVR: u32 = 0x0F0;
const REG_ICR_LOW: u32 = 0x300;
const REG_ICR_HIGH: u32 = 0x310;
const REG_LVT_ERROR: u32 = 0x370;

const ICR_DELIVERY_PENDING: u32 = 1 << 12;
const ICR_FIXED: u32 = 0x0000_4000;
const ICR_INIT_ASSERT: u32 = 0x0000_C500;
const ICR_INIT_DEASSERT: u32 = 0x0000_8500;
const ICR_STARTUP: u32 = 0x0000_0600;
const LVT_MASKED: u32 = 1 << 16;

/// How many times to poll the ICR before reporting a stuck send.
const ICR_POLL_LIMIT: u32 = 100_000;

static LAPIC_BASE: AtomicU64 = AtomicU64::new(0);
static LAPIC_READY: AtomicBool = AtomicBool::new(false);

/// The calling core's local APIC.
#[derive(Clone, Copy, Default)]
pub struct XApic;

/// Map and enable the BSP's local APIC.
pub fn init(table_base: u64) -> ApicHandle {
    let msr_base = unsafe { Msr::new(IA32_APIC_BASE).read() } & APIC_BASE_MASK;
    let base = if table_base != 0 { table_base } else { msr_base };
    if table_base != 0 && table_base != msr_base {
        crate::kwarn!(
            "LAPIC: MP table base {:#x} differs from MSR base {:#x}",
            table_base,
            msr_base
        );
    }
    LAPIC_BASE.store(base & APIC_BASE_MASK, Ordering::SeqCst);
    let handle = enable_local();
    LAPIC_READY.store(true, Ordering::SeqCst);
    crate::kinfo!(
        "LAPIC: Enabled local APIC at {:#x} (ID {:#x}, version {:#x})",
        base,
        handle.id,
        handle.version
    );
    handle
}

/// Enable the calling AP's local APIC. The base is already known.
pub fn init_ap() -> Option<ApicHandle> {
    if !LAPIC_READY.load(Ordering::Acquire) {
        return None;
    }
    Some(enable_local())
}

fn enable_local() -> ApicHandle {
    unsafe {
        let mut msr = Msr::new(IA32_APIC_BASE);
        let mut value = msr.read();
        value &= !APIC_BASE_MASK;
        value |= LAPIC_BASE.load(Ordering::SeqCst) & APIC_BASE_MASK;
        value |= APIC_ENABLE;
        msr.write(value);

        write_register(REG_TPR, 0);
        write_register(REG_LVT_ERROR, LVT_MASKED);

        let mut svr = read_register(REG_SVR);
        svr &= !0xFF;
        svr |= SPURIOUS_VECTOR as u32;
        svr |= 1 << 8; // APIC software enable
        write_register(REG_SVR, svr);

        ApicHandle {
            id: read_register(REG_ID) >> 24,
            version: read_register(REG_VERSION),
        }
    }
}

/// APIC id of the calling core. Falls back to CPUID before the APIC is
/// mapped, so the panic path can always report it.
pub fn current_apic_id() -> u32 {
    if LAPIC_READY.load(Ordering::Acquire) {
        unsafe { read_register(REG_ID) >> 24 }
    } else {
        unsafe { core::arch::x86_64::__cpuid(1).ebx >> 24 }
    }
}

pub fn send_eoi() {
    unsafe {
        write_register(REG_EOI, 0);
    }
}

unsafe fn send_command(apic_id: u32, command: u32) {
    write_register(REG_ICR_HIGH, apic_id << 24);
    write_register(REG_ICR_LOW, command);
}

/// Poll until the ICR is idle or the poll limit is reached. Returns the
/// pending bit, zero once the IPI was accepted.
fn icr_wait() -> u32 {
    for _ in 0..ICR_POLL_LIMIT {
        let pending = unsafe { read_register(REG_ICR_LOW) } & ICR_DELIVERY_PENDING;
        if pending == 0 {
            return 0;
        }
        core::hint::spin_loop();
    }
    unsafe { read_register(REG_ICR_LOW) & ICR_DELIVERY_PENDING }
}

unsafe fn read_register(offset: u32) -> u32 {
    let base = LAPIC_BASE.load(Ordering::Relaxed);
    let ptr = (base + offset as u64) as *const u32;
    read_volatile(ptr)
}

unsafe fn write_register(offset: u32, value: u32) {
    let base = LAPIC_BASE.load(Ordering::Relaxed);
    let ptr = (base + offset as u64) as *mut u32;
    write_volatile(ptr, value);
}

impl LocalApic for XApic {
    fn id(&self) -> u32 {
        current_apic_id()
    }

    fn read(&self, reg: u32) -> u32 {
        unsafe { read_register(reg) }
    }

    fn write(&self, reg: u32, value: u32) {
        unsafe { write_register(reg, value) }
    }

    fn max_lvt(&self) -> u32 {
        (self.read(REG_VERSION) >> 16) & 0xFF
    }

    fn send_init(&self, dest: u32) {
        icr_wait();
        unsafe { send_command(dest, ICR_INIT_ASSERT) }
    }

    fn deassert_init(&self, dest: u32) {
        icr_wait();
        unsafe { send_command(dest, ICR_INIT_DEASSERT) }
    }

    fn send_startup(&self, dest: u32, page: u8) {
        icr_wait();
        unsafe { send_command(dest, ICR_STARTUP | page as u32) }
    }

    fn send_ipi(&self, dest: u32, vector: u8) {
        icr_wait();
        unsafe { send_command(dest, ICR_FIXED | vector as u32) }
    }

    fn wait_for_send(&self) -> u32 {
        icr_wait()
    }

    fn eoi(&self) {
        send_eoi();
    }
}
