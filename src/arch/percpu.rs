//! "This processor" lookup through the GS base.
//!
//! Each core points its GS base at its own `CpuRecord` during setup. Until
//! then the base is zero and the core reports itself as processor 0, which
//! is only true for the BSP, and only the BSP runs code before that point.

use x86_64::registers::model_specific::Msr;

use crate::smp::CpuRecord;

const IA32_GS_BASE: u32 = 0xC000_0101;

pub fn set_current(core: &'static CpuRecord) {
    let mut msr = Msr::new(IA32_GS_BASE);
    // SAFETY: the kernel does not use GS for anything else.
    unsafe { msr.write(core as *const CpuRecord as u64) };
}

pub fn current() -> Option<&'static CpuRecord> {
    let base = unsafe { Msr::new(IA32_GS_BASE).read() };
    if base == 0 {
        return None;
    }
    // SAFETY: only set_current writes the GS base, always from a
    // &'static CpuRecord. INIT clears it on every AP.
    Some(unsafe { &*(base as *const CpuRecord) })
}

pub fn current_cpu_id() -> u32 {
    current().map_or(0, |core| core.id)
}
