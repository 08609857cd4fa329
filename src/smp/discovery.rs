//! Locating the MP structures
//!
//! The floating pointer lives in one of two windows below 1 MiB. It names
//! the physical address of the configuration table, which is then parsed
//! into the topology.

use super::error::DiscoveryError;
use super::hal::{PhysMemory, RoutingRegistrar};
use super::layout::{BASE_MEM_LAST_KILO, BASE_MEM_SCAN_LEN, BIOS_ROM_BASE, BIOS_ROM_END, SCAN_STEP};
use super::mptable::{
    self, decode_floating_pointer, FloatingPointer, ParseReport, MP_FLOAT_LEN, MP_FLOAT_SIGNATURE,
    MP_TABLE_HEADER_LEN,
};
use super::topology::SystemInfo;

/// Scan `[base, end)` in 4-byte steps for the floating pointer marker.
/// Returns the physical address of the first match.
pub fn scan_window<M>(mem: &M, base: u64, end: u64) -> Option<u64>
where
    M: PhysMemory + ?Sized,
{
    let len = end.checked_sub(base)? as usize;
    let window = mem.read(base, len)?;
    (0..len.saturating_sub(MP_FLOAT_LEN - 1))
        .step_by(SCAN_STEP)
        .find(|&off| window[off..off + MP_FLOAT_SIGNATURE.len()] == MP_FLOAT_SIGNATURE)
        .map(|off| base + off as u64)
}

/// Find the floating pointer in the EBDA fallback window, then the BIOS ROM.
pub fn find_floating_pointer<M>(mem: &M) -> Option<u64>
where
    M: PhysMemory + ?Sized,
{
    crate::kdebug!(
        "SMP: scanning {:#x}-{:#x} for MP floating pointer",
        BASE_MEM_LAST_KILO,
        BASE_MEM_LAST_KILO + BASE_MEM_SCAN_LEN as u64
    );
    scan_window(mem, BASE_MEM_LAST_KILO, BASE_MEM_LAST_KILO + BASE_MEM_SCAN_LEN as u64).or_else(|| {
        crate::kdebug!("SMP: scanning BIOS ROM {:#x}-{:#x}", BIOS_ROM_BASE, BIOS_ROM_END);
        scan_window(mem, BIOS_ROM_BASE, BIOS_ROM_END)
    })
}

/// Read and decode the floating pointer at `addr`.
pub fn read_floating_pointer<M>(mem: &M, addr: u64) -> Result<FloatingPointer, DiscoveryError>
where
    M: PhysMemory + ?Sized,
{
    let bytes = mem
        .read(addr, MP_FLOAT_LEN)
        .ok_or(DiscoveryError::Unreadable(addr))?;
    let fp = decode_floating_pointer(bytes)?;
    if !fp.checksum_ok {
        crate::kerror!("SMP: MP floating pointer checksum failed");
    }
    Ok(fp)
}

/// Locate, validate and parse the MP table. Returns the frozen topology.
pub fn early_init<M, R>(mem: &M, registrar: &mut R) -> Result<(SystemInfo, ParseReport), DiscoveryError>
where
    M: PhysMemory + ?Sized,
    R: RoutingRegistrar + ?Sized,
{
    let addr = find_floating_pointer(mem).ok_or(DiscoveryError::NotFound)?;
    crate::kinfo!("SMP: MP floating pointer at {:#x}", addr);

    let fp = read_floating_pointer(mem, addr)?;
    crate::kinfo!(
        "SMP: MP spec rev 1.{}, table at {:#x}{}",
        fp.spec_rev,
        fp.table_addr,
        if fp.pic_mode { ", PIC mode" } else { ", virtual wire mode" }
    );
    if fp.table_addr == 0 {
        return Err(DiscoveryError::NoTable);
    }

    let table_addr = fp.table_addr as u64;
    let header = mem
        .read(table_addr, MP_TABLE_HEADER_LEN)
        .ok_or(DiscoveryError::Unreadable(table_addr))?;
    let len = mptable::declared_length(header)?.max(MP_TABLE_HEADER_LEN);
    let table = mem
        .read(table_addr, len)
        .ok_or(DiscoveryError::Unreadable(table_addr))?;

    Ok(mptable::build_topology(table, fp.pic_mode, registrar)?)
}
