//! MP configuration table decoding
//!
//! Layouts follow the Intel MultiProcessor Specification 1.4. Entries are
//! decoded field by field through [`RawReader`], so a table whose
//! declared sizes disagree with its backing bytes fails with
//! [`TableError::Truncated`] instead of reading past the end.
//!
//! A bad signature or checksum is logged and parsing continues. Any other
//! malformation aborts the parse and nothing of the partial topology is
//! kept.

use core::mem::size_of;

use super::error::TableError;
use super::hal::RoutingRegistrar;
use super::raw::{checksum, RawReader};
use super::topology::{
    BusRecord, CpuEntry, IntType, IoApicRecord, Polarity, RouteDest, RoutingEntry, SystemInfo,
    TopologyBuilder, TriggerMode,
};

pub const MP_FLOAT_SIGNATURE: [u8; 4] = *b"_MP_";
pub const MP_TABLE_SIGNATURE: [u8; 4] = *b"PCMP";

/// Floating pointer structure, 16 bytes.
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct MpFloatRaw {
    pub signature: [u8; 4],
    pub table_addr: u32,
    /// In 16-byte units.
    pub length: u8,
    pub spec_rev: u8,
    pub checksum: u8,
    /// Default configuration type, 0 when a table is present.
    pub feature1: u8,
    /// Bit 7: IMCR present, PIC mode implemented.
    pub feature2: u8,
    pub feature3: [u8; 3],
}

/// Configuration table header, 44 bytes.
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct MpTableHeaderRaw {
    pub signature: [u8; 4],
    pub base_len: u16,
    pub spec_rev: u8,
    pub checksum: u8,
    pub oem_id: [u8; 8],
    pub product_id: [u8; 12],
    pub oem_table: u32,
    pub oem_table_len: u16,
    pub entry_count: u16,
    pub lapic_addr: u32,
    pub ext_len: u16,
    pub ext_checksum: u8,
    pub _reserved: u8,
}

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct CpuEntryRaw {
    pub kind: u8,
    pub lapic_id: u8,
    pub lapic_version: u8,
    /// Bit 0: enabled, bit 1: bootstrap processor.
    pub flags: u8,
    pub signature: u32,
    pub features: u32,
    pub _reserved: [u32; 2],
}

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct BusEntryRaw {
    pub kind: u8,
    pub bus_id: u8,
    pub type_name: [u8; 6],
}

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct IoApicEntryRaw {
    pub kind: u8,
    pub id: u8,
    pub version: u8,
    /// Bit 0: usable.
    pub flags: u8,
    pub addr: u32,
}

/// I/O and local interrupt assignment entries share this layout.
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct IntEntryRaw {
    pub kind: u8,
    pub int_type: u8,
    pub flags: u16,
    pub src_bus: u8,
    pub src_irq: u8,
    pub dst_id: u8,
    pub dst_pin: u8,
}

pub const MP_FLOAT_LEN: usize = size_of::<MpFloatRaw>();
pub const MP_TABLE_HEADER_LEN: usize = size_of::<MpTableHeaderRaw>();

const _: () = assert!(MP_FLOAT_LEN == 16);
const _: () = assert!(MP_TABLE_HEADER_LEN == 44);
const _: () = assert!(size_of::<CpuEntryRaw>() == 20);
const _: () = assert!(size_of::<BusEntryRaw>() == 8);
const _: () = assert!(size_of::<IoApicEntryRaw>() == 8);
const _: () = assert!(size_of::<IntEntryRaw>() == 8);

/// Base table entry tags.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryType {
    Cpu = 0,
    Bus = 1,
    IoApic = 2,
    IoInterrupt = 3,
    LocalInterrupt = 4,
}

impl EntryType {
    pub fn from_raw(kind: u8) -> Option<Self> {
        match kind {
            0 => Some(EntryType::Cpu),
            1 => Some(EntryType::Bus),
            2 => Some(EntryType::IoApic),
            3 => Some(EntryType::IoInterrupt),
            4 => Some(EntryType::LocalInterrupt),
            _ => None,
        }
    }

    /// Fixed on-disk size of an entry of this type.
    pub const fn len(self) -> usize {
        match self {
            EntryType::Cpu => size_of::<CpuEntryRaw>(),
            EntryType::Bus => size_of::<BusEntryRaw>(),
            EntryType::IoApic => size_of::<IoApicEntryRaw>(),
            EntryType::IoInterrupt | EntryType::LocalInterrupt => size_of::<IntEntryRaw>(),
        }
    }
}

/// Decoded floating pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FloatingPointer {
    pub table_addr: u32,
    pub length: u8,
    pub spec_rev: u8,
    pub default_config: u8,
    pub pic_mode: bool,
    pub checksum_ok: bool,
}

/// Decode the 16-byte floating pointer at the start of `bytes`. The
/// signature is assumed already matched by the scanner.
pub fn decode_floating_pointer(bytes: &[u8]) -> Result<FloatingPointer, TableError> {
    let reader = RawReader::new(bytes);
    let raw: MpFloatRaw = reader.read(0)?;
    let checksum_ok = checksum(reader.bytes(0, MP_FLOAT_LEN)?) == 0;
    Ok(FloatingPointer {
        table_addr: raw.table_addr,
        length: raw.length,
        spec_rev: raw.spec_rev,
        default_config: raw.feature1,
        pic_mode: raw.feature2 & (1 << 7) != 0,
        checksum_ok,
    })
}

/// Summary of a parse, for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseReport {
    pub signature_ok: bool,
    pub checksum_ok: bool,
    pub spec_rev: u8,
    pub entries: u16,
    pub oem_id: [u8; 8],
    pub product_id: [u8; 12],
    pub lapic_addr: u32,
}

impl ParseReport {
    pub fn oem_id(&self) -> &str {
        trim_ascii(&self.oem_id)
    }

    pub fn product_id(&self) -> &str {
        trim_ascii(&self.product_id)
    }
}

fn trim_ascii(bytes: &[u8]) -> &str {
    let end = bytes
        .iter()
        .rposition(|b| *b != b' ' && *b != 0)
        .map_or(0, |i| i + 1);
    core::str::from_utf8(&bytes[..end]).unwrap_or("?")
}

/// Declared base table length from a header, so the caller knows how much
/// memory to map before calling [`parse_mp_table`].
pub fn declared_length(header: &[u8]) -> Result<usize, TableError> {
    let raw: MpTableHeaderRaw = RawReader::new(header).read(0)?;
    Ok(raw.base_len as usize)
}

/// Decode the base configuration table in `table` into `builder`.
/// Bus and routing entries also go to `registrar`.
pub fn parse_mp_table<R>(
    table: &[u8],
    builder: &mut TopologyBuilder,
    registrar: &mut R,
) -> Result<ParseReport, TableError>
where
    R: RoutingRegistrar + ?Sized,
{
    let reader = RawReader::new(table);
    let header: MpTableHeaderRaw = reader.read(0)?;
    let base_len = header.base_len as usize;
    if base_len < MP_TABLE_HEADER_LEN {
        return Err(TableError::Truncated {
            offset: 0,
            needed: MP_TABLE_HEADER_LEN,
            len: base_len,
        });
    }
    let body = RawReader::new(reader.bytes(0, base_len)?);

    let signature_ok = header.signature == MP_TABLE_SIGNATURE;
    if !signature_ok {
        crate::kerror!("SMP: MP table signature mismatch");
    }
    let checksum_ok = checksum(body.bytes(0, base_len)?) == 0;
    if !checksum_ok {
        crate::kerror!("SMP: MP table checksum failed");
    }

    let report = ParseReport {
        signature_ok,
        checksum_ok,
        spec_rev: header.spec_rev,
        entries: header.entry_count,
        oem_id: header.oem_id,
        product_id: header.product_id,
        lapic_addr: header.lapic_addr,
    };
    crate::kinfo!(
        "SMP: MP table rev 1.{} OEM '{}' product '{}', {} entries, LAPIC @ {:#x}",
        report.spec_rev,
        report.oem_id(),
        report.product_id(),
        report.entries,
        report.lapic_addr
    );
    builder.set_lapic_base(header.lapic_addr);

    let mut cursor = MP_TABLE_HEADER_LEN;
    for _ in 0..header.entry_count {
        let tag = body.u8(cursor)?;
        let kind = EntryType::from_raw(tag).ok_or(TableError::UnknownEntry {
            offset: cursor,
            kind: tag,
        })?;
        match kind {
            EntryType::Cpu => parse_cpu(body.read(cursor)?, builder)?,
            EntryType::Bus => parse_bus(body.read(cursor)?, builder, registrar)?,
            EntryType::IoApic => parse_ioapic(body.read(cursor)?, builder)?,
            EntryType::IoInterrupt | EntryType::LocalInterrupt => {
                parse_int(kind, body.read(cursor)?, registrar)
            }
        }
        cursor += kind.len();
    }

    crate::kinfo!(
        "SMP: {} processors, {} I/O APICs",
        builder.num_cpus(),
        builder.num_ioapics()
    );
    Ok(report)
}

fn parse_cpu(raw: CpuEntryRaw, builder: &mut TopologyBuilder) -> Result<(), TableError> {
    let entry = CpuEntry {
        lapic_id: raw.lapic_id,
        lapic_version: raw.lapic_version,
        enabled: raw.flags & 0x1 != 0,
        is_bsp: raw.flags & 0x2 != 0,
        signature: raw.signature,
        features: raw.features,
    };
    let id = builder.add_cpu(&entry).map_err(|err| {
        crate::kerror!("SMP: cannot add processor (lapic {}): {}", entry.lapic_id, err.as_str());
        err
    })?;
    crate::kdebug!(
        "SMP: CPU {} lapic {} ver {:#x} {}{}",
        id,
        entry.lapic_id,
        entry.lapic_version,
        if entry.enabled { "enabled" } else { "disabled" },
        if entry.is_bsp { " BSP" } else { "" }
    );
    Ok(())
}

fn parse_bus<R>(raw: BusEntryRaw, builder: &mut TopologyBuilder, registrar: &mut R) -> Result<(), TableError>
where
    R: RoutingRegistrar + ?Sized,
{
    let bus = BusRecord::new(raw.bus_id, raw.type_name);
    crate::kdebug!("SMP: bus {} type '{}'", bus.id, bus.type_name());
    builder.add_bus(bus)?;
    registrar.add_bus(&bus);
    Ok(())
}

fn parse_ioapic(raw: IoApicEntryRaw, builder: &mut TopologyBuilder) -> Result<(), TableError> {
    let ioapic = IoApicRecord {
        id: raw.id,
        version: raw.version,
        usable: raw.flags & 0x1 != 0,
        base: raw.addr,
    };
    crate::kdebug!(
        "SMP: IOAPIC {} ver {:#x} base {:#x}{}",
        ioapic.id,
        ioapic.version,
        ioapic.base,
        if ioapic.usable { "" } else { " (unusable)" }
    );
    builder.add_ioapic(ioapic).map_err(|err| {
        crate::kerror!("SMP: cannot add IOAPIC {}: {}", ioapic.id, err.as_str());
        err
    })
}

fn parse_int<R>(kind: EntryType, raw: IntEntryRaw, registrar: &mut R)
where
    R: RoutingRegistrar + ?Sized,
{
    let dest = if kind == EntryType::LocalInterrupt {
        RouteDest::LocalApic {
            id: raw.dst_id,
            lint: raw.dst_pin,
        }
    } else {
        RouteDest::IoApic {
            id: raw.dst_id,
            pin: raw.dst_pin,
        }
    };
    let route = RoutingEntry {
        kind: IntType::from_raw(raw.int_type),
        polarity: Polarity::from_flags(raw.flags),
        trigger: TriggerMode::from_flags(raw.flags),
        src_bus: raw.src_bus,
        src_irq: raw.src_irq,
        dest,
    };
    crate::kdebug!(
        "SMP: {} bus {} irq {} -> {:?} ({:?}, {:?})",
        route.kind.as_str(),
        route.src_bus,
        route.src_irq,
        route.dest,
        route.polarity,
        route.trigger
    );
    registrar.add_route(&route);
}

/// Parse `table` into a frozen topology. `pic_mode` comes from the
/// floating pointer.
pub fn build_topology<R>(
    table: &[u8],
    pic_mode: bool,
    registrar: &mut R,
) -> Result<(SystemInfo, ParseReport), TableError>
where
    R: RoutingRegistrar + ?Sized,
{
    let mut builder = TopologyBuilder::new();
    builder.set_pic_mode(pic_mode);
    let report = parse_mp_table(table, &mut builder, registrar)?;
    Ok((builder.build(), report))
}
