//! Topology store
//!
//! [`TopologyBuilder`] is filled by the table parser while the BSP is the
//! only running processor. [`TopologyBuilder::build`] freezes it into a
//! [`SystemInfo`]; from then on only the per-core runtime fields (booted
//! flag, status, frequency, core lock) change.

use alloc::vec::Vec;
use core::fmt;
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};

use spin::{Mutex, MutexGuard, Once};

use crate::config::{MAX_BUSES, MAX_CPUS, MAX_IOAPICS};

use super::error::TableError;
use super::xcall::{XcallQueue, XcallRequest};

/// Lifecycle of a processor, for diagnostics.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuStatus {
    Offline = 0,
    /// INIT/STARTUP sent, not yet running Rust code.
    Waking = 1,
    /// Running the local setup phase.
    Setup = 2,
    /// On its own stack, waiting at the boot barrier.
    Finishing = 3,
    Online = 4,
}

impl CpuStatus {
    pub fn from_atomic(value: u8) -> Self {
        match value {
            1 => CpuStatus::Waking,
            2 => CpuStatus::Setup,
            3 => CpuStatus::Finishing,
            4 => CpuStatus::Online,
            _ => CpuStatus::Offline,
        }
    }
}

/// CPUID leaf 1 EAX as stored in the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CpuSignature(pub u32);

impl CpuSignature {
    pub const fn stepping(self) -> u32 {
        self.0 & 0xF
    }

    pub const fn model(self) -> u32 {
        (self.0 >> 4) & 0xF
    }

    pub const fn family(self) -> u32 {
        (self.0 >> 8) & 0xF
    }
}

/// CPUID leaf 1 EDX as stored in the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CpuFeatures(pub u32);

impl CpuFeatures {
    pub const FPU: u32 = 1 << 0;
    pub const MCE: u32 = 1 << 7;
    pub const CX8: u32 = 1 << 8;
    pub const APIC: u32 = 1 << 9;

    pub const fn has(self, bit: u32) -> bool {
        self.0 & bit != 0
    }
}

impl fmt::Display for CpuFeatures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(u32, &str); 4] = [
            (CpuFeatures::FPU, "fpu"),
            (CpuFeatures::MCE, "mce"),
            (CpuFeatures::CX8, "cx8"),
            (CpuFeatures::APIC, "apic"),
        ];
        let mut first = true;
        for (bit, name) in NAMES {
            if self.has(bit) {
                if !first {
                    f.write_str(" ")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        if first {
            f.write_str("none")?;
        }
        Ok(())
    }
}

/// Local APIC driver state of an initialized core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApicHandle {
    pub id: u32,
    pub version: u32,
}

/// Mutable per-core state behind the core lock.
pub struct CoreState {
    pub(crate) xcall_q: Option<XcallQueue>,
}

/// One processor.
pub struct CpuRecord {
    pub id: u32,
    pub lapic_id: u32,
    pub lapic_version: u8,
    pub enabled: bool,
    pub is_bsp: bool,
    pub signature: CpuSignature,
    pub features: CpuFeatures,
    khz: AtomicU64,
    booted: AtomicBool,
    status: AtomicU8,
    apic: Once<ApicHandle>,
    lock: Mutex<CoreState>,
    pub(crate) xcall_nowait: XcallRequest,
}

impl CpuRecord {
    fn new(id: u32, entry: &CpuEntry) -> Self {
        Self {
            id,
            lapic_id: entry.lapic_id as u32,
            lapic_version: entry.lapic_version,
            enabled: entry.enabled,
            is_bsp: entry.is_bsp,
            signature: CpuSignature(entry.signature),
            features: CpuFeatures(entry.features),
            khz: AtomicU64::new(0),
            booted: AtomicBool::new(false),
            status: AtomicU8::new(CpuStatus::Offline as u8),
            apic: Once::new(),
            lock: Mutex::new(CoreState { xcall_q: None }),
            xcall_nowait: XcallRequest::new(),
        }
    }

    pub fn is_booted(&self) -> bool {
        self.booted.load(Ordering::Acquire)
    }

    /// Flip the booted flag false -> true. Fails if it was already set.
    pub fn mark_booted(&self) -> Result<(), ()> {
        self.booted
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| ())
    }

    pub fn status(&self) -> CpuStatus {
        CpuStatus::from_atomic(self.status.load(Ordering::Acquire))
    }

    pub fn set_status(&self, status: CpuStatus) {
        self.status.store(status as u8, Ordering::Release);
    }

    pub fn khz(&self) -> u64 {
        self.khz.load(Ordering::Relaxed)
    }

    pub fn set_khz(&self, khz: u64) {
        self.khz.store(khz, Ordering::Relaxed);
    }

    pub fn apic(&self) -> Option<&ApicHandle> {
        self.apic.get()
    }

    /// Attach the local APIC handle. Only the first call has an effect.
    pub fn attach_apic(&self, handle: ApicHandle) -> &ApicHandle {
        self.apic.call_once(|| handle)
    }

    /// APIC id to address this core with.
    pub fn dest_apic_id(&self) -> u32 {
        self.apic().map_or(self.lapic_id, |apic| apic.id)
    }

    pub fn lock(&self) -> MutexGuard<'_, CoreState> {
        self.lock.lock()
    }
}

/// One I/O APIC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoApicRecord {
    pub id: u8,
    pub version: u8,
    pub usable: bool,
    pub base: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusRecord {
    pub id: u8,
    type_name: [u8; 6],
}

impl BusRecord {
    pub const fn new(id: u8, type_name: [u8; 6]) -> Self {
        Self { id, type_name }
    }

    /// Bus type string with trailing padding removed, e.g. `"ISA"`.
    pub fn type_name(&self) -> &str {
        let end = self
            .type_name
            .iter()
            .rposition(|b| *b != b' ' && *b != 0)
            .map_or(0, |i| i + 1);
        core::str::from_utf8(&self.type_name[..end]).unwrap_or("?")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntType {
    Int,
    Nmi,
    Smi,
    ExtInt,
    Unknown(u8),
}

impl IntType {
    pub fn from_raw(value: u8) -> Self {
        match value {
            0 => IntType::Int,
            1 => IntType::Nmi,
            2 => IntType::Smi,
            3 => IntType::ExtInt,
            other => IntType::Unknown(other),
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            IntType::Int => "INT",
            IntType::Nmi => "NMI",
            IntType::Smi => "SMI",
            IntType::ExtInt => "ExtINT",
            IntType::Unknown(_) => "UNKNOWN",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Polarity {
    /// Conforms to the source bus.
    Bus,
    ActiveHigh,
    Reserved,
    ActiveLow,
}

impl Polarity {
    /// Decode bits 0-1 of the routing flags.
    pub const fn from_flags(flags: u16) -> Self {
        match flags & 0x3 {
            0 => Polarity::Bus,
            1 => Polarity::ActiveHigh,
            2 => Polarity::Reserved,
            _ => Polarity::ActiveLow,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerMode {
    /// Conforms to the source bus.
    Bus,
    Edge,
    Reserved,
    Level,
}

impl TriggerMode {
    /// Decode bits 2-3 of the routing flags.
    pub const fn from_flags(flags: u16) -> Self {
        match (flags >> 2) & 0x3 {
            0 => TriggerMode::Bus,
            1 => TriggerMode::Edge,
            2 => TriggerMode::Reserved,
            _ => TriggerMode::Level,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteDest {
    /// Input pin of an I/O APIC.
    IoApic { id: u8, pin: u8 },
    /// LINT pin of a local APIC; id 0xFF means every local APIC.
    LocalApic { id: u8, lint: u8 },
}

/// One interrupt source to destination mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoutingEntry {
    pub kind: IntType,
    pub polarity: Polarity,
    pub trigger: TriggerMode,
    pub src_bus: u8,
    pub src_irq: u8,
    pub dest: RouteDest,
}

/// Decoded processor entry handed to the builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuEntry {
    pub lapic_id: u8,
    pub lapic_version: u8,
    pub enabled: bool,
    pub is_bsp: bool,
    pub signature: u32,
    pub features: u32,
}

/// Mutable topology under construction.
pub struct TopologyBuilder {
    cpus: Vec<CpuRecord>,
    ioapics: Vec<IoApicRecord>,
    buses: Vec<BusRecord>,
    pic_mode: bool,
    lapic_base: u32,
}

impl TopologyBuilder {
    pub const fn new() -> Self {
        Self {
            cpus: Vec::new(),
            ioapics: Vec::new(),
            buses: Vec::new(),
            pic_mode: false,
            lapic_base: 0,
        }
    }

    pub fn num_cpus(&self) -> usize {
        self.cpus.len()
    }

    pub fn num_ioapics(&self) -> usize {
        self.ioapics.len()
    }

    pub fn set_pic_mode(&mut self, pic_mode: bool) {
        self.pic_mode = pic_mode;
    }

    pub fn set_lapic_base(&mut self, base: u32) {
        self.lapic_base = base;
    }

    /// Append a processor. Returns its logical id.
    pub fn add_cpu(&mut self, entry: &CpuEntry) -> Result<u32, TableError> {
        if self.cpus.len() >= MAX_CPUS {
            return Err(TableError::TooManyCpus);
        }
        self.cpus
            .try_reserve(1)
            .map_err(|_| TableError::OutOfMemory)?;
        let id = self.cpus.len() as u32;
        self.cpus.push(CpuRecord::new(id, entry));
        Ok(id)
    }

    pub fn add_ioapic(&mut self, ioapic: IoApicRecord) -> Result<(), TableError> {
        if self.ioapics.len() >= MAX_IOAPICS {
            return Err(TableError::TooManyIoApics);
        }
        self.ioapics
            .try_reserve(1)
            .map_err(|_| TableError::OutOfMemory)?;
        self.ioapics.push(ioapic);
        Ok(())
    }

    pub fn add_bus(&mut self, bus: BusRecord) -> Result<(), TableError> {
        if self.buses.len() >= MAX_BUSES {
            return Err(TableError::TooManyBuses);
        }
        self.buses.try_reserve(1).map_err(|_| TableError::OutOfMemory)?;
        self.buses.push(bus);
        Ok(())
    }

    /// Freeze the topology.
    ///
    /// Exactly one processor starts out booted: the first one flagged as
    /// BSP, else processor 0. Any further BSP flag is ignored and that
    /// processor is woken like the others.
    pub fn build(self) -> SystemInfo {
        let sys = SystemInfo {
            cpus: self.cpus,
            ioapics: self.ioapics,
            buses: self.buses,
            pic_mode: self.pic_mode,
            lapic_base: self.lapic_base,
            booted_count: AtomicU32::new(0),
        };
        if let Some(bsp) = sys.bsp() {
            // The BSP is running by definition.
            bsp.booted.store(true, Ordering::Release);
            bsp.set_status(CpuStatus::Online);
            sys.booted_count.store(1, Ordering::Release);
            let extra = sys.cpus.iter().filter(|cpu| cpu.is_bsp && cpu.id != bsp.id);
            for cpu in extra {
                crate::kwarn!("SMP: core {} also flagged BSP, treating it as an AP", cpu.id);
            }
        }
        sys
    }
}

impl Default for TopologyBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// The machine's processors and interrupt controllers, fixed after boot.
pub struct SystemInfo {
    cpus: Vec<CpuRecord>,
    ioapics: Vec<IoApicRecord>,
    buses: Vec<BusRecord>,
    pic_mode: bool,
    lapic_base: u32,
    /// Processors that have passed their booted handshake, BSP included.
    booted_count: AtomicU32,
}

impl SystemInfo {
    pub fn num_cpus(&self) -> usize {
        self.cpus.len()
    }

    pub fn num_ioapics(&self) -> usize {
        self.ioapics.len()
    }

    pub fn cpu(&self, id: u32) -> Option<&CpuRecord> {
        self.cpus.get(id as usize)
    }

    pub fn cpus(&self) -> &[CpuRecord] {
        &self.cpus
    }

    pub fn ioapics(&self) -> &[IoApicRecord] {
        &self.ioapics
    }

    pub fn buses(&self) -> &[BusRecord] {
        &self.buses
    }

    /// The processor flagged as BSP in the table, else processor 0.
    pub fn bsp(&self) -> Option<&CpuRecord> {
        self.cpus
            .iter()
            .find(|cpu| cpu.is_bsp)
            .or_else(|| self.cpus.first())
    }

    pub fn pic_mode(&self) -> bool {
        self.pic_mode
    }

    pub fn lapic_base(&self) -> u32 {
        self.lapic_base
    }

    pub fn booted_count(&self) -> u32 {
        self.booted_count.load(Ordering::Acquire)
    }

    /// Count one more booted processor. Returns the new total.
    pub fn note_booted(&self) -> u32 {
        self.booted_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn all_booted(&self) -> bool {
        self.booted_count() as usize == self.num_cpus()
    }
}
