//! Fixed physical addresses and the AP hand-off structure.
//!
//! Everything the woken processor reads before it reaches Rust code lives
//! here. The trampoline in `crate::arch::trampoline` addresses the fields
//! of [`ApInitArea`] by the `AP_AREA_*` offsets below.

use core::mem::{offset_of, size_of};

/// Start of the last KiB of conventional memory (EBDA fallback window).
pub const BASE_MEM_LAST_KILO: u64 = 0x9FC00;
pub const BASE_MEM_SCAN_LEN: usize = 4096;
/// BIOS ROM window, end exclusive.
pub const BIOS_ROM_BASE: u64 = 0xF0000;
pub const BIOS_ROM_END: u64 = 0x100000;
/// Floating pointers are 16-byte structures but the scan steps by 4.
pub const SCAN_STEP: usize = 4;

/// Where the trampoline is copied. Must be page aligned and below 1 MiB.
pub const AP_TRAMPOLINE_ADDR: u64 = 0x8000;
pub const AP_TRAMPOLINE_MAX_SIZE: usize = 4096;
/// Physical address of the [`ApInitArea`].
pub const AP_INFO_AREA: u64 = 0x6000;
/// Top of the stack a woken AP uses until it switches to its own.
pub const AP_BOOT_STACK_ADDR: u64 = 0x7FF0;

/// STARTUP vector encoding the trampoline's page number.
pub const fn trampoline_vector() -> u8 {
    (AP_TRAMPOLINE_ADDR >> 12) as u8
}

/// Flat 4 GiB code segment, 32-bit.
pub const GDT32_CODE: u64 = 0x00CF_9A00_0000_FFFF;
/// Flat 4 GiB data segment, 32-bit.
pub const GDT32_DATA: u64 = 0x00CF_9200_0000_FFFF;
pub const GDT64_CODE: u64 = 0x00A0_9A00_0000_0000;
pub const GDT64_DATA: u64 = 0x00A0_9200_0000_0000;

/// Hand-off block read by the trampoline. Packed so the offsets are
/// exactly the ones the assembly uses.
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct ApInitArea {
    /// Boot stack top for the woken AP.
    pub stack: u64,
    /// Address of the target's `CpuRecord`, passed to the entry point.
    pub cpu_ptr: u64,
    /// null, code, data for protected mode.
    pub gdt32: [u64; 3],
    /// null, code, data for long mode.
    pub gdt64: [u64; 3],
    pub gdt32_limit: u16,
    pub gdt32_base: u32,
    pub _pad0: u16,
    pub gdt64_limit: u16,
    pub gdt64_base: u64,
    pub _pad1: [u8; 6],
    /// Page-table root shared with the BSP.
    pub cr3: u64,
    /// Rust entry point, `extern "C" fn(&'static CpuRecord) -> !`.
    pub entry: u64,
}

pub const AP_AREA_STACK: usize = offset_of!(ApInitArea, stack);
pub const AP_AREA_CPU: usize = offset_of!(ApInitArea, cpu_ptr);
pub const AP_AREA_GDT32_PTR: usize = offset_of!(ApInitArea, gdt32_limit);
pub const AP_AREA_GDT64_PTR: usize = offset_of!(ApInitArea, gdt64_limit);
pub const AP_AREA_CR3: usize = offset_of!(ApInitArea, cr3);
pub const AP_AREA_ENTRY: usize = offset_of!(ApInitArea, entry);

const _: () = assert!(AP_AREA_STACK == 0x00);
const _: () = assert!(AP_AREA_CPU == 0x08);
const _: () = assert!(offset_of!(ApInitArea, gdt32) == 0x10);
const _: () = assert!(offset_of!(ApInitArea, gdt64) == 0x28);
const _: () = assert!(AP_AREA_GDT32_PTR == 0x40);
const _: () = assert!(AP_AREA_GDT64_PTR == 0x48);
const _: () = assert!(AP_AREA_CR3 == 0x58);
const _: () = assert!(AP_AREA_ENTRY == 0x60);
const _: () = assert!(size_of::<ApInitArea>() == 0x68);
const _: () = assert!(AP_INFO_AREA + size_of::<ApInitArea>() as u64 <= AP_BOOT_STACK_ADDR - 0x800);

impl ApInitArea {
    /// Build the area for one target. Descriptor pointers refer to the
    /// tables inside the area at [`AP_INFO_AREA`].
    pub fn new(cpu_ptr: u64, cr3: u64, entry: u64) -> Self {
        let table_len = (size_of::<[u64; 3]>() - 1) as u16;
        Self {
            stack: AP_BOOT_STACK_ADDR,
            cpu_ptr,
            gdt32: [0, GDT32_CODE, GDT32_DATA],
            gdt64: [0, GDT64_CODE, GDT64_DATA],
            gdt32_limit: table_len,
            gdt32_base: (AP_INFO_AREA as usize + offset_of!(ApInitArea, gdt32)) as u32,
            _pad0: 0,
            gdt64_limit: table_len,
            gdt64_base: AP_INFO_AREA + offset_of!(ApInitArea, gdt64) as u64,
            _pad1: [0; 6],
            cr3,
            entry,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        // SAFETY: packed plain-old-data, every byte is initialized.
        unsafe {
            core::slice::from_raw_parts(self as *const Self as *const u8, size_of::<Self>())
        }
    }
}
