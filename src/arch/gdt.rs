//! Global Descriptor Table shared by every core.
//!
//! Only flat kernel code and data segments. There is no TSS, so no
//! per-core state lives here and APs load the very same table.

use lazy_static::lazy_static;
use x86_64::instructions::segmentation::{Segment, CS, DS, ES, SS};
use x86_64::structures::gdt::{Descriptor, GlobalDescriptorTable, SegmentSelector};

pub struct Selectors {
    pub code_selector: SegmentSelector,
    pub data_selector: SegmentSelector,
}

lazy_static! {
    static ref GDT: (GlobalDescriptorTable, Selectors) = {
        let mut gdt = GlobalDescriptorTable::new();
        let code_selector = gdt.append(Descriptor::kernel_code_segment());
        let data_selector = gdt.append(Descriptor::kernel_data_segment());
        (
            gdt,
            Selectors {
                code_selector,
                data_selector,
            },
        )
    };
}

/// Load the GDT on the calling core and reload the segment registers.
pub fn load() {
    GDT.0.load();
    unsafe {
        CS::set_reg(GDT.1.code_selector);
        DS::set_reg(GDT.1.data_selector);
        ES::set_reg(GDT.1.data_selector);
        SS::set_reg(GDT.1.data_selector);
    }
}

/// BSP entry point.
pub fn init() {
    load();
    crate::kdebug!(
        "GDT: loaded (code {:?}, data {:?})",
        GDT.1.code_selector,
        GDT.1.data_selector
    );
}
