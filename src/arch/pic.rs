//! Legacy 8259 pair and the IMCR.

use pic8259::ChainedPics;
use spin::Mutex;
use x86_64::instructions::port::Port;

pub const PIC_1_OFFSET: u8 = 0x20;
pub const PIC_2_OFFSET: u8 = PIC_1_OFFSET + 8;

pub static PICS: Mutex<ChainedPics> =
    Mutex::new(unsafe { ChainedPics::new(PIC_1_OFFSET, PIC_2_OFFSET) });

const IMCR_SELECT: u16 = 0x22;
const IMCR_DATA: u16 = 0x23;
const IMCR_REGISTER: u8 = 0x70;
/// Route INTR/NMI through the local APIC instead of straight to the BSP.
const IMCR_APIC_MODE: u8 = 0x01;

/// Remap and mask both 8259s. With `pic_mode` the board boots with the
/// PIC wired directly to the BSP, so the IMCR is flipped to APIC mode too.
pub fn init(pic_mode: bool) {
    unsafe {
        let mut pics = PICS.lock();
        pics.initialize();
        pics.disable();
    }
    crate::kdebug!("PIC: 8259 pair remapped to {:#x} and masked", PIC_1_OFFSET);

    if pic_mode {
        unsafe {
            Port::<u8>::new(IMCR_SELECT).write(IMCR_REGISTER);
            Port::<u8>::new(IMCR_DATA).write(IMCR_APIC_MODE);
        }
        crate::kinfo!("PIC: IMCR switched to APIC mode");
    }
}
