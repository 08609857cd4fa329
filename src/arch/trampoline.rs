//! AP trampoline image.
//!
//! The code lives in `boot/long_mode.S`, section `.ap_trampoline`; the
//! linker script brackets it with `__ap_trampoline_start/_end`. The kernel
//! is loaded at its link address, so the symbols are also the runtime
//! addresses.

use core::ptr::addr_of;
use core::slice;

extern "C" {
    static __ap_trampoline_start: u8;
    static __ap_trampoline_end: u8;
}

/// Bytes to copy to the trampoline landing page.
pub fn image() -> &'static [u8] {
    unsafe {
        let start = addr_of!(__ap_trampoline_start);
        let end = addr_of!(__ap_trampoline_end);
        let len = (end as usize).saturating_sub(start as usize);
        slice::from_raw_parts(start, len)
    }
}
