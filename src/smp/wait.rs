//! Busy-wait helpers.
//!
//! Every wait in bring-up and in the xcall path is unbounded: a processor
//! that never answers stalls the waiter forever. Call sites go through the
//! named helpers below so a bounded variant only has to change this file.

use core::hint;

use super::topology::{CpuRecord, SystemInfo};
use super::xcall::XcallRequest;

/// Spin until `cond` holds.
#[inline]
pub fn spin_until(mut cond: impl FnMut() -> bool) {
    while !cond() {
        hint::spin_loop();
    }
}

/// Wait for `core` to raise its booted flag.
pub fn wait_for_booted(core: &CpuRecord) {
    spin_until(|| core.is_booted());
}

/// Wait until every processor in `sys` has counted itself booted.
pub fn wait_for_all_booted(sys: &SystemInfo) {
    spin_until(|| sys.all_booted());
}

/// Wait for the target of a blocking xcall to finish the function.
pub fn wait_for_xcall(req: &XcallRequest) {
    spin_until(|| req.is_done());
}
