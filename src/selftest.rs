//! `smp.selftest`: exercise the xcall path once every core is up.

use core::sync::atomic::{AtomicU32, Ordering};

use crate::smp::wait::spin_until;
use crate::smp::SystemInfo;

static HITS: AtomicU32 = AtomicU32::new(0);

fn ping(arg: usize) {
    HITS.fetch_add(1, Ordering::AcqRel);
    crate::kdebug!(
        "SMP: selftest ping {:#x} on core {}",
        arg,
        crate::arch::percpu::current_cpu_id()
    );
}

pub fn run(sys: &SystemInfo) {
    crate::kinfo!("SMP: xcall selftest on {} cores", sys.num_cpus());
    let me = crate::arch::percpu::current_cpu_id();
    let mut expected = 0;

    for core in sys.cpus() {
        match crate::system::xcall(core.id, ping, 0x5a00 | core.id as usize, true) {
            Ok(()) => expected += 1,
            Err(err) => crate::kerror!("SMP: blocking xcall to {} failed: {}", core.id, err.as_str()),
        }
    }
    for core in sys.cpus().iter().filter(|core| core.id != me) {
        match crate::system::xcall(core.id, ping, 0xa500 | core.id as usize, false) {
            Ok(()) => expected += 1,
            Err(err) => crate::kerror!("SMP: async xcall to {} failed: {}", core.id, err.as_str()),
        }
    }

    spin_until(|| HITS.load(Ordering::Acquire) >= expected);
    crate::kinfo!("SMP: xcall selftest passed ({} calls)", expected);
}
