//! What a secondary runs once the trampoline reaches Rust
//!
//! ```text
//! Waking -> Setup -> (stack switch) -> Finishing -> Online -> idle
//! ```
//!
//! Setup failures halt the core. After the switch the core sets its booted
//! flag, counts itself, waits for every other core and only then enables
//! interrupts.

use super::hal::ApHooks;
use super::error::ApSetupError;
use super::topology::{CpuRecord, CpuStatus, SystemInfo};
use super::wait;
use super::xcall;

/// Everything the entry sequence carries across the stack switch.
pub struct ApContext<H: 'static> {
    pub sys: &'static SystemInfo,
    pub core: &'static CpuRecord,
    pub hooks: &'static H,
}

impl<H: 'static> Clone for ApContext<H> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<H: 'static> Copy for ApContext<H> {}

/// Entry point for a woken secondary. Never returns.
pub fn ap_entry<H: ApHooks>(ctx: ApContext<H>) -> ! {
    let stack_top = match ap_setup(&ctx) {
        Ok(top) => top,
        Err(err) => crate::kpanic!(
            "SMP: error setting up core {}: {}",
            ctx.core.id,
            err.as_str()
        ),
    };
    crate::kinfo!("SMP: CPU (AP) {} operational", ctx.core.id);
    ctx.hooks.switch_stack(stack_top, ctx, ap_resume::<H>)
}

/// Runs on the permanent stack.
fn ap_resume<H: ApHooks>(ctx: ApContext<H>) -> ! {
    ap_finish(&ctx);
    ctx.hooks.idle()
}

/// Local setup. Returns the top of the permanent stack to switch to.
pub fn ap_setup<H: ApHooks>(ctx: &ApContext<H>) -> Result<u64, ApSetupError> {
    let core = ctx.core;
    core.set_status(CpuStatus::Setup);

    ctx.hooks.load_tables();
    ctx.hooks.set_percpu(core);

    let apic = ctx.hooks.init_apic(core)?;
    core.attach_apic(apic);
    core.set_khz(ctx.hooks.measure_khz());

    xcall::init_queue(core);

    ctx.hooks.init_scheduler(core)?;
    ctx.hooks.alloc_stack(core)
}

/// Booted handshake and the global barrier. Returns with interrupts on.
pub fn ap_finish<H: ApHooks>(ctx: &ApContext<H>) {
    let core = ctx.core;
    core.set_status(CpuStatus::Finishing);

    ctx.hooks.init_fpu();
    ctx.hooks.discover_topology(core);

    if core.mark_booted().is_err() {
        crate::kpanic!("SMP: core {} already marked booted", core.id);
    }
    let count = ctx.sys.note_booted();
    crate::kdebug!(
        "SMP: core {} booted ({}/{})",
        core.id,
        count,
        ctx.sys.num_cpus()
    );

    wait::wait_for_all_booted(ctx.sys);

    core.set_status(CpuStatus::Online);
    ctx.hooks.enable_interrupts();
    crate::kdebug!("SMP: core {} interrupts enabled", core.id);
}
