//! Cross-core calls
//!
//! Every processor owns a single-slot request queue behind its core lock.
//! A caller checks the slot is free, populates a request, enqueues a
//! handle to it and raises [`IPI_VEC_XCALL`] at the target. The target's
//! handler empties the request while still holding the slot, then
//! acknowledges the interrupt and runs the function.
//!
//! A blocking call keeps its request on the caller's stack and spins until
//! the handler flags completion. A non-blocking call uses the target's
//! persistent request and returns as soon as the IPI is sent.

use core::ptr::NonNull;
use core::sync::atomic::{AtomicBool, Ordering};

use spin::Mutex;

use super::error::XcallError;
use super::hal::{without_interrupts, CpuOps, LocalApic};
use super::topology::{CpuRecord, SystemInfo};
use super::wait;

/// Interrupt vector reserved for cross-core calls.
pub const IPI_VEC_XCALL: u8 = 0xF2;

/// Function run on the target processor.
pub type XcallFn = fn(usize);

#[derive(Clone, Copy)]
struct Call {
    func: XcallFn,
    arg: usize,
}

/// One cross-core call in flight.
pub struct XcallRequest {
    call: Mutex<Option<Call>>,
    has_waiter: AtomicBool,
    done: AtomicBool,
}

impl XcallRequest {
    pub const fn new() -> Self {
        Self {
            call: Mutex::new(None),
            has_waiter: AtomicBool::new(false),
            done: AtomicBool::new(false),
        }
    }

    fn prepare(&self, func: XcallFn, arg: usize, wait: bool) {
        *self.call.lock() = Some(Call { func, arg });
        self.has_waiter.store(wait, Ordering::Relaxed);
        self.done.store(false, Ordering::Release);
    }

    fn take(&self) -> Option<Call> {
        self.call.lock().take()
    }

    pub fn has_waiter(&self) -> bool {
        self.has_waiter.load(Ordering::Acquire)
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    /// `true` while a function is stored and not yet taken by a handler.
    pub fn is_pending(&self) -> bool {
        self.call.lock().is_some()
    }

    /// Function and argument currently stored, if any.
    pub fn pending_call(&self) -> Option<(XcallFn, usize)> {
        self.call.lock().map(|call| (call.func, call.arg))
    }

    fn complete(&self) -> bool {
        self.done
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl Default for XcallRequest {
    fn default() -> Self {
        Self::new()
    }
}

/// Typed reference to a request sitting in some processor's queue.
#[derive(Clone, Copy)]
struct XcallHandle(NonNull<XcallRequest>);

// SAFETY: the pointee is Sync and outlives its stay in the queue. A
// blocking caller does not return before `done` is set, and persistent
// requests live as long as their CpuRecord.
unsafe impl Send for XcallHandle {}

impl XcallHandle {
    fn new(req: &XcallRequest) -> Self {
        Self(NonNull::from(req))
    }

    /// # Safety
    /// The request must still be alive. This holds for any handle taken
    /// from a queue, see the `Send` impl.
    unsafe fn get<'a>(self) -> &'a XcallRequest {
        self.0.as_ref()
    }
}

/// Holds at most one pending request.
pub struct XcallQueue {
    slot: Option<XcallHandle>,
}

impl XcallQueue {
    pub const fn new() -> Self {
        Self { slot: None }
    }

    pub fn is_empty(&self) -> bool {
        self.slot.is_none()
    }

    fn push(&mut self, handle: XcallHandle) {
        debug_assert!(self.slot.is_none());
        self.slot = Some(handle);
    }

    fn pop(&mut self) -> Option<XcallHandle> {
        self.slot.take()
    }
}

impl Default for XcallQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Create `core`'s request queue. Calling it again keeps the existing one.
pub fn init_queue(core: &CpuRecord) {
    let mut state = core.lock();
    if state.xcall_q.is_none() {
        state.xcall_q = Some(XcallQueue::new());
    }
    crate::kdebug!("SMP: xcall queue ready on core {}", core.id);
}

/// Set up the boot processor's side of cross-core calls.
pub fn setup_xcall_bsp(sys: &SystemInfo) -> Option<&CpuRecord> {
    let bsp = sys.bsp()?;
    crate::kinfo!("SMP: Setting up cross-core IPI event queue for BSP (core {})", bsp.id);
    init_queue(bsp);
    Some(bsp)
}

/// `true` if `core` has a request waiting for its handler.
pub fn has_pending(core: &CpuRecord) -> bool {
    core.lock()
        .xcall_q
        .as_ref()
        .map_or(false, |q| !q.is_empty())
}

/// Run `func(arg)` on processor `target`.
///
/// With `wait` the call spins until the target has run the function.
/// Without it the target's persistent request is used; a second call to
/// the same target before the first is serviced fails with
/// [`XcallError::QueueBusy`] and leaves the first one untouched.
pub fn xcall<C, A>(
    sys: &SystemInfo,
    cpu: &C,
    apic: &A,
    target: u32,
    func: XcallFn,
    arg: usize,
    wait: bool,
) -> Result<(), XcallError>
where
    C: CpuOps + ?Sized,
    A: LocalApic + ?Sized,
{
    crate::ktrace!("SMP: xcall to core {} (wait={})", target, wait);

    let Some(dest) = sys.cpu(target) else {
        crate::kerror!("SMP: Attempt to execute xcall on invalid cpu ({})", target);
        return Err(XcallError::InvalidTarget(target));
    };

    if target == cpu.current_cpu() {
        without_interrupts(cpu, || func(arg));
        return Ok(());
    }

    let local = XcallRequest::new();
    let req = if wait { &local } else { &dest.xcall_nowait };

    without_interrupts(cpu, || {
        let mut state = dest.lock();
        let Some(queue) = state.xcall_q.as_mut() else {
            return Err(XcallError::NoQueue(target));
        };
        if !queue.is_empty() {
            return Err(XcallError::QueueBusy(target));
        }
        req.prepare(func, arg, wait);
        queue.push(XcallHandle::new(req));
        Ok(())
    })
    .map_err(|err| {
        crate::kerror!("SMP: xcall to core {} failed: {}", target, err.as_str());
        err
    })?;

    apic.send_ipi(dest.dest_apic_id(), IPI_VEC_XCALL);

    if wait {
        wait::wait_for_xcall(req);
    }
    Ok(())
}

/// Service the calling processor's pending request. Runs from the
/// [`IPI_VEC_XCALL`] interrupt handler.
pub fn handle_xcall<C, A>(sys: &SystemInfo, cpu: &C, apic: &A) -> Result<(), XcallError>
where
    C: CpuOps + ?Sized,
    A: LocalApic + ?Sized,
{
    let me = cpu.current_cpu();

    // The request is emptied before the slot is released, so a caller that
    // finds the queue free never overwrites a call not yet taken.
    let taken = match sys.cpu(me) {
        None => Err(XcallError::InvalidTarget(me)),
        Some(core) => {
            let mut state = core.lock();
            match state.xcall_q.as_mut() {
                None => Err(XcallError::NoQueue(me)),
                Some(queue) => queue.pop().ok_or(XcallError::NoRequest(me)).map(|handle| {
                    // SAFETY: handle came out of a queue.
                    let req = unsafe { handle.get() };
                    (req, req.take(), req.has_waiter())
                }),
            }
        }
    };

    let (req, call, has_waiter) = match taken {
        Ok((req, Some(call), has_waiter)) => (req, call, has_waiter),
        Ok((_, None, _)) => {
            crate::kerror!("SMP: No function in xcall request on core {}", me);
            apic.eoi();
            return Err(XcallError::NoRequest(me));
        }
        Err(err) => {
            crate::kerror!("SMP: xcall handler on core {}: {}", me, err.as_str());
            apic.eoi();
            return Err(err);
        }
    };

    // The function may block on another core's IPI; ack first.
    apic.eoi();

    (call.func)(call.arg);

    if has_waiter && !req.complete() {
        crate::kerror!("SMP: xcall request on core {} completed twice", me);
    }
    Ok(())
}
