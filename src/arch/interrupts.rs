//! IDT shared by every core.
//!
//! Built once on the BSP; each AP loads the same table during its setup.
//! Faults are fatal. The only device-style vector is the cross-core call.

use core::sync::atomic::{AtomicBool, Ordering};

use lazy_static::lazy_static;
use x86_64::structures::idt::{InterruptDescriptorTable, InterruptStackFrame, PageFaultErrorCode};

use crate::arch::lapic::{self, XApic, SPURIOUS_VECTOR};
use crate::arch::platform::X86Cpu;
use crate::smp::IPI_VEC_XCALL;

static XCALL_ENABLED: AtomicBool = AtomicBool::new(false);

lazy_static! {
    static ref IDT: InterruptDescriptorTable = {
        let mut idt = InterruptDescriptorTable::new();
        idt.breakpoint.set_handler_fn(breakpoint_handler);
        idt.divide_error.set_handler_fn(divide_error_handler);
        idt.invalid_opcode.set_handler_fn(invalid_opcode_handler);
        idt.double_fault.set_handler_fn(double_fault_handler);
        idt.general_protection_fault
            .set_handler_fn(general_protection_fault_handler);
        idt.page_fault.set_handler_fn(page_fault_handler);
        idt[IPI_VEC_XCALL].set_handler_fn(xcall_handler);
        idt[SPURIOUS_VECTOR].set_handler_fn(spurious_handler);
        idt
    };
}

/// Load the IDT on the calling core.
pub fn load() {
    IDT.load();
}

/// BSP entry point.
pub fn init_idt() {
    load();
    crate::kdebug!("IDT: loaded (xcall vector {:#x})", IPI_VEC_XCALL);
}

/// Start servicing the xcall vector. Until this runs on the BSP an xcall
/// IPI is acknowledged and dropped. Only the first call logs.
pub fn enable_xcall_dispatch() {
    if XCALL_ENABLED
        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        .is_ok()
    {
        crate::kinfo!("SMP: xcall handler live on vector {:#x}", IPI_VEC_XCALL);
    }
}

extern "x86-interrupt" fn xcall_handler(_stack_frame: InterruptStackFrame) {
    let sys = match crate::system::get() {
        Some(sys) if XCALL_ENABLED.load(Ordering::Acquire) => sys,
        _ => {
            crate::kerror!("SMP: xcall IPI before the handler was enabled");
            lapic::send_eoi();
            return;
        }
    };
    if let Err(err) = crate::smp::handle_xcall(sys, &X86Cpu, &XApic) {
        crate::ktrace!("SMP: xcall IPI dropped ({})", err.as_str());
    }
}

extern "x86-interrupt" fn spurious_handler(_stack_frame: InterruptStackFrame) {
    crate::ktrace!("LAPIC: spurious interrupt");
}

extern "x86-interrupt" fn breakpoint_handler(stack_frame: InterruptStackFrame) {
    crate::kwarn!("EXCEPTION: BREAKPOINT\n{:#?}", stack_frame);
}

extern "x86-interrupt" fn divide_error_handler(stack_frame: InterruptStackFrame) {
    crate::kpanic!("EXCEPTION: DIVIDE ERROR\n{:#?}", stack_frame);
}

extern "x86-interrupt" fn invalid_opcode_handler(stack_frame: InterruptStackFrame) {
    crate::kpanic!("EXCEPTION: INVALID OPCODE\n{:#?}", stack_frame);
}

extern "x86-interrupt" fn double_fault_handler(stack_frame: InterruptStackFrame, _code: u64) -> ! {
    crate::kpanic!("EXCEPTION: DOUBLE FAULT\n{:#?}", stack_frame);
}

extern "x86-interrupt" fn general_protection_fault_handler(stack_frame: InterruptStackFrame, code: u64) {
    crate::kpanic!(
        "EXCEPTION: GENERAL PROTECTION FAULT (code {:#x})\n{:#?}",
        code,
        stack_frame
    );
}

extern "x86-interrupt" fn page_fault_handler(stack_frame: InterruptStackFrame, code: PageFaultErrorCode) {
    let addr = x86_64::registers::control::Cr2::read_raw();
    crate::kpanic!(
        "EXCEPTION: PAGE FAULT at {:#x} ({:?})\n{:#?}",
        addr,
        code,
        stack_frame
    );
}
