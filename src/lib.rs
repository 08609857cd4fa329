#![no_std]
#![feature(abi_x86_interrupt)]

extern crate alloc;

pub mod allocator;
pub mod arch;
pub mod config;
pub mod irq;
pub mod logger;
pub mod selftest;
pub mod serial;
pub mod smp;
pub mod system;

use core::panic::PanicInfo;
use multiboot2::{BootInformation, BootInformationHeader};

use config::BootConfig;

pub const MULTIBOOT2_BOOTLOADER_MAGIC: u32 = 0x36d76289;

pub fn kernel_main(multiboot_info_address: u64, magic: u32) -> ! {
    // Stage 1: console and timestamps
    serial::init();
    let freq_hz = logger::init();

    if magic != MULTIBOOT2_BOOTLOADER_MAGIC {
        kpanic!("Invalid Multiboot magic value: {:#x}", magic);
    }

    let boot_info = match unsafe {
        BootInformation::load(multiboot_info_address as *const BootInformationHeader)
    } {
        Ok(info) => info,
        Err(err) => kpanic!("Invalid multiboot info structure: {:?}", err),
    };
    let cmdline = boot_info
        .command_line_tag()
        .and_then(|tag| tag.cmdline().ok())
        .unwrap_or("");

    if let Some(level) = logger::parse_level_directive(cmdline) {
        logger::set_max_level(level);
    }
    let config = BootConfig::parse(cmdline);

    kinfo!("==========================================================");
    kinfo!("mpboot kernel");
    kinfo!("==========================================================");
    kinfo!("Kernel log level set to {}", logger::max_level().as_str());
    kdebug!("Multiboot info struct at: {:#x}", multiboot_info_address);
    if logger::tsc_frequency_is_guessed() {
        kwarn!(
            "Falling back to default TSC frequency: {}.{:03} MHz",
            freq_hz / 1_000_000,
            (freq_hz % 1_000_000) / 1_000
        );
    } else {
        kinfo!(
            "Detected invariant TSC frequency: {}.{:03} MHz",
            freq_hz / 1_000_000,
            (freq_hz % 1_000_000) / 1_000
        );
    }

    // Stage 2: heap and descriptor tables
    allocator::init();
    arch::gdt::init();
    arch::interrupts::init_idt();

    // Stage 3: topology
    let sys = system::early_init();
    arch::pic::init(sys.pic_mode());
    system::init_bsp(sys);

    // Stage 4: secondaries
    if !config.smp_enabled {
        kinfo!("SMP: disabled on command line, staying on the BSP");
    } else if cfg!(feature = "smp") {
        system::bringup(sys);
    }

    x86_64::instructions::interrupts::enable();

    if config.xcall_selftest && config.smp_enabled {
        selftest::run(sys);
    }

    kinfo!("Boot complete, BSP entering idle loop");
    arch::idle_loop()
}

pub fn panic(info: &PanicInfo) -> ! {
    kpanic!("{}", info);
}

#[macro_export]
macro_rules! serial_print {
    ($($arg:tt)*) => {
        $crate::serial::_print(format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! serial_println {
    () => { $crate::serial_print!("\n") };
    ($($arg:tt)*) => {{
        $crate::serial::_print(format_args!($($arg)*));
        $crate::serial::_print(format_args!("\n"));
    }};
}

#[macro_export]
macro_rules! klog {
    ($level:expr, $($arg:tt)*) => {{
        $crate::logger::log($level, format_args!($($arg)*));
    }};
}

/// Log a fatal diagnostic and halt this processor.
#[macro_export]
macro_rules! kpanic {
    ($($arg:tt)*) => {{
        let loc = core::panic::Location::caller();

        $crate::klog!(
            $crate::logger::LogLevel::PANIC,
            "------------[ cut here ]------------"
        );

        $crate::logger::log(
            $crate::logger::LogLevel::PANIC,
            format_args!("Kernel panic - not syncing: {}", format_args!($($arg)*))
        );

        $crate::klog!(
            $crate::logger::LogLevel::PANIC,
            "CPU: {cpu} (APIC ID {apic})",
            cpu = $crate::arch::percpu::current_cpu_id(),
            apic = $crate::arch::lapic::current_apic_id(),
        );

        $crate::klog!(
            $crate::logger::LogLevel::PANIC,
            "Call Trace: <panic> at {file}:{line}:{column}",
            file = loc.file(),
            line = loc.line(),
            column = loc.column(),
        );

        $crate::klog!(
            $crate::logger::LogLevel::PANIC,
            "------------[ end Kernel panic ]------------"
        );
        $crate::arch::halt_loop()
    }};
}

#[macro_export]
macro_rules! kfatal {
    ($($arg:tt)*) => {{
        $crate::klog!($crate::logger::LogLevel::FATAL, $($arg)*);
    }};
}

#[macro_export]
macro_rules! kerror {
    ($($arg:tt)*) => {{
        $crate::klog!($crate::logger::LogLevel::ERROR, $($arg)*);
    }};
}

#[macro_export]
macro_rules! kwarn {
    ($($arg:tt)*) => {{
        $crate::klog!($crate::logger::LogLevel::WARN, $($arg)*);
    }};
}

#[macro_export]
macro_rules! kinfo {
    ($($arg:tt)*) => {{
        $crate::klog!($crate::logger::LogLevel::INFO, $($arg)*);
    }};
}

#[macro_export]
macro_rules! kdebug {
    ($($arg:tt)*) => {{
        $crate::klog!($crate::logger::LogLevel::DEBUG, $($arg)*);
    }};
}

#[macro_export]
macro_rules! ktrace {
    ($($arg:tt)*) => {{
        $crate::klog!($crate::logger::LogLevel::TRACE, $($arg)*);
    }};
}
