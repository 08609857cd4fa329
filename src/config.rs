//! Kernel configuration
//!
//! Compile-time limits used to size the topology store, plus the runtime
//! options read from the boot command line.

/// Maximum number of processors the topology store accepts.
pub const MAX_CPUS: usize = 64;

/// Maximum number of I/O APICs the topology store accepts.
pub const MAX_IOAPICS: usize = 16;

/// Maximum number of bus records kept for later interrupt routing.
pub const MAX_BUSES: usize = 64;

/// Size of the kernel heap arena (topology records, AP stacks).
pub const KERNEL_HEAP_SIZE: usize = 4 * 1024 * 1024;

/// Stack handed to each secondary once it leaves the shared boot stack.
pub const AP_STACK_SIZE: usize = 16 * 4096;

/// Options taken from the boot command line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BootConfig {
    /// Wake the secondary processors (`nosmp` clears it).
    pub smp_enabled: bool,
    /// Exercise the cross-core call path once every core is up.
    pub xcall_selftest: bool,
}

impl BootConfig {
    pub const fn new() -> Self {
        Self {
            smp_enabled: true,
            xcall_selftest: false,
        }
    }

    /// Parse whitespace separated boot arguments. Unknown words are ignored
    /// so the same command line can carry options for other subsystems.
    pub fn parse(cmdline: &str) -> Self {
        let mut config = Self::new();
        for arg in cmdline.split_whitespace() {
            match arg {
                "nosmp" => config.smp_enabled = false,
                "smp.selftest" => config.xcall_selftest = true,
                _ => {}
            }
        }
        config
    }
}

impl Default for BootConfig {
    fn default() -> Self {
        Self::new()
    }
}
