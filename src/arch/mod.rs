//! x86_64 glue for the kernel
//!
//! - `gdt` / `interrupts`: descriptor tables shared by all cores
//! - `lapic`: xAPIC MMIO driver
//! - `percpu`: GS-base "this processor" pointer
//! - `pic`: 8259 masking and the IMCR
//! - `platform`: the `CpuOps`, `PhysMemory` and `ApHooks` implementations
//! - `trampoline`: the AP real-mode entry image

pub mod gdt;
pub mod interrupts;
pub mod lapic;
pub mod percpu;
pub mod pic;
pub mod platform;
pub mod trampoline;

pub use platform::{halt_loop, idle_loop};
