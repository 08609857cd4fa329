//! SMP bring-up and cross-core calls
//!
//! # Module Organization
//!
//! - `mptable`: MP configuration table layouts and the parser
//! - `discovery`: floating pointer scan and `early_init`
//! - `topology`: processor / I/O APIC / bus records, built once and frozen
//! - `bringup`: INIT/STARTUP sequence run by the BSP
//! - `ap_entry`: what each secondary runs once it reaches Rust code
//! - `xcall`: per-core single-slot request queue and its IPI handler
//! - `wait`: the (unbounded) busy-waits used by all of the above
//! - `hal`: hardware interfaces implemented in `crate::arch`
//! - `layout`: fixed low-memory addresses and the AP hand-off block
//!
//! Nothing in here touches hardware. The kernel wires the real APIC,
//! memory and per-core hooks in from `crate::arch`.

pub mod ap_entry;
pub mod bringup;
pub mod discovery;
pub mod error;
pub mod hal;
pub mod layout;
pub mod mptable;
pub mod raw;
pub mod topology;
pub mod wait;
pub mod xcall;

pub use ap_entry::{ap_entry, ap_finish, ap_setup, ApContext};
pub use bringup::{bringup_aps, ApLaunch, BringupStatus, WakeResult};
pub use discovery::{early_init, find_floating_pointer};
pub use error::{ApSetupError, BringupError, DiscoveryError, TableError, XcallError};
pub use hal::{ApHooks, CpuOps, LocalApic, PhysMemory, RoutingRegistrar};
pub use mptable::{build_topology, parse_mp_table, FloatingPointer, ParseReport};
pub use topology::{
    ApicHandle, BusRecord, CpuRecord, CpuStatus, IoApicRecord, RoutingEntry, SystemInfo,
    TopologyBuilder,
};
pub use xcall::{handle_xcall, setup_xcall_bsp, xcall, XcallFn, IPI_VEC_XCALL};
