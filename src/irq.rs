//! Interrupt routing records handed over by the MP table parser.
//!
//! Nothing programs the I/O APIC yet; the records are kept so that code
//! can look up a legacy IRQ's pin once it exists.

use alloc::vec::Vec;
use spin::Mutex;

use crate::smp::topology::RouteDest;
use crate::smp::{BusRecord, RoutingEntry, RoutingRegistrar};

pub struct RouteTable {
    buses: Vec<BusRecord>,
    routes: Vec<RoutingEntry>,
}

impl RouteTable {
    pub const fn new() -> Self {
        Self {
            buses: Vec::new(),
            routes: Vec::new(),
        }
    }

    pub fn routes(&self) -> &[RoutingEntry] {
        &self.routes
    }

    /// I/O APIC input for `irq` on the first ISA bus.
    pub fn isa_pin(&self, irq: u8) -> Option<(u8, u8)> {
        let isa = self.buses.iter().find(|bus| bus.type_name() == "ISA")?;
        self.routes.iter().find_map(|route| match route.dest {
            RouteDest::IoApic { id, pin } if route.src_bus == isa.id && route.src_irq == irq => {
                Some((id, pin))
            }
            _ => None,
        })
    }
}

impl RoutingRegistrar for RouteTable {
    fn add_bus(&mut self, bus: &BusRecord) {
        self.buses.push(*bus);
    }

    fn add_route(&mut self, route: &RoutingEntry) {
        self.routes.push(*route);
    }
}

pub static ROUTES: Mutex<RouteTable> = Mutex::new(RouteTable::new());
