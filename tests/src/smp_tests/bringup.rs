//! Secondary Bring-up Tests
//!
//! The mock APIC's STARTUP hook spawns a thread that runs the AP entry
//! sequence for the addressed core, standing in for the trampoline.

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use crate::mock::apic::{ApicEvent, MockApic};
    use crate::mock::cpu::MockCpu;
    use crate::mock::hooks::{spawn_ap, MockHooks, Step};
    use crate::mock::memory::MockMemory;
    use crate::mock::mptable::{floating_pointer, small_table, MpTableBuilder};
    use crate::mock::registrar::RecordingRegistrar;
    use crate::mock::{leak, system};
    use crate::smp::bringup::{wake_ap, INIT_ASSERT_US, STARTUP_ATTEMPTS};
    use crate::smp::layout::{AP_AREA_CPU, AP_INFO_AREA, AP_TRAMPOLINE_ADDR};
    use crate::smp::{bringup_aps, early_init, ApLaunch, BringupError, CpuStatus, SystemInfo};

    const TRAMPOLINE: [u8; 8] = [0xFA, 0xFC, 0x31, 0xC0, 0x8E, 0xD8, 0xF4, 0xEB];

    fn launch() -> ApLaunch<'static> {
        ApLaunch {
            trampoline: &TRAMPOLINE,
            page_table_root: 0x0010_0000,
            entry: 0xFFFF_FFFF_8010_0000,
        }
    }

    /// Every STARTUP "boots" the addressed core, once.
    fn boot_on_startup(apic: &MockApic, sys: &'static SystemInfo, hooks: &'static MockHooks) {
        let mut started = HashSet::new();
        apic.on_startup(move |dest| {
            if !started.insert(dest) {
                return;
            }
            let core = sys
                .cpus()
                .iter()
                .find(|c| c.lapic_id == dest)
                .expect("STARTUP to a known APIC id");
            spawn_ap(sys, hooks, core.id);
        });
    }

    // =========================================================================
    // INIT / STARTUP sequence
    // =========================================================================

    #[test]
    fn test_wake_sequence_success() {
        let apic = MockApic::new(0, 4);
        let cpu = MockCpu::new();
        let result = wake_ap(&apic, &cpu, 5, 4);

        assert!(result.is_ok());
        assert_eq!(result.attempts, 1);
        assert_eq!(
            apic.events(),
            vec![
                ApicEvent::EsrClear,
                ApicEvent::Init(5),
                ApicEvent::Deassert(5),
                ApicEvent::EsrClear,
                ApicEvent::Startup(5, 0x08),
            ]
        );
        assert!(cpu.delayed_us() >= INIT_ASSERT_US);
    }

    #[test]
    fn test_wake_skips_esr_write_on_old_apic() {
        let apic = MockApic::new(0, 3);
        let result = wake_ap(&apic, &MockCpu::new(), 2, 3);
        assert!(result.is_ok());
        assert_eq!(apic.count(|e| *e == ApicEvent::EsrClear), 0);
    }

    #[test]
    fn test_wake_retries_after_esr_error() {
        let apic = MockApic::new(0, 4);
        apic.script_startup_esr(&[0x40]);
        let result = wake_ap(&apic, &MockCpu::new(), 3, 4);

        assert!(result.is_ok());
        assert_eq!(result.attempts, 2);
        assert_eq!(apic.count(|e| *e == ApicEvent::Startup(3, 0x08)), 2);
        assert_eq!(apic.count(|e| *e == ApicEvent::Init(3)), 1);
    }

    #[test]
    fn test_wake_retries_after_delivery_error() {
        let apic = MockApic::new(0, 4);
        apic.script_startup_delivery(&[0x1000]);
        let result = wake_ap(&apic, &MockCpu::new(), 3, 4);
        assert!(result.is_ok());
        assert_eq!(result.attempts, 2);
    }

    #[test]
    fn test_wake_gives_up_after_two_startups() {
        let apic = MockApic::new(0, 4);
        apic.script_startup_esr(&[0x40, 0x40, 0x40]);
        let result = wake_ap(&apic, &MockCpu::new(), 3, 4);

        assert!(!result.is_ok());
        assert_eq!(result.attempts, STARTUP_ATTEMPTS);
        assert_eq!(result.esr, 0x40);
        assert_eq!(
            apic.count(|e| matches!(e, ApicEvent::Startup(..))),
            STARTUP_ATTEMPTS as usize
        );
    }

    #[test]
    fn test_wake_masks_reserved_esr_bits() {
        // bit 4 is not a delivery error
        let apic = MockApic::new(0, 4);
        apic.script_startup_esr(&[0x10]);
        let result = wake_ap(&apic, &MockCpu::new(), 1, 4);
        assert!(result.is_ok());
        assert_eq!(result.attempts, 1);
    }

    // =========================================================================
    // Full bring-up
    // =========================================================================

    #[test]
    fn test_single_cpu_sends_nothing() {
        let sys = system(1);
        let apic = MockApic::new(0, 4);
        let mut mem = MockMemory::new();
        let status = bringup_aps(sys, &apic, &MockCpu::new(), &mut mem, &launch()).unwrap();
        assert!(status.is_ok());
        assert!(apic.events().is_empty());
        assert_eq!(mem.slice(AP_TRAMPOLINE_ADDR, 8), &[0u8; 8]);
    }

    #[test]
    fn test_bringup_from_mp_table() {
        let mut mem = MockMemory::new();
        mem.place(0xF_0000, &floating_pointer(0x9_0000, 0));
        mem.place(0x9_0000, &small_table());
        let (sys, _) = early_init(&mem, &mut RecordingRegistrar::default()).unwrap();
        let sys = leak(sys);

        let hooks = MockHooks::leaked();
        let apic = MockApic::new(0, 4);
        boot_on_startup(&apic, sys, hooks);

        let status = bringup_aps(sys, &apic, &MockCpu::new(), &mut mem, &launch()).unwrap();

        assert!(status.is_ok());
        assert_eq!(status.code(), 0);
        assert_eq!(apic.count(|e| matches!(e, ApicEvent::Init(_))), 1);
        assert_eq!(apic.count(|e| *e == ApicEvent::Init(1)), 1);
        assert_eq!(apic.count(|e| matches!(e, ApicEvent::Startup(..))), 1);

        assert_eq!(sys.booted_count(), 2);
        assert!(sys.all_booted());
        let ap = sys.cpu(1).unwrap();
        assert!(ap.is_booted());
        assert_eq!(mem.slice(AP_TRAMPOLINE_ADDR, TRAMPOLINE.len()), &TRAMPOLINE);
        assert_eq!(
            mem.u64_at(AP_INFO_AREA + AP_AREA_CPU as u64),
            ap as *const _ as u64
        );
        assert!(hooks.steps(1).contains(&Step::DiscoverTopology));
    }

    #[test]
    fn test_bringup_skips_bsp_wherever_it_is() {
        let table = MpTableBuilder::new()
            .cpu(4, 0x1)
            .cpu(0, 0x3)
            .cpu(9, 0x1)
            .build();
        let mut mem = MockMemory::new();
        mem.place(0x9_FC00, &floating_pointer(0x9_0000, 0));
        mem.place(0x9_0000, &table);
        let (sys, _) = early_init(&mem, &mut RecordingRegistrar::default()).unwrap();
        let sys = leak(sys);

        let hooks = MockHooks::leaked();
        let apic = MockApic::new(0, 4);
        boot_on_startup(&apic, sys, hooks);

        let status = bringup_aps(sys, &apic, &MockCpu::new(), &mut mem, &launch()).unwrap();
        assert!(status.is_ok());

        let inits: Vec<ApicEvent> = apic
            .events()
            .into_iter()
            .filter(|e| matches!(e, ApicEvent::Init(_)))
            .collect();
        assert_eq!(inits, vec![ApicEvent::Init(4), ApicEvent::Init(9)]);
        assert_eq!(sys.booted_count(), 3);
    }

    #[test]
    fn test_second_bsp_flag_is_woken_as_ap() {
        let table = MpTableBuilder::new().cpu(0, 0x3).cpu(1, 0x3).build();
        let mut mem = MockMemory::new();
        mem.place(0xF_0000, &floating_pointer(0x9_0000, 0));
        mem.place(0x9_0000, &table);
        let (sys, _) = early_init(&mem, &mut RecordingRegistrar::default()).unwrap();
        let sys = leak(sys);

        let hooks = MockHooks::leaked();
        let apic = MockApic::new(0, 4);
        boot_on_startup(&apic, sys, hooks);

        let status = bringup_aps(sys, &apic, &MockCpu::new(), &mut mem, &launch()).unwrap();
        assert!(status.is_ok());
        assert_eq!(apic.count(|e| matches!(e, ApicEvent::Init(_))), 1);
        assert_eq!(apic.count(|e| *e == ApicEvent::Init(1)), 1);
        assert!(sys.all_booted());
        assert_eq!(sys.cpu(1).unwrap().status(), CpuStatus::Online);
    }

    /// The per-target wait and the final wait for every core are unbounded
    /// on purpose; a core that never boots would hang this test.
    #[test]
    fn test_targets_woken_one_at_a_time() {
        let sys = system(4);
        let hooks = MockHooks::leaked();
        let apic = MockApic::new(0, 4);
        boot_on_startup(&apic, sys, hooks);
        let mut mem = MockMemory::new();

        bringup_aps(sys, &apic, &MockCpu::new(), &mut mem, &launch()).unwrap();

        // each INIT comes after the previous target's STARTUP
        let order: Vec<ApicEvent> = apic
            .events()
            .into_iter()
            .filter(|e| matches!(e, ApicEvent::Init(_) | ApicEvent::Startup(..)))
            .collect();
        assert_eq!(
            order,
            vec![
                ApicEvent::Init(1),
                ApicEvent::Startup(1, 0x08),
                ApicEvent::Init(2),
                ApicEvent::Startup(2, 0x08),
                ApicEvent::Init(3),
                ApicEvent::Startup(3, 0x08),
            ]
        );
        for id in 1..4 {
            assert!(sys.cpu(id).unwrap().is_booted());
        }
        assert!(sys.all_booted());
    }

    #[test]
    fn test_degraded_status_is_aggregated() {
        let sys = system(3);
        let hooks = MockHooks::leaked();
        let apic = MockApic::new(0, 4);
        // core 1: both STARTUPs report an illegal vector; core 2 is clean
        apic.script_startup_esr(&[0x40, 0x40, 0x00]);
        boot_on_startup(&apic, sys, hooks);
        let mut mem = MockMemory::new();

        let status = bringup_aps(sys, &apic, &MockCpu::new(), &mut mem, &launch()).unwrap();

        assert!(!status.is_ok());
        assert_eq!(status.failed, 1);
        assert_eq!(status.esr, 0x40);
        assert_eq!(status.code(), 0x40);
        // bring-up still went on to core 2 and finished
        assert!(sys.all_booted());
        assert_eq!(apic.count(|e| matches!(e, ApicEvent::Startup(2, _))), 1);
    }

    #[test]
    fn test_oversized_trampoline_aborts_before_wakeup() {
        let sys = system(2);
        let apic = MockApic::new(0, 4);
        let big = vec![0x90u8; 8192];
        let bad = ApLaunch {
            trampoline: &big,
            page_table_root: 0x0010_0000,
            entry: 0xFFFF_FFFF_8010_0000,
        };
        let res = bringup_aps(sys, &apic, &MockCpu::new(), &mut MockMemory::new(), &bad);
        assert_eq!(res, Err(BringupError::TrampolineTooLarge(8192)));
        assert!(apic.events().is_empty());
        assert_eq!(sys.cpu(1).unwrap().status(), CpuStatus::Offline);
    }
}
