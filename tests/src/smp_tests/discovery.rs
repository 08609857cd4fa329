//! MP Floating Pointer Discovery Tests

#[cfg(test)]
mod tests {
    use crate::mock::memory::MockMemory;
    use crate::mock::mptable::{floating_pointer, small_table, MpTableBuilder};
    use crate::mock::registrar::RecordingRegistrar;
    use crate::smp::discovery::{read_floating_pointer, scan_window};
    use crate::smp::layout::{BASE_MEM_LAST_KILO, BIOS_ROM_BASE, BIOS_ROM_END};
    use crate::smp::{early_init, find_floating_pointer, DiscoveryError, TableError};

    const TABLE_ADDR: u64 = 0x9_0000;

    fn memory_with(fp_addr: u64, fp: &[u8]) -> MockMemory {
        let mut mem = MockMemory::new();
        mem.place(fp_addr, fp);
        mem
    }

    // =========================================================================
    // Scan windows
    // =========================================================================

    #[test]
    fn test_not_found_in_empty_memory() {
        let mem = MockMemory::new();
        assert_eq!(find_floating_pointer(&mem), None);
        assert_eq!(
            early_init(&mem, &mut RecordingRegistrar::default()).err(),
            Some(DiscoveryError::NotFound)
        );
    }

    #[test]
    fn test_found_in_last_kilobyte_window() {
        let addr = BASE_MEM_LAST_KILO + 0x40;
        let mem = memory_with(addr, &floating_pointer(TABLE_ADDR as u32, 0));
        assert_eq!(find_floating_pointer(&mem), Some(addr));
    }

    #[test]
    fn test_found_in_bios_rom() {
        let addr = BIOS_ROM_BASE + 0x5A30;
        let mem = memory_with(addr, &floating_pointer(TABLE_ADDR as u32, 0));
        assert_eq!(find_floating_pointer(&mem), Some(addr));
    }

    #[test]
    fn test_low_window_wins_over_bios_rom() {
        let low = BASE_MEM_LAST_KILO + 0x100;
        let rom = BIOS_ROM_BASE + 0x100;
        let mut mem = memory_with(rom, &floating_pointer(TABLE_ADDR as u32, 0));
        mem.place(low, &floating_pointer(TABLE_ADDR as u32, 0));
        assert_eq!(find_floating_pointer(&mem), Some(low));
    }

    #[test]
    fn test_last_slot_of_rom_is_scanned() {
        let addr = BIOS_ROM_END - 16;
        let mem = memory_with(addr, &floating_pointer(TABLE_ADDR as u32, 0));
        assert_eq!(find_floating_pointer(&mem), Some(addr));
    }

    #[test]
    fn test_scan_steps_by_four() {
        // signature at an offset that is not a multiple of 4 is skipped
        let mut mem = MockMemory::new();
        mem.place(BIOS_ROM_BASE + 0x102, b"_MP_");
        assert_eq!(scan_window(&mem, BIOS_ROM_BASE, BIOS_ROM_END), None);
    }

    #[test]
    fn test_signature_outside_windows_ignored() {
        let mem = memory_with(0x8_0000, &floating_pointer(TABLE_ADDR as u32, 0));
        assert_eq!(find_floating_pointer(&mem), None);
    }

    #[test]
    fn test_scan_window_unbacked() {
        let mem = MockMemory::new();
        assert_eq!(scan_window(&mem, BIOS_ROM_END, BIOS_ROM_END + 0x1000), None);
        assert_eq!(scan_window(&mem, BIOS_ROM_END, BIOS_ROM_BASE), None);
    }

    // =========================================================================
    // early_init
    // =========================================================================

    #[test]
    fn test_early_init_end_to_end() {
        let mut mem = memory_with(BIOS_ROM_BASE + 0x10, &floating_pointer(TABLE_ADDR as u32, 0x80));
        mem.place(TABLE_ADDR, &small_table());
        let mut reg = RecordingRegistrar::default();

        let (sys, report) = early_init(&mem, &mut reg).unwrap();
        assert!(report.checksum_ok);
        assert_eq!(sys.num_cpus(), 2);
        assert_eq!(sys.num_ioapics(), 1);
        assert!(sys.pic_mode());
        assert_eq!(reg.buses.len(), 1);
    }

    #[test]
    fn test_floating_pointer_bad_checksum_continues() {
        let mut fp = floating_pointer(TABLE_ADDR as u32, 0);
        fp[10] = fp[10].wrapping_add(1);
        let mut mem = memory_with(BIOS_ROM_BASE, &fp);
        mem.place(TABLE_ADDR, &small_table());

        let decoded = read_floating_pointer(&mem, BIOS_ROM_BASE).unwrap();
        assert!(!decoded.checksum_ok);
        let (sys, _) = early_init(&mem, &mut RecordingRegistrar::default()).unwrap();
        assert_eq!(sys.num_cpus(), 2);
    }

    #[test]
    fn test_default_configuration_rejected() {
        let mem = memory_with(BIOS_ROM_BASE, &floating_pointer(0, 0));
        assert_eq!(
            early_init(&mem, &mut RecordingRegistrar::default()).err(),
            Some(DiscoveryError::NoTable)
        );
    }

    #[test]
    fn test_table_address_unreadable() {
        let mem = memory_with(BIOS_ROM_BASE, &floating_pointer(0xFEC0_0000, 0));
        assert_eq!(
            early_init(&mem, &mut RecordingRegistrar::default()).err(),
            Some(DiscoveryError::Unreadable(0xFEC0_0000))
        );
    }

    #[test]
    fn test_declared_length_past_memory() {
        // header at the very end of low memory claims more bytes than exist
        let addr = (crate::mock::memory::LOW_MEMORY_SIZE - 44) as u64;
        let mut table = MpTableBuilder::new().build();
        table[4..6].copy_from_slice(&200u16.to_le_bytes());
        let mut mem = memory_with(BASE_MEM_LAST_KILO, &floating_pointer(addr as u32, 0));
        mem.place(addr, &table);
        assert_eq!(
            early_init(&mem, &mut RecordingRegistrar::default()).err(),
            Some(DiscoveryError::Unreadable(addr))
        );
    }

    #[test]
    fn test_malformed_table_is_reported() {
        let table = MpTableBuilder::new().cpu(0, 0x3).raw_entry(&[5; 8]).build();
        let mut mem = memory_with(BIOS_ROM_BASE, &floating_pointer(TABLE_ADDR as u32, 0));
        mem.place(TABLE_ADDR, &table);
        assert_eq!(
            early_init(&mem, &mut RecordingRegistrar::default()).err(),
            Some(DiscoveryError::Table(TableError::UnknownEntry { offset: 64, kind: 5 }))
        );
    }
}
