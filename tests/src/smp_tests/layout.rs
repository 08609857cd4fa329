//! AP Hand-off Layout Tests
//!
//! The trampoline reads these bytes by fixed offset, so they are checked
//! against the raw memory image rather than the struct fields.

#[cfg(test)]
mod tests {
    use crate::mock::memory::MockMemory;
    use crate::mock::system;
    use crate::smp::bringup::{install_trampoline, prepare_info_area};
    use crate::smp::layout::*;
    use crate::smp::{ApLaunch, BringupError};

    #[test]
    fn test_startup_vector_is_trampoline_page() {
        assert_eq!(trampoline_vector(), 0x08);
        assert_eq!(AP_TRAMPOLINE_ADDR & 0xFFF, 0);
        assert!(AP_TRAMPOLINE_ADDR < 0x10_0000);
    }

    #[test]
    fn test_low_memory_regions_do_not_overlap() {
        let area_end = AP_INFO_AREA + core::mem::size_of::<ApInitArea>() as u64;
        assert!(area_end <= AP_BOOT_STACK_ADDR);
        assert!(AP_BOOT_STACK_ADDR <= AP_TRAMPOLINE_ADDR);
        assert!(AP_TRAMPOLINE_ADDR + AP_TRAMPOLINE_MAX_SIZE as u64 <= BASE_MEM_LAST_KILO);
    }

    #[test]
    fn test_info_area_image() {
        let sys = system(2);
        let target = sys.cpu(1).unwrap();
        let launch = ApLaunch {
            trampoline: &[0xF4],
            page_table_root: 0x0010_1000,
            entry: 0xFFFF_8000_0012_3450,
        };
        let mut mem = MockMemory::new();
        prepare_info_area(&mut mem, target, &launch);

        let base = AP_INFO_AREA;
        assert_eq!(mem.u64_at(base + AP_AREA_STACK as u64), AP_BOOT_STACK_ADDR);
        assert_eq!(
            mem.u64_at(base + AP_AREA_CPU as u64),
            target as *const _ as u64
        );
        assert_eq!(mem.u64_at(base + 0x10), 0);
        assert_eq!(mem.u64_at(base + 0x18), GDT32_CODE);
        assert_eq!(mem.u64_at(base + 0x20), GDT32_DATA);
        assert_eq!(mem.u64_at(base + 0x28), 0);
        assert_eq!(mem.u64_at(base + 0x30), GDT64_CODE);
        assert_eq!(mem.u64_at(base + 0x38), GDT64_DATA);

        let gdt32 = base + AP_AREA_GDT32_PTR as u64;
        assert_eq!(mem.u16_at(gdt32), 23);
        assert_eq!(mem.u32_at(gdt32 + 2) as u64, base + 0x10);
        let gdt64 = base + AP_AREA_GDT64_PTR as u64;
        assert_eq!(mem.u16_at(gdt64), 23);
        assert_eq!(mem.u64_at(gdt64 + 2), base + 0x28);

        assert_eq!(mem.u64_at(base + AP_AREA_CR3 as u64), 0x0010_1000);
        assert_eq!(mem.u64_at(base + AP_AREA_ENTRY as u64), 0xFFFF_8000_0012_3450);
    }

    #[test]
    fn test_descriptor_bits() {
        // present, ring 0, code/data
        for desc in [GDT32_CODE, GDT32_DATA, GDT64_CODE, GDT64_DATA] {
            assert_ne!(desc & (1 << 47), 0);
            assert_eq!((desc >> 45) & 3, 0);
        }
        // long mode bit only on the 64-bit code segment
        assert_ne!(GDT64_CODE & (1 << 53), 0);
        assert_eq!(GDT32_CODE & (1 << 53), 0);
        // 32-bit default operand size on the protected mode code segment
        assert_ne!(GDT32_CODE & (1 << 54), 0);
    }

    #[test]
    fn test_install_trampoline() {
        let mut mem = MockMemory::new();
        let image = [0xFA, 0x31, 0xC0, 0x8E, 0xD8];
        install_trampoline(&mut mem, &image).unwrap();
        assert_eq!(mem.slice(AP_TRAMPOLINE_ADDR, image.len()), &image);
    }

    #[test]
    fn test_install_trampoline_too_large() {
        let mut mem = MockMemory::new();
        let image = vec![0x90; AP_TRAMPOLINE_MAX_SIZE + 1];
        assert_eq!(
            install_trampoline(&mut mem, &image),
            Err(BringupError::TrampolineTooLarge(AP_TRAMPOLINE_MAX_SIZE + 1))
        );
        assert!(mem.slice(AP_TRAMPOLINE_ADDR, 16).iter().all(|b| *b == 0));
    }
}
