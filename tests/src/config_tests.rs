//! Boot configuration tests

#[cfg(test)]
mod tests {
    use crate::config::{BootConfig, MAX_BUSES, MAX_CPUS, MAX_IOAPICS};

    #[test]
    fn test_default_config() {
        let config = BootConfig::default();
        assert!(config.smp_enabled);
        assert!(!config.xcall_selftest);
        assert_eq!(config, BootConfig::new());
    }

    #[test]
    fn test_parse_empty_cmdline() {
        assert_eq!(BootConfig::parse(""), BootConfig::new());
    }

    #[test]
    fn test_parse_nosmp_and_selftest() {
        let config = BootConfig::parse("console=ttyS0 nosmp log=debug smp.selftest");
        assert!(!config.smp_enabled);
        assert!(config.xcall_selftest);
    }

    #[test]
    fn test_parse_ignores_near_misses() {
        let config = BootConfig::parse("nosmp=0 smp.selftest=1 NOSMP");
        assert!(config.smp_enabled);
        assert!(!config.xcall_selftest);
    }

    #[test]
    fn test_limits_are_usable() {
        assert!(MAX_CPUS >= 2);
        assert!(MAX_CPUS <= u64::BITS as usize);
        assert!(MAX_IOAPICS >= 1);
        assert!(MAX_BUSES >= 1);
    }
}
