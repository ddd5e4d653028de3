#[cfg(test)]
mod pool_tests {
    use std::collections::HashSet;
    use std::net::Ipv4Addr;
    use std::sync::Arc;
    use std::thread;

    use dcfabric::pool::{AsnPool, FabricPools, IpBinding, IpPairPool, IpPool, PairBinding, PoolError, PoolSettings};

    fn ip(s: &str) -> Ipv4Addr {
        s.parse().unwrap()
    }

    /// Distinct units until the pool runs dry, then Exhausted
    #[test]
    fn test_get_next_is_distinct_until_exhausted() {
        let pool = IpPool::in_memory();
        pool.populate(1, "10.3.0.0/28", "Loopback", false).unwrap();

        let mut seen = HashSet::new();
        for device in 1..=16 {
            let address = pool.get_next(1, "Loopback", IpBinding::new(device, 1)).unwrap();
            assert!(seen.insert(address), "{} handed out twice", address);
        }
        assert!(matches!(
            pool.get_next(1, "Loopback", IpBinding::new(17, 1)),
            Err(PoolError::Exhausted { fabric_id: 1, .. })
        ));
    }

    #[test]
    fn test_range_is_network_normalized() {
        let pool = IpPool::in_memory();
        pool.populate(1, "10.3.0.24/24", "Loopback", false).unwrap();
        assert_eq!(pool.get_next(1, "Loopback", IpBinding::new(1, 1)).unwrap(), ip("10.3.0.0"));
    }

    #[test]
    fn test_small_range_needs_allow_small() {
        let pool = IpPairPool::in_memory();
        assert!(matches!(
            pool.populate(1, "10.10.10.0/31", "P2P", false),
            Err(PoolError::InitializationFailed { .. })
        ));

        let pool = IpPool::in_memory();
        assert_eq!(pool.populate(1, "10.10.10.0/31", "P2P", true).unwrap(), 2);
        pool.get_next(1, "P2P", IpBinding::new(1, 1)).unwrap();
        pool.get_next(1, "P2P", IpBinding::new(2, 1)).unwrap();
        assert!(pool.get_next(1, "P2P", IpBinding::new(3, 1)).is_err());
    }

    #[test]
    fn test_get_already_allocated_is_stable() {
        let pool = AsnPool::in_memory();
        pool.populate(2, "65000-65010", "Leaf", false).unwrap();
        let asn = pool.get_next(2, "Leaf", 7).unwrap();

        for _ in 0..3 {
            assert_eq!(pool.get_already_allocated(2, "Leaf", &7).unwrap(), asn);
        }
        assert_eq!(pool.count_in_pool(2, "Leaf", &asn).unwrap(), 0);
        assert!(matches!(
            pool.get_already_allocated(2, "Leaf", &8),
            Err(PoolError::NotAllocated { .. })
        ));
    }

    #[test]
    fn test_released_unit_is_handed_out_again() {
        let pool = AsnPool::in_memory();
        pool.populate(1, "64512-64514", "Spine", false).unwrap();
        let first = pool.get_next(1, "Spine", 1).unwrap();
        pool.get_next(1, "Spine", 2).unwrap();

        pool.release(1, "Spine", &1, first).unwrap();
        assert_eq!(pool.count_in_pool(1, "Spine", &first).unwrap(), 1);
        assert_eq!(pool.get_next(1, "Spine", 3).unwrap(), first);
    }

    #[test]
    fn test_pair_lookup_from_either_end() {
        let pool = IpPairPool::in_memory();
        pool.populate(1, "10.3.0.0/29", "P2P", false).unwrap();
        let binding = PairBinding::new(4, 2, 1, 3);

        let pair = pool.get_next(1, "P2P", binding).unwrap();
        assert_eq!(pair, (ip("10.3.0.0"), ip("10.3.0.1")));

        assert_eq!(pool.get_already_allocated(1, "P2P", &binding).unwrap(), pair);
        assert_eq!(
            pool.get_already_allocated(1, "P2P", &binding.reversed()).unwrap(),
            (ip("10.3.0.1"), ip("10.3.0.0"))
        );
        // the other end may not draw a second pair for the same link
        assert!(matches!(
            pool.get_next(1, "P2P", binding.reversed()),
            Err(PoolError::BindingOccupied { .. })
        ));
    }

    #[test]
    fn test_fabrics_and_categories_are_isolated() {
        let pools = FabricPools::default();
        let settings: PoolSettings = serde_yaml::from_str(
            r#"
asn:
  - category: Spine
    range: 64512-64513
  - category: Leaf
    range: 64512-64513
"#,
        )
        .unwrap();
        pools.populate(1, &settings).unwrap();
        pools.populate(2, &settings).unwrap();

        assert_eq!(pools.asn.get_next(1, "Spine", 1).unwrap(), 64512);
        assert_eq!(pools.asn.get_next(1, "Leaf", 2).unwrap(), 64512);
        assert_eq!(pools.asn.get_next(2, "Spine", 1).unwrap(), 64512);
    }

    #[test]
    fn test_concurrent_get_next_never_collides() {
        let pool = Arc::new(IpPool::in_memory());
        pool.populate(1, "172.31.254.0/24", "Loopback", false).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|worker| {
                let pool = Arc::clone(&pool);
                thread::spawn(move || {
                    (0..32)
                        .map(|n| pool.get_next(1, "Loopback", IpBinding::new(worker * 100 + n, 1)).unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for address in handle.join().unwrap() {
                assert!(seen.insert(address), "{} handed out twice", address);
            }
        }
        assert_eq!(seen.len(), 256);
        assert!(pool.get_next(1, "Loopback", IpBinding::new(9999, 1)).is_err());
    }

    #[test]
    fn test_foreign_reservation_never_enters_pool() {
        let pool = IpPool::in_memory();
        pool.populate(1, "10.0.0.0/31", "Loopback", true).unwrap();
        let binding = IpBinding::new(1, 1);
        let foreign = ip("192.168.9.9");

        pool.reserve(1, "Loopback", binding, foreign).unwrap();
        pool.release(1, "Loopback", &binding, foreign).unwrap();
        assert_eq!(pool.count_in_pool(1, "Loopback", &foreign).unwrap(), 0);

        assert_eq!(pool.get_next(1, "Loopback", IpBinding::new(2, 1)).unwrap(), ip("10.0.0.0"));
        assert_eq!(pool.get_next(1, "Loopback", IpBinding::new(3, 1)).unwrap(), ip("10.0.0.1"));
        assert!(matches!(
            pool.get_next(1, "Loopback", IpBinding::new(4, 1)),
            Err(PoolError::Exhausted { .. })
        ));

        let pool = AsnPool::in_memory();
        pool.populate(1, "65000-65001", "Leaf", false).unwrap();
        pool.reserve(1, "Leaf", 1, 4200000000).unwrap();
        pool.release(1, "Leaf", &1, 4200000000).unwrap();
        assert_eq!(pool.count_in_pool(1, "Leaf", &4200000000).unwrap(), 0);
        assert_eq!(pool.count_in_pool(1, "Leaf", &65000).unwrap(), 1);
    }

    #[test]
    fn test_pair_pool_is_network_normalized() {
        let pool = IpPairPool::in_memory();
        pool.populate(1, "10.3.0.24/24", "P2P", false).unwrap();
        assert_eq!(
            pool.get_next(1, "P2P", PairBinding::new(1, 2, 1, 1)).unwrap(),
            (ip("10.3.0.0"), ip("10.3.0.1"))
        );
    }

    #[test]
    fn test_released_pair_is_gone_from_both_ends() {
        let pool = IpPairPool::in_memory();
        pool.populate(1, "10.3.0.0/29", "P2P", false).unwrap();
        let binding = PairBinding::new(1, 2, 5, 6);
        let pair = pool.get_next(1, "P2P", binding).unwrap();

        pool.release(1, "P2P", &binding, pair).unwrap();
        assert!(matches!(
            pool.get_already_allocated(1, "P2P", &binding),
            Err(PoolError::NotAllocated { .. })
        ));
        assert!(matches!(
            pool.get_already_allocated(1, "P2P", &binding.reversed()),
            Err(PoolError::NotAllocated { .. })
        ));
        assert_eq!(pool.count_in_pool(1, "P2P", &pair).unwrap(), 1);
    }
}
