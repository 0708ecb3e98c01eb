//! Unit tests for the fixed-IP allocation engine
//!
//! The engine runs against the in-memory record store and the mock pool
//! allocator, so every state transition and partial-failure window is
//! observable without external services.

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use barrel_store::{MemoryStore, Store, StoreRecord, Versioned};

    use crate::engine::FixedIpAllocator;
    use crate::error::AllocatorError;
    use crate::mock::MockPoolAllocator;
    use crate::model::{Container, ContainerRecord, Ip, IpRecord, IpStatus};
    use crate::pool::Pool;

    fn test_pool(pool_id: &str, cidr: &str) -> Pool {
        Pool {
            cidr: cidr.to_string(),
            pool_id: pool_id.to_string(),
            gateway: "10.10.10.1".to_string(),
        }
    }

    fn test_ip() -> Ip {
        Ip::new("poolID", "10.10.10.10")
    }

    /// Engine over a shared in-memory backend and mock pool; handles to
    /// both are returned for setup and assertions.
    fn setup() -> (MemoryStore, MockPoolAllocator, FixedIpAllocator) {
        let backend = MemoryStore::new();
        let pool = MockPoolAllocator::new();
        pool.add_pool(test_pool("poolID", "10.10.10.0/24"));
        let engine = FixedIpAllocator::new(
            Store::new(Arc::new(backend.clone())),
            Arc::new(pool.clone()),
        );
        (backend, pool, engine)
    }

    async fn read_record(backend: &MemoryStore, ip: &Ip) -> Versioned<IpRecord> {
        Store::new(Arc::new(backend.clone()))
            .get::<IpRecord>(&ip.record_key())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_alloc_assign_then_realloc_conflicts() {
        let (_, _, engine) = setup();
        let ip = test_ip();

        engine.alloc_fixed_ip(&ip).await.unwrap();
        engine.assign_fixed_ip(&ip).await.unwrap();

        assert!(matches!(
            engine.alloc_fixed_ip(&ip).await,
            Err(AllocatorError::IpInUse(_))
        ));
    }

    #[tokio::test]
    async fn test_full_lifecycle_returns_to_unallocated() {
        let (backend, _, engine) = setup();
        let ip = test_ip();

        engine.alloc_fixed_ip(&ip).await.unwrap();
        engine.assign_fixed_ip(&ip).await.unwrap();
        engine.unassign_fixed_ip(&ip).await.unwrap();
        engine.unalloc_fixed_ip(&ip, false).await.unwrap();

        assert!(!backend.contains_key(&ip.record_key()));
        assert!(matches!(
            engine.assign_fixed_ip(&ip).await,
            Err(AllocatorError::FixedIpNotAllocated(_))
        ));
    }

    #[tokio::test]
    async fn test_alloc_is_idempotent_while_free() {
        let (_, pool, engine) = setup();
        let ip = test_ip();

        engine.alloc_fixed_ip(&ip).await.unwrap();
        engine.alloc_fixed_ip(&ip).await.unwrap();

        // The second call never reaches the pool allocator.
        assert!(pool.is_allocated(&ip));
        assert_eq!(pool.allocated_count(), 1);
    }

    #[tokio::test]
    async fn test_alloc_in_use_leaves_record_untouched() {
        let (backend, _, engine) = setup();
        let ip = test_ip();

        engine.alloc_fixed_ip(&ip).await.unwrap();
        engine.assign_fixed_ip(&ip).await.unwrap();
        let before = read_record(&backend, &ip).await;

        assert!(matches!(
            engine.alloc_fixed_ip(&ip).await,
            Err(AllocatorError::IpInUse(_))
        ));
        let after = read_record(&backend, &ip).await;
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_alloc_record_write_failure_leaks_pool_address() {
        let (backend, pool, engine) = setup();
        let ip = test_ip();
        backend.fail_puts_on(ip.record_key());

        assert!(matches!(
            engine.alloc_fixed_ip(&ip).await,
            Err(AllocatorError::Store(_))
        ));

        // The raw address stays reserved pool-side with no record: the
        // documented leak window.
        assert!(pool.is_allocated(&ip));
        assert!(!backend.contains_key(&ip.record_key()));
    }

    #[tokio::test]
    async fn test_assign_mutual_exclusion_under_concurrency() {
        let (_, _, engine) = setup();
        let ip = test_ip();
        engine.alloc_fixed_ip(&ip).await.unwrap();

        let engine = Arc::new(engine);
        let mut handles = Vec::new();
        for _ in 0..8 {
            let engine = Arc::clone(&engine);
            let ip = ip.clone();
            handles.push(tokio::spawn(
                async move { engine.assign_fixed_ip(&ip).await },
            ));
        }

        let mut successes = 0;
        let mut conflicts = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(()) => successes += 1,
                Err(AllocatorError::IpInUse(_)) => conflicts += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!(successes, 1);
        assert_eq!(conflicts, 7);
    }

    #[tokio::test]
    async fn test_assign_lost_race_maps_to_in_use() {
        let (backend, _, engine) = setup();
        let ip = test_ip();
        engine.alloc_fixed_ip(&ip).await.unwrap();

        // A concurrent writer bumps the version between read and write,
        // so the single conditional write loses.
        backend.contend_on(ip.record_key());
        assert!(matches!(
            engine.assign_fixed_ip(&ip).await,
            Err(AllocatorError::IpInUse(_))
        ));
    }

    #[tokio::test]
    async fn test_unassign_is_idempotent() {
        let (_, _, engine) = setup();
        let ip = test_ip();

        engine.alloc_fixed_ip(&ip).await.unwrap();
        engine.assign_fixed_ip(&ip).await.unwrap();

        engine.unassign_fixed_ip(&ip).await.unwrap();
        engine.unassign_fixed_ip(&ip).await.unwrap();

        // Unassign never deletes the record.
        assert!(matches!(engine.assign_fixed_ip(&ip).await, Ok(())));
    }

    #[tokio::test]
    async fn test_borrower_gates_unalloc() {
        let (_, _, engine) = setup();
        let ip = test_ip();
        let c1 = Container::new("c1", "dev-1");

        engine.alloc_fixed_ip(&ip).await.unwrap();
        engine.borrow_fixed_ip(&ip, c1.clone()).await.unwrap();

        assert!(matches!(
            engine.unalloc_fixed_ip(&ip, false).await,
            Err(AllocatorError::FixedIpHasBorrower(_))
        ));

        engine.return_fixed_ip(&ip, &c1).await.unwrap();
        engine.unalloc_fixed_ip(&ip, false).await.unwrap();
    }

    #[tokio::test]
    async fn test_two_borrowers_both_must_return() {
        let (_, _, engine) = setup();
        let ip = test_ip();
        let c1 = Container::new("c1", "dev-1");
        let c2 = Container::new("c2", "dev-2");

        engine.alloc_fixed_ip(&ip).await.unwrap();
        engine.borrow_fixed_ip(&ip, c1.clone()).await.unwrap();
        engine.borrow_fixed_ip(&ip, c2.clone()).await.unwrap();

        engine.return_fixed_ip(&ip, &c1).await.unwrap();
        assert!(matches!(
            engine.unalloc_fixed_ip(&ip, false).await,
            Err(AllocatorError::FixedIpHasBorrower(_))
        ));

        engine.return_fixed_ip(&ip, &c2).await.unwrap();
        engine.unalloc_fixed_ip(&ip, false).await.unwrap();
    }

    #[tokio::test]
    async fn test_duplicate_borrows_return_together() {
        let (backend, _, engine) = setup();
        let ip = test_ip();
        let c1 = Container::new("c1", "dev-1");

        engine.alloc_fixed_ip(&ip).await.unwrap();
        engine.borrow_fixed_ip(&ip, c1.clone()).await.unwrap();
        engine.borrow_fixed_ip(&ip, c1.clone()).await.unwrap();

        // Borrowing twice keeps two equal entries.
        let record = read_record(&backend, &ip).await.record;
        assert_eq!(record.borrowers, vec![c1.clone(), c1.clone()]);

        // One return removes all equal entries at once.
        engine.return_fixed_ip(&ip, &c1).await.unwrap();
        let record = read_record(&backend, &ip).await.record;
        assert!(record.borrowers.is_empty());
    }

    #[tokio::test]
    async fn test_return_without_borrow_is_noop() {
        let (_, _, engine) = setup();
        let ip = test_ip();
        engine.alloc_fixed_ip(&ip).await.unwrap();

        engine
            .return_fixed_ip(&ip, &Container::new("c1", "dev-1"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_borrow_exhausts_bounded_retries_under_contention() {
        let (backend, _, engine) = setup();
        let ip = test_ip();
        engine.alloc_fixed_ip(&ip).await.unwrap();
        backend.contend_on(ip.record_key());

        assert!(matches!(
            engine
                .borrow_fixed_ip(&ip, Container::new("c1", "dev-1"))
                .await,
            Err(AllocatorError::MaxRetryCountExceeded(_))
        ));
    }

    #[tokio::test]
    async fn test_unalloc_refused_while_in_use() {
        let (_, _, engine) = setup();
        let ip = test_ip();

        engine.alloc_fixed_ip(&ip).await.unwrap();
        engine.assign_fixed_ip(&ip).await.unwrap();

        assert!(matches!(
            engine.unalloc_fixed_ip(&ip, false).await,
            Err(AllocatorError::IpInUse(_))
        ));
        assert!(matches!(
            engine.unalloc_fixed_ip(&ip, true).await,
            Err(AllocatorError::IpInUse(_))
        ));
    }

    #[tokio::test]
    async fn test_force_unalloc_overrides_borrowers() {
        let (backend, _, engine) = setup();
        let ip = test_ip();

        engine.alloc_fixed_ip(&ip).await.unwrap();
        engine
            .borrow_fixed_ip(&ip, Container::new("c1", "dev-1"))
            .await
            .unwrap();

        engine.unalloc_fixed_ip(&ip, true).await.unwrap();
        assert!(!backend.contains_key(&ip.record_key()));
    }

    #[tokio::test]
    async fn test_tombstone_blocks_assign_and_alloc() {
        let (backend, _, engine) = setup();
        let ip = test_ip();

        // A record mid-unalloc: tombstoned but not yet deleted.
        let mut record = IpRecord::new(ip.clone());
        record.status.insert(IpStatus::IN_USE | IpStatus::RETIRED);
        Store::new(Arc::new(backend.clone()))
            .put(&record)
            .await
            .unwrap();

        assert!(matches!(
            engine.assign_fixed_ip(&ip).await,
            Err(AllocatorError::IpInUse(_))
        ));
        assert!(matches!(
            engine.alloc_fixed_ip(&ip).await,
            Err(AllocatorError::IpInUse(_))
        ));
    }

    #[tokio::test]
    async fn test_unalloc_release_failure_leaves_record_deleted() {
        let (backend, pool, engine) = setup();
        let ip = test_ip();

        engine.alloc_fixed_ip(&ip).await.unwrap();
        pool.fail_release_of(&ip);

        // The release error is surfaced; the record is already gone and
        // is not recreated to compensate.
        assert!(matches!(
            engine.unalloc_fixed_ip(&ip, false).await,
            Err(AllocatorError::Pool(_))
        ));
        assert!(!backend.contains_key(&ip.record_key()));
        assert!(pool.is_allocated(&ip));
    }

    #[tokio::test]
    async fn test_operations_on_missing_record_report_not_allocated() {
        let (_, _, engine) = setup();
        let ip = test_ip();
        let c1 = Container::new("c1", "dev-1");

        assert!(matches!(
            engine.assign_fixed_ip(&ip).await,
            Err(AllocatorError::FixedIpNotAllocated(_))
        ));
        assert!(matches!(
            engine.unassign_fixed_ip(&ip).await,
            Err(AllocatorError::FixedIpNotAllocated(_))
        ));
        assert!(matches!(
            engine.borrow_fixed_ip(&ip, c1.clone()).await,
            Err(AllocatorError::FixedIpNotAllocated(_))
        ));
        assert!(matches!(
            engine.return_fixed_ip(&ip, &c1).await,
            Err(AllocatorError::FixedIpNotAllocated(_))
        ));
        assert!(matches!(
            engine.unalloc_fixed_ip(&ip, false).await,
            Err(AllocatorError::FixedIpNotAllocated(_))
        ));
    }

    #[tokio::test]
    async fn test_alloc_from_pools_first_success_wins() {
        let (backend, pool, engine) = setup();
        pool.add_pool(test_pool("pool-a", "10.0.1.0/24"));
        pool.add_pool(test_pool("pool-b", "10.0.2.0/24"));
        pool.set_available("pool-b", vec!["10.0.2.5".to_string()]);

        let candidates = vec![
            test_pool("pool-a", "10.0.1.0/24"),
            test_pool("pool-b", "10.0.2.0/24"),
        ];
        let ip = engine.alloc_fixed_ip_from_pools(&candidates).await.unwrap();

        assert_eq!(ip, Ip::new("pool-b", "10.0.2.5"));
        assert!(backend.contains_key(&ip.record_key()));
    }

    #[tokio::test]
    async fn test_alloc_from_pools_exhaustion_names_pools_tried() {
        let (_, pool, engine) = setup();
        pool.add_pool(test_pool("pool-a", "10.0.1.0/24"));
        pool.add_pool(test_pool("pool-b", "10.0.2.0/24"));

        let candidates = vec![
            test_pool("pool-a", "10.0.1.0/24"),
            test_pool("pool-b", "10.0.2.0/24"),
        ];
        match engine.alloc_fixed_ip_from_pools(&candidates).await {
            Err(AllocatorError::PoolsExhausted(tried)) => {
                assert_eq!(tried, vec!["pool-a".to_string(), "pool-b".to_string()]);
            }
            other => panic!("expected PoolsExhausted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_alloc_from_pools_releases_address_on_write_failure() {
        let (backend, pool, engine) = setup();
        pool.add_pool(test_pool("pool-b", "10.0.2.0/24"));
        pool.set_available("pool-b", vec!["10.0.2.5".to_string()]);
        let expected = Ip::new("pool-b", "10.0.2.5");
        backend.fail_puts_on(expected.record_key());

        let candidates = vec![test_pool("pool-b", "10.0.2.0/24")];
        assert!(matches!(
            engine.alloc_fixed_ip_from_pools(&candidates).await,
            Err(AllocatorError::Store(_))
        ));

        // Best-effort release put the address back.
        assert!(!pool.is_allocated(&expected));
    }

    #[tokio::test]
    async fn test_container_records_batch_write() {
        let (backend, _, _) = setup();
        let store = Store::new(Arc::new(backend.clone()));

        let records: Vec<ContainerRecord> = (0..3)
            .map(|i| ContainerRecord::new(Container::new(format!("c{i}"), "dev-1")))
            .collect();
        store.put_multi(&records).await.unwrap();

        for record in &records {
            assert!(backend.contains_key(&record.key()));
        }
    }
}
