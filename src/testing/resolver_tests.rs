//! Resolver behavior through the partition service.

#[cfg(test)]
mod tests {
    use crate::config::PartitionConfig;
    use crate::error::Error;
    use crate::queue::{QueueDelete, QueueKey, QueueUpdate, MAIN_QUEUE_NAME};
    use crate::routing::PartitionService;
    use crate::tenant::TenantRoutingInfo;
    use crate::testing::{member, InMemoryTenantProvider};
    use crate::types::{EntityId, QueueType, TenantId, TenantProfileId};
    use proptest::prelude::*;
    use std::collections::BTreeSet;
    use std::sync::Arc;

    struct Fixture {
        service: PartitionService,
        provider: Arc<InMemoryTenantProvider>,
        tenant: TenantId,
    }

    /// A single rule-engine node with one isolated tenant that has its own
    /// main queue.
    fn fixture() -> Fixture {
        let provider = Arc::new(InMemoryTenantProvider::new());
        let tenant = TenantId::random();
        provider.insert(TenantRoutingInfo::new(tenant, TenantProfileId::random(), true));

        let service = PartitionService::new(PartitionConfig::default(), provider.clone()).unwrap();
        service
            .apply_queue_updates(&[queue(tenant, MAIN_QUEUE_NAME, "tb_rule_engine.tenant", 4, false)])
            .unwrap();
        service.recalculate(&member("node-a", &[QueueType::RuleEngine, QueueType::Core]), &[]);

        Fixture {
            service,
            provider,
            tenant,
        }
    }

    fn queue(tenant_id: TenantId, name: &str, topic: &str, partitions: u32, duplicate: bool) -> QueueUpdate {
        QueueUpdate {
            tenant_id,
            queue_name: name.to_string(),
            topic: topic.to_string(),
            partitions,
            duplicate_msg_to_all_partitions: duplicate,
        }
    }

    #[test]
    fn test_isolated_tenant_resolves_to_own_queue() {
        let f = fixture();
        let info = f
            .service
            .resolve(QueueType::RuleEngine, None, f.tenant, &EntityId::random())
            .unwrap();

        assert_eq!(info.topic, "tb_rule_engine.tenant");
        assert_eq!(info.tenant_id, Some(f.tenant));
        assert!(info.partition.unwrap() < 4);
        assert!(info.my_partition);
        assert_eq!(f.service.metrics().snapshot().queue_fallbacks, 0);
    }

    #[test]
    fn test_unknown_queue_name_falls_back_to_tenant_main_then_system_main() {
        let f = fixture();
        let entity = EntityId::random();

        let info = f
            .service
            .resolve(QueueType::RuleEngine, Some("HighPriority"), f.tenant, &entity)
            .unwrap();
        assert_eq!(info.topic, "tb_rule_engine.tenant");

        f.service.apply_queue_deletes(&[QueueDelete {
            tenant_id: f.tenant,
            queue_name: MAIN_QUEUE_NAME.to_string(),
        }]);
        let info = f
            .service
            .resolve(QueueType::RuleEngine, Some("HighPriority"), f.tenant, &entity)
            .unwrap();
        assert_eq!(info.topic, "tb_rule_engine.main");
        assert_eq!(info.tenant_id, None);

        assert_eq!(f.service.metrics().snapshot().queue_fallbacks, 2);
    }

    #[test]
    fn test_system_queue_name_fallback() {
        let f = fixture();
        f.service
            .apply_queue_updates(&[queue(TenantId::SYSTEM, "HighPriority", "tb_rule_engine.hp", 3, false)])
            .unwrap();
        let plain = TenantId::random();
        f.provider
            .insert(TenantRoutingInfo::new(plain, TenantProfileId::random(), false));

        let hp = f
            .service
            .resolve(QueueType::RuleEngine, Some("HighPriority"), plain, &EntityId::random())
            .unwrap();
        assert_eq!(hp.topic, "tb_rule_engine.hp");

        let missing = f
            .service
            .resolve(QueueType::RuleEngine, Some("Missing"), plain, &EntityId::random())
            .unwrap();
        assert_eq!(missing.topic, "tb_rule_engine.main");
    }

    #[test]
    fn test_missing_system_main_is_queue_not_found() {
        let f = fixture();
        f.service.registry().remove(&QueueKey::main(QueueType::Core));

        let err = f
            .service
            .resolve(QueueType::Core, None, TenantId::SYSTEM, &EntityId::random())
            .unwrap_err();
        assert!(matches!(err, Error::QueueNotFound(_)));
    }

    #[test]
    fn test_isolation_applies_to_rule_engine_only() {
        let f = fixture();
        let entity = EntityId::random();

        for queue_type in QueueType::ALL {
            if queue_type == QueueType::RuleEngine {
                continue;
            }
            let isolated = f.service.resolve(queue_type, None, f.tenant, &entity).unwrap();
            let system = f.service.resolve(queue_type, None, TenantId::SYSTEM, &entity).unwrap();
            assert_eq!(isolated, system, "{}", queue_type);
            assert_eq!(isolated.tenant_id, None);
        }
    }

    #[test]
    fn test_resolve_all_fans_out_duplicated_queue() {
        let f = fixture();
        f.service
            .apply_queue_updates(&[queue(TenantId::SYSTEM, "Broadcast", "tb_rule_engine.bc", 6, true)])
            .unwrap();
        let entity = EntityId::random();

        let all = f
            .service
            .resolve_all(QueueType::RuleEngine, Some("Broadcast"), TenantId::SYSTEM, &entity)
            .unwrap();
        let plain = f
            .service
            .resolve(QueueType::RuleEngine, Some("Broadcast"), TenantId::SYSTEM, &entity)
            .unwrap();

        assert_eq!(all.len(), 6);
        assert_eq!(all[0], plain);
        assert_eq!(all.iter().filter(|i| i.primary).count(), 1);
        let partitions: BTreeSet<_> = all.iter().map(|i| i.partition.unwrap()).collect();
        assert_eq!(partitions, (0..6).collect());
    }

    #[test]
    fn test_resolve_all_without_duplication_is_single() {
        let f = fixture();
        let all = f
            .service
            .resolve_all(QueueType::RuleEngine, None, f.tenant, &EntityId::random())
            .unwrap();
        assert_eq!(all.len(), 1);
        assert!(all[0].primary);
    }

    #[test]
    fn test_tenant_removal_evicts_and_refetches() {
        let f = fixture();
        f.service
            .resolve(QueueType::RuleEngine, None, f.tenant, &EntityId::random())
            .unwrap();
        let lookups = f.provider.lookups();
        f.service
            .resolve(QueueType::RuleEngine, None, f.tenant, &EntityId::random())
            .unwrap();
        assert_eq!(f.provider.lookups(), lookups);

        let removed = f.service.remove_tenant(f.tenant);
        assert_eq!(removed.len(), 3);
        assert!(f.service.tenants().is_empty());

        let info = f
            .service
            .resolve(QueueType::RuleEngine, None, f.tenant, &EntityId::random())
            .unwrap();
        assert_eq!(f.provider.lookups(), lookups + 1);
        assert_eq!(info.topic, "tb_rule_engine.main");
    }

    #[test]
    fn test_deleting_main_queue_announces_companions_lost() {
        let f = fixture();
        let mut events = f.service.notifier().subscribe_partitions_for(QueueType::RuleEngine);

        f.service.apply_queue_deletes(&[QueueDelete {
            tenant_id: f.tenant,
            queue_name: MAIN_QUEUE_NAME.to_string(),
        }]);

        let event = events.try_recv().unwrap();
        let removed: BTreeSet<_> = event.removed_keys().into_iter().cloned().collect();
        let main = QueueKey::new(QueueType::RuleEngine, MAIN_QUEUE_NAME, f.tenant);
        let mut expected: BTreeSet<_> = main.companions().into_iter().collect();
        expected.insert(main.clone());
        assert_eq!(removed, expected);
        assert_eq!(event.old_partitions[&main].len(), 4);
        assert!(events.try_recv().is_none());
    }

    #[test]
    fn test_peer_join_raises_topology_event() {
        let f = fixture();
        let mut topology = f.service.notifier().subscribe_topology();
        let this = member("node-a", &[QueueType::RuleEngine, QueueType::Core]);

        f.service.recalculate(&this, &[member("node-b", &[QueueType::VersionControl])]);

        let event = topology.try_recv().unwrap();
        assert_eq!(
            event.changed_keys,
            BTreeSet::from([QueueKey::main(QueueType::VersionControl)])
        );
        assert!(event.affects(QueueType::VersionControl));
        assert!(!event.affects(QueueType::Core));
    }

    #[test]
    fn test_is_mine_short_circuits_unknown_tenant() {
        let f = fixture();
        let stranger = TenantId::random();
        assert!(!f
            .service
            .is_mine(QueueType::RuleEngine, None, stranger, &EntityId::random()));
        assert_eq!(f.service.metrics().snapshot().tenant_not_found, 1);
    }

    proptest! {
        #[test]
        fn prop_resolve_is_in_range_and_deterministic(
            hi in any::<u64>(),
            lo in any::<u64>(),
            partitions in 1u32..64,
        ) {
            let config = PartitionConfig::default().with_partitions(QueueType::Core, partitions);
            let service = PartitionService::new(config, Arc::new(InMemoryTenantProvider::new())).unwrap();
            let entity = EntityId::new(uuid::Uuid::from_u64_pair(hi, lo));

            let first = service.resolve(QueueType::Core, None, TenantId::SYSTEM, &entity).unwrap();
            let second = service.resolve(QueueType::Core, None, TenantId::SYSTEM, &entity).unwrap();
            prop_assert!(first.partition.unwrap() < partitions);
            prop_assert_eq!(first, second);
        }
    }
}
