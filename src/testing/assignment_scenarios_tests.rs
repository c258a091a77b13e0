//! Cluster-level assignment scenarios.
//!
//! Each scenario builds one partition service per member from the same
//! registry feed and membership view, the way independent cluster nodes do,
//! and checks the ownership they arrive at.

#[cfg(test)]
mod tests {
    use crate::cluster::MemberDescriptor;
    use crate::config::PartitionConfig;
    use crate::hashing::HashFunction;
    use crate::partitioning::compute_assignment;
    use crate::queue::{QueueKey, QueueRegistry, QueueUpdate, MAIN_QUEUE_NAME};
    use crate::routing::PartitionService;
    use crate::tenant::{TenantRoutingCache, TenantRoutingInfo};
    use crate::testing::{member, InMemoryTenantProvider};
    use crate::types::{QueueType, TenantId, TenantProfileId};
    use proptest::prelude::*;
    use std::collections::BTreeSet;
    use std::sync::Arc;

    fn isolated_queue(tenant_id: TenantId) -> QueueUpdate {
        QueueUpdate {
            tenant_id,
            queue_name: MAIN_QUEUE_NAME.to_string(),
            topic: "tb_rule_engine.isolated".to_string(),
            partitions: 10,
            duplicate_msg_to_all_partitions: false,
        }
    }

    /// One service per member, all fed the same tenants and queues.
    fn cluster(
        members: &[MemberDescriptor],
        provider: &Arc<InMemoryTenantProvider>,
        updates: &[QueueUpdate],
    ) -> Vec<PartitionService> {
        members
            .iter()
            .map(|this| {
                let service = PartitionService::new(PartitionConfig::default(), provider.clone()).unwrap();
                service.registry().apply_updates(updates).unwrap();
                let peers: Vec<_> = members.iter().filter(|m| m.service_id != this.service_id).cloned().collect();
                service.recalculate(this, &peers);
                service
            })
            .collect()
    }

    fn rule_engine_keys(service: &PartitionService) -> Vec<QueueKey> {
        service.registry().keys_of(QueueType::RuleEngine)
    }

    #[test]
    fn test_single_rule_engine_member_owns_every_rule_engine_partition() {
        let provider = Arc::new(InMemoryTenantProvider::new());
        let tenant = TenantId::random();
        provider.insert(TenantRoutingInfo::new(tenant, TenantProfileId::random(), true));

        let config = PartitionConfig::default().with_hash_function("murmur3_128");
        let service = PartitionService::new(config, provider.clone()).unwrap();
        service.registry().apply_updates(&[isolated_queue(tenant)]).unwrap();
        service.recalculate(&member("node-a", &[QueueType::RuleEngine]), &[]);

        let keys = rule_engine_keys(&service);
        assert_eq!(keys.len(), 6);
        for key in keys {
            assert_eq!(service.my_partitions(&key), (0..10).collect::<Vec<_>>(), "{}", key);
        }
    }

    #[test]
    fn test_dedicated_member_owns_its_profiles_tenant() {
        let provider = Arc::new(InMemoryTenantProvider::new());
        let profile = TenantProfileId::random();
        let tenant = TenantId::random();
        provider.insert(TenantRoutingInfo::new(tenant, profile, true));

        let members = vec![
            member("dedicated", &[QueueType::RuleEngine]).with_tenant_profiles([profile]),
            member("regular", &[QueueType::RuleEngine]),
        ];
        let services = cluster(&members, &provider, &[isolated_queue(tenant)]);
        let (dedicated, regular) = (&services[0], &services[1]);

        let tenant_main = QueueKey::new(QueueType::RuleEngine, MAIN_QUEUE_NAME, tenant);
        for key in std::iter::once(tenant_main.clone()).chain(tenant_main.companions()) {
            assert_eq!(dedicated.my_partitions(&key).len(), 10);
            assert!(regular.my_partitions(&key).is_empty());
        }

        let system_main = QueueKey::main(QueueType::RuleEngine);
        assert_eq!(regular.my_partitions(&system_main).len(), 10);
        assert!(dedicated.my_partitions(&system_main).is_empty());

        assert!(dedicated.is_managed_by_current_service(tenant));
        assert!(!regular.is_managed_by_current_service(tenant));
        assert!(regular.is_managed_by_current_service(TenantId::SYSTEM));
        assert!(!dedicated.is_managed_by_current_service(TenantId::SYSTEM));
    }

    #[test]
    fn test_isolated_tenant_without_dedicated_member_uses_regular_pool() {
        let provider = Arc::new(InMemoryTenantProvider::new());
        let tenant = TenantId::random();
        provider.insert(TenantRoutingInfo::new(tenant, TenantProfileId::random(), true));

        let members = vec![
            member("dedicated", &[QueueType::RuleEngine]).with_tenant_profiles([TenantProfileId::random()]),
            member("regular", &[QueueType::RuleEngine]),
        ];
        let services = cluster(&members, &provider, &[isolated_queue(tenant)]);

        let key = QueueKey::new(QueueType::RuleEngine, MAIN_QUEUE_NAME, tenant);
        assert!(services[0].my_partitions(&key).is_empty());
        assert_eq!(services[1].my_partitions(&key).len(), 10);
        assert!(services[1].is_managed_by_current_service(tenant));
    }

    #[test]
    fn test_empty_regular_pool_leaves_system_queues_unowned() {
        let provider = Arc::new(InMemoryTenantProvider::new());
        let members = vec![member("dedicated", &[QueueType::RuleEngine])
            .with_tenant_profiles([TenantProfileId::random()])];
        let services = cluster(&members, &provider, &[]);

        let key = QueueKey::main(QueueType::RuleEngine);
        assert!(services[0].my_partitions(&key).is_empty());
        assert!(services[0].owners(&key, 0).is_empty());
        assert_eq!(services[0].metrics().snapshot().partition_failures, 0);
    }

    #[test]
    fn test_partition_stagger_spreads_one_tenant_across_pool() {
        let provider = Arc::new(InMemoryTenantProvider::new());
        let members = vec![
            member("re-1", &[QueueType::RuleEngine]),
            member("re-2", &[QueueType::RuleEngine]),
            member("re-3", &[QueueType::RuleEngine]),
        ];
        let services = cluster(&members, &provider, &[]);

        let key = QueueKey::main(QueueType::RuleEngine);
        let counts: Vec<usize> = services.iter().map(|s| s.my_partitions(&key).len()).collect();
        assert_eq!(counts.iter().sum::<usize>(), 10);
        assert!(counts.iter().all(|&c| c == 3 || c == 4), "{:?}", counts);
    }

    #[test]
    fn test_independent_nodes_agree_on_owners() {
        let provider = Arc::new(InMemoryTenantProvider::new());
        let members = vec![
            member("core-1", &[QueueType::Core, QueueType::VersionControl]),
            member("core-2", &[QueueType::Core]),
            member("edqs-1", &[QueueType::EventQuery]).with_label("green"),
            member("edqs-2", &[QueueType::EventQuery]).with_label("blue"),
            member("edqs-3", &[QueueType::EventQuery]).with_label("blue"),
        ];
        let services = cluster(&members, &provider, &[]);

        let first = services[0].assignment();
        for service in &services[1..] {
            assert_eq!(*service.assignment(), *first);
        }

        // Round-robin and label-group queues are fully covered with no overlap
        // between single-owner partitions.
        let core = QueueKey::main(QueueType::Core);
        let owned: Vec<u32> = services.iter().flat_map(|s| s.my_partitions(&core)).collect();
        assert_eq!(owned.len(), 10);
        assert_eq!(owned.iter().collect::<BTreeSet<_>>().len(), 10);

        let edqs = QueueKey::main(QueueType::EventQuery);
        for partition in 0..12 {
            let owners = first.owners(&edqs, partition);
            let expected: &[&str] = if partition % 2 == 0 {
                &["edqs-2", "edqs-3"]
            } else {
                &["edqs-1"]
            };
            assert_eq!(owners, expected, "partition {}", partition);
        }
    }

    #[test]
    fn test_tenant_profile_change_moves_queues() {
        let provider = Arc::new(InMemoryTenantProvider::new());
        let profile = TenantProfileId::random();
        let tenant = TenantId::random();
        provider.insert(TenantRoutingInfo::new(tenant, TenantProfileId::random(), true));

        let members = vec![
            member("dedicated", &[QueueType::RuleEngine]).with_tenant_profiles([profile]),
            member("regular", &[QueueType::RuleEngine]),
        ];
        let services = cluster(&members, &provider, &[isolated_queue(tenant)]);
        let dedicated = &services[0];
        let key = QueueKey::new(QueueType::RuleEngine, MAIN_QUEUE_NAME, tenant);
        assert!(dedicated.my_partitions(&key).is_empty());

        provider.insert(TenantRoutingInfo::new(tenant, profile, true));
        dedicated.on_tenant_updated(tenant);

        assert_eq!(dedicated.my_partitions(&key).len(), 10);
    }

    fn arbitrary_members() -> impl Strategy<Value = Vec<MemberDescriptor>> {
        let types = prop::sample::subsequence(QueueType::ALL.to_vec(), 1..=QueueType::ALL.len());
        let shape = (types, prop::option::of(prop::sample::select(vec!["a", "b"])), any::<bool>());
        prop::collection::vec(shape, 0..8).prop_map(|shapes| {
            shapes
                .into_iter()
                .enumerate()
                .map(|(i, (types, label, dedicated))| {
                    let mut m = member(&format!("node-{:02}", i), &types);
                    if let Some(label) = label {
                        m = m.with_label(label);
                    }
                    if dedicated {
                        m = m.with_tenant_profiles([TenantProfileId::new(uuid::Uuid::from_u128(1))]);
                    }
                    m
                })
                .collect()
        })
    }

    proptest! {
        #[test]
        fn prop_assignment_ignores_member_order(
            members in arbitrary_members()
                .prop_flat_map(|m| (Just(m.clone()), Just(m).prop_shuffle())),
        ) {
            let (members, shuffled) = members;
            let provider = Arc::new(InMemoryTenantProvider::new());
            let config = PartitionConfig::default();
            let registry = QueueRegistry::new(&config);
            let tenants = TenantRoutingCache::new(provider);

            let a = compute_assignment(&members, &registry.snapshot(), &tenants, HashFunction::default());
            let b = compute_assignment(&shuffled, &registry.snapshot(), &tenants, HashFunction::default());
            prop_assert_eq!(a, b);
        }
    }
}
