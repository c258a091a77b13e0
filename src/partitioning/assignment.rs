//! Full owner table computation.
//!
//! [`compute_assignment`] maps every partition of every registered queue to
//! its owners. It depends only on its inputs: members are sorted by service
//! id before any index-based selection, so the input order never matters.

use crate::cluster::MemberDescriptor;
use crate::error::{Error, Result};
use crate::hashing::HashFunction;
use crate::partitioning::strategy::{round_robin, single_hash_pick, LabelGroups, Strategy};
use crate::queue::{QueueKey, QueueMetadata};
use crate::tenant::TenantRoutingCache;
use crate::types::{QueueType, ServiceId, TenantProfileId};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Members eligible for tenant-profile isolated queues, as of the last
/// recomputation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponsibleMembers {
    /// Dedicated rule-engine members by profile, sorted.
    pub dedicated: BTreeMap<TenantProfileId, Vec<ServiceId>>,
    /// Rule-engine members with no dedicated profile, sorted.
    pub regular_pool: Vec<ServiceId>,
    /// All rule-engine members, sorted.
    pub rule_engine: Vec<ServiceId>,
}

impl ResponsibleMembers {
    /// Whether any member is dedicated to a profile.
    pub fn isolation_in_use(&self) -> bool {
        !self.dedicated.is_empty()
    }

    pub fn dedicated_to(&self, profile: &TenantProfileId) -> &[ServiceId] {
        self.dedicated.get(profile).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Owners of every partition of every registered queue.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Assignment {
    owners: BTreeMap<QueueKey, Vec<Vec<ServiceId>>>,
    responsible: ResponsibleMembers,
    failures: u64,
}

impl Assignment {
    /// Owners of one partition. Empty when unassigned or unknown.
    pub fn owners(&self, key: &QueueKey, partition: u32) -> &[ServiceId] {
        self.owners
            .get(key)
            .and_then(|partitions| partitions.get(partition as usize))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Per-partition owners of every key, in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&QueueKey, &[Vec<ServiceId>])> {
        self.owners.iter().map(|(k, v)| (k, v.as_slice()))
    }

    /// Partitions owned by a member, keyed by queue. Keys with no owned
    /// partition are absent.
    pub fn partitions_of(&self, service_id: &str) -> BTreeMap<QueueKey, BTreeSet<u32>> {
        let mut result = BTreeMap::new();
        for (key, partitions) in &self.owners {
            let owned: BTreeSet<u32> = partitions
                .iter()
                .enumerate()
                .filter(|(_, owners)| owners.iter().any(|id| id == service_id))
                .map(|(p, _)| p as u32)
                .collect();
            if !owned.is_empty() {
                result.insert(key.clone(), owned);
            }
        }
        result
    }

    pub fn responsible(&self) -> &ResponsibleMembers {
        &self.responsible
    }

    /// Partitions skipped because owner resolution failed.
    pub fn failures(&self) -> u64 {
        self.failures
    }
}

/// Members classified by the queue keys they are candidates for.
pub(crate) struct Candidates<'a> {
    pub(crate) per_key: HashMap<QueueKey, Vec<&'a MemberDescriptor>>,
    pub(crate) dedicated: BTreeMap<TenantProfileId, Vec<&'a MemberDescriptor>>,
    pub(crate) rule_engine: Vec<&'a MemberDescriptor>,
}

impl<'a> Candidates<'a> {
    /// A rule-engine member is a candidate for every registered rule-engine
    /// key; other types only for their system "main" key.
    pub(crate) fn classify(
        members: &[&'a MemberDescriptor],
        registry: &HashMap<QueueKey, QueueMetadata>,
    ) -> Self {
        let rule_engine_keys: Vec<&QueueKey> = registry
            .keys()
            .filter(|k| k.queue_type == QueueType::RuleEngine)
            .collect();

        let mut per_key: HashMap<QueueKey, Vec<&'a MemberDescriptor>> = HashMap::new();
        let mut dedicated: BTreeMap<TenantProfileId, Vec<&'a MemberDescriptor>> = BTreeMap::new();
        let mut rule_engine = Vec::new();

        for &member in members {
            let declared: BTreeSet<QueueType> = member.queue_types.iter().copied().collect();
            for queue_type in declared {
                if queue_type == QueueType::RuleEngine {
                    for &key in &rule_engine_keys {
                        per_key.entry(key.clone()).or_default().push(member);
                    }
                    rule_engine.push(member);
                    let profiles: BTreeSet<_> = member.assigned_tenant_profiles.iter().collect();
                    for profile in profiles {
                        dedicated.entry(*profile).or_default().push(member);
                    }
                } else {
                    let key = QueueKey::main(queue_type);
                    if registry.contains_key(&key) {
                        per_key.entry(key).or_default().push(member);
                    }
                }
            }
        }

        let by_id = |a: &&MemberDescriptor, b: &&MemberDescriptor| a.service_id.cmp(&b.service_id);
        for list in per_key.values_mut() {
            list.sort_by(by_id);
        }
        for list in dedicated.values_mut() {
            list.sort_by(by_id);
        }
        rule_engine.sort_by(by_id);

        Self {
            per_key,
            dedicated,
            rule_engine,
        }
    }

    fn candidates(&self, key: &QueueKey) -> &[&'a MemberDescriptor] {
        self.per_key.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Members a rule-engine key's partitions may be assigned to.
    fn eligible_rule_engine(
        &self,
        key: &QueueKey,
        tenants: &TenantRoutingCache,
    ) -> Result<Vec<&'a MemberDescriptor>> {
        let candidates = self.candidates(key);
        if self.dedicated.is_empty() {
            return Ok(candidates.to_vec());
        }

        let profile = if key.is_system() {
            None
        } else {
            let info = tenants
                .cached(key.tenant_id)
                .ok_or(Error::TenantNotFound(key.tenant_id))?;
            info.isolated.then_some(info.profile_id)
        };

        if let Some(dedicated) = profile.and_then(|p| self.dedicated.get(&p)) {
            if !dedicated.is_empty() {
                return Ok(dedicated.clone());
            }
        }

        Ok(candidates.iter().copied().filter(|m| !m.is_dedicated()).collect())
    }

    fn responsible(&self) -> ResponsibleMembers {
        let ids = |list: &[&MemberDescriptor]| -> Vec<ServiceId> {
            list.iter().map(|m| m.service_id.clone()).collect()
        };
        ResponsibleMembers {
            dedicated: self
                .dedicated
                .iter()
                .map(|(profile, list)| (*profile, ids(list.as_slice())))
                .collect(),
            regular_pool: self
                .rule_engine
                .iter()
                .filter(|m| !m.is_dedicated())
                .map(|m| m.service_id.clone())
                .collect(),
            rule_engine: ids(self.rule_engine.as_slice()),
        }
    }
}

/// Sort members by service id, dropping duplicate ids.
pub(crate) fn sorted_members(members: &[MemberDescriptor]) -> Vec<&MemberDescriptor> {
    let mut sorted: Vec<&MemberDescriptor> = members.iter().collect();
    sorted.sort_by(|a, b| a.service_id.cmp(&b.service_id));
    sorted.dedup_by(|a, b| a.service_id == b.service_id);
    sorted
}

/// Compute the owners of every partition of every registered queue.
///
/// A failed owner resolution leaves the affected partitions unassigned and
/// is counted in [`Assignment::failures`]; the rest of the table is still
/// computed.
///
/// Tenant routing info is only read from the cache, never loaded; warm it
/// with [`TenantRoutingCache::prefetch`] beforehand.
pub fn compute_assignment(
    members: &[MemberDescriptor],
    registry: &HashMap<QueueKey, QueueMetadata>,
    tenants: &TenantRoutingCache,
    hash: HashFunction,
) -> Assignment {
    let sorted = sorted_members(members);
    let candidates = Candidates::classify(&sorted, registry);

    let mut keys: Vec<(&QueueKey, &QueueMetadata)> = registry.iter().collect();
    keys.sort_by(|a, b| a.0.cmp(b.0));

    let mut owners = BTreeMap::new();
    let mut failures = 0u64;

    for (key, metadata) in keys {
        let partitions = metadata.partitions;
        let per_partition: Vec<Vec<ServiceId>> = match Strategy::for_queue_type(key.queue_type) {
            Strategy::SingleHashPick => match candidates.eligible_rule_engine(key, tenants) {
                Ok(eligible) => {
                    let tenant_hash = hash.hash_tenant(&key.tenant_id);
                    (0..partitions)
                        .map(|p| {
                            single_hash_pick(&eligible, p, tenant_hash)
                                .map(|m| vec![m.service_id.clone()])
                                .unwrap_or_default()
                        })
                        .collect()
                }
                Err(e) => {
                    tracing::warn!(
                        queue_key = %key,
                        partitions,
                        error = %e,
                        "Failed to resolve partition owners, leaving partitions unassigned"
                    );
                    failures += u64::from(partitions);
                    vec![Vec::new(); partitions as usize]
                }
            },
            Strategy::LabelGroup => {
                let groups = LabelGroups::new(candidates.candidates(key));
                (0..partitions)
                    .map(|p| groups.pick(p).iter().map(|m| m.service_id.clone()).collect())
                    .collect()
            }
            Strategy::RoundRobin => {
                let list = candidates.candidates(key);
                (0..partitions)
                    .map(|p| {
                        round_robin(list, p)
                            .map(|m| vec![m.service_id.clone()])
                            .unwrap_or_default()
                    })
                    .collect()
            }
        };

        tracing::trace!(queue_key = %key, owners = ?per_partition, "Resolved partition owners");
        owners.insert(key.clone(), per_partition);
    }

    Assignment {
        owners,
        responsible: candidates.responsible(),
        failures,
    }
}

/// Sorted candidate service ids per key, computed over the given members.
pub(crate) fn candidate_ids(
    members: &[MemberDescriptor],
    registry: &HashMap<QueueKey, QueueMetadata>,
) -> BTreeMap<QueueKey, Vec<ServiceId>> {
    let sorted = sorted_members(members);
    Candidates::classify(&sorted, registry)
        .per_key
        .into_iter()
        .map(|(key, list)| (key, list.iter().map(|m| m.service_id.clone()).collect()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PartitionConfig;
    use crate::queue::{QueueRegistry, QueueUpdate, MAIN_QUEUE_NAME};
    use crate::tenant::TenantRoutingInfo;
    use crate::testing::{member, InMemoryTenantProvider};
    use crate::types::TenantId;
    use std::sync::Arc;

    fn setup() -> (QueueRegistry, Arc<InMemoryTenantProvider>, TenantRoutingCache) {
        let registry = QueueRegistry::new(&PartitionConfig::default());
        let provider = Arc::new(InMemoryTenantProvider::new());
        let cache = TenantRoutingCache::new(provider.clone());
        (registry, provider, cache)
    }

    #[test]
    fn test_round_robin_over_core_members() {
        let (registry, _, tenants) = setup();
        let members = vec![
            member("core-b", &[QueueType::Core]),
            member("core-a", &[QueueType::Core]),
        ];

        let assignment = compute_assignment(
            &members,
            &registry.snapshot(),
            &tenants,
            HashFunction::default(),
        );
        let key = QueueKey::main(QueueType::Core);
        assert_eq!(assignment.owners(&key, 0), ["core-a".to_string()]);
        assert_eq!(assignment.owners(&key, 1), ["core-b".to_string()]);
        assert_eq!(assignment.partitions_of("core-a")[&key].len(), 5);
        assert!(assignment.owners(&QueueKey::main(QueueType::TaskProcessor), 0).is_empty());
    }

    #[test]
    fn test_rule_engine_member_covers_every_rule_engine_key() {
        let (registry, provider, tenants) = setup();
        let tenant = TenantId::random();
        provider.insert(TenantRoutingInfo::new(tenant, TenantProfileId::random(), true));
        registry
            .apply_updates(&[QueueUpdate {
                tenant_id: tenant,
                queue_name: MAIN_QUEUE_NAME.to_string(),
                topic: "tb_rule_engine.isolated".to_string(),
                partitions: 2,
                duplicate_msg_to_all_partitions: false,
            }])
            .unwrap();

        let members = vec![member("re-0", &[QueueType::RuleEngine])];
        let assignment =
            compute_assignment(&members, &registry.snapshot(), &tenants, HashFunction::default());

        let owned = assignment.partitions_of("re-0");
        // System main + 2 companions, tenant main + 2 companions.
        assert_eq!(owned.len(), 6);
        assert_eq!(owned[&QueueKey::new(QueueType::RuleEngine, MAIN_QUEUE_NAME, tenant)].len(), 2);
        assert_eq!(assignment.responsible().rule_engine, vec!["re-0".to_string()]);
    }

    #[test]
    fn test_unknown_tenant_leaves_partitions_unassigned() {
        let (registry, _, tenants) = setup();
        let tenant = TenantId::random();
        registry
            .apply_updates(&[QueueUpdate {
                tenant_id: tenant,
                queue_name: "HighPriority".to_string(),
                topic: "tb_rule_engine.hp".to_string(),
                partitions: 3,
                duplicate_msg_to_all_partitions: false,
            }])
            .unwrap();

        let dedicated = member("re-dedicated", &[QueueType::RuleEngine])
            .with_tenant_profiles([TenantProfileId::random()]);
        let members = vec![dedicated, member("re-shared", &[QueueType::RuleEngine])];
        let assignment =
            compute_assignment(&members, &registry.snapshot(), &tenants, HashFunction::default());

        assert_eq!(assignment.failures(), 3);
        let key = QueueKey::new(QueueType::RuleEngine, "HighPriority", tenant);
        assert!(assignment.owners(&key, 0).is_empty());
        // System queues still go to the regular pool.
        assert_eq!(
            assignment.owners(&QueueKey::main(QueueType::RuleEngine), 0),
            ["re-shared".to_string()]
        );
    }

    #[test]
    fn test_unlabeled_event_query_members_form_own_groups() {
        let (registry, _, tenants) = setup();
        let members = vec![
            member("edqs-a", &[QueueType::EventQuery]).with_label("r1"),
            member("edqs-b", &[QueueType::EventQuery]).with_label("r1"),
            member("edqs-c", &[QueueType::EventQuery]),
        ];
        let assignment =
            compute_assignment(&members, &registry.snapshot(), &tenants, HashFunction::default());

        let key = QueueKey::main(QueueType::EventQuery);
        assert_eq!(assignment.owners(&key, 0), ["edqs-c".to_string()]);
        assert_eq!(
            assignment.owners(&key, 1),
            ["edqs-a".to_string(), "edqs-b".to_string()]
        );
    }

    #[test]
    fn test_uncached_tenant_is_not_looked_up() {
        let (registry, provider, tenants) = setup();
        let tenant = TenantId::random();
        let profile = TenantProfileId::random();
        provider.insert(TenantRoutingInfo::new(tenant, profile, true));
        registry
            .apply_updates(&[QueueUpdate {
                tenant_id: tenant,
                queue_name: MAIN_QUEUE_NAME.to_string(),
                topic: "tb_rule_engine.isolated".to_string(),
                partitions: 2,
                duplicate_msg_to_all_partitions: false,
            }])
            .unwrap();
        let members = vec![
            member("re-dedicated", &[QueueType::RuleEngine]).with_tenant_profiles([profile]),
            member("re-shared", &[QueueType::RuleEngine]),
        ];
        let key = QueueKey::new(QueueType::RuleEngine, MAIN_QUEUE_NAME, tenant);

        let cold = compute_assignment(&members, &registry.snapshot(), &tenants, HashFunction::default());
        assert_eq!(provider.lookups(), 0);
        assert!(cold.owners(&key, 0).is_empty());

        tenants.prefetch([tenant]);
        let warm = compute_assignment(&members, &registry.snapshot(), &tenants, HashFunction::default());
        assert_eq!(warm.owners(&key, 0), ["re-dedicated".to_string()]);
        assert_eq!(warm.failures(), 0);
    }
}
