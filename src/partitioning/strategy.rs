//! Owner selection strategies.
//!
//! Pure functions over a candidate list already sorted by service id. Every
//! node evaluating them on the same input picks the same owners.

use crate::cluster::MemberDescriptor;
use crate::types::QueueType;
use std::collections::BTreeMap;

/// How owners of a queue type's partitions are chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// One owner, staggered by the tenant hash.
    SingleHashPick,
    /// Every member of one label group.
    LabelGroup,
    /// One owner, `partition mod candidates`.
    RoundRobin,
}

impl Strategy {
    pub fn for_queue_type(queue_type: QueueType) -> Self {
        match queue_type {
            QueueType::RuleEngine => Strategy::SingleHashPick,
            QueueType::EventQuery => Strategy::LabelGroup,
            QueueType::Core | QueueType::VersionControl | QueueType::TaskProcessor => {
                Strategy::RoundRobin
            }
        }
    }
}

/// `eligible[(|tenant_hash| + partition) mod len]`.
pub fn single_hash_pick<'a>(
    eligible: &[&'a MemberDescriptor],
    partition: u32,
    tenant_hash: i32,
) -> Option<&'a MemberDescriptor> {
    if eligible.is_empty() {
        return None;
    }
    let index = (u64::from(tenant_hash.unsigned_abs()) + u64::from(partition)) % eligible.len() as u64;
    Some(eligible[index as usize])
}

/// `candidates[partition mod len]`.
pub fn round_robin<'a>(
    candidates: &[&'a MemberDescriptor],
    partition: u32,
) -> Option<&'a MemberDescriptor> {
    if candidates.is_empty() {
        return None;
    }
    Some(candidates[partition as usize % candidates.len()])
}

/// Sort key of a label group. Unlabeled members each form their own group.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum GroupKey {
    Unlabeled(String),
    Label(String),
}

/// Candidates grouped by label, groups in sorted order.
#[derive(Debug)]
pub struct LabelGroups<'a> {
    groups: Vec<Vec<&'a MemberDescriptor>>,
}

impl<'a> LabelGroups<'a> {
    pub fn new(candidates: &[&'a MemberDescriptor]) -> Self {
        let mut grouped: BTreeMap<GroupKey, Vec<&'a MemberDescriptor>> = BTreeMap::new();
        for &member in candidates {
            let key = match &member.label {
                Some(label) => GroupKey::Label(label.clone()),
                None => GroupKey::Unlabeled(member.service_id.clone()),
            };
            grouped.entry(key).or_default().push(member);
        }
        Self {
            groups: grouped.into_values().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// The group at `partition mod groups`; empty when there are no groups.
    pub fn pick(&self, partition: u32) -> &[&'a MemberDescriptor] {
        if self.groups.is_empty() {
            return &[];
        }
        &self.groups[partition as usize % self.groups.len()]
    }
}
