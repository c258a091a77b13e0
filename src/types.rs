//! Core identifier types used throughout partition routing.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Identifier of a cluster member.
pub type ServiceId = String;

/// Encode a UUID as hash input: most significant half first, each half
/// little-endian.
pub(crate) fn uuid_hash_bytes(id: &Uuid) -> [u8; 16] {
    let (msb, lsb) = id.as_u64_pair();
    let mut bytes = [0u8; 16];
    bytes[..8].copy_from_slice(&msb.to_le_bytes());
    bytes[8..].copy_from_slice(&lsb.to_le_bytes());
    bytes
}

/// Tenant identifier.
///
/// The nil UUID is the system tenant, owner of shared queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TenantId(Uuid);

impl TenantId {
    /// The system tenant sentinel.
    pub const SYSTEM: TenantId = TenantId(Uuid::nil());

    /// Wrap a UUID.
    pub const fn new(id: Uuid) -> Self {
        Self(id)
    }

    /// Generate a random tenant id.
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Whether this is the system tenant.
    pub fn is_system(&self) -> bool {
        self.0.is_nil()
    }

    /// The underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Bytes fed to the hash function.
    pub fn hash_bytes(&self) -> [u8; 16] {
        uuid_hash_bytes(&self.0)
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a routed entity (device, asset, tenant, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(Uuid);

impl EntityId {
    /// Wrap a UUID.
    pub const fn new(id: Uuid) -> Self {
        Self(id)
    }

    /// Generate a random entity id.
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// The underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Bytes fed to the hash function.
    pub fn hash_bytes(&self) -> [u8; 16] {
        uuid_hash_bytes(&self.0)
    }
}

impl From<TenantId> for EntityId {
    fn from(tenant_id: TenantId) -> Self {
        Self(tenant_id.0)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Tenant profile identifier. Members may be dedicated to profiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TenantProfileId(Uuid);

impl TenantProfileId {
    /// Wrap a UUID.
    pub const fn new(id: Uuid) -> Self {
        Self(id)
    }

    /// Generate a random profile id.
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for TenantProfileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Logical worker category a queue belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum QueueType {
    /// Core entity processing.
    Core,
    /// Rule engine processing. The only tenant-isolatable type.
    RuleEngine,
    /// Version control executors.
    VersionControl,
    /// Event query replicas, grouped by member label.
    EventQuery,
    /// Background task processors.
    TaskProcessor,
}

impl QueueType {
    /// All queue types.
    pub const ALL: [QueueType; 5] = [
        QueueType::Core,
        QueueType::RuleEngine,
        QueueType::VersionControl,
        QueueType::EventQuery,
        QueueType::TaskProcessor,
    ];

    /// Stable configuration name.
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueType::Core => "tb-core",
            QueueType::RuleEngine => "tb-rule-engine",
            QueueType::VersionControl => "tb-vc-executor",
            QueueType::EventQuery => "edqs",
            QueueType::TaskProcessor => "tasks",
        }
    }

    /// Whether tenants may get dedicated queues of this type.
    pub fn supports_tenant_isolation(&self) -> bool {
        matches!(self, QueueType::RuleEngine)
    }
}

impl fmt::Display for QueueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueType {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        QueueType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| crate::error::Error::Config(format!("unknown queue type: {}", s)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_tenant() {
        assert!(TenantId::SYSTEM.is_system());
        assert!(!TenantId::random().is_system());
    }

    #[test]
    fn test_hash_bytes_layout() {
        let id = Uuid::from_u64_pair(0x0102030405060708, 0x1112131415161718);
        let bytes = EntityId::new(id).hash_bytes();
        assert_eq!(&bytes[..8], &[8, 7, 6, 5, 4, 3, 2, 1]);
        assert_eq!(&bytes[8..], &[0x18, 0x17, 0x16, 0x15, 0x14, 0x13, 0x12, 0x11]);
    }

    #[test]
    fn test_queue_type_names() {
        for queue_type in QueueType::ALL {
            assert_eq!(queue_type.as_str().parse::<QueueType>().unwrap(), queue_type);
        }
        assert!("nope".parse::<QueueType>().is_err());
        assert!(QueueType::RuleEngine.supports_tenant_isolation());
        assert!(!QueueType::Core.supports_tenant_isolation());
    }
}
