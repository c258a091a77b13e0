//! Hash functions used for partition math.
//!
//! Every algorithm maps a byte key to a signed 32-bit integer. Partition
//! indices are derived with [`partition_for`], which stays non-negative even
//! for `i32::MIN` (whose absolute value does not fit in an `i32`).
//!
//! | Name          | Algorithm                                   |
//! |---------------|---------------------------------------------|
//! | `murmur3_32`  | MurmurHash3 x86 32-bit, seed 0              |
//! | `murmur3_128` | MurmurHash3 x64 128-bit, seed 0, first 4 LE |
//! | `sha256`      | SHA-256, first 4 bytes little-endian        |
//! | `xxhash64`    | xxHash64, seed 0, low 32 bits               |

use crate::error::{Error, Result};
use crate::types::{EntityId, TenantId};
use sha2::{Digest, Sha256};
use std::fmt;
use std::hash::Hasher;
use std::str::FromStr;
use twox_hash::XxHash64;

/// Name of the default hash function.
pub const DEFAULT_HASH_FUNCTION: &str = "murmur3_128";

/// Selectable hash algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashFunction {
    Murmur3_32,
    Murmur3_128,
    Sha256,
    XxHash64,
}

impl HashFunction {
    /// Configuration name of this algorithm.
    pub fn name(&self) -> &'static str {
        match self {
            HashFunction::Murmur3_32 => "murmur3_32",
            HashFunction::Murmur3_128 => "murmur3_128",
            HashFunction::Sha256 => "sha256",
            HashFunction::XxHash64 => "xxhash64",
        }
    }

    /// Hash a byte key.
    pub fn hash(&self, data: &[u8]) -> i32 {
        match self {
            HashFunction::Murmur3_32 => murmur3_32(data) as i32,
            // the low 64 bits hold h1, whose low 4 bytes come first
            HashFunction::Murmur3_128 => murmur3_128(data) as u32 as i32,
            HashFunction::Sha256 => {
                let digest = Sha256::digest(data);
                i32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]])
            }
            HashFunction::XxHash64 => {
                let mut hasher = XxHash64::with_seed(0);
                hasher.write(data);
                hasher.finish() as u32 as i32
            }
        }
    }

    /// Hash an entity id.
    pub fn hash_entity(&self, entity_id: &EntityId) -> i32 {
        self.hash(&entity_id.hash_bytes())
    }

    /// Hash a tenant id.
    pub fn hash_tenant(&self, tenant_id: &TenantId) -> i32 {
        self.hash(&tenant_id.hash_bytes())
    }
}

impl Default for HashFunction {
    fn default() -> Self {
        HashFunction::Murmur3_128
    }
}

impl fmt::Display for HashFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for HashFunction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "murmur3_32" => Ok(HashFunction::Murmur3_32),
            "murmur3_128" => Ok(HashFunction::Murmur3_128),
            "sha256" => Ok(HashFunction::Sha256),
            "xxhash64" => Ok(HashFunction::XxHash64),
            other => Err(Error::Config(format!("unknown hash function: {}", other))),
        }
    }
}

// Reading from an in-memory slice cannot fail.
fn murmur3_32(mut data: &[u8]) -> u32 {
    murmur3::murmur3_32(&mut data, 0).unwrap_or_default()
}

fn murmur3_128(mut data: &[u8]) -> u128 {
    murmur3::murmur3_x64_128(&mut data, 0).unwrap_or_default()
}

/// Map a hash to a partition index in `[0, partitions)`.
///
/// Uses the unsigned absolute value, so `i32::MIN` maps to
/// `2^31 mod partitions`.
pub fn partition_for(hash: i32, partitions: u32) -> u32 {
    hash.unsigned_abs() % partitions.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_names_round_trip() {
        for function in [
            HashFunction::Murmur3_32,
            HashFunction::Murmur3_128,
            HashFunction::Sha256,
            HashFunction::XxHash64,
        ] {
            assert_eq!(function.name().parse::<HashFunction>().unwrap(), function);
        }
    }

    #[test]
    fn test_unknown_name_is_config_error() {
        let err = "md5".parse::<HashFunction>().unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_murmur3_known_vectors() {
        assert_eq!(murmur3_32(b""), 0);
        assert_eq!(murmur3_32(b"hello"), 0x248b_fa47);
        assert_eq!(HashFunction::Murmur3_32.hash(b"hello"), 0x248b_fa47);
        assert_eq!(murmur3_128(b""), 0);
        assert_eq!(murmur3_128(b"hello") as u64, 0xcbd8_a7b3_41bd_9b02);
    }

    #[test]
    fn test_murmur3_128_takes_low_bytes() {
        // h1 of "hello" is 0xcbd8a7b341bd9b02.
        assert_eq!(HashFunction::Murmur3_128.hash(b"hello"), 0x41bd_9b02);
    }

    #[test]
    fn test_sha256_takes_first_four_bytes() {
        // SHA-256("") starts with e3 b0 c4 42.
        assert_eq!(
            HashFunction::Sha256.hash(b""),
            i32::from_le_bytes([0xe3, 0xb0, 0xc4, 0x42])
        );
    }

    #[test]
    fn test_partition_for_min_value() {
        assert_eq!(partition_for(i32::MIN, 10), 8);
        assert_eq!(partition_for(i32::MIN, 1), 0);
        assert_eq!(partition_for(i32::MIN, 2), 0);
        assert_eq!(partition_for(i32::MIN, 3), 2);
    }

    #[test]
    fn test_partition_for_negative() {
        assert_eq!(partition_for(-7, 5), 2);
        assert_eq!(partition_for(7, 5), 2);
        assert_eq!(partition_for(0, 5), 0);
    }

    proptest! {
        #[test]
        fn prop_partition_in_range(hash in any::<i32>(), partitions in 1u32..512) {
            prop_assert!(partition_for(hash, partitions) < partitions);
        }

        #[test]
        fn prop_hash_is_deterministic(data in prop::collection::vec(any::<u8>(), 0..64)) {
            for function in [HashFunction::Murmur3_32, HashFunction::Murmur3_128, HashFunction::Sha256] {
                prop_assert_eq!(function.hash(&data), function.hash(&data));
            }
        }
    }
}
