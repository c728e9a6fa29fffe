//! Type fingerprints
//!
//! Every restartable value records the name of its Rust type and an xxh3
//! hash of that name. Both are written to the stream header and compared on
//! load; they are never used to pick an implementation.
//!
//! `std::any::type_name` is not guaranteed stable across compiler versions,
//! so a changed toolchain can make old checkpoints look incompatible. That is
//! the same failure mode as a renamed type and is reported the same way.

use xxhash_rust::xxh3::xxh3_64;

use crate::value::RestartableData;

/// Human-readable name of `T`
pub fn type_name_of<T: ?Sized>() -> &'static str {
    std::any::type_name::<T>()
}

/// Stable fingerprint of `T`
pub fn type_hash<T: ?Sized>() -> u64 {
    hash_type_name(type_name_of::<T>())
}

/// Fingerprint of an already-rendered type name
pub fn hash_type_name(name: &str) -> u64 {
    xxh3_64(name.as_bytes())
}

/// Fingerprint of the fixed reference type written into every stream
///
/// Two builds that disagree on this value cannot read each other's data.
pub fn reference_type_hash() -> u64 {
    type_hash::<RestartableData<u64>>()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_hash_is_deterministic() {
        assert_eq!(type_hash::<Vec<f64>>(), type_hash::<Vec<f64>>());
        assert_eq!(type_hash::<u32>(), hash_type_name("u32"));
    }

    #[test]
    fn test_type_hash_distinguishes_types() {
        assert_ne!(type_hash::<u32>(), type_hash::<i32>());
        assert_ne!(type_hash::<Vec<f64>>(), type_hash::<Vec<f32>>());
    }

    #[test]
    fn test_reference_hash_matches_reference_type() {
        assert_eq!(reference_type_hash(), type_hash::<RestartableData<u64>>());
        assert_ne!(reference_type_hash(), type_hash::<u64>());
    }
}
