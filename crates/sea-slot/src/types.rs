//! Type tags: a 32-bit FNV-1a hash of a type's canonical name, plus a
//! registry mapping tags back to `{name, size}` for `write`/`read` bounds
//! checks.

use std::any::type_name;
use std::collections::HashMap;

use parking_lot::RwLock;

/// End of the reserved range for built-in primitive tags; user types are
/// assigned tags at or above this value.
pub const USER_TAG_BASE: u32 = 0x1000;

pub const TAG_I64: u32 = 0x0001;
pub const TAG_F64: u32 = 0x0002;
pub const TAG_BOOL: u32 = 0x0003;
pub const TAG_BYTES: u32 = 0x0004;

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// FNV-1a over a type's `core::any::type_name`, folded into the user tag
/// range so primitive tags (reserved below [`USER_TAG_BASE`]) never collide
/// with it.
#[must_use]
pub fn fnv1a32(bytes: &[u8]) -> u32 {
    let mut hash = FNV_OFFSET_BASIS;
    for &b in bytes {
        hash ^= u32::from(b);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Opaque numeric type identifier carried by every [`crate::Handle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeTag(pub u32);

impl TypeTag {
    #[must_use]
    pub fn of<T: 'static>() -> Self {
        let hash = fnv1a32(type_name::<T>().as_bytes());
        // Fold into the user range so ad-hoc `TypeTag::of::<T>()` calls never
        // collide with the reserved primitive tags below `USER_TAG_BASE`.
        TypeTag(USER_TAG_BASE + (hash % (u32::MAX - USER_TAG_BASE)))
    }

    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

pub const INT: TypeTag = TypeTag(TAG_I64);
pub const FLOAT: TypeTag = TypeTag(TAG_F64);
pub const BOOL: TypeTag = TypeTag(TAG_BOOL);
pub const BYTES: TypeTag = TypeTag(TAG_BYTES);

#[derive(Debug, Clone)]
pub struct TypeInfo {
    pub name: &'static str,
    pub size: usize,
}

/// Process-local map from type tag to its registered `{name, size}`.
///
/// Populated lazily the first time a type is claimed; primitive tags are
/// pre-registered at construction.
#[derive(Debug, Default)]
pub struct TypeRegistry {
    inner: RwLock<HashMap<u32, TypeInfo>>,
}

impl TypeRegistry {
    #[must_use]
    pub fn new() -> Self {
        let mut map = HashMap::new();
        map.insert(
            TAG_I64,
            TypeInfo {
                name: "i64",
                size: 8,
            },
        );
        map.insert(
            TAG_F64,
            TypeInfo {
                name: "f64",
                size: 8,
            },
        );
        map.insert(
            TAG_BOOL,
            TypeInfo {
                name: "bool",
                size: 1,
            },
        );
        map.insert(
            TAG_BYTES,
            TypeInfo {
                name: "bytes",
                size: 0,
            },
        );
        Self {
            inner: RwLock::new(map),
        }
    }

    /// Registers `tag` with a fixed element size, returning the previous
    /// entry (if any) so callers can detect a conflicting re-registration.
    pub fn register(&self, tag: TypeTag, name: &'static str, size: usize) -> Option<TypeInfo> {
        self.inner.write().insert(tag.raw(), TypeInfo { name, size })
    }

    #[must_use]
    pub fn get(&self, tag: TypeTag) -> Option<TypeInfo> {
        self.inner.read().get(&tag.raw()).cloned()
    }

    #[must_use]
    pub fn size_of(&self, tag: TypeTag) -> Option<usize> {
        self.get(tag).map(|info| info.size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitive_tags_are_reserved_below_user_base() {
        assert!(TAG_I64 < USER_TAG_BASE);
        assert!(TAG_F64 < USER_TAG_BASE);
        assert!(TAG_BOOL < USER_TAG_BASE);
        assert!(TAG_BYTES < USER_TAG_BASE);
    }

    #[test]
    fn user_tags_are_deterministic_and_distinct() {
        let a = TypeTag::of::<String>();
        let b = TypeTag::of::<Vec<u8>>();
        assert_eq!(a, TypeTag::of::<String>());
        assert_ne!(a, b);
        assert!(a.raw() >= USER_TAG_BASE);
    }

    #[test]
    fn registry_round_trips_registration() {
        let reg = TypeRegistry::new();
        assert_eq!(reg.size_of(INT), Some(8));
        let tag = TypeTag::of::<u64>();
        reg.register(tag, "u64", 8);
        assert_eq!(reg.size_of(tag), Some(8));
    }
}
