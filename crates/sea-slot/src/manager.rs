//! The typed handle table + small-object memory pool, built over the
//! [`crate::pool::SlotPool`] arena.

use parking_lot::Mutex;
use tracing::{instrument, trace};

use crate::error::{SlotError, SlotResult};
use crate::mempool::{BlockPool, BlockRef, DEFAULT_BLOCK_SIZE};
use crate::pool::{PoolIndex, SlotPool};
use crate::security::{SecurityMode, TokenCapability};
use crate::types::{TypeRegistry, TypeTag};

struct Entry {
    type_tag: TypeTag,
    block: Option<BlockRef>,
    scope_id: Option<u64>,
}

/// Opaque `{slot_id, type_tag, generation}` tuple authorising slot access.
/// `Copy` and cheap to pass by value; its three integer fields are its
/// entire identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle {
    pub slot_id: u32,
    pub type_tag: u32,
    pub generation: u32,
}

struct Inner {
    table: SlotPool<Entry>,
    pool: BlockPool,
}

/// Typed, generationally-versioned handle table. Operations validate a
/// [`Handle`] before touching storage: the slot must be occupied, its
/// stored type tag must equal the handle's, and its stored generation must
/// equal the handle's.
pub struct SlotManager {
    inner: Mutex<Inner>,
    types: TypeRegistry,
    security: SecurityMode,
}

impl SlotManager {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self::with_block_size(capacity, DEFAULT_BLOCK_SIZE)
    }

    #[must_use]
    pub fn with_block_size(capacity: usize, block_size: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                table: SlotPool::with_capacity(capacity, true),
                pool: BlockPool::new(block_size, capacity * 4),
            }),
            types: TypeRegistry::new(),
            security: SecurityMode::Insecure,
        }
    }

    /// Builds a manager that requires a [`TokenCapability`] on every
    /// operation.
    #[must_use]
    pub fn new_secure(capacity: usize) -> Self {
        let mut mgr = Self::new(capacity);
        mgr.security = SecurityMode::Secure;
        mgr
    }

    #[must_use]
    pub fn types(&self) -> &TypeRegistry {
        &self.types
    }

    #[must_use]
    pub fn is_secure(&self) -> bool {
        matches!(self.security, SecurityMode::Secure)
    }

    fn check_token(&self, token: Option<&dyn TokenCapability>) -> SlotResult<()> {
        match (self.security, token) {
            (SecurityMode::Insecure, _) => Ok(()),
            (SecurityMode::Secure, None) => Err(SlotError::TokenRequired),
            (SecurityMode::Secure, Some(t)) => {
                if t.validate_constant_time() {
                    Ok(())
                } else {
                    Err(SlotError::TokenInvalid)
                }
            }
        }
    }

    /// Finds a free entry, assigns the next slot id, and returns a fresh
    /// handle with `generation == 1` claim contract
    /// (the underlying arena starts generations at 0; the handle's
    /// generation is the arena generation `+ 1`, so a never-reused slot's
    /// first handle is generation 1 as specified).
    #[instrument(skip(self))]
    pub fn claim(&self, type_tag: TypeTag) -> SlotResult<Handle> {
        self.claim_inner(type_tag, None)
    }

    #[instrument(skip(self))]
    pub fn claim_scoped(&self, type_tag: TypeTag, scope_id: u64) -> SlotResult<Handle> {
        self.claim_inner(type_tag, Some(scope_id))
    }

    fn claim_inner(&self, type_tag: TypeTag, scope_id: Option<u64>) -> SlotResult<Handle> {
        let mut inner = self.inner.lock();
        let (index, generation) = inner
            .table
            .alloc(Entry {
                type_tag,
                block: None,
                scope_id,
            })
            .ok_or(SlotError::OutOfMemory)?;
        trace!(slot_id = index.as_u32(), ?type_tag, "claimed slot");
        Ok(Handle {
            slot_id: index.as_u32(),
            type_tag: type_tag.raw(),
            generation: generation + 1,
        })
    }

    fn validate<'a>(inner: &'a Inner, h: Handle) -> SlotResult<(PoolIndex, &'a Entry)> {
        let idx = PoolIndex::from(h.slot_id);
        let entry = inner.table.get(idx).ok_or(SlotError::InvalidHandle)?;
        let actual_gen = inner
            .table
            .generation(idx)
            .ok_or(SlotError::InvalidHandle)?
            + 1;
        if actual_gen != h.generation {
            return Err(SlotError::InvalidHandle);
        }
        if entry.type_tag.raw() != h.type_tag {
            return Err(SlotError::TypeMismatch);
        }
        Ok((idx, entry))
    }

    /// Validates `h`, lazily allocates a data block sized for `bytes`, and
    /// copies `bytes` into it.
    #[instrument(skip(self, bytes, token))]
    pub fn write(
        &self,
        h: Handle,
        bytes: &[u8],
        token: Option<&dyn TokenCapability>,
    ) -> SlotResult<()> {
        self.check_token(token)?;
        let mut inner = self.inner.lock();
        let (idx, _) = Self::validate(&inner, h)?;

        let needs_alloc = inner.table.get(idx).unwrap().block.is_none();
        if needs_alloc {
            let block = inner.pool.allocate(bytes.len().max(1))?;
            inner.table.get_mut(idx).unwrap().block = Some(block);
        }
        let block = inner.table.get(idx).unwrap().block.unwrap();
        inner.pool.write(block, bytes)
    }

    /// Validates `h` and copies up to `min(cap, declared type size)` bytes
    /// into `buf`, returning the number of bytes copied.
    #[instrument(skip(self, buf, token))]
    pub fn read(
        &self,
        h: Handle,
        buf: &mut [u8],
        token: Option<&dyn TokenCapability>,
    ) -> SlotResult<usize> {
        self.check_token(token)?;
        let inner = self.inner.lock();
        let (idx, entry) = Self::validate(&inner, h)?;
        let Some(block) = entry.block else {
            return Err(SlotError::SlotNotFound);
        };
        let _ = idx;
        let cap = self
            .types
            .size_of(TypeTag(h.type_tag))
            .unwrap_or(usize::MAX);
        let len = buf.len().min(cap);
        Ok(inner.pool.read(block, &mut buf[..len]))
    }

    /// Returns the data block to the pool, increments the arena generation
    /// (invalidating every outstanding handle), and marks the entry free.
    #[instrument(skip(self, token))]
    pub fn release(&self, h: Handle, token: Option<&dyn TokenCapability>) -> SlotResult<()> {
        self.check_token(token)?;
        let mut inner = self.inner.lock();
        let (idx, entry) = Self::validate(&inner, h)?;
        if let Some(block) = entry.block {
            inner.pool.free(block);
        }
        inner.table.free(idx);
        trace!(slot_id = h.slot_id, "released slot");
        Ok(())
    }

    /// Releases every slot tagged with `scope_id`, e.g. when an [`crate::security`]-managed or
    /// party-scoped allocation's owning scope tears down.
    #[instrument(skip(self))]
    pub fn release_scope(&self, scope_id: u64) {
        let mut inner = self.inner.lock();
        let matching: Vec<PoolIndex> = inner
            .table
            .occupied_indices()
            .filter(|&idx| inner.table.get(idx).unwrap().scope_id == Some(scope_id))
            .collect();
        for idx in matching {
            if let Some(block) = inner.table.get(idx).unwrap().block {
                inner.pool.free(block);
            }
            inner.table.free(idx);
        }
    }

    /// Copies value bytes from `src` to `dst`, used for security-mode
    /// token downgrade/upgrade. Both reads and writes are
    /// serialized through the manager's single table lock (see DESIGN.md).
    #[instrument(skip(self, src_token, dst_token))]
    pub fn copy_value(
        &self,
        src: Handle,
        dst: Handle,
        src_token: Option<&dyn TokenCapability>,
        dst_token: Option<&dyn TokenCapability>,
    ) -> SlotResult<usize> {
        self.check_token(src_token)?;
        self.check_token(dst_token)?;
        let mut inner = self.inner.lock();
        let (_, src_entry) = Self::validate(&inner, src)?;
        let src_block = src_entry.block.ok_or(SlotError::SlotNotFound)?;
        let cap = self
            .types
            .size_of(TypeTag(src.type_tag))
            .unwrap_or(inner.pool.block_size())
            .max(inner.pool.block_size());
        let mut buf = vec![0u8; cap];
        let n = inner.pool.read(src_block, &mut buf);
        buf.truncate(n);

        let (dst_idx, _) = Self::validate(&inner, dst)?;
        let needs_alloc = inner.table.get(dst_idx).unwrap().block.is_none();
        if needs_alloc {
            let block = inner.pool.allocate(buf.len().max(1))?;
            inner.table.get_mut(dst_idx).unwrap().block = Some(block);
        }
        let dst_block = inner.table.get(dst_idx).unwrap().block.unwrap();
        inner.pool.write(dst_block, &buf)?;
        tracing::info!(
            target: "sea_slot::audit",
            src_slot = src.slot_id,
            dst_slot = dst.slot_id,
            bytes = n,
            "copied value between slots"
        );
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::INT;

    #[test]
    fn slot_lifecycle_claim_write_read_release_reclaims_with_new_generation() {
        let mgr = SlotManager::new(16);
        let h = mgr.claim(INT).unwrap();
        mgr.write(h, &42i64.to_ne_bytes(), None).unwrap();
        let mut buf = [0u8; 8];
        let n = mgr.read(h, &mut buf, None).unwrap();
        assert_eq!(n, 8);
        assert_eq!(i64::from_ne_bytes(buf), 42);
        mgr.release(h, None).unwrap();
        assert_eq!(mgr.read(h, &mut buf, None), Err(SlotError::InvalidHandle));

        let h2 = mgr.claim(INT).unwrap();
        assert_eq!(h2.slot_id, h.slot_id);
        assert!(h2.generation > h.generation);
    }

    #[test]
    fn type_mismatch_on_write() {
        let mgr = SlotManager::new(4);
        let h = mgr.claim(INT).unwrap();
        let mut forged = h;
        forged.type_tag = crate::types::FLOAT.raw();
        assert_eq!(
            mgr.write(forged, &[0; 8], None),
            Err(SlotError::TypeMismatch)
        );
    }

    #[test]
    fn release_scope_frees_all_matching_slots() {
        let mgr = SlotManager::new(8);
        let a = mgr.claim_scoped(INT, 7).unwrap();
        let b = mgr.claim_scoped(INT, 7).unwrap();
        let c = mgr.claim_scoped(INT, 8).unwrap();
        mgr.release_scope(7);
        assert_eq!(mgr.write(a, &[0; 8], None), Err(SlotError::InvalidHandle));
        assert_eq!(mgr.write(b, &[0; 8], None), Err(SlotError::InvalidHandle));
        assert!(mgr.write(c, &[0; 8], None).is_ok());
    }

    #[test]
    fn secure_mode_requires_token() {
        let mgr = SlotManager::new_secure(4);
        let h = mgr.claim(INT).unwrap();
        assert_eq!(
            mgr.write(h, &[0; 8], None),
            Err(SlotError::TokenRequired)
        );
    }
}
