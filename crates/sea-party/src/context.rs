//! `PartyContext`: role and shared-field lookup for the
//! fibers a dispatch spawns. Grounded on `libs/spin`'s spinlock usage
//! pattern (DESIGN.md) — here realized with `parking_lot::Mutex`, which is
//! the hosted-crate equivalent the rest of this workspace already reaches
//! for.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use sea_slot::{Handle, SlotManager};

use crate::error::{PartyError, PartyResult};

struct RoleEntry {
    handle: Handle,
    abilities: Vec<String>,
}

struct ContextInner {
    roles: HashMap<String, RoleEntry>,
    shared: HashMap<String, Handle>,
}

/// A mapping from slot-name to role instance plus a mapping from
/// field-name to a shared slot, both behind one lock. Created by the party builder, torn down once the dispatch
/// completes and no fiber retains a reference (an `Arc<PartyContext>`
/// handed to spawned fibers enforces the "no fiber retains a reference"
/// half of that lifecycle naturally: the context drops once the last
/// clone does).
pub struct PartyContext {
    manager: Arc<SlotManager>,
    inner: Mutex<ContextInner>,
}

impl PartyContext {
    #[must_use]
    pub fn new(manager: Arc<SlotManager>) -> Self {
        PartyContext {
            manager,
            inner: Mutex::new(ContextInner {
                roles: HashMap::new(),
                shared: HashMap::new(),
            }),
        }
    }

    #[must_use]
    pub fn manager(&self) -> &Arc<SlotManager> {
        &self.manager
    }

    /// Binds `slot_name` to a role instance, with the abilities it declares.
    pub fn bind_role(&self, slot_name: impl Into<String>, handle: Handle, abilities: Vec<String>) {
        self.inner
            .lock()
            .roles
            .insert(slot_name.into(), RoleEntry { handle, abilities });
    }

    pub fn bind_shared(&self, field: impl Into<String>, handle: Handle) {
        self.inner.lock().shared.insert(field.into(), handle);
    }

    /// Looks up the instance bound to `slot_name`, optionally requiring it
    /// declare `required_ability`.
    pub fn get_role(
        &self,
        slot_name: &str,
        required_ability: Option<&str>,
    ) -> PartyResult<Handle> {
        let inner = self.inner.lock();
        let entry = inner
            .roles
            .get(slot_name)
            .ok_or_else(|| PartyError::RoleNotFound(slot_name.to_string()))?;
        if let Some(ability) = required_ability {
            if !entry.abilities.iter().any(|a| a == ability) {
                return Err(PartyError::AbilityMissing(
                    slot_name.to_string(),
                    ability.to_string(),
                ));
            }
        }
        Ok(entry.handle)
    }

    /// Returns every role-bound handle declaring `ability`.
    #[must_use]
    pub fn find_roles(&self, ability: &str) -> Vec<Handle> {
        self.inner
            .lock()
            .roles
            .values()
            .filter(|entry| entry.abilities.iter().any(|a| a == ability))
            .map(|entry| entry.handle)
            .collect()
    }

    /// Reads a named shared field's handle.
    #[must_use]
    pub fn get_shared(&self, field: &str) -> Option<Handle> {
        self.inner.lock().shared.get(field).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_slot::INT;

    #[test]
    fn get_role_enforces_required_ability() {
        let manager = Arc::new(SlotManager::new(8));
        let handle = manager.claim(INT).unwrap();
        let ctx = PartyContext::new(manager);
        ctx.bind_role("hero", handle, vec!["attack".to_string()]);

        assert_eq!(ctx.get_role("hero", Some("attack")), Ok(handle));
        assert_eq!(
            ctx.get_role("hero", Some("fly")),
            Err(PartyError::AbilityMissing("hero".into(), "fly".into()))
        );
        assert_eq!(
            ctx.get_role("missing", None),
            Err(PartyError::RoleNotFound("missing".into()))
        );
    }

    #[test]
    fn find_roles_filters_by_ability() {
        let manager = Arc::new(SlotManager::new(8));
        let a = manager.claim(INT).unwrap();
        let b = manager.claim(INT).unwrap();
        let ctx = PartyContext::new(manager);
        ctx.bind_role("a", a, vec!["tank".to_string()]);
        ctx.bind_role("b", b, vec!["heal".to_string()]);

        assert_eq!(ctx.find_roles("tank"), vec![a]);
        assert_eq!(ctx.find_roles("heal"), vec![b]);
        assert!(ctx.find_roles("fly").is_empty());
    }

    #[test]
    fn get_shared_reads_bound_field() {
        let manager = Arc::new(SlotManager::new(8));
        let handle = manager.claim(INT).unwrap();
        let ctx = PartyContext::new(manager);
        ctx.bind_shared("score", handle);
        assert_eq!(ctx.get_shared("score"), Some(handle));
        assert_eq!(ctx.get_shared("missing"), None);
    }
}
