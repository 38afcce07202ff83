// Copyright 2025 Phalanx Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The ECS context: one owned object holding every manager.
//!
//! The tick loop owns the context and lends it mutably to each system for
//! the duration of its update. Cross-manager operations that must stay
//! consistent (store creation notifying queries, swap-removes fixing up the
//! entity table and dirty bits) live here.

use crate::archetype::ArchetypeManager;
use crate::component::ComponentRegistry;
use crate::entity::{Entity, EntityTable};
use crate::mask::ComponentMask;
use crate::prefab::PrefabManager;
use crate::query::QueryEngine;
use crate::store::{ArchetypeStore, StoreManager};

/// Process-wide ECS state. No global statics; whoever runs the tick loop
/// owns exactly one of these.
#[derive(Default)]
pub struct EcsContext {
    pub components: ComponentRegistry,
    pub archetypes: ArchetypeManager,
    pub stores: StoreManager,
    pub entities: EntityTable,
    pub prefabs: PrefabManager,
    pub queries: QueryEngine,
}

impl EcsContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the store for `archetype_id`, creating it on first request and
    /// registering it with every compiled query.
    pub fn store_or_create(
        &mut self,
        archetype_id: u32,
        signature: &ComponentMask,
    ) -> &mut ArchetypeStore {
        let Self {
            components,
            stores,
            queries,
            ..
        } = self;
        stores.get_or_create(archetype_id, signature, components, |id, sig| {
            queries.on_store_created(id, sig)
        })
    }

    /// Mark one component of one row dirty for every interested query.
    pub fn mark_dirty(&mut self, comp_id: u32, archetype_id: u32, row: u32) {
        let Some(size) = self.stores.get(archetype_id).map(|s| s.size()) else {
            return;
        };
        self.queries
            .mark_dirty_component(comp_id, archetype_id, row, size);
    }

    /// Migrate an entity's row to the archetype extended by the tag bit
    /// `comp_id`. The entity keeps all shared column values; the vacated
    /// row is swap-removed with full entity-table and dirty-bit fixup, and
    /// the new row is marked dirty for every dirty-enabled query.
    ///
    /// Stale or unattached handles are silently ignored.
    pub fn add_tag(&mut self, entity: Entity, comp_id: u32) {
        let Some(record) = self.entities.find(entity) else {
            return;
        };
        let Some(old_store) = self.stores.get(record.archetype_id) else {
            return;
        };
        if old_store.signature().has(comp_id) {
            return;
        }
        let new_signature = old_store.signature().with(comp_id);
        let new_archetype_id = self.archetypes.get_or_create(&new_signature);

        // Ensure the destination store exists (may notify queries).
        let _ = self.store_or_create(new_archetype_id, &new_signature);

        let Some((old_store, new_store)) = self
            .stores
            .get_two_mut(record.archetype_id, new_archetype_id)
        else {
            return;
        };

        let new_row = new_store.create_row(entity);
        old_store.copy_shared_row(record.row, new_store, new_row);
        let new_size = new_store.size();

        let last_row = old_store.size().saturating_sub(1);
        let moved = old_store.destroy_row_swap(record.row);

        self.entities.attach(entity, new_archetype_id, new_row);
        if moved.is_valid() {
            self.entities.attach(moved, record.archetype_id, record.row);
        }
        self.queries
            .on_row_swap_removed(record.archetype_id, record.row, last_row);
        self.queries
            .mark_row_dirty_all(new_archetype_id, new_row, new_size);
    }

    /// Destroy an entity: swap-remove its row, re-attach whichever entity
    /// took its place, repair dirty bits, and retire the handle. Stale
    /// handles are silently ignored.
    pub fn destroy_entity(&mut self, entity: Entity) {
        if let Some(record) = self.entities.find(entity) {
            if let Some(store) = self.stores.get_mut(record.archetype_id) {
                let last_row = store.size().saturating_sub(1);
                let moved = store.destroy_row_swap(record.row);
                if moved.is_valid() {
                    self.entities.attach(moved, record.archetype_id, record.row);
                }
                self.queries
                    .on_row_swap_removed(record.archetype_id, record.row, last_row);
            }
        }
        self.entities.destroy(entity);
    }
}

impl StoreManager {
    /// Mutable access to two distinct stores at once (row migration needs
    /// source and destination simultaneously). Returns `None` when the ids
    /// are equal or either store is missing.
    pub fn get_two_mut(
        &mut self,
        a: u32,
        b: u32,
    ) -> Option<(&mut ArchetypeStore, &mut ArchetypeStore)> {
        if a == b {
            return None;
        }
        let slots = self.slots_mut();
        let (ai, bi) = (a as usize, b as usize);
        if ai >= slots.len() || bi >= slots.len() {
            return None;
        }
        if ai < bi {
            let (left, right) = slots.split_at_mut(bi);
            Some((left[ai].as_mut()?, right[0].as_mut()?))
        } else {
            let (left, right) = slots.split_at_mut(ai);
            let b_store = left[bi].as_mut()?;
            Some((right[0].as_mut()?, b_store))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::names;

    fn spawn_bare(ecs: &mut EcsContext, signature: &ComponentMask) -> Entity {
        let archetype_id = ecs.archetypes.get_or_create(signature);
        let entity = ecs.entities.create();
        let store = ecs.store_or_create(archetype_id, signature);
        let row = store.create_row(entity);
        let size = store.size();
        ecs.entities.attach(entity, archetype_id, row);
        ecs.queries.mark_row_dirty_all(archetype_id, row, size);
        entity
    }

    #[test]
    fn add_tag_migrates_and_preserves_values() {
        let mut ecs = EcsContext::new();
        let signature = ecs
            .components
            .mask_from_names(&[names::POSITION, names::HEALTH]);
        let dead_id = ecs.components.ensure(names::DEAD);

        let entity = spawn_bare(&mut ecs, &signature);
        let record = ecs.entities.find(entity).unwrap();
        if let Some(store) = ecs.stores.get_mut(record.archetype_id) {
            store.healths_mut().unwrap()[record.row as usize].value = 37.0;
        }

        ecs.add_tag(entity, dead_id);

        let record = ecs.entities.find(entity).unwrap();
        let store = ecs.stores.get(record.archetype_id).unwrap();
        assert!(store.signature().has(dead_id));
        assert_eq!(store.healths().unwrap()[record.row as usize].value, 37.0);
        assert_eq!(store.entities()[record.row as usize], entity);
    }

    #[test]
    fn add_tag_fixes_up_moved_entity() {
        let mut ecs = EcsContext::new();
        let signature = ecs.components.mask_from_names(&[names::POSITION]);
        let dead_id = ecs.components.ensure(names::DEAD);

        let a = spawn_bare(&mut ecs, &signature);
        let b = spawn_bare(&mut ecs, &signature);
        let a_record = ecs.entities.find(a).unwrap();

        // Tagging the first row swap-relocates the second entity into it.
        ecs.add_tag(a, dead_id);

        let b_record = ecs.entities.find(b).unwrap();
        assert_eq!(b_record.archetype_id, a_record.archetype_id);
        assert_eq!(b_record.row, a_record.row);
        let store = ecs.stores.get(b_record.archetype_id).unwrap();
        assert_eq!(store.entities()[b_record.row as usize], b);
    }

    #[test]
    fn destroy_entity_keeps_table_consistent() {
        let mut ecs = EcsContext::new();
        let signature = ecs.components.mask_from_names(&[names::POSITION]);

        let a = spawn_bare(&mut ecs, &signature);
        let b = spawn_bare(&mut ecs, &signature);
        let c = spawn_bare(&mut ecs, &signature);
        let a_record = ecs.entities.find(a).unwrap();

        ecs.destroy_entity(a);

        assert!(ecs.entities.find(a).is_none());
        let c_record = ecs.entities.find(c).unwrap();
        assert_eq!(c_record.row, a_record.row);
        let store = ecs.stores.get(c_record.archetype_id).unwrap();
        assert_eq!(store.size(), 2);
        assert_eq!(store.entities()[c_record.row as usize], c);
        assert!(ecs.entities.find(b).is_some());
    }
}
