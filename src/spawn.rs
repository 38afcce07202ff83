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

//! Prefab spawning: entity + store row + defaults + dirty marks.

use crate::context::EcsContext;
use crate::entity::Entity;
use crate::prefab::Prefab;

/// Result of spawning a prefab: the new handle and where its data lives.
#[derive(Debug, Clone, Copy)]
pub struct SpawnResult {
    pub entity: Entity,
    pub row: u32,
    pub archetype_id: u32,
}

/// Spawn one entity from `prefab`:
/// create a handle, get-or-create the archetype store, append a row, apply
/// the prefab's defaults, record the entity's location, and mark the whole
/// row dirty so every dirty query sees it on its next consumption.
pub fn spawn_from_prefab(prefab: &Prefab, ecs: &mut EcsContext) -> SpawnResult {
    let entity = ecs.entities.create();

    let store = ecs.store_or_create(prefab.archetype_id, &prefab.signature);
    let row = store.create_row(entity);
    store.apply_defaults(row, &prefab.defaults);
    let size = store.size();

    ecs.entities.attach(entity, prefab.archetype_id, row);
    ecs.queries
        .mark_row_dirty_all(prefab.archetype_id, row, size);

    SpawnResult {
        entity,
        row,
        archetype_id: prefab.archetype_id,
    }
}
