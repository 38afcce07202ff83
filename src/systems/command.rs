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

//! Dispatches the pending global move order to selected units.

use crate::component::{names, ComponentRegistry};
use crate::context::EcsContext;
use crate::mask::ComponentMask;
use crate::query::{QueryId, INVALID_QUERY};

const FORMATION_SPACING: f32 = 0.5;
const WORLD_MIN: f32 = -10_000.0;
const WORLD_MAX: f32 = 10_000.0;

/// Applies a single pending "move here" order: selected units get targets
/// arranged in a square grid around the clicked point.
pub struct CommandSystem {
    required: ComponentMask,
    excluded: ComponentMask,
    move_target_id: u32,
    query_id: QueryId,
    pending: Option<[f32; 3]>,
    matching_scratch: Vec<u32>,
}

impl CommandSystem {
    pub fn new(registry: &mut ComponentRegistry) -> Self {
        Self {
            required: registry.mask_from_names(&[
                names::SELECTED,
                names::MOVE_TARGET,
                names::MOVE_SPEED,
            ]),
            excluded: registry.mask_from_names(&[names::DISABLED, names::DEAD]),
            move_target_id: registry.ensure(names::MOVE_TARGET),
            query_id: INVALID_QUERY,
            pending: None,
            matching_scratch: Vec::new(),
        }
    }

    /// Record the clicked target; applied on the next update.
    pub fn set_global_move_target(&mut self, x: f32, y: f32, z: f32) {
        self.pending = Some([x, y, z]);
    }

    pub fn update(&mut self, ecs: &mut EcsContext) {
        let Some([px, py, pz]) = self.pending.take() else {
            return;
        };

        if self.query_id == INVALID_QUERY {
            self.query_id = ecs
                .queries
                .create_query(&self.required, &self.excluded, &ecs.stores);
        }

        self.matching_scratch.clear();
        self.matching_scratch
            .extend_from_slice(ecs.queries.matching_ids(self.query_id));

        for &archetype_id in &self.matching_scratch {
            let Some(store) = ecs.stores.get_mut(archetype_id) else {
                continue;
            };
            let Some(targets) = store.move_targets.as_deref_mut() else {
                continue;
            };
            let count = targets.len();
            if count == 0 {
                continue;
            }

            // Square formation around the click point.
            let side = (count as f32).sqrt().ceil() as usize;
            let half = (side as f32 - 1.0) * 0.5;

            for (k, target) in targets.iter_mut().enumerate() {
                let col = k % side;
                let row = k / side;
                let ox = (col as f32 - half) * FORMATION_SPACING;
                let oz = (row as f32 - half) * FORMATION_SPACING;

                target.x = (px + ox).clamp(WORLD_MIN, WORLD_MAX);
                target.y = py;
                target.z = (pz + oz).clamp(WORLD_MIN, WORLD_MAX);
                target.active = 1;
            }

            for k in 0..count {
                ecs.mark_dirty(self.move_target_id, archetype_id, k as u32);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mask::ComponentMask;
    use crate::prefab::Prefab;
    use crate::spawn::spawn_from_prefab;
    use rustc_hash::FxHashMap;

    fn selected_unit_prefab(ecs: &mut EcsContext) -> Prefab {
        let signature = ecs.components.mask_from_names(&[
            names::SELECTED,
            names::MOVE_TARGET,
            names::MOVE_SPEED,
        ]);
        let archetype_id = ecs.archetypes.get_or_create(&signature);
        Prefab {
            name: "Selected".to_string(),
            signature,
            archetype_id,
            defaults: FxHashMap::default(),
        }
    }

    #[test]
    fn dispatch_targets_form_a_grid_and_mark_dirty() {
        let mut ecs = EcsContext::new();
        let prefab = selected_unit_prefab(&mut ecs);
        for _ in 0..4 {
            spawn_from_prefab(&prefab, &mut ecs);
        }

        let move_target_id = ecs.components.id(names::MOVE_TARGET);
        let required = ComponentMask::from_ids(&[move_target_id]);
        let dirty = required.clone();
        let watcher =
            ecs.queries
                .create_dirty_query(&required, &ComponentMask::new(), &dirty, &ecs.stores);
        ecs.queries.consume_dirty_rows(watcher, prefab.archetype_id);

        let mut command = CommandSystem::new(&mut ecs.components);
        command.set_global_move_target(10.0, 0.0, 20.0);
        command.update(&mut ecs);

        let store = ecs.stores.get(prefab.archetype_id).unwrap();
        let targets = store.move_targets().unwrap();
        assert!(targets.iter().all(|t| t.active == 1));

        // 4 units -> 2x2 grid, spacing 0.5, centred on the click.
        let mean_x: f32 = targets.iter().map(|t| t.x).sum::<f32>() / 4.0;
        let mean_z: f32 = targets.iter().map(|t| t.z).sum::<f32>() / 4.0;
        assert!((mean_x - 10.0).abs() < 1e-4);
        assert!((mean_z - 20.0).abs() < 1e-4);
        let spread = targets
            .iter()
            .map(|t| (t.x - 10.0).abs().max((t.z - 20.0).abs()))
            .fold(0.0f32, f32::max);
        assert!((spread - 0.25).abs() < 1e-4);

        let rows = ecs.queries.consume_dirty_rows(watcher, prefab.archetype_id);
        assert_eq!(rows, vec![0, 1, 2, 3]);

        // Order is consumed; next update is a no-op.
        command.update(&mut ecs);
        assert!(ecs
            .queries
            .consume_dirty_rows(watcher, prefab.archetype_id)
            .is_empty());
    }
}
