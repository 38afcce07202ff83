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

//! Spatial hash grid over the X/Z ground plane for neighbour queries.
//!
//! Rebuilt from scratch every tick (cells keep their allocations); readers
//! scan the 3x3 neighbourhood of a point and do their own fine filtering
//! (team, distance, alive status).

use rustc_hash::FxHashMap;

use crate::component::{names, ComponentRegistry};
use crate::context::EcsContext;
use crate::mask::ComponentMask;
use crate::query::{QueryId, INVALID_QUERY};

/// Hash grid from integer cell to `(archetype_id, row)` occupants.
pub struct SpatialIndexSystem {
    cell_size: f32,
    grid: FxHashMap<(i32, i32), Vec<(u32, u32)>>,
    required: ComponentMask,
    excluded: ComponentMask,
    query_id: QueryId,
    matching_scratch: Vec<u32>,
}

impl SpatialIndexSystem {
    /// `cell_size` doubles as the neighbour radius; 2 m suits melee scales.
    pub fn new(registry: &mut ComponentRegistry, cell_size: f32) -> Self {
        Self {
            cell_size: if cell_size > 1e-6 { cell_size } else { 1e-6 },
            grid: FxHashMap::default(),
            required: registry.mask_from_names(&[names::POSITION]),
            excluded: ComponentMask::new(),
            query_id: INVALID_QUERY,
            matching_scratch: Vec::new(),
        }
    }

    pub fn cell_size(&self) -> f32 {
        self.cell_size
    }

    /// Rebuild the grid from every entity with a position.
    pub fn update(&mut self, ecs: &mut EcsContext) {
        // Clear cells but keep their capacity.
        for cell in self.grid.values_mut() {
            cell.clear();
        }

        if self.query_id == INVALID_QUERY {
            self.query_id = ecs
                .queries
                .create_query(&self.required, &self.excluded, &ecs.stores);
        }

        self.matching_scratch.clear();
        self.matching_scratch
            .extend_from_slice(ecs.queries.matching_ids(self.query_id));

        for &archetype_id in &self.matching_scratch {
            let Some(store) = ecs.stores.get(archetype_id) else {
                continue;
            };
            let Some(positions) = store.positions() else {
                continue;
            };
            for (row, p) in positions.iter().enumerate() {
                let gx = (p.x / self.cell_size).floor() as i32;
                let gz = (p.z / self.cell_size).floor() as i32;
                self.grid
                    .entry((gx, gz))
                    .or_default()
                    .push((archetype_id, row as u32));
            }
        }
    }

    /// Visit every occupant of the 3x3 neighbourhood around `(x, z)`.
    /// The visitor receives `(archetype_id, row)` and does any finer
    /// filtering itself.
    pub fn for_neighbors(&self, x: f32, z: f32, mut visit: impl FnMut(u32, u32)) {
        let gx = (x / self.cell_size).floor() as i32;
        let gz = (z / self.cell_size).floor() as i32;
        for dx in -1..=1 {
            for dz in -1..=1 {
                let Some(cell) = self.grid.get(&(gx + dx, gz + dz)) else {
                    continue;
                };
                for &(archetype_id, row) in cell {
                    visit(archetype_id, row);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::Position;
    use crate::prefab::Prefab;
    use crate::spawn::spawn_from_prefab;
    use rustc_hash::FxHashMap;

    fn spawn_at(ecs: &mut EcsContext, x: f32, z: f32) -> (u32, u32) {
        let signature = ecs.components.mask_from_names(&[names::POSITION]);
        let archetype_id = ecs.archetypes.get_or_create(&signature);
        let prefab = Prefab {
            name: "Dot".to_string(),
            signature,
            archetype_id,
            defaults: FxHashMap::default(),
        };
        let spawned = spawn_from_prefab(&prefab, ecs);
        let store = ecs.stores.get_mut(spawned.archetype_id).unwrap();
        store.positions_mut().unwrap()[spawned.row as usize] = Position { x, y: 0.0, z };
        (spawned.archetype_id, spawned.row)
    }

    #[test]
    fn finds_neighbours_in_3x3_window_only() {
        let mut ecs = EcsContext::new();
        let mut spatial = SpatialIndexSystem::new(&mut ecs.components, 2.0);

        let near = spawn_at(&mut ecs, 1.0, 1.0);
        let edge = spawn_at(&mut ecs, 3.5, 0.5);
        let far = spawn_at(&mut ecs, 30.0, 30.0);
        spatial.update(&mut ecs);

        let mut seen = Vec::new();
        spatial.for_neighbors(0.5, 0.5, |aid, row| seen.push((aid, row)));

        assert!(seen.contains(&near));
        assert!(seen.contains(&edge));
        assert!(!seen.contains(&far));
    }

    #[test]
    fn rebuild_reflects_moved_entities() {
        let mut ecs = EcsContext::new();
        let mut spatial = SpatialIndexSystem::new(&mut ecs.components, 2.0);
        let (archetype_id, row) = spawn_at(&mut ecs, 1.0, 1.0);
        spatial.update(&mut ecs);

        {
            let store = ecs.stores.get_mut(archetype_id).unwrap();
            store.positions_mut().unwrap()[row as usize] = Position {
                x: 50.0,
                y: 0.0,
                z: 50.0,
            };
        }
        spatial.update(&mut ecs);

        let mut near_origin = 0;
        spatial.for_neighbors(1.0, 1.0, |_, _| near_origin += 1);
        assert_eq!(near_origin, 0);

        let mut near_new = 0;
        spatial.for_neighbors(50.0, 50.0, |_, _| near_new += 1);
        assert_eq!(near_new, 1);
    }
}
