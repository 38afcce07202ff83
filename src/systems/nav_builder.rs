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

//! Rebuilds the walkability grid from static obstacle entities.

use tracing::debug;

use crate::component::{names, ComponentRegistry};
use crate::context::EcsContext;
use crate::mask::ComponentMask;
use crate::nav::NavGrid;

/// Extra clearance added around each obstacle footprint so units path with
/// a safe margin on a coarse grid.
const CLEARANCE_MARGIN: f32 = 1.0;

/// Stamps `Position + Obstacle + ObstacleRadius` entities into the grid.
/// Only runs when the grid's dirty flag is set.
pub struct NavGridBuilderSystem {
    required: ComponentMask,
    excluded: ComponentMask,
}

impl NavGridBuilderSystem {
    pub fn new(registry: &mut ComponentRegistry) -> Self {
        Self {
            required: registry.mask_from_names(&[
                names::POSITION,
                names::OBSTACLE,
                names::OBSTACLE_RADIUS,
            ]),
            excluded: registry.mask_from_names(&[names::DISABLED, names::DEAD]),
        }
    }

    pub fn update(&mut self, ecs: &EcsContext, grid: &mut NavGrid) {
        if !grid.dirty {
            return;
        }
        grid.clear();

        let mut stamped = 0u32;
        for (_, store) in ecs.stores.iter() {
            if !store.signature().matches(&self.required, &self.excluded) {
                continue;
            }
            let (Some(positions), Some(radii)) = (store.positions(), store.obstacle_radii())
            else {
                continue;
            };
            for (p, r) in positions.iter().zip(radii) {
                grid.mark_obstacle(p.x, p.z, r.r + CLEARANCE_MARGIN);
                stamped += 1;
            }
        }

        grid.dirty = false;
        debug!(obstacles = stamped, "nav grid rebuilt");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::{DefaultValue, ObstacleRadius, Position};
    use crate::prefab::Prefab;
    use crate::spawn::spawn_from_prefab;
    use rustc_hash::FxHashMap;

    #[test]
    fn stamps_obstacles_and_clears_dirty_flag() {
        let mut ecs = EcsContext::new();
        let signature = ecs.components.mask_from_names(&[
            names::POSITION,
            names::OBSTACLE,
            names::OBSTACLE_RADIUS,
        ]);
        let archetype_id = ecs.archetypes.get_or_create(&signature);

        let mut defaults = FxHashMap::default();
        defaults.insert(
            ecs.components.id(names::POSITION),
            DefaultValue::Position(Position {
                x: 10.0,
                y: 0.0,
                z: 10.0,
            }),
        );
        defaults.insert(
            ecs.components.id(names::OBSTACLE_RADIUS),
            DefaultValue::ObstacleRadius(ObstacleRadius { r: 1.0 }),
        );
        let prefab = Prefab {
            name: "Rock".to_string(),
            signature,
            archetype_id,
            defaults,
        };
        spawn_from_prefab(&prefab, &mut ecs);

        let mut grid = NavGrid::new(1.0, 0.0, 0.0, 20.0, 20.0).unwrap();
        let mut builder = NavGridBuilderSystem::new(&mut ecs.components);
        builder.update(&ecs, &mut grid);

        assert!(!grid.dirty);
        let gx = grid.world_to_grid_x(10.0);
        let gz = grid.world_to_grid_z(10.0);
        assert!(!grid.is_walkable(gx, gz));
        // Far corner stays open.
        assert!(grid.is_walkable(0, 0));

        // A second update without the dirty flag is a no-op.
        grid.blocked.fill(0);
        builder.update(&ecs, &mut grid);
        assert!(grid.is_walkable(gx, gz));
    }
}
