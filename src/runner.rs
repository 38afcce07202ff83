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

//! The tick loop: all systems in their fixed per-tick order.

use crate::assets::AssetCatalog;
use crate::context::EcsContext;
use crate::nav::NavGrid;
use crate::systems::{
    CharacterAnimationSystem, CombatSystem, CommandSystem, LocalAvoidanceSystem, MovementSystem,
    NavGridBuilderSystem, PathfindingSystem, PoseUpdateSystem, SpatialIndexSystem, SteeringSystem,
};

/// Owns every system plus the nav grid and runs them in order:
/// NavGridBuilder (dirty-gated) -> Command -> Pathfinding -> Steering ->
/// SpatialIndex -> LocalAvoidance -> Movement -> Animation -> PoseUpdate ->
/// Combat. Single logical thread; each system gets exclusive context access
/// for the duration of its update.
pub struct SystemRunner {
    nav_grid: NavGrid,
    nav_builder: NavGridBuilderSystem,
    command: CommandSystem,
    pathfinding: PathfindingSystem,
    steering: SteeringSystem,
    spatial: SpatialIndexSystem,
    avoidance: LocalAvoidanceSystem,
    movement: MovementSystem,
    animation: CharacterAnimationSystem,
    pose: PoseUpdateSystem,
    combat: CombatSystem,
}

impl SystemRunner {
    pub fn new(ecs: &mut EcsContext, nav_grid: NavGrid) -> Self {
        let registry = &mut ecs.components;
        Self {
            nav_grid,
            nav_builder: NavGridBuilderSystem::new(registry),
            command: CommandSystem::new(registry),
            pathfinding: PathfindingSystem::new(registry),
            steering: SteeringSystem::new(registry),
            spatial: SpatialIndexSystem::new(registry, 2.0),
            avoidance: LocalAvoidanceSystem::new(registry),
            movement: MovementSystem::new(registry),
            animation: CharacterAnimationSystem::new(registry),
            pose: PoseUpdateSystem::new(registry),
            combat: CombatSystem::new(registry),
        }
    }

    /// Advance the simulation by `dt` seconds.
    pub fn update(&mut self, ecs: &mut EcsContext, assets: &AssetCatalog, dt: f32) {
        if dt <= 0.0 {
            return;
        }

        self.nav_builder.update(ecs, &mut self.nav_grid);
        self.command.update(ecs);
        self.pathfinding.update(ecs, &self.nav_grid);
        self.steering.update(ecs, dt);
        self.spatial.update(ecs);
        self.avoidance.update(ecs, &self.spatial, dt);
        self.movement.update(ecs, dt);
        self.animation.update(ecs, assets, dt);
        self.pose.update(ecs, assets);
        self.combat.update(ecs, &self.spatial, dt);
    }

    /// Queue a global "move here" order for selected units.
    pub fn set_global_move_target(&mut self, x: f32, y: f32, z: f32) {
        self.command.set_global_move_target(x, y, z);
    }

    pub fn nav_grid(&self) -> &NavGrid {
        &self.nav_grid
    }

    pub fn nav_grid_mut(&mut self) -> &mut NavGrid {
        &mut self.nav_grid
    }

    pub fn combat(&self) -> &CombatSystem {
        &self.combat
    }

    pub fn combat_mut(&mut self) -> &mut CombatSystem {
        &mut self.combat
    }

    pub fn spatial(&self) -> &SpatialIndexSystem {
        &self.spatial
    }
}
