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

//! Steers units toward their path waypoint or final move target.

use crate::component::{names, ComponentRegistry};
use crate::context::EcsContext;
use crate::mask::ComponentMask;

/// Units stop once within this distance of the final target (meters).
const ARRIVAL_RADIUS: f32 = 1.0;

/// Produces velocities from move targets.
///
/// While a valid path has waypoints left, the unit runs at full speed toward
/// the current waypoint, advancing on contact. The final approach clamps
/// speed to `remaining / dt` so the unit reaches the arrival radius without
/// ever overshooting, then zeroes velocity and deactivates the target.
pub struct SteeringSystem {
    required: ComponentMask,
    excluded: ComponentMask,
    velocity_id: u32,
    changed_scratch: Vec<u32>,
}

impl SteeringSystem {
    pub fn new(registry: &mut ComponentRegistry) -> Self {
        Self {
            required: registry.mask_from_names(&[
                names::POSITION,
                names::VELOCITY,
                names::MOVE_TARGET,
                names::MOVE_SPEED,
            ]),
            excluded: registry.mask_from_names(&[names::DISABLED, names::DEAD]),
            velocity_id: registry.ensure(names::VELOCITY),
            changed_scratch: Vec::new(),
        }
    }

    pub fn update(&mut self, ecs: &mut EcsContext, dt: f32) {
        for archetype_id in 0..ecs.stores.slot_count() {
            self.changed_scratch.clear();
            {
                let Some(store) = ecs.stores.get_mut(archetype_id) else {
                    continue;
                };
                if !store.signature().matches(&self.required, &self.excluded) {
                    continue;
                }
                let (Some(positions), Some(velocities), Some(targets), Some(speeds)) = (
                    store.positions.as_deref(),
                    store.velocities.as_deref_mut(),
                    store.move_targets.as_deref_mut(),
                    store.move_speeds.as_deref(),
                ) else {
                    continue;
                };
                let mut paths = store.paths.as_deref_mut();
                let mut facings = store.facings.as_deref_mut();
                let n = positions.len();

                for i in 0..n {
                    let target = &mut targets[i];
                    if target.active == 0 {
                        continue;
                    }
                    let pos = &positions[i];
                    let vel = &mut velocities[i];

                    // Follow the planned corridor while waypoints remain;
                    // contact with a waypoint advances to the next.
                    let mut waypoint = None;
                    if let Some(paths) = paths.as_deref_mut() {
                        let path = &mut paths[i];
                        if path.valid {
                            while path.current < path.count {
                                let wp = path.waypoints[path.current as usize];
                                let dx = wp.x - pos.x;
                                let dz = wp.y - pos.z;
                                if dx * dx + dz * dz <= ARRIVAL_RADIUS * ARRIVAL_RADIUS {
                                    path.current += 1;
                                } else {
                                    waypoint = Some(wp);
                                    break;
                                }
                            }
                        }
                    }

                    let (tx, tz, is_final) = match waypoint {
                        Some(wp) => (wp.x, wp.y, false),
                        None => (target.x, target.z, true),
                    };

                    let mut dx = tx - pos.x;
                    let mut dz = tz - pos.z;
                    let dist = (dx * dx + dz * dz).sqrt();

                    if is_final && dist <= ARRIVAL_RADIUS {
                        vel.x = 0.0;
                        vel.y = 0.0;
                        vel.z = 0.0;
                        target.active = 0;
                        self.changed_scratch.push(i as u32);
                        continue;
                    }

                    if dist > 1e-6 {
                        dx /= dist;
                        dz /= dist;
                    } else {
                        dx = 0.0;
                        dz = 0.0;
                    }

                    // Snappy stop: full speed, but the final leg is clamped
                    // so this frame lands exactly at the arrival radius
                    // instead of creeping past it.
                    let mut desired_speed = speeds[i].value;
                    if is_final && dt > 1e-6 {
                        let remaining = (dist - ARRIVAL_RADIUS).max(0.0);
                        desired_speed = desired_speed.min(remaining / dt);
                    }

                    vel.x = dx * desired_speed;
                    vel.y = 0.0;
                    vel.z = dz * desired_speed;

                    if let Some(facings) = facings.as_deref_mut() {
                        if vel.x != 0.0 || vel.z != 0.0 {
                            facings[i].yaw = vel.x.atan2(vel.z);
                        }
                    }

                    self.changed_scratch.push(i as u32);
                }
            }

            // Store borrow released; feed the movement system's dirty set.
            for i in 0..self.changed_scratch.len() {
                let row = self.changed_scratch[i];
                ecs.mark_dirty(self.velocity_id, archetype_id, row);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prefab::Prefab;
    use crate::spawn::spawn_from_prefab;
    use rustc_hash::FxHashMap;

    fn mover_prefab(ecs: &mut EcsContext) -> Prefab {
        let signature = ecs.components.mask_from_names(&[
            names::POSITION,
            names::VELOCITY,
            names::MOVE_TARGET,
            names::MOVE_SPEED,
            names::FACING,
        ]);
        let archetype_id = ecs.archetypes.get_or_create(&signature);
        Prefab {
            name: "Mover".to_string(),
            signature,
            archetype_id,
            defaults: FxHashMap::default(),
        }
    }

    fn set_target(ecs: &mut EcsContext, archetype_id: u32, row: u32, x: f32, z: f32) {
        let store = ecs.stores.get_mut(archetype_id).unwrap();
        let t = &mut store.move_targets_mut().unwrap()[row as usize];
        t.x = x;
        t.z = z;
        t.active = 1;
    }

    #[test]
    fn steers_toward_target_at_move_speed() {
        let mut ecs = EcsContext::new();
        let prefab = mover_prefab(&mut ecs);
        let spawned = spawn_from_prefab(&prefab, &mut ecs);
        set_target(&mut ecs, spawned.archetype_id, spawned.row, 10.0, 0.0);

        let mut steering = SteeringSystem::new(&mut ecs.components);
        steering.update(&mut ecs, 0.1);

        let store = ecs.stores.get(spawned.archetype_id).unwrap();
        let v = store.velocities().unwrap()[0];
        assert!((v.x - 5.0).abs() < 1e-4, "default speed along +x, got {}", v.x);
        assert_eq!(v.z, 0.0);
        // Facing +X is yaw PI/2.
        let yaw = store.facings().unwrap()[0].yaw;
        assert!((yaw - std::f32::consts::FRAC_PI_2).abs() < 1e-4);
    }

    #[test]
    fn never_overshoots_the_arrival_radius() {
        let mut ecs = EcsContext::new();
        let prefab = mover_prefab(&mut ecs);
        let spawned = spawn_from_prefab(&prefab, &mut ecs);
        // 1.4 m away with speed 5 and dt 0.1: an unclamped step (0.5 m)
        // would land inside the radius; the clamp stops exactly at it.
        set_target(&mut ecs, spawned.archetype_id, spawned.row, 1.4, 0.0);

        let mut steering = SteeringSystem::new(&mut ecs.components);
        steering.update(&mut ecs, 0.1);

        let store = ecs.stores.get(spawned.archetype_id).unwrap();
        let v = store.velocities().unwrap()[0];
        let step = (v.x * v.x + v.z * v.z).sqrt() * 0.1;
        assert!(step <= 0.4 + 1e-4, "step {step} crosses the arrival radius");
    }

    #[test]
    fn arrival_zeroes_velocity_and_deactivates() {
        let mut ecs = EcsContext::new();
        let prefab = mover_prefab(&mut ecs);
        let spawned = spawn_from_prefab(&prefab, &mut ecs);
        set_target(&mut ecs, spawned.archetype_id, spawned.row, 0.5, 0.0);

        let mut steering = SteeringSystem::new(&mut ecs.components);
        steering.update(&mut ecs, 0.1);

        let store = ecs.stores.get(spawned.archetype_id).unwrap();
        let v = store.velocities().unwrap()[0];
        assert_eq!((v.x, v.y, v.z), (0.0, 0.0, 0.0));
        assert_eq!(store.move_targets().unwrap()[0].active, 0);
    }

    #[test]
    fn follows_path_waypoints_before_final_target() {
        let mut ecs = EcsContext::new();
        let signature = ecs.components.mask_from_names(&[
            names::POSITION,
            names::VELOCITY,
            names::MOVE_TARGET,
            names::MOVE_SPEED,
            names::PATH,
        ]);
        let archetype_id = ecs.archetypes.get_or_create(&signature);
        let prefab = Prefab {
            name: "PathMover".to_string(),
            signature,
            archetype_id,
            defaults: FxHashMap::default(),
        };
        let spawned = spawn_from_prefab(&prefab, &mut ecs);
        set_target(&mut ecs, spawned.archetype_id, spawned.row, 10.0, 10.0);
        {
            let store = ecs.stores.get_mut(spawned.archetype_id).unwrap();
            let path = &mut store.paths_mut().unwrap()[0];
            path.valid = true;
            path.count = 1;
            path.current = 0;
            // Waypoint straight up +Z, away from the final target direction.
            path.waypoints[0] = glam::Vec2::new(0.0, 8.0);
        }

        let mut steering = SteeringSystem::new(&mut ecs.components);
        steering.update(&mut ecs, 0.1);

        let store = ecs.stores.get(spawned.archetype_id).unwrap();
        let v = store.velocities().unwrap()[0];
        assert!(v.z > 4.9 && v.x.abs() < 1e-4, "should head for the waypoint");
    }
}
