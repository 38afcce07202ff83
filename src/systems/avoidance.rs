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

//! Local avoidance: separation steering so units do not overlap.
//!
//! Runs after the spatial index is built and before movement integrates.
//! Steering's output velocity is the "preferred" velocity; this system nudges
//! it away from close neighbours, clamps the adjustment, and blends.

use crate::component::{names, ComponentRegistry};
use crate::context::EcsContext;
use crate::mask::ComponentMask;
use crate::query::{QueryId, INVALID_QUERY};
use crate::systems::spatial::SpatialIndexSystem;

struct Correction {
    row: u32,
    x: f32,
    z: f32,
}

/// Separation-based velocity adjustment for `Position + Velocity + Radius +
/// AvoidanceParams` units, dirty-keyed on `Velocity`.
pub struct LocalAvoidanceSystem {
    required: ComponentMask,
    excluded: ComponentMask,
    velocity_id: u32,
    query_id: QueryId,
    matching_scratch: Vec<u32>,
    rows_scratch: Vec<u32>,
    corrections: Vec<Correction>,
}

impl LocalAvoidanceSystem {
    pub fn new(registry: &mut ComponentRegistry) -> Self {
        Self {
            required: registry.mask_from_names(&[
                names::POSITION,
                names::VELOCITY,
                names::RADIUS,
                names::AVOIDANCE_PARAMS,
            ]),
            excluded: registry.mask_from_names(&[names::DISABLED, names::DEAD]),
            velocity_id: registry.ensure(names::VELOCITY),
            query_id: INVALID_QUERY,
            matching_scratch: Vec::new(),
            rows_scratch: Vec::new(),
            corrections: Vec::new(),
        }
    }

    pub fn update(&mut self, ecs: &mut EcsContext, spatial: &SpatialIndexSystem, dt: f32) {
        if dt <= 0.0 {
            return;
        }
        if self.query_id == INVALID_QUERY {
            let dirty = ComponentMask::from_ids(&[self.velocity_id]);
            self.query_id =
                ecs.queries
                    .create_dirty_query(&self.required, &self.excluded, &dirty, &ecs.stores);
        }

        self.matching_scratch.clear();
        self.matching_scratch
            .extend_from_slice(ecs.queries.matching_ids(self.query_id));

        for i in 0..self.matching_scratch.len() {
            let archetype_id = self.matching_scratch[i];
            let mut rows = std::mem::take(&mut self.rows_scratch);
            ecs.queries
                .consume_dirty_rows_into(self.query_id, archetype_id, &mut rows);
            if rows.is_empty() {
                self.rows_scratch = rows;
                continue;
            }

            // Pass 1 (stores immutable): accumulate separation corrections
            // from the 3x3 neighbourhood.
            self.corrections.clear();
            {
                let Some(store) = ecs.stores.get(archetype_id) else {
                    self.rows_scratch = rows;
                    continue;
                };
                let n = store.size();
                let (Some(positions), Some(radii)) = (store.positions(), store.radii()) else {
                    self.rows_scratch = rows;
                    continue;
                };
                let separations = store.separations();

                for &row in &rows {
                    if row >= n {
                        continue;
                    }
                    let p = positions[row as usize];
                    let r = radii[row as usize];
                    let sep_self = separations.map(|s| s[row as usize].value).unwrap_or(0.0);

                    let mut corr_x = 0.0f32;
                    let mut corr_z = 0.0f32;
                    spatial.for_neighbors(p.x, p.z, |n_aid, n_row| {
                        if n_aid == archetype_id && n_row == row {
                            return;
                        }
                        let Some(n_store) = ecs.stores.get(n_aid) else {
                            return;
                        };
                        let (Some(n_positions), Some(n_radii)) =
                            (n_store.positions(), n_store.radii())
                        else {
                            return;
                        };
                        if n_row >= n_store.size() {
                            return;
                        }
                        let np = n_positions[n_row as usize];
                        let nr = n_radii[n_row as usize];
                        let sep_other = n_store
                            .separations()
                            .map(|s| s[n_row as usize].value)
                            .unwrap_or(0.0);

                        let mut dx = p.x - np.x;
                        let mut dz = p.z - np.z;
                        let dist2 = dx * dx + dz * dz;
                        let dist = if dist2 > 1e-12 { dist2.sqrt() } else { 0.0 };

                        let desired = (r.r + nr.r) + sep_self + sep_other;
                        if dist >= desired || dist <= 1e-6 {
                            return;
                        }
                        let weight = (desired - dist) / desired;
                        dx /= dist;
                        dz /= dist;
                        corr_x += dx * weight;
                        corr_z += dz * weight;
                    });

                    if corr_x != 0.0 || corr_z != 0.0 {
                        self.corrections.push(Correction {
                            row,
                            x: corr_x,
                            z: corr_z,
                        });
                    }
                }
            }

            // Pass 2 (store mutable): fold corrections into velocities.
            let mut touched = std::mem::take(&mut rows);
            touched.clear();
            if let Some(store) = ecs.stores.get_mut(archetype_id) {
                if let (Some(velocities), Some(params)) = (
                    store.velocities.as_deref_mut(),
                    store.avoidance_params.as_deref(),
                ) {
                    for c in &self.corrections {
                        let row = c.row as usize;
                        let ap = params[row];
                        let v = &mut velocities[row];

                        let pref_x = v.x;
                        let pref_z = v.z;
                        let pref_speed = (pref_x * pref_x + pref_z * pref_z).sqrt();

                        let mut raw_x = pref_x + ap.strength * c.x;
                        let mut raw_z = pref_z + ap.strength * c.z;

                        // Never exceed the preferred speed.
                        let raw_speed = (raw_x * raw_x + raw_z * raw_z).sqrt();
                        if pref_speed > 1e-6 && raw_speed > pref_speed {
                            let s = pref_speed / raw_speed;
                            raw_x *= s;
                            raw_z *= s;
                        }

                        // Acceleration clamp relative to the preferred velocity.
                        let mut dv_x = raw_x - pref_x;
                        let mut dv_z = raw_z - pref_z;
                        let dv_mag = (dv_x * dv_x + dv_z * dv_z).sqrt();
                        let max_dv = ap.max_accel * dt;
                        if dv_mag > max_dv && dv_mag > 1e-6 {
                            let s = max_dv / dv_mag;
                            dv_x *= s;
                            dv_z *= s;
                        }

                        // Smooth the change to reduce jitter.
                        let t = ap.blend.clamp(0.0, 1.0);
                        v.x = pref_x + dv_x * t;
                        v.z = pref_z + dv_z * t;

                        let delta = (v.x - pref_x).abs() + (v.z - pref_z).abs();
                        let speed = v.x.abs() + v.y.abs() + v.z.abs();
                        if delta > 1e-6 || speed > 1e-6 {
                            touched.push(c.row);
                        }
                    }
                }
            }

            for j in 0..touched.len() {
                let row = touched[j];
                ecs.mark_dirty(self.velocity_id, archetype_id, row);
            }
            self.rows_scratch = touched;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::{Position, Velocity};
    use crate::prefab::Prefab;
    use crate::spawn::spawn_from_prefab;
    use rustc_hash::FxHashMap;

    fn avoider(ecs: &mut EcsContext, x: f32, z: f32) -> (u32, u32) {
        let signature = ecs.components.mask_from_names(&[
            names::POSITION,
            names::VELOCITY,
            names::RADIUS,
            names::AVOIDANCE_PARAMS,
        ]);
        let archetype_id = ecs.archetypes.get_or_create(&signature);
        let prefab = Prefab {
            name: "Avoider".to_string(),
            signature,
            archetype_id,
            defaults: FxHashMap::default(),
        };
        let spawned = spawn_from_prefab(&prefab, ecs);
        let store = ecs.stores.get_mut(spawned.archetype_id).unwrap();
        store.positions_mut().unwrap()[spawned.row as usize] = Position { x, y: 0.0, z };
        store.radii_mut().unwrap()[spawned.row as usize].r = 0.5;
        (spawned.archetype_id, spawned.row)
    }

    #[test]
    fn overlapping_neighbours_push_apart() {
        let mut ecs = EcsContext::new();
        let mut spatial = SpatialIndexSystem::new(&mut ecs.components, 2.0);
        let mut avoidance = LocalAvoidanceSystem::new(&mut ecs.components);

        let (aid, row_a) = avoider(&mut ecs, 0.0, 0.0);
        let (_, _row_b) = avoider(&mut ecs, 0.4, 0.0);
        {
            let store = ecs.stores.get_mut(aid).unwrap();
            store.velocities_mut().unwrap()[row_a as usize] = Velocity {
                x: 0.0,
                y: 0.0,
                z: 1.0,
            };
        }
        let velocity_id = ecs.components.id(names::VELOCITY);
        ecs.mark_dirty(velocity_id, aid, row_a);

        spatial.update(&mut ecs);
        avoidance.update(&mut ecs, &spatial, 0.1);

        let store = ecs.stores.get(aid).unwrap();
        let v = store.velocities().unwrap()[row_a as usize];
        // The neighbour sits at +X, so the correction points along -X.
        assert!(v.x < 0.0, "expected push away from neighbour, got {}", v.x);
    }
}
