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

//! Integrates velocities into positions for rows whose velocity changed.

use crate::component::{names, ComponentRegistry};
use crate::context::EcsContext;
use crate::mask::ComponentMask;
use crate::query::{QueryId, INVALID_QUERY};

/// `position += velocity * dt`, dirty-keyed on `Velocity`.
///
/// Re-marks `Velocity` while a row keeps moving so it stays in the dirty
/// set next tick, and marks `Position` for downstream consumers.
pub struct MovementSystem {
    required: ComponentMask,
    excluded: ComponentMask,
    position_id: u32,
    velocity_id: u32,
    query_id: QueryId,
    matching_scratch: Vec<u32>,
    rows_scratch: Vec<u32>,
    moved_scratch: Vec<u32>,
}

impl MovementSystem {
    pub fn new(registry: &mut ComponentRegistry) -> Self {
        Self {
            required: registry.mask_from_names(&[names::POSITION, names::VELOCITY]),
            excluded: registry.mask_from_names(&[names::DISABLED, names::DEAD]),
            position_id: registry.ensure(names::POSITION),
            velocity_id: registry.ensure(names::VELOCITY),
            query_id: INVALID_QUERY,
            matching_scratch: Vec::new(),
            rows_scratch: Vec::new(),
            moved_scratch: Vec::new(),
        }
    }

    pub fn update(&mut self, ecs: &mut EcsContext, dt: f32) {
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

            self.moved_scratch.clear();
            if !rows.is_empty() {
                if let Some(store) = ecs.stores.get_mut(archetype_id) {
                    let n = store.size();
                    if let (Some(positions), Some(velocities)) = (
                        store.positions.as_deref_mut(),
                        store.velocities.as_deref(),
                    ) {
                        for &row in &rows {
                            if row >= n {
                                continue;
                            }
                            let v = velocities[row as usize];
                            if v.x.abs() + v.y.abs() + v.z.abs() <= 1e-6 {
                                continue;
                            }
                            let p = &mut positions[row as usize];
                            p.x += v.x * dt;
                            p.y += v.y * dt;
                            p.z += v.z * dt;
                            self.moved_scratch.push(row);
                        }
                    }
                }
            }
            self.rows_scratch = rows;

            for j in 0..self.moved_scratch.len() {
                let row = self.moved_scratch[j];
                ecs.mark_dirty(self.position_id, archetype_id, row);
                // Movers stay in the dirty set while velocity is non-zero.
                ecs.mark_dirty(self.velocity_id, archetype_id, row);
            }
        }
    }
}
