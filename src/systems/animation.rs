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

//! Per-entity animation state: idle/run switching and time advance.

use crate::assets::{knight_clips, AssetCatalog};
use crate::component::{names, ComponentRegistry};
use crate::context::EcsContext;
use crate::mask::ComponentMask;
use crate::query::{QueryId, INVALID_QUERY};

/// Planar speed above which a unit counts as moving.
const MOVING_SPEED: f32 = 0.1;

/// Switches clips on movement-state changes and advances clip time.
/// Dirty-keyed on `Velocity`: the movement system re-marks movers every
/// tick, so animation only touches rows whose motion state can change.
pub struct CharacterAnimationSystem {
    required: ComponentMask,
    excluded: ComponentMask,
    render_anim_id: u32,
    query_id: QueryId,
    matching_scratch: Vec<u32>,
    rows_scratch: Vec<u32>,
    changed_scratch: Vec<u32>,
}

impl CharacterAnimationSystem {
    pub fn new(registry: &mut ComponentRegistry) -> Self {
        Self {
            required: registry.mask_from_names(&[names::RENDER_MODEL, names::RENDER_ANIMATION]),
            excluded: registry.mask_from_names(&[names::DISABLED, names::DEAD]),
            render_anim_id: registry.ensure(names::RENDER_ANIMATION),
            query_id: INVALID_QUERY,
            matching_scratch: Vec::new(),
            rows_scratch: Vec::new(),
            changed_scratch: Vec::new(),
        }
    }

    pub fn update(&mut self, ecs: &mut EcsContext, assets: &AssetCatalog, dt: f32) {
        if self.query_id == INVALID_QUERY {
            let velocity_id = ecs.components.ensure(names::VELOCITY);
            let dirty = ComponentMask::from_ids(&[velocity_id]);
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

            self.changed_scratch.clear();
            if !rows.is_empty() {
                if let Some(store) = ecs.stores.get_mut(archetype_id) {
                    let n = store.size();
                    if let (Some(models), Some(anims)) = (
                        store.render_models.as_deref(),
                        store.render_animations.as_deref_mut(),
                    ) {
                        let velocities = store.velocities.as_deref();

                        for &row in &rows {
                            if row >= n {
                                continue;
                            }
                            let Some(model) = assets.model(models[row as usize].handle) else {
                                continue;
                            };
                            let anim = &mut anims[row as usize];
                            if model.clips.is_empty() {
                                anim.clip_index = 0;
                                anim.time_sec = 0.0;
                                continue;
                            }

                            // Velocity is the ground truth for "moving".
                            let moving = velocities
                                .map(|v| {
                                    let v = v[row as usize];
                                    v.x * v.x + v.y * v.y + v.z * v.z
                                        > MOVING_SPEED * MOVING_SPEED
                                })
                                .unwrap_or(false);

                            let max_clip = (model.clips.len() - 1) as u32;
                            let wanted = if moving {
                                knight_clips::RUN
                            } else {
                                knight_clips::IDLE
                            };
                            let desired_clip = wanted.min(max_clip);

                            let mut changed = false;
                            if anim.clip_index != desired_clip {
                                anim.clip_index = desired_clip;
                                anim.time_sec = 0.0;
                                changed = true;
                            }

                            // Only animate while moving; the idle pose is
                            // cached by the pose system and reused.
                            if anim.playing != moving {
                                anim.playing = moving;
                                if !anim.playing {
                                    anim.time_sec = 0.0;
                                }
                                changed = true;
                            }
                            if !anim.looping {
                                anim.looping = true;
                                changed = true;
                            }

                            let duration = model.clips[anim.clip_index as usize].duration_sec;
                            if anim.playing && duration > 1e-6 {
                                let delta = dt * anim.speed;
                                if delta.abs() > 1e-9 {
                                    anim.time_sec += delta;
                                    changed = true;
                                }
                                if anim.looping {
                                    anim.time_sec = anim.time_sec.rem_euclid(duration);
                                } else {
                                    anim.time_sec = anim.time_sec.clamp(0.0, duration);
                                }
                            }

                            if changed {
                                self.changed_scratch.push(row);
                            }
                        }
                    }
                }
            }
            self.rows_scratch = rows;

            for j in 0..self.changed_scratch.len() {
                let row = self.changed_scratch[j];
                ecs.mark_dirty(self.render_anim_id, archetype_id, row);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::{ClipInfo, ModelData};
    use crate::component::{RenderModel, Velocity};
    use crate::prefab::Prefab;
    use crate::spawn::spawn_from_prefab;
    use rustc_hash::FxHashMap;

    fn catalog_with_clips() -> (AssetCatalog, crate::assets::ModelHandle) {
        let mut catalog = AssetCatalog::new();
        let clips = (0..=66)
            .map(|i| ClipInfo {
                name: format!("clip_{i}"),
                duration_sec: 2.0,
            })
            .collect();
        let handle = catalog.register_model("units/knight.smodel", ModelData::new(4, clips));
        (catalog, handle)
    }

    fn animated_unit(ecs: &mut EcsContext, handle: crate::assets::ModelHandle) -> (u32, u32) {
        let signature = ecs.components.mask_from_names(&[
            names::RENDER_MODEL,
            names::RENDER_ANIMATION,
            names::POSITION,
            names::VELOCITY,
        ]);
        let archetype_id = ecs.archetypes.get_or_create(&signature);
        let prefab = Prefab {
            name: "Animated".to_string(),
            signature,
            archetype_id,
            defaults: FxHashMap::default(),
        };
        let spawned = spawn_from_prefab(&prefab, ecs);
        let store = ecs.stores.get_mut(spawned.archetype_id).unwrap();
        store.render_models_mut().unwrap()[spawned.row as usize] = RenderModel { handle };
        (spawned.archetype_id, spawned.row)
    }

    #[test]
    fn switches_between_idle_and_run() {
        let (catalog, handle) = catalog_with_clips();
        let mut ecs = EcsContext::new();
        let mut animation = CharacterAnimationSystem::new(&mut ecs.components);
        let (archetype_id, row) = animated_unit(&mut ecs, handle);
        let velocity_id = ecs.components.id(names::VELOCITY);

        // Spawn pre-marked the row: first update lands on idle.
        animation.update(&mut ecs, &catalog, 0.1);
        {
            let store = ecs.stores.get(archetype_id).unwrap();
            let anim = store.render_animations().unwrap()[row as usize];
            assert_eq!(anim.clip_index, knight_clips::IDLE);
            assert!(!anim.playing);
        }

        // Start moving: run clip, playing, time advancing.
        {
            let store = ecs.stores.get_mut(archetype_id).unwrap();
            store.velocities_mut().unwrap()[row as usize] = Velocity {
                x: 3.0,
                y: 0.0,
                z: 0.0,
            };
        }
        ecs.mark_dirty(velocity_id, archetype_id, row);
        animation.update(&mut ecs, &catalog, 0.1);

        let store = ecs.stores.get(archetype_id).unwrap();
        let anim = store.render_animations().unwrap()[row as usize];
        assert_eq!(anim.clip_index, knight_clips::RUN);
        assert!(anim.playing);
        assert!(anim.time_sec > 0.0);
    }

    #[test]
    fn looping_time_wraps_at_clip_duration() {
        let (catalog, handle) = catalog_with_clips();
        let mut ecs = EcsContext::new();
        let mut animation = CharacterAnimationSystem::new(&mut ecs.components);
        let (archetype_id, row) = animated_unit(&mut ecs, handle);
        let velocity_id = ecs.components.id(names::VELOCITY);

        {
            let store = ecs.stores.get_mut(archetype_id).unwrap();
            store.velocities_mut().unwrap()[row as usize] = Velocity {
                x: 3.0,
                y: 0.0,
                z: 0.0,
            };
        }
        // Clip duration is 2 s; 1.5 s twice must wrap to 1 s.
        for _ in 0..2 {
            ecs.mark_dirty(velocity_id, archetype_id, row);
            animation.update(&mut ecs, &catalog, 1.5);
        }

        let store = ecs.stores.get(archetype_id).unwrap();
        let anim = store.render_animations().unwrap()[row as usize];
        assert!((anim.time_sec - 1.0).abs() < 1e-4, "got {}", anim.time_sec);
    }
}
