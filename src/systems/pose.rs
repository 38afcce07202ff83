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

//! Rebuilds cached pose palettes (node and joint matrices) for entities
//! whose animation state or model changed.

use glam::Mat4;

use crate::assets::AssetCatalog;
use crate::component::{names, ComponentRegistry};
use crate::context::EcsContext;
use crate::mask::ComponentMask;
use crate::query::{QueryId, INVALID_QUERY};

/// Evaluates model poses into `PosePalette` components, dirty-keyed on
/// `RenderAnimation` + `RenderModel`.
pub struct PoseUpdateSystem {
    required: ComponentMask,
    excluded: ComponentMask,
    query_id: QueryId,
    matching_scratch: Vec<u32>,
    rows_scratch: Vec<u32>,
    // Scratch reused across rows.
    globals_scratch: Vec<Mat4>,
}

impl PoseUpdateSystem {
    pub fn new(registry: &mut ComponentRegistry) -> Self {
        Self {
            required: registry.mask_from_names(&[
                names::RENDER_MODEL,
                names::RENDER_ANIMATION,
                names::POSE_PALETTE,
            ]),
            excluded: registry.mask_from_names(&[names::DISABLED, names::DEAD]),
            query_id: INVALID_QUERY,
            matching_scratch: Vec::new(),
            rows_scratch: Vec::new(),
            globals_scratch: Vec::new(),
        }
    }

    pub fn update(&mut self, ecs: &mut EcsContext, assets: &AssetCatalog) {
        if self.query_id == INVALID_QUERY {
            let render_anim_id = ecs.components.ensure(names::RENDER_ANIMATION);
            let render_model_id = ecs.components.ensure(names::RENDER_MODEL);
            let dirty = ComponentMask::from_ids(&[render_anim_id, render_model_id]);
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

            let Some(store) = ecs.stores.get_mut(archetype_id) else {
                self.rows_scratch = rows;
                continue;
            };
            let n = store.size();
            let (Some(models), Some(anims), Some(palettes)) = (
                store.render_models.as_deref(),
                store.render_animations.as_deref(),
                store.pose_palettes.as_deref_mut(),
            ) else {
                self.rows_scratch = rows;
                continue;
            };

            for &row in &rows {
                if row >= n {
                    continue;
                }
                let row = row as usize;
                let out = &mut palettes[row];

                let Some(model) = assets.model(models[row].handle) else {
                    out.node_palette.clear();
                    out.joint_palette.clear();
                    out.node_count = 0;
                    out.joint_count = 0;
                    continue;
                };
                if model.node_count == 0 {
                    out.node_palette.clear();
                    out.joint_palette.clear();
                    out.node_count = 0;
                    out.joint_count = 0;
                    continue;
                }

                let anim = &anims[row];
                let safe_clip = if model.clips.is_empty() {
                    0
                } else {
                    anim.clip_index.min((model.clips.len() - 1) as u32)
                };
                let time_sec = if !model.clips.is_empty() && anim.playing {
                    anim.time_sec
                } else {
                    0.0
                };

                model.evaluate_pose_into(safe_clip, time_sec, &mut self.globals_scratch);

                out.node_count = model.node_count;
                out.node_palette.clear();
                out.node_palette.extend_from_slice(&self.globals_scratch);

                // Joint palette: globals[joint_node] * inverse_bind, per skin.
                out.joint_count = model.total_joint_count;
                out.joint_palette.clear();
                out.joint_palette
                    .resize(out.joint_count as usize, Mat4::IDENTITY);

                if out.joint_count > 0 && self.globals_scratch.len() == out.node_count as usize {
                    for skin in &model.skins {
                        for j in 0..skin.joint_count as usize {
                            let (Some(&node_ix), Some(&inverse_bind)) =
                                (skin.joint_node_indices.get(j), skin.inverse_bind.get(j))
                            else {
                                continue;
                            };
                            let Some(&global) = self.globals_scratch.get(node_ix as usize) else {
                                continue;
                            };
                            let out_ix = (skin.joint_base as usize) + j;
                            if let Some(slot) = out.joint_palette.get_mut(out_ix) {
                                *slot = global * inverse_bind;
                            }
                        }
                    }
                }
            }

            self.rows_scratch = rows;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::{ClipInfo, ModelData, SkinData};
    use crate::component::RenderModel;
    use crate::prefab::Prefab;
    use crate::spawn::spawn_from_prefab;
    use rustc_hash::FxHashMap;

    #[test]
    fn rebuilds_palettes_for_dirty_rows() {
        let mut catalog = AssetCatalog::new();
        let skin = SkinData {
            joint_base: 0,
            joint_count: 2,
            joint_node_indices: vec![0, 1],
            inverse_bind: vec![Mat4::IDENTITY, Mat4::from_scale(glam::Vec3::splat(2.0))],
        };
        let data = ModelData::new(
            2,
            vec![ClipInfo {
                name: "idle".to_string(),
                duration_sec: 1.0,
            }],
        )
        .with_skins(vec![skin])
        .with_sampler(Box::new(|_, _, out| {
            out[1] = Mat4::from_translation(glam::Vec3::new(1.0, 0.0, 0.0));
        }));
        let handle = catalog.register_model("m", data);

        let mut ecs = EcsContext::new();
        let mut pose = PoseUpdateSystem::new(&mut ecs.components);
        let signature = ecs.components.mask_from_names(&[
            names::RENDER_MODEL,
            names::RENDER_ANIMATION,
            names::POSE_PALETTE,
        ]);
        let archetype_id = ecs.archetypes.get_or_create(&signature);
        let prefab = Prefab {
            name: "Posed".to_string(),
            signature,
            archetype_id,
            defaults: FxHashMap::default(),
        };
        let spawned = spawn_from_prefab(&prefab, &mut ecs);
        {
            let store = ecs.stores.get_mut(spawned.archetype_id).unwrap();
            store.render_models_mut().unwrap()[spawned.row as usize] = RenderModel { handle };
        }

        pose.update(&mut ecs, &catalog);

        let store = ecs.stores.get(spawned.archetype_id).unwrap();
        let palette = &store.pose_palettes().unwrap()[spawned.row as usize];
        assert_eq!(palette.node_count, 2);
        assert_eq!(palette.node_palette.len(), 2);
        assert_eq!(palette.joint_count, 2);
        // Joint 1 = sampled global * inverse bind.
        let expected = Mat4::from_translation(glam::Vec3::new(1.0, 0.0, 0.0))
            * Mat4::from_scale(glam::Vec3::splat(2.0));
        assert_eq!(palette.joint_palette[1], expected);

        // Second update without new marks touches nothing (consume-and-clear).
        pose.update(&mut ecs, &catalog);
    }
}
