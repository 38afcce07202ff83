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

//! Struct-of-Arrays storage for a single archetype.
//!
//! A column exists iff the matching component id is set in the store's
//! signature (`Option`-ness encodes the invariant). Row `i` of every active
//! column belongs to the entity in `entities[i]`; rows are packed and
//! destruction swap-removes, so all columns always share one length.

use rustc_hash::FxHashMap;

use crate::component::{
    names, AttackCooldown, AvoidanceParams, ComponentRegistry, DefaultValue, Facing, Health,
    MoveSpeed, MoveTarget, ObstacleRadius, Path, PosePalette, Position, Radius, RenderAnimation,
    RenderModel, Separation, Team, Velocity,
};
use crate::entity::Entity;
use crate::mask::ComponentMask;

/// Column store for one archetype signature.
pub struct ArchetypeStore {
    signature: ComponentMask,
    pub(crate) entities: Vec<Entity>,

    // Typed columns, active iff the signature carries the component.
    pub(crate) positions: Option<Vec<Position>>,
    pub(crate) velocities: Option<Vec<Velocity>>,
    pub(crate) healths: Option<Vec<Health>>,
    pub(crate) move_targets: Option<Vec<MoveTarget>>,
    pub(crate) move_speeds: Option<Vec<MoveSpeed>>,
    pub(crate) radii: Option<Vec<Radius>>,
    pub(crate) separations: Option<Vec<Separation>>,
    pub(crate) avoidance_params: Option<Vec<AvoidanceParams>>,
    pub(crate) render_models: Option<Vec<RenderModel>>,
    pub(crate) render_animations: Option<Vec<RenderAnimation>>,
    pub(crate) facings: Option<Vec<Facing>>,
    pub(crate) obstacle_radii: Option<Vec<ObstacleRadius>>,
    pub(crate) paths: Option<Vec<Path>>,
    pub(crate) pose_palettes: Option<Vec<PosePalette>>,
    pub(crate) teams: Option<Vec<Team>>,
    pub(crate) attack_cooldowns: Option<Vec<AttackCooldown>>,
}

impl ArchetypeStore {
    /// Create a store for `signature`. Columns stay inactive until
    /// [`Self::resolve_columns`] matches the signature against the registry.
    pub fn new(signature: ComponentMask) -> Self {
        Self {
            signature,
            entities: Vec::new(),
            positions: None,
            velocities: None,
            healths: None,
            move_targets: None,
            move_speeds: None,
            radii: None,
            separations: None,
            avoidance_params: None,
            render_models: None,
            render_animations: None,
            facings: None,
            obstacle_radii: None,
            paths: None,
            pose_palettes: None,
            teams: None,
            attack_cooldowns: None,
        }
    }

    /// Activate the typed columns whose well-known names resolve to ids
    /// present in this store's signature.
    pub fn resolve_columns(&mut self, registry: &mut ComponentRegistry) {
        fn activate<T>(slot: &mut Option<Vec<T>>, active: bool) {
            if active && slot.is_none() {
                *slot = Some(Vec::new());
            }
        }

        let sig = self.signature.clone();
        activate(&mut self.positions, sig.has(registry.ensure(names::POSITION)));
        activate(&mut self.velocities, sig.has(registry.ensure(names::VELOCITY)));
        activate(&mut self.healths, sig.has(registry.ensure(names::HEALTH)));
        activate(&mut self.move_targets, sig.has(registry.ensure(names::MOVE_TARGET)));
        activate(&mut self.move_speeds, sig.has(registry.ensure(names::MOVE_SPEED)));
        activate(&mut self.radii, sig.has(registry.ensure(names::RADIUS)));
        activate(&mut self.separations, sig.has(registry.ensure(names::SEPARATION)));
        activate(
            &mut self.avoidance_params,
            sig.has(registry.ensure(names::AVOIDANCE_PARAMS)),
        );
        activate(&mut self.render_models, sig.has(registry.ensure(names::RENDER_MODEL)));
        activate(
            &mut self.render_animations,
            sig.has(registry.ensure(names::RENDER_ANIMATION)),
        );
        activate(&mut self.facings, sig.has(registry.ensure(names::FACING)));
        activate(
            &mut self.obstacle_radii,
            sig.has(registry.ensure(names::OBSTACLE_RADIUS)),
        );
        activate(&mut self.paths, sig.has(registry.ensure(names::PATH)));
        activate(&mut self.pose_palettes, sig.has(registry.ensure(names::POSE_PALETTE)));
        activate(&mut self.teams, sig.has(registry.ensure(names::TEAM)));
        activate(
            &mut self.attack_cooldowns,
            sig.has(registry.ensure(names::ATTACK_COOLDOWN)),
        );
    }

    /// Append a default-initialised row for `entity`; returns the row index.
    pub fn create_row(&mut self, entity: Entity) -> u32 {
        let row = self.entities.len() as u32;
        self.entities.push(entity);

        fn push_default<T: Default>(slot: &mut Option<Vec<T>>) {
            if let Some(col) = slot.as_mut() {
                col.push(T::default());
            }
        }

        push_default(&mut self.positions);
        push_default(&mut self.velocities);
        push_default(&mut self.healths);
        push_default(&mut self.move_targets);
        push_default(&mut self.move_speeds);
        push_default(&mut self.radii);
        push_default(&mut self.separations);
        push_default(&mut self.avoidance_params);
        push_default(&mut self.render_models);
        push_default(&mut self.render_animations);
        push_default(&mut self.facings);
        push_default(&mut self.obstacle_radii);
        push_default(&mut self.paths);
        push_default(&mut self.pose_palettes);
        push_default(&mut self.teams);
        push_default(&mut self.attack_cooldowns);

        self.debug_check_lengths();
        row
    }

    /// Overwrite `row`'s values with typed defaults. A default whose
    /// component id is missing from the signature, or whose variant does not
    /// match the column type, is silently dropped (prefab load validated
    /// them already).
    pub fn apply_defaults(&mut self, row: u32, defaults: &FxHashMap<u32, DefaultValue>) {
        let row = row as usize;
        for (&comp_id, value) in defaults {
            if !self.signature.has(comp_id) {
                continue;
            }
            match value {
                DefaultValue::Position(v) => {
                    if let Some(col) = self.positions.as_mut() {
                        col[row] = *v;
                    }
                }
                DefaultValue::Velocity(v) => {
                    if let Some(col) = self.velocities.as_mut() {
                        col[row] = *v;
                    }
                }
                DefaultValue::Health(v) => {
                    if let Some(col) = self.healths.as_mut() {
                        col[row] = *v;
                    }
                }
                DefaultValue::MoveTarget(v) => {
                    if let Some(col) = self.move_targets.as_mut() {
                        col[row] = *v;
                    }
                }
                DefaultValue::MoveSpeed(v) => {
                    if let Some(col) = self.move_speeds.as_mut() {
                        col[row] = *v;
                    }
                }
                DefaultValue::Radius(v) => {
                    if let Some(col) = self.radii.as_mut() {
                        col[row] = *v;
                    }
                }
                DefaultValue::Separation(v) => {
                    if let Some(col) = self.separations.as_mut() {
                        col[row] = *v;
                    }
                }
                DefaultValue::AvoidanceParams(v) => {
                    if let Some(col) = self.avoidance_params.as_mut() {
                        col[row] = *v;
                    }
                }
                DefaultValue::RenderModel(v) => {
                    if let Some(col) = self.render_models.as_mut() {
                        col[row] = *v;
                    }
                }
                DefaultValue::RenderAnimation(v) => {
                    if let Some(col) = self.render_animations.as_mut() {
                        col[row] = *v;
                    }
                }
                DefaultValue::Facing(v) => {
                    if let Some(col) = self.facings.as_mut() {
                        col[row] = *v;
                    }
                }
                DefaultValue::ObstacleRadius(v) => {
                    if let Some(col) = self.obstacle_radii.as_mut() {
                        col[row] = *v;
                    }
                }
                DefaultValue::Team(v) => {
                    if let Some(col) = self.teams.as_mut() {
                        col[row] = *v;
                    }
                }
                DefaultValue::AttackCooldown(v) => {
                    if let Some(col) = self.attack_cooldowns.as_mut() {
                        col[row] = *v;
                    }
                }
            }
        }
    }

    /// Swap-remove `row` from every active column.
    ///
    /// Returns the entity that moved into `row` (the previous last row), or
    /// an invalid entity if `row` was the last row or out of range. The
    /// caller must re-attach the moved entity's record to its new row.
    pub fn destroy_row_swap(&mut self, row: u32) -> Entity {
        let len = self.entities.len() as u32;
        if len == 0 || row >= len {
            return Entity::INVALID;
        }
        let last = len - 1;
        let moved = if row != last {
            self.entities[last as usize]
        } else {
            Entity::INVALID
        };

        let row = row as usize;
        self.entities.swap_remove(row);

        fn swap_out<T>(slot: &mut Option<Vec<T>>, row: usize) {
            if let Some(col) = slot.as_mut() {
                col.swap_remove(row);
            }
        }

        swap_out(&mut self.positions, row);
        swap_out(&mut self.velocities, row);
        swap_out(&mut self.healths, row);
        swap_out(&mut self.move_targets, row);
        swap_out(&mut self.move_speeds, row);
        swap_out(&mut self.radii, row);
        swap_out(&mut self.separations, row);
        swap_out(&mut self.avoidance_params, row);
        swap_out(&mut self.render_models, row);
        swap_out(&mut self.render_animations, row);
        swap_out(&mut self.facings, row);
        swap_out(&mut self.obstacle_radii, row);
        swap_out(&mut self.paths, row);
        swap_out(&mut self.pose_palettes, row);
        swap_out(&mut self.teams, row);
        swap_out(&mut self.attack_cooldowns, row);

        self.debug_check_lengths();
        moved
    }

    /// Copy every column value present in both stores from `src_row` of
    /// `self` into `dst_row` of `dst`. Used when a row migrates between
    /// archetypes (tag add).
    pub fn copy_shared_row(&self, src_row: u32, dst: &mut ArchetypeStore, dst_row: u32) {
        let s = src_row as usize;
        let d = dst_row as usize;

        fn copy<T: Clone>(src: &Option<Vec<T>>, dst: &mut Option<Vec<T>>, s: usize, d: usize) {
            if let (Some(src), Some(dst)) = (src.as_ref(), dst.as_mut()) {
                dst[d] = src[s].clone();
            }
        }

        copy(&self.positions, &mut dst.positions, s, d);
        copy(&self.velocities, &mut dst.velocities, s, d);
        copy(&self.healths, &mut dst.healths, s, d);
        copy(&self.move_targets, &mut dst.move_targets, s, d);
        copy(&self.move_speeds, &mut dst.move_speeds, s, d);
        copy(&self.radii, &mut dst.radii, s, d);
        copy(&self.separations, &mut dst.separations, s, d);
        copy(&self.avoidance_params, &mut dst.avoidance_params, s, d);
        copy(&self.render_models, &mut dst.render_models, s, d);
        copy(&self.render_animations, &mut dst.render_animations, s, d);
        copy(&self.facings, &mut dst.facings, s, d);
        copy(&self.obstacle_radii, &mut dst.obstacle_radii, s, d);
        copy(&self.paths, &mut dst.paths, s, d);
        copy(&self.pose_palettes, &mut dst.pose_palettes, s, d);
        copy(&self.teams, &mut dst.teams, s, d);
        copy(&self.attack_cooldowns, &mut dst.attack_cooldowns, s, d);
    }

    pub fn signature(&self) -> &ComponentMask {
        &self.signature
    }

    pub fn size(&self) -> u32 {
        self.entities.len() as u32
    }

    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    fn debug_check_lengths(&self) {
        #[cfg(debug_assertions)]
        {
            let n = self.entities.len();
            fn check<T>(slot: &Option<Vec<T>>, n: usize) {
                if let Some(col) = slot.as_ref() {
                    debug_assert_eq!(col.len(), n, "column length diverged from entity count");
                }
            }
            check(&self.positions, n);
            check(&self.velocities, n);
            check(&self.healths, n);
            check(&self.move_targets, n);
            check(&self.move_speeds, n);
            check(&self.radii, n);
            check(&self.separations, n);
            check(&self.avoidance_params, n);
            check(&self.render_models, n);
            check(&self.render_animations, n);
            check(&self.facings, n);
            check(&self.obstacle_radii, n);
            check(&self.paths, n);
            check(&self.pose_palettes, n);
            check(&self.teams, n);
            check(&self.attack_cooldowns, n);
        }
    }
}

macro_rules! column_accessors {
    ($(($field:ident, $field_mut:ident, $has:ident, $ty:ty)),+ $(,)?) => {
        impl ArchetypeStore {
            $(
                pub fn $field(&self) -> Option<&[$ty]> {
                    self.$field.as_deref()
                }
                pub fn $field_mut(&mut self) -> Option<&mut [$ty]> {
                    self.$field.as_deref_mut()
                }
                pub fn $has(&self) -> bool {
                    self.$field.is_some()
                }
            )+
        }
    };
}

column_accessors!(
    (positions, positions_mut, has_positions, Position),
    (velocities, velocities_mut, has_velocities, Velocity),
    (healths, healths_mut, has_healths, Health),
    (move_targets, move_targets_mut, has_move_targets, MoveTarget),
    (move_speeds, move_speeds_mut, has_move_speeds, MoveSpeed),
    (radii, radii_mut, has_radii, Radius),
    (separations, separations_mut, has_separations, Separation),
    (avoidance_params, avoidance_params_mut, has_avoidance_params, AvoidanceParams),
    (render_models, render_models_mut, has_render_models, RenderModel),
    (render_animations, render_animations_mut, has_render_animations, RenderAnimation),
    (facings, facings_mut, has_facings, Facing),
    (obstacle_radii, obstacle_radii_mut, has_obstacle_radii, ObstacleRadius),
    (paths, paths_mut, has_paths, Path),
    (pose_palettes, pose_palettes_mut, has_pose_palettes, PosePalette),
    (teams, teams_mut, has_teams, Team),
    (attack_cooldowns, attack_cooldowns_mut, has_attack_cooldowns, AttackCooldown),
);

/// Lazily constructs archetype stores keyed by archetype id.
#[derive(Default)]
pub struct StoreManager {
    stores: Vec<Option<ArchetypeStore>>,
}

impl StoreManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the store for `archetype_id`, creating it on first request.
    /// `on_created` fires exactly once per store, right after its columns
    /// resolve; the query engine hooks it to register new matches.
    pub fn get_or_create<F>(
        &mut self,
        archetype_id: u32,
        signature: &ComponentMask,
        registry: &mut ComponentRegistry,
        on_created: F,
    ) -> &mut ArchetypeStore
    where
        F: FnOnce(u32, &ComponentMask),
    {
        let idx = archetype_id as usize;
        if idx >= self.stores.len() {
            self.stores.resize_with(idx + 1, || None);
        }
        if self.stores[idx].is_none() {
            let mut store = ArchetypeStore::new(signature.clone());
            store.resolve_columns(registry);
            self.stores[idx] = Some(store);
            on_created(archetype_id, signature);
        }
        match self.stores[idx].as_mut() {
            Some(store) => store,
            None => unreachable!("store slot initialised above"),
        }
    }

    pub fn get(&self, archetype_id: u32) -> Option<&ArchetypeStore> {
        self.stores.get(archetype_id as usize)?.as_ref()
    }

    pub fn get_mut(&mut self, archetype_id: u32) -> Option<&mut ArchetypeStore> {
        self.stores.get_mut(archetype_id as usize)?.as_mut()
    }

    /// Iterate live stores as `(archetype_id, store)`.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &ArchetypeStore)> {
        self.stores
            .iter()
            .enumerate()
            .filter_map(|(id, slot)| slot.as_ref().map(|s| (id as u32, s)))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (u32, &mut ArchetypeStore)> {
        self.stores
            .iter_mut()
            .enumerate()
            .filter_map(|(id, slot)| slot.as_mut().map(|s| (id as u32, s)))
    }

    /// Number of store slots (some may be unoccupied).
    pub fn slot_count(&self) -> u32 {
        self.stores.len() as u32
    }

    pub(crate) fn slots_mut(&mut self) -> &mut [Option<ArchetypeStore>] {
        &mut self.stores
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::names;

    fn registry_and_sig(names: &[&str]) -> (ComponentRegistry, ComponentMask) {
        let mut reg = ComponentRegistry::new();
        let sig = reg.mask_from_names(names);
        (reg, sig)
    }

    #[test]
    fn columns_active_iff_in_signature() {
        let (mut reg, sig) = registry_and_sig(&[names::POSITION, names::HEALTH]);
        let mut store = ArchetypeStore::new(sig);
        store.resolve_columns(&mut reg);

        assert!(store.has_positions());
        assert!(store.has_healths());
        assert!(!store.has_velocities());
        assert!(!store.has_paths());
    }

    #[test]
    fn create_row_keeps_columns_in_lockstep() {
        let (mut reg, sig) = registry_and_sig(&[names::POSITION, names::VELOCITY]);
        let mut store = ArchetypeStore::new(sig);
        store.resolve_columns(&mut reg);

        let e = Entity {
            index: 0,
            generation: 1,
        };
        let row = store.create_row(e);
        assert_eq!(row, 0);
        assert_eq!(store.size(), 1);
        assert_eq!(store.positions().map(|p| p.len()), Some(1));
        assert_eq!(store.velocities().map(|v| v.len()), Some(1));
        assert_eq!(store.entities()[0], e);
    }

    #[test]
    fn apply_defaults_drops_mismatches() {
        let (mut reg, sig) = registry_and_sig(&[names::POSITION]);
        let velocity_id = reg.ensure(names::VELOCITY);
        let position_id = reg.id(names::POSITION);

        let mut store = ArchetypeStore::new(sig);
        store.resolve_columns(&mut reg);
        let row = store.create_row(Entity {
            index: 0,
            generation: 1,
        });

        let mut defaults = FxHashMap::default();
        defaults.insert(
            position_id,
            DefaultValue::Position(Position {
                x: 1.0,
                y: 0.0,
                z: 2.0,
            }),
        );
        // Velocity is not in the signature; must be ignored.
        defaults.insert(
            velocity_id,
            DefaultValue::Velocity(Velocity {
                x: 9.0,
                y: 9.0,
                z: 9.0,
            }),
        );

        store.apply_defaults(row, &defaults);
        let p = store.positions().map(|c| c[0]);
        assert_eq!(
            p,
            Some(Position {
                x: 1.0,
                y: 0.0,
                z: 2.0
            })
        );
    }

    #[test]
    fn destroy_row_swap_reports_moved_entity() {
        let (mut reg, sig) = registry_and_sig(&[names::POSITION]);
        let mut store = ArchetypeStore::new(sig);
        store.resolve_columns(&mut reg);

        let a = Entity {
            index: 0,
            generation: 1,
        };
        let b = Entity {
            index: 1,
            generation: 1,
        };
        let c = Entity {
            index: 2,
            generation: 1,
        };
        store.create_row(a);
        store.create_row(b);
        store.create_row(c);

        // Removing the first row relocates the last entity into it.
        let moved = store.destroy_row_swap(0);
        assert_eq!(moved, c);
        assert_eq!(store.size(), 2);
        assert_eq!(store.entities()[0], c);
        assert_eq!(store.entities()[1], b);

        // Removing the last row moves nobody.
        let moved = store.destroy_row_swap(1);
        assert_eq!(moved, Entity::INVALID);

        // Out-of-range rows are a no-op.
        let moved = store.destroy_row_swap(9);
        assert_eq!(moved, Entity::INVALID);
        assert_eq!(store.size(), 1);
    }

    #[test]
    fn store_manager_creates_lazily_and_fires_callback() {
        let mut reg = ComponentRegistry::new();
        let sig = reg.mask_from_names(&[names::POSITION]);

        let mut mgr = StoreManager::new();
        let mut created = Vec::new();
        mgr.get_or_create(3, &sig, &mut reg, |id, _| created.push(id));
        assert_eq!(created, vec![3]);
        assert!(mgr.get(3).is_some());
        assert!(mgr.get(0).is_none());

        // Second request must not re-fire the callback.
        mgr.get_or_create(3, &sig, &mut reg, |id, _| created.push(id));
        assert_eq!(created, vec![3]);
    }
}
