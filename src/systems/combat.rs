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

//! Auto-combat for mass battles with variance mechanics.
//!
//! Per living unit each tick:
//!   1. Tick the attack cooldown.
//!   2. Find the nearest living enemy (spatial grid, full-scan fallback).
//!   3. In melee range: roll miss, damage in [min,max], rage bonus from
//!      missing HP, crit, and cooldown jitter so swings desync.
//!   4. Out of range: chase the enemy.
//!   5. HP <= 0: death animation, Dead tag, delayed removal.
//!
//! Iteration never writes archetype columns directly: every intent is queued
//! in persistent buffers during the read pass and applied afterwards, so
//! reads and writes cannot alias and swap-removes cannot invalidate indices.
//!
//! Battle-start choreography ("charge") runs in two legs: leg 1 sends every
//! unit to the clicked point, leg 2 retargets each unit to the nearest enemy
//! once it passes within `PASS_RADIUS` of the click. `PASS_RADIUS` must stay
//! above steering's arrival radius so the redirect happens while the unit is
//! still running.

use ahash::AHashMap;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rustc_hash::FxHashSet;
use serde::Deserialize;
use tracing::info;

use crate::assets::knight_clips;
use crate::component::{names, ComponentRegistry};
use crate::context::EcsContext;
use crate::entity::Entity;
use crate::mask::ComponentMask;
use crate::query::{QueryId, INVALID_QUERY};
use crate::systems::spatial::SpatialIndexSystem;

/// Radius at which a charging unit counts as "passing" the click point.
/// Must exceed steering's 1 m arrival radius so leg-2 promotion fires
/// before steering parks the unit.
const PASS_RADIUS: f32 = 3.0;
const PASS_RADIUS2: f32 = PASS_RADIUS * PASS_RADIUS;

/// Per-team aggregates for the HUD overlay.
#[derive(Debug, Clone, Copy, Default)]
pub struct TeamStats {
    pub alive: u32,
    pub total_spawned: u32,
    pub current_hp: f32,
    pub max_hp: f32,
}

/// All combat tuning in one struct; maps 1:1 to the scenario's `combat`
/// JSON block.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CombatConfig {
    pub melee_range: f32,
    pub damage_min: f32,
    pub damage_max: f32,
    pub death_remove_delay: f32,
    #[serde(rename = "maxHPPerUnit")]
    pub max_hp_per_unit: f32,

    /// 0-1, chance an attack whiffs.
    pub miss_chance: f32,
    /// 0-1, chance for a critical hit.
    pub crit_chance: f32,
    pub crit_multiplier: f32,

    /// At zero HP remaining the damage bonus reaches this fraction.
    pub rage_max_bonus: f32,
    /// Random cooldown variation, +/- this fraction.
    pub cooldown_jitter: f32,
    /// Max random initial cooldown offset (seconds).
    pub stagger_max: f32,
}

impl Default for CombatConfig {
    fn default() -> Self {
        Self {
            melee_range: 2.0,
            damage_min: 12.0,
            damage_max: 28.0,
            death_remove_delay: 3.0,
            max_hp_per_unit: 140.0,
            miss_chance: 0.20,
            crit_chance: 0.10,
            crit_multiplier: 2.0,
            rage_max_bonus: 0.50,
            cooldown_jitter: 0.30,
            stagger_max: 0.6,
        }
    }
}

/// Clip index ranges used by combat reactions.
#[derive(Debug, Clone, Copy)]
pub struct CombatAnimSet {
    pub attack_start: u32,
    pub attack_end: u32,
    pub damage_start: u32,
    pub damage_end: u32,
    pub death_start: u32,
    pub death_end: u32,
    pub run: u32,
}

impl Default for CombatAnimSet {
    fn default() -> Self {
        Self {
            attack_start: knight_clips::ATTACK_START,
            attack_end: knight_clips::ATTACK_END,
            damage_start: knight_clips::DAMAGE_START,
            damage_end: knight_clips::DAMAGE_END,
            death_start: knight_clips::DEATH_START,
            death_end: knight_clips::DEATH_END,
            run: knight_clips::RUN,
        }
    }
}

struct PendingDeath {
    entity: Entity,
    time_remaining: f32,
}

// Deferred-action records, queued during the read pass.
struct DamageAction {
    target: Entity,
    amount: f32,
}
struct AnimAction {
    entity: Entity,
    clip: u32,
    speed: f32,
}
struct AttackAction {
    entity: Entity,
    clip: u32,
    new_cooldown: f32,
}
struct MoveAction {
    entity: Entity,
    tx: f32,
    tz: f32,
    yaw: f32,
    set_run_anim: bool,
}
struct StopAction {
    entity: Entity,
    yaw: f32,
}
#[derive(Clone, Copy)]
struct Promotion {
    archetype_id: u32,
    row: u32,
    tx: f32,
    tz: f32,
}

/// The battle simulation driver.
pub struct CombatSystem {
    required: ComponentMask,
    excluded: ComponentMask,
    velocity_id: u32,
    move_target_id: u32,
    render_anim_id: u32,
    dead_id: u32,
    query_id: QueryId,

    cfg: CombatConfig,
    anims: CombatAnimSet,

    battle_started: bool,
    charge_active: bool,
    charge_issued: bool,
    battle_click: (f32, f32),
    staggered: bool,
    stats_dirty: bool,

    team_stats: AHashMap<u8, TeamStats>,
    death_queue: Vec<PendingDeath>,
    death_queue_set: FxHashSet<u32>,

    // Persistent per-tick buffers: cleared, never freed.
    damages: Vec<DamageAction>,
    attack_anims: Vec<AttackAction>,
    damage_anims: Vec<AnimAction>,
    moves: Vec<MoveAction>,
    stops: Vec<StopAction>,
    newly_dead: Vec<Entity>,
    promotions: Vec<Promotion>,
    matching_scratch: Vec<u32>,
    rows_scratch: Vec<u32>,

    rng: StdRng,
}

impl CombatSystem {
    pub fn new(registry: &mut ComponentRegistry) -> Self {
        Self {
            required: registry.mask_from_names(&[
                names::POSITION,
                names::HEALTH,
                names::VELOCITY,
                names::MOVE_TARGET,
                names::MOVE_SPEED,
                names::FACING,
                names::TEAM,
                names::ATTACK_COOLDOWN,
                names::RENDER_ANIMATION,
            ]),
            excluded: registry.mask_from_names(&[names::DEAD, names::DISABLED]),
            velocity_id: registry.ensure(names::VELOCITY),
            move_target_id: registry.ensure(names::MOVE_TARGET),
            render_anim_id: registry.ensure(names::RENDER_ANIMATION),
            dead_id: registry.ensure(names::DEAD),
            query_id: INVALID_QUERY,
            cfg: CombatConfig::default(),
            anims: CombatAnimSet::default(),
            battle_started: false,
            charge_active: false,
            charge_issued: false,
            battle_click: (0.0, 0.0),
            staggered: false,
            stats_dirty: true,
            team_stats: AHashMap::new(),
            death_queue: Vec::new(),
            death_queue_set: FxHashSet::default(),
            damages: Vec::new(),
            attack_anims: Vec::new(),
            damage_anims: Vec::new(),
            moves: Vec::new(),
            stops: Vec::new(),
            newly_dead: Vec::new(),
            promotions: Vec::new(),
            matching_scratch: Vec::new(),
            rows_scratch: Vec::new(),
            // Each run plays out differently.
            rng: StdRng::from_entropy(),
        }
    }

    /// Deterministic RNG for reproducible simulations.
    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn apply_config(&mut self, cfg: CombatConfig) {
        self.cfg = cfg;
    }

    pub fn config(&self) -> &CombatConfig {
        &self.cfg
    }

    pub fn set_anim_set(&mut self, anims: CombatAnimSet) {
        self.anims = anims;
    }

    /// Begin the battle with the two-leg charge through `(click_x, click_z)`.
    pub fn start_battle_at(&mut self, click_x: f32, click_z: f32) {
        self.battle_started = true;
        self.charge_active = true;
        self.charge_issued = false;
        self.battle_click = (click_x, click_z);
        info!(click_x, click_z, "battle started");
    }

    /// Begin the battle with no charge: units engage from where they stand.
    pub fn start_battle(&mut self) {
        self.battle_started = true;
        self.charge_active = false;
        self.charge_issued = false;
        info!("battle started (no charge)");
    }

    pub fn is_battle_started(&self) -> bool {
        self.battle_started
    }

    /// Latest aggregates for `team_id` (refreshed on change).
    pub fn team_stats(&self, team_id: u8) -> TeamStats {
        self.team_stats.get(&team_id).copied().unwrap_or_default()
    }

    pub fn pending_deaths(&self) -> usize {
        self.death_queue.len()
    }

    pub fn update(&mut self, ecs: &mut EcsContext, spatial: &SpatialIndexSystem, dt: f32) {
        if self.query_id == INVALID_QUERY {
            self.query_id = ecs
                .queries
                .create_query(&self.required, &self.excluded, &ecs.stores);
        }

        // One-time startup: log tuning, desynchronise first swings.
        if !self.staggered {
            info!(
                range = self.cfg.melee_range,
                dmg_min = self.cfg.damage_min,
                dmg_max = self.cfg.damage_max,
                miss = self.cfg.miss_chance,
                crit = self.cfg.crit_chance,
                rage = self.cfg.rage_max_bonus,
                "combat active"
            );
            self.stagger_initial_cooldowns(ecs);
            self.staggered = true;
        }

        if self.stats_dirty {
            self.refresh_team_stats(ecs);
            self.stats_dirty = false;
        }

        self.process_death_removals(ecs, dt);

        if !self.battle_started {
            return;
        }

        self.matching_scratch.clear();
        self.matching_scratch
            .extend_from_slice(ecs.queries.matching_ids(self.query_id));

        if self.charge_active && !self.charge_issued {
            self.issue_click_targets(ecs);
            self.charge_issued = true;
        }
        if self.charge_active {
            self.promote_units_near_click(ecs, spatial);
        }

        self.tick_cooldowns(ecs, dt);
        self.decide_actions(ecs, spatial);
        self.apply_actions(ecs);
        self.collect_newly_dead(ecs);
    }

    // Stagger initial cooldowns so units do not all swing on the same tick.
    fn stagger_initial_cooldowns(&mut self, ecs: &mut EcsContext) {
        self.matching_scratch.clear();
        self.matching_scratch
            .extend_from_slice(ecs.queries.matching_ids(self.query_id));
        for i in 0..self.matching_scratch.len() {
            let archetype_id = self.matching_scratch[i];
            let Some(store) = ecs.stores.get_mut(archetype_id) else {
                continue;
            };
            let Some(cooldowns) = store.attack_cooldowns.as_deref_mut() else {
                continue;
            };
            for cd in cooldowns.iter_mut() {
                cd.timer = self.rng.gen::<f32>() * self.cfg.stagger_max;
            }
        }
    }

    fn refresh_team_stats(&mut self, ecs: &EcsContext) {
        for stats in self.team_stats.values_mut() {
            stats.alive = 0;
            stats.current_hp = 0.0;
        }

        for &archetype_id in ecs.queries.matching_ids(self.query_id) {
            let Some(store) = ecs.stores.get(archetype_id) else {
                continue;
            };
            let (Some(healths), Some(teams)) = (store.healths(), store.teams()) else {
                continue;
            };
            for (hp, team) in healths.iter().zip(teams) {
                let stats = self.team_stats.entry(team.id).or_default();
                stats.alive += 1;
                stats.current_hp += hp.value.max(0.0);
            }
        }

        // `total_spawned` is the high-watermark of `alive` over time.
        for stats in self.team_stats.values_mut() {
            stats.total_spawned = stats.total_spawned.max(stats.alive);
            stats.max_hp = stats.total_spawned as f32 * self.cfg.max_hp_per_unit;
        }
    }

    // Death-queue tick: runs at tick start. Swap-and-pop keeps removal O(1).
    fn process_death_removals(&mut self, ecs: &mut EcsContext, dt: f32) {
        let mut i = 0;
        while i < self.death_queue.len() {
            self.death_queue[i].time_remaining -= dt;
            if self.death_queue[i].time_remaining <= 0.0 {
                let entity = self.death_queue[i].entity;
                ecs.destroy_entity(entity);
                self.death_queue_set.remove(&entity.index);
                self.death_queue.swap_remove(i);
            } else {
                i += 1;
            }
        }
    }

    // Leg 1: everyone runs for the click point.
    fn issue_click_targets(&mut self, ecs: &mut EcsContext) {
        let (click_x, click_z) = self.battle_click;
        for i in 0..self.matching_scratch.len() {
            let archetype_id = self.matching_scratch[i];
            self.rows_scratch.clear();
            {
                let Some(store) = ecs.stores.get_mut(archetype_id) else {
                    continue;
                };
                let (Some(targets), Some(healths)) = (
                    store.move_targets.as_deref_mut(),
                    store.healths.as_deref(),
                ) else {
                    continue;
                };
                for (row, (target, hp)) in targets.iter_mut().zip(healths).enumerate() {
                    if hp.value <= 0.0 {
                        continue;
                    }
                    target.x = click_x;
                    target.y = 0.0;
                    target.z = click_z;
                    target.active = 1;
                    self.rows_scratch.push(row as u32);
                }
            }
            for j in 0..self.rows_scratch.len() {
                let row = self.rows_scratch[j];
                ecs.mark_dirty(self.move_target_id, archetype_id, row);
            }
        }
        info!(click_x, click_z, "charge leg 1: all units to click point");
    }

    // Leg 2: units passing the click point swap their target to the nearest
    // living enemy and force a replan. Candidates are gathered during an
    // immutable scan and applied afterwards.
    fn promote_units_near_click(&mut self, ecs: &mut EcsContext, spatial: &SpatialIndexSystem) {
        let (click_x, click_z) = self.battle_click;
        self.promotions.clear();

        for i in 0..self.matching_scratch.len() {
            let archetype_id = self.matching_scratch[i];
            let Some(store) = ecs.stores.get(archetype_id) else {
                continue;
            };
            let (Some(positions), Some(healths), Some(targets), Some(teams)) = (
                store.positions(),
                store.healths(),
                store.move_targets(),
                store.teams(),
            ) else {
                continue;
            };

            for row in 0..store.size() {
                let r = row as usize;
                if healths[r].value <= 0.0 || targets[r].active == 0 {
                    continue;
                }

                // Already promoted: the target no longer equals the click.
                let dtx = targets[r].x - click_x;
                let dtz = targets[r].z - click_z;
                if dtx * dtx + dtz * dtz > 1.0 {
                    continue;
                }

                let dx = positions[r].x - click_x;
                let dz = positions[r].z - click_z;
                if dx * dx + dz * dz > PASS_RADIUS2 {
                    continue;
                }

                let (ex, ez, _, _) = nearest_enemy(
                    ecs,
                    spatial,
                    &self.matching_scratch,
                    archetype_id,
                    row,
                    teams[r].id,
                    positions[r].x,
                    positions[r].z,
                );

                self.promotions.push(Promotion {
                    archetype_id,
                    row,
                    tx: ex,
                    tz: ez,
                });
            }
        }

        for i in 0..self.promotions.len() {
            let Promotion {
                archetype_id,
                row,
                tx,
                tz,
            } = self.promotions[i];
            {
                let Some(store) = ecs.stores.get_mut(archetype_id) else {
                    continue;
                };
                if let Some(targets) = store.move_targets.as_deref_mut() {
                    let target = &mut targets[row as usize];
                    target.x = tx;
                    target.y = 0.0;
                    target.z = tz;
                    target.active = 1;
                }
                // Force an A* replan for the second leg.
                if let Some(paths) = store.paths.as_deref_mut() {
                    paths[row as usize].valid = false;
                }
            }
            ecs.mark_dirty(self.move_target_id, archetype_id, row);
        }
    }

    // Cooldowns tick down in their own mutable pass so the decision pass
    // can borrow every store immutably.
    fn tick_cooldowns(&mut self, ecs: &mut EcsContext, dt: f32) {
        for i in 0..self.matching_scratch.len() {
            let archetype_id = self.matching_scratch[i];
            let Some(store) = ecs.stores.get_mut(archetype_id) else {
                continue;
            };
            let (Some(cooldowns), Some(healths)) = (
                store.attack_cooldowns.as_deref_mut(),
                store.healths.as_deref(),
            ) else {
                continue;
            };
            for (cd, hp) in cooldowns.iter_mut().zip(healths) {
                if hp.value > 0.0 && cd.timer > 0.0 {
                    cd.timer -= dt;
                }
            }
        }
    }

    // Read pass: one sweep over matching stores, queueing intents only.
    fn decide_actions(&mut self, ecs: &EcsContext, spatial: &SpatialIndexSystem) {
        let melee_range2 = self.cfg.melee_range * self.cfg.melee_range;

        self.damages.clear();
        self.attack_anims.clear();
        self.damage_anims.clear();
        self.moves.clear();
        self.stops.clear();

        for i in 0..self.matching_scratch.len() {
            let archetype_id = self.matching_scratch[i];
            let Some(store) = ecs.stores.get(archetype_id) else {
                continue;
            };
            let (Some(positions), Some(healths), Some(teams), Some(cooldowns)) = (
                store.positions(),
                store.healths(),
                store.teams(),
                store.attack_cooldowns(),
            ) else {
                continue;
            };
            let (Some(targets), Some(anims), Some(facings)) = (
                store.move_targets(),
                store.render_animations(),
                store.facings(),
            ) else {
                continue;
            };
            let entities = store.entities();

            for row in 0..store.size() {
                let r = row as usize;
                // Already-dead units waiting on tag migration are skipped.
                if healths[r].value <= 0.0 {
                    continue;
                }

                let my_entity = entities[r];
                let my_team = teams[r].id;
                let my_x = positions[r].x;
                let my_z = positions[r].z;

                let (best_ex, best_ez, best_dist2, best_enemy) = nearest_enemy(
                    ecs,
                    spatial,
                    &self.matching_scratch,
                    archetype_id,
                    row,
                    my_team,
                    my_x,
                    my_z,
                );

                if !best_enemy.is_valid() {
                    // No enemy left: keep running during a charge, stop
                    // otherwise.
                    if !self.charge_active {
                        self.stops.push(StopAction {
                            entity: my_entity,
                            yaw: facings[r].yaw,
                        });
                    }
                    continue;
                }

                let dx = best_ex - my_x;
                let dz = best_ez - my_z;
                let yaw = if dx * dx + dz * dz > 1e-6 {
                    dx.atan2(dz)
                } else {
                    facings[r].yaw
                };

                if best_dist2 <= melee_range2 {
                    // First melee contact ends the charge phase.
                    if self.charge_active {
                        self.charge_active = false;
                    }

                    self.stops.push(StopAction {
                        entity: my_entity,
                        yaw,
                    });

                    if cooldowns[r].timer <= 0.0 {
                        let jitter =
                            1.0 + self.rng.gen_range(-1.0..1.0f32) * self.cfg.cooldown_jitter;
                        let new_cooldown = cooldowns[r].interval * jitter;
                        let attack_clip = self
                            .rng
                            .gen_range(self.anims.attack_start..=self.anims.attack_end);
                        self.attack_anims.push(AttackAction {
                            entity: my_entity,
                            clip: attack_clip,
                            new_cooldown,
                        });

                        if self.rng.gen::<f32>() < self.cfg.miss_chance {
                            // Whiff: the swing plays, nothing lands.
                        } else {
                            let mut damage = self.cfg.damage_min
                                + self.rng.gen::<f32>()
                                    * (self.cfg.damage_max - self.cfg.damage_min);

                            // Berserker rage: missing HP scales damage up.
                            let hp_frac = healths[r].value / self.cfg.max_hp_per_unit;
                            damage *=
                                1.0 + self.cfg.rage_max_bonus * (1.0 - hp_frac.clamp(0.0, 1.0));

                            let is_crit = self.rng.gen::<f32>() < self.cfg.crit_chance;
                            if is_crit {
                                damage *= self.cfg.crit_multiplier;
                            }

                            self.damages.push(DamageAction {
                                target: best_enemy,
                                amount: damage,
                            });
                            let damage_clip = self
                                .rng
                                .gen_range(self.anims.damage_start..=self.anims.damage_end);
                            self.damage_anims.push(AnimAction {
                                entity: best_enemy,
                                clip: damage_clip,
                                // Crits play the reaction faster for punch.
                                speed: if is_crit { 1.4 } else { 1.0 },
                            });
                        }
                    }
                } else {
                    // Out of range: chase. During a charge, units still on
                    // leg 1 (target == click point) hold their course.
                    let mut skip_chase = false;
                    if self.charge_active {
                        let tdx = targets[r].x - self.battle_click.0;
                        let tdz = targets[r].z - self.battle_click.1;
                        skip_chase = targets[r].active != 0 && tdx * tdx + tdz * tdz < 1.0;
                    }
                    if !skip_chase {
                        self.moves.push(MoveAction {
                            entity: my_entity,
                            tx: best_ex,
                            tz: best_ez,
                            yaw,
                            set_run_anim: anims[r].clip_index != self.anims.run,
                        });
                    }
                }
            }
        }
    }

    // Write pass: iteration is over, mutations are safe.
    fn apply_actions(&mut self, ecs: &mut EcsContext) {
        for stop in &self.stops {
            let Some(record) = ecs.entities.find(stop.entity) else {
                continue;
            };
            {
                let Some(store) = ecs.stores.get_mut(record.archetype_id) else {
                    continue;
                };
                if record.row >= store.size() {
                    continue;
                }
                let r = record.row as usize;
                if let Some(velocities) = store.velocities.as_deref_mut() {
                    velocities[r].x = 0.0;
                    velocities[r].y = 0.0;
                    velocities[r].z = 0.0;
                }
                if let Some(targets) = store.move_targets.as_deref_mut() {
                    targets[r].active = 0;
                }
                if let Some(facings) = store.facings.as_deref_mut() {
                    facings[r].yaw = stop.yaw;
                }
            }
            ecs.mark_dirty(self.velocity_id, record.archetype_id, record.row);
        }

        for mv in &self.moves {
            let Some(record) = ecs.entities.find(mv.entity) else {
                continue;
            };
            let mut target_changed = false;
            let mut anim_changed = false;
            {
                let Some(store) = ecs.stores.get_mut(record.archetype_id) else {
                    continue;
                };
                if record.row >= store.size() {
                    continue;
                }
                let r = record.row as usize;
                if let Some(targets) = store.move_targets.as_deref_mut() {
                    let target = &mut targets[r];
                    // Only re-path when the target moved noticeably or was
                    // inactive; avoids replan thrash while chasing.
                    let dtx = target.x - mv.tx;
                    let dtz = target.z - mv.tz;
                    if dtx * dtx + dtz * dtz > 4.0 || target.active == 0 {
                        target.x = mv.tx;
                        target.y = 0.0;
                        target.z = mv.tz;
                        target.active = 1;
                        if let Some(paths) = store.paths.as_deref_mut() {
                            paths[r].valid = false;
                        }
                        target_changed = true;
                    }
                }
                if let Some(facings) = store.facings.as_deref_mut() {
                    facings[r].yaw = mv.yaw;
                }
                if mv.set_run_anim {
                    if let Some(anims) = store.render_animations.as_deref_mut() {
                        if anims[r].clip_index != self.anims.run {
                            anims[r].clip_index = self.anims.run;
                            anims[r].time_sec = 0.0;
                            anims[r].playing = true;
                            anims[r].looping = true;
                            anims[r].speed = 1.0;
                            anim_changed = true;
                        }
                    }
                }
            }
            if target_changed {
                ecs.mark_dirty(self.move_target_id, record.archetype_id, record.row);
            }
            if anim_changed {
                ecs.mark_dirty(self.render_anim_id, record.archetype_id, record.row);
            }
        }

        for attack in &self.attack_anims {
            let Some(record) = ecs.entities.find(attack.entity) else {
                continue;
            };
            {
                let Some(store) = ecs.stores.get_mut(record.archetype_id) else {
                    continue;
                };
                if record.row >= store.size() {
                    continue;
                }
                let r = record.row as usize;
                if let Some(cooldowns) = store.attack_cooldowns.as_deref_mut() {
                    cooldowns[r].timer = attack.new_cooldown;
                }
                let Some(anims) = store.render_animations.as_deref_mut() else {
                    continue;
                };
                anims[r].clip_index = attack.clip;
                anims[r].time_sec = 0.0;
                anims[r].playing = true;
                anims[r].looping = false;
                anims[r].speed = 1.5;
            }
            ecs.mark_dirty(self.render_anim_id, record.archetype_id, record.row);
        }

        for damage in &self.damages {
            let Some(record) = ecs.entities.find(damage.target) else {
                continue;
            };
            let Some(store) = ecs.stores.get_mut(record.archetype_id) else {
                continue;
            };
            if record.row >= store.size() {
                continue;
            }
            if let Some(healths) = store.healths.as_deref_mut() {
                healths[record.row as usize].value -= damage.amount;
                self.stats_dirty = true;
            }
        }

        // Damage reactions only play on units that survived the hit; the
        // death animation below overrides for the rest.
        for reaction in &self.damage_anims {
            let Some(record) = ecs.entities.find(reaction.entity) else {
                continue;
            };
            let mut changed = false;
            {
                let Some(store) = ecs.stores.get_mut(record.archetype_id) else {
                    continue;
                };
                if record.row >= store.size() {
                    continue;
                }
                let r = record.row as usize;
                let alive = store
                    .healths
                    .as_deref()
                    .map(|h| h[r].value > 0.0)
                    .unwrap_or(false);
                if alive {
                    if let Some(anims) = store.render_animations.as_deref_mut() {
                        anims[r].clip_index = reaction.clip;
                        anims[r].time_sec = 0.0;
                        anims[r].playing = true;
                        anims[r].looping = false;
                        anims[r].speed = reaction.speed;
                        changed = true;
                    }
                }
            }
            if changed {
                ecs.mark_dirty(self.render_anim_id, record.archetype_id, record.row);
            }
        }
    }

    // Detect rows that just dropped to zero HP, play their death, and
    // migrate them behind the Dead tag. Collection is per store and applied
    // entity-keyed because the tag migration reshuffles rows.
    fn collect_newly_dead(&mut self, ecs: &mut EcsContext) {
        for i in 0..self.matching_scratch.len() {
            let archetype_id = self.matching_scratch[i];

            self.newly_dead.clear();
            {
                let Some(store) = ecs.stores.get(archetype_id) else {
                    continue;
                };
                let Some(healths) = store.healths() else {
                    continue;
                };
                let entities = store.entities();
                for (r, hp) in healths.iter().enumerate() {
                    if hp.value <= 0.0 && !self.death_queue_set.contains(&entities[r].index) {
                        self.newly_dead.push(entities[r]);
                    }
                }
            }

            for j in 0..self.newly_dead.len() {
                let dead_entity = self.newly_dead[j];
                let Some(record) = ecs.entities.find(dead_entity) else {
                    continue;
                };
                let death_clip = self
                    .rng
                    .gen_range(self.anims.death_start..=self.anims.death_end);
                {
                    let Some(store) = ecs.stores.get_mut(record.archetype_id) else {
                        continue;
                    };
                    if record.row >= store.size() {
                        continue;
                    }
                    let r = record.row as usize;
                    if let Some(anims) = store.render_animations.as_deref_mut() {
                        anims[r].clip_index = death_clip;
                        anims[r].time_sec = 0.0;
                        anims[r].playing = true;
                        anims[r].looping = false;
                        anims[r].speed = 1.0;
                    }
                    if let Some(velocities) = store.velocities.as_deref_mut() {
                        velocities[r].x = 0.0;
                        velocities[r].y = 0.0;
                        velocities[r].z = 0.0;
                    }
                    if let Some(targets) = store.move_targets.as_deref_mut() {
                        targets[r].active = 0;
                    }
                }

                self.death_queue.push(PendingDeath {
                    entity: dead_entity,
                    time_remaining: self.cfg.death_remove_delay,
                });
                self.death_queue_set.insert(dead_entity.index);
                self.stats_dirty = true;

                // The Dead tag migrates the row out of every gameplay query.
                ecs.add_tag(dead_entity, self.dead_id);
            }
        }
    }
}

/// Nearest living enemy of `my_team` around `(my_x, my_z)`: spatial 3x3
/// scan first, full scan across matching stores as fallback. Returns
/// `(x, z, dist2, entity)`; the entity is invalid when no enemy exists.
#[allow(clippy::too_many_arguments)]
fn nearest_enemy(
    ecs: &EcsContext,
    spatial: &SpatialIndexSystem,
    matching: &[u32],
    my_archetype: u32,
    my_row: u32,
    my_team: u8,
    my_x: f32,
    my_z: f32,
) -> (f32, f32, f32, Entity) {
    let mut best_dist2 = f32::MAX;
    let mut best_x = my_x;
    let mut best_z = my_z;
    let mut best_enemy = Entity::INVALID;

    spatial.for_neighbors(my_x, my_z, |n_aid, n_row| {
        if n_aid == my_archetype && n_row == my_row {
            return;
        }
        let Some(n_store) = ecs.stores.get(n_aid) else {
            return;
        };
        if n_row >= n_store.size() {
            return;
        }
        let (Some(positions), Some(healths), Some(teams)) =
            (n_store.positions(), n_store.healths(), n_store.teams())
        else {
            return;
        };
        let r = n_row as usize;
        if teams[r].id == my_team || healths[r].value <= 0.0 {
            return;
        }
        let ex = positions[r].x;
        let ez = positions[r].z;
        let d2 = (ex - my_x) * (ex - my_x) + (ez - my_z) * (ez - my_z);
        if d2 < best_dist2 {
            best_dist2 = d2;
            best_x = ex;
            best_z = ez;
            best_enemy = n_store.entities()[r];
        }
    });

    if best_enemy.is_valid() {
        return (best_x, best_z, best_dist2, best_enemy);
    }

    // The spatial window came up empty: full scan.
    for &other_id in matching {
        let Some(store) = ecs.stores.get(other_id) else {
            continue;
        };
        let (Some(positions), Some(healths), Some(teams)) =
            (store.positions(), store.healths(), store.teams())
        else {
            continue;
        };
        let entities = store.entities();
        for r in 0..store.size() as usize {
            if other_id == my_archetype && r as u32 == my_row {
                continue;
            }
            if teams[r].id == my_team || healths[r].value <= 0.0 {
                continue;
            }
            let ex = positions[r].x;
            let ez = positions[r].z;
            let d2 = (ex - my_x) * (ex - my_x) + (ez - my_z) * (ez - my_z);
            if d2 < best_dist2 {
                best_dist2 = d2;
                best_x = ex;
                best_z = ez;
                best_enemy = entities[r];
            }
        }
    }

    (best_x, best_z, best_dist2, best_enemy)
}
