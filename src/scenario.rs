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

//! Scenario files: anchors, spawn groups, formations, combat tuning.
//!
//! A scenario places prefab instances into the world. Groups anchor to named
//! points, lay units out in grid or circle formations, and may jitter
//! positions deterministically (seeded per group id). A bad group is logged
//! and skipped; the rest of the scenario still loads.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use ahash::AHashMap;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;
use tracing::{info, warn};

use crate::component::{names, DefaultValue};
use crate::context::EcsContext;
use crate::error::Result;
use crate::prefab::Prefab;
use crate::spawn::spawn_from_prefab;
use crate::systems::combat::CombatConfig;

/// Battle trigger zone: clicking inside it starts the charge.
#[derive(Debug, Clone, Copy, Deserialize, Default)]
#[serde(default)]
pub struct StartZone {
    pub x: f32,
    pub z: f32,
    pub radius: f32,
}

#[derive(Debug, Clone, Copy, Deserialize, Default)]
#[serde(default)]
struct AnchorDef {
    x: f32,
    z: f32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum SpacingDef {
    Auto(String),
    Meters(f32),
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct FormationDef {
    kind: String,
    columns: u32,
    #[serde(rename = "radius_m")]
    radius_m: f32,
    #[serde(rename = "spacing_m")]
    spacing_m: Option<SpacingDef>,
    #[serde(rename = "jitter_m")]
    jitter_m: f32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct SpawnGroupDef {
    id: String,
    #[serde(rename = "unitType")]
    unit_type: String,
    count: i32,
    anchor: String,
    offset: AnchorDef,
    formation: Option<FormationDef>,
    team: i32,
    #[serde(rename = "facingYawDeg")]
    facing_yaw_deg: f32,
}

impl Default for SpawnGroupDef {
    fn default() -> Self {
        Self {
            id: String::new(),
            unit_type: String::new(),
            count: 0,
            anchor: String::new(),
            offset: AnchorDef::default(),
            formation: None,
            // -1 leaves the prefab's team untouched.
            team: -1,
            facing_yaw_deg: 0.0,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct ScenarioFile {
    name: String,
    anchors: AHashMap<String, AnchorDef>,
    #[serde(rename = "spawnGroups")]
    spawn_groups: Vec<SpawnGroupDef>,
    combat: Option<CombatConfig>,
    #[serde(rename = "startZone")]
    start_zone: Option<StartZone>,
}

/// What a scenario load produced.
#[derive(Debug, Default)]
pub struct ScenarioSummary {
    pub name: String,
    pub total_spawned: u32,
    pub combat: Option<CombatConfig>,
    pub start_zone: Option<StartZone>,
}

/// Desired centre-to-centre spacing for same-type units:
/// `(r + r) + (sep + sep)` from the prefab defaults.
fn prefab_auto_spacing(prefab: &Prefab, ecs: &mut EcsContext) -> f32 {
    let radius_id = ecs.components.ensure(names::RADIUS);
    let separation_id = ecs.components.ensure(names::SEPARATION);

    let r = match prefab.defaults.get(&radius_id) {
        Some(DefaultValue::Radius(radius)) => radius.r,
        _ => 0.0,
    };
    let s = match prefab.defaults.get(&separation_id) {
        Some(DefaultValue::Separation(sep)) => sep.value,
        _ => 0.0,
    };
    2.0 * (r + s)
}

fn formation_offset(group: &SpawnGroupDef, index: i32, spacing_m: f32) -> (f32, f32) {
    let formation = group.formation.as_ref();
    let kind = formation.map(|f| f.kind.as_str()).unwrap_or("grid");

    if kind == "circle" {
        let radius = formation.map(|f| f.radius_m).unwrap_or(0.0);
        let angle = if group.count > 0 {
            index as f32 * std::f32::consts::TAU / group.count as f32
        } else {
            0.0
        };
        return (angle.cos() * radius, angle.sin() * radius);
    }

    // Grid (the default): row-major, centred on the origin.
    let columns = match formation.map(|f| f.columns).unwrap_or(0) {
        0 => (group.count as f32).sqrt().ceil() as i32,
        c => c as i32,
    };
    let rows = (group.count as f32 / columns as f32).ceil() as i32;
    let half_w = (columns as f32 - 1.0) * 0.5;
    let half_h = (rows as f32 - 1.0) * 0.5;

    let col = index % columns;
    let row = index / columns;
    (
        (col as f32 - half_w) * spacing_m,
        (row as f32 - half_h) * spacing_m,
    )
}

/// Spawn every group in the scenario JSON. `select_spawned` additionally
/// tags each spawned unit `Selected` (exercising tag migration).
pub fn spawn_from_scenario(
    ecs: &mut EcsContext,
    json_text: &str,
    select_spawned: bool,
) -> Result<ScenarioSummary> {
    let file: ScenarioFile = serde_json::from_str(json_text)?;
    info!(scenario = %file.name, groups = file.spawn_groups.len(), "loading scenario");

    let selected_id = ecs.components.ensure(names::SELECTED);
    let mut total_spawned = 0u32;

    for group in &file.spawn_groups {
        if group.unit_type.is_empty() || group.count <= 0 {
            warn!(group = %group.id, "skipping group: missing unitType or count");
            continue;
        }
        let Some(prefab) = ecs.prefabs.get(&group.unit_type).cloned() else {
            warn!(group = %group.id, unit_type = %group.unit_type, "skipping group: unknown prefab");
            continue;
        };

        let anchor = file.anchors.get(&group.anchor).copied().unwrap_or_default();
        let origin_x = anchor.x + group.offset.x;
        let origin_z = anchor.z + group.offset.z;

        let spacing_m = match group.formation.as_ref().and_then(|f| f.spacing_m.as_ref()) {
            Some(SpacingDef::Meters(m)) => *m,
            // "auto" (or absent): derive from the prefab's footprint.
            _ => prefab_auto_spacing(&prefab, ecs),
        };
        let jitter_m = group.formation.as_ref().map(|f| f.jitter_m).unwrap_or(0.0);

        // Deterministic jitter per group so layouts reproduce run to run.
        let mut hasher = DefaultHasher::new();
        group.id.hash(&mut hasher);
        let mut rng = StdRng::seed_from_u64(hasher.finish());

        let team = if group.team >= 0 {
            Some(group.team as u8)
        } else {
            None
        };
        let facing_yaw = group.facing_yaw_deg.to_radians();

        info!(
            group = %group.id,
            unit_type = %group.unit_type,
            count = group.count,
            origin_x,
            origin_z,
            spacing_m,
            "spawning group"
        );

        for i in 0..group.count {
            let (ox, oz) = formation_offset(group, i, spacing_m);
            let mut x = origin_x + ox;
            let mut z = origin_z + oz;
            if jitter_m > 0.0 {
                x += rng.gen_range(-jitter_m..jitter_m);
                z += rng.gen_range(-jitter_m..jitter_m);
            }

            let spawned = spawn_from_prefab(&prefab, ecs);
            if let Some(store) = ecs.stores.get_mut(spawned.archetype_id) {
                let r = spawned.row as usize;
                if let Some(positions) = store.positions_mut() {
                    positions[r].x = x;
                    positions[r].y = 0.0;
                    positions[r].z = z;
                }
                if let (Some(teams), Some(team)) = (store.teams_mut(), team) {
                    teams[r].id = team;
                }
                if let Some(facings) = store.facings_mut() {
                    facings[r].yaw = facing_yaw;
                }
            }
            if select_spawned {
                ecs.add_tag(spawned.entity, selected_id);
            }
            total_spawned += 1;
        }
    }

    info!(total_spawned, "scenario loaded");
    Ok(ScenarioSummary {
        name: file.name,
        total_spawned,
        combat: file.combat,
        start_zone: file.start_zone,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::AssetCatalog;
    use crate::prefab::load_prefab_from_json;

    fn ecs_with_knight() -> EcsContext {
        let mut ecs = EcsContext::new();
        let mut assets = AssetCatalog::new();
        let prefab = load_prefab_from_json(
            r#"{
                "name": "Knight",
                "components": ["Position", "Velocity", "Health", "Team", "Facing",
                               "Radius", "Separation"],
                "Radius": { "r": 0.4 },
                "Separation": { "value": 0.1 }
            }"#,
            &mut ecs.components,
            &mut ecs.archetypes,
            &mut assets,
        )
        .unwrap();
        ecs.prefabs.add(prefab);
        ecs
    }

    #[test]
    fn grid_formation_spawns_centred_with_team_and_facing() {
        let mut ecs = ecs_with_knight();
        let summary = spawn_from_scenario(
            &mut ecs,
            r#"{
                "name": "test",
                "anchors": { "west": { "x": -10.0, "z": 0.0 } },
                "spawnGroups": [{
                    "id": "g1",
                    "unitType": "Knight",
                    "count": 4,
                    "anchor": "west",
                    "team": 1,
                    "facingYawDeg": 90.0,
                    "formation": { "kind": "grid", "spacing_m": 2.0 }
                }]
            }"#,
            false,
        )
        .unwrap();
        assert_eq!(summary.total_spawned, 4);

        let prefab = ecs.prefabs.get("Knight").unwrap().clone();
        let store = ecs.stores.get(prefab.archetype_id).unwrap();
        let positions = store.positions().unwrap();
        let mean_x: f32 = positions.iter().map(|p| p.x).sum::<f32>() / 4.0;
        let mean_z: f32 = positions.iter().map(|p| p.z).sum::<f32>() / 4.0;
        assert!((mean_x + 10.0).abs() < 1e-4);
        assert!(mean_z.abs() < 1e-4);

        let teams = store.teams().unwrap();
        assert!(teams.iter().all(|t| t.id == 1));
        let facings = store.facings().unwrap();
        assert!(facings
            .iter()
            .all(|f| (f.yaw - std::f32::consts::FRAC_PI_2).abs() < 1e-4));
    }

    #[test]
    fn circle_formation_places_on_the_radius() {
        let mut ecs = ecs_with_knight();
        spawn_from_scenario(
            &mut ecs,
            r#"{
                "name": "test",
                "anchors": { "c": { "x": 0.0, "z": 0.0 } },
                "spawnGroups": [{
                    "id": "ring",
                    "unitType": "Knight",
                    "count": 8,
                    "anchor": "c",
                    "formation": { "kind": "circle", "radius_m": 5.0 }
                }]
            }"#,
            false,
        )
        .unwrap();

        let prefab = ecs.prefabs.get("Knight").unwrap().clone();
        let store = ecs.stores.get(prefab.archetype_id).unwrap();
        for p in store.positions().unwrap() {
            let r = (p.x * p.x + p.z * p.z).sqrt();
            assert!((r - 5.0).abs() < 1e-3, "unit off the ring at r={r}");
        }
    }

    #[test]
    fn auto_spacing_derives_from_prefab_footprint() {
        let mut ecs = ecs_with_knight();
        spawn_from_scenario(
            &mut ecs,
            r#"{
                "name": "test",
                "spawnGroups": [{
                    "id": "pair",
                    "unitType": "Knight",
                    "count": 2,
                    "formation": { "spacing_m": "auto" }
                }]
            }"#,
            false,
        )
        .unwrap();

        let prefab = ecs.prefabs.get("Knight").unwrap().clone();
        let store = ecs.stores.get(prefab.archetype_id).unwrap();
        let positions = store.positions().unwrap();
        // 2 * (0.4 + 0.1) = 1.0 m centre-to-centre.
        let d = ((positions[0].x - positions[1].x).powi(2)
            + (positions[0].z - positions[1].z).powi(2))
        .sqrt();
        assert!((d - 1.0).abs() < 1e-3, "expected auto spacing 1.0, got {d}");
    }

    #[test]
    fn unknown_prefab_skips_group_but_not_scenario() {
        let mut ecs = ecs_with_knight();
        let summary = spawn_from_scenario(
            &mut ecs,
            r#"{
                "name": "test",
                "spawnGroups": [
                    { "id": "bad", "unitType": "Dragon", "count": 5 },
                    { "id": "good", "unitType": "Knight", "count": 2 }
                ],
                "combat": { "meleeRange": 3.5 },
                "startZone": { "x": 1.0, "z": 2.0, "radius": 8.0 }
            }"#,
            false,
        )
        .unwrap();
        assert_eq!(summary.total_spawned, 2);
        assert_eq!(summary.combat.unwrap().melee_range, 3.5);
        assert_eq!(summary.start_zone.unwrap().radius, 8.0);
    }

    #[test]
    fn select_spawned_tags_units() {
        let mut ecs = ecs_with_knight();
        spawn_from_scenario(
            &mut ecs,
            r#"{
                "name": "test",
                "spawnGroups": [{ "id": "g", "unitType": "Knight", "count": 3 }]
            }"#,
            true,
        )
        .unwrap();

        let selected_id = ecs.components.id(names::SELECTED);
        let mut tagged = 0;
        for (_, store) in ecs.stores.iter() {
            if store.signature().has(selected_id) {
                tagged += store.size();
            }
        }
        assert_eq!(tagged, 3);
    }
}
